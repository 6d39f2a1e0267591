//! Tessera CLI - compile analytic queries and decode recorded responses
//!
//! Usage:
//!   tessera compile <query.json> --schema <catalog.json> [--backend-version <v>]
//!   tessera run <query.json> --schema <catalog.json> --response <response.json>
//!   tessera columns <docs.json> [--table <name>]
//!   tessera hash <query.json>
//!
//! Examples:
//!   tessera compile queries/by_status.json --schema bugs.json
//!   tessera run queries/by_status.json --schema bugs.json --response recorded.json
//!   tessera columns samples.json --table bugs > bugs.json

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tessera::backend::StaticBackend;
use tessera::compile::compile;
use tessera::config::Settings;
use tessera::executor::Executor;
use tessera::query::Query;
use tessera::saved::query_hash;
use tessera::schema::{path, Catalog};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - compiles analytic queries to search-backend requests")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $TESSERA_CONFIG, ./tessera.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the backend request for a query
    Compile {
        /// Path to the query JSON
        query: PathBuf,

        /// Path to the column catalog JSON
        #[arg(short, long)]
        schema: PathBuf,

        /// Backend version to compile for (overrides the config)
        #[arg(long)]
        backend_version: Option<String>,
    },

    /// Decode a recorded backend response for a query
    Run {
        /// Path to the query JSON
        query: PathBuf,

        /// Path to the column catalog JSON
        #[arg(short, long)]
        schema: PathBuf,

        /// Path to the recorded response JSON
        #[arg(short, long)]
        response: PathBuf,
    },

    /// Infer a column catalog from sample documents
    Columns {
        /// Path to a JSON array of documents
        docs: PathBuf,

        /// Table name for the catalog
        #[arg(short, long, default_value = "docs")]
        table: String,
    },

    /// Print the saved-query id of a query
    Hash {
        /// Path to the query JSON
        query: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tessera::logging::init(&settings.logging);

    match cli.command {
        Commands::Compile {
            query,
            schema,
            backend_version,
        } => cmd_compile(&settings, query, schema, backend_version),
        Commands::Run {
            query,
            schema,
            response,
        } => cmd_run(&settings, query, schema, response).await,
        Commands::Columns { docs, table } => cmd_columns(docs, &table),
        Commands::Hash { query } => cmd_hash(query),
    }
}

fn read_json(file: &Path) -> Result<Value, String> {
    let source = fs::read_to_string(file)
        .map_err(|e| format!("Error reading file '{}': {}", file.display(), e))?;
    serde_json::from_str(&source)
        .map_err(|e| format!("Error parsing JSON in '{}': {}", file.display(), e))
}

fn load_query(file: &Path) -> Result<Query, String> {
    let value = read_json(file)?;
    Query::from_json(&value).map_err(|e| format!("Invalid query: {}", e))
}

fn load_catalog(file: &Path) -> Result<Catalog, String> {
    let value = read_json(file)?;
    serde_json::from_value(value).map_err(|e| format!("Invalid catalog '{}': {}", file.display(), e))
}

fn print_json(value: &Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error writing output: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_compile(
    settings: &Settings,
    query: PathBuf,
    schema: PathBuf,
    backend_version: Option<String>,
) -> ExitCode {
    let (query, catalog) = match load_query(&query).and_then(|q| Ok((q, load_catalog(&schema)?))) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let version = backend_version.unwrap_or_else(|| settings.backend.version.clone());

    let (_, nested) = path::split_table(&query.from);
    let compiled = catalog
        .scoped_to(nested)
        .and_then(|scoped| compile(&query, &scoped, &version, &settings.to_compile_options()));

    match compiled {
        Ok(compiled) => print_json(compiled.request()),
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(settings: &Settings, query: PathBuf, schema: PathBuf, response: PathBuf) -> ExitCode {
    let loaded = load_query(&query)
        .and_then(|q| Ok((q, load_catalog(&schema)?, read_json(&response)?)));
    let (query, catalog, response) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let prefix = match settings.backend.prefix() {
        Ok(prefix) => prefix,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let backend = StaticBackend::new(&settings.backend.version).with_response(response);
    let mut executor = Executor::new(Arc::new(backend))
        .with_options(settings.to_compile_options())
        .with_index_prefix(prefix);
    if let Some(timeout) = settings.backend.timeout() {
        executor = executor.with_timeout(timeout);
    }

    match executor.execute(&query, &catalog).await {
        Ok(output) => print_json(&output.to_json()),
        Err(e) => {
            eprintln!("Query error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_columns(docs: PathBuf, table: &str) -> ExitCode {
    let docs = match read_json(&docs) {
        Ok(Value::Array(docs)) => docs,
        Ok(single) => vec![single],
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let catalog = Catalog::from_documents(table, &docs);
    match serde_json::to_value(&catalog) {
        Ok(value) => print_json(&value),
        Err(e) => {
            eprintln!("Error writing catalog: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_hash(query: PathBuf) -> ExitCode {
    match read_json(&query) {
        Ok(value) => {
            println!("{}", query_hash(&value));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
