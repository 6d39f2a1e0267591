//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Filter from `RUST_LOG`, else from the configured level.
fn filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}

/// Install the global subscriber. Logs go to stderr so stdout stays data.
///
/// Calling this twice is harmless; the second call does nothing.
pub fn init(settings: &LoggingSettings) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(settings))
        .with_writer(std::io::stderr);
    let _ = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
