//! Dotted field path helpers. `.` names the document root.

use super::ROOT;

/// `true` when `path` is `prefix` or lies below it.
pub fn is_prefix(prefix: &str, path: &str) -> bool {
    if prefix == ROOT {
        return true;
    }
    path == prefix || (path.starts_with(prefix) && path[prefix.len()..].starts_with('.'))
}

/// Join two paths, treating `.` as empty.
pub fn join(parent: &str, child: &str) -> String {
    match (parent, child) {
        (ROOT, c) => c.to_string(),
        (p, ROOT) => p.to_string(),
        (p, c) => format!("{}.{}", p, c),
    }
}

/// `path` as seen from `parent`; `.` when they are equal.
pub fn relative(path: &str, parent: &str) -> String {
    if parent == ROOT {
        return path.to_string();
    }
    if path == parent {
        return ROOT.to_string();
    }
    if is_prefix(parent, path) {
        return path[parent.len() + 1..].to_string();
    }
    path.to_string()
}

/// Number of segments below the root.
pub fn depth(path: &str) -> usize {
    if path == ROOT {
        0
    } else {
        path.split('.').count()
    }
}

/// Split a `from` reference into the table and the nested path inside it.
pub fn split_table(from: &str) -> (&str, &str) {
    match from.split_once('.') {
        Some((table, nested)) => (table, nested),
        None => (from, ROOT),
    }
}
