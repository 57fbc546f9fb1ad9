//! Listing-file convention shared by every source backend.
//!
//! A listing file named [`INDEX_FILE`] holds one unit name per line. Lines
//! are trimmed; blank lines and lines starting with `#` are ignored. The
//! order of the remaining lines is the canonical unit order.

/// Name of the listing file inside a source directory / prefix.
pub const INDEX_FILE: &str = "index";

/// Parse listing-file text into ordered unit names.
pub fn parse_listing(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Join a directory (or key prefix) and a file name with `/`.
///
/// Trailing separators on `dir` are dropped; an empty `dir` yields `name`.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
