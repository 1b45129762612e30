//! Canonical path handling for watcher prefixes, context keys, and the
//! segments they're built from.
//!
//! The canonical form used everywhere in this crate has exactly one leading
//! slash, no trailing slash, and no empty segments: `/a/b`, with the empty
//! path written as `/`.

/// Joins path segments into a single canonical path.
///
/// Each argument may itself contain `/`-delimited segments; empty segments
/// (from leading/trailing/doubled slashes) are dropped.
pub fn join_paths<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut segments = Vec::new();
    for part in parts {
        for segment in part.as_ref().split('/') {
            if !segment.is_empty() {
                segments.push(segment.to_string());
            }
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Normalises a single path into canonical form.
pub fn canonicalize(raw: &str) -> String {
    join_paths([raw])
}

/// Splits a canonical path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}
