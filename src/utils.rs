//! Utility functions for the router.
//!
//! - Fragment normalization and query string splitting
//! - Relative/absolute URL resolution against a router's base URL
//! - Rooted path construction for hash and push-state modes

use url::form_urlencoded;

use crate::instruction::Params;

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// Split a URL into its fragment and query string (without the `?`).
pub fn split_query(url: &str) -> (&str, &str) {
    match url.find('?') {
        Some(idx) => (&url[..idx], &url[idx + 1..]),
        None => (url, ""),
    }
}

/// Strip hash/slash prefixes and trailing slashes so every fragment is
/// stored in one canonical shape (`a/b`, never `#/a/b/`).
pub fn normalize_fragment(fragment: &str) -> String {
    let trimmed = fragment.trim_start_matches('#').trim_start_matches('/');
    trimmed.trim_end_matches('/').to_string()
}

/// Whether a fragment is anchored at the application root rather than at
/// the navigating router's base URL.
pub fn is_absolute(fragment: &str) -> bool {
    fragment.starts_with('/') || fragment.starts_with('#')
}

/// Join two fragments with exactly one separator.
pub fn join_fragments(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, path),
    }
}

/// Resolve a fragment against a base URL. Absolute fragments ignore the base.
pub fn resolve_url(fragment: &str, base_url: &str) -> String {
    let (path, query) = split_query(fragment);
    let resolved = if is_absolute(path) {
        normalize_fragment(path)
    } else {
        normalize_fragment(&join_fragments(base_url, path))
    };
    if query.is_empty() {
        resolved
    } else {
        format!("{}?{}", resolved, query)
    }
}

/// Build the externally visible path for a fragment.
/// Hash mode yields `#/a/b`, push-state mode yields `/a/b`.
pub fn rooted_path(fragment: &str, base_url: &str, push_state: bool) -> String {
    let joined = join_fragments(&normalize_fragment(base_url), fragment.trim_start_matches('/'));
    if push_state {
        format!("/{}", joined)
    } else {
        format!("#/{}", joined)
    }
}

// ---------------------------------------------------------------------------
// Query Strings
// ---------------------------------------------------------------------------

/// Parse a query string into params, keeping declaration order.
/// A repeated key keeps its last value.
pub fn parse_query_string(query: &str) -> Params {
    let mut params = Params::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params.insert(key.into_owned(), value.into_owned());
    }
    params
}

/// Encode params as a query string (without the leading `?`).
pub fn build_query_string(params: &Params) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params.iter() {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_query() {
        assert_eq!(split_query("a/b?x=1"), ("a/b", "x=1"));
        assert_eq!(split_query("a/b"), ("a/b", ""));
        assert_eq!(split_query("?x=1"), ("", "x=1"));
    }

    #[test]
    fn test_normalize_fragment() {
        assert_eq!(normalize_fragment("#/users/5/"), "users/5");
        assert_eq!(normalize_fragment("/"), "");
        assert_eq!(normalize_fragment("users"), "users");
    }

    #[test]
    fn test_resolve_url_relative_and_absolute() {
        assert_eq!(resolve_url("edit", "users/5"), "users/5/edit");
        assert_eq!(resolve_url("/home", "users/5"), "home");
        assert_eq!(resolve_url("#/home?tab=2", "users"), "home?tab=2");
        assert_eq!(resolve_url("edit?x=1", ""), "edit?x=1");
    }

    #[test]
    fn test_rooted_path() {
        assert_eq!(rooted_path("b/5", "", false), "#/b/5");
        assert_eq!(rooted_path("b/5", "", true), "/b/5");
        assert_eq!(rooted_path("edit", "users/5", true), "/users/5/edit");
    }

    #[test]
    fn test_query_string_keeps_order() {
        let params = parse_query_string("b=2&a=1&b=3");
        let keys: Vec<&str> = params.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(params.get("b"), Some("3"));
        assert_eq!(build_query_string(&params), "b=3&a=1");
    }

    #[test]
    fn test_query_string_encoding() {
        let mut params = Params::new();
        params.insert("q", "a b&c");
        let encoded = build_query_string(&params);
        assert_eq!(encoded, "q=a+b%26c");
        assert_eq!(parse_query_string(&encoded).get("q"), Some("a b&c"));
    }
}
