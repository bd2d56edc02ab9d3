//! Cache key derivation.
//!
//! Every buffered total lives in the cache under a key derived from its
//! `(namespace, key)` pair. The derivation must be injective: two different
//! pairs may never share a cache entry, otherwise an aggregation of one
//! counter would invalidate (or a read would return) another counter's total.
//!
//! The format is `BufferedCount(<namespace>,<key>)`. Inside each component the
//! characters `\`, `,` and `)` are escaped with a backslash, so the first
//! unescaped comma always marks the boundary between the two components.
//!
//! ```rust
//! use accumulatori::keys::{cache_key, parse_cache_key};
//!
//! assert_eq!(cache_key("likes", "post:42"), "BufferedCount(likes,post:42)");
//!
//! // Delimiters inside components cannot forge another pair's key.
//! assert_ne!(cache_key("a,b", "c"), cache_key("a", "b,c"));
//!
//! let (ns, key) = parse_cache_key(&cache_key("a,b", "c)")).unwrap();
//! assert_eq!((ns.as_str(), key.as_str()), ("a,b", "c)"));
//! ```

const PREFIX: &str = "BufferedCount(";
const SUFFIX: char = ')';
const SEPARATOR: char = ',';
const ESCAPE: char = '\\';

/// Derives the cache key for a `(namespace, key)` pair.
pub fn cache_key(namespace: &str, key: &str) -> String {
    let mut out = String::with_capacity(PREFIX.len() + namespace.len() + key.len() + 2);
    out.push_str(PREFIX);
    push_escaped(&mut out, namespace);
    out.push(SEPARATOR);
    push_escaped(&mut out, key);
    out.push(SUFFIX);
    out
}

/// Recovers the `(namespace, key)` pair from a derived cache key.
///
/// Returns `None` if `cache_key` was not produced by [`cache_key`].
pub fn parse_cache_key(cache_key: &str) -> Option<(String, String)> {
    let body = cache_key.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;

    let mut namespace = String::new();
    let mut key = String::new();
    let mut current = &mut namespace;
    let mut seen_separator = false;
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => current.push(chars.next()?),
            SEPARATOR if !seen_separator => {
                seen_separator = true;
                current = &mut key;
            }
            // an unescaped delimiter can only appear once
            SEPARATOR | SUFFIX => return None,
            other => current.push(other),
        }
    }

    seen_separator.then_some((namespace, key))
}

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if matches!(c, ESCAPE | SEPARATOR | SUFFIX) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_plain_key() {
        assert_eq!(cache_key("ns", "k"), "BufferedCount(ns,k)");
    }

    #[test]
    fn test_escaping() {
        assert_eq!(cache_key("a,b", "c"), r"BufferedCount(a\,b,c)");
        assert_eq!(cache_key(r"a\", "b)"), r"BufferedCount(a\\,b\))");
    }

    #[test]
    fn test_empty_components() {
        assert_eq!(cache_key("", ""), "BufferedCount(,)");
        assert_eq!(parse_cache_key("BufferedCount(,)"), Some((String::new(), String::new())));
        assert_ne!(cache_key("", "a"), cache_key("a", ""));
    }

    #[test]
    fn test_no_collisions_between_tricky_pairs() {
        let pieces = ["", "a", ",", ")", "\\", "a,b", "b)", "\\,", "a\\", ",)"];
        let mut seen = HashSet::new();
        for ns in pieces {
            for key in pieces {
                let derived = cache_key(ns, key);
                assert!(seen.insert(derived.clone()), "collision on {derived}");
                assert_eq!(
                    parse_cache_key(&derived),
                    Some((ns.to_string(), key.to_string()))
                );
            }
        }
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert_eq!(parse_cache_key("other(ns,k)"), None);
        assert_eq!(parse_cache_key("BufferedCount(nsk)"), None);
        assert_eq!(parse_cache_key("BufferedCount(a,b,c)"), None);
        assert_eq!(parse_cache_key("BufferedCount(a,b)c)"), None);
        assert_eq!(parse_cache_key(r"BufferedCount(a,b\)"), None);
    }

    #[test]
    fn test_unicode_components() {
        let derived = cache_key("visite", "città,ü");
        assert_eq!(
            parse_cache_key(&derived),
            Some(("visite".to_string(), "città,ü".to_string()))
        );
    }
}
