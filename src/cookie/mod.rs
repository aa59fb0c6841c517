//! Per-VU cookie jar and the `Set-Cookie` parsing shared by the HTTP
//! executor (which writes to the jar) and the variable engine's
//! `cookie:<Name>` extraction source (which reads from a response's raw
//! headers without ever touching the jar).

use std::collections::HashMap;

/// Keyed by origin (`scheme://host:port`) rather than the full
/// `(host, path)` pair a browser jar would use — no scenario in this
/// system's test surface depends on path-scoped cookies, and origin is the
/// one key `reqwest::Url::origin()` hands back pre-built.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    by_origin: HashMap<String, HashMap<String, String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie_header_for(&self, origin: &str) -> Option<String> {
        let jar = self.by_origin.get(origin)?;
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn store(&mut self, origin: &str, name: String, value: String) {
        self.by_origin
            .entry(origin.to_string())
            .or_default()
            .insert(name, value);
    }

    pub fn store_all(&mut self, origin: &str, set_cookie_headers: &[String]) {
        for raw in set_cookie_headers {
            if let Some((name, value)) = parse_set_cookie(raw) {
                self.store(origin, name, value);
            }
        }
    }

    /// Folds another jar's cookies into this one, last-write-wins per name.
    /// Used to reconcile sibling jars after a parallel block's branches run
    /// against their own clones and need to converge back into the VU's jar.
    pub fn merge(&mut self, other: CookieJar) {
        for (origin, cookies) in other.by_origin {
            let entry = self.by_origin.entry(origin).or_default();
            for (name, value) in cookies {
                entry.insert(name, value);
            }
        }
    }
}

/// Parses one `Set-Cookie` header value into its `(name, value)` pair,
/// ignoring every attribute after the first `;` (`Path`, `Domain`,
/// `Max-Age`, ...). Returns `None` for a malformed header with no `=`.
pub fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?.trim();
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Finds the named cookie among a response's raw `Set-Cookie` header
/// values, used by the extraction source `cookie:<Name>`.
pub fn find_named(headers: &[String], name: &str) -> Option<String> {
    headers.iter().find_map(|raw| {
        let (n, v) = parse_set_cookie(raw)?;
        if n.eq_ignore_ascii_case(name) {
            Some(v)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_set_cookie() {
        let (name, value) = parse_set_cookie("session=abc123; Path=/; HttpOnly").unwrap();
        assert_eq!(name, "session");
        assert_eq!(value, "abc123");
    }

    #[test]
    fn jar_round_trips_by_origin() {
        let mut jar = CookieJar::new();
        jar.store_all(
            "https://example.invalid",
            &["a=1".to_string(), "b=2; Secure".to_string()],
        );
        let header = jar.cookie_header_for("https://example.invalid").unwrap();
        assert!(header.contains("a=1"));
        assert!(header.contains("b=2"));
        assert!(jar.cookie_header_for("https://other.invalid").is_none());
    }

    #[test]
    fn find_named_is_case_insensitive() {
        let headers = vec!["Session=xyz; Path=/".to_string()];
        assert_eq!(find_named(&headers, "session"), Some("xyz".to_string()));
    }
}
