//! Per-method capability flags.

use http::Method;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A capability of a request method.
///
/// Flags decide whether a request body is expected (`Request`) and whether
/// forms are decoded automatically (`Form`); the others are informative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Request,
    Response,
    Form,
    Safe,
    Idempotent,
    Cacheable,
    /// Cacheable only when freshness information is included.
    Fresh,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Request => "request",
            Flag::Response => "response",
            Flag::Form => "form",
            Flag::Safe => "safe",
            Flag::Idempotent => "idempotent",
            Flag::Cacheable => "cacheable",
            Flag::Fresh => "fresh",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) static DEFAULT_METHODS: Lazy<HashMap<Method, Vec<Flag>>> = Lazy::new(|| {
    use Flag::*;

    HashMap::from([
        (Method::DELETE, vec![Idempotent]),
        (Method::GET, vec![Response, Form, Safe, Idempotent, Cacheable]),
        (Method::HEAD, vec![Safe, Idempotent, Cacheable]),
        (Method::OPTIONS, vec![Response, Safe, Idempotent]),
        (Method::PATCH, vec![Request]),
        (Method::POST, vec![Request, Response, Form, Fresh]),
        (Method::PUT, vec![Request, Idempotent]),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        assert_eq!(DEFAULT_METHODS.len(), 7);
        assert_eq!(DEFAULT_METHODS[&Method::PUT], vec![Flag::Request, Flag::Idempotent]);
        assert_eq!(
            DEFAULT_METHODS[&Method::GET].iter().map(Flag::as_str).collect::<Vec<_>>(),
            vec!["response", "form", "safe", "idempotent", "cacheable"]
        );
        assert!(!DEFAULT_METHODS.contains_key(&Method::CONNECT));
        assert!(!DEFAULT_METHODS.contains_key(&Method::TRACE));
    }

    #[test]
    fn flags_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&DEFAULT_METHODS[&Method::POST]).unwrap(), r#"["request","response","form","fresh"]"#);
    }
}
