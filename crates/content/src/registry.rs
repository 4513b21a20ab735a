//! Two-level registries: per-parser overrides on top of process-wide
//! defaults.

use crate::ContentError;
use crate::descriptor::ContentDescriptor;
use crate::value::Value;
use http::HeaderMap;
use micro_body::stage::{Decompressor, Transform};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A post-processor of decoded bodies, registered under a mime pattern.
///
/// Decoders are chained: each receives the value the previous one
/// returned. A decoder may change the descriptor's
/// [`datatype`](ContentDescriptor::set_datatype) to report what it produced.
pub trait ContentDecoder: Send + Sync {
    fn decode(&self, content: &mut ContentDescriptor, headers: &HeaderMap, value: Value) -> Result<Value, ContentError>;
}

/// A [`ContentDecoder`] backed by a closure, see [`fn_decoder`].
#[derive(Debug)]
pub struct FnDecoder<F> {
    f: F,
}

impl<F> ContentDecoder for FnDecoder<F>
where
    F: Fn(&mut ContentDescriptor, &HeaderMap, Value) -> Result<Value, ContentError> + Send + Sync,
{
    fn decode(&self, content: &mut ContentDescriptor, headers: &HeaderMap, value: Value) -> Result<Value, ContentError> {
        (self.f)(content, headers, value)
    }
}

/// Wraps a closure into a [`ContentDecoder`].
///
/// ```
/// use micro_content::{Value, fn_decoder};
///
/// let trim = fn_decoder(|_, _, value| match value {
///     Value::Text(text) => Ok(Value::Text(text.trim_end().to_owned())),
///     other => Ok(other),
/// });
/// # let _ = trim;
/// ```
pub fn fn_decoder<F>(f: F) -> FnDecoder<F>
where
    F: Fn(&mut ContentDescriptor, &HeaderMap, Value) -> Result<Value, ContentError> + Send + Sync,
{
    FnDecoder { f }
}

pub type SharedDecoder = Arc<dyn ContentDecoder>;

/// Builds a fresh decompression stage for one body.
pub type DecompressorFactory = Arc<dyn Fn() -> Result<Box<dyn Transform>, ContentError> + Send + Sync>;

/// Wraps a built-in [`Decompressor`] constructor into a factory.
pub(crate) fn builtin(make: fn() -> Result<Decompressor, ContentError>) -> DecompressorFactory {
    Arc::new(move || make().map(|stage| Box::new(stage) as Box<dyn Transform>))
}

/// A lookup consulting its own entries first and the shared defaults second.
///
/// Registering on one registry never affects another, nor the defaults.
pub struct Registry<K: 'static, V: 'static> {
    overrides: HashMap<K, V>,
    defaults: &'static HashMap<K, V>,
}

impl<K, V> Clone for Registry<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self { overrides: self.overrides.clone(), defaults: self.defaults }
    }
}

impl<K, V> std::fmt::Debug for Registry<K, V>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash,
{
    pub fn new(defaults: &'static HashMap<K, V>) -> Self {
        Self { overrides: HashMap::new(), defaults }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.overrides.insert(key, value);
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.overrides.get(key).or_else(|| self.defaults.get(key))
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }
}

/// Validates a decoder pattern: `type/subtype`, `type/*` or `*/subtype`.
pub(crate) fn pattern(pattern: &str) -> Result<String, ContentError> {
    let pattern = pattern.trim().to_ascii_lowercase();
    let valid = match pattern.split_once('/') {
        Some((kind, sub)) => !kind.is_empty() && !sub.is_empty() && !sub.contains('/') && !(kind == "*" && sub == "*"),
        None => false,
    };
    if valid { Ok(pattern) } else { Err(ContentError::invalid_header(format!("invalid decoder pattern: {pattern}"))) }
}

/// The patterns looked up for a mime type, in chaining order.
pub(crate) fn patterns(mime: &str) -> [String; 3] {
    let (kind, sub) = mime.split_once('/').unwrap_or((mime, ""));
    [format!("{kind}/*"), format!("*/{sub}"), mime.to_owned()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static DEFAULTS: Lazy<HashMap<String, u8>> = Lazy::new(|| HashMap::from([("a".to_owned(), 1), ("b".to_owned(), 2)]));

    #[test]
    fn overrides_shadow_defaults() {
        let mut registry = Registry::new(Lazy::force(&DEFAULTS));
        registry.insert("b".to_owned(), 20);
        registry.insert("c".to_owned(), 30);

        assert_eq!(registry.get("a"), Some(&1));
        assert_eq!(registry.get("b"), Some(&20));
        assert_eq!(registry.get("c"), Some(&30));
        assert!(!registry.contains("d"));

        let other = Registry::new(Lazy::force(&DEFAULTS));
        assert_eq!(other.get("b"), Some(&2));
        assert!(!other.contains("c"));
    }

    #[test]
    fn validate_patterns() {
        assert_eq!(pattern("Text/*").unwrap(), "text/*");
        assert_eq!(pattern("*/json").unwrap(), "*/json");
        assert!(pattern("*/*").is_err());
        assert!(pattern("text").is_err());
        assert!(pattern("text/plain/x").is_err());
        assert!(pattern("/plain").is_err());
    }

    #[test]
    fn chaining_order() {
        assert_eq!(patterns("multipart/form-data"), ["multipart/*", "*/form-data", "multipart/form-data"]);
    }
}
