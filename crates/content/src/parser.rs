//! Content negotiation: from a request head to a [`ParsedRequest`] with a
//! wired body pipeline.

use crate::ContentError;
use crate::descriptor::{ContentDescriptor, Datatype};
use crate::form;
use crate::method::{DEFAULT_METHODS, Flag};
use crate::multipart;
use crate::registry::{self, ContentDecoder, DecompressorFactory, Registry, SharedDecoder, builtin, fn_decoder};
use crate::request::ParsedRequest;
use crate::utils::ensure;
use crate::value::{Entity, Value};
use bytes::Bytes;
use http::{HeaderMap, Method, Request};
use http_body::Body;
use micro_body::stage::{Decompressor, LimitFilter, Stages, Transform};
use micro_body::{BodyPipeline, BodyReader, BoxError, RawBody, transport};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
/// The pseudo mime of an HTML5 `text/plain` form submission.
pub const FORM_PLAIN: &str = "text/x-form-plain";
pub const FORM_DATA: &str = "multipart/form-data";

const IDENTITY: &str = "identity";

static DEFAULT_DECODERS: Lazy<HashMap<String, SharedDecoder>> = Lazy::new(|| {
    HashMap::from([
        (FORM_PLAIN.to_owned(), Arc::new(fn_decoder(form::decode_plain)) as SharedDecoder),
        (FORM_DATA.to_owned(), Arc::new(fn_decoder(form::decode_form_data)) as SharedDecoder),
    ])
});

static DEFAULT_DECOMPRESSORS: Lazy<HashMap<String, DecompressorFactory>> = Lazy::new(|| {
    HashMap::from([
        ("gzip".to_owned(), builtin(|| Ok(Decompressor::gzip()))),
        ("x-gzip".to_owned(), builtin(|| Ok(Decompressor::gzip()))),
        ("deflate".to_owned(), builtin(|| Ok(Decompressor::deflate()))),
        ("br".to_owned(), builtin(|| Ok(Decompressor::br()))),
        ("zstd".to_owned(), builtin(Decompressor::zstd)),
    ])
});

/// Negotiates request bodies.
///
/// A parser holds the optional global body size limit and three registries
/// (decoders, decompressors, method flags), each layered over the built-in
/// defaults. It is cheap to clone and can be shared between threads.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use http::Request;
/// use http_body_util::Full;
/// use micro_content::ContentParser;
///
/// # async fn run() -> Result<(), micro_content::ContentError> {
/// let parser = ContentParser::builder().limit(1024 * 1024).build()?;
///
/// let request = Request::put("/notes")
///     .header("content-type", "application/json")
///     .header("content-length", "13")
///     .body(Full::new(Bytes::from_static(br#"{"note":"hi"}"#)))
///     .unwrap();
///
/// let parsed = parser.parse(request)?;
/// let entity = parsed.read().unwrap().await?;
/// assert_eq!(entity.body.as_json().unwrap()["note"], "hi");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct ContentParser {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limit: Option<u64>,
    decoders: Registry<String, SharedDecoder>,
    decompressors: Registry<String, DecompressorFactory>,
    methods: Registry<Method, Vec<Flag>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            limit: None,
            decoders: Registry::new(Lazy::force(&DEFAULT_DECODERS)),
            decompressors: Registry::new(Lazy::force(&DEFAULT_DECOMPRESSORS)),
            methods: Registry::new(Lazy::force(&DEFAULT_METHODS)),
        }
    }
}

impl ContentParser {
    pub fn builder() -> ContentParserBuilder {
        ContentParserBuilder::new()
    }

    /// The global body size limit, if any.
    pub fn limit(&self) -> Option<u64> {
        self.inner.limit
    }

    /// The flags of `method`, `None` when the method is not allowed.
    pub fn flags(&self, method: &Method) -> Option<&[Flag]> {
        self.inner.methods.get(method).map(Vec::as_slice)
    }

    /// Negotiates a request.
    ///
    /// Fails without touching the body when the method is not allowed, a
    /// body is expected without `Content-Length`, the declared length is over
    /// the limit, or the charset or a content encoding is unsupported.
    /// Otherwise the returned request carries the descriptor and, when there
    /// is a body to read, the lazily started materialization.
    pub fn parse<B>(&self, request: Request<B>) -> Result<ParsedRequest, ContentError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();

        let Some(flags) = self.inner.methods.get(&parts.method) else {
            debug!(method = %parts.method, "reject request method");
            return Err(ContentError::method_not_allowed(parts.method));
        };
        let query = parts.uri.query().map(form::parse_query).transpose()?;
        let mut request = ParsedRequest::new(parts.method, parts.uri.path().to_owned(), query, flags.clone(), parts.headers);

        let form = request.has_flag(Flag::Form);
        if !form && !request.has_flag(Flag::Request) {
            return Ok(request);
        }
        let Some(mut content) = ContentDescriptor::from_headers(request.headers())? else {
            return Ok(request);
        };

        if request.method() == Method::GET {
            let query = request.query().filter(|_| content.mime() == Some(FORM_URLENCODED)).cloned();
            let Some(query) = query else {
                return Ok(request);
            };

            content.set_datatype(Datatype::Form);
            let entity = Entity::new(content.clone(), request.headers().clone(), Value::Form(query));
            request.set_content(content, Some(BodyReader::ready(entity)), false);
            return Ok(request);
        }

        let length = content.length().ok_or(ContentError::LengthRequired)?;
        if let Some(limit) = self.inner.limit {
            ensure!(length <= limit, ContentError::payload_too_large(limit, length));
        }
        let charset = content.resolve_charset()?;
        let decompressors = self.decompressors(content.encodings())?;

        if form && content.mime() == Some(mime::TEXT_PLAIN.essence_str()) {
            content.set_mime(FORM_PLAIN);
        }
        let datatype = content.mime().map(Datatype::of);
        if let Some(datatype) = datatype {
            content.set_datatype(datatype);
        }

        if length == 0 {
            request.set_content(content, None, false);
            return Ok(request);
        }

        let mut stages = Stages::new();
        stages.push(LimitFilter::exact(length));
        for decompressor in decompressors {
            stages.push(decompressor);
        }
        if let Some(limit) = self.inner.limit {
            stages.push(LimitFilter::ceiling(limit));
        }
        debug!(
            mime = content.mime(),
            length = length,
            stages = ?stages.names(),
            charset = charset.map(|encoding| encoding.name()),
            "negotiated request body"
        );

        let parser = self.clone();
        let mut descriptor = content.clone();
        let headers = request.headers().clone();
        let reader = BodyReader::new(BodyPipeline::new(transport(body), stages), charset, move |raw| {
            let body = parser.decode(&mut descriptor, &headers, raw)?;
            Ok(Entity::new(descriptor, headers, body))
        });

        request.set_content(content, Some(reader), true);
        Ok(request)
    }

    fn decompressors(&self, encodings: &[String]) -> Result<Vec<Box<dyn Transform>>, ContentError> {
        encodings
            .iter()
            .filter(|encoding| encoding.as_str() != IDENTITY)
            .map(|encoding| {
                let factory = self.inner.decompressors.get(encoding).ok_or_else(|| ContentError::unsupported_compression(encoding))?;
                factory()
            })
            .collect()
    }

    /// Decodes a materialized body according to its descriptor.
    ///
    /// The strategy of the mime type runs first, then every decoder whose
    /// pattern matches, in the order `type/*`, `*/subtype`, `type/subtype`,
    /// each one receiving the output of the previous one. Multipart parts
    /// come back through here.
    pub fn decode(&self, content: &mut ContentDescriptor, headers: &HeaderMap, raw: RawBody) -> Result<Value, ContentError> {
        self.decode_nested(content, headers, raw, 0)
    }

    pub(crate) fn decode_nested(
        &self,
        content: &mut ContentDescriptor,
        headers: &HeaderMap,
        raw: RawBody,
        depth: usize,
    ) -> Result<Value, ContentError> {
        let Some(mime) = content.mime().map(str::to_owned) else {
            return Ok(match raw {
                RawBody::Text(text) => Value::Text(text),
                RawBody::Binary(bytes) => Value::Binary(bytes),
            });
        };

        let datatype = Datatype::of(&mime);
        content.set_datatype(datatype);

        let mut value = match datatype {
            Datatype::Buffer => Value::Binary(raw.into_bytes()),
            Datatype::Multi => {
                let boundary = content.boundary().ok_or(ContentError::MissingBoundary)?.to_owned();
                Value::Multipart(multipart::decode(self, &boundary, &raw.into_bytes(), depth)?)
            }
            Datatype::Json => {
                let text = match raw {
                    RawBody::Text(text) => text,
                    RawBody::Binary(bytes) => match content.resolve_charset()? {
                        Some(encoding) => encoding.decode_with_bom_removal(&bytes).0.into_owned(),
                        None => std::str::from_utf8(&bytes).map(str::to_owned).map_err(ContentError::invalid_text)?,
                    },
                };
                Value::Json(serde_json::from_str(&text).map_err(ContentError::invalid_json)?)
            }
            Datatype::Text | Datatype::Form => Value::Text(into_text(content, raw)?),
        };

        for pattern in registry::patterns(&mime) {
            if let Some(decoder) = self.inner.decoders.get(&pattern) {
                trace!(pattern = %pattern, "apply content decoder");
                value = decoder.decode(content, headers, value)?;
            }
        }
        Ok(value)
    }
}

/// Text of a body, invalid sequences are replaced.
fn into_text(content: &mut ContentDescriptor, raw: RawBody) -> Result<String, ContentError> {
    match raw {
        RawBody::Text(text) => Ok(text),
        RawBody::Binary(bytes) => {
            let encoding = content.resolve_charset()?.unwrap_or(encoding_rs::UTF_8);
            Ok(encoding.decode_with_bom_removal(&bytes).0.into_owned())
        }
    }
}

/// Builder of a [`ContentParser`].
///
/// Every registration extends or overrides the built-in defaults for the
/// built parser only.
pub struct ContentParserBuilder {
    limit: Option<u64>,
    decoders: Vec<(String, SharedDecoder)>,
    decompressors: Vec<(String, DecompressorFactory)>,
    methods: Vec<(Method, Vec<Flag>)>,
}

impl std::fmt::Debug for ContentParserBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentParserBuilder")
            .field("limit", &self.limit)
            .field("decoders", &self.decoders.iter().map(|(pattern, _)| pattern).collect::<Vec<_>>())
            .field("decompressors", &self.decompressors.iter().map(|(token, _)| token).collect::<Vec<_>>())
            .field("methods", &self.methods)
            .finish()
    }
}

impl ContentParserBuilder {
    fn new() -> Self {
        Self { limit: None, decoders: Vec::new(), decompressors: Vec::new(), methods: Vec::new() }
    }

    /// Caps both the declared and the decoded size of every body.
    ///
    /// A limit of 0 leaves bodies unlimited.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit).filter(|limit| *limit > 0);
        self
    }

    /// Registers a decoder under `type/subtype`, `type/*` or `*/subtype`.
    pub fn decoder<D>(mut self, pattern: impl Into<String>, decoder: D) -> Self
    where
        D: ContentDecoder + 'static,
    {
        self.decoders.push((pattern.into(), Arc::new(decoder)));
        self
    }

    /// Registers a decompression stage factory for a `Content-Encoding` token.
    pub fn decompressor<F>(mut self, encoding: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Transform>, ContentError> + Send + Sync + 'static,
    {
        self.decompressors.push((encoding.into().trim().to_ascii_lowercase(), Arc::new(factory)));
        self
    }

    /// Allows `method` with the given flags.
    pub fn method(mut self, method: Method, flags: impl Into<Vec<Flag>>) -> Self {
        self.methods.push((method, flags.into()));
        self
    }

    /// Builds the parser, failing on an invalid decoder pattern.
    pub fn build(self) -> Result<ContentParser, ContentError> {
        let mut inner = Inner { limit: self.limit, ..Inner::default() };

        for (pattern, decoder) in self.decoders {
            inner.decoders.insert(registry::pattern(&pattern)?, decoder);
        }
        for (encoding, factory) in self.decompressors {
            inner.decompressors.insert(encoding, factory);
        }
        for (method, flags) in self.methods {
            inner.methods.insert(method, flags);
        }

        Ok(ContentParser { inner: Arc::new(inner) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use mockall::{Sequence, mock};

    mock! {
        pub Decoder {}

        impl ContentDecoder for Decoder {
            fn decode(&self, content: &mut ContentDescriptor, headers: &HeaderMap, value: Value) -> Result<Value, ContentError>;
        }
    }

    fn appending(decoder: &mut MockDecoder, sequence: &mut Sequence, suffix: &'static str) {
        decoder.expect_decode().times(1).in_sequence(sequence).returning(move |_, _, value| match value {
            Value::Text(text) => Ok(Value::Text(text + suffix)),
            other => Ok(other),
        });
    }

    fn text_part(mime: &str) -> ContentDescriptor {
        ContentDescriptor::for_part(Some(mime), None).unwrap()
    }

    #[test]
    fn decoders_chain_from_general_to_exact() {
        let mut sequence = Sequence::new();
        let (mut by_type, mut by_subtype, mut exact) = (MockDecoder::new(), MockDecoder::new(), MockDecoder::new());
        appending(&mut by_type, &mut sequence, "-type");
        appending(&mut by_subtype, &mut sequence, "-subtype");
        appending(&mut exact, &mut sequence, "-exact");

        // registration order does not matter
        let parser = ContentParser::builder()
            .decoder("text/csv", exact)
            .decoder("*/csv", by_subtype)
            .decoder("text/*", by_type)
            .build()
            .unwrap();

        let mut content = text_part("text/csv");
        let value = parser.decode(&mut content, &HeaderMap::new(), RawBody::from("a,b")).unwrap();
        assert_eq!(value, Value::from("a,b-type-subtype-exact"));
        assert_eq!(content.datatype(), Some(Datatype::Text));
    }

    #[test]
    fn unmatched_decoders_are_skipped() {
        let mut other = MockDecoder::new();
        other.expect_decode().never();

        let parser = ContentParser::builder().decoder("image/*", other).build().unwrap();
        let value = parser.decode(&mut text_part("text/plain"), &HeaderMap::new(), RawBody::from("x")).unwrap();
        assert_eq!(value, Value::from("x"));
    }

    #[test]
    fn decoder_error_stops_the_chain() {
        let mut failing = MockDecoder::new();
        failing.expect_decode().times(1).returning(|_, _, _| Err(ContentError::decode("nope")));
        let mut exact = MockDecoder::new();
        exact.expect_decode().never();

        let parser = ContentParser::builder().decoder("text/*", failing).decoder("text/plain", exact).build().unwrap();
        let err = parser.decode(&mut text_part("text/plain"), &HeaderMap::new(), RawBody::from("x")).unwrap_err();
        assert_eq!(err, ContentError::decode("nope"));
    }

    #[test]
    fn invalid_pattern_fails_build() {
        let err = ContentParser::builder().decoder("*/*", fn_decoder(|_, _, value| Ok(value))).build().unwrap_err();
        assert!(matches!(err, ContentError::InvalidHeader { .. }));
    }

    #[test]
    fn registries_are_per_parser() {
        let custom = ContentParser::builder().method(Method::TRACE, [Flag::Safe]).build().unwrap();
        assert_eq!(custom.flags(&Method::TRACE), Some(&[Flag::Safe][..]));
        assert_eq!(ContentParser::default().flags(&Method::TRACE), None);
        assert_eq!(custom.flags(&Method::PUT), Some(&[Flag::Request, Flag::Idempotent][..]));
    }

    #[test]
    fn strategies() {
        let parser = ContentParser::default();
        let headers = HeaderMap::new();

        let value = parser.decode(&mut text_part("application/json"), &headers, RawBody::from(r#"{"a":[1]}"#)).unwrap();
        assert_eq!(value, Value::Json(serde_json::json!({"a": [1]})));

        let err = parser.decode(&mut text_part("application/json"), &headers, RawBody::from("{")).unwrap_err();
        assert!(matches!(err, ContentError::InvalidJson { .. }));

        let value = parser.decode(&mut text_part("image/png"), &headers, RawBody::from("png")).unwrap();
        assert_eq!(value, Value::Binary(Bytes::from_static(b"png")));

        let value = parser.decode(&mut text_part("text/plain"), &headers, RawBody::from(Bytes::from_static(b"caf\xe9"))).unwrap();
        assert_eq!(value, Value::from("caf\u{fffd}"));

        let err = parser.decode(&mut text_part("application/json"), &headers, RawBody::from(Bytes::from_static(b"\"\xff\""))).unwrap_err();
        assert!(matches!(err, ContentError::InvalidText { .. }));

        let err = parser.decode(&mut text_part("multipart/mixed"), &headers, RawBody::from("")).unwrap_err();
        assert_eq!(err, ContentError::MissingBoundary);
    }

    #[test]
    fn part_charset_decodes_bytes() {
        let parser = ContentParser::default();
        let mut content = text_part("text/plain; charset=iso-8859-1");
        let value = parser.decode(&mut content, &HeaderMap::new(), RawBody::from(Bytes::from_static(b"m\xe9langer"))).unwrap();
        assert_eq!(value, Value::from("mélanger"));
        assert_eq!(content.decoder(), Some(encoding_rs::WINDOWS_1252));
    }

    #[tokio::test]
    async fn identity_is_skipped() {
        let request = Request::put("/")
            .header("content-type", "text/plain")
            .header("content-encoding", "identity")
            .header("content-length", "2")
            .body(Full::new(Bytes::from_static(b"ok")))
            .unwrap();

        let parsed = ContentParser::default().parse(request).unwrap();
        assert_eq!(parsed.read().unwrap().await.unwrap().body, Value::from("ok"));
    }

    /// A multipart body wrapping a text part in `levels` multiparts.
    fn nested(levels: usize) -> (String, Bytes) {
        let mut content_type = "text/plain".to_owned();
        let mut body = "leaf".to_owned();
        for level in 0..levels {
            let boundary = format!("b{level}");
            body = format!("--{boundary}\r\nContent-Type: {content_type}\r\n\r\n{body}\r\n--{boundary}--\r\n");
            content_type = format!("multipart/mixed; boundary={boundary}");
        }
        (content_type, Bytes::from(body))
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let parser = ContentParser::default();
        let headers = HeaderMap::new();

        let (content_type, body) = nested(multipart::MAX_DEPTH);
        let mut value = parser.decode(&mut text_part(&content_type), &headers, RawBody::from(body)).unwrap();
        for _ in 1..multipart::MAX_DEPTH {
            value = value.as_parts().unwrap()[0].body.clone();
        }
        assert_eq!(value.as_parts().unwrap()[0].body, Value::from("leaf"));

        let (content_type, body) = nested(multipart::MAX_DEPTH + 1);
        let err = parser.decode(&mut text_part(&content_type), &headers, RawBody::from(body)).unwrap_err();
        assert_eq!(err, ContentError::decode("multipart nesting too deep"));

        let (content_type, body) = nested(2000);
        let err = parser.decode(&mut text_part(&content_type), &headers, RawBody::from(body)).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_text_part_does_not_fail_the_form() {
        let body = Bytes::from_static(
            b"--x\r\nContent-Disposition: form-data; name=\"note\"; filename=\"n.txt\"\r\nContent-Type: text/plain\r\n\r\nm\xe9l\r\n--x--\r\n",
        );
        let parser = ContentParser::default();
        let value = parser.decode(&mut text_part("multipart/form-data; boundary=x"), &HeaderMap::new(), RawBody::from(body)).unwrap();

        let note = value.as_form().unwrap()["note"].as_file().unwrap();
        assert_eq!(note.body, Value::from("m\u{fffd}l"));
    }

    #[test]
    fn zero_limit_is_unlimited() {
        assert_eq!(ContentParser::builder().limit(0).build().unwrap().limit(), None);
        assert_eq!(ContentParser::builder().limit(10).build().unwrap().limit(), Some(10));
    }
}
