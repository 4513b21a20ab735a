use crate::ContentError;
use crate::descriptor::ContentDescriptor;
use crate::method::Flag;
use crate::value::{Entity, FormMap};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use micro_body::{BodyPipe, BodyReader, ReadBody};

/// The outcome of negotiating a request.
///
/// Everything but the body is known up front. The body, when there is one,
/// is read lazily: by the first [`read`](Self::read) or by polling the first
/// [`pipe`](Self::pipe).
#[derive(Debug)]
pub struct ParsedRequest {
    method: Method,
    path: String,
    query: Option<FormMap>,
    flags: Vec<Flag>,
    headers: HeaderMap,
    content: Option<ContentDescriptor>,
    body: Option<BodyReader<Entity>>,
    streaming: bool,
}

impl ParsedRequest {
    pub(crate) fn new(method: Method, path: String, query: Option<FormMap>, flags: Vec<Flag>, headers: HeaderMap) -> Self {
        Self { method, path, query, flags, headers, content: None, body: None, streaming: false }
    }

    pub(crate) fn set_content(&mut self, content: ContentDescriptor, body: Option<BodyReader<Entity>>, streaming: bool) {
        self.content = Some(content);
        self.body = body;
        self.streaming = streaming;
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The parsed query string, if the request had one.
    pub fn query(&self) -> Option<&FormMap> {
        self.query.as_ref()
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body descriptor.
    ///
    /// Until the body is read its datatype is the strategy the body will be
    /// decoded with. Once read, this is the descriptor of the decoded
    /// [`Entity`], with the datatype the decoders settled on.
    pub fn content(&self) -> Option<&ContentDescriptor> {
        self.body.as_ref().and_then(BodyReader::value).map(|entity| &entity.content).or(self.content.as_ref())
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Materializes and decodes the body. Every call resolves to the same
    /// outcome.
    pub fn read(&self) -> Option<ReadBody<Entity>> {
        self.body.as_ref().map(BodyReader::read)
    }

    /// Attaches a pass-through consumer of the body bytes.
    ///
    /// `None` when nothing is streamed, e.g. a `GET` form decoded from the
    /// query.
    pub fn pipe(&self) -> Option<BodyPipe> {
        self.body.as_ref().filter(|_| self.streaming).map(BodyReader::pipe)
    }

    pub fn body_reader(&self) -> Option<&BodyReader<Entity>> {
        self.body.as_ref()
    }
}

/// Builds a request from HTTP/2 style header pairs.
///
/// `:method` and `:path` are required, other pseudo headers are ignored and
/// every remaining pair becomes a header.
pub fn request_from_pseudo_headers<I, K, V, B>(pairs: I, body: B) -> Result<Request<B>, ContentError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut method = None;
    let mut path = None;
    let mut headers = HeaderMap::new();

    for (name, value) in pairs {
        let (name, value) = (name.as_ref(), value.as_ref());
        match name {
            ":method" => method = Some(Method::from_bytes(value.as_bytes()).map_err(ContentError::invalid_header)?),
            ":path" => path = Some(value.to_owned()),
            _ if name.starts_with(':') => (),
            _ => {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(ContentError::invalid_header)?;
                let value = HeaderValue::from_str(value).map_err(ContentError::invalid_header)?;
                headers.append(name, value);
            }
        }
    }

    let method = method.ok_or_else(|| ContentError::invalid_header("missing :method"))?;
    let path = path.ok_or_else(|| ContentError::invalid_header("missing :path"))?;

    let mut request = Request::builder().method(method).uri(path).body(body).map_err(ContentError::invalid_header)?;
    *request.headers_mut() = headers;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_headers() {
        let request = request_from_pseudo_headers(
            [(":method", "POST"), (":path", "/form?a=1"), (":authority", "example.com"), ("content-type", "text/plain")],
            (),
        )
        .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/form");
        assert_eq!(request.uri().query(), Some("a=1"));
        assert_eq!(request.headers()["content-type"], "text/plain");
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn missing_pseudo_headers() {
        let err = request_from_pseudo_headers([(":path", "/")], ()).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);

        let err = request_from_pseudo_headers([(":method", "GET"), (":path", "not a path")], ()).unwrap_err();
        assert!(matches!(err, ContentError::InvalidHeader { .. }));
    }
}
