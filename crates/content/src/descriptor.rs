//! Content descriptors, parsed from the representation headers of a request
//! or of a multipart part.

use crate::ContentError;
use encoding_rs::Encoding;
use http::HeaderMap;
use http::header::{CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE};
use mime::Mime;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// The decoding strategy of a body, derived from its mime type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Json,
    Text,
    Buffer,
    Multi,
    /// Set by the form decoders once a body was turned into a form tree.
    Form,
}

impl Datatype {
    /// The built-in strategy for a lowercased `type/subtype`.
    pub fn of(mime: &str) -> Self {
        let (kind, sub) = mime.split_once('/').unwrap_or((mime, ""));
        match kind {
            "multipart" => Datatype::Multi,
            _ if sub == "json" || sub.ends_with("+json") => Datatype::Json,
            "message" | "text" => Datatype::Text,
            _ if sub.ends_with("+xml") => Datatype::Text,
            // audio, font, image, video and anything unknown
            _ => Datatype::Buffer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Datatype::Json => "json",
            Datatype::Text => "text",
            Datatype::Buffer => "buffer",
            Datatype::Multi => "multi",
            Datatype::Form => "form",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parsed representation metadata of a body.
///
/// Decoders may only change the [`datatype`](Self::datatype) through
/// [`set_datatype`](Self::set_datatype); everything else is fixed once the
/// headers are parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    charset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    boundary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    encodings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    datatype: Option<Datatype>,
    #[serde(skip)]
    decoder: Option<&'static Encoding>,
}

impl ContentDescriptor {
    /// Parses the descriptor of a request.
    ///
    /// Returns `None` when there is no `Content-Type`, a request without one
    /// carries no decodable body.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, ContentError> {
        let Some(content_type) = headers.get(CONTENT_TYPE) else {
            return Ok(None);
        };

        let mut content = Self::default();
        content.set_content_type(&header_str(content_type))?;

        if let Some(length) = headers.get(CONTENT_LENGTH) {
            let length = header_str(length);
            let length = length.trim().parse::<u64>().map_err(|e| ContentError::invalid_content_length(format!("{length}: {e}")))?;
            content.length = Some(length);
        }

        content.encodings = headers.get_all(CONTENT_ENCODING).iter().flat_map(|v| tokens(&header_str(v))).collect();
        content.languages = headers.get_all(CONTENT_LANGUAGE).iter().flat_map(|v| tokens(&header_str(v))).collect();

        if let Some(disposition) = headers.get(CONTENT_DISPOSITION) {
            content.set_disposition(&header_str(disposition));
        }

        Ok(Some(content))
    }

    /// Parses the descriptor of a multipart part from its raw header values.
    ///
    /// Unlike requests, a part without `Content-Type` still gets a descriptor.
    pub fn for_part(content_type: Option<&str>, disposition: Option<&str>) -> Result<Self, ContentError> {
        let mut content = Self::default();
        if let Some(content_type) = content_type {
            content.set_content_type(content_type)?;
        }
        if let Some(disposition) = disposition {
            content.set_disposition(disposition);
        }
        Ok(content)
    }

    fn set_content_type(&mut self, value: &str) -> Result<(), ContentError> {
        let parsed: Mime = value.trim().parse().map_err(|e| ContentError::invalid_content_type(format!("{value}: {e}")))?;

        self.mime = Some(parsed.essence_str().to_ascii_lowercase());
        for (name, value) in parsed.params() {
            let name = name.as_str().to_ascii_lowercase();
            let value = value.as_str().trim_matches('"');
            match name.as_str() {
                "charset" => self.charset = Some(value.to_ascii_lowercase()),
                "boundary" => self.boundary = Some(value.to_owned()),
                _ => self.attributes.push((name, value.to_owned())),
            }
        }
        Ok(())
    }

    fn set_disposition(&mut self, value: &str) {
        let mut params = split_params(value);
        let Some(disposition) = params.next() else {
            return;
        };
        self.disposition = Some(disposition.trim().to_ascii_lowercase());

        for param in params {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            let value = unquote(value.trim());
            match name.as_str() {
                "name" => self.name = Some(value),
                "filename" => self.filename = Some(value),
                _ => self.attributes.push((name, value)),
            }
        }
    }

    /// The lowercased `type/subtype`, absent for parts without `Content-Type`.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Replaces the mime type, used when negotiation retags a body.
    pub(crate) fn set_mime(&mut self, mime: &str) {
        self.mime = Some(mime.to_owned());
    }

    /// The lowercased `charset` parameter.
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// The declared `Content-Length`.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// The `Content-Encoding` tokens in header order.
    pub fn encodings(&self) -> &[String] {
        &self.encodings
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// The `Content-Disposition` type, e.g. `form-data`.
    pub fn disposition(&self) -> Option<&str> {
        self.disposition.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Any other parameter of `Content-Type` or `Content-Disposition`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn datatype(&self) -> Option<Datatype> {
        self.datatype
    }

    pub fn set_datatype(&mut self, datatype: Datatype) {
        self.datatype = Some(datatype);
    }

    /// The character decoder chosen during negotiation, `None` for UTF-8.
    pub fn decoder(&self) -> Option<&'static Encoding> {
        self.decoder
    }

    /// Resolves the charset parameter to a character decoder.
    ///
    /// UTF-8 needs no decoder. An unknown label is an error.
    pub(crate) fn resolve_charset(&mut self) -> Result<Option<&'static Encoding>, ContentError> {
        self.decoder = match self.charset.as_deref() {
            None => None,
            Some(charset) => {
                let encoding = Encoding::for_label_no_replacement(charset.as_bytes())
                    .ok_or_else(|| ContentError::unsupported_charset(charset))?;
                (encoding != encoding_rs::UTF_8).then_some(encoding)
            }
        };
        Ok(self.decoder)
    }
}

fn header_str(value: &http::HeaderValue) -> Cow<'_, str> {
    String::from_utf8_lossy(value.as_bytes())
}

/// Splits a comma separated list into lowercased tokens.
fn tokens(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|token| !token.is_empty()).map(str::to_ascii_lowercase).collect()
}

/// Splits on `;` outside of quoted strings.
fn split_params(value: &str) -> impl Iterator<Item = &str> {
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    let mut parts = Vec::new();

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    parts.push(&value[start..]);
    parts.into_iter().filter(|part| !part.trim().is_empty())
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => out.extend(chars.next()),
                    c => out.push(c),
                }
            }
            out
        }
        None => value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        pairs.iter().map(|(k, v)| (HeaderName::from_static(k), HeaderValue::from_static(v))).collect()
    }

    #[test]
    fn parse_request_headers() {
        let content = ContentDescriptor::from_headers(&headers(&[
            ("content-type", "Text/Plain; Charset=\"UTF-8\"; format=flowed"),
            ("content-length", "10"),
            ("content-encoding", "gzip, br"),
            ("content-language", "en, de-DE"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(content.mime(), Some("text/plain"));
        assert_eq!(content.charset(), Some("utf-8"));
        assert_eq!(content.length(), Some(10));
        assert_eq!(content.encodings(), ["gzip", "br"]);
        assert_eq!(content.languages(), ["en", "de-de"]);
        assert_eq!(content.attribute("format"), Some("flowed"));
        assert_eq!(content.datatype(), None);
    }

    #[test]
    fn no_content_type() {
        assert!(ContentDescriptor::from_headers(&headers(&[("content-length", "3")])).unwrap().is_none());
    }

    #[test]
    fn invalid_headers() {
        let err = ContentDescriptor::from_headers(&headers(&[("content-type", "plain")])).unwrap_err();
        assert!(matches!(err, ContentError::InvalidContentType { .. }));

        let err =
            ContentDescriptor::from_headers(&headers(&[("content-type", "text/plain"), ("content-length", "ten")])).unwrap_err();
        assert!(matches!(err, ContentError::InvalidContentLength { .. }));
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn boundary_keeps_case() {
        let content =
            ContentDescriptor::from_headers(&headers(&[("content-type", "multipart/form-data; boundary=AaB03x")])).unwrap().unwrap();
        assert_eq!(content.boundary(), Some("AaB03x"));
    }

    #[test]
    fn part_disposition() {
        let content =
            ContentDescriptor::for_part(Some("image/png"), Some(r#"form-data; name="avatar"; filename="smiley; \"cool\".png""#))
                .unwrap();

        assert_eq!(content.mime(), Some("image/png"));
        assert_eq!(content.disposition(), Some("form-data"));
        assert_eq!(content.name(), Some("avatar"));
        assert_eq!(content.filename(), Some(r#"smiley; "cool".png"#));

        let bare = ContentDescriptor::for_part(None, Some("form-data; name=email")).unwrap();
        assert_eq!(bare.mime(), None);
        assert_eq!(bare.name(), Some("email"));
    }

    #[test]
    fn datatype_strategy() {
        assert_eq!(Datatype::of("multipart/form-data"), Datatype::Multi);
        assert_eq!(Datatype::of("application/json"), Datatype::Json);
        assert_eq!(Datatype::of("application/ld+json"), Datatype::Json);
        assert_eq!(Datatype::of("text/plain"), Datatype::Text);
        assert_eq!(Datatype::of("message/rfc822"), Datatype::Text);
        assert_eq!(Datatype::of("image/svg+xml"), Datatype::Text);
        assert_eq!(Datatype::of("image/png"), Datatype::Buffer);
        assert_eq!(Datatype::of("application/octet-stream"), Datatype::Buffer);
    }

    #[test]
    fn charset_resolution() {
        let mut content = ContentDescriptor::for_part(Some("text/plain; charset=utf8"), None).unwrap();
        assert_eq!(content.resolve_charset().unwrap(), None);

        let mut content = ContentDescriptor::for_part(Some("text/plain; charset=ISO-8859-1"), None).unwrap();
        assert_eq!(content.resolve_charset().unwrap(), Some(encoding_rs::WINDOWS_1252));

        let mut content = ContentDescriptor::for_part(Some("text/plain; charset=x-klingon"), None).unwrap();
        assert_eq!(content.resolve_charset().unwrap_err(), ContentError::unsupported_charset("x-klingon"));
    }
}
