//! Splitting of `multipart/*` bodies into parts.
//!
//! The body is cut into CRLF terminated lines. `--boundary` starts a part,
//! `--boundary--` ends the body. Each part is a header block, an empty line,
//! and the body lines rejoined with CRLF. Lines before the first boundary
//! and after the last are ignored.

use crate::ContentError;
use crate::descriptor::ContentDescriptor;
use crate::parser::ContentParser;
use crate::value::{Entity, Value};
use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::ops::Range;
use tracing::{trace, warn};

const CRLF: &[u8] = b"\r\n";

/// Multiparts nested deeper than this are rejected.
pub(crate) const MAX_DEPTH: usize = 16;

/// Cuts a buffer into CRLF terminated lines, yielding each line with its
/// offset. The terminator is not part of the line, the trailing bytes after
/// the last CRLF make up the last line.
struct CrlfLines<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CrlfLines<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for CrlfLines<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buf.get(self.pos..).filter(|rest| !rest.is_empty())?;
        let start = self.pos;
        match rest.windows(CRLF.len()).position(|window| window == CRLF) {
            Some(end) => {
                self.pos += end + CRLF.len();
                Some((start, &rest[..end]))
            }
            None => {
                self.pos = self.buf.len();
                Some((start, rest))
            }
        }
    }
}

/// A part as it appears on the wire.
#[derive(Debug, Default)]
pub(crate) struct RawPart {
    /// Header name and value lines, a folded header keeps one entry per line.
    headers: Vec<(String, Vec<String>)>,
    /// Where the body lines sit in the multipart body.
    body: Option<Range<usize>>,
}

impl RawPart {
    fn header(&self, name: &str) -> Option<String> {
        self.headers.iter().find(|(key, _)| key == name).map(|(_, lines)| unfold(lines))
    }

    /// The part headers, names lowercased and folded values joined.
    fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, lines) in &self.headers {
            let value = unfold(lines);
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_bytes(value.as_bytes())) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => warn!(name = %name, "skip invalid multipart header"),
            }
        }
        map
    }

    /// The body, sharing the multipart buffer.
    fn body(&self, multipart: &Bytes) -> Bytes {
        self.body.clone().map_or_else(Bytes::new, |range| multipart.slice(range))
    }
}

enum State {
    /// Before the first boundary.
    Preamble,
    Headers(RawPart),
    Body(RawPart),
}

/// Splits `body` into raw parts.
///
/// A body missing its closing boundary yields the parts finished so far.
pub(crate) fn split(boundary: &str, body: &[u8]) -> Vec<RawPart> {
    let start = format!("--{boundary}");
    let end = format!("--{boundary}--");

    let mut parts = Vec::new();
    let mut state = State::Preamble;

    for (offset, line) in CrlfLines::new(body) {
        let at_start = line == start.as_bytes();
        let at_end = line == end.as_bytes();

        if at_start || at_end {
            if let State::Body(part) = std::mem::replace(&mut state, State::Preamble) {
                parts.push(part);
            }
            if at_end {
                return parts;
            }
            state = State::Headers(RawPart::default());
            continue;
        }

        match &mut state {
            State::Preamble => (),
            State::Headers(part) if line.is_empty() => {
                let part = std::mem::take(part);
                state = State::Body(part);
            }
            State::Headers(part) => header_line(part, line),
            // body lines are contiguous, only the end moves
            State::Body(part) => {
                let first = part.body.as_ref().map_or(offset, |range| range.start);
                part.body = Some(first..offset + line.len());
            }
        }
    }

    trace!(parts = parts.len(), "multipart body ended without closing boundary");
    parts
}

fn header_line(part: &mut RawPart, line: &[u8]) {
    let line = String::from_utf8_lossy(line);

    if let Some((name, value)) = line.split_once(':') {
        if !name.is_empty() && !name.contains(char::is_whitespace) {
            part.headers.push((name.to_ascii_lowercase(), vec![value.trim_start().to_owned()]));
            return;
        }
    }

    // continuation of the previous header
    match part.headers.last_mut() {
        Some((_, lines)) => lines.push(line.into_owned()),
        None => trace!(line = %line, "skip multipart header continuation without header"),
    }
}

/// Joins folded header lines, the whitespace around each fold collapses
/// into a single space.
fn unfold(lines: &[String]) -> String {
    let last = lines.len().saturating_sub(1);
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line = if i > 0 { line.trim_start() } else { line };
            if i < last { line.trim_end() } else { line }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a multipart body and decodes every part.
///
/// Parts with a `Content-Type` are decoded like a body of that type, which
/// includes nested multiparts up to [`MAX_DEPTH`] levels. Parts without one
/// keep their raw body: text when it is valid UTF-8, bytes otherwise.
pub(crate) fn decode(parser: &ContentParser, boundary: &str, body: &Bytes, depth: usize) -> Result<Vec<Entity>, ContentError> {
    if depth >= MAX_DEPTH {
        warn!(depth = depth, "reject nested multipart body");
        return Err(ContentError::decode("multipart nesting too deep"));
    }

    split(boundary, body)
        .into_iter()
        .map(|part| {
            let mut content =
                ContentDescriptor::for_part(part.header(CONTENT_TYPE.as_str()).as_deref(), part.header(CONTENT_DISPOSITION.as_str()).as_deref())?;
            let headers = part.header_map();
            let bytes = part.body(body);

            let value = if content.mime().is_some() {
                parser.decode_nested(&mut content, &headers, bytes.into(), depth + 1)?
            } else {
                let text = std::str::from_utf8(&bytes).ok().map(str::to_owned);
                text.map_or(Value::Binary(bytes), Value::Text)
            };
            Ok(Entity::new(content, headers, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn crlf(text: &str) -> Bytes {
        Bytes::from(text.replace('\n', "\r\n"))
    }

    #[test]
    fn lines_keep_binary_content() {
        let buf = b"a\r\n\x89PNG\nb\r\n\r\nrest";
        let lines: Vec<_> = CrlfLines::new(buf).collect();
        assert_eq!(lines, vec![(0, &b"a"[..]), (3, &b"\x89PNG\nb"[..]), (11, &b""[..]), (13, &b"rest"[..])]);

        assert_eq!(CrlfLines::new(b"a\r\n").count(), 1);
        assert_eq!(CrlfLines::new(b"").count(), 0);
    }

    #[test]
    fn split_parts() {
        let body = crlf(indoc! {r#"
            preamble
            --XyZ
            Content-Disposition: form-data; name="a"

            first
            line
            --XyZ
            content-disposition: form-data;
              name="b"
            Content-Type: text/plain

            second
            --XyZ--
            epilogue
        "#});

        let parts = split("XyZ", &body);
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].body(&body), &b"first\r\nline"[..]);
        assert_eq!(parts[0].header("content-disposition").as_deref(), Some(r#"form-data; name="a""#));

        let headers = parts[1].header_map();
        assert_eq!(headers[CONTENT_DISPOSITION], r#"form-data; name="b""#);
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert_eq!(parts[1].body(&body), &b"second"[..]);
    }

    #[test]
    fn empty_and_repeated() {
        let body = crlf("--b\nX-Tag: one\nx-tag: two\n\n\n--b--\n");
        let parts = split("b", &body);

        assert_eq!(parts.len(), 1);
        assert!(parts[0].body(&body).is_empty());
        let tags: Vec<_> = parts[0].header_map().get_all("x-tag").iter().map(|v| v.to_str().unwrap().to_owned()).collect();
        assert_eq!(tags, vec!["one", "two"]);
    }

    #[test]
    fn unterminated_part_is_dropped() {
        let body = crlf("--b\n\nkept\n--b\n\nlost");
        let parts = split("b", &body);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body(&body), &b"kept"[..]);
    }

    #[test]
    fn boundary_inside_a_line_is_content() {
        let body = crlf("--b\n\nnot --b here\n--b--");
        let parts = split("b", &body);
        assert_eq!(parts[0].body(&body), &b"not --b here"[..]);
    }
}
