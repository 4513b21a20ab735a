//! Request body negotiation and decoding.
//!
//! [`ContentParser::parse`] takes a request head and its transport body and
//! decides, before reading a single byte, whether and how the body is read:
//!
//! - the method must be allowed, see [`Flag`]
//! - a body needs a `Content-Length`, within the configured limit
//! - the charset and every `Content-Encoding` must be supported
//!
//! The resulting [`ParsedRequest`] reads the body on demand through the
//! pipeline of [`micro_body`] and decodes it by mime type:
//!
//! | mime                                      | value                       |
//! |-------------------------------------------|-----------------------------|
//! | `*/json`, `*/*+json`                      | [`Value::Json`]             |
//! | `text/*`, `message/*`, `*/*+xml`          | [`Value::Text`]             |
//! | `multipart/*`                             | [`Value::Multipart`]        |
//! | `multipart/form-data`, HTML5 `text/plain` | [`Value::Form`]             |
//! | anything else                             | [`Value::Binary`]           |
//!
//! Custom [`ContentDecoder`]s refine the result per mime pattern.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use futures::TryStreamExt;
//! use http::Request;
//! use http_body_util::Full;
//! use micro_content::ContentParser;
//!
//! # async fn run() -> Result<(), micro_content::ContentError> {
//! let request = Request::post("/form")
//!     .header("content-type", "text/plain")
//!     .header("content-length", "21")
//!     .body(Full::new(Bytes::from_static(b"name=AJ\r\nemail=a@b.co")))
//!     .unwrap();
//!
//! let parsed = ContentParser::default().parse(request)?;
//!
//! // a copy of the raw chunks, next to the decoded body
//! let copy = parsed.pipe().unwrap();
//! let entity = parsed.read().unwrap().await?;
//! let chunks: Vec<_> = copy.try_collect().await?;
//!
//! let form = entity.body.as_form().unwrap();
//! assert_eq!(form["name"].as_text(), Some("AJ"));
//! # Ok(())
//! # }
//! ```

mod descriptor;
mod method;
mod multipart;
mod parser;
mod registry;
mod request;
mod utils;
mod value;

pub mod form;

pub use descriptor::ContentDescriptor;
pub use descriptor::Datatype;
pub use method::Flag;
pub use parser::ContentParser;
pub use parser::ContentParserBuilder;
pub use parser::FORM_DATA;
pub use parser::FORM_PLAIN;
pub use parser::FORM_URLENCODED;
pub use registry::ContentDecoder;
pub use registry::DecompressorFactory;
pub use registry::FnDecoder;
pub use registry::Registry;
pub use registry::SharedDecoder;
pub use registry::fn_decoder;
pub use request::ParsedRequest;
pub use request::request_from_pseudo_headers;
pub use value::Entity;
pub use value::FormMap;
pub use value::FormNode;
pub use value::Value;

pub use micro_body::BodyPipe;
pub use micro_body::Chunk;
pub use micro_body::ContentError;
pub use micro_body::RawBody;
pub use micro_body::ReadBody;
