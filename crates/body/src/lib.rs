//! Streaming request body materialization with size limits and fan-out.
//!
//! This crate turns a raw transport byte stream (any [`http_body::Body`]) into
//! one fully materialized value, while:
//!
//! - checking the declared `Content-Length` before decompression
//! - capping the decoded size after decompression
//! - decoding a character set incrementally
//! - handing a live, ordered copy of every chunk to any number of consumers
//!
//! # Architecture
//!
//! ```text
//! transport --> exact limit --> decompressor* --> ceiling limit --> materializer --> decode
//!                                                                        |
//!                                                                        +--> BodyPipe*
//! ```
//!
//! - [`stage`]: the [`Transform`](stage::Transform) trait, the
//!   [`LimitFilter`](stage::LimitFilter) and the [`Decompressor`](stage::Decompressor)s
//! - [`BodyPipeline`]: the transport followed by its stages
//! - [`BodyReader`]: drives the pipeline once and memoizes the outcome
//! - [`BodyPipe`]: a pass-through consumer attached at any point in time
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use micro_body::stage::{LimitFilter, Stages};
//! use micro_body::{BodyPipeline, BodyReader, transport};
//!
//! # async fn run() -> Result<(), micro_body::ContentError> {
//! let mut stages = Stages::new();
//! stages.push(LimitFilter::exact(5));
//!
//! let pipeline = BodyPipeline::new(transport(Full::new(Bytes::from_static(b"hello"))), stages);
//! let reader = BodyReader::new(pipeline, None, |raw| Ok(raw.into_bytes()));
//!
//! let body = reader.read().await?;
//! assert_eq!(&body[..], b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every failure is a [`ContentError`]. The first error of a body wins: it
//! rejects the memoized outcome, terminates every consumer, and the rest of
//! the transport is drained in the background.

mod chunk;
mod error;
mod pipe;
mod pipeline;
mod reader;

pub mod stage;

pub use chunk::Chunk;
pub use chunk::RawBody;
pub use error::ContentError;
pub use pipe::BodyPipe;
pub use pipeline::BodyPipeline;
pub use pipeline::BoxError;
pub use pipeline::Transport;
pub use pipeline::skip_body;
pub use pipeline::transport;
pub use reader::BodyReader;
pub use reader::ReadBody;
