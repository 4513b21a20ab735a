//! Byte counting filter enforcing a size constraint on a body.
//!
//! The same filter type is placed twice in a body pipeline:
//!
//! - before decompression in [`LimitMode::Exact`] mode, where the transport
//!   must deliver exactly the declared `Content-Length`
//! - after decompression in [`LimitMode::Ceiling`] mode, where the decoded
//!   size must stay below the configured limit whatever the declared length
//!   was
//!
//! Crossing the limit fails on the chunk that crosses it, not at the end.

use crate::ContentError;
use crate::stage::Transform;
use bytes::Bytes;
use tracing::warn;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LimitMode {
    /// The final count must equal the limit.
    Exact,
    /// The count must never exceed the limit.
    Ceiling,
}

/// What the filter observed when it failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Violation {
    /// More bytes than the limit were received.
    Exceeded { limit: u64, received: u64 },
    /// Input ended before an exact limit was reached.
    Short { expected: u64, received: u64 },
}

fn default_error(violation: Violation) -> ContentError {
    match violation {
        Violation::Exceeded { limit, received } => ContentError::payload_too_large(limit, received),
        Violation::Short { expected, received } => ContentError::length_mismatch(expected, received),
    }
}

#[derive(Debug, Clone)]
pub struct LimitFilter {
    mode: LimitMode,
    limit: u64,
    received: u64,
    raise: fn(Violation) -> ContentError,
    error: Option<ContentError>,
}

impl LimitFilter {
    pub fn new(mode: LimitMode, limit: u64) -> Self {
        Self::with_error(mode, limit, default_error)
    }

    /// Filter checking the raw, still compressed, length against the declared one.
    pub fn exact(length: u64) -> Self {
        Self::new(LimitMode::Exact, length)
    }

    /// Filter capping the decoded size.
    pub fn ceiling(limit: u64) -> Self {
        Self::new(LimitMode::Ceiling, limit)
    }

    /// Creates a filter reporting violations through `raise`.
    pub fn with_error(mode: LimitMode, limit: u64, raise: fn(Violation) -> ContentError) -> Self {
        Self { mode, limit, received: 0, raise, error: None }
    }

    pub fn mode(&self) -> LimitMode {
        self.mode
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn error(&self) -> Option<&ContentError> {
        self.error.as_ref()
    }

    fn fail(&mut self, violation: Violation) -> ContentError {
        warn!(mode = ?self.mode, ?violation, "body size check failed");
        let error = (self.raise)(violation);
        self.error = Some(error.clone());
        error
    }
}

impl Transform for LimitFilter {
    fn transform(&mut self, chunk: Bytes) -> Result<Option<Bytes>, ContentError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        self.received += chunk.len() as u64;
        if self.received > self.limit {
            let violation = Violation::Exceeded { limit: self.limit, received: self.received };
            return Err(self.fail(violation));
        }

        Ok(Some(chunk))
    }

    fn flush(&mut self) -> Result<Option<Bytes>, ContentError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        match self.mode {
            LimitMode::Ceiling => Ok(None),
            LimitMode::Exact if self.received == self.limit => Ok(None),
            LimitMode::Exact => {
                let violation = Violation::Short { expected: self.limit, received: self.received };
                Err(self.fail(violation))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.mode {
            LimitMode::Exact => "exact-limit",
            LimitMode::Ceiling => "ceiling-limit",
        }
    }
}
