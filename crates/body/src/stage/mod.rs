//! Transform stages of a body pipeline.
//!
//! A body pipeline is an ordered list of synchronous transforms applied to
//! every chunk coming from the transport:
//!
//! - a [`LimitFilter`] in exact mode, checking the declared raw length
//! - zero or more [`Decompressor`]s, one per content-encoding token
//! - a [`LimitFilter`] in ceiling mode, capping the decoded size
//!
//! Stages see chunks strictly in arrival order. The first failing stage
//! stops the whole list: [`Stages`] remembers the error and refuses every
//! later chunk.

mod decompress;
mod limit;

pub use decompress::Decompressor;
pub use limit::LimitFilter;
pub use limit::LimitMode;
pub use limit::Violation;

use crate::ContentError;
use bytes::Bytes;
use std::fmt;

/// Receives the output pieces of a stage, in order.
pub type Emit<'a> = &'a mut dyn FnMut(Bytes) -> Result<(), ContentError>;

/// A pass-through or rewriting step of the body pipeline.
pub trait Transform: Send {
    /// Processes one chunk, returning the bytes to forward (if any).
    fn transform(&mut self, chunk: Bytes) -> Result<Option<Bytes>, ContentError>;

    /// Called once at end of input, returning any trailing bytes.
    fn flush(&mut self) -> Result<Option<Bytes>, ContentError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Processes one chunk, handing its output to `emit` piece by piece.
    ///
    /// Stages whose output can be much larger than their input override
    /// this, so that later stages see every piece before the next one is
    /// produced. An error returned by `emit` stops the stage.
    fn transform_into(&mut self, chunk: Bytes, emit: Emit<'_>) -> Result<(), ContentError> {
        match self.transform(chunk)? {
            Some(bytes) => emit(bytes),
            None => Ok(()),
        }
    }

    /// Like [`flush`](Transform::flush), handing the trailing bytes to `emit`.
    fn flush_into(&mut self, emit: Emit<'_>) -> Result<(), ContentError> {
        match self.flush()? {
            Some(bytes) => emit(bytes),
            None => Ok(()),
        }
    }
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn transform(&mut self, chunk: Bytes) -> Result<Option<Bytes>, ContentError> {
        (**self).transform(chunk)
    }

    fn flush(&mut self) -> Result<Option<Bytes>, ContentError> {
        (**self).flush()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn transform_into(&mut self, chunk: Bytes, emit: Emit<'_>) -> Result<(), ContentError> {
        (**self).transform_into(chunk, emit)
    }

    fn flush_into(&mut self, emit: Emit<'_>) -> Result<(), ContentError> {
        (**self).flush_into(emit)
    }
}

/// The ordered stage list of one body.
#[derive(Default)]
pub struct Stages {
    stages: Vec<Box<dyn Transform>>,
    error: Option<ContentError>,
}

impl fmt::Debug for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stages")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("error", &self.error)
            .finish()
    }
}

impl Stages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Transform + 'static>(&mut self, stage: T) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push_front<T: Transform + 'static>(&mut self, stage: T) -> &mut Self {
        self.stages.insert(0, Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn error(&self) -> Option<&ContentError> {
        self.error.as_ref()
    }

    /// Runs one transport chunk through every stage, appending the output
    /// of the last stage to `out`.
    ///
    /// On failure `out` keeps the pieces that passed every stage before the
    /// failing one.
    pub fn transform(&mut self, chunk: Bytes, out: &mut Vec<Bytes>) -> Result<(), ContentError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        let result = Self::run(&mut self.stages, chunk, out);
        self.remember(result)
    }

    /// Flushes every stage in order, feeding each flushed tail through the
    /// stages that follow it. The trailing bytes are appended to `out` in
    /// output order.
    pub fn flush(&mut self, out: &mut Vec<Bytes>) -> Result<(), ContentError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let mut result = Ok(());
        for index in 0..self.stages.len() {
            let (done, rest) = self.stages.split_at_mut(index + 1);
            result = done[index].flush_into(&mut |bytes| Self::run(rest, bytes, out));
            if result.is_err() {
                break;
            }
        }
        self.remember(result)
    }

    fn run(stages: &mut [Box<dyn Transform>], chunk: Bytes, out: &mut Vec<Bytes>) -> Result<(), ContentError> {
        if chunk.is_empty() {
            return Ok(());
        }
        match stages.split_first_mut() {
            Some((stage, rest)) => stage.transform_into(chunk, &mut |bytes| Self::run(rest, bytes, out)),
            None => {
                out.push(chunk);
                Ok(())
            }
        }
    }

    fn remember(&mut self, result: Result<(), ContentError>) -> Result<(), ContentError> {
        if let Err(e) = &result {
            self.error.get_or_insert_with(|| e.clone());
        }
        result
    }
}
