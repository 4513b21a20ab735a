//! The transport side of a body: an upstream [`http_body::Body`] followed by
//! the ordered [`Stages`] every chunk runs through.

use crate::ContentError;
use crate::stage::Stages;
use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::{error, info, trace};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The type-erased transport byte stream.
pub type Transport = UnsyncBoxBody<Bytes, BoxError>;

/// Erases a transport body into a [`Transport`].
pub fn transport<B>(body: B) -> Transport
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

pub struct BodyPipeline {
    upstream: Option<Transport>,
    stages: Stages,
    pending: VecDeque<Bytes>,
    failure: Option<ContentError>,
    ended: bool,
}

impl std::fmt::Debug for BodyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyPipeline")
            .field("stages", &self.stages)
            .field("pending", &self.pending.len())
            .field("failure", &self.failure)
            .field("ended", &self.ended)
            .finish()
    }
}

impl BodyPipeline {
    pub fn new(upstream: Transport, stages: Stages) -> Self {
        Self { upstream: Some(upstream), stages, pending: VecDeque::new(), failure: None, ended: false }
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// Whether the pipeline produced its last chunk or failed.
    pub fn is_ended(&self) -> bool {
        self.ended && self.pending.is_empty()
    }

    /// Gives up the upstream, leaving the pipeline ended.
    pub fn take_upstream(&mut self) -> Option<Transport> {
        self.ended = true;
        self.upstream.take()
    }

    /// Polls the next output chunk of the last stage.
    ///
    /// Returns `Ready(None)` after the stages were flushed successfully. An
    /// error ends the pipeline: it is returned once and every later poll
    /// returns `Ready(None)`.
    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, ContentError>>> {
        let mut out = Vec::new();
        loop {
            if let Some(bytes) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(bytes)));
            }

            if self.ended {
                return Poll::Ready(self.failure.take().map(Err));
            }

            let Some(upstream) = self.upstream.as_mut() else {
                self.ended = true;
                return Poll::Ready(None);
            };

            match ready!(Pin::new(upstream).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let data = match frame.into_data() {
                        Ok(data) => data,
                        Err(frame) => {
                            trace!(trailers = ?frame.trailers_ref(), "ignore non data frame of request body");
                            continue;
                        }
                    };

                    // the pieces that made it through are delivered before the error
                    let result = self.stages.transform(data, &mut out);
                    self.pending.extend(out.drain(..));
                    if let Err(e) = result {
                        self.end_with(e);
                    }
                }

                Some(Err(e)) => {
                    error!(cause = %e, "failed to read request body from transport");
                    self.end_with(ContentError::transport(e));
                }

                None => {
                    self.ended = true;
                    let result = self.stages.flush(&mut out);
                    self.pending.extend(out.drain(..));
                    if let Err(e) = result {
                        self.failure = Some(e);
                    }
                }
            }
        }
    }

    fn end_with(&mut self, error: ContentError) {
        self.ended = true;
        self.failure = Some(error);
    }
}

/// Reads and drops whatever is left of an abandoned transport, so that a
/// producer waiting on it is not blocked forever.
pub async fn skip_body(mut upstream: Transport) {
    let mut size: usize = 0;
    while let Some(frame) = upstream.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    size += data.len();
                }
            }
            Err(e) => {
                trace!(cause = %e, "stop skipping request body");
                break;
            }
        }
    }
    if size > 0 {
        info!(size = size, "skip request body");
    }
}
