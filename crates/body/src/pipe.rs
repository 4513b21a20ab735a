use crate::chunk::Chunk;
use crate::ContentError;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

/// The chunks of a finished body, kept for consumers attached late.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    chunks: Vec<Chunk>,
    error: Option<ContentError>,
}

impl Replay {
    pub(crate) fn new(chunks: Vec<Chunk>, error: Option<ContentError>) -> Self {
        Self { chunks, error }
    }
}

/// A pass-through consumer of a body, see [`BodyReader::pipe`](crate::BodyReader::pipe).
///
/// Yields the same ordered chunks the materializer accumulates. A failed body
/// yields its error once, after the chunks that were accepted before the
/// failure, and then ends.
#[must_use = "streams do nothing unless polled"]
pub struct BodyPipe {
    state: PipeState,
}

enum PipeState {
    /// Registered with a running materializer.
    Live {
        receiver: mpsc::UnboundedReceiver<Result<Chunk, ContentError>>,
        progress: Option<BoxFuture<'static, Arc<Replay>>>,
    },
    /// Attached after the materializer finished.
    Waiting { progress: BoxFuture<'static, Arc<Replay>> },
    Replaying { replay: Arc<Replay>, position: usize },
    Done,
}

impl std::fmt::Debug for BodyPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            PipeState::Live { .. } => "live",
            PipeState::Waiting { .. } => "waiting",
            PipeState::Replaying { .. } => "replaying",
            PipeState::Done => "done",
        };
        f.debug_struct("BodyPipe").field("state", &state).finish()
    }
}

impl BodyPipe {
    pub(crate) fn live(
        receiver: mpsc::UnboundedReceiver<Result<Chunk, ContentError>>,
        progress: BoxFuture<'static, Arc<Replay>>,
    ) -> Self {
        Self { state: PipeState::Live { receiver, progress: Some(progress) } }
    }

    pub(crate) fn replay(progress: BoxFuture<'static, Arc<Replay>>) -> Self {
        Self { state: PipeState::Waiting { progress } }
    }
}

impl Stream for BodyPipe {
    type Item = Result<Chunk, ContentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                PipeState::Live { receiver, progress } => {
                    if let Poll::Ready(item) = receiver.poll_next_unpin(cx) {
                        if item.is_none() {
                            this.state = PipeState::Done;
                        }
                        return Poll::Ready(item);
                    }

                    // nothing buffered yet, push the shared body forward
                    let Some(driver) = progress else {
                        return Poll::Pending;
                    };
                    if driver.poll_unpin(cx).is_ready() {
                        *progress = None;
                        continue;
                    }

                    return match receiver.poll_next_unpin(cx) {
                        Poll::Ready(None) => {
                            this.state = PipeState::Done;
                            Poll::Ready(None)
                        }
                        other => other,
                    };
                }

                PipeState::Waiting { progress } => {
                    let replay = ready!(progress.poll_unpin(cx));
                    this.state = PipeState::Replaying { replay, position: 0 };
                }

                PipeState::Replaying { replay, position } => {
                    if let Some(chunk) = replay.chunks.get(*position) {
                        *position += 1;
                        return Poll::Ready(Some(Ok(chunk.clone())));
                    }

                    let error = replay.error.clone();
                    this.state = PipeState::Done;
                    if let Some(error) = error {
                        return Poll::Ready(Some(Err(error)));
                    }
                }

                PipeState::Done => return Poll::Ready(None),
            }
        }
    }
}
