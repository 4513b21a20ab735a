//! The streaming body materializer.
//!
//! A [`BodyReader`] drives a [`BodyPipeline`] end to end at most once. The
//! drive is a lazily polled future memoized with
//! [`Shared`](futures::future::Shared): it starts the first time a
//! [`ReadBody`] or a [`BodyPipe`] is polled, and every later call observes
//! the same outcome.
//!
//! # Life cycle
//!
//! ```text
//! Idle --first poll--> Reading --end of input--> Complete
//!                         \-----any error------> Failed
//! ```
//!
//! While reading, each chunk is optionally run through a character decoder,
//! appended to the accumulated chunk list and forwarded to every attached
//! consumer in attachment order. Once `Complete` or `Failed` no chunk is
//! accepted or emitted anymore.

use crate::chunk::{Chunk, RawBody};
use crate::pipe::{BodyPipe, Replay};
use crate::pipeline::{BodyPipeline, Transport, skip_body};
use crate::ContentError;
use bytes::Bytes;
use encoding_rs::{CoderResult, Encoding};
use futures::channel::mpsc;
use futures::future::{BoxFuture, Shared, poll_fn};
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tracing::{debug, warn};

type Consumer = mpsc::UnboundedSender<Result<Chunk, ContentError>>;

/// What a finished drive leaves behind.
pub(crate) struct Completion<T> {
    replay: Arc<Replay>,
    outcome: Result<Arc<T>, ContentError>,
}

type Driver<T> = Shared<BoxFuture<'static, Arc<Completion<T>>>>;

/// Handle on a body that is read at most once.
pub struct BodyReader<T> {
    driver: Driver<T>,
    attach: mpsc::UnboundedSender<Consumer>,
}

impl<T> Clone for BodyReader<T> {
    fn clone(&self) -> Self {
        Self { driver: self.driver.clone(), attach: self.attach.clone() }
    }
}

impl<T> std::fmt::Debug for BodyReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader").field("terminated", &self.is_terminated()).finish()
    }
}

impl<T> BodyReader<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a reader over `pipeline`.
    ///
    /// `charset` activates incremental character decoding, in which case the
    /// materialized body and every chunk are text. `decode` turns the
    /// materialized body into the final value; it runs once, after the last
    /// chunk.
    pub fn new<F>(pipeline: BodyPipeline, charset: Option<&'static Encoding>, decode: F) -> Self
    where
        F: FnOnce(RawBody) -> Result<T, ContentError> + Send + 'static,
    {
        let (attach, attached) = mpsc::unbounded();
        let mut materializer = Materializer::new(pipeline, charset, attached);

        let driver = async move {
            let result = poll_fn(|cx| materializer.poll_drive(cx)).await;
            let replay = Arc::new(materializer.into_replay());

            let outcome = match result {
                Ok(raw) => decode(raw).map(Arc::new).inspect_err(|e| warn!(cause = %e, "failed to decode request body")),
                Err(e) => Err(e),
            };

            Arc::new(Completion { replay, outcome })
        };

        Self { driver: driver.boxed().shared(), attach }
    }

    /// Creates a reader that is already `Complete` with `value` and no chunks.
    pub fn ready(value: T) -> Self {
        let (attach, _) = mpsc::unbounded();
        let completion = Arc::new(Completion { replay: Arc::new(Replay::default()), outcome: Ok(Arc::new(value)) });

        Self { driver: futures::future::ready(completion).boxed().shared(), attach }
    }
}

impl<T> BodyReader<T> {
    /// Materializes the body.
    ///
    /// Every call returns a future resolving to the same `Arc` (or the same
    /// error); the transport is read only once.
    pub fn read(&self) -> ReadBody<T> {
        ReadBody { driver: self.driver.clone() }
    }

    /// Attaches a pass-through consumer.
    ///
    /// The consumer first receives every chunk accumulated so far, then the
    /// live ones, and ends (or yields the body error) together with the
    /// materialization. Polling the returned stream drives the body, so a
    /// consumer alone is enough to start reading.
    pub fn pipe(&self) -> BodyPipe
    where
        T: Send + Sync + 'static,
    {
        let progress = self.driver.clone().map(|completion| Arc::clone(&completion.replay)).boxed();

        if self.driver.peek().is_none() {
            let (sender, receiver) = mpsc::unbounded();
            if self.attach.unbounded_send(sender).is_ok() {
                return BodyPipe::live(receiver, progress);
            }
        }

        BodyPipe::replay(progress)
    }

    /// The decoded value, once the body completed successfully.
    pub fn value(&self) -> Option<&T> {
        self.driver.peek().and_then(|completion| completion.outcome.as_deref().ok())
    }

    /// Whether the body reached `Complete` or `Failed`.
    pub fn is_terminated(&self) -> bool {
        self.driver.peek().is_some()
    }
}

/// Future returned by [`BodyReader::read`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ReadBody<T> {
    driver: Driver<T>,
}

impl<T> std::fmt::Debug for ReadBody<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadBody").finish_non_exhaustive()
    }
}

impl<T> Future for ReadBody<T> {
    type Output = Result<Arc<T>, ContentError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let completion = ready!(self.driver.poll_unpin(cx));
        Poll::Ready(completion.outcome.clone())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Reading,
    Complete,
    Failed,
}

struct Materializer {
    pipeline: BodyPipeline,
    decoder: Option<encoding_rs::Decoder>,
    attached: mpsc::UnboundedReceiver<Consumer>,
    consumers: Vec<Consumer>,
    chunks: Vec<Chunk>,
    error: Option<ContentError>,
    phase: Phase,
}

impl Materializer {
    fn new(pipeline: BodyPipeline, charset: Option<&'static Encoding>, attached: mpsc::UnboundedReceiver<Consumer>) -> Self {
        Self {
            pipeline,
            decoder: charset.map(Encoding::new_decoder_with_bom_removal),
            attached,
            consumers: Vec::new(),
            chunks: Vec::new(),
            error: None,
            phase: Phase::Idle,
        }
    }

    fn poll_drive(&mut self, cx: &mut Context<'_>) -> Poll<Result<RawBody, ContentError>> {
        match self.phase {
            Phase::Idle => {
                debug!(stages = ?self.pipeline.stages().names(), "start reading request body");
                self.phase = Phase::Reading;
            }
            Phase::Reading => (),
            Phase::Complete | Phase::Failed => {
                return Poll::Ready(self.error.clone().map_or_else(|| Ok(self.materialize()), Err));
            }
        }

        loop {
            self.poll_attached(cx);

            match ready!(self.pipeline.poll_chunk(cx)) {
                Some(Ok(bytes)) => self.accept(&bytes, false),
                Some(Err(e)) => return Poll::Ready(Err(self.fail(e))),
                None => return Poll::Ready(Ok(self.complete())),
            }
        }
    }

    /// Registers the consumers attached since the last poll, replaying the
    /// chunks they missed.
    fn poll_attached(&mut self, cx: &mut Context<'_>) {
        while let Poll::Ready(Some(consumer)) = self.attached.poll_next_unpin(cx) {
            self.register(consumer);
        }
    }

    fn register(&mut self, consumer: Consumer) {
        for chunk in &self.chunks {
            if consumer.unbounded_send(Ok(chunk.clone())).is_err() {
                return;
            }
        }
        self.consumers.push(consumer);
    }

    fn accept(&mut self, bytes: &Bytes, last: bool) {
        let chunk = match &mut self.decoder {
            Some(decoder) => Chunk::Text(decode_text(decoder, bytes, last)),
            None => Chunk::Binary(bytes.clone()),
        };
        if chunk.is_empty() {
            return;
        }

        self.consumers.retain(|consumer| consumer.unbounded_send(Ok(chunk.clone())).is_ok());
        self.chunks.push(chunk);
    }

    /// Takes the consumers still waiting in the attach queue, the queue is
    /// closed afterwards so later consumers replay from the completion.
    fn close_attached(&mut self) {
        self.attached.close();
        while let Ok(Some(consumer)) = self.attached.try_next() {
            self.register(consumer);
        }
    }

    fn complete(&mut self) -> RawBody {
        if self.decoder.is_some() {
            self.accept(&Bytes::new(), true);
        }
        self.close_attached();
        self.phase = Phase::Complete;

        // dropping the senders ends every consumer
        self.consumers.clear();
        self.materialize()
    }

    fn fail(&mut self, error: ContentError) -> ContentError {
        warn!(cause = %error, received = self.chunks.len(), "stop reading request body");
        self.close_attached();
        self.phase = Phase::Failed;
        self.error = Some(error.clone());

        for consumer in self.consumers.drain(..) {
            let _ = consumer.unbounded_send(Err(error.clone()));
        }

        if let Some(upstream) = self.pipeline.take_upstream() {
            resume(upstream);
        }
        error
    }

    fn materialize(&self) -> RawBody {
        RawBody::concat(&self.chunks, self.decoder.is_some())
    }

    fn into_replay(self) -> Replay {
        Replay::new(self.chunks, self.error)
    }
}

/// Hands an abandoned transport to a background task draining it.
fn resume(upstream: Transport) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(skip_body(upstream));
        }
        Err(_) => debug!("no runtime to drain the request body, dropping it"),
    }
}

fn decode_text(decoder: &mut encoding_rs::Decoder, src: &[u8], last: bool) -> String {
    let capacity = decoder.max_utf8_buffer_length(src.len()).unwrap_or(src.len() * 3 + 16);
    let mut out = String::with_capacity(capacity);
    let mut read_total = 0;
    loop {
        let (result, read, _replaced) = decoder.decode_to_string(&src[read_total..], &mut out, last);
        read_total += read;
        match result {
            CoderResult::InputEmpty => return out,
            CoderResult::OutputFull => out.reserve((src.len() - read_total) * 3 + 16),
        }
    }
}
