//! Forwarding one user message and relaying the reply.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentChunk, AgentStream, RemoteAgent, no_response};
use crate::config::DEFAULT_TURN_TIMEOUT;
use crate::observability::{
    TURN_DURATION, TURN_FIRST_FRAGMENT, TURN_FRAGMENTS, TURNS_COMPLETED, TURNS_FAILED,
};
use crate::relay_logger::RelayLogger;
use crate::render::TurnSink;
use crate::session::SessionId;
use crate::turn::Turn;
use crate::types::ThreadId;
use crate::{Error, Result};

/// How long a best-effort run cancellation may take.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// One item of a [`TurnStream`].
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A fragment of reply text, in arrival order.
    Fragment(String),
    /// The reply finished.  Nothing follows.
    Completed,
    /// The turn failed.  Nothing follows.
    Failed(Error),
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Fragment(_))
    }
}

/// The reply to one submission.
///
/// Yields fragments followed by exactly one of [`TurnEvent::Completed`] or
/// [`TurnEvent::Failed`], then ends.  A remote stream that stops without a
/// completion marker yields `Failed`, and so does one that completes without
/// any reply text.  The underlying connection is released as soon as the
/// terminal event is produced or the stream is dropped.
pub struct TurnStream {
    inner: Option<AgentStream>,
    run_id: Option<String>,
    replied: bool,
}

impl TurnStream {
    pub fn new(inner: AgentStream) -> Self {
        Self {
            inner: Some(inner),
            run_id: None,
            replied: false,
        }
    }

    /// The remote run, once the service has announced it.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Stop consuming and release the connection.
    pub fn close(&mut self) {
        self.inner = None;
    }

    fn fail(&mut self, err: Error) -> Poll<Option<TurnEvent>> {
        self.inner = None;
        Poll::Ready(Some(TurnEvent::Failed(err)))
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(AgentChunk::Started { run_id }))) => {
                    this.run_id = Some(run_id);
                }
                Poll::Ready(Some(Ok(AgentChunk::Text(text)))) => {
                    this.replied |= !text.is_empty();
                    return Poll::Ready(Some(TurnEvent::Fragment(text)));
                }
                Poll::Ready(Some(Ok(AgentChunk::Complete))) if !this.replied => {
                    return this.fail(Error::relay("the response stream failed", no_response()));
                }
                Poll::Ready(Some(Ok(AgentChunk::Complete))) => {
                    this.inner = None;
                    return Poll::Ready(Some(TurnEvent::Completed));
                }
                Poll::Ready(Some(Err(err))) => {
                    return this.fail(Error::relay("the response stream failed", err));
                }
                Poll::Ready(None) => {
                    return this.fail(Error::relay(
                        "the response stream failed",
                        Error::streaming("stream ended before the run completed", None),
                    ));
                }
            }
        }
    }
}

/// Forwards messages to a remote agent and relays the replies.
pub struct Relay<A: RemoteAgent + ?Sized> {
    agent: Arc<A>,
    turn_timeout: Duration,
    logger: Option<Arc<dyn RelayLogger>>,
}

impl<A: RemoteAgent + ?Sized> Relay<A> {
    pub fn new(agent: Arc<A>) -> Self {
        Self {
            agent,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            logger: None,
        }
    }

    /// Bound each turn, submission and streaming together, by `timeout`.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn RelayLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    /// Send `user_text` on `thread_id` and return the reply stream.
    ///
    /// An `Err` is a submission failure: nothing was relayed.  Nothing is
    /// retried.
    pub async fn submit(&self, thread_id: &ThreadId, user_text: &str) -> Result<TurnStream> {
        let inner = self
            .agent
            .stream_response(thread_id, user_text)
            .await
            .map_err(|err| Error::relay("the message could not be submitted", err))?;
        Ok(TurnStream::new(inner))
    }

    /// Drive `turn` against `sink` until it completes or fails.
    ///
    /// Every fragment is handed to [`TurnSink::append_fragment`] in arrival
    /// order.  The turn fails if `cancel` fires or `deadline` passes first;
    /// in either case the remote run is cancelled if it is known.  The sink
    /// is not told the turn finished; see [`finish_turn`](Self::finish_turn).
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        thread_id: &ThreadId,
        mut turn: Turn,
        deadline: Instant,
        cancel: &CancellationToken,
        sink: &mut dyn TurnSink,
    ) -> Turn {
        let submitted = bounded(
            self.submit(thread_id, turn.user_text()),
            deadline,
            self.turn_timeout,
            cancel,
        )
        .await;
        let mut stream = match submitted {
            Ok(stream) => stream,
            Err(err) => {
                turn.fail(Error::relay("the message could not be submitted", err));
                return turn;
            }
        };
        turn.begin_streaming();

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    TurnEvent::Failed(Error::relay("the turn was interrupted", cancelled()))
                }
                _ = &mut expired => {
                    let err = timed_out(self.turn_timeout);
                    TurnEvent::Failed(Error::relay("the turn timed out", err))
                }
                event = stream.next() => event.unwrap_or_else(|| {
                    TurnEvent::Failed(Error::relay(
                        "the response stream failed",
                        Error::streaming("stream already finished", None),
                    ))
                }),
            };
            match event {
                TurnEvent::Fragment(text) => {
                    if turn.fragments() == 0 {
                        TURN_FIRST_FRAGMENT.add(turn.started().elapsed().as_secs_f64());
                    }
                    TURN_FRAGMENTS.click();
                    turn.push_fragment(&text);
                    if let Some(logger) = &self.logger {
                        logger.log_fragment(session_id, &text);
                    }
                    sink.append_fragment(session_id, &text);
                }
                TurnEvent::Completed => {
                    turn.complete();
                    break;
                }
                TurnEvent::Failed(err) => {
                    let run_id = stream.run_id().map(String::from);
                    stream.close();
                    let root = err.root();
                    if let Some(run_id) = run_id
                        && (root.is_timeout() || root.is_abort())
                    {
                        self.abandon_run(thread_id, &run_id).await;
                    }
                    turn.fail(err);
                    break;
                }
            }
        }
        turn
    }

    /// Record a finished turn and tell the sink, exactly once per turn.
    pub fn finish_turn(&self, session_id: &SessionId, turn: &Turn, sink: &mut dyn TurnSink) {
        if turn.error().is_some() {
            TURNS_FAILED.click();
        } else {
            TURNS_COMPLETED.click();
        }
        TURN_DURATION.add(turn.started().elapsed().as_secs_f64());
        if let Some(logger) = &self.logger {
            logger.log_turn_finished(session_id, turn);
        }
        sink.turn_finished(session_id, turn.status(), turn.error());
    }

    /// Best-effort cancellation of a run nobody is listening to anymore.
    async fn abandon_run(&self, thread_id: &ThreadId, run_id: &str) {
        let _ = tokio::time::timeout(CANCEL_GRACE, self.agent.cancel_run(thread_id, run_id)).await;
    }
}

/// Run `fut` unless the turn is cancelled or its deadline passes first.
pub(crate) async fn bounded<T, F>(
    fut: F,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        result = tokio::time::timeout_at(deadline, fut) => {
            result.unwrap_or_else(|_| Err(timed_out(timeout)))
        }
    }
}

fn cancelled() -> Error {
    Error::abort("the turn was cancelled")
}

fn timed_out(timeout: Duration) -> Error {
    Error::timeout(
        format!(
            "no complete response within {} seconds",
            timeout.as_secs_f64()
        ),
        Some(timeout.as_secs_f64()),
    )
}
