//! The remote agent capability.
//!
//! The relay core only needs two things from the hosted agent: a way to open
//! a conversation thread and a way to submit a message and receive the reply
//! as a stream.  [`RemoteAgent`] captures exactly that so the core can run
//! against [`FoundryAgent`] in production and against scripted fakes in
//! tests.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};

use crate::client::FoundryClient;
use crate::config::{RelayConfig, ResponseMode};
use crate::observability::CLIENT_RUN_POLLS;
use crate::types::{
    AgentStreamEvent, CreateMessageParams, CreateRunParams, ListMessagesParams, MessageRole, Run,
    ThreadId,
};
use crate::{Error, Result};

/// One item of a remote response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentChunk {
    /// The remote run was accepted and given this identifier.
    Started {
        /// Identifier used to cancel the run.
        run_id: String,
    },

    /// A fragment of reply text.
    Text(String),

    /// The reply is complete.  Nothing follows.
    Complete,
}

/// A lazy, finite stream of reply chunks.
///
/// A well-formed stream ends with [`AgentChunk::Complete`] or an error.
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentChunk>> + Send>>;

/// Capability interface to a hosted conversational agent.
#[async_trait::async_trait]
pub trait RemoteAgent: Send + Sync {
    /// Create a new conversation thread.
    async fn create_thread(&self) -> Result<ThreadId>;

    /// Submit `user_text` to the thread and stream the agent's reply.
    ///
    /// An `Err` means the submission was not accepted and no reply will
    /// follow.
    async fn stream_response(&self, thread_id: &ThreadId, user_text: &str) -> Result<AgentStream>;

    /// Ask the service to stop a run that is no longer wanted.
    async fn cancel_run(&self, thread_id: &ThreadId, run_id: &str) -> Result<()> {
        _ = thread_id;
        _ = run_id;
        Ok(())
    }
}

/// A [`RemoteAgent`] backed by the agents REST API.
#[derive(Debug, Clone)]
pub struct FoundryAgent {
    client: FoundryClient,
    agent_id: String,
    mode: ResponseMode,
    poll_interval: Duration,
}

impl FoundryAgent {
    /// Binds a client to the agent named in `config`.
    pub fn new(client: FoundryClient, config: &RelayConfig) -> Self {
        Self {
            client,
            agent_id: config.agent_id.clone(),
            mode: config.mode,
            poll_interval: config.poll_interval,
        }
    }

    /// Builds the client and the agent from a configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Ok(Self::new(FoundryClient::new(config)?, config))
    }

    /// The underlying client.
    pub fn client(&self) -> &FoundryClient {
        &self.client
    }

    /// The agent this instance talks to.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn stream_mode(&self, thread_id: &ThreadId) -> Result<AgentStream> {
        let params = CreateRunParams::new(&self.agent_id).streaming();
        let events = self.client.stream_run(thread_id, &params).await?;
        Ok(Box::pin(chunks_from_events(events)))
    }

    async fn poll_mode(&self, thread_id: &ThreadId) -> Result<AgentStream> {
        let params = CreateRunParams::new(&self.agent_id);
        let run = self.client.create_run(thread_id, &params).await?;
        let poller = RunPoller {
            client: self.client.clone(),
            thread_id: thread_id.clone(),
            run,
            interval: self.poll_interval,
        };
        Ok(Box::pin(poller.into_stream()))
    }
}

#[async_trait::async_trait]
impl RemoteAgent for FoundryAgent {
    async fn create_thread(&self) -> Result<ThreadId> {
        Ok(self.client.create_thread().await?.id)
    }

    async fn stream_response(&self, thread_id: &ThreadId, user_text: &str) -> Result<AgentStream> {
        self.client
            .create_message(thread_id, &CreateMessageParams::user(user_text))
            .await?;
        match self.mode {
            ResponseMode::Stream => self.stream_mode(thread_id).await,
            ResponseMode::Poll => self.poll_mode(thread_id).await,
        }
    }

    async fn cancel_run(&self, thread_id: &ThreadId, run_id: &str) -> Result<()> {
        self.client.cancel_run(thread_id, run_id).await?;
        Ok(())
    }
}

/// The error for a run that completed without producing any reply text.
pub fn no_response() -> Error {
    Error::run_failed(
        "completed",
        Some("no_response".to_string()),
        "The agent processed your message but didn't provide a response",
    )
}

/// Translate run events into reply chunks.
///
/// Text deltas become [`AgentChunk::Text`]; `thread.run.completed` becomes
/// [`AgentChunk::Complete`] and ends the stream, unless no text arrived, in
/// which case the stream ends with [`no_response`].  Failed, cancelled,
/// expired and incomplete runs and `error` events end the stream with an
/// error.  Everything else is bookkeeping and is dropped.
pub fn chunks_from_events<S>(events: S) -> impl Stream<Item = Result<AgentChunk>> + Send
where
    S: Stream<Item = Result<AgentStreamEvent>> + Send + 'static,
{
    let events = Box::pin(events);
    stream::unfold(Some((events, false)), |state| async move {
        let (mut events, mut replied) = state?;
        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(err)) => return Some((Err(err), None)),
                None => return None,
            };
            let chunk = match event {
                AgentStreamEvent::RunCreated(run) => Ok(AgentChunk::Started { run_id: run.id }),
                AgentStreamEvent::MessageDelta(delta) => match delta.text() {
                    Some(text) if !text.is_empty() => {
                        replied = true;
                        Ok(AgentChunk::Text(text))
                    }
                    _ => continue,
                },
                AgentStreamEvent::RunCompleted(_) if !replied => {
                    return Some((Err(no_response()), None));
                }
                AgentStreamEvent::RunCompleted(_) => return Some((Ok(AgentChunk::Complete), None)),
                AgentStreamEvent::RunEnded(run) => {
                    let err = run.failure().unwrap_or_else(|| {
                        Error::run_failed(run.status.as_str(), None, "Unknown error")
                    });
                    return Some((Err(err), None));
                }
                AgentStreamEvent::Error(err) => {
                    let err = Error::streaming(
                        match err.code {
                            Some(code) => format!("{code}: {}", err.message),
                            None => err.message,
                        },
                        None,
                    );
                    return Some((Err(err), None));
                }
                // A bare `done` without completion is reported by the relay.
                AgentStreamEvent::Done => return None,
                _ => continue,
            };
            return Some((chunk, Some((events, replied))));
        }
    })
}

/// Polls a non-streaming run until it reaches a terminal state.
struct RunPoller {
    client: FoundryClient,
    thread_id: ThreadId,
    run: Run,
    interval: Duration,
}

enum PollState {
    Start(RunPoller),
    Waiting(RunPoller),
    Finishing,
    Done,
}

impl RunPoller {
    fn into_stream(self) -> impl Stream<Item = Result<AgentChunk>> + Send {
        stream::unfold(PollState::Start(self), |state| async move {
            match state {
                PollState::Start(poller) => {
                    let run_id = poller.run.id.clone();
                    Some((Ok(AgentChunk::Started { run_id }), PollState::Waiting(poller)))
                }
                PollState::Waiting(poller) => match poller.wait().await {
                    Ok(text) => Some((Ok(AgentChunk::Text(text)), PollState::Finishing)),
                    Err(err) => Some((Err(err), PollState::Done)),
                },
                PollState::Finishing => Some((Ok(AgentChunk::Complete), PollState::Done)),
                PollState::Done => None,
            }
        })
    }

    /// Wait for the run to finish and return the reply text.
    async fn wait(mut self) -> Result<String> {
        while !self.run.status.is_terminal() {
            tokio::time::sleep(self.interval).await;
            CLIENT_RUN_POLLS.click();
            self.run = self.client.get_run(&self.thread_id, &self.run.id).await?;
        }
        if let Some(err) = self.run.failure() {
            return Err(err);
        }

        let page = self
            .client
            .list_messages(&self.thread_id, &ListMessagesParams::for_run(&self.run.id))
            .await?;
        page.data
            .iter()
            .filter(|message| message.role == MessageRole::Assistant)
            .filter(|message| {
                message.run_id.as_deref() == Some(self.run.id.as_str())
                    || message.created_at >= self.run.created_at
            })
            .find_map(|message| message.text())
            .filter(|text| !text.is_empty())
            .ok_or_else(no_response)
    }
}
