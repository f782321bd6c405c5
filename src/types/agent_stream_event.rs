use crate::types::{AgentThread, LastError, MessageDeltaEvent, Run, ThreadMessage};

/// An event in a streamed agent run.
///
/// Events arrive as server-sent events whose `event:` line names the kind and
/// whose `data:` line carries the JSON payload.  A successful run produces
/// `RunCreated`, any number of status and message events, `RunCompleted`,
/// and finally `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStreamEvent {
    /// `thread.created`
    ThreadCreated(AgentThread),

    /// `thread.run.created`
    RunCreated(Run),

    /// Non-terminal status changes: `thread.run.queued`, `thread.run.in_progress`,
    /// `thread.run.requires_action`, `thread.run.cancelling`.
    RunStatusChanged(Run),

    /// `thread.run.completed`
    RunCompleted(Run),

    /// Non-successful terminal states: `thread.run.failed`, `thread.run.cancelled`,
    /// `thread.run.expired`, `thread.run.incomplete`.
    RunEnded(Run),

    /// Any `thread.run.step.*` event.  Steps are not rendered, so only the
    /// event name is kept.
    RunStep(String),

    /// `thread.message.created`
    MessageCreated(ThreadMessage),

    /// `thread.message.in_progress`
    MessageInProgress(ThreadMessage),

    /// `thread.message.delta`
    MessageDelta(MessageDeltaEvent),

    /// `thread.message.completed` and `thread.message.incomplete`
    MessageCompleted(ThreadMessage),

    /// `error`
    Error(LastError),

    /// `done`, the final event of every stream.
    Done,

    /// An event kind this crate does not know about.
    Unknown(String),
}

impl AgentStreamEvent {
    /// Returns true for events after which no more run events will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStreamEvent::RunCompleted(_)
                | AgentStreamEvent::RunEnded(_)
                | AgentStreamEvent::Error(_)
                | AgentStreamEvent::Done
        )
    }
}
