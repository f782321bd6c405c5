//! One user-message-to-agent-response cycle.

use std::fmt;
use std::time::Instant;

use crate::Error;

/// Where a turn is in its lifecycle.
///
/// ```text
/// pending -> streaming -> complete
///    |           |
///    +-----------+------> failed
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TurnStatus {
    /// Submitted, not yet accepted by the remote agent.
    Pending,
    /// Accepted; fragments may arrive.
    Streaming,
    /// The agent finished its reply.
    Complete,
    /// Submission or streaming failed.
    Failed,
}

impl TurnStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnStatus::Complete | TurnStatus::Failed)
    }

    /// Returns true if a turn in this status may move to `next`.
    pub fn can_transition_to(self, next: TurnStatus) -> bool {
        matches!(
            (self, next),
            (TurnStatus::Pending, TurnStatus::Streaming)
                | (TurnStatus::Pending, TurnStatus::Failed)
                | (TurnStatus::Streaming, TurnStatus::Complete)
                | (TurnStatus::Streaming, TurnStatus::Failed)
        )
    }

    /// Lowercase name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Streaming => "streaming",
            TurnStatus::Complete => "complete",
            TurnStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn.
///
/// Transitions that the state machine does not allow are ignored, so a turn
/// that has reached a terminal status never changes again.
#[derive(Debug, Clone)]
pub struct Turn {
    user_text: String,
    response_text: String,
    status: TurnStatus,
    fragments: usize,
    error: Option<Error>,
    started: Instant,
}

impl Turn {
    /// Creates a pending turn for `user_text`.
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            response_text: String::new(),
            status: TurnStatus::Pending,
            fragments: 0,
            error: None,
            started: Instant::now(),
        }
    }

    /// The submitted text.
    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    /// The reply accumulated so far.
    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    /// Current status.
    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// Number of fragments received.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// The error that failed the turn.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// When the turn was created.
    pub fn started(&self) -> Instant {
        self.started
    }

    fn transition(&mut self, next: TurnStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// The remote agent accepted the submission.
    pub fn begin_streaming(&mut self) -> bool {
        self.transition(TurnStatus::Streaming)
    }

    /// Appends a fragment.  Only streaming turns accept fragments.
    pub fn push_fragment(&mut self, text: &str) -> bool {
        if self.status != TurnStatus::Streaming {
            return false;
        }
        self.response_text.push_str(text);
        self.fragments += 1;
        true
    }

    /// The reply finished.
    pub fn complete(&mut self) -> bool {
        self.transition(TurnStatus::Complete)
    }

    /// The turn failed with `error`.
    pub fn fail(&mut self, error: Error) -> bool {
        if self.transition(TurnStatus::Failed) {
            self.error = Some(error);
            true
        } else {
            false
        }
    }
}
