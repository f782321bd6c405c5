use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::ThreadId;

/// Lifecycle status of an agent run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to be picked up.
    Queued,

    /// The agent is working.
    InProgress,

    /// The agent is waiting on tool outputs.
    RequiresAction,

    /// A cancellation has been requested.
    Cancelling,

    /// The run was cancelled.
    Cancelled,

    /// The run failed; see `last_error`.
    Failed,

    /// The run finished successfully.
    Completed,

    /// The run ended before producing a full response.
    Incomplete,

    /// The run exceeded the service's time limit.
    Expired,
}

impl RunStatus {
    /// Returns true once the run can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled
                | RunStatus::Failed
                | RunStatus::Completed
                | RunStatus::Incomplete
                | RunStatus::Expired
        )
    }

    /// The wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an invalid run status string.
#[derive(Debug)]
pub struct RunStatusParseError {
    /// The invalid string value that could not be parsed.
    pub invalid_value: String,
}

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown run status: {}", self.invalid_value)
    }
}

impl std::error::Error for RunStatusParseError {}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "in_progress" => Ok(RunStatus::InProgress),
            "requires_action" => Ok(RunStatus::RequiresAction),
            "cancelling" => Ok(RunStatus::Cancelling),
            "cancelled" => Ok(RunStatus::Cancelled),
            "failed" => Ok(RunStatus::Failed),
            "completed" => Ok(RunStatus::Completed),
            "incomplete" => Ok(RunStatus::Incomplete),
            "expired" => Ok(RunStatus::Expired),
            _ => Err(RunStatusParseError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

/// The error that ended a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    /// Machine readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human readable description.
    #[serde(default)]
    pub message: String,
}

/// An execution of an agent against a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier of the run.
    pub id: String,

    /// Thread the run executes against.
    pub thread_id: ThreadId,

    /// The agent executing the run.
    #[serde(default)]
    pub assistant_id: String,

    /// Current status.
    pub status: RunStatus,

    /// When the run was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Set when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

impl Run {
    /// Converts a non-successful terminal run into an error.
    ///
    /// Returns `None` for runs that completed or have not terminated yet.
    pub fn failure(&self) -> Option<crate::Error> {
        if self.status == RunStatus::Completed || !self.status.is_terminal() {
            return None;
        }
        let (code, message) = match &self.last_error {
            Some(err) if !err.message.is_empty() => (err.code.clone(), err.message.clone()),
            Some(err) => (err.code.clone(), "Unknown error".to_string()),
            None => (None, "Unknown error".to_string()),
        };
        Some(crate::Error::run_failed(self.status.as_str(), code, message))
    }
}

/// Request body for starting a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRunParams {
    /// The agent to run.
    pub assistant_id: String,

    /// Whether to stream run events over server-sent events.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CreateRunParams {
    /// Create parameters for a non-streaming run.
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            stream: false,
        }
    }

    /// Request a streamed run.
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}
