//! Observer hooks for relay activity.
//!
//! [`RelayLogger`] lets callers capture what passes through the relay: thread
//! creation, each fragment relayed to the UI, and each finished turn.
//! [`JsonLinesLogger`] writes those records as one JSON object per line.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::session::SessionId;
use crate::turn::Turn;
use crate::types::ThreadId;
use crate::{Error, Result};

/// A trait for observing relay operations.
///
/// Implementations must not block for long; they run inline with the turn.
///
/// # Example
///
/// ```rust,ignore
/// use foundry_chat::{RelayLogger, SessionId, ThreadId, Turn};
///
/// struct StderrLogger;
///
/// impl RelayLogger for StderrLogger {
///     fn log_thread_created(&self, session_id: &SessionId, thread_id: &ThreadId) {
///         eprintln!("{session_id}: thread {thread_id}");
///     }
///
///     fn log_fragment(&self, _: &SessionId, _: &str) {}
///
///     fn log_turn_finished(&self, session_id: &SessionId, turn: &Turn) {
///         eprintln!("{session_id}: turn {}", turn.status());
///     }
/// }
/// ```
pub trait RelayLogger: Send + Sync {
    /// Called once when a session's thread is created.
    fn log_thread_created(&self, session_id: &SessionId, thread_id: &ThreadId);

    /// Called for every fragment, before it reaches the UI.
    fn log_fragment(&self, session_id: &SessionId, text: &str);

    /// Called once per turn with its terminal state.
    fn log_turn_finished(&self, session_id: &SessionId, turn: &Turn);
}

/// Writes relay records as JSON lines.
///
/// Write failures are swallowed; logging never fails a turn.
pub struct JsonLinesLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesLogger {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Append to the file at `path`, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io(format!("cannot open log file {}", path.display()), e))?;
        Ok(Self::new(io::LineWriter::new(file)))
    }

    fn write(&self, mut record: Value) {
        if let Some(object) = record.as_object_mut()
            && let Ok(at) = OffsetDateTime::now_utc().format(&Rfc3339)
        {
            object.insert("at".to_string(), Value::String(at));
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if serde_json::to_writer(&mut *writer, &record).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

impl RelayLogger for JsonLinesLogger {
    fn log_thread_created(&self, session_id: &SessionId, thread_id: &ThreadId) {
        self.write(json!({
            "event": "thread_created",
            "session_id": session_id.as_str(),
            "thread_id": thread_id,
        }));
    }

    fn log_fragment(&self, session_id: &SessionId, text: &str) {
        self.write(json!({
            "event": "fragment",
            "session_id": session_id.as_str(),
            "text": text,
        }));
    }

    fn log_turn_finished(&self, session_id: &SessionId, turn: &Turn) {
        self.write(json!({
            "event": "turn_finished",
            "session_id": session_id.as_str(),
            "status": turn.status().as_str(),
            "user_text": turn.user_text(),
            "response_text": turn.response_text(),
            "fragments": turn.fragments(),
            "error": turn.error().map(|err| err.to_string()),
        }));
    }
}
