//! Output rendering for the chat application.
//!
//! The relay reports every turn to a [`TurnSink`]: fragments as they arrive,
//! then one finished notification.  [`PlainTextRenderer`] is the terminal
//! implementation, with optional ANSI styling.

use std::io::{self, Stdout, Write};

use crate::Error;
use crate::session::SessionId;
use crate::turn::TurnStatus;

/// ANSI escape code for dim text.
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text.
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the agent label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for warnings).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Receiver of a turn's output.
///
/// For a turn that relays N fragments the relay calls `append_fragment`
/// exactly N times, in arrival order, then `turn_finished` exactly once.
pub trait TurnSink: Send {
    /// Show the next fragment of the reply.
    fn append_fragment(&mut self, session_id: &SessionId, text: &str);

    /// The turn reached `status`; `error` is set when it failed.
    fn turn_finished(&mut self, session_id: &SessionId, status: TurnStatus, error: Option<&Error>);
}

/// What to tell the user about a failed turn.
pub fn failure_message(err: &Error) -> String {
    let root = err.root();
    match root {
        _ if err.is_turn_in_progress() => {
            "The agent is still answering your previous message. Wait for it to finish or press Ctrl-C to interrupt it."
                .to_string()
        }
        _ if err.is_thread_creation() => format!(
            "Failed to start the conversation: {root}\nCheck the endpoint, key and agent id, then send your message again."
        ),
        Error::RunFailed { code, .. } if code.as_deref() == Some("no_response") => {
            "The agent processed your message but didn't provide a response. Try rephrasing your question or asking something else."
                .to_string()
        }
        Error::RunFailed { message, .. } => format!(
            "The agent encountered an error while processing your message: {message}\nTry rephrasing your question or ask something else."
        ),
        Error::Timeout { .. } => format!("{root}\nThe agent took too long. Send your message again to retry."),
        Error::Abort { .. } => "[interrupted]".to_string(),
        _ if err.is_retryable() => {
            format!("An error occurred while processing your message: {root}\nPlease try again.")
        }
        _ => format!("An error occurred while processing your message: {root}"),
    }
}

/// Plain text renderer with optional ANSI styling.
///
/// Fragments are written to stdout as they arrive; failures go to stderr.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    mid_line: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            mid_line: false,
        }
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    /// Print the greeting shown when a session starts.
    pub fn print_welcome(&mut self, agent_id: &str, endpoint: &str) {
        println!(
            "{}",
            self.paint(ANSI_BOLD, "Welcome to Azure AI Foundry Chat!")
        );
        println!(
            "{}",
            self.paint(
                ANSI_DIM,
                &format!("Connected to agent {agent_id} at {endpoint}")
            )
        );
        println!("Type your question below. /help lists commands, Ctrl-D quits.");
        println!();
        self.flush();
    }

    /// Print the label in front of the agent's reply.
    pub fn start_response(&mut self) {
        print!("{} ", self.paint(ANSI_CYAN, "agent>"));
        self.mid_line = true;
        self.flush();
    }

    /// Print an informational message.
    pub fn print_info(&mut self, info: &str) {
        self.end_line();
        println!("{info}");
    }

    /// Print a warning.
    pub fn print_warning(&mut self, warning: &str) {
        self.end_line();
        eprintln!("{}", self.paint(ANSI_YELLOW, warning));
    }

    /// Print an error message.
    pub fn print_error(&mut self, error: &str) {
        self.end_line();
        eprintln!("{}", self.paint(ANSI_RED, &format!("Error: {error}")));
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnSink for PlainTextRenderer {
    fn append_fragment(&mut self, _: &SessionId, text: &str) {
        print!("{text}");
        self.mid_line = true;
        self.flush();
    }

    fn turn_finished(&mut self, _: &SessionId, status: TurnStatus, error: Option<&Error>) {
        match (status, error) {
            (TurnStatus::Complete, _) => {
                self.end_line();
                self.flush();
            }
            (_, Some(err)) if err.root().is_abort() => {
                self.end_line();
                println!("{}", self.paint(ANSI_DIM, "[interrupted]"));
                self.flush();
            }
            (_, Some(err)) if err.is_turn_in_progress() => {
                self.print_warning(&failure_message(err));
            }
            (_, Some(err)) => {
                self.print_error(&failure_message(err));
            }
            (_, None) => {
                self.print_error(&format!("turn ended while {status}"));
            }
        }
    }
}
