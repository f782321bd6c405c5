//! The inbound surface used by a chat UI.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::Error;
use crate::agent::RemoteAgent;
use crate::observability::{TURNS_REJECTED, TURNS_STARTED};
use crate::relay::{Relay, bounded};
use crate::relay_logger::RelayLogger;
use crate::render::TurnSink;
use crate::session::{Session, SessionId, SessionManager};
use crate::turn::Turn;

/// Binds UI sessions to remote threads and relays their messages.
///
/// One turn runs per session at a time; a message that arrives while the
/// previous reply is still streaming fails at once with
/// [`Error::TurnInProgress`].  Different sessions proceed independently.
pub struct ChatService<A: RemoteAgent + ?Sized> {
    sessions: SessionManager<A>,
    relay: Relay<A>,
}

impl<A: RemoteAgent + ?Sized> ChatService<A> {
    pub fn new(agent: Arc<A>) -> Self {
        Self {
            sessions: SessionManager::new(Arc::clone(&agent)),
            relay: Relay::new(agent),
        }
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.relay = self.relay.with_turn_timeout(timeout);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn RelayLogger>) -> Self {
        self.sessions = self.sessions.with_logger(Arc::clone(&logger));
        self.relay = self.relay.with_logger(logger);
        self
    }

    pub fn sessions(&self) -> &SessionManager<A> {
        &self.sessions
    }

    pub fn relay(&self) -> &Relay<A> {
        &self.relay
    }

    /// Open a session.  Its thread is created with the first message.
    pub fn start_session(&self) -> SessionId {
        let session_id = SessionId::generate();
        self.sessions.start(&session_id);
        session_id
    }

    /// Relay one user message and report the reply to `sink`.
    ///
    /// `sink` sees every fragment and then exactly one `turn_finished`, also
    /// when the message is rejected or the thread cannot be created.  The
    /// returned turn is in a terminal state.
    pub async fn handle_message(
        &self,
        session_id: &SessionId,
        user_text: &str,
        sink: &mut dyn TurnSink,
    ) -> Turn {
        TURNS_STARTED.click();
        let mut turn = Turn::new(user_text);
        let guard = match self.sessions.begin_turn(session_id) {
            Ok(guard) => guard,
            Err(err) => {
                TURNS_REJECTED.click();
                turn.fail(err);
                self.relay.finish_turn(session_id, &turn, sink);
                return turn;
            }
        };

        let timeout = self.relay.turn_timeout();
        let deadline = Instant::now() + timeout;
        let thread = bounded(
            self.sessions.resolve_for(&guard),
            deadline,
            timeout,
            guard.token(),
        )
        .await;
        let turn = match thread {
            Ok(thread_id) => {
                self.relay
                    .run_turn(session_id, &thread_id, turn, deadline, guard.token(), sink)
                    .await
            }
            Err(err) => {
                turn.fail(Error::relay("the conversation is not ready", err));
                turn
            }
        };
        guard.finish(&turn);
        self.relay.finish_turn(session_id, &turn, sink);
        turn
    }

    /// Cancel the session's turn in flight, if any.
    pub fn interrupt(&self, session_id: &SessionId) -> bool {
        self.sessions.interrupt(session_id)
    }

    /// Cancel every turn in flight.
    pub fn interrupt_all(&self) -> usize {
        self.sessions.interrupt_all()
    }

    /// Close a session.  A reply still streaming is abandoned.
    pub fn end_session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.end(session_id)
    }

    /// Snapshot of a session.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.session(session_id)
    }
}
