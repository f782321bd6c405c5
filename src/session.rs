//! Session-to-thread bookkeeping.
//!
//! Every UI session owns at most one remote conversation thread.  The thread
//! is created lazily on the session's first message and reused for the rest
//! of the session.  Thread creation is single-flight per session: concurrent
//! first messages share one creation call, and a failed creation caches
//! nothing so the next message retries.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::agent::RemoteAgent;
use crate::observability::{THREAD_CREATION_ERRORS, THREADS_CREATED};
use crate::relay_logger::RelayLogger;
use crate::turn::{Turn, TurnStatus};
use crate::types::ThreadId;
use crate::{Error, Result};

/// Opaque identifier of a UI session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an identifier issued by the UI.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issues a fresh identifier unique within this process.
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Self(format!("session-{nanos:x}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: SessionId,
    /// Absent until the first message creates the thread.
    pub thread_id: Option<ThreadId>,
    pub created_at: OffsetDateTime,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub turn_active: bool,
}

struct SessionEntry {
    id: SessionId,
    created_at: OffsetDateTime,
    thread: OnceCell<ThreadId>,
    /// Cancelled when the session ends.
    closed: CancellationToken,
    /// Token of the turn in flight, if any.
    active_turn: Mutex<Option<CancellationToken>>,
    turns_completed: AtomicU64,
    turns_failed: AtomicU64,
}

impl SessionEntry {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: OffsetDateTime::now_utc(),
            thread: OnceCell::new(),
            closed: CancellationToken::new(),
            active_turn: Mutex::new(None),
            turns_completed: AtomicU64::new(0),
            turns_failed: AtomicU64::new(0),
        }
    }

    fn active_turn(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.active_turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Session {
        Session {
            session_id: self.id.clone(),
            thread_id: self.thread.get().cloned(),
            created_at: self.created_at,
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            turn_active: self.active_turn().is_some(),
        }
    }

    fn interrupt(&self) -> bool {
        match self.active_turn().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Exclusive right to run one turn in a session.
///
/// Dropping the guard releases the session for the next turn.
pub struct TurnGuard {
    entry: Arc<SessionEntry>,
    token: CancellationToken,
}

impl TurnGuard {
    /// Cancelled when the turn is interrupted or the session ends.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Count the finished turn against the session and release it.
    pub fn finish(self, turn: &Turn) {
        match turn.status() {
            TurnStatus::Complete => {
                self.entry.turns_completed.fetch_add(1, Ordering::Relaxed);
            }
            TurnStatus::Failed => {
                self.entry.turns_failed.fetch_add(1, Ordering::Relaxed);
            }
            TurnStatus::Pending | TurnStatus::Streaming => {}
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        *self.entry.active_turn() = None;
    }
}

/// Owns the session-keyed map of thread identifiers.
pub struct SessionManager<A: RemoteAgent + ?Sized> {
    agent: Arc<A>,
    sessions: Mutex<HashMap<SessionId, Arc<SessionEntry>>>,
    logger: Option<Arc<dyn RelayLogger>>,
}

impl<A: RemoteAgent + ?Sized> SessionManager<A> {
    pub fn new(agent: Arc<A>) -> Self {
        Self {
            agent,
            sessions: Mutex::new(HashMap::new()),
            logger: None,
        }
    }

    /// Report thread creation to `logger`.
    pub fn with_logger(mut self, logger: Arc<dyn RelayLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<SessionEntry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, session_id: &SessionId) -> Arc<SessionEntry> {
        self.sessions()
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(SessionEntry::new(session_id.clone())))
            .clone()
    }

    /// Register a session.  Starting a session that already exists is a no-op.
    pub fn start(&self, session_id: &SessionId) -> Session {
        self.entry(session_id).snapshot()
    }

    /// Return the session's thread, creating it on first use.
    ///
    /// Unknown sessions are registered on the fly.  Concurrent callers for the
    /// same session share a single creation call.
    pub async fn resolve(&self, session_id: &SessionId) -> Result<ThreadId> {
        let entry = self.entry(session_id);
        self.resolve_entry(&entry).await
    }

    async fn resolve_entry(&self, entry: &SessionEntry) -> Result<ThreadId> {
        let thread_id = entry
            .thread
            .get_or_try_init(|| async {
                match self.agent.create_thread().await {
                    Ok(thread_id) => {
                        THREADS_CREATED.click();
                        if let Some(logger) = &self.logger {
                            logger.log_thread_created(&entry.id, &thread_id);
                        }
                        Ok(thread_id)
                    }
                    Err(err) => {
                        THREAD_CREATION_ERRORS.click();
                        Err(Error::thread_creation(
                            format!("could not create a thread for session {}", entry.id),
                            err,
                        ))
                    }
                }
            })
            .await?;
        Ok(thread_id.clone())
    }

    /// Claim the session for one turn.
    ///
    /// Fails with [`Error::TurnInProgress`] while another turn holds the
    /// session.
    pub fn begin_turn(&self, session_id: &SessionId) -> Result<TurnGuard> {
        let entry = self.entry(session_id);
        let token = {
            let mut active = entry.active_turn();
            if active.is_some() {
                return Err(Error::turn_in_progress(session_id.as_str()));
            }
            let token = entry.closed.child_token();
            *active = Some(token.clone());
            token
        };
        Ok(TurnGuard { entry, token })
    }

    /// Resolve the thread of the session a guard belongs to.
    ///
    /// Unlike [`resolve`](Self::resolve) this never re-registers a session
    /// that ended while the turn was running.
    pub async fn resolve_for(&self, guard: &TurnGuard) -> Result<ThreadId> {
        self.resolve_entry(&guard.entry).await
    }

    /// Cancel the session's turn in flight.  Returns false if none is active.
    pub fn interrupt(&self, session_id: &SessionId) -> bool {
        let entry = self.sessions().get(session_id).cloned();
        entry.is_some_and(|entry| entry.interrupt())
    }

    /// Cancel every turn in flight.  Returns how many were cancelled.
    pub fn interrupt_all(&self) -> usize {
        let entries: Vec<_> = self.sessions().values().cloned().collect();
        entries.iter().filter(|entry| entry.interrupt()).count()
    }

    /// Drop the session, cancelling its turn in flight.
    ///
    /// Returns the final snapshot, or `None` for an unknown session.
    pub fn end(&self, session_id: &SessionId) -> Option<Session> {
        let entry = self.sessions().remove(session_id)?;
        entry.closed.cancel();
        Some(entry.snapshot())
    }

    /// Snapshot of a session.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        let entry = self.sessions().get(session_id).cloned();
        entry.map(|entry| entry.snapshot())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The agent threads are created on.
    pub fn agent(&self) -> &Arc<A> {
        &self.agent
    }
}
