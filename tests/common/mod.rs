#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};

use foundry_chat::{
    AgentChunk, AgentStream, Error, RemoteAgent, Result, SessionId, ThreadId, TurnSink, TurnStatus,
};

/// One scripted reply.
#[derive(Clone)]
pub enum Script {
    /// Reject the submission.
    Reject(Error),
    /// Accept and stream these items, pausing `delay` before each one.
    /// With `hang` the stream never ends after the last item.
    Stream {
        items: Vec<Result<AgentChunk>>,
        delay: Duration,
        hang: bool,
    },
}

impl Script {
    pub fn reply(fragments: &[&str]) -> Self {
        let mut items = vec![Ok(AgentChunk::Started {
            run_id: "run_1".to_string(),
        })];
        items.extend(fragments.iter().map(|f| Ok(AgentChunk::Text(f.to_string()))));
        items.push(Ok(AgentChunk::Complete));
        Script::Stream {
            items,
            delay: Duration::ZERO,
            hang: false,
        }
    }

    pub fn broken_after(fragments: &[&str], err: Error) -> Self {
        let mut items: Vec<Result<AgentChunk>> = fragments
            .iter()
            .map(|f| Ok(AgentChunk::Text(f.to_string())))
            .collect();
        items.push(Err(err));
        Script::Stream {
            items,
            delay: Duration::ZERO,
            hang: false,
        }
    }

    pub fn truncated(fragments: &[&str]) -> Self {
        Script::Stream {
            items: fragments
                .iter()
                .map(|f| Ok(AgentChunk::Text(f.to_string())))
                .collect(),
            delay: Duration::ZERO,
            hang: false,
        }
    }

    /// A run that announces itself, sends `fragments` and then hangs.
    pub fn stalled(fragments: &[&str]) -> Self {
        let mut items = vec![Ok(AgentChunk::Started {
            run_id: "run_stalled".to_string(),
        })];
        items.extend(fragments.iter().map(|f| Ok(AgentChunk::Text(f.to_string()))));
        Script::Stream {
            items,
            delay: Duration::ZERO,
            hang: true,
        }
    }

    pub fn slow(fragments: &[&str], delay: Duration) -> Self {
        match Script::reply(fragments) {
            Script::Stream { items, hang, .. } => Script::Stream { items, delay, hang },
            other => other,
        }
    }
}

/// A [`RemoteAgent`] that plays back scripted replies.
#[derive(Default)]
pub struct ScriptedAgent {
    pub threads_created: AtomicUsize,
    pub thread_failures: Mutex<VecDeque<Error>>,
    pub thread_delay: Mutex<Duration>,
    pub scripts: Mutex<VecDeque<Script>>,
    pub submissions: Mutex<Vec<(ThreadId, String)>>,
    pub cancelled: Mutex<Vec<(ThreadId, String)>>,
}

impl ScriptedAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_scripts(scripts: Vec<Script>) -> Arc<Self> {
        let agent = Self::default();
        agent.scripts.lock().unwrap().extend(scripts);
        Arc::new(agent)
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn fail_next_thread(&self, err: Error) {
        self.thread_failures.lock().unwrap().push_back(err);
    }

    pub fn set_thread_delay(&self, delay: Duration) {
        *self.thread_delay.lock().unwrap() = delay;
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(ThreadId, String)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<(ThreadId, String)> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteAgent for ScriptedAgent {
    async fn create_thread(&self) -> Result<ThreadId> {
        let delay = *self.thread_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.thread_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst);
        Ok(ThreadId::new(format!("thread_{n}")))
    }

    async fn stream_response(&self, thread_id: &ThreadId, user_text: &str) -> Result<AgentStream> {
        self.submissions
            .lock()
            .unwrap()
            .push((thread_id.clone(), user_text.to_string()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::reply(&["ok"]));
        match script {
            Script::Reject(err) => Err(err),
            Script::Stream { items, delay, hang } => {
                let items = stream::iter(items).then(move |item| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    item
                });
                if hang {
                    Ok(Box::pin(items.chain(stream::pending())))
                } else {
                    Ok(Box::pin(items))
                }
            }
        }
    }

    async fn cancel_run(&self, thread_id: &ThreadId, run_id: &str) -> Result<()> {
        self.cancelled
            .lock()
            .unwrap()
            .push((thread_id.clone(), run_id.to_string()));
        Ok(())
    }
}

/// What a [`TurnSink`] was told, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Append(String),
    Finished(TurnStatus, Option<String>),
}

/// A [`TurnSink`] that records every call.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Vec<(SessionId, SinkCall)>,
}

impl RecordingSink {
    pub fn appends(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|(_, call)| match call {
                SinkCall::Append(text) => Some(text.clone()),
                SinkCall::Finished(..) => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<TurnStatus> {
        self.calls
            .iter()
            .filter_map(|(_, call)| match call {
                SinkCall::Finished(status, _) => Some(*status),
                SinkCall::Append(_) => None,
            })
            .collect()
    }

    /// Returns true if every turn ends in exactly one finished call with no
    /// appends after it.
    pub fn is_well_formed(&self) -> bool {
        matches!(
            self.calls.last(),
            Some((_, SinkCall::Finished(..))) | None
        )
    }
}

impl TurnSink for RecordingSink {
    fn append_fragment(&mut self, session_id: &SessionId, text: &str) {
        self.calls
            .push((session_id.clone(), SinkCall::Append(text.to_string())));
    }

    fn turn_finished(&mut self, session_id: &SessionId, status: TurnStatus, error: Option<&Error>) {
        self.calls.push((
            session_id.clone(),
            SinkCall::Finished(status, error.map(|e| e.to_string())),
        ));
    }
}
