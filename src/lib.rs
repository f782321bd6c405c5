//! Session-scoped chat relay for hosted AI agents.
//!
//! A [`ChatService`] binds each UI session to one remote conversation thread,
//! created lazily with the session's first message, and relays every user
//! message to the agent, streaming the reply back to a [`TurnSink`].

// Public modules
pub mod agent;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod relay;
pub mod relay_logger;
pub mod render;
pub mod service;
pub mod session;
pub mod sse;
pub mod turn;
pub mod types;
pub mod utils;

mod observability;

// Re-exports
pub use agent::{AgentChunk, AgentStream, FoundryAgent, RemoteAgent, chunks_from_events};
pub use client::FoundryClient;
pub use config::{AuthScheme, ChatArgs, ConfigLayer, RelayConfig, ResponseMode};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use relay::{Relay, TurnEvent, TurnStream};
pub use relay_logger::{JsonLinesLogger, RelayLogger};
pub use render::{PlainTextRenderer, TurnSink, failure_message};
pub use service::ChatService;
pub use session::{Session, SessionId, SessionManager, TurnGuard};
pub use turn::{Turn, TurnStatus};
pub use types::*;
