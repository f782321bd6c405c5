// Public modules
pub mod agent_stream_event;
pub mod list_response;
pub mod message_delta_event;
pub mod run;
pub mod thread;
pub mod thread_message;

// Re-exports
pub use agent_stream_event::AgentStreamEvent;
pub use list_response::{ListMessagesParams, ListOrder, ListResponse};
pub use message_delta_event::{MessageDelta, MessageDeltaContent, MessageDeltaEvent};
pub use run::{CreateRunParams, LastError, Run, RunStatus, RunStatusParseError};
pub use thread::{AgentThread, ThreadId};
pub use thread_message::{
    CreateMessageParams, MessageContent, MessageRole, TextContent, ThreadMessage,
};
