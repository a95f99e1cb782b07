//! The conversation: event log, state machine and the actor that drives it.

pub mod action;
pub mod actor;
pub mod event;
pub mod machine;
pub mod state;

pub use action::Action;
pub use actor::{ConversationActor, ConversationHandle};
pub use event::{Event, MessageEvent, ToolUseEvent};
pub use machine::{Effect, Machine};
pub use state::{ConversationState, ErrorBanner, TaskHandle, ToolCall};
