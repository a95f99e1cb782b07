//! Conversation orchestration for the catalog copilot.
//!
//! The [`Assistant`] owns a conversation actor that sequences:
//!
//! 1. **Ask**: a user message is appended to the event log
//! 2. **Prompt**: the log and the aggregated context become an LLM request
//! 3. **Tool use**: requested tools run concurrently, results are recorded
//! 4. **Loop**: the updated log goes back to the LLM until it answers with text only
//!
//! Every outcome, success or failure, re-enters the actor as an [`Action`],
//! so the transition function stays total and never fails.

pub mod assistant;
pub mod conversation;
pub mod prompt;
pub mod settings;

pub use assistant::Assistant;
pub use conversation::{
    Action, ConversationActor, ConversationHandle, ConversationState, ErrorBanner, Event,
    MessageEvent, ToolUseEvent,
};
pub use prompt::{PromptBuilder, construct_prompt};
pub use settings::Settings;
