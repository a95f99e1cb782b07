//! Actions: the only inputs the conversation actor accepts.
//!
//! The presentation layer dispatches `Ask`, `Abort`, `Clear` and `Discard`;
//! the actor's own background tasks feed back `LlmResponse`, `LlmError` and
//! `ToolResult`.

use copilot_core::content::{ContentBlock, ToolUse};
use copilot_core::error::ProviderError;
use copilot_core::tool::ToolResult;

#[derive(Debug, Clone)]
pub enum Action {
    /// A new user message.
    Ask { content: String },

    /// The LLM answered the request identified by `request_id`.
    LlmResponse {
        request_id: u64,
        content: Vec<ContentBlock>,
        tool_uses: Vec<ToolUse>,
    },

    /// The request identified by `request_id` failed.
    LlmError { request_id: u64, error: ProviderError },

    /// A tool call finished. `result` is `None` when the tool produced nothing to record.
    ToolResult { id: String, result: Option<ToolResult> },

    /// Cancel whatever is in flight.
    Abort,

    /// Drop the whole event log.
    Clear,

    /// Hide an event from future prompts.
    Discard { id: String },
}

impl Action {
    pub fn ask(content: impl Into<String>) -> Self {
        Self::Ask {
            content: content.into(),
        }
    }

    pub fn discard(id: impl Into<String>) -> Self {
        Self::Discard { id: id.into() }
    }

    /// Short tag for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ask { .. } => "Ask",
            Self::LlmResponse { .. } => "LlmResponse",
            Self::LlmError { .. } => "LlmError",
            Self::ToolResult { .. } => "ToolResult",
            Self::Abort => "Abort",
            Self::Clear => "Clear",
            Self::Discard { .. } => "Discard",
        }
    }
}
