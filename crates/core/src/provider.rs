//! Provider trait: the abstraction over the LLM transport.
//!
//! The conversation actor hands a fully built [`Prompt`] to a [`Provider`]
//! and gets back content blocks and tool-use directives. Mapping the prompt
//! onto a specific model API's wire format is the provider's job.

use async_trait::async_trait;
use serde::Serialize;

use crate::content::{ContentBlock, PromptContent, ToolResultBlock, ToolUse};
use crate::error::ProviderError;
use crate::tool::Collection;

/// Who authored a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in a prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: PromptContent,
}

impl PromptMessage {
    pub fn user(content: impl Into<PromptContent>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<PromptContent>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool_use(tool_use: ToolUse) -> Self {
        Self::assistant(PromptContent::ToolUse(tool_use))
    }

    pub fn tool_result(result: ToolResultBlock) -> Self {
        Self::user(PromptContent::ToolResult(result))
    }
}

/// A message list that always holds at least one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PromptMessages(Vec<PromptMessage>);

impl PromptMessages {
    pub fn new(head: PromptMessage, tail: impl IntoIterator<Item = PromptMessage>) -> Self {
        let mut messages = vec![head];
        messages.extend(tail);
        Self(messages)
    }

    /// `None` when `messages` is empty.
    pub fn from_vec(messages: Vec<PromptMessage>) -> Option<Self> {
        if messages.is_empty() { None } else { Some(Self(messages)) }
    }

    pub fn first(&self) -> &PromptMessage {
        &self.0[0]
    }

    pub fn last(&self) -> &PromptMessage {
        &self.0[self.0.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PromptMessage> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[PromptMessage] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a PromptMessages {
    type Item = &'a PromptMessage;
    type IntoIter = std::slice::Iter<'a, PromptMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Tools offered to the model for this request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolConfig {
    pub tools: Collection,
}

/// A structured LLM request; rebuilt on every round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub messages: PromptMessages,
    pub tool_config: ToolConfig,
}

/// What the model answered: content to show and tools to invoke.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    pub tool_uses: Vec<ToolUse>,
}

impl ProviderResponse {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_uses.is_empty()
    }
}

/// The LLM transport.
///
/// Implementations must be cancel-safe: the actor drops the `converse`
/// future when the user aborts.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    async fn converse(&self, prompt: &Prompt) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;

    #[test]
    fn prompt_messages_are_never_empty() {
        assert!(PromptMessages::from_vec(Vec::new()).is_none());

        let messages = PromptMessages::new(
            PromptMessage::user(content::text(["first"])),
            [PromptMessage::assistant(content::text(["second"]))],
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.first().role, Role::User);
        assert_eq!(messages.last().role, Role::Assistant);
    }

    #[test]
    fn tool_messages_carry_expected_roles() {
        let tool_use = ToolUse {
            tool_use_id: "tu_1".into(),
            name: "search".into(),
            input: serde_json::json!({}),
        };
        assert_eq!(PromptMessage::tool_use(tool_use).role, Role::Assistant);

        let result = ToolResultBlock {
            tool_use_id: "tu_1".into(),
            status: crate::tool::ResultStatus::Success,
            content: vec![],
        };
        assert_eq!(PromptMessage::tool_result(result).role, Role::User);
    }

    #[test]
    fn empty_response_detected() {
        assert!(ProviderResponse::default().is_empty());
        let response = ProviderResponse {
            content: vec![content::text(["hi"])],
            tool_uses: vec![],
        };
        assert!(!response.is_empty());
    }
}
