//! Conversation events: the append-only log the actor owns.

use chrono::{DateTime, Utc};
use copilot_core::content::ContentBlock;
use copilot_core::provider::Role;
use copilot_core::tool::ToolResult;
use serde::Serialize;

/// A single content block shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: ContentBlock,
    pub discarded: bool,
}

/// A completed tool invocation and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUseEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_use_id: String,
    /// Position of the call among every call the model requested in this
    /// conversation. Prompts replay tool pairs in this order.
    pub sequence: u64,
    pub name: String,
    pub input: serde_json::Value,
    pub result: ToolResult,
    pub discarded: bool,
}

/// An entry in the conversation log.
///
/// Events are never mutated after being appended, except for the
/// `discarded` flag, which hides them from future prompts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message(MessageEvent),
    ToolUse(ToolUseEvent),
}

impl Event {
    pub fn message(role: Role, content: ContentBlock, timestamp: DateTime<Utc>) -> Self {
        Self::Message(MessageEvent {
            id: new_id(),
            timestamp,
            role,
            content,
            discarded: false,
        })
    }

    pub fn tool_use(
        tool_use_id: impl Into<String>,
        sequence: u64,
        name: impl Into<String>,
        input: serde_json::Value,
        result: ToolResult,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::ToolUse(ToolUseEvent {
            id: new_id(),
            timestamp,
            tool_use_id: tool_use_id.into(),
            sequence,
            name: name.into(),
            input,
            result,
            discarded: false,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Message(m) => &m.id,
            Self::ToolUse(t) => &t.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Message(m) => m.timestamp,
            Self::ToolUse(t) => t.timestamp,
        }
    }

    pub fn is_discarded(&self) -> bool {
        match self {
            Self::Message(m) => m.discarded,
            Self::ToolUse(t) => t.discarded,
        }
    }

    /// A copy of this event with `discarded` set.
    pub fn discarded(&self) -> Self {
        let mut event = self.clone();
        match &mut event {
            Self::Message(m) => m.discarded = true,
            Self::ToolUse(t) => t.discarded = true,
        }
        event
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::content;

    #[test]
    fn events_get_unique_ids() {
        let now = Utc::now();
        let a = Event::message(Role::User, content::text(["hi"]), now);
        let b = Event::message(Role::User, content::text(["hi"]), now);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.timestamp(), now);
    }

    #[test]
    fn discard_keeps_everything_else() {
        let event = Event::tool_use(
            "toolu_1",
            0,
            "search",
            serde_json::json!({"q": "cells"}),
            ToolResult::succeed([content::text(["3 hits"])]),
            Utc::now(),
        );
        let discarded = event.discarded();
        assert!(!event.is_discarded());
        assert!(discarded.is_discarded());
        assert_eq!(discarded.id(), event.id());
        assert_eq!(discarded.discarded(), discarded);
    }
}
