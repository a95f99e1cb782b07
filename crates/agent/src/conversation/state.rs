//! Conversation state: an immutable snapshot replaced on every accepted action.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::event::Event;

/// The failure shown to the user after a round went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    pub message: String,
    pub details: String,
}

impl ErrorBanner {
    pub fn new(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: details.into(),
        }
    }
}

/// Cancellable reference to a spawned request or tool task.
///
/// Handles compare by id; the token is shared with the running task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    token: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskHandle {}

/// A tool invocation in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub input: serde_json::Value,
    pub handle: TaskHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationState {
    /// Waiting for user input. `error` holds the last failure, if any.
    Idle {
        events: Vec<Event>,
        timestamp: DateTime<Utc>,
        error: Option<ErrorBanner>,
    },

    /// One LLM request in flight. `round` counts requests since the last ask.
    WaitingForAssistant {
        events: Vec<Event>,
        timestamp: DateTime<Utc>,
        request: TaskHandle,
        round: u32,
    },

    /// Tool invocations in flight, keyed by tool-use id.
    ToolUse {
        events: Vec<Event>,
        timestamp: DateTime<Utc>,
        calls: BTreeMap<String, ToolCall>,
        round: u32,
    },
}

impl ConversationState {
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self::Idle {
            events: Vec::new(),
            timestamp,
            error: None,
        }
    }

    pub fn events(&self) -> &[Event] {
        match self {
            Self::Idle { events, .. }
            | Self::WaitingForAssistant { events, .. }
            | Self::ToolUse { events, .. } => events,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Idle { timestamp, .. }
            | Self::WaitingForAssistant { timestamp, .. }
            | Self::ToolUse { timestamp, .. } => *timestamp,
        }
    }

    /// Tag name for logs and display.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "Idle",
            Self::WaitingForAssistant { .. } => "WaitingForAssistant",
            Self::ToolUse { .. } => "ToolUse",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle { .. })
    }

    pub fn error(&self) -> Option<&ErrorBanner> {
        match self {
            Self::Idle { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// Every task handle this state references.
    pub fn handles(&self) -> Vec<TaskHandle> {
        match self {
            Self::Idle { .. } => Vec::new(),
            Self::WaitingForAssistant { request, .. } => vec![request.clone()],
            Self::ToolUse { calls, .. } => calls.values().map(|c| c.handle.clone()).collect(),
        }
    }

    /// Events still eligible for prompts.
    pub fn active_events(&self) -> impl Iterator<Item = &Event> {
        self.events().iter().filter(|e| !e.is_discarded())
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::idle(Utc::now())
    }
}
