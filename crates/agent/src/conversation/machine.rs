//! The transition function.
//!
//! [`Machine::step`] is total and synchronous: it maps the current state and
//! one action to the next state plus the effects the runtime must perform.
//! `None` means the action is not valid for the current state and is ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use copilot_core::content::{self, ContentBlock, ToolUse};
use copilot_core::error::ProviderError;
use copilot_core::provider::Role;
use tracing::{debug, warn};

use super::action::Action;
use super::event::Event;
use super::state::{ConversationState, ErrorBanner, TaskHandle, ToolCall};

pub(crate) const LLM_ERROR_MESSAGE: &str = "Error while interacting with LLM. Please try again.";
pub(crate) const TOOL_LIMIT_MESSAGE: &str = "Tool use limit reached";

/// Work the runtime performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a prompt built from the new state's events.
    Request(TaskHandle),
    /// Run one tool call.
    RunTool {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
        handle: TaskHandle,
    },
    /// Interrupt in-flight work.
    Cancel(Vec<TaskHandle>),
}

#[derive(Debug)]
pub struct Machine {
    max_tool_rounds: u32,
    next_handle: u64,
}

impl Machine {
    pub fn new(max_tool_rounds: u32) -> Self {
        Self {
            max_tool_rounds,
            next_handle: 1,
        }
    }

    fn handle(&mut self) -> TaskHandle {
        let handle = TaskHandle::new(self.next_handle);
        self.next_handle += 1;
        handle
    }

    pub fn step(
        &mut self,
        state: &ConversationState,
        action: Action,
        now: DateTime<Utc>,
    ) -> Option<(ConversationState, Vec<Effect>)> {
        use ConversationState as S;

        match (state, action) {
            (S::Idle { events, .. }, Action::Ask { content }) => {
                let mut events = events.clone();
                events.push(Event::message(Role::User, content::text([content]), now));
                let request = self.handle();
                Some((
                    S::WaitingForAssistant {
                        events,
                        timestamp: now,
                        request: request.clone(),
                        round: 1,
                    },
                    vec![Effect::Request(request)],
                ))
            }

            (S::Idle { .. }, Action::Clear) => Some((S::idle(now), Vec::new())),

            (S::Idle { events, error, .. }, Action::Discard { id }) => {
                let index = events.iter().position(|e| e.id() == id && !e.is_discarded())?;
                let mut events = events.clone();
                events[index] = events[index].discarded();
                Some((
                    S::Idle {
                        events,
                        timestamp: now,
                        error: error.clone(),
                    },
                    Vec::new(),
                ))
            }

            (
                S::WaitingForAssistant {
                    events,
                    request,
                    round,
                    ..
                },
                Action::LlmResponse {
                    request_id,
                    content,
                    tool_uses,
                },
            ) => {
                if request_id != request.id() {
                    debug!(target: "conversation.machine", request_id, "Ignoring response for a stale request");
                    return None;
                }
                Some(self.on_response(events, *round, content, tool_uses, now))
            }

            (S::WaitingForAssistant { events, request, .. }, Action::LlmError { request_id, error }) => {
                if request_id != request.id() {
                    debug!(target: "conversation.machine", request_id, "Ignoring error for a stale request");
                    return None;
                }
                Some((llm_failure(events.clone(), &error, now), Vec::new()))
            }

            (S::WaitingForAssistant { events, request, .. }, Action::Abort) => Some((
                S::Idle {
                    events: events.clone(),
                    timestamp: now,
                    error: None,
                },
                vec![Effect::Cancel(vec![request.clone()])],
            )),

            (
                S::ToolUse {
                    events,
                    calls,
                    round,
                    ..
                },
                Action::ToolResult { id, result },
            ) => {
                let mut calls = calls.clone();
                let call = calls.remove(&id)?;
                let mut events = events.clone();
                if let Some(result) = result {
                    events.push(Event::tool_use(
                        id,
                        call.handle.id(),
                        call.name,
                        call.input,
                        result,
                        now,
                    ));
                }

                if !calls.is_empty() {
                    return Some((
                        S::ToolUse {
                            events,
                            timestamp: now,
                            calls,
                            round: *round,
                        },
                        Vec::new(),
                    ));
                }

                let request = self.handle();
                Some((
                    S::WaitingForAssistant {
                        events,
                        timestamp: now,
                        request: request.clone(),
                        round: round + 1,
                    },
                    vec![Effect::Request(request)],
                ))
            }

            (S::ToolUse { events, calls, .. }, Action::Abort) => Some((
                S::Idle {
                    events: events.clone(),
                    timestamp: now,
                    error: None,
                },
                vec![Effect::Cancel(
                    calls.values().map(|c| c.handle.clone()).collect(),
                )],
            )),

            (state, action) => {
                debug!(
                    target: "conversation.machine",
                    state = state.name(),
                    action = action.name(),
                    "Action not valid for current state"
                );
                None
            }
        }
    }

    fn on_response(
        &mut self,
        events: &[Event],
        round: u32,
        content: Vec<ContentBlock>,
        tool_uses: Vec<ToolUse>,
        now: DateTime<Utc>,
    ) -> (ConversationState, Vec<Effect>) {
        let mut events = events.to_vec();

        if content.is_empty() && tool_uses.is_empty() {
            return (
                llm_failure(events, &ProviderError::EmptyResponse, now),
                Vec::new(),
            );
        }

        events.extend(
            content
                .into_iter()
                .map(|block| Event::message(Role::Assistant, block, now)),
        );

        if tool_uses.is_empty() {
            return (
                ConversationState::Idle {
                    events,
                    timestamp: now,
                    error: None,
                },
                Vec::new(),
            );
        }

        if round >= self.max_tool_rounds {
            warn!(
                target: "conversation.machine",
                rounds = round,
                "Tool use limit reached, dropping requested tool calls"
            );
            return (
                ConversationState::Idle {
                    events,
                    timestamp: now,
                    error: Some(ErrorBanner::new(
                        TOOL_LIMIT_MESSAGE,
                        format!("The assistant requested more tools after {round} rounds."),
                    )),
                },
                Vec::new(),
            );
        }

        let mut calls = BTreeMap::new();
        let mut effects = Vec::with_capacity(tool_uses.len());
        for tool_use in tool_uses {
            if calls.contains_key(&tool_use.tool_use_id) {
                warn!(
                    target: "conversation.machine",
                    tool_use_id = %tool_use.tool_use_id,
                    "Duplicate tool use id in response, skipping"
                );
                continue;
            }
            let handle = self.handle();
            calls.insert(
                tool_use.tool_use_id.clone(),
                ToolCall {
                    name: tool_use.name.clone(),
                    input: tool_use.input.clone(),
                    handle: handle.clone(),
                },
            );
            effects.push(Effect::RunTool {
                tool_use_id: tool_use.tool_use_id,
                name: tool_use.name,
                input: tool_use.input,
                handle,
            });
        }

        (
            ConversationState::ToolUse {
                events,
                timestamp: now,
                calls,
                round,
            },
            effects,
        )
    }
}

fn llm_failure(events: Vec<Event>, error: &ProviderError, now: DateTime<Utc>) -> ConversationState {
    ConversationState::Idle {
        events,
        timestamp: now,
        error: Some(ErrorBanner::new(LLM_ERROR_MESSAGE, error.to_string())),
    }
}
