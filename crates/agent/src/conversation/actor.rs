//! The conversation actor runtime.
//!
//! One worker task owns the state and drains an unbounded mailbox, so
//! transitions never interleave. Work a transition spawns (the LLM request,
//! each tool call) runs as its own task raced against a cancellation token
//! and reports back through the same mailbox. Spawned tasks only hold a weak
//! sender: once every [`ConversationHandle`] is gone the mailbox closes, the
//! worker cancels whatever is in flight and exits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use copilot_core::context::ContextAggregator;
use copilot_core::error::ProviderError;
use copilot_core::provider::{Prompt, Provider, ProviderResponse};
use copilot_core::tool::execute_with_timeout;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use super::action::Action;
use super::machine::{Effect, Machine};
use super::state::{ConversationState, TaskHandle};
use crate::prompt::PromptBuilder;
use crate::settings::Settings;

enum Message {
    Dispatch(Action),
    /// Acknowledged once every message queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

/// Cloneable front end of a running conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<ConversationState>,
}

impl ConversationHandle {
    /// Queue an action. Returns `false` if the worker has stopped.
    pub fn dispatch(&self, action: Action) -> bool {
        self.mailbox.send(Message::Dispatch(action)).is_ok()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every accepted transition.
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Wait for everything dispatched so far to be applied, then for the
    /// conversation to come back to Idle.
    pub async fn settled(&self) -> ConversationState {
        let (done, flushed) = oneshot::channel();
        if self.mailbox.send(Message::Flush(done)).is_ok() {
            let _ = flushed.await;
        }

        let mut rx = self.state.clone();
        match rx.wait_for(ConversationState::is_idle).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}

impl std::fmt::Debug for ConversationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationHandle")
            .field("state", &self.state.borrow().name())
            .finish()
    }
}

pub struct ConversationActor {
    machine: Machine,
    state: watch::Sender<ConversationState>,
    mailbox: mpsc::WeakUnboundedSender<Message>,
    provider: Arc<dyn Provider>,
    context: ContextAggregator,
    prompts: PromptBuilder,
    tool_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl ConversationActor {
    /// Start a conversation on the current tokio runtime.
    pub fn spawn(
        provider: Arc<dyn Provider>,
        context: ContextAggregator,
        settings: &Settings,
    ) -> ConversationHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConversationState::idle(Utc::now()));

        let actor = Self {
            machine: Machine::new(settings.max_tool_rounds),
            state,
            mailbox: tx.downgrade(),
            provider,
            context,
            prompts: PromptBuilder::new(settings.name.clone()),
            tool_timeout: settings.tool_timeout,
            request_timeout: settings.request_timeout,
        };
        tokio::spawn(actor.run(rx));

        ConversationHandle {
            mailbox: tx,
            state: state_rx,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Message>) {
        info!(target: "conversation.actor", provider = self.provider.name(), "Conversation started");

        while let Some(message) = mailbox.recv().await {
            match message {
                Message::Dispatch(action) => self.apply(action),
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        let in_flight = self.state.borrow().handles();
        for handle in &in_flight {
            handle.cancel();
        }
        info!(
            target: "conversation.actor",
            cancelled = in_flight.len(),
            "Conversation closed"
        );
    }

    fn apply(&mut self, action: Action) {
        let action_name = action.name();
        let now = Utc::now();
        let (from, step) = {
            let current = self.state.borrow();
            (current.name(), self.machine.step(&current, action, now))
        };

        let Some((next, effects)) = step else {
            return;
        };
        debug!(
            target: "conversation.actor",
            action = action_name,
            from,
            to = next.name(),
            events = next.events().len(),
            "State transition"
        );
        self.state.send_replace(next);

        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(&self, effect: Effect) {
        match effect {
            Effect::Request(handle) => self.spawn_request(handle),
            Effect::RunTool {
                tool_use_id,
                name,
                input,
                handle,
            } => self.spawn_tool(tool_use_id, name, input, handle),
            Effect::Cancel(handles) => {
                for handle in handles {
                    trace!(target: "conversation.actor", task = handle.id(), "Cancelling task");
                    handle.cancel();
                }
            }
        }
    }

    fn spawn_request(&self, handle: TaskHandle) {
        let prompt = {
            let state = self.state.borrow();
            let context = self.context.aggregate();
            self.prompts.build(state.events(), &context, Utc::now())
        };
        debug!(
            target: "conversation.actor",
            request = handle.id(),
            messages = prompt.messages.len(),
            tools = prompt.tool_config.tools.len(),
            "Sending LLM request"
        );

        let provider = Arc::clone(&self.provider);
        let mailbox = self.mailbox.clone();
        let limit = self.request_timeout;
        let request_id = handle.id();
        let token = handle.token().clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    debug!(target: "conversation.actor", request = request_id, "LLM request cancelled");
                    return;
                }
                outcome = converse(provider.as_ref(), &prompt, limit) => outcome,
            };
            let action = match outcome {
                Ok(response) => Action::LlmResponse {
                    request_id,
                    content: response.content,
                    tool_uses: response.tool_uses,
                },
                Err(error) => Action::LlmError { request_id, error },
            };
            deliver(&mailbox, action);
        });
    }

    fn spawn_tool(&self, tool_use_id: String, name: String, input: serde_json::Value, handle: TaskHandle) {
        // Tools are resolved against the context as it is when the call starts.
        let tools = self.context.aggregate().tools.clone();
        let mailbox = self.mailbox.clone();
        let limit = self.tool_timeout;
        let token = handle.token().clone();
        debug!(target: "conversation.actor", tool = %name, %tool_use_id, "Starting tool call");

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!(target: "conversation.actor", tool = %name, %tool_use_id, "Tool call cancelled");
                    return;
                }
                result = execute_with_timeout(&tools, &name, input, limit) => result,
            };
            deliver(
                &mailbox,
                Action::ToolResult {
                    id: tool_use_id,
                    result,
                },
            );
        });
    }
}

async fn converse(
    provider: &dyn Provider,
    prompt: &Prompt,
    limit: Option<Duration>,
) -> Result<ProviderResponse, ProviderError> {
    let Some(limit) = limit else {
        return provider.converse(prompt).await;
    };
    tokio::time::timeout(limit, provider.converse(prompt))
        .await
        .map_err(|_| ProviderError::Timeout(format!("no response after {}s", limit.as_secs())))?
}

fn deliver(mailbox: &mpsc::WeakUnboundedSender<Message>, action: Action) {
    match mailbox.upgrade() {
        Some(tx) => {
            let _ = tx.send(Message::Dispatch(action));
        }
        None => trace!(target: "conversation.actor", action = action.name(), "Conversation gone, dropping result"),
    }
}
