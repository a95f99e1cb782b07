//! Assistant facade: what the presentation layer talks to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use copilot_core::context::{ContextAggregator, Contribution, PartialContext};
use copilot_core::provider::Provider;
use copilot_core::tool::Collection;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::conversation::{Action, ConversationActor, ConversationHandle, ConversationState};
use crate::settings::Settings;

/// A running conversation plus the context it draws on.
///
/// The assistant mounts a "global" contribution of its own on the shared
/// context; it is removed when the assistant is dropped.
pub struct Assistant {
    conversation: ConversationHandle,
    context: ContextAggregator,
    global: Contribution,
    visible: AtomicBool,
}

impl Assistant {
    pub fn new(provider: Arc<dyn Provider>, context: ContextAggregator, settings: &Settings) -> Self {
        info!(
            target: "assistant",
            name = %settings.name,
            provider = provider.name(),
            "Starting assistant"
        );
        let global = context.push(PartialContext::new());
        let conversation = ConversationActor::spawn(provider, context.clone(), settings);
        Self {
            conversation,
            context,
            global,
            visible: AtomicBool::new(false),
        }
    }

    /// Offer `tools` everywhere, regardless of what the UI has mounted.
    pub fn with_tools(self, tools: Collection) -> Self {
        self.set_tools(tools);
        self
    }

    /// Replace the assistant's own tools.
    pub fn set_tools(&self, tools: Collection) {
        debug!(target: "assistant", tools = ?tools.names(), "Updating global tools");
        self.global.update(PartialContext {
            tools,
            ..PartialContext::new()
        });
    }

    pub fn show(&self) {
        self.visible.store(true, Ordering::Relaxed);
    }

    pub fn hide(&self) {
        self.visible.store(false, Ordering::Relaxed);
    }

    pub fn visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// Open the assistant, asking `message` if one is given.
    pub fn assist(&self, message: Option<String>) {
        self.show();
        if let Some(content) = message {
            self.dispatch(Action::Ask { content });
        }
    }

    pub fn dispatch(&self, action: Action) -> bool {
        self.conversation.dispatch(action)
    }

    pub fn state(&self) -> ConversationState {
        self.conversation.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.conversation.subscribe()
    }

    pub fn context(&self) -> &ContextAggregator {
        &self.context
    }

    /// Resolve once everything dispatched so far has played out.
    pub async fn settled(&self) -> ConversationState {
        self.conversation.settled().await
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("conversation", &self.conversation)
            .field("visible", &self.visible())
            .finish()
    }
}
