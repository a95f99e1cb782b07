//! Scripted provider: replays canned responses in order.
//!
//! Used by tests and offline demos. Every prompt it receives is recorded so
//! callers can assert on what the conversation actually sent. An optional
//! gate holds each request in flight until the caller releases it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use copilot_core::content::{self, ToolUse};
use copilot_core::error::ProviderError;
use copilot_core::provider::{Prompt, ProviderResponse};
use tokio::sync::{Semaphore, watch};

pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    prompts: Mutex<Vec<Prompt>>,
    calls: watch::Sender<usize>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls,
            gate: None,
        }
    }

    /// Queue a response with plain text content.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let text: String = text.into();
        self.with_response(ProviderResponse {
            content: vec![content::text([text])],
            tool_uses: vec![],
        })
    }

    /// Queue a response requesting the given tool uses.
    pub fn with_tool_uses(self, tool_uses: Vec<ToolUse>) -> Self {
        self.with_response(ProviderResponse {
            content: vec![],
            tool_uses,
        })
    }

    pub fn with_response(self, response: ProviderResponse) -> Self {
        self.lock_responses().push_back(Ok(response));
        self
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        self.lock_responses().push_back(Err(error));
        self
    }

    /// Hold every request until [`ScriptedProvider::release`] lets it through.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` gated requests complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.borrow()
    }

    /// Resolve once at least `n` requests have been received.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        // The sender lives in `self`, so this only fails if we are being dropped.
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ProviderResponse, ProviderError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl copilot_core::Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn converse(&self, prompt: &Prompt) -> Result<ProviderResponse, ProviderError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());
        self.calls.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            permit.forget();
        }

        self.lock_responses().pop_front().unwrap_or_else(|| {
            Err(ProviderError::NotConfigured(
                "scripted provider has no responses left".into(),
            ))
        })
    }
}
