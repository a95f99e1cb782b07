//! Runtime knobs for the conversation actor.

use std::time::Duration;

use copilot_config::AssistantConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Name the assistant introduces itself with.
    pub name: String,
    /// LLM rounds allowed per ask before tool use is refused.
    pub max_tool_rounds: u32,
    /// Per-call limit for tool executors; `None` waits forever.
    pub tool_timeout: Option<Duration>,
    /// Limit for a single LLM round-trip; `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl From<&AssistantConfig> for Settings {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_tool_rounds: config.max_tool_rounds,
            tool_timeout: config.tool_timeout(),
            request_timeout: Some(config.request_timeout()),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}
