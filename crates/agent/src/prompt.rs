//! Prompt builder: turns the event log and the aggregated context into an LLM request.
//!
//! Layout of the message list:
//! 1. a synthetic user message with the task context, the background
//!    messages contributed by the UI, and the conversation-start marker;
//! 2. every message event, in log order;
//! 3. a user message with the conversation-end marker and the immediate task;
//! 4. one assistant tool-use / user tool-result pair per recorded tool call.
//!
//! Tool pairs are replayed in the order the model requested them, so the
//! prompt does not depend on the order in which tools finished.

use chrono::{DateTime, SecondsFormat, Utc};
use copilot_core::content::{self, ToolResultBlock, ToolUse};
use copilot_core::context::ContextShape;
use copilot_core::provider::{Prompt, PromptMessage, PromptMessages, ToolConfig};

use crate::conversation::event::{Event, ToolUseEvent};

pub const DEFAULT_NAME: &str = "Copilot";

const TASK_CONTEXT: &str = "
<task-context>
You act as a chatbot deployed inside a data catalog.
You can see and operate the catalog UI through the provided context and tools.
</task-context>
";

const TASK_DESCRIPTION: &str = "
<task-description>
Answer questions about the data the user is browsing.
Prefer looking things up with tools over guessing.
</task-description>
";

pub const CONVERSATION_START: &str = "
Following is the conversation history:
### CONVERSATION START ###
";

pub const CONVERSATION_END: &str = "
### CONVERSATION END ###
";

pub const IMMEDIATE_TASK: &str = "
Advance the provided conversation in the most helpful way possible.
Use tools proactively, but don't mention that unnecessarily, so that it feels transparent.

Think step by step and carefully analyze the provided context to prevent giving
incomplete or inaccurate information.

Never make things up, always double-check your responses and use the context
to your advantage.

Use GitHub Flavored Markdown syntax for formatting when appropriate.
";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    name: String,
}

impl PromptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn system(&self, now: DateTime<Utc>) -> String {
        format!(
            "\nYou are {name}, an AI assistant embedded in a data catalog.\n\
             Your primary purpose is helping users find, inspect and understand their data.\n\
             Persona: conservative and creative scientist.\n\
             Current time: {now}\n",
            name = self.name,
            now = now.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Build the request for `events`. Discarded events are skipped.
    pub fn build<'a>(
        &self,
        events: impl IntoIterator<Item = &'a Event>,
        context: &ContextShape,
        now: DateTime<Utc>,
    ) -> Prompt {
        let mut message_events = Vec::new();
        let mut tool_events: Vec<&ToolUseEvent> = Vec::new();
        for event in events.into_iter().filter(|e| !e.is_discarded()) {
            match event {
                Event::Message(m) => message_events.push(m),
                Event::ToolUse(t) => tool_events.push(t),
            }
        }
        tool_events.sort_by_key(|t| t.sequence);

        let background = format!("<context>\n{}\n</context>", context.messages.join("\n"));
        let head = PromptMessage::user(content::text([
            TASK_CONTEXT,
            TASK_DESCRIPTION,
            background.as_str(),
            CONVERSATION_START,
        ]));

        let history = message_events.into_iter().map(|m| PromptMessage {
            role: m.role,
            content: m.content.clone().into(),
        });
        let task = PromptMessage::user(content::text([CONVERSATION_END, IMMEDIATE_TASK]));
        let tool_pairs = tool_events.into_iter().flat_map(|t| {
            [
                PromptMessage::tool_use(ToolUse {
                    tool_use_id: t.tool_use_id.clone(),
                    name: t.name.clone(),
                    input: t.input.clone(),
                }),
                PromptMessage::tool_result(ToolResultBlock {
                    tool_use_id: t.tool_use_id.clone(),
                    status: t.result.status,
                    content: t.result.content.clone(),
                }),
            ]
        });

        Prompt {
            system: self.system(now),
            messages: PromptMessages::new(
                head,
                history.chain(std::iter::once(task)).chain(tool_pairs),
            ),
            tool_config: ToolConfig {
                tools: context.tools.clone(),
            },
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAME)
    }
}

/// [`PromptBuilder::build`] with the default assistant name.
pub fn construct_prompt<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    context: &ContextShape,
    now: DateTime<Utc>,
) -> Prompt {
    PromptBuilder::default().build(events, context, now)
}
