//! # Copilot Core
//!
//! Domain types, traits, and error definitions for the catalog copilot.
//! This crate defines the vocabulary every other crate speaks:
//!
//! - the content model exchanged with the LLM ([`content`])
//! - tool descriptors, collections and the validating executor ([`tool`])
//! - the mount/unmount context registry ([`context`])
//! - the prompt shape and the LLM transport trait ([`provider`])
//!
//! Tool failures become error results here and transport failures are
//! typed [`ProviderError`]s; nothing above this crate sees a panic.

pub mod content;
pub mod context;
pub mod error;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use content::{ContentBlock, DocumentFormat, ImageFormat, PromptContent, ToolResultBlock, ToolUse};
pub use context::{Contribution, ContextAggregator, ContextShape, PartialContext};
pub use error::{Error, ProviderError, Result, ToolError};
pub use provider::{Prompt, PromptMessage, PromptMessages, Provider, ProviderResponse, Role, ToolConfig};
pub use tool::{Collection, ResultStatus, Tool, ToolResult, execute, execute_with_timeout, tool_fn};
