//! Tool registry: descriptors, collections and the validating executor.
//!
//! A tool is an input JSON Schema plus an async executor. Tools are grouped
//! into a [`Collection`] keyed by name; [`execute`] looks a tool up, validates
//! the input against its schema and runs it, converting every failure
//! (unknown name, invalid input, executor error, executor panic, timeout)
//! into an error [`ToolResult`]. It never fails and never panics, so the
//! caller can always observe a completion.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::{self, ContentBlock};
pub use crate::error::ToolError;

/// Outcome tag of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// The success/error-tagged content produced by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ResultStatus,
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn succeed(content: impl IntoIterator<Item = ContentBlock>) -> Self {
        Self {
            status: ResultStatus::Success,
            content: content.into_iter().collect(),
        }
    }

    pub fn fail(content: impl IntoIterator<Item = ContentBlock>) -> Self {
        Self {
            status: ResultStatus::Error,
            content: content.into_iter().collect(),
        }
    }

    /// An error result whose only block describes `error`.
    pub fn from_error(error: &ToolError) -> Self {
        Self::fail([content::text([error.to_string()])])
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// The core Tool trait.
///
/// Implementations only describe their input and run; the registry owns
/// lookup, validation and failure normalization.
#[async_trait]
pub trait Tool: Send + Sync {
    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON Schema the input must satisfy before `execute` is called.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the tool. `Ok(None)` means the tool produced nothing worth
    /// recording; the invocation still counts as completed.
    async fn execute(&self, input: serde_json::Value) -> Result<Option<ToolResult>, ToolError>;
}

/// A name → tool map. Inserting an existing name replaces the earlier tool.
#[derive(Clone, Default)]
pub struct Collection {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under `name`, returning the tool it replaced.
    pub fn insert(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(name.into(), tool)
    }

    /// Builder-style [`Collection::insert`].
    pub fn with(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.insert(name, tool);
        self
    }

    /// Shallow-merge `other` into `self`; tools from `other` win on collision.
    pub fn extend_from(&mut self, other: &Collection) {
        for (name, tool) in &other.tools {
            if self.tools.insert(name.clone(), Arc::clone(tool)).is_some() {
                debug!(target: "tools.collection", tool = %name, "Tool registration replaced");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Tool>)> {
        self.tools.iter().map(|(name, tool)| (name.as_str(), tool))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}

/// Two collections are equal when they map the same names to the same tool instances.
impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.tools.len() == other.tools.len()
            && self
                .tools
                .iter()
                .zip(&other.tools)
                .all(|((a_name, a), (b_name, b))| a_name == b_name && Arc::ptr_eq(a, b))
    }
}

struct FnTool<F> {
    description: Option<String>,
    schema: serde_json::Value,
    f: F,
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ToolResult>, ToolError>> + Send,
{
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(&self, input: serde_json::Value) -> Result<Option<ToolResult>, ToolError> {
        (self.f)(input).await
    }
}

/// Build a tool from an async closure.
pub fn tool_fn<F, Fut>(description: Option<&str>, schema: serde_json::Value, f: F) -> Arc<dyn Tool>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<ToolResult>, ToolError>> + Send + 'static,
{
    Arc::new(FnTool {
        description: description.map(str::to_string),
        schema,
        f,
    })
}

fn validate(schema: &serde_json::Value, input: &serde_json::Value) -> Result<(), String> {
    let compiled =
        jsonschema::JSONSchema::compile(schema).map_err(|e| format!("tool schema is invalid: {e}"))?;
    if let Err(errors) = compiled.validate(input) {
        let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(reasons.join("; "));
    }
    Ok(())
}

/// Look up `name` in `collection`, validate `input` and run the tool.
///
/// Always resolves; every failure becomes an error result.
pub async fn execute(
    collection: &Collection,
    name: &str,
    input: serde_json::Value,
) -> Option<ToolResult> {
    let Some(tool) = collection.get(name) else {
        warn!(target: "tools.execute", tool = %name, "Tool not found");
        return Some(ToolResult::from_error(&ToolError::NotFound(name.into())));
    };

    if let Err(reason) = validate(&tool.input_schema(), &input) {
        warn!(target: "tools.execute", tool = %name, %reason, "Tool input rejected");
        return Some(ToolResult::from_error(&ToolError::InvalidArguments {
            tool_name: name.into(),
            reason,
        }));
    }

    debug!(target: "tools.execute", tool = %name, "Executing tool");
    match AssertUnwindSafe(tool.execute(input)).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(target: "tools.execute", tool = %name, error = %e, "Tool execution failed");
            Some(ToolResult::from_error(&e))
        }
        Err(_) => {
            warn!(target: "tools.execute", tool = %name, "Tool panicked");
            Some(ToolResult::from_error(&ToolError::Panicked(name.into())))
        }
    }
}

/// [`execute`] bounded by `timeout`; `None` means no limit.
pub async fn execute_with_timeout(
    collection: &Collection,
    name: &str,
    input: serde_json::Value,
    timeout: Option<Duration>,
) -> Option<ToolResult> {
    let Some(limit) = timeout else {
        return execute(collection, name, input).await;
    };
    match tokio::time::timeout(limit, execute(collection, name, input)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(target: "tools.execute", tool = %name, timeout_secs = limit.as_secs(), "Tool timed out");
            Some(ToolResult::from_error(&ToolError::Timeout {
                tool_name: name.into(),
                timeout_secs: limit.as_secs(),
            }))
        }
    }
}
