//! Navigation tool: move the user's viewport to a named route.
//!
//! Routes are described by a [`RouteDescriptor`] table. The tool's input
//! schema is derived from that table, so the model can only pick known route
//! names with their declared parameters. After handing the location to the
//! [`Navigator`], the tool waits for the route's readiness markers to appear
//! in the aggregated context, so the next LLM round sees the new screen.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use copilot_core::content;
use copilot_core::context::ContextAggregator;
use copilot_core::error::ToolError;
use copilot_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const NAV_LAG: Duration = Duration::from_secs(1);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A route parameter, filled into the path template or the query string.
#[derive(Debug, Clone)]
pub struct RouteParam {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl RouteParam {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// A navigable route.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub name: String,
    pub description: String,
    /// Path template; `:param` segments are replaced by parameter values.
    pub path: String,
    pub params: Vec<RouteParam>,
    /// Markers that must become `true` once the destination has loaded.
    pub wait_for_markers: Vec<String>,
}

impl RouteDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            path: path.into(),
            params: Vec::new(),
            wait_for_markers: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: RouteParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait_for_markers.extend(markers.into_iter().map(Into::into));
        self
    }

    /// Render the location for `params`: path segments first, the rest as a query string.
    pub fn location(&self, params: &BTreeMap<String, String>) -> Result<String, NavigationError> {
        for p in self.params.iter().filter(|p| p.required) {
            if !params.contains_key(&p.name) {
                return Err(NavigationError::MissingParam(p.name.clone()));
            }
        }

        let mut used = Vec::new();
        let mut segments = Vec::new();
        for segment in self.path.split('/') {
            match segment.strip_prefix(':') {
                Some(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| NavigationError::MissingParam(name.into()))?;
                    used.push(name);
                    segments.push(value.trim_matches('/').to_string());
                }
                None => segments.push(segment.to_string()),
            }
        }

        let mut location = segments.join("/");
        let query: Vec<String> = params
            .iter()
            .filter(|(k, _)| !used.contains(&k.as_str()))
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if !query.is_empty() {
            location.push('?');
            location.push_str(&query.join("&"));
        }
        Ok(location)
    }

    fn params_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({"type": "string", "description": p.description}),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// The catalog's navigable routes, in matching order.
pub fn default_routes() -> Vec<RouteDescriptor> {
    vec![
        RouteDescriptor::new("home", "/", "Home page"),
        RouteDescriptor::new("search", "/search", "Search page")
            .with_param(RouteParam::optional("q", "Search query"))
            .with_param(RouteParam::optional("buckets", "Comma-separated buckets to search"))
            .with_markers(["searchResultsReady"]),
        RouteDescriptor::new("bucket.overview", "/b/:bucket", "Bucket overview page")
            .with_param(RouteParam::required("bucket", "Bucket name")),
        RouteDescriptor::new("bucket.prefix", "/b/:bucket/tree/:path", "Prefix (aka directory) page")
            .with_param(RouteParam::required("bucket", "Bucket name"))
            .with_param(RouteParam::required("path", "Prefix aka directory path"))
            .with_markers(["listingReady"]),
        RouteDescriptor::new("bucket.object", "/b/:bucket/tree/:path", "Object (aka file) page")
            .with_param(RouteParam::required("bucket", "Bucket name"))
            .with_param(RouteParam::required("path", "Object key aka file path"))
            .with_param(RouteParam::optional("version", "Object version (omit for latest)"))
            .with_markers(["versionsReady", "currentVersionReady"]),
    ]
}

/// A route picked by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigableRoute {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum NavigationError {
    #[error("unknown route '{0}'")]
    UnknownRoute(String),

    #[error("missing route parameter '{0}'")]
    MissingParam(String),

    #[error("{0}")]
    Failed(String),
}

/// Moves the user's viewport. Implemented by the presentation layer.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &NavigableRoute, location: &str) -> Result<(), NavigationError>;
}

pub struct NavigateTool {
    routes: Vec<RouteDescriptor>,
    navigator: Arc<dyn Navigator>,
    context: ContextAggregator,
}

#[derive(Deserialize)]
struct NavigateInput {
    route: NavigableRoute,
}

impl NavigateTool {
    pub fn new(routes: Vec<RouteDescriptor>, navigator: Arc<dyn Navigator>, context: ContextAggregator) -> Self {
        Self {
            routes,
            navigator,
            context,
        }
    }

    fn route(&self, name: &str) -> Result<&RouteDescriptor, NavigationError> {
        self.routes
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| NavigationError::UnknownRoute(name.into()))
    }

    async fn navigate(&self, route: &NavigableRoute) -> Result<(), NavigationError> {
        let descriptor = self.route(&route.name)?;
        let location = descriptor.location(&route.params)?;
        info!(route = %route.name, %location, "Navigating");
        self.navigator.navigate(route, &location)?;

        if descriptor.wait_for_markers.is_empty() {
            return Ok(());
        }
        debug!(markers = ?descriptor.wait_for_markers, "Waiting for markers");
        tokio::time::sleep(NAV_LAG).await;
        match self
            .context
            .wait_for_markers(&descriptor.wait_for_markers, WAIT_TIMEOUT)
            .await
        {
            Ok(()) => debug!("Markers found"),
            Err(e) => info!(error = %e, "Proceeding without markers"),
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for NavigateTool {
    fn description(&self) -> Option<&str> {
        Some("Navigate the catalog to a provided route")
    }

    fn input_schema(&self) -> serde_json::Value {
        let names: Vec<&str> = self.routes.iter().map(|r| r.name.as_str()).collect();
        let variants: Vec<serde_json::Value> = self
            .routes
            .iter()
            .map(|r| {
                serde_json::json!({
                    "type": "object",
                    "title": r.description,
                    "properties": {
                        "name": {"const": r.name},
                        "params": r.params_schema(),
                    },
                    "required": ["name"],
                })
            })
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": {
                "route": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "enum": names},
                    },
                    "required": ["name"],
                    "oneOf": variants,
                }
            },
            "required": ["route"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<Option<ToolResult>, ToolError> {
        let NavigateInput { route } =
            serde_json::from_value(input).map_err(|e| ToolError::failed("navigate", e))?;

        let result = match self.navigate(&route).await {
            Ok(()) => ToolResult::succeed([content::text([
                format!("Navigating to the '{}' route.", route.name),
            ])]),
            Err(e) => ToolResult::fail([content::text([
                format!("Failed to navigate to the '{}' route: {e}", route.name),
            ])]),
        };
        Ok(Some(result))
    }
}
