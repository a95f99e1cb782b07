//! Built-in catalog tools.
//!
//! Tools give the assistant the ability to act inside the catalog:
//! preview objects from a bucket and move the user's viewport.
//! Both are registered in the assistant's global context contribution.
//! [`context_files`] feeds the notes kept next to the data into the context.

pub mod context_files;
pub mod get_object;
pub mod navigate;

use std::sync::Arc;

use copilot_config::CatalogConfig;
use copilot_core::context::ContextAggregator;
use copilot_core::tool::Collection;

pub use context_files::{ContextFileLoader, ContextFiles, Focus};
pub use get_object::GetObjectTool;
pub use navigate::{
    NavigableRoute, NavigateTool, NavigationError, Navigator, RouteDescriptor, RouteParam,
    default_routes,
};

/// The global tool collection: `get_object` and `navigate` over `routes`.
pub fn catalog_tools(
    catalog: &CatalogConfig,
    routes: Vec<RouteDescriptor>,
    navigator: Arc<dyn Navigator>,
    context: ContextAggregator,
) -> Collection {
    Collection::new()
        .with("get_object", Arc::new(GetObjectTool::new(catalog)))
        .with("navigate", Arc::new(NavigateTool::new(routes, navigator, context)))
}
