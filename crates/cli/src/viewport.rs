//! The terminal "viewport": where the user currently is in the catalog.
//!
//! It contributes a background message and readiness markers to the shared
//! context, and lets the `navigate` tool move it. A terminal renders a route
//! instantly, so every marker a route waits for is raised right away.
//! Inside a bucket, the context files for the current directory are loaded
//! in the background.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use copilot_core::context::{ContextAggregator, Contribution, PartialContext};
use copilot_tools::{ContextFiles, Focus, NavigableRoute, NavigationError, Navigator, RouteDescriptor};
use tracing::debug;

pub const READY_MARKER: &str = "viewport.ready";

pub struct Viewport {
    contribution: Contribution,
    route_markers: BTreeMap<String, Vec<String>>,
    location: Mutex<String>,
    files: Option<Arc<ContextFiles>>,
}

impl Viewport {
    /// Mount the viewport at the catalog home page.
    pub fn new(context: &ContextAggregator, routes: &[RouteDescriptor]) -> Self {
        let route_markers = routes
            .iter()
            .map(|r| (r.name.clone(), r.wait_for_markers.clone()))
            .collect();
        let viewport = Self {
            contribution: context.push(PartialContext::new()),
            route_markers,
            location: Mutex::new("/".into()),
            files: None,
        };
        viewport.show("home", "/");
        viewport
    }

    /// Load context files for the bucket directory being viewed.
    pub fn with_context_files(mut self, files: Arc<ContextFiles>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn location(&self) -> String {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn show(&self, route: &str, location: &str) {
        let mut partial = PartialContext::new()
            .with_message(format!(
                "The user is looking at the '{route}' page of the catalog, location: {location}"
            ))
            .with_marker(READY_MARKER, true);
        for marker in self.route_markers.get(route).into_iter().flatten() {
            partial = partial.with_marker(marker.clone(), true);
        }
        self.contribution.update(partial);
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = location.to_string();
    }
}

impl Navigator for Viewport {
    fn navigate(&self, route: &NavigableRoute, location: &str) -> Result<(), NavigationError> {
        if !self.route_markers.contains_key(&route.name) {
            return Err(NavigationError::UnknownRoute(route.name.clone()));
        }
        debug!(route = %route.name, %location, "Viewport moved");
        self.show(&route.name, location);
        if let Some(files) = &self.files {
            match Focus::from_route(route) {
                Some(focus) => {
                    files.focus(focus);
                }
                None => files.clear(),
            }
        }
        Ok(())
    }
}
