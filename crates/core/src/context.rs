//! Context aggregation: the per-turn bundle of background messages,
//! available tools and readiness markers.
//!
//! Independent contributors (screens, panels, the assistant itself) push a
//! partial context and keep the returned [`Contribution`] alive for as long
//! as the context applies; dropping it deregisters the entry. Every push,
//! update and removal bumps a version counter, and [`ContextAggregator::aggregate`]
//! recomputes the merged view only when that counter has moved.
//!
//! Merging is a left fold in mount order starting from an empty context:
//! messages are concatenated, tools and markers are shallow-merged with the
//! later contributor winning on a name collision.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::ContextError;
use crate::tool::{Collection, Tool};

/// Background messages, tools and markers, either contributed or merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextShape {
    pub messages: Vec<String>,
    pub tools: Collection,
    pub markers: BTreeMap<String, bool>,
}

/// What a single contributor pushes. Same shape as the merged context.
pub type PartialContext = ContextShape;

impl ContextShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(name, tool);
        self
    }

    pub fn with_marker(mut self, key: impl Into<String>, value: bool) -> Self {
        self.markers.insert(key.into(), value);
        self
    }

    /// Fold `partial` into `self`.
    fn merge(&mut self, partial: &PartialContext) {
        self.messages.extend(partial.messages.iter().cloned());
        self.tools.extend_from(&partial.tools);
        self.markers
            .extend(partial.markers.iter().map(|(k, v)| (k.clone(), *v)));
    }

    fn has_markers(&self, keys: &[String]) -> bool {
        keys.iter().all(|k| self.markers.get(k).copied().unwrap_or(false))
    }
}

#[derive(Default)]
struct Registry {
    /// Keyed by a monotonically increasing id, so iteration order is mount order.
    entries: BTreeMap<u64, PartialContext>,
    next_id: u64,
    cache: Option<(u64, Arc<ContextShape>)>,
}

struct Shared {
    registry: Mutex<Registry>,
    version: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Swap in `partial`. The previous partial is dropped after the lock is
    /// released, since its tools may own contributions on this registry.
    fn replace(&self, id: u64, partial: PartialContext) {
        let stale = {
            let mut registry = self.lock();
            let Some(entry) = registry.entries.get_mut(&id) else {
                return;
            };
            let previous = std::mem::replace(entry, partial);
            let cache = registry.cache.take();
            self.bump();
            (previous, cache)
        };
        trace!(target: "context.aggregator", contributor = id, "Contribution updated");
        drop(stale);
    }

    fn remove(&self, id: u64) {
        let stale = {
            let mut registry = self.lock();
            let Some(removed) = registry.entries.remove(&id) else {
                return;
            };
            let cache = registry.cache.take();
            self.bump();
            (removed, cache)
        };
        debug!(target: "context.aggregator", contributor = id, "Contribution removed");
        drop(stale);
    }
}

/// Shared mount/unmount registry. Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ContextAggregator {
    shared: Arc<Shared>,
}

impl ContextAggregator {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                version,
            }),
        }
    }

    /// Register a contributor. The entry lives until the returned handle is dropped.
    pub fn push(&self, partial: PartialContext) -> Contribution {
        let mut registry = self.shared.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(id, partial);
        self.shared.bump();
        debug!(target: "context.aggregator", contributor = id, "Contribution pushed");
        Contribution {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// The change counter; moves on every push, update and removal.
    pub fn version(&self) -> u64 {
        *self.shared.version.borrow()
    }

    /// A receiver that is notified whenever the counter moves.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// The merged context, recomputed only when the counter has moved since the last call.
    pub fn aggregate(&self) -> Arc<ContextShape> {
        let mut registry = self.shared.lock();
        let version = self.version();
        if let Some((cached_version, ctx)) = &registry.cache
            && *cached_version == version
        {
            return Arc::clone(ctx);
        }

        let merged = registry
            .entries
            .values()
            .fold(ContextShape::new(), |mut acc, partial| {
                acc.merge(partial);
                acc
            });
        trace!(
            target: "context.aggregator",
            version,
            contributors = registry.entries.len(),
            tools = merged.tools.len(),
            messages = merged.messages.len(),
            "Context recomputed"
        );
        let merged = Arc::new(merged);
        let stale = registry.cache.replace((version, Arc::clone(&merged)));
        drop(registry);
        drop(stale);
        merged
    }

    pub fn markers(&self) -> BTreeMap<String, bool> {
        self.aggregate().markers.clone()
    }

    /// Resolve once every key in `keys` is `true` in the merged markers.
    pub async fn wait_for_markers(&self, keys: &[String], timeout: Duration) -> Result<(), ContextError> {
        let mut changes = self.changes();
        let wait = async {
            loop {
                if self.aggregate().has_markers(keys) {
                    return Ok(());
                }
                changes.changed().await.map_err(|_| ContextError::Closed)?;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let markers = self.markers();
                let missing = keys
                    .iter()
                    .filter(|k| !markers.get(*k).copied().unwrap_or(false))
                    .cloned()
                    .collect();
                Err(ContextError::MarkersTimeout {
                    timeout_secs: timeout.as_secs(),
                    missing,
                })
            }
        }
    }
}

impl Default for ContextAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// A mounted contributor. Dropping it removes the contribution.
pub struct Contribution {
    id: u64,
    shared: Weak<Shared>,
}

impl Contribution {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Replace this contributor's partial context, keeping its mount position.
    pub fn update(&self, partial: PartialContext) {
        if let Some(shared) = self.shared.upgrade() {
            shared.replace(self.id, partial);
        }
    }

    /// Explicitly deregister; equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Contribution {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Contribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contribution").field("id", &self.id).finish()
    }
}
