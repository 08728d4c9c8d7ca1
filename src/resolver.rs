//! OperationSet Resolver - computes the operations eligible for a sync pass
//!
//! The eligible set is, in order:
//! 1. host shutdown queries that are also query candidates (host order),
//! 2. host shutdown hooks that are also hook candidates (host order),
//! 3. the configured sync hooks, as configured.
//!
//! The three parts are concatenated without deduplication: an id listed both
//! as a hook candidate and as a sync hook runs twice per pass.

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{read_settings, SharedSettings};
use crate::operation::{HookList, Operation, OperationId, OperationRegistry};

/// Registry shared with whoever binds new named operations at runtime
pub type SharedRegistry = Arc<RwLock<OperationRegistry>>;

/// Read-through view over the host lists, candidate lists and sync hooks
#[derive(Clone)]
pub struct OperationResolver {
    settings: SharedSettings,
    queries: Arc<dyn HookList>,
    hooks: Arc<dyn HookList>,
    registry: SharedRegistry,
}

impl OperationResolver {
    pub fn new(
        settings: SharedSettings,
        queries: Arc<dyn HookList>,
        hooks: Arc<dyn HookList>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            settings,
            queries,
            hooks,
            registry,
        }
    }

    /// The operations to run right now. Reads every input fresh.
    pub fn resolve(&self) -> Vec<Operation> {
        let settings = read_settings(&self.settings);
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);

        let sync_hooks: Vec<Operation> = settings
            .sync_hooks()
            .iter()
            .map(|id| registry.bind(id))
            .collect();

        resolve_lists(
            &self.queries.list(),
            settings.query_candidates(),
            &self.hooks.list(),
            settings.hook_candidates(),
            sync_hooks,
        )
    }
}

/// Keep the entries of `live` that are listed in `candidates`, in `live` order.
pub fn intersect(live: &[Operation], candidates: &[OperationId]) -> Vec<Operation> {
    live.iter()
        .filter(|operation| operation.is_listed_in(candidates))
        .cloned()
        .collect()
}

/// Queries ∩ query candidates, then hooks ∩ hook candidates, then sync hooks.
pub fn resolve_lists(
    live_queries: &[Operation],
    query_candidates: &[OperationId],
    live_hooks: &[Operation],
    hook_candidates: &[OperationId],
    sync_hooks: Vec<Operation>,
) -> Vec<Operation> {
    let mut resolved = intersect(live_queries, query_candidates);
    resolved.extend(intersect(live_hooks, hook_candidates));
    resolved.extend(sync_hooks);
    resolved
}
