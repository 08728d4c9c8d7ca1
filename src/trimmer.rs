//! Shutdown Trimmer - drops already-synced work from the host shutdown lists
//!
//! With `faster_shutdown` on, anything the sync passes already cover is
//! removed from the host's native shutdown lists right before shutdown, so
//! exit does not repeat it.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{read_settings, SharedSettings};
use crate::operation::{HookList, OperationId};

/// Ids removed by one trim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub queries_removed: Vec<OperationId>,
    pub hooks_removed: Vec<OperationId>,
}

impl TrimReport {
    pub fn is_empty(&self) -> bool {
        self.queries_removed.is_empty() && self.hooks_removed.is_empty()
    }
}

pub struct ShutdownTrimmer {
    settings: SharedSettings,
    queries: Arc<dyn HookList>,
    hooks: Arc<dyn HookList>,
}

impl ShutdownTrimmer {
    pub fn new(
        settings: SharedSettings,
        queries: Arc<dyn HookList>,
        hooks: Arc<dyn HookList>,
    ) -> Self {
        Self {
            settings,
            queries,
            hooks,
        }
    }

    /// Remove pre-empted entries when faster shutdown is on. Safe to repeat.
    pub fn trim_before_shutdown(&self) -> TrimReport {
        let settings = read_settings(&self.settings);
        if !settings.faster_shutdown() {
            debug!("Faster shutdown disabled, leaving shutdown lists untouched");
            return TrimReport::default();
        }

        let queries_removed = remove_all(self.queries.as_ref(), settings.query_candidates());

        let hook_ids: Vec<OperationId> = settings
            .hook_candidates()
            .iter()
            .chain(settings.sync_hooks())
            .cloned()
            .collect();
        let hooks_removed = remove_all(self.hooks.as_ref(), &hook_ids);

        let report = TrimReport {
            queries_removed,
            hooks_removed,
        };
        if !report.is_empty() {
            info!(
                "Trimmed {} shutdown queries and {} shutdown hooks",
                report.queries_removed.len(),
                report.hooks_removed.len()
            );
        }
        report
    }
}

fn remove_all(list: &dyn HookList, ids: &[OperationId]) -> Vec<OperationId> {
    let mut removed = Vec::new();
    for id in ids {
        if list.remove(id) {
            debug!("Removed {} from shutdown list", id);
            removed.push(id.clone());
        }
    }
    removed
}
