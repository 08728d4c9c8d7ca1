//! Host - the environment the sync mode runs inside
//!
//! Holds what the core treats as external: the two native shutdown lists
//! other components register with, the operation registry, the shared
//! execution mode and the timer table. Also runs the native shutdown
//! sequence that the trimmer prunes.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::command_operation;
use crate::config::Config;
use crate::engine::AutoSync;
use crate::executor::{invoke_isolated, ExecutionMode};
use crate::operation::{HookList, Operation, OperationId, OperationRegistry, SharedHookList};
use crate::passlog::{OperationRecord, PassReport};
use crate::resolver::SharedRegistry;
use crate::timers::TimerTable;

/// Outcome of the native shutdown sequence
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub queries: Vec<OperationRecord>,
    pub hooks: Vec<OperationRecord>,
}

impl ShutdownReport {
    pub fn failed_operations(&self) -> usize {
        self.queries
            .iter()
            .chain(&self.hooks)
            .filter(|record| record.is_failure())
            .count()
    }
}

pub struct Host {
    timers: TimerTable,
    shutdown_queries: SharedHookList,
    shutdown_hooks: SharedHookList,
    mode: ExecutionMode,
    registry: SharedRegistry,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    pub fn new() -> Self {
        Self {
            timers: TimerTable::new(),
            shutdown_queries: SharedHookList::new("shutdown-queries"),
            shutdown_hooks: SharedHookList::new("shutdown-hooks"),
            mode: ExecutionMode::new(),
            registry: Arc::new(RwLock::new(OperationRegistry::new())),
        }
    }

    /// Build a host with the configured command operations and registrations.
    pub fn from_config(config: &Config) -> Self {
        let host = Self::new();
        host.load_operations(config);

        for id in &config.host.shutdown_queries {
            host.shutdown_queries.register(host.bind(id));
        }
        for id in &config.host.shutdown_hooks {
            host.shutdown_hooks.register(host.bind(id));
        }

        info!(
            "Host ready: {} operations, {} shutdown queries, {} shutdown hooks",
            host.registry().read().unwrap_or_else(PoisonError::into_inner).len(),
            host.shutdown_queries.len(),
            host.shutdown_hooks.len()
        );
        host
    }

    /// Replace the registry contents with the configured command operations.
    pub fn load_operations(&self, config: &Config) {
        let mut registry = OperationRegistry::new();
        for (name, command) in &config.operations {
            registry.register(command_operation(name, command, self.mode.clone()));
        }
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = registry;
    }

    /// Make a named operation available to sync hooks and registrations.
    pub fn define(&self, operation: Operation) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(operation);
    }

    /// Entry for the host lists that looks `id` up in the registry each time it runs,
    /// so a reload that redefines the operation also changes what the entry does.
    fn bind(&self, id: &OperationId) -> Operation {
        let defined = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some();
        if !defined {
            warn!("Operation '{}' is registered with the host but not defined", id);
        }

        let registry = self.registry.clone();
        let name = id.clone();
        Operation::named(id.clone(), move || {
            let operation = registry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .bind(&name);
            operation.invoke()
        })
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerTable {
        &mut self.timers
    }

    pub fn shutdown_queries(&self) -> &SharedHookList {
        &self.shutdown_queries
    }

    pub fn shutdown_hooks(&self) -> &SharedHookList {
        &self.shutdown_hooks
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// User input happened at the current clock reading.
    pub fn record_activity(&mut self) {
        self.timers.record_activity();
    }

    /// Fire every timer due at the current clock reading, in deadline order.
    pub fn fire_due(&mut self, engine: &mut AutoSync) -> Vec<PassReport> {
        let mut reports = Vec::new();
        while let Some((id, action)) = self.timers.pop_due() {
            debug!("Timer {} fired: {:?}", id, action);
            if let Some(report) = engine.on_timer(action, &mut self.timers) {
                reports.push(report);
            }
        }
        reports
    }

    /// Advance the clock by `by`, stopping at every deadline on the way.
    pub fn run_for(&mut self, by: Duration, engine: &mut AutoSync) -> Vec<PassReport> {
        let until = self.timers.now() + by;
        let mut reports = self.fire_due(engine);

        while let Some(deadline) = self.timers.next_deadline().filter(|d| *d <= until) {
            self.timers.advance_to(deadline);
            reports.extend(self.fire_due(engine));
        }

        self.timers.advance_to(until);
        reports.extend(self.fire_due(engine));
        reports
    }

    /// The host's own exit path: confirmation queries, then shutdown hooks.
    pub fn run_shutdown_sequence(&self) -> ShutdownReport {
        let _silent = self.mode.silence();

        let queries: Vec<OperationRecord> = self
            .shutdown_queries
            .list()
            .iter()
            .map(invoke_isolated)
            .collect();
        for record in queries.iter().filter(|r| r.is_failure()) {
            warn!("Shutdown query {} declined; continuing shutdown", record.label);
        }

        let hooks: Vec<OperationRecord> = self
            .shutdown_hooks
            .list()
            .iter()
            .map(invoke_isolated)
            .collect();
        for record in hooks.iter().filter(|r| r.is_failure()) {
            warn!("Shutdown hook {} failed", record.label);
        }

        info!(
            "Shutdown sequence ran {} queries and {} hooks",
            queries.len(),
            hooks.len()
        );
        ShutdownReport { queries, hooks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use crate::executor::ModeFlags;
    use std::sync::Mutex;

    #[test]
    fn test_from_config_registers_host_lists() {
        let mut config = Config::default();
        config.operations.insert(
            "save-history".to_string(),
            CommandConfig {
                command: "true".to_string(),
                args: vec![],
                workdir: None,
            },
        );
        config.host.shutdown_hooks = vec![OperationId::from("save-history")];
        config.host.shutdown_queries = vec![OperationId::from("undefined-query")];

        let host = Host::from_config(&config);

        assert_eq!(host.shutdown_hooks().ids(), vec!["save-history"]);
        assert_eq!(host.shutdown_queries().ids(), vec!["undefined-query"]);
        assert!(host.shutdown_queries().list()[0].invoke().is_err());
    }

    #[test]
    fn test_registrations_follow_redefined_operations() {
        let mut config = Config::default();
        config.host.shutdown_hooks = vec![OperationId::from("late")];
        let host = Host::from_config(&config);

        let entry = host.shutdown_hooks().list()[0].clone();
        assert!(entry.invoke().is_err());

        host.define(Operation::named("late", || Ok(())));
        assert!(entry.invoke().is_ok());

        host.define(Operation::named("late", || anyhow::bail!("redefined")));
        let err = entry.invoke().unwrap_err();
        assert!(err.to_string().contains("redefined"));
    }

    #[test]
    fn test_shutdown_sequence_runs_queries_then_hooks_silently() {
        let host = Host::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (list, name) in [
            (host.shutdown_hooks(), "hook"),
            (host.shutdown_queries(), "query"),
        ] {
            let order = order.clone();
            let mode = host.mode().clone();
            list.register(Operation::named(name, move || {
                assert_eq!(mode.current(), ModeFlags::SILENT);
                order.lock().unwrap().push(name);
                Ok(())
            }));
        }

        let report = host.run_shutdown_sequence();

        assert_eq!(*order.lock().unwrap(), vec!["query", "hook"]);
        assert_eq!(report.failed_operations(), 0);
        assert_eq!(host.mode().current(), ModeFlags::default());
    }

    #[test]
    fn test_shutdown_sequence_isolates_failures() {
        let host = Host::new();
        host.shutdown_hooks()
            .register(Operation::named("broken", || anyhow::bail!("nope")));
        host.shutdown_hooks().register(Operation::named("fine", || Ok(())));

        let report = host.run_shutdown_sequence();

        assert_eq!(report.hooks.len(), 2);
        assert_eq!(report.failed_operations(), 1);
    }
}
