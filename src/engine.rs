//! AutoSync - the sync mode as a whole
//!
//! Wires the coordinator, executor and trimmer to one set of shared
//! settings and one host. Timer callbacks come in through [`AutoSync::on_timer`];
//! whatever pass they trigger runs synchronously before the call returns.

use std::sync::Arc;
use tracing::debug;

use crate::config::SharedSettings;
use crate::coordinator::{CoordinatorState, Reconciliation, TimerCoordinator};
use crate::executor::SyncExecutor;
use crate::host::Host;
use crate::operation::{HookList, Operation};
use crate::passlog::{PassLog, PassReport};
use crate::resolver::OperationResolver;
use crate::timers::{TimerAction, TimerHost};
use crate::trimmer::{ShutdownTrimmer, TrimReport};

pub struct AutoSync {
    settings: SharedSettings,
    coordinator: TimerCoordinator,
    executor: SyncExecutor,
    trimmer: ShutdownTrimmer,
}

impl AutoSync {
    /// Build the mode over `host`'s lists and registry. The mode starts disabled.
    pub fn new(settings: SharedSettings, host: &Host, log: PassLog) -> Self {
        let queries: Arc<dyn HookList> = Arc::new(host.shutdown_queries().clone());
        let hooks: Arc<dyn HookList> = Arc::new(host.shutdown_hooks().clone());

        let resolver = OperationResolver::new(
            settings.clone(),
            queries.clone(),
            hooks.clone(),
            host.registry().clone(),
        );

        Self {
            coordinator: TimerCoordinator::new(settings.clone()),
            executor: SyncExecutor::new(resolver, host.mode().clone(), log),
            trimmer: ShutdownTrimmer::new(settings.clone(), queries, hooks),
            settings,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.coordinator.is_enabled()
    }

    pub fn coordinator(&self) -> &TimerCoordinator {
        &self.coordinator
    }

    pub fn pass_log(&self) -> &PassLog {
        self.executor.log()
    }

    pub fn enable<H: TimerHost + ?Sized>(&mut self, timers: &mut H) -> Reconciliation {
        self.coordinator.enable(timers)
    }

    pub fn disable<H: TimerHost + ?Sized>(&mut self, timers: &mut H) {
        self.coordinator.disable(timers);
    }

    /// Reconcile now, running a pass if reconciliation asks for one.
    pub fn reconcile<H: TimerHost + ?Sized>(&mut self, timers: &mut H) -> Option<PassReport> {
        if self.coordinator.reconcile(timers).fires_pass() {
            Some(self.executor.run_pass())
        } else {
            None
        }
    }

    /// Dispatch a fired timer.
    pub fn on_timer<H: TimerHost + ?Sized>(
        &mut self,
        action: TimerAction,
        timers: &mut H,
    ) -> Option<PassReport> {
        match action {
            TimerAction::Reconcile => self.reconcile(timers),
            TimerAction::RunPass => {
                if !self.coordinator.is_enabled() {
                    debug!("Ignoring pass timer while disabled");
                    return None;
                }
                Some(self.executor.run_pass())
            }
        }
    }

    /// Run a pass immediately, independent of the timers.
    pub fn run_pass(&mut self) -> PassReport {
        self.executor.run_pass()
    }

    /// The operations a pass would run right now.
    pub fn resolve(&self) -> Vec<Operation> {
        self.executor.resolver().resolve()
    }

    /// Pre-shutdown entry point; prunes the host shutdown lists.
    pub fn before_shutdown(&self) -> TrimReport {
        self.trimmer.trim_before_shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::operation::OperationId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn counting_setup(idle: u64, periodic: u64) -> (Host, AutoSync, Arc<AtomicUsize>) {
        let host = Host::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        host.define(Operation::named("save", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let mut settings = SyncSettings::new(secs(idle), secs(periodic));
        settings.set_sync_hooks(vec![OperationId::from("save")]);
        let engine = AutoSync::new(settings.shared(), &host, PassLog::in_memory(10));
        (host, engine, runs)
    }

    #[test]
    fn test_idle_only_pass_after_idle_delay() {
        let (mut host, mut engine, runs) = counting_setup(30, 0);
        engine.enable(host.timers_mut());

        host.run_for(secs(29), &mut engine);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let reports = host.run_for(secs(1), &mut engine);
        assert_eq!(reports.len(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pass_log().len(), 1);
    }

    #[test]
    fn test_stray_pass_timer_ignored_when_disabled() {
        let (mut host, mut engine, runs) = counting_setup(5, 60);

        assert!(engine.on_timer(TimerAction::RunPass, host.timers_mut()).is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disable_stops_passes() {
        let (mut host, mut engine, runs) = counting_setup(30, 0);
        engine.enable(host.timers_mut());
        engine.disable(host.timers_mut());

        host.run_for(secs(600), &mut engine);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(host.timers().armed_count(), 0);
    }

    #[test]
    fn test_manual_pass_and_resolve() {
        let (_host, mut engine, runs) = counting_setup(30, 0);

        let labels: Vec<String> = engine
            .resolve()
            .iter()
            .map(|op| op.label().to_string())
            .collect();
        assert_eq!(labels, vec!["save"]);

        engine.run_pass();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
