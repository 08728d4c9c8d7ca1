mod common;

use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use idlesync::config::write_settings;
use idlesync::timers::TimerHost;
use idlesync::{AutoSync, CoordinatorState, Host, OperationId, PassLog, SyncSettings};

use common::{count, counting_operation};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Host with one counting sync hook and an engine over it, already enabled
fn enabled_setup(idle: Duration, periodic: Duration) -> (Host, AutoSync, Arc<AtomicUsize>) {
    let mut host = Host::new();
    let (operation, runs) = counting_operation("save");
    host.define(operation);

    let mut settings = SyncSettings::new(idle, periodic);
    settings.set_sync_hooks(vec![OperationId::from("save")]);
    let mut engine = AutoSync::new(settings.shared(), &host, PassLog::in_memory(100));
    engine.enable(host.timers_mut());

    (host, engine, runs)
}

#[quickcheck]
fn idle_delay_not_below_periodic_never_arms_periodic(
    idle: u8,
    periodic: u8,
    steps: Vec<(u8, bool)>,
) -> TestResult {
    if idle < periodic {
        return TestResult::discard();
    }

    let (mut host, mut engine, _) = enabled_setup(secs(idle as u64), secs(periodic as u64));

    for (advance, active) in steps {
        host.run_for(secs(advance as u64), &mut engine);
        if active {
            host.record_activity();
        }
        if host.timers().armed().any(|(_, status)| !status.is_idle()) {
            return TestResult::failed();
        }
        if engine.coordinator().periodic_timer().is_some() {
            return TestResult::failed();
        }
    }

    TestResult::passed()
}

#[test]
fn test_long_idle_stretch_runs_one_pass() {
    let (mut host, mut engine, runs) = enabled_setup(secs(30), secs(60));
    assert_eq!(engine.state(), CoordinatorState::PeriodicWaiting);

    host.run_for(secs(50), &mut engine);
    host.record_activity();

    // Tick at 60s sees 10s of idleness and arms the one-shot for 80s
    host.run_for(secs(10), &mut engine);
    assert_eq!(engine.state(), CoordinatorState::PeriodicWithPendingOneShot);
    assert_eq!(count(&runs), 0);

    host.run_for(secs(20), &mut engine);
    assert_eq!(count(&runs), 1);

    // An hour more of idleness: every tick is skipped
    host.run_for(secs(3600), &mut engine);
    assert_eq!(count(&runs), 1);
    assert_eq!(engine.state(), CoordinatorState::PeriodicWaiting);
}

#[test]
fn test_activity_starts_a_new_stretch() {
    let (mut host, mut engine, runs) = enabled_setup(secs(30), secs(60));

    host.run_for(secs(50), &mut engine);
    host.record_activity();
    host.run_for(secs(600), &mut engine);
    assert_eq!(count(&runs), 1);

    // Clock is at 650s; the next tick at 660s sees 10s of idleness
    host.record_activity();
    host.run_for(secs(29), &mut engine);
    assert_eq!(count(&runs), 1);
    host.run_for(secs(1), &mut engine);
    assert_eq!(count(&runs), 2);
}

#[test]
fn test_idle_only_does_not_repeat_within_a_stretch() {
    let (mut host, mut engine, runs) = enabled_setup(secs(30), Duration::ZERO);
    assert_eq!(engine.state(), CoordinatorState::IdleOnly);

    host.run_for(secs(3600), &mut engine);
    assert_eq!(count(&runs), 1);

    host.record_activity();
    host.run_for(secs(30), &mut engine);
    assert_eq!(count(&runs), 2);
}

#[test]
fn test_delay_change_applies_at_next_reconciliation() {
    let (mut host, mut engine, runs) = enabled_setup(secs(30), Duration::ZERO);
    let old_timer = engine.coordinator().idle_timer();

    host.run_for(secs(5), &mut engine);
    write_settings(engine.settings()).set_idle_delay(secs(10));
    assert!(engine.reconcile(host.timers_mut()).is_none());

    let new_timer = engine.coordinator().idle_timer();
    assert_ne!(new_timer, old_timer);
    let status = host.timers().status(new_timer.unwrap()).unwrap();
    assert_eq!(status.interval(), secs(10));

    host.run_for(secs(4), &mut engine);
    assert_eq!(count(&runs), 0);
    host.run_for(secs(1), &mut engine);
    assert_eq!(count(&runs), 1);
}

#[test]
fn test_switching_to_periodic_at_runtime() {
    let (mut host, mut engine, _) = enabled_setup(secs(30), Duration::ZERO);

    write_settings(engine.settings()).set_periodic_delay(secs(60));
    engine.reconcile(host.timers_mut());

    assert_eq!(engine.state(), CoordinatorState::PeriodicWaiting);
    assert!(engine.coordinator().idle_timer().is_none());
    assert!(engine.coordinator().periodic_timer().is_some());
    assert_eq!(host.timers().armed_count(), 1);
}

#[test]
fn test_unchanged_delay_keeps_armed_since() {
    let (mut host, mut engine, _) = enabled_setup(secs(30), secs(60));
    let periodic = engine.coordinator().periodic_timer().unwrap();

    for _ in 0..5 {
        host.run_for(secs(60), &mut engine);
        host.record_activity();
    }

    assert_eq!(engine.coordinator().periodic_timer(), Some(periodic));
    let status = host.timers().status(periodic).unwrap();
    assert_eq!(status.armed_since, Duration::ZERO);
}

#[test]
fn test_stretch_starting_mid_period_still_syncs() {
    let (mut host, mut engine, runs) = enabled_setup(secs(30), secs(60));

    host.run_for(secs(15), &mut engine);
    host.record_activity();

    // Tick at 60s finds 45s of idleness, already past idle_delay
    host.run_for(secs(45), &mut engine);
    assert_eq!(count(&runs), 1);

    host.run_for(secs(3600), &mut engine);
    assert_eq!(count(&runs), 1);
}

#[test]
fn test_disable_cancels_everything() {
    let (mut host, mut engine, runs) = enabled_setup(secs(30), secs(60));
    host.run_for(secs(50), &mut engine);
    host.record_activity();
    host.run_for(secs(10), &mut engine);
    assert_eq!(host.timers().armed_count(), 2);

    engine.disable(host.timers_mut());

    assert_eq!(host.timers().armed_count(), 0);
    host.run_for(secs(600), &mut engine);
    assert_eq!(count(&runs), 0);
}
