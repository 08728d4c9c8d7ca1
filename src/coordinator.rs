//! Timer Coordinator - decides when sync passes happen
//!
//! The coordinator owns two timer slots, one idle timer and one periodic
//! timer, and reconciles them against the current delays every time it is
//! invoked. Reconciliation is a small state machine:
//!
//! - [`CoordinatorState::IdleOnly`] when `idle_delay >= periodic_delay`
//!   (a zero periodic delay always lands here). A repeating idle timer calls
//!   back into reconciliation, which runs the pass once idleness reaches
//!   `idle_delay`.
//! - [`CoordinatorState::PeriodicWithPendingOneShot`] when the periodic timer
//!   ticked and a one-shot idle timer was armed to run the pass after
//!   `idle_delay` of inactivity.
//! - [`CoordinatorState::PeriodicWaiting`] when the periodic timer was just
//!   armed, or the tick was skipped because the user has been idle longer
//!   than a whole period (the pass for that stretch already ran).
//!
//! Timers that already match the wanted configuration are left alone.

use std::time::Duration;
use tracing::{debug, info};

use crate::config::{read_settings, SharedSettings};
use crate::timers::{TimerAction, TimerHost, TimerId, Trigger};

/// Mode the coordinator settled in at its last reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Disabled,
    IdleOnly,
    PeriodicWaiting,
    PeriodicWithPendingOneShot,
}

/// What one reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The mode is off; nothing was touched
    Inactive,
    /// Idle-only: the matching idle timer fired with enough idleness; run a pass
    FirePass,
    /// Idle-only: a fresh repeating idle timer was armed
    ArmedIdleTimer,
    /// Periodic: the periodic timer was (re)armed
    ArmedPeriodicTimer,
    /// Periodic: a one-shot idle timer was armed to run the pass
    ArmedOneShot,
    /// Periodic: idle for longer than a period, tick skipped
    SkippedLongIdle,
}

impl Reconciliation {
    pub fn fires_pass(&self) -> bool {
        matches!(self, Reconciliation::FirePass)
    }

    pub fn state(&self) -> CoordinatorState {
        match self {
            Reconciliation::Inactive => CoordinatorState::Disabled,
            Reconciliation::FirePass | Reconciliation::ArmedIdleTimer => {
                CoordinatorState::IdleOnly
            }
            Reconciliation::ArmedPeriodicTimer | Reconciliation::SkippedLongIdle => {
                CoordinatorState::PeriodicWaiting
            }
            Reconciliation::ArmedOneShot => CoordinatorState::PeriodicWithPendingOneShot,
        }
    }
}

pub struct TimerCoordinator {
    settings: SharedSettings,
    idle_timer: Option<TimerId>,
    periodic_timer: Option<TimerId>,
    enabled: bool,
    state: CoordinatorState,
}

impl TimerCoordinator {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            settings,
            idle_timer: None,
            periodic_timer: None,
            enabled: false,
            state: CoordinatorState::Disabled,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn idle_timer(&self) -> Option<TimerId> {
        self.idle_timer
    }

    pub fn periodic_timer(&self) -> Option<TimerId> {
        self.periodic_timer
    }

    /// Turn the mode on and arm the first timer.
    pub fn enable<H: TimerHost + ?Sized>(&mut self, host: &mut H) -> Reconciliation {
        self.enabled = true;
        let outcome = self.reconcile(host);
        info!("Sync timers enabled ({:?})", self.state);
        outcome
    }

    /// Turn the mode off and cancel both timers. A running pass is not affected.
    pub fn disable<H: TimerHost + ?Sized>(&mut self, host: &mut H) {
        self.cancel_idle(host);
        self.cancel_periodic(host);
        self.enabled = false;
        self.state = CoordinatorState::Disabled;
        info!("Sync timers disabled");
    }

    /// Re-evaluate the timers against the current delays and idle time.
    pub fn reconcile<H: TimerHost + ?Sized>(&mut self, host: &mut H) -> Reconciliation {
        if !self.enabled {
            return Reconciliation::Inactive;
        }

        let (idle_delay, periodic_delay) = {
            let settings = read_settings(&self.settings);
            (settings.idle_delay(), settings.periodic_delay())
        };
        let idle = host.idle_time();

        let outcome = if idle_delay >= periodic_delay {
            self.cancel_periodic(host);

            if self.idle_timer_matches(host, idle_delay) && idle >= idle_delay {
                Reconciliation::FirePass
            } else {
                self.cancel_idle(host);
                self.idle_timer =
                    Some(host.run_when_idle(idle_delay, true, TimerAction::Reconcile));
                Reconciliation::ArmedIdleTimer
            }
        } else {
            self.cancel_idle(host);

            if self.periodic_timer_matches(host, periodic_delay) {
                if idle > periodic_delay {
                    Reconciliation::SkippedLongIdle
                } else {
                    self.idle_timer =
                        Some(host.run_when_idle(idle_delay, false, TimerAction::RunPass));
                    Reconciliation::ArmedOneShot
                }
            } else {
                self.cancel_periodic(host);
                self.periodic_timer = Some(host.run_every(periodic_delay, TimerAction::Reconcile));
                Reconciliation::ArmedPeriodicTimer
            }
        };

        debug!(
            "Reconciled: idle={:.1}s idle_delay={:?} periodic_delay={:?} -> {:?}",
            idle.as_secs_f64(),
            idle_delay,
            periodic_delay,
            outcome
        );
        self.state = outcome.state();
        outcome
    }

    fn idle_timer_matches<H: TimerHost + ?Sized>(&self, host: &H, delay: Duration) -> bool {
        self.idle_timer
            .and_then(|id| host.status(id))
            .is_some_and(|status| {
                status.trigger == Trigger::Idle { delay, repeat: true }
                    && status.action == TimerAction::Reconcile
            })
    }

    fn periodic_timer_matches<H: TimerHost + ?Sized>(
        &self,
        host: &H,
        interval: Duration,
    ) -> bool {
        self.periodic_timer
            .and_then(|id| host.status(id))
            .is_some_and(|status| {
                status.trigger == Trigger::Interval { interval }
                    && status.action == TimerAction::Reconcile
            })
    }

    fn cancel_idle<H: TimerHost + ?Sized>(&mut self, host: &mut H) {
        if let Some(id) = self.idle_timer.take() {
            host.cancel(id);
        }
    }

    fn cancel_periodic<H: TimerHost + ?Sized>(&mut self, host: &mut H) {
        if let Some(id) = self.periodic_timer.take() {
            host.cancel(id);
        }
    }
}
