//! Timer primitives - idle and interval timers over an external clock
//!
//! [`TimerHost`] is what the coordinator needs from its environment: the
//! current idle duration plus cancelable idle/interval timers that report
//! how they are configured. [`TimerTable`] implements it without owning a
//! clock; the caller moves time forward and pops due timers one at a time.
//! The daemon feeds it real elapsed time, tests feed it virtual time.
//!
//! Idle timers follow the usual editor-host rule: a timer fires when
//! continuous idleness reaches its delay, and a repeating one fires once per
//! idle stretch. A timer armed while idleness already exceeds its delay is
//! due at once.

use std::collections::BTreeMap;
use std::time::Duration;

/// Identifier of an armed timer; never reused
pub type TimerId = u64;

/// Shortest interval an interval timer may use
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What the owner should do when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Run the reconciliation procedure
    Reconcile,
    /// Run a sync pass directly
    RunPass,
}

/// When a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Idle { delay: Duration, repeat: bool },
    Interval { interval: Duration },
}

/// Reported configuration of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    pub trigger: Trigger,
    pub action: TimerAction,
    /// Clock reading when the timer was armed
    pub armed_since: Duration,
}

impl TimerStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self.trigger, Trigger::Idle { .. })
    }

    pub fn interval(&self) -> Duration {
        match self.trigger {
            Trigger::Idle { delay, .. } => delay,
            Trigger::Interval { interval } => interval,
        }
    }

    pub fn repeats(&self) -> bool {
        match self.trigger {
            Trigger::Idle { repeat, .. } => repeat,
            Trigger::Interval { .. } => true,
        }
    }
}

/// Timer and idle-time primitives supplied by the host
pub trait TimerHost {
    /// How long the user has been continuously inactive.
    fn idle_time(&self) -> Duration;

    /// Fire after `delay` of continuous inactivity, once per idle stretch if `repeat`.
    fn run_when_idle(&mut self, delay: Duration, repeat: bool, action: TimerAction) -> TimerId;

    /// Fire every `interval`, starting `interval` from now.
    fn run_every(&mut self, interval: Duration, action: TimerAction) -> TimerId;

    /// Cancel a timer; unknown or already finished ids are ignored.
    fn cancel(&mut self, id: TimerId);

    /// Configuration of the timer if it is still armed.
    fn status(&self, id: TimerId) -> Option<TimerStatus>;
}

#[derive(Debug, Clone)]
enum Schedule {
    /// `spent` means a repeating timer already fired in this idle stretch
    Idle { spent: bool },
    Interval { next_due: Duration },
}

#[derive(Debug, Clone)]
struct Entry {
    status: TimerStatus,
    schedule: Schedule,
}

/// Deterministic timer table driven by an externally advanced clock
#[derive(Debug, Clone, Default)]
pub struct TimerTable {
    now: Duration,
    last_activity: Duration,
    next_id: TimerId,
    timers: BTreeMap<TimerId, Entry>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock reading.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock to `now`; the clock never runs backwards.
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    /// User input happened now; idle timers become eligible again.
    pub fn record_activity(&mut self) {
        self.last_activity = self.now;
        for entry in self.timers.values_mut() {
            if let Schedule::Idle { spent } = &mut entry.schedule {
                *spent = false;
            }
        }
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    pub fn armed(&self) -> impl Iterator<Item = (TimerId, &TimerStatus)> {
        self.timers.iter().map(|(id, entry)| (*id, &entry.status))
    }

    fn due_at(&self, entry: &Entry) -> Option<Duration> {
        match (&entry.schedule, entry.status.trigger) {
            (Schedule::Idle { spent: false }, Trigger::Idle { delay, .. }) => self
                .last_activity
                .checked_add(delay)
                .map(|due| due.max(entry.status.armed_since)),
            (Schedule::Idle { spent: true }, _) => None,
            (Schedule::Interval { next_due }, _) => Some(*next_due),
            (Schedule::Idle { .. }, Trigger::Interval { .. }) => None,
        }
    }

    /// The earliest clock reading at which some timer is due.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers
            .values()
            .filter_map(|entry| self.due_at(entry))
            .min()
    }

    /// Take the earliest due timer, rescheduling or retiring it.
    ///
    /// Callers pop one timer, run its action, then pop again, so that an
    /// action can cancel or replace timers that are also due.
    pub fn pop_due(&mut self) -> Option<(TimerId, TimerAction)> {
        let (id, _) = self
            .timers
            .iter()
            .filter_map(|(id, entry)| self.due_at(entry).map(|due| (*id, due)))
            .filter(|(_, due)| *due <= self.now)
            .min_by_key(|(id, due)| (*due, *id))?;

        let now = self.now;
        let entry = self.timers.get_mut(&id)?;
        let action = entry.status.action;

        let retire = match (&mut entry.schedule, entry.status.trigger) {
            (Schedule::Interval { next_due }, Trigger::Interval { interval }) => {
                let interval = interval.max(MIN_INTERVAL);
                *next_due = next_due.saturating_add(interval);
                if *next_due <= now {
                    // Missed ticks collapse into this one
                    *next_due = now.saturating_add(interval);
                }
                false
            }
            (Schedule::Idle { spent }, Trigger::Idle { repeat: true, .. }) => {
                *spent = true;
                false
            }
            _ => true,
        };

        if retire {
            self.timers.remove(&id);
        }

        Some((id, action))
    }

    fn insert(&mut self, status: TimerStatus, schedule: Schedule) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.timers.insert(id, Entry { status, schedule });
        id
    }
}

impl TimerHost for TimerTable {
    fn idle_time(&self) -> Duration {
        self.now.saturating_sub(self.last_activity)
    }

    fn run_when_idle(&mut self, delay: Duration, repeat: bool, action: TimerAction) -> TimerId {
        let status = TimerStatus {
            trigger: Trigger::Idle { delay, repeat },
            action,
            armed_since: self.now,
        };
        self.insert(status, Schedule::Idle { spent: false })
    }

    fn run_every(&mut self, interval: Duration, action: TimerAction) -> TimerId {
        let status = TimerStatus {
            trigger: Trigger::Interval { interval },
            action,
            armed_since: self.now,
        };
        let next_due = self.now.saturating_add(interval.max(MIN_INTERVAL));
        self.insert(status, Schedule::Interval { next_due })
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    fn status(&self, id: TimerId) -> Option<TimerStatus> {
        self.timers.get(&id).map(|entry| entry.status)
    }
}
