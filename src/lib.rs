//! idlesync - Idle-time Sync Daemon
//!
//! idlesync runs an ordered set of "sync" operations (history saves, cache
//! flushes, snapshot writers) while the user is idle, instead of leaving them
//! all for the moment the host shuts down. Operations that already ran can be
//! dropped from the host's shutdown lists so that exit stays fast.
//!
//! ## Core Features
//!
//! - **Idle Scheduling**: a pass fires once the user has been idle long enough
//! - **Periodic Checks**: an optional slower timer catches long idle stretches
//! - **Failure Isolation**: one failing operation never stops the rest of a pass
//! - **Faster Shutdown**: pre-empted operations are trimmed before exit
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`config`]: Configuration management, duration parsing and runtime settings
//! - [`operation`]: Operations, the registry and host shutdown lists
//! - [`resolver`]: Which operations a pass runs
//! - [`executor`]: Running a pass in silent mode
//! - [`timers`]: Idle and interval timer primitives
//! - [`coordinator`]: Keeping the timers in step with the settings
//! - [`trimmer`]: Pruning the shutdown lists
//! - [`engine`]: The sync mode as a whole
//! - [`daemon`]: Real-time driver with signal handling

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod engine;
pub mod executor;
pub mod host;
pub mod operation;
pub mod passlog;
pub mod resolver;
pub mod timers;
pub mod trimmer;

pub use config::{Config, SharedSettings, SyncSettings};
pub use coordinator::{CoordinatorState, Reconciliation, TimerCoordinator};
pub use daemon::{Daemon, DaemonEvent, DaemonHandle};
pub use engine::AutoSync;
pub use executor::{ExecutionMode, ModeFlags, SyncExecutor};
pub use host::{Host, ShutdownReport};
pub use operation::{HookList, Operation, OperationId, OperationRegistry, SharedHookList};
pub use passlog::{OperationOutcome, OperationRecord, PassLog, PassReport};
pub use resolver::OperationResolver;
pub use timers::{TimerAction, TimerHost, TimerTable};
pub use trimmer::{ShutdownTrimmer, TrimReport};
