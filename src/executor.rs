//! Sync Executor - runs one sync pass
//!
//! A pass resolves the eligible operations, enters the silent execution
//! mode, and invokes each operation in order. Every operation is timed and
//! logged whether it returns an error, panics or succeeds; a failure never
//! stops the operations after it.

use chrono::Local;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::operation::Operation;
use crate::passlog::{OperationOutcome, OperationRecord, PassLog, PassReport};
use crate::resolver::OperationResolver;

/// Interaction flags operations consult while they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFlags {
    /// Operations may wait for user input
    pub interactive: bool,
    /// Operations should ask before destructive steps
    pub confirm_prompts: bool,
    /// Operations may print progress messages
    pub status_messages: bool,
    /// Writes go ahead even if the target changed since it was read
    pub ignore_mtime_conflicts: bool,
}

impl ModeFlags {
    pub const SILENT: ModeFlags = ModeFlags {
        interactive: false,
        confirm_prompts: false,
        status_messages: false,
        ignore_mtime_conflicts: true,
    };
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            interactive: true,
            confirm_prompts: true,
            status_messages: true,
            ignore_mtime_conflicts: false,
        }
    }
}

/// Host-wide execution mode shared with the operations
#[derive(Clone, Default)]
pub struct ExecutionMode {
    flags: Arc<Mutex<ModeFlags>>,
}

impl ExecutionMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ModeFlags {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, flags: ModeFlags) {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner) = flags;
    }

    /// Switch to silent mode until the returned scope is dropped.
    pub fn silence(&self) -> SilentScope {
        let previous = self.current();
        self.set(ModeFlags::SILENT);
        SilentScope {
            mode: self.clone(),
            previous,
        }
    }
}

/// Restores the previous execution mode on drop, including during unwinding
pub struct SilentScope {
    mode: ExecutionMode,
    previous: ModeFlags,
}

impl Drop for SilentScope {
    fn drop(&mut self) {
        self.mode.set(self.previous);
    }
}

/// Runs sync passes and keeps their log
pub struct SyncExecutor {
    resolver: OperationResolver,
    mode: ExecutionMode,
    log: PassLog,
}

impl SyncExecutor {
    pub fn new(resolver: OperationResolver, mode: ExecutionMode, log: PassLog) -> Self {
        Self {
            resolver,
            mode,
            log,
        }
    }

    pub fn resolver(&self) -> &OperationResolver {
        &self.resolver
    }

    pub fn log(&self) -> &PassLog {
        &self.log
    }

    /// Run every currently eligible operation once.
    pub fn run_pass(&mut self) -> PassReport {
        let operations = self.resolver.resolve();
        info!("Syncing...");

        let started_at = Local::now();
        let pass_start = Instant::now();
        self.log.start_pass(&started_at, operations.len());

        let records = {
            let _silent = self.mode.silence();
            operations
                .iter()
                .map(|operation| self.run_operation(operation))
                .collect::<Vec<_>>()
        };

        let report = PassReport {
            started_at,
            duration: pass_start.elapsed(),
            records,
        };

        if report.failed_operations() > 0 {
            warn!(
                "Sync pass finished with {} of {} operations failing",
                report.failed_operations(),
                report.records.len()
            );
        }
        info!("Syncing...done ({:.2}s)", report.duration.as_secs_f64());

        self.log.finish_pass(report.clone());
        report
    }

    fn run_operation(&mut self, operation: &Operation) -> OperationRecord {
        self.log.start_operation(operation.label());
        debug!("Running operation {}", operation.label());

        let record = invoke_isolated(operation);
        if let OperationOutcome::Failed(error) = &record.outcome {
            warn!("Operation {} failed: {}", record.label, error);
        }

        self.log.finish_operation(&record);
        record
    }
}

/// Invoke an operation, timing it and turning errors and panics into a record.
pub fn invoke_isolated(operation: &Operation) -> OperationRecord {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| operation.invoke()));
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(Ok(())) => OperationOutcome::Completed,
        Ok(Err(e)) => OperationOutcome::Failed(format!("{:#}", e)),
        Err(payload) => OperationOutcome::Failed(panic_message(payload.as_ref())),
    };

    OperationRecord {
        label: operation.label().to_string(),
        elapsed,
        outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
