//! Command Operations - shell commands declared in the configuration
//!
//! Each configured command becomes a named operation. The command inherits
//! the host execution mode at the moment it runs: under silent mode its
//! standard streams are detached and the mode is exported through
//! environment variables for scripts that want to honour it.

use anyhow::{bail, Context};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::config::CommandConfig;
use crate::executor::ExecutionMode;
use crate::operation::Operation;

pub const ENV_SILENT: &str = "IDLESYNC_SILENT";
pub const ENV_NONINTERACTIVE: &str = "IDLESYNC_NONINTERACTIVE";
pub const ENV_FORCE_WRITE: &str = "IDLESYNC_FORCE_WRITE";

/// Build the operation that runs `declared` under the host's execution mode.
pub fn command_operation(name: &str, declared: &CommandConfig, mode: ExecutionMode) -> Operation {
    let name = name.to_string();
    let declared = declared.clone();

    Operation::named(name.clone(), move || {
        let flags = mode.current();
        let mut command = Command::new(&declared.command);
        command.args(&declared.args);

        if let Some(workdir) = &declared.workdir {
            command.current_dir(workdir);
        }
        if !flags.status_messages {
            command
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .env(ENV_SILENT, "1");
        }
        if !flags.interactive {
            command.stdin(Stdio::null()).env(ENV_NONINTERACTIVE, "1");
        }
        if flags.ignore_mtime_conflicts {
            command.env(ENV_FORCE_WRITE, "1");
        }

        debug!("Running command for {}: {} {:?}", name, declared.command, declared.args);
        let status = command
            .status()
            .with_context(|| format!("Failed to start '{}'", declared.command))?;

        if !status.success() {
            bail!("'{}' exited with {}", declared.command, status);
        }
        Ok(())
    })
}
