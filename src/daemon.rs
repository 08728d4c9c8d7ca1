//! Daemon Infrastructure - drives the sync mode in real time
//!
//! One task owns the host and the engine. It sleeps until the next timer
//! deadline or the next event, whichever comes first, then fires due timers
//! one at a time. Signals are only forwarded as events:
//!
//! - SIGUSR1: user activity (`idlesync touch`)
//! - SIGHUP: reload configuration (`idlesync reload`)
//! - SIGINT / SIGTERM: shut down (`idlesync stop`)
//!
//! On shutdown the timers are cancelled, the shutdown lists are trimmed and
//! the host's native shutdown sequence runs.

use crate::config::{write_settings, SyncSettings};
use crate::engine::AutoSync;
use crate::host::{Host, ShutdownReport};
use crate::passlog::{PassLog, PassReport};
use crate::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Events the daemon loop reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonEvent {
    Activity,
    Reload,
    Shutdown,
}

/// Cloneable sender for daemon events
#[derive(Clone)]
pub struct DaemonHandle {
    sender: mpsc::UnboundedSender<DaemonEvent>,
}

impl DaemonHandle {
    pub fn touch(&self) -> bool {
        self.sender.send(DaemonEvent::Activity).is_ok()
    }

    pub fn reload(&self) -> bool {
        self.sender.send(DaemonEvent::Reload).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.sender.send(DaemonEvent::Shutdown).is_ok()
    }
}

/// Daemon state and control
pub struct Daemon {
    config: Config,
    config_path: Option<PathBuf>,
    host: Host,
    engine: AutoSync,
    pid_file_path: Option<PathBuf>,
    events: Option<mpsc::UnboundedReceiver<DaemonEvent>>,
    handle: DaemonHandle,
    started: Instant,
}

impl Daemon {
    /// Create a new daemon instance; `config_path` is re-read on reload.
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let settings = SyncSettings::from_config(&config)
            .context("Failed to build sync settings for daemon")?
            .shared();
        let host = Host::from_config(&config);

        let log = if config.daemon.pass_log.is_empty() {
            PassLog::in_memory(config.daemon.pass_log_capacity)
        } else {
            PassLog::with_file(config.daemon.pass_log_capacity, &config.daemon.pass_log)
        };
        let engine = AutoSync::new(settings, &host, log);

        let pid_file_path = pid_file_path(&config)?;

        let (sender, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            config_path,
            host,
            engine,
            pid_file_path,
            events: Some(receiver),
            handle: DaemonHandle { sender },
            started: Instant::now(),
        })
    }

    pub fn handle(&self) -> DaemonHandle {
        self.handle.clone()
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn engine(&self) -> &AutoSync {
        &self.engine
    }

    /// Start the daemon in the foreground with signal handling and a PID file
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting idlesync daemon");

        self.write_pid_file().context("Failed to write PID file")?;

        let handle = self.handle();
        tokio::spawn(async move {
            if let Err(e) = forward_signals(handle).await {
                error!("Signal handling stopped: {:?}", e);
            }
        });

        let result = self.serve().await;

        self.cleanup().context("Failed to cleanup daemon")?;

        result.map(|_| ())
    }

    /// Start the daemon as a background service (Unix platforms)
    #[cfg(unix)]
    pub fn daemonize(&self) -> Result<()> {
        use daemonize::Daemonize;

        let log_file = if !self.config.daemon.log_file.is_empty() {
            let expanded_path = shellexpand::full(&self.config.daemon.log_file)
                .context("Failed to expand log file path")?;
            let path = PathBuf::from(expanded_path.as_ref());
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            Some(fs::File::create(&path).context("Failed to create log file")?)
        } else {
            None
        };

        let mut daemonize = Daemonize::new();

        if let Some(log_file) = log_file {
            daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
        }

        daemonize.start().context("Failed to daemonize process")?;

        info!("idlesync daemon started as background service");
        Ok(())
    }

    /// Enable the mode, run the event loop until shutdown, then shut down the host.
    pub async fn serve(&mut self) -> Result<ShutdownReport> {
        let mut events = self
            .events
            .take()
            .context("Daemon event loop already started")?;

        self.advance_clock();
        let outcome = self.engine.enable(self.host.timers_mut());
        debug!("Initial reconciliation: {:?}", outcome);

        self.daemon_loop(&mut events).await;

        Ok(self.shutdown())
    }

    async fn daemon_loop(&mut self, events: &mut mpsc::UnboundedReceiver<DaemonEvent>) {
        info!(
            "Daemon loop started: idle_delay={}, periodic_delay={}",
            self.config.sync.idle_delay, self.config.sync.periodic_delay
        );

        loop {
            self.advance_clock();
            let reports = run_blocking(|| self.host.fire_due(&mut self.engine));
            for report in &reports {
                log_pass(report);
            }

            let deadline = self
                .host
                .timers()
                .next_deadline()
                .and_then(|offset| self.started.checked_add(offset));

            tokio::select! {
                event = events.recv() => match event {
                    Some(DaemonEvent::Activity) => {
                        self.advance_clock();
                        self.host.record_activity();
                        debug!("Activity recorded");
                    }
                    Some(DaemonEvent::Reload) => self.reload(),
                    Some(DaemonEvent::Shutdown) | None => {
                        info!("Shutdown requested, leaving daemon loop");
                        break;
                    }
                },
                _ = sleep_until(deadline) => {}
            }
        }
    }

    fn advance_clock(&mut self) {
        let now = self.started.elapsed();
        self.host.timers_mut().advance_to(now);
    }

    /// Re-read the configuration and apply it; a bad file keeps the old settings.
    fn reload(&mut self) {
        let loaded = match &self.config_path {
            Some(path) => Config::load(path),
            None => Config::load_or_default(),
        };

        let config = match loaded {
            Ok(config) => config,
            Err(e) => {
                error!("Reload rejected, keeping current settings: {:#}", e);
                return;
            }
        };

        if let Err(e) = write_settings(self.engine.settings()).apply_config(&config) {
            error!("Reload rejected, keeping current settings: {:#}", e);
            return;
        }
        self.host.load_operations(&config);
        self.config = config;
        info!(
            "Configuration reloaded: idle_delay={}, periodic_delay={}",
            self.config.sync.idle_delay, self.config.sync.periodic_delay
        );

        self.advance_clock();
        if let Some(report) = run_blocking(|| self.engine.reconcile(self.host.timers_mut())) {
            log_pass(&report);
        }
    }

    fn shutdown(&mut self) -> ShutdownReport {
        self.engine.disable(self.host.timers_mut());

        let trimmed = self.engine.before_shutdown();
        debug!("Trimmed before shutdown: {:?}", trimmed);

        run_blocking(|| self.host.run_shutdown_sequence())
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        info!("Daemon cleanup completed");
        Ok(())
    }
}

/// Run blocking work without starving a multi-threaded runtime.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_pass(report: &PassReport) {
    info!(
        "Sync pass completed in {:.2}s: {} operations, {} successful, {} failed",
        report.duration.as_secs_f64(),
        report.records.len(),
        report.successful_operations(),
        report.failed_operations()
    );
}

#[cfg(unix)]
async fn forward_signals(handle: DaemonHandle) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut activity = signal(SignalKind::user_defined1()).context("Failed to listen for SIGUSR1")?;
    let mut reload = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;

    loop {
        let delivered = tokio::select! {
            _ = activity.recv() => handle.touch(),
            _ = reload.recv() => handle.reload(),
            _ = terminate.recv() => handle.shutdown(),
            _ = interrupt.recv() => handle.shutdown(),
        };
        if !delivered {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(handle: DaemonHandle) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    handle.shutdown();
    Ok(())
}

fn pid_file_path(config: &Config) -> Result<Option<PathBuf>> {
    if config.daemon.pid_file.is_empty() {
        return Ok(None);
    }
    let expanded_path =
        shellexpand::full(&config.daemon.pid_file).context("Failed to expand PID file path")?;
    Ok(Some(PathBuf::from(expanded_path.as_ref())))
}

fn read_pid(pid_file: &Path) -> Result<u32> {
    let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;
    pid_str.trim().parse().context("Invalid PID in PID file")
}

/// Control signals the CLI can send to a running daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    Touch,
    Reload,
}

/// Send a control signal to the daemon named in the PID file.
/// Returns false when no daemon PID file is present.
pub fn signal_daemon(config: &Config, control: ControlSignal) -> Result<bool> {
    let Some(pid_file) = pid_file_path(config)? else {
        warn!("No PID file configured, cannot reach daemon");
        return Ok(false);
    };
    if !pid_file.exists() {
        warn!("PID file not found, daemon may not be running");
        return Ok(false);
    }
    let pid = read_pid(&pid_file)?;
    send_control(pid, control)
}

#[cfg(unix)]
fn send_control(pid: u32, control: ControlSignal) -> Result<bool> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let signal_kind = match control {
        ControlSignal::Stop => Signal::SIGTERM,
        ControlSignal::Touch => Signal::SIGUSR1,
        ControlSignal::Reload => Signal::SIGHUP,
    };
    signal::kill(Pid::from_raw(pid as i32), signal_kind)
        .with_context(|| format!("Failed to send {} to daemon process {}", signal_kind, pid))?;
    debug!("Sent {} to daemon process {}", signal_kind, pid);
    Ok(true)
}

#[cfg(not(unix))]
fn send_control(_pid: u32, _control: ControlSignal) -> Result<bool> {
    warn!("Daemon control not implemented for this platform");
    Ok(false)
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    let Some(pid_file) = pid_file_path(config)? else {
        return Ok(false);
    };
    if !pid_file.exists() {
        return Ok(false);
    }
    let pid = read_pid(&pid_file)?;

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(Errno::ESRCH) => {
                // Process doesn't exist, remove stale PID file
                let _ = fs::remove_file(&pid_file);
                Ok(false)
            }
            Err(_) => Ok(true), // Assume running if we can't check
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(true)
    }
}
