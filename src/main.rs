use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use idlesync::daemon::{is_daemon_running, signal_daemon, ControlSignal};
use idlesync::{AutoSync, Config, Daemon, Host, Operation, PassLog, SyncSettings};

#[derive(Parser)]
#[command(name = "idlesync")]
#[command(about = "Run sync operations while the user is idle")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Start the sync daemon
    Run {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Tell the daemon the user is active
    Touch,

    /// Make the daemon re-read its configuration
    Reload,

    /// Show daemon status and effective timing
    Status,

    /// List the operations a sync pass would run
    Resolve {
        /// Print JSON instead of a list
        #[arg(long)]
        json: bool,
    },

    /// Run one sync pass now
    Once,
}

#[derive(Serialize)]
struct ResolvedOperation<'a> {
    position: usize,
    label: &'a str,
    named: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init must work without an existing, valid config
    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, &Config::default())?;
        return cmd_init(cli.config, force);
    }

    let config = load_config(cli.config.as_ref())?;
    init_logging(cli.verbose, &config)?;
    info!("Starting idlesync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run { foreground } => cmd_run(foreground, cli.config, config),
        Commands::Stop => cmd_control(ControlSignal::Stop, &config),
        Commands::Touch => cmd_control(ControlSignal::Touch, &config),
        Commands::Reload => cmd_control(ControlSignal::Reload, &config),
        Commands::Status => cmd_status(&config),
        Commands::Resolve { json } => cmd_resolve(json, &config),
        Commands::Once => cmd_once(&config),
    }
}

/// Initialize logging on stderr: RUST_LOG wins, then --verbose, then the configured level
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let ansi = config.logging.color;

    match config.logging.format.as_str() {
        "pretty" => tracing_subscriber::registry()
            .with(fmt::layer().pretty().with_ansi(ansi).with_writer(std::io::stderr))
            .with(filter)
            .try_init(),
        "full" => tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(ansi).with_writer(std::io::stderr))
            .with(filter)
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(fmt::layer().compact().with_ansi(ansi).with_writer(std::io::stderr))
            .with(filter)
            .try_init(),
    }
    .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Build a host and an engine from the configuration, outside the daemon
fn standalone(config: &Config, log: PassLog) -> Result<(Host, AutoSync)> {
    let settings = SyncSettings::from_config(config)?.shared();
    let host = Host::from_config(config);
    let engine = AutoSync::new(settings, &host, log);
    Ok((host, engine))
}

fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {:?}", config_path);
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    Config::default().save(&config_path)?;

    println!("✅ idlesync initialized successfully!");
    println!("   Config: {:?}", config_path);
    println!("   Next: declare operations and run 'idlesync run'");
    Ok(())
}

fn cmd_run(foreground: bool, config_path: Option<PathBuf>, config: Config) -> Result<()> {
    if is_daemon_running(&config)? {
        println!("⚠️  Daemon is already running!");
        println!("   Use 'idlesync stop' to stop it first");
        return Ok(());
    }

    let pid_file = config.daemon.pid_file.clone();
    let log_file = config.daemon.log_file.clone();
    let mut daemon = Daemon::new(config, config_path)?;

    if foreground {
        println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
    } else {
        #[cfg(unix)]
        {
            println!("🚀 Starting idlesync daemon in background");
            println!("   PID file: {}", pid_file);
            println!("   Log file: {}", log_file);
            // Fork before any runtime threads exist
            daemon.daemonize()?;
        }

        #[cfg(not(unix))]
        {
            let _ = (pid_file, log_file);
            println!("❌ Background daemon mode not supported on this platform");
            println!("   Use --foreground to run in foreground mode");
            return Ok(());
        }
    }

    runtime()?.block_on(daemon.run())
}

fn cmd_control(control: ControlSignal, config: &Config) -> Result<()> {
    if !is_daemon_running(config)? {
        println!("⚠️  No daemon appears to be running");
        return Ok(());
    }

    if signal_daemon(config, control)? {
        match control {
            ControlSignal::Stop => println!("✅ Daemon stop signal sent"),
            ControlSignal::Touch => println!("✅ Activity recorded"),
            ControlSignal::Reload => println!("✅ Daemon reload signal sent"),
        }
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let settings = SyncSettings::from_config(config)?;

    println!("📊 idlesync Daemon Status");
    if is_daemon_running(config)? {
        println!("   🟢 Status: Running");
    } else {
        println!("   🔴 Status: Not running");
        println!("   💡 Use 'idlesync run' to start the daemon");
    }

    println!("   ⏳ Idle delay: {}", config.sync.idle_delay);
    println!("   🔄 Periodic delay: {}", config.sync.periodic_delay);
    if settings.is_idle_only() {
        println!("   🧭 Mode: idle-only");
    } else {
        println!("   🧭 Mode: periodic check with idle one-shot");
    }
    println!(
        "   ⚡ Faster shutdown: {}",
        if settings.faster_shutdown() { "on" } else { "off" }
    );
    println!("   📦 Operations defined: {}", config.operations.len());

    if !config.daemon.pass_log.is_empty() {
        println!("   📄 Pass log: {}", config.daemon.pass_log);
    }
    Ok(())
}

fn cmd_resolve(json: bool, config: &Config) -> Result<()> {
    let (_host, engine) = standalone(config, PassLog::in_memory(1))?;
    let operations = engine.resolve();

    if json {
        let entries: Vec<ResolvedOperation> = operations
            .iter()
            .enumerate()
            .map(|(position, op)| ResolvedOperation {
                position,
                label: op.label(),
                named: matches!(op, Operation::Named { .. }),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize operations")?
        );
        return Ok(());
    }

    println!("Operations ({}):", operations.len());
    for operation in &operations {
        println!("  • {}", operation.label());
    }
    Ok(())
}

fn cmd_once(config: &Config) -> Result<()> {
    let log = if config.daemon.pass_log.is_empty() {
        PassLog::in_memory(1)
    } else {
        PassLog::with_file(1, &config.daemon.pass_log)
    };
    let (_host, mut engine) = standalone(config, log)?;

    let report = engine.run_pass();
    println!("{}", report.render());

    let failed = report.failed_operations();
    if failed > 0 {
        bail!("{} of {} operations failed", failed, report.records.len());
    }
    Ok(())
}
