use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::operation::OperationId;

/// Main configuration structure for idlesync
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Sync timing and the list of always-eligible sync hooks
    #[serde(default)]
    pub sync: SyncConfig,

    /// Shutdown-time operations worth pre-empting if the host registers them
    #[serde(default)]
    pub candidates: CandidateConfig,

    /// Named shell-command operations
    #[serde(default)]
    pub operations: BTreeMap<String, CommandConfig>,

    /// Operations registered with the host shutdown lists at startup
    #[serde(default)]
    pub host: HostConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Synchronization timing configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Minimum continuous idle time before a pass
    #[serde(default = "default_idle_delay")]
    pub idle_delay: String, // "10s"

    /// Minimum interval between periodic checks, "0" disables it
    #[serde(default = "default_periodic_delay")]
    pub periodic_delay: String, // "10m"

    /// Drop pre-empted operations from the host shutdown lists before exit
    #[serde(default = "default_true")]
    pub faster_shutdown: bool,

    /// Operations run on every pass regardless of host registration
    #[serde(default)]
    pub hooks: Vec<OperationId>,
}

/// Candidate lists, intersected with the host live lists at fire time
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CandidateConfig {
    /// Hook-style shutdown operations
    #[serde(default)]
    pub shutdown_hooks: Vec<OperationId>,

    /// Query/confirmation-style shutdown operations
    #[serde(default)]
    pub shutdown_queries: Vec<OperationId>,
}

/// A shell command run as a named operation
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CommandConfig {
    /// Program to execute
    pub command: String,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory, defaults to the daemon's
    #[serde(default)]
    pub workdir: Option<String>,
}

/// Initial host registrations
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub shutdown_hooks: Vec<OperationId>,

    #[serde(default)]
    pub shutdown_queries: Vec<OperationId>,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location (background mode only)
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Scratch log of sync passes, empty to keep it in memory only
    #[serde(default = "default_pass_log")]
    pub pass_log: String,

    /// Number of passes retained in memory
    #[serde(default = "default_pass_log_capacity")]
    pub pass_log_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_idle_delay() -> String {
    "10s".to_string()
}
fn default_periodic_delay() -> String {
    "10m".to_string()
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/idlesync.pid", runtime_dir)
    } else {
        "/tmp/idlesync.pid".to_string()
    }
}

fn data_home() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/idlesync", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/idlesync", home)
    } else {
        "/tmp/idlesync".to_string()
    }
}

fn default_log_file() -> String {
    format!("{}/daemon.log", data_home())
}
fn default_pass_log() -> String {
    format!("{}/passes.log", data_home())
}
fn default_pass_log_capacity() -> usize {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            idle_delay: default_idle_delay(),
            periodic_delay: default_periodic_delay(),
            faster_shutdown: default_true(),
            hooks: Vec::new(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            pass_log: default_pass_log(),
            pass_log_capacity: default_pass_log_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

/// Parse duration strings like "30s", "10m", "1.5h" or bare seconds.
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let (value, scale) = if let Some(value) = duration_str.strip_suffix('s') {
        (value, 1.0)
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value, 60.0)
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value, 3600.0)
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value, 86400.0)
    } else {
        (duration_str.as_str(), 1.0)
    };

    let value: f64 = value.trim().parse().with_context(|| {
        format!(
            "Invalid duration '{}'. Use format like '30s', '10m', '1h'",
            duration_str
        )
    })?;

    seconds_to_duration(value * scale)
}

/// Convert a seconds value into a `Duration`, rejecting negative and non-finite input.
pub fn seconds_to_duration(seconds: f64) -> Result<Duration> {
    if !seconds.is_finite() {
        bail!("Delay must be a finite number of seconds, got {}", seconds);
    }
    if seconds < 0.0 {
        bail!("Delay must be non-negative, got {}s", seconds);
    }
    Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("Delay of {}s is too large", seconds))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("idlesync").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        self.daemon.pass_log = shellexpand::full(&self.daemon.pass_log)
            .context("Failed to expand pass_log path")?
            .into_owned();

        for operation in self.operations.values_mut() {
            if let Some(workdir) = &operation.workdir {
                operation.workdir = Some(
                    shellexpand::full(workdir)
                        .context("Failed to expand operation workdir")?
                        .into_owned(),
                );
            }
        }

        Ok(())
    }

    /// Reject inconsistent settings up front; nothing is re-checked at fire time.
    pub fn validate(&self) -> Result<()> {
        self.idle_delay()?;
        self.periodic_delay()?;

        let lists = [
            ("sync.hooks", &self.sync.hooks),
            ("candidates.shutdown_hooks", &self.candidates.shutdown_hooks),
            ("candidates.shutdown_queries", &self.candidates.shutdown_queries),
            ("host.shutdown_hooks", &self.host.shutdown_hooks),
            ("host.shutdown_queries", &self.host.shutdown_queries),
        ];
        for (name, ids) in lists {
            if ids.iter().any(|id| id.as_str().trim().is_empty()) {
                bail!("{} contains an empty operation name", name);
            }
        }

        for (name, operation) in &self.operations {
            if operation.command.trim().is_empty() {
                bail!("operation '{}' has an empty command", name);
            }
        }

        Ok(())
    }

    pub fn idle_delay(&self) -> Result<Duration> {
        parse_duration(&self.sync.idle_delay).context("Invalid sync.idle_delay")
    }

    pub fn periodic_delay(&self) -> Result<Duration> {
        parse_duration(&self.sync.periodic_delay).context("Invalid sync.periodic_delay")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            candidates: CandidateConfig::default(),
            operations: BTreeMap::new(),
            host: HostConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Runtime settings read by the coordinator, resolver and trimmer.
///
/// Every consumer reads these fresh on each call, so a setter takes effect
/// at the next reconciliation, pass or trim.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    idle_delay: Duration,
    periodic_delay: Duration,
    faster_shutdown: bool,
    sync_hooks: Vec<OperationId>,
    hook_candidates: Vec<OperationId>,
    query_candidates: Vec<OperationId>,
}

/// Settings shared between the engine and whoever reconfigures it.
pub type SharedSettings = Arc<RwLock<SyncSettings>>;

impl SyncSettings {
    pub fn new(idle_delay: Duration, periodic_delay: Duration) -> Self {
        Self {
            idle_delay,
            periodic_delay,
            faster_shutdown: false,
            sync_hooks: Vec::new(),
            hook_candidates: Vec::new(),
            query_candidates: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            idle_delay: config.idle_delay()?,
            periodic_delay: config.periodic_delay()?,
            faster_shutdown: config.sync.faster_shutdown,
            sync_hooks: config.sync.hooks.clone(),
            hook_candidates: config.candidates.shutdown_hooks.clone(),
            query_candidates: config.candidates.shutdown_queries.clone(),
        })
    }

    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    pub fn idle_delay(&self) -> Duration {
        self.idle_delay
    }

    pub fn periodic_delay(&self) -> Duration {
        self.periodic_delay
    }

    pub fn faster_shutdown(&self) -> bool {
        self.faster_shutdown
    }

    pub fn sync_hooks(&self) -> &[OperationId] {
        &self.sync_hooks
    }

    pub fn hook_candidates(&self) -> &[OperationId] {
        &self.hook_candidates
    }

    pub fn query_candidates(&self) -> &[OperationId] {
        &self.query_candidates
    }

    /// True when the periodic timer is not the binding constraint.
    pub fn is_idle_only(&self) -> bool {
        self.idle_delay >= self.periodic_delay
    }

    pub fn set_idle_delay(&mut self, delay: Duration) {
        self.idle_delay = delay;
    }

    pub fn set_periodic_delay(&mut self, delay: Duration) {
        self.periodic_delay = delay;
    }

    pub fn set_idle_delay_secs(&mut self, seconds: f64) -> Result<()> {
        self.idle_delay = seconds_to_duration(seconds).context("Invalid idle delay")?;
        Ok(())
    }

    pub fn set_periodic_delay_secs(&mut self, seconds: f64) -> Result<()> {
        self.periodic_delay = seconds_to_duration(seconds).context("Invalid periodic delay")?;
        Ok(())
    }

    pub fn set_faster_shutdown(&mut self, enabled: bool) {
        self.faster_shutdown = enabled;
    }

    pub fn set_sync_hooks(&mut self, ids: Vec<OperationId>) {
        self.sync_hooks = ids;
    }

    pub fn set_hook_candidates(&mut self, ids: Vec<OperationId>) {
        self.hook_candidates = ids;
    }

    pub fn set_query_candidates(&mut self, ids: Vec<OperationId>) {
        self.query_candidates = ids;
    }

    /// Replace all settings with those of a freshly loaded config.
    pub fn apply_config(&mut self, config: &Config) -> Result<()> {
        *self = Self::from_config(config)?;
        Ok(())
    }
}

/// Read-lock shared settings; a poisoned lock still holds valid settings.
pub fn read_settings(settings: &SharedSettings) -> RwLockReadGuard<'_, SyncSettings> {
    settings.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-lock shared settings.
pub fn write_settings(settings: &SharedSettings) -> RwLockWriteGuard<'_, SyncSettings> {
    settings.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper function to create a temporary config directory
    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("idlesync");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.sync.idle_delay, "10s");
        assert_eq!(config.sync.periodic_delay, "10m");
        assert!(config.sync.faster_shutdown);
        assert!(config.sync.hooks.is_empty());
        assert!(config.operations.is_empty());
        assert_eq!(config.daemon.pass_log_capacity, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 5M ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_duration_rejects_bad_input() {
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("1e300").is_err());
        assert!(parse_duration("1e300d").is_err());
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let mut config = Config::default();
        config.sync.idle_delay = "-1".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.periodic_delay = "-10m".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_ids() {
        let mut config = Config::default();
        config.candidates.shutdown_hooks = vec![OperationId::from("")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("candidates.shutdown_hooks"));
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_IDLESYNC_HOME", "/test/home");

        let mut config = Config::default();
        config.daemon.pass_log = "${TEST_IDLESYNC_HOME}/passes.log".to_string();

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.daemon.pass_log, "/test/home/passes.log");

        env::remove_var("TEST_IDLESYNC_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        let result = Config::load(nonexistent_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        let mut config = Config::default();
        config.sync.idle_delay = "5s".to_string();
        config.sync.hooks = vec![OperationId::from("save-session")];
        config.operations.insert(
            "save-session".to_string(),
            CommandConfig {
                command: "true".to_string(),
                args: vec![],
                workdir: None,
            },
        );

        config.save(&config_path).expect("Failed to save config");
        let loaded_config = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded_config.sync.idle_delay, "5s");
        assert_eq!(loaded_config.sync.hooks, vec![OperationId::from("save-session")]);
        assert_eq!(
            loaded_config.operations.get("save-session").map(|op| op.command.as_str()),
            Some("true")
        );
    }

    #[test]
    fn test_config_load_rejects_invalid_delay() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");
        std::fs::write(&config_path, "sync:\n  idle_delay: \"-3s\"\n").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{:#}", err).contains("non-negative"));
    }

    #[test]
    fn test_config_load_rejects_oversized_delay() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");
        std::fs::write(&config_path, "sync:\n  idle_delay: \"1e300\"\n").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{:#}", err).contains("too large"));
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("idlesync"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
sync:
  idle_delay: "30s"
  periodic_delay: "0"
  faster_shutdown: false
  hooks: [save-session]
candidates:
  shutdown_hooks: [save-history, save-places]
  shutdown_queries: [confirm-unsaved]
operations:
  save-session:
    command: "sh"
    args: ["-c", "echo saved"]
host:
  shutdown_hooks: [save-history]
logging:
  level: "debug"
  color: false
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.idle_delay().unwrap(), Duration::from_secs(30));
        assert_eq!(config.periodic_delay().unwrap(), Duration::ZERO);
        assert!(!config.sync.faster_shutdown);
        assert_eq!(config.candidates.shutdown_hooks.len(), 2);
        assert_eq!(config.candidates.shutdown_queries[0].as_str(), "confirm-unsaved");
        assert_eq!(config.operations["save-session"].args, vec!["-c", "echo saved"]);
        assert_eq!(config.host.shutdown_hooks[0].as_str(), "save-history");
        assert!(config.host.shutdown_queries.is_empty());
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.color);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.sync.hooks = vec![OperationId::from("s1")];
        config.candidates.shutdown_queries = vec![OperationId::from("q1")];

        let settings = SyncSettings::from_config(&config).unwrap();

        assert_eq!(settings.idle_delay(), Duration::from_secs(10));
        assert_eq!(settings.periodic_delay(), Duration::from_secs(600));
        assert!(settings.faster_shutdown());
        assert!(!settings.is_idle_only());
        assert_eq!(settings.sync_hooks(), &[OperationId::from("s1")]);
        assert_eq!(settings.query_candidates(), &[OperationId::from("q1")]);
    }

    #[test]
    fn test_settings_setters_reject_negative() {
        let mut settings = SyncSettings::new(Duration::from_secs(5), Duration::from_secs(60));

        assert!(settings.set_idle_delay_secs(-1.0).is_err());
        assert!(settings.set_periodic_delay_secs(f64::NAN).is_err());
        assert_eq!(settings.idle_delay(), Duration::from_secs(5));

        settings.set_periodic_delay_secs(0.0).unwrap();
        assert!(settings.is_idle_only());
    }
}
