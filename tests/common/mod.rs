//! Common test utilities and helpers for idlesync tests
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use idlesync::Operation;

/// Temporary directory with config and pid/log locations inside it
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("idlesync");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            config_dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.config_dir.join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// Config with two shell operations registered as shutdown hooks.
    /// `save-history` is a candidate, `flush-cache` is only a sync hook.
    pub fn create_minimal_config(&self) -> PathBuf {
        let config_content = format!(
            r#"
sync:
  idle_delay: "5s"
  periodic_delay: "0"
  faster_shutdown: true
  hooks: ["flush-cache"]
candidates:
  shutdown_hooks: ["save-history"]
operations:
  save-history:
    command: "true"
  flush-cache:
    command: "true"
host:
  shutdown_hooks: ["save-history", "unrelated"]
daemon:
  pid_file: "{pid}"
  pass_log: "{passes}"
logging:
  level: "warn"
  color: false
"#,
            pid = self.path("idlesync.pid").display(),
            passes = self.path("passes.log").display(),
        );
        self.create_test_config(&config_content)
    }
}

/// Named operation that counts its invocations
pub fn counting_operation(name: &str) -> (Operation, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let operation = Operation::named(name, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (operation, runs)
}

pub fn count(runs: &Arc<AtomicUsize>) -> usize {
    runs.load(Ordering::SeqCst)
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
