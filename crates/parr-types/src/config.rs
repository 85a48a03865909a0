//! Resolved execution configuration.
//!
//! The scheduler receives a fully resolved, validated `Config` — argument
//! parsing, environment loading, and config-file layering happen upstream.
//! After `validate()` succeeds the value is treated as immutable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceilings a configuration may never exceed, whatever the caller asks for.
pub const MAX_ALLOWED_WORKERS: usize = 100;
pub const MAX_ALLOWED_TIMEOUT_SECONDS: u64 = 3600;
pub const MAX_ALLOWED_OUTPUT_CAPTURE: usize = 10_000;

/// Resolved configuration for one scheduler session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of concurrently running children (1–100).
    pub max_workers: usize,
    /// Per-task wall-clock timeout in seconds (1–3600).
    pub timeout_seconds: u64,
    /// Upper bound on the scheduler's idle wait for a completion (0.01–10.0 s).
    pub poll_wait_seconds: f64,
    /// Delay between consecutive task dispatches (0–60 s).
    pub start_delay_seconds: f64,
    /// Characters retained per output stream (1–10000).
    pub max_output_capture: usize,

    /// Whether the auto-stop failure policy is active.
    pub stop_limits_enabled: bool,
    /// Stop after this many consecutive failures.
    pub max_consecutive_failures: u32,
    /// Stop once the overall failure rate exceeds this fraction (0.0–1.0).
    pub max_failure_rate: f64,
    /// Minimum completed tasks before the rate check applies.
    pub min_tasks_for_rate_check: u32,

    /// Give each worker its own `pid{PID}_worker{N}` workspace subdirectory.
    pub workspace_isolation: bool,
    /// Run each child as the leader of a new process group.
    pub use_process_groups: bool,
    /// Maximum size of a task file in bytes.
    pub max_file_size_bytes: u64,
    /// Maximum length of a single argv token after substitution.
    pub max_argument_length: usize,

    /// Write the human-readable per-task output log.
    pub task_output_log_enabled: bool,
    /// Copy input files into `backups/<base>/` before running.
    pub backup_enabled: bool,
    /// Expand and print commands without executing anything.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 20,
            timeout_seconds: 600,
            poll_wait_seconds: 0.1,
            start_delay_seconds: 0.0,
            max_output_capture: 1000,
            stop_limits_enabled: false,
            max_consecutive_failures: 5,
            max_failure_rate: 0.5,
            min_tasks_for_rate_check: 10,
            workspace_isolation: false,
            use_process_groups: true,
            max_file_size_bytes: 1_048_576,
            max_argument_length: 1000,
            task_output_log_enabled: true,
            backup_enabled: true,
            dry_run: false,
        }
    }
}

impl Config {
    /// Validate every field, collecting all violations instead of stopping at
    /// the first. An invalid configuration must be rejected before any task
    /// runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.max_workers < 1 || self.max_workers > MAX_ALLOWED_WORKERS {
            errors.push(format!(
                "max_workers must be between 1 and {MAX_ALLOWED_WORKERS}, got {}",
                self.max_workers
            ));
        }
        if self.timeout_seconds < 1 || self.timeout_seconds > MAX_ALLOWED_TIMEOUT_SECONDS {
            errors.push(format!(
                "timeout_seconds must be between 1 and {MAX_ALLOWED_TIMEOUT_SECONDS}, got {}",
                self.timeout_seconds
            ));
        }
        if !(0.01..=10.0).contains(&self.poll_wait_seconds) {
            errors.push(format!(
                "poll_wait_seconds must be between 0.01 and 10.0, got {}",
                self.poll_wait_seconds
            ));
        }
        if !(0.0..=60.0).contains(&self.start_delay_seconds) {
            errors.push(format!(
                "start_delay_seconds must be between 0 and 60, got {}",
                self.start_delay_seconds
            ));
        }
        if self.max_output_capture < 1 || self.max_output_capture > MAX_ALLOWED_OUTPUT_CAPTURE {
            errors.push(format!(
                "max_output_capture must be between 1 and {MAX_ALLOWED_OUTPUT_CAPTURE}, got {}",
                self.max_output_capture
            ));
        }
        if self.max_consecutive_failures < 1 {
            errors.push("max_consecutive_failures must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            errors.push(format!(
                "max_failure_rate must be between 0.0 and 1.0, got {}",
                self.max_failure_rate
            ));
        }
        if self.min_tasks_for_rate_check < 1 {
            errors.push("min_tasks_for_rate_check must be at least 1".to_string());
        }
        if self.max_file_size_bytes == 0 {
            errors.push("max_file_size_bytes must be positive".to_string());
        }
        if self.max_argument_length == 0 {
            errors.push("max_argument_length must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let workspace = if self.workspace_isolation {
            "isolated per worker"
        } else {
            "shared"
        };
        let stop = if self.stop_limits_enabled {
            "enabled"
        } else {
            "disabled"
        };
        writeln!(f, "Workers: {}", self.max_workers)?;
        writeln!(f, "Timeout: {}s", self.timeout_seconds)?;
        writeln!(f, "Poll wait: {}s", self.poll_wait_seconds)?;
        writeln!(f, "Start delay: {}s", self.start_delay_seconds)?;
        writeln!(f, "Output capture: {} chars/stream", self.max_output_capture)?;
        writeln!(f, "Workspace: {workspace}")?;
        writeln!(f, "Process groups: {}", self.use_process_groups)?;
        write!(f, "Stop limits: {stop}")?;
        if self.stop_limits_enabled {
            write!(
                f,
                " (consecutive: {}, rate: {:.0}% after {} tasks)",
                self.max_consecutive_failures,
                self.max_failure_rate * 100.0,
                self.min_tasks_for_rate_check
            )?;
        }
        Ok(())
    }
}

/// Configuration errors. Always fatal before dispatch.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("configuration validation failed:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<String>),
}
