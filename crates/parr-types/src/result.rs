//! Task results — the outcome record of executing one task spec.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::task::TaskSpec;

/// Terminal status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
    LaunchError,
}

impl TaskStatus {
    /// Whether this outcome counts as a failure for the auto-stop policy.
    /// CANCELLED counts as neither failure nor success.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::LaunchError
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::LaunchError => "LAUNCH_ERROR",
        };
        f.write_str(s)
    }
}

/// The tail of one output stream, as retained by the output ring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedOutput {
    /// Last-N-characters tail of the stream.
    pub text: String,
    /// Total characters ever written to the stream.
    pub total_chars: u64,
    /// True iff `total_chars` exceeded the retention capacity.
    pub truncated: bool,
}

/// Outcome record of one executed (or cancelled-before-start) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub index: usize,
    /// Worker slot ordinal; 0 for specs cancelled before dispatch.
    pub worker_id: u32,
    pub status: TaskStatus,
    /// Child exit code. Absent on timeout, cancellation, launch error, or
    /// signal-terminated children.
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub duration_seconds: f64,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    /// Peak resident set size over the child's process tree, in MiB.
    /// Absent when no resource monitor is available.
    pub peak_memory_mb: Option<f64>,
    /// Peak CPU utilisation over the child's process tree, in percent.
    pub peak_cpu_percent: Option<f64>,
    /// Diagnostic; empty on success.
    pub error_message: String,

    // Back-links to the originating spec.
    pub task_file: Option<std::path::PathBuf>,
    pub command_display: String,
    pub env_bindings: Vec<(String, String)>,
    pub arguments: Vec<String>,
}

impl TaskResult {
    /// Synthesize a CANCELLED result for a spec that was never dispatched.
    pub fn cancelled_before_start(spec: &TaskSpec) -> Self {
        let now = Local::now();
        Self {
            index: spec.index,
            worker_id: 0,
            status: TaskStatus::Cancelled,
            exit_code: None,
            started_at: now,
            ended_at: now,
            duration_seconds: 0.0,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
            peak_memory_mb: None,
            peak_cpu_percent: None,
            error_message: "Task cancelled".to_string(),
            task_file: spec.task_file.clone(),
            command_display: spec.command_display.clone(),
            env_bindings: spec.env_bindings.clone(),
            arguments: spec.arguments.clone(),
        }
    }
}

/// Why the scheduler stopped dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// Normal completion — every spec was dispatched.
    #[default]
    None,
    /// SIGTERM or SIGINT received.
    Signal,
    /// The failure policy reported STOP.
    StopLimit,
}
