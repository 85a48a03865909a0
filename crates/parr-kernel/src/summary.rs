//! End-of-run terminal summary.

use parr_types::{Config, ShutdownReason, TaskStatus};

use crate::paths::{Paths, SessionPaths};
use crate::scheduler::RunOutcome;

/// Render the human-readable execution summary.
pub fn render(
    outcome: &RunOutcome,
    config: &Config,
    paths: &Paths,
    session: &SessionPaths,
    monitoring_available: bool,
) -> String {
    let total = outcome.results.len();
    let succeeded = outcome.count(TaskStatus::Success);
    let failed = outcome
        .results
        .iter()
        .filter(|r| r.status.is_failure())
        .count();
    let cancelled = outcome.count(TaskStatus::Cancelled);
    let success_rate = if total > 0 {
        succeeded as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let durations: Vec<f64> = outcome
        .results
        .iter()
        .filter(|r| r.status == TaskStatus::Success)
        .map(|r| r.duration_seconds)
        .collect();
    let (min_duration, avg_duration, max_duration) = stats(&durations);

    let resource_info = if monitoring_available {
        let memory: Vec<f64> = outcome
            .results
            .iter()
            .filter(|r| r.status == TaskStatus::Success)
            .filter_map(|r| r.peak_memory_mb)
            .collect();
        let (_, avg_memory, peak_memory) = stats(&memory);
        format!(
            "- Average Memory Usage: {avg_memory:.2}MB\n- Peak Memory Usage: {peak_memory:.2}MB"
        )
    } else {
        "- Memory/CPU monitoring: not available".to_string()
    };

    let workspace_type = if config.workspace_isolation {
        "Isolated per worker"
    } else {
        "Shared"
    };
    let stop_info = if config.stop_limits_enabled {
        format!(
            "Enabled\n- Max Consecutive Failures: {}\n- Max Failure Rate: {:.0}%",
            config.max_consecutive_failures,
            config.max_failure_rate * 100.0
        )
    } else {
        "Disabled".to_string()
    };
    let shutdown_note = match outcome.shutdown {
        ShutdownReason::None => String::new(),
        ShutdownReason::Signal => "\nRun stopped early: signal received.".to_string(),
        ShutdownReason::StopLimit => "\nRun stopped early: failure limits reached.".to_string(),
    };

    format!(
        "\nParallel Task Execution Summary\n\
         ===============================\n\
         Total Tasks: {total}\n\
         Completed Successfully: {succeeded}\n\
         Failed: {failed}\n\
         Cancelled: {cancelled}\n\
         Success Rate: {success_rate:.1}%{shutdown_note}\n\
         \n\
         Performance Statistics:\n\
         - Average Duration: {avg_duration:.2}s\n\
         - Maximum Duration: {max_duration:.2}s\n\
         - Minimum Duration: {min_duration:.2}s\n\
         {resource_info}\n\
         \n\
         Directories:\n\
         - Working Dir: {workspace}\n\
         - Workspace Type: {workspace_type}\n\
         - Log Dir: {logs}\n\
         \n\
         Auto-Stop Protection:\n\
         - Stop Limits: {stop_info}\n\
         \n\
         Log Files:\n\
         - Main Log: {log_file}\n\
         - Results: {results_file}\n\
         - Output: {output_file}\n\
         \n\
         Process Info:\n\
         - Process ID: {pid}\n\
         - Workers: {workers}\n",
        workspace = paths.workspace_dir().display(),
        logs = paths.logs_dir().display(),
        log_file = session.log_file.display(),
        results_file = session.results_file.display(),
        output_file = session.output_file.display(),
        pid = std::process::id(),
        workers = config.max_workers,
    )
}

fn stats(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    (min, avg, max)
}
