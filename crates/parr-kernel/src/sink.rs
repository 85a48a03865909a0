//! Result sink — the session's machine-readable JSONL stream plus the
//! optional human-readable output log.
//!
//! The stream holds exactly one session record followed by one task record
//! per completed (or cancelled) spec, in completion order. The sink is the
//! single writer; workers hand their results to the scheduler, which calls
//! `record`. Write failures are logged and swallowed — losing a log line
//! must not take the run down.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use chrono::Local;
use serde_json::json;
use tracing::error;

use parr_types::{Config, TaskResult};

use crate::paths::SessionPaths;

/// Writes the JSONL result stream and the optional per-task output log.
pub struct ResultSink {
    session_id: String,
    results: File,
    output_log: Option<File>,
}

impl ResultSink {
    /// Open the session files and emit the session record.
    pub fn create(
        session: &SessionPaths,
        config: &Config,
        command_template: &str,
    ) -> io::Result<Self> {
        let mut results = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&session.results_file)?;

        let record = json!({
            "type": "session",
            "session_id": session.base,
            "pid": std::process::id(),
            "hostname": hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            "user": username(),
            "started_at": Local::now().to_rfc3339(),
            "command_template": command_template,
            "config": serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
        });
        writeln!(results, "{record}")?;

        let output_log = if config.task_output_log_enabled {
            Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&session.output_file)?,
            )
        } else {
            None
        };

        Ok(Self {
            session_id: session.base.clone(),
            results,
            output_log,
        })
    }

    /// Append one task record (and its output-log block).
    pub fn record(&mut self, result: &TaskResult) {
        let mut env_vars = serde_json::Map::new();
        for (name, value) in &result.env_bindings {
            env_vars.insert(name.clone(), json!(value));
        }

        let record = json!({
            "type": "task",
            "session_id": self.session_id,
            "index": result.index,
            "status": result.status,
            "worker_id": result.worker_id,
            "task_file": result.task_file.as_ref().map(|p| p.to_string_lossy().into_owned()),
            "command_executed": result.command_display,
            "env_vars": env_vars,
            "arguments": result.arguments,
            "exit_code": result.exit_code,
            "start_time": result.started_at.to_rfc3339(),
            "end_time": result.ended_at.to_rfc3339(),
            "duration_seconds": result.duration_seconds,
            "memory_mb": result.peak_memory_mb,
            "cpu_percent": result.peak_cpu_percent,
            "error_message": result.error_message,
            "stdout_tail": result.stdout,
            "stderr_tail": result.stderr,
        });
        if let Err(err) = writeln!(self.results, "{record}") {
            error!(index = result.index, %err, "result write failed");
        }

        if let Some(log) = &mut self.output_log
            && let Err(err) = write_output_block(log, result)
        {
            error!(index = result.index, %err, "output log write failed");
        }
    }
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn write_output_block(log: &mut File, result: &TaskResult) -> io::Result<()> {
    writeln!(log, "\n{}", "=".repeat(80))?;
    match &result.task_file {
        Some(task_file) => writeln!(log, "Task: {}", task_file.display())?,
        None => writeln!(log, "Task: [{}]", result.index)?,
    }
    writeln!(log, "Index: {}", result.index)?;
    writeln!(log, "Worker: {}", result.worker_id)?;
    writeln!(log, "Command: {}", result.command_display)?;
    writeln!(log, "Status: {}", result.status)?;
    match result.exit_code {
        Some(code) => writeln!(log, "Exit Code: {code}")?,
        None => writeln!(log, "Exit Code: -")?,
    }
    writeln!(log, "Duration: {:.2}s", result.duration_seconds)?;
    if let Some(memory) = result.peak_memory_mb {
        writeln!(log, "Memory: {memory:.2}MB")?;
    }
    writeln!(log, "Start: {}", result.started_at.to_rfc3339())?;
    writeln!(log, "End: {}", result.ended_at.to_rfc3339())?;

    for (label, capture) in [("STDOUT", &result.stdout), ("STDERR", &result.stderr)] {
        if capture.total_chars == 0 {
            continue;
        }
        let truncation = if capture.truncated { ", truncated" } else { "" };
        writeln!(
            log,
            "\n{label} ({} chars retained of {}{truncation}):",
            capture.text.chars().count(),
            capture.total_chars
        )?;
        writeln!(log, "{}", capture.text)?;
    }

    if !result.error_message.is_empty() {
        writeln!(log, "\nERROR: {}", result.error_message)?;
    }
    Ok(())
}
