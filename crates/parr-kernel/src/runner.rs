//! Process runner — executes one task spec as a child process.
//!
//! The runner owns the child's whole lifecycle: spawn (as a process-group
//! leader when enabled), concurrent stdout/stderr capture into output rings,
//! the wall-clock deadline, the escalating termination sequence, and optional
//! resource sampling. Every failure mode folds into the returned
//! `TaskResult`; the runner never propagates an error to the scheduler.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parr_types::{Config, TaskResult, TaskSpec, TaskStatus};

use crate::monitor::{CLOCK_TICKS_PER_SECOND, ResourceMonitor};
use crate::ring::OutputRing;

/// Grace between SIGTERM and SIGKILL during termination.
const TERM_GRACE: Duration = Duration::from_secs(5);
/// Wait after SIGKILL before abandoning the child as unkillable.
const KILL_WAIT: Duration = Duration::from_secs(2);
/// Wait for the output readers to hit EOF after the child is gone.
const READER_DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Execute one spec to completion and return its result.
///
/// `graceful` requests cancellation (SIGTERM, then escalation after the
/// grace); `hard` skips whatever remains of the grace and goes straight to
/// SIGKILL.
pub async fn execute(
    spec: TaskSpec,
    worker_id: u32,
    config: Arc<Config>,
    monitor: Option<Arc<dyn ResourceMonitor>>,
    graceful: CancellationToken,
    hard: CancellationToken,
) -> TaskResult {
    let started_at = Local::now();
    let started = Instant::now();
    let assembler = ResultAssembler {
        spec,
        worker_id,
        started_at,
        started,
    };

    if graceful.is_cancelled() {
        return assembler.finish(
            TaskStatus::Cancelled,
            None,
            "Task cancelled".to_string(),
            Capture::default(),
            None,
        );
    }

    let working_dir = if config.workspace_isolation {
        assembler
            .spec
            .working_dir
            .join(format!("pid{}_worker{}", std::process::id(), worker_id))
    } else {
        assembler.spec.working_dir.clone()
    };
    if let Err(err) = std::fs::create_dir_all(&working_dir) {
        return assembler.finish(
            TaskStatus::LaunchError,
            None,
            format!("cannot create working directory {}: {err}", working_dir.display()),
            Capture::default(),
            None,
        );
    }

    let mut command = tokio::process::Command::new(&assembler.spec.argv[0]);
    command
        .args(&assembler.spec.argv[1..])
        .envs(assembler.spec.env_bindings.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if config.use_process_groups {
        // Child becomes leader of a fresh group so one signal reaches the
        // whole descendant tree
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            return assembler.finish(
                TaskStatus::LaunchError,
                None,
                err.to_string(),
                Capture::default(),
                None,
            );
        }
    };
    let child_pid = child.id().map(|pid| pid as i32).unwrap_or(-1);
    info!(
        index = assembler.spec.index,
        total = assembler.spec.total,
        worker = worker_id,
        pid = child_pid,
        "task started"
    );

    let stdout_ring = Arc::new(Mutex::new(OutputRing::new(config.max_output_capture)));
    let stderr_ring = Arc::new(Mutex::new(OutputRing::new(config.max_output_capture)));
    let mut reader_tasks = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        reader_tasks.push(tokio::spawn(drain_into_ring(stdout, stdout_ring.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        reader_tasks.push(tokio::spawn(drain_into_ring(stderr, stderr_ring.clone())));
    }

    let peaks = Arc::new(Mutex::new(Peaks::default()));
    let monitor_stop = CancellationToken::new();
    let monitor_task = monitor.as_ref().map(|capability| {
        tokio::spawn(sample_loop(
            capability.clone(),
            child_pid.max(0) as u32,
            Duration::from_secs_f64(config.poll_wait_seconds),
            peaks.clone(),
            monitor_stop.clone(),
        ))
    });

    let deadline = started + Duration::from_secs(config.timeout_seconds);
    let wait_end = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => WaitEnd::Exited(status),
            Err(err) => WaitEnd::WaitFailed(err),
        },
        _ = tokio::time::sleep_until(deadline) => WaitEnd::TimedOut,
        _ = graceful.cancelled() => WaitEnd::Cancelled,
    };

    if matches!(wait_end, WaitEnd::TimedOut | WaitEnd::Cancelled | WaitEnd::WaitFailed(_)) {
        terminate(&mut child, child_pid, config.use_process_groups, &hard).await;
    }

    monitor_stop.cancel();
    if let Some(task) = monitor_task {
        let _ = task.await;
    }
    for mut task in reader_tasks {
        if tokio::time::timeout(READER_DRAIN_WAIT, &mut task).await.is_err() {
            // A straggler holding the pipe open must not stall the worker
            task.abort();
        }
    }

    let capture = Capture {
        stdout: stdout_ring.lock().await.captured(),
        stderr: stderr_ring.lock().await.captured(),
    };
    let usage = if monitor.is_some() {
        let peaks = peaks.lock().await;
        Some((peaks.rss_mb(), peaks.peak_cpu_percent))
    } else {
        None
    };

    let (status, exit_code, error_message) = match wait_end {
        WaitEnd::Exited(status) => match status.code() {
            Some(0) => (TaskStatus::Success, Some(0), String::new()),
            Some(code) => (TaskStatus::Failed, Some(code), format!("exit code {code}")),
            None => (TaskStatus::Failed, None, "terminated by signal".to_string()),
        },
        WaitEnd::TimedOut => (
            TaskStatus::Timeout,
            None,
            format!("Timeout after {}s", config.timeout_seconds),
        ),
        WaitEnd::Cancelled => (TaskStatus::Cancelled, None, "Task cancelled".to_string()),
        WaitEnd::WaitFailed(err) => (TaskStatus::Failed, None, format!("wait failed: {err}")),
    };

    assembler.finish(status, exit_code, error_message, capture, usage)
}

enum WaitEnd {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
    WaitFailed(std::io::Error),
}

#[derive(Default)]
struct Capture {
    stdout: parr_types::CapturedOutput,
    stderr: parr_types::CapturedOutput,
}

struct ResultAssembler {
    spec: TaskSpec,
    worker_id: u32,
    started_at: chrono::DateTime<Local>,
    started: Instant,
}

impl ResultAssembler {
    fn finish(
        self,
        status: TaskStatus,
        exit_code: Option<i32>,
        error_message: String,
        capture: Capture,
        usage: Option<(f64, f64)>,
    ) -> TaskResult {
        let (peak_memory_mb, peak_cpu_percent) = match usage {
            Some((memory, cpu)) => (Some(memory), Some(cpu)),
            None => (None, None),
        };
        TaskResult {
            index: self.spec.index,
            worker_id: self.worker_id,
            status,
            exit_code,
            started_at: self.started_at,
            ended_at: Local::now(),
            duration_seconds: self.started.elapsed().as_secs_f64(),
            stdout: capture.stdout,
            stderr: capture.stderr,
            peak_memory_mb,
            peak_cpu_percent,
            error_message,
            task_file: self.spec.task_file,
            command_display: self.spec.command_display,
            env_bindings: self.spec.env_bindings,
            arguments: self.spec.arguments,
        }
    }
}

/// Copy a child stream into its ring, 8 KiB at a time, until EOF.
async fn drain_into_ring<R>(mut source: R, ring: Arc<Mutex<OutputRing>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match source.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => ring.lock().await.push(&buf[..n]),
        }
    }
    ring.lock().await.finish();
}

/// Escalating termination: SIGTERM to the group, a bounded grace, then
/// SIGKILL. Idempotent — signalling an already-dead group is a no-op.
async fn terminate(child: &mut Child, pid: i32, use_groups: bool, hard: &CancellationToken) {
    if pid <= 0 {
        let _ = child.kill().await;
        return;
    }

    send_signal(pid, use_groups, Signal::SIGTERM);
    let exited_in_grace = tokio::select! {
        result = tokio::time::timeout(TERM_GRACE, child.wait()) => result.is_ok(),
        _ = hard.cancelled() => false,
    };
    if exited_in_grace {
        return;
    }

    send_signal(pid, use_groups, Signal::SIGKILL);
    if tokio::time::timeout(KILL_WAIT, child.wait()).await.is_err() {
        warn!(pid, "child survived SIGKILL; abandoning");
        return;
    }
    // The leader is gone; members that escaped into their own session are
    // orphans we can only report
    if use_groups && killpg(Pid::from_raw(pid), None).is_ok() {
        warn!(pgid = pid, "process group members remain after SIGKILL");
    }
}

fn send_signal(pid: i32, use_groups: bool, signal: Signal) {
    let target = Pid::from_raw(pid);
    let result = if use_groups {
        killpg(target, signal).or_else(|_| kill(target, signal))
    } else {
        kill(target, signal)
    };
    if let Err(err) = result {
        debug!(pid, ?signal, %err, "signal delivery failed");
    }
}

#[derive(Debug, Default)]
struct Peaks {
    peak_rss_bytes: u64,
    peak_cpu_percent: f64,
    previous: Option<(Instant, u64)>,
}

impl Peaks {
    fn rss_mb(&self) -> f64 {
        self.peak_rss_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Sample the child's tree on the configured cadence, keeping peaks.
async fn sample_loop(
    monitor: Arc<dyn ResourceMonitor>,
    pid: u32,
    cadence: Duration,
    peaks: Arc<Mutex<Peaks>>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(cadence.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(sample) = monitor.sample(pid).await else {
            continue;
        };
        let now = Instant::now();
        let mut peaks = peaks.lock().await;
        peaks.peak_rss_bytes = peaks.peak_rss_bytes.max(sample.rss_bytes);
        if let Some((previous_at, previous_ticks)) = peaks.previous {
            let elapsed = now.duration_since(previous_at).as_secs_f64();
            if elapsed > 0.0 {
                let delta = sample.cpu_ticks.saturating_sub(previous_ticks) as f64;
                let percent = delta / CLOCK_TICKS_PER_SECOND / elapsed * 100.0;
                peaks.peak_cpu_percent = peaks.peak_cpu_percent.max(percent);
            }
        }
        peaks.previous = Some((now, sample.cpu_ticks));
    }
}
