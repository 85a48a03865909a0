//! Scheduler — drives a bounded worker pool over the task spec sequence.
//!
//! Contract:
//! - at most `max_workers` children run at any time;
//! - dispatch order equals spec order, throttled by `start_delay_seconds`;
//! - when every slot is busy the scheduler blocks on the completion channel
//!   for at most `poll_wait_seconds` (completions wake it immediately);
//! - SIGTERM/SIGINT cancel the run gracefully, a second signal within the
//!   escalation window skips the remaining grace; SIGHUP is ignored so a
//!   detached run survives terminal loss;
//! - the failure policy can stop the run after any completion;
//! - every spec produces exactly one result — undispatched specs are
//!   synthesized as CANCELLED.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parr_types::{Config, ShutdownReason, TaskResult, TaskSpec, TaskStatus};

use crate::monitor::ResourceMonitor;
use crate::policy::{FailurePolicy, Verdict};
use crate::runner;
use crate::sink::ResultSink;

/// A second signal within this window escalates from SIGTERM to SIGKILL.
const ESCALATION_WINDOW: Duration = Duration::from_secs(5);

/// What a finished run looks like.
#[derive(Debug)]
pub struct RunOutcome {
    /// All task results, in completion order. Exactly one per spec.
    pub results: Vec<TaskResult>,
    pub shutdown: ShutdownReason,
}

impl RunOutcome {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Bounded-concurrency dispatcher over a task spec sequence.
pub struct Scheduler {
    config: Arc<Config>,
    monitor: Option<Arc<dyn ResourceMonitor>>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>, monitor: Option<Arc<dyn ResourceMonitor>>) -> Self {
        Self { config, monitor }
    }

    /// Run every spec to a result, emitting each into the sink as it lands.
    pub async fn run(&self, specs: Vec<TaskSpec>, sink: &mut ResultSink) -> RunOutcome {
        let total = specs.len();
        info!(total, workers = self.config.max_workers, "starting parallel execution");

        let graceful = CancellationToken::new();
        let hard = CancellationToken::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskResult>();
        let mut signals = SignalStreams::install();

        let mut queue = specs.into_iter();
        let mut next = queue.next();
        let mut in_flight = 0usize;
        let mut dispatched = 0usize;
        let mut results = Vec::with_capacity(total);
        let mut shutdown = ShutdownReason::None;
        let mut first_signal_at: Option<Instant> = None;
        let mut policy = FailurePolicy::from_config(&self.config);

        let poll_wait = Duration::from_secs_f64(self.config.poll_wait_seconds);
        let start_delay = Duration::from_secs_f64(self.config.start_delay_seconds);

        loop {
            // Fill free worker slots in spec order
            while shutdown == ShutdownReason::None
                && in_flight < self.config.max_workers
                && next.is_some()
            {
                if dispatched > 0 && !start_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(start_delay) => {}
                        _ = signals.recv() => {
                            note_signal(&mut shutdown, &mut first_signal_at, &hard);
                        }
                    }
                    if shutdown != ShutdownReason::None {
                        break;
                    }
                }
                let spec = next.take().expect("slot loop checked next");
                next = queue.next();
                dispatched += 1;
                in_flight += 1;
                self.spawn_worker(spec, dispatched as u32, &graceful, &hard, &done_tx);
            }

            if shutdown == ShutdownReason::None {
                if in_flight == 0 && next.is_none() {
                    break;
                }
                tokio::select! {
                    Some(result) = done_rx.recv() => {
                        in_flight -= 1;
                        complete(result, &mut policy, &mut shutdown, sink, &mut results);
                    }
                    _ = tokio::time::sleep(poll_wait) => {}
                    _ = signals.recv() => {
                        note_signal(&mut shutdown, &mut first_signal_at, &hard);
                    }
                }
            }

            if shutdown != ShutdownReason::None {
                match shutdown {
                    ShutdownReason::StopLimit => info!("auto-stop triggered, cancelling remaining tasks"),
                    ShutdownReason::Signal => info!("shutdown requested, cancelling remaining tasks"),
                    ShutdownReason::None => {}
                }
                graceful.cancel();
                while in_flight > 0 {
                    tokio::select! {
                        Some(result) = done_rx.recv() => {
                            in_flight -= 1;
                            complete(result, &mut policy, &mut shutdown, sink, &mut results);
                        }
                        _ = signals.recv() => {
                            note_signal(&mut shutdown, &mut first_signal_at, &hard);
                        }
                    }
                }
                if let Some(spec) = next.take() {
                    complete(
                        TaskResult::cancelled_before_start(&spec),
                        &mut policy,
                        &mut shutdown,
                        sink,
                        &mut results,
                    );
                }
                for spec in queue.by_ref() {
                    complete(
                        TaskResult::cancelled_before_start(&spec),
                        &mut policy,
                        &mut shutdown,
                        sink,
                        &mut results,
                    );
                }
                break;
            }
        }

        info!(
            total,
            succeeded = results.iter().filter(|r| r.status == TaskStatus::Success).count(),
            failed = results.iter().filter(|r| r.status.is_failure()).count(),
            "execution finished"
        );
        RunOutcome { results, shutdown }
    }

    fn spawn_worker(
        &self,
        spec: TaskSpec,
        worker_id: u32,
        graceful: &CancellationToken,
        hard: &CancellationToken,
        done_tx: &mpsc::UnboundedSender<TaskResult>,
    ) {
        let config = self.config.clone();
        let monitor = self.monitor.clone();
        let graceful = graceful.child_token();
        let hard = hard.child_token();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = runner::execute(spec, worker_id, config, monitor, graceful, hard).await;
            let _ = done_tx.send(result);
        });
    }
}

/// Per-completion handling: outcome log, failure policy, result sink.
fn complete(
    result: TaskResult,
    policy: &mut FailurePolicy,
    shutdown: &mut ShutdownReason,
    sink: &mut ResultSink,
    results: &mut Vec<TaskResult>,
) {
    match result.status {
        TaskStatus::Success => info!(index = result.index, "task completed"),
        TaskStatus::Cancelled => info!(index = result.index, "task cancelled"),
        _ => warn!(
            index = result.index,
            status = %result.status,
            error = %result.error_message,
            "task failed"
        ),
    }
    if policy.observe(result.status) == Verdict::Stop && *shutdown == ShutdownReason::None {
        *shutdown = ShutdownReason::StopLimit;
    }
    sink.record(&result);
    results.push(result);
}

fn note_signal(
    shutdown: &mut ShutdownReason,
    first_signal_at: &mut Option<Instant>,
    hard: &CancellationToken,
) {
    match *first_signal_at {
        None => {
            info!("signal received, initiating graceful shutdown");
            *first_signal_at = Some(Instant::now());
            if *shutdown == ShutdownReason::None {
                *shutdown = ShutdownReason::Signal;
            }
        }
        Some(at) if at.elapsed() <= ESCALATION_WINDOW => {
            warn!("second signal received, escalating to SIGKILL");
            hard.cancel();
        }
        Some(_) => {
            // Too late to count as an escalation; restart the window
            *first_signal_at = Some(Instant::now());
        }
    }
}

/// SIGTERM/SIGINT streams plus a never-polled SIGHUP handler.
///
/// Installing the SIGHUP handler replaces death-on-hangup, so a detached
/// scheduler survives losing its terminal.
struct SignalStreams {
    terminate: Option<tokio::signal::unix::Signal>,
    interrupt: Option<tokio::signal::unix::Signal>,
    _hangup: Option<tokio::signal::unix::Signal>,
}

impl SignalStreams {
    fn install() -> Self {
        let install_one = |kind: SignalKind, name: &str| match signal(kind) {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(%err, signal = name, "could not install signal handler");
                None
            }
        };
        Self {
            terminate: install_one(SignalKind::terminate(), "SIGTERM"),
            interrupt: install_one(SignalKind::interrupt(), "SIGINT"),
            _hangup: install_one(SignalKind::hangup(), "SIGHUP"),
        }
    }

    /// Resolves when SIGTERM or SIGINT arrives; pends forever otherwise.
    async fn recv(&mut self) {
        let Self { terminate, interrupt, .. } = self;
        tokio::select! {
            _ = wait_on(terminate) => {}
            _ = wait_on(interrupt) => {}
        }
    }
}

async fn wait_on(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
