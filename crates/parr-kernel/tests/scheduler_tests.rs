//! Scheduler integration tests — bounded concurrency, throttling, auto-stop,
//! and the shape of the JSONL result stream.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tempfile::TempDir;

use parr_kernel::{
    ExpandRequest, Paths, ResultSink, Scheduler, SessionPaths, expand, expand::ExpandError,
};
use parr_types::{Config, ShutdownReason, TaskSpec, TaskStatus};

struct Harness {
    _dir: TempDir,
    paths: Paths,
    session: SessionPaths,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let paths = Paths::at(dir.path().join("data"));
        paths.ensure_dirs().unwrap();
        let session = SessionPaths::new(&paths, std::process::id(), Local::now());
        Self {
            _dir: dir,
            paths,
            session,
        }
    }

    fn sink(&self, config: &Config, command: &str) -> ResultSink {
        ResultSink::create(&self.session, config, command).unwrap()
    }

    fn result_lines(&self) -> Vec<serde_json::Value> {
        std::fs::read_to_string(&self.session.results_file)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn workspace(&self) -> std::path::PathBuf {
        self.paths.workspace_dir()
    }
}

fn shell_specs(script: &str, count: usize, workspace: &Path) -> Vec<TaskSpec> {
    (1..=count)
        .map(|index| TaskSpec {
            index,
            total: count,
            task_file: None,
            argv: vec!["/bin/sh".into(), "-c".into(), script.into()],
            env_bindings: Vec::new(),
            arguments: Vec::new(),
            working_dir: workspace.to_path_buf(),
            command_display: format!("/bin/sh -c '{script}'"),
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_spec_yields_exactly_one_record() {
    let harness = Harness::new();
    let config = Arc::new(Config {
        max_workers: 2,
        ..Config::default()
    });
    let specs = shell_specs("printf ok", 3, &harness.workspace());
    let mut sink = harness.sink(&config, "printf ok");

    let scheduler = Scheduler::new(config, None);
    let outcome = scheduler.run(specs, &mut sink).await;

    assert_eq!(outcome.shutdown, ShutdownReason::None);
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results.iter().all(|r| r.status == TaskStatus::Success));

    // Indices are a permutation of 1..=3
    let mut indices: Vec<usize> = outcome.results.iter().map(|r| r.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![1, 2, 3]);

    // Stream shape: one session record strictly first, then 3 task records
    let lines = harness.result_lines();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["type"], "session");
    assert!(lines[0]["session_id"].as_str().unwrap().starts_with("parr_"));
    for line in &lines[1..] {
        assert_eq!(line["type"], "task");
        assert_eq!(line["status"], "SUCCESS");
        assert_eq!(line["error_message"], "");
        assert!(line["stdout_tail"]["text"].as_str().unwrap().contains("ok"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_by_max_workers() {
    let harness = Harness::new();
    let config = Arc::new(Config {
        max_workers: 2,
        ..Config::default()
    });
    let specs = shell_specs("sleep 0.4", 4, &harness.workspace());
    let mut sink = harness.sink(&config, "sleep 0.4");

    let started = Instant::now();
    let outcome = Scheduler::new(config, None).run(specs, &mut sink).await;
    let elapsed = started.elapsed().as_secs_f64();

    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.results.iter().all(|r| r.status == TaskStatus::Success));
    // 4 tasks of 0.4s on 2 workers need at least two waves
    assert!(elapsed >= 0.75, "elapsed {elapsed}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn free_slots_run_in_parallel() {
    let harness = Harness::new();
    let config = Arc::new(Config {
        max_workers: 4,
        ..Config::default()
    });
    let specs = shell_specs("sleep 0.4", 4, &harness.workspace());
    let mut sink = harness.sink(&config, "sleep 0.4");

    let started = Instant::now();
    let outcome = Scheduler::new(config, None).run(specs, &mut sink).await;
    let elapsed = started.elapsed().as_secs_f64();

    assert!(outcome.results.iter().all(|r| r.status == TaskStatus::Success));
    assert!(elapsed < 1.5, "elapsed {elapsed}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_delay_throttles_dispatch() {
    let harness = Harness::new();
    let config = Arc::new(Config {
        max_workers: 4,
        start_delay_seconds: 0.3,
        ..Config::default()
    });
    let specs = shell_specs("true", 3, &harness.workspace());
    let mut sink = harness.sink(&config, "true");

    let started = Instant::now();
    let outcome = Scheduler::new(config, None).run(specs, &mut sink).await;
    let elapsed = started.elapsed().as_secs_f64();

    assert!(outcome.results.iter().all(|r| r.status == TaskStatus::Success));
    // Two inter-dispatch delays minus scheduler jitter
    assert!(elapsed >= 0.55, "elapsed {elapsed}");

    // Dispatch order equals spec order, observable via launch timestamps
    let mut by_index = outcome.results.clone();
    by_index.sort_by_key(|r| r.index);
    for pair in by_index.windows(2) {
        assert!(pair[0].started_at <= pair[1].started_at);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auto_stop_cancels_the_remainder() {
    let harness = Harness::new();
    let config = Arc::new(Config {
        max_workers: 1,
        stop_limits_enabled: true,
        max_consecutive_failures: 3,
        ..Config::default()
    });
    let specs = shell_specs("false", 10, &harness.workspace());
    let mut sink = harness.sink(&config, "false");

    let outcome = Scheduler::new(config, None).run(specs, &mut sink).await;

    assert_eq!(outcome.shutdown, ShutdownReason::StopLimit);
    assert_eq!(outcome.results.len(), 10);
    assert_eq!(outcome.count(TaskStatus::Failed), 3);
    assert_eq!(outcome.count(TaskStatus::Cancelled), 7);

    // Cancelled records carry worker 0 and no child
    for result in outcome.results.iter().filter(|r| r.status == TaskStatus::Cancelled) {
        assert_eq!(result.worker_id, 0);
        assert!(result.exit_code.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_rate_stop_triggers_after_min_samples() {
    let harness = Harness::new();
    let config = Arc::new(Config {
        max_workers: 1,
        stop_limits_enabled: true,
        max_consecutive_failures: 100,
        max_failure_rate: 0.5,
        min_tasks_for_rate_check: 4,
        ..Config::default()
    });
    // sh -c "exit $((index % 2))" style alternation: build manually
    let workspace = harness.workspace();
    let mut specs = Vec::new();
    for index in 1..=10usize {
        let script = if index % 3 == 0 { "true" } else { "false" };
        specs.push(TaskSpec {
            index,
            total: 10,
            task_file: None,
            argv: vec!["/bin/sh".into(), "-c".into(), script.into()],
            env_bindings: Vec::new(),
            arguments: Vec::new(),
            working_dir: workspace.clone(),
            command_display: script.to_string(),
        });
    }
    let mut sink = harness.sink(&config, "alternating");

    let outcome = Scheduler::new(config, None).run(specs, &mut sink).await;
    assert_eq!(outcome.shutdown, ShutdownReason::StopLimit);
    // Stops at the 4th completion: 3 failures / 4 completed = 75% > 50%
    assert_eq!(outcome.count(TaskStatus::Cancelled), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn end_to_end_env_mode_matches_arguments() {
    let harness = Harness::new();
    let dir = TempDir::new().unwrap();
    let args_file = dir.path().join("hosts.txt");
    std::fs::write(&args_file, "alpha\nbeta\ngamma\n").unwrap();

    let request = ExpandRequest {
        command_template: "/bin/sh -c 'printf %s \"$HOST\"'".to_string(),
        arguments_file: Some(args_file),
        env_names: vec!["HOST".to_string()],
        ..ExpandRequest::default()
    };
    let config = Arc::new(Config {
        max_workers: 2,
        ..Config::default()
    });
    let specs = expand(&request, &config, &harness.workspace()).unwrap();
    assert_eq!(specs.len(), 3);

    let mut sink = harness.sink(&config, &request.command_template);
    let outcome = Scheduler::new(config, None).run(specs, &mut sink).await;

    assert!(outcome.results.iter().all(|r| r.status == TaskStatus::Success));
    for result in &outcome.results {
        let expected = &result.arguments[0];
        assert_eq!(&result.stdout.text, expected);
        assert_eq!(result.env_bindings, vec![("HOST".to_string(), expected.clone())]);
        assert!(result.command_display.starts_with(&format!("HOST={expected} ")));
    }

    // JSONL task records carry the env object and the prefixed command
    let lines = harness.result_lines();
    let tasks: Vec<_> = lines.iter().filter(|l| l["type"] == "task").collect();
    assert_eq!(tasks.len(), 3);
    for task in tasks {
        let host = task["env_vars"]["HOST"].as_str().unwrap();
        assert!(["alpha", "beta", "gamma"].contains(&host));
        assert!(task["command_executed"].as_str().unwrap().contains(&format!("HOST={host}")));
        assert!(task["exit_code"].as_i64() == Some(0));
        assert!(task["start_time"].as_str().unwrap().contains('T'));
    }
}

#[tokio::test]
async fn empty_spec_list_is_a_clean_run() {
    let harness = Harness::new();
    let config = Arc::new(Config::default());
    let mut sink = harness.sink(&config, "noop");
    let outcome = Scheduler::new(config, None).run(Vec::new(), &mut sink).await;
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.shutdown, ShutdownReason::None);
    assert_eq!(harness.result_lines().len(), 1); // session record only
}

#[test]
fn expand_error_surfaces_before_any_dispatch() {
    // Companion to the S3 scenario: the expander fails, so the scheduler is
    // never constructed and no results file exists.
    let dir = TempDir::new().unwrap();
    let args_file = dir.path().join("args.txt");
    std::fs::write(&args_file, "a,1\nb,2,3\n").unwrap();
    let request = ExpandRequest {
        command_template: "/bin/echo @ARG_1@".to_string(),
        arguments_file: Some(args_file),
        separator: Some(parr_kernel::Separator::Comma),
        ..ExpandRequest::default()
    };
    let err = expand(&request, &Config::default(), dir.path()).unwrap_err();
    assert!(matches!(err, ExpandError::InconsistentArgumentCounts { .. }));
}
