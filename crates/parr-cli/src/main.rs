//! parr CLI entry point.
//!
//! Usage:
//!   parr -T <dir|file|glob> -C "cmd @TASK@"            # dry-run
//!   parr -T <dir> -C "cmd @TASK@" -r                   # execute
//!   parr -A args.txt -C "cmd @ARG@" -E HOST -r         # arguments mode
//!   parr --list-workers                                # show running instances
//!   parr -k [PID]                                      # kill instances

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use parr_kernel::backup::backup_inputs;
use parr_kernel::{
    ExpandRequest, Paths, PidRegistry, ProcfsMonitor, ResourceMonitor, ResultSink, Scheduler,
    Separator, SessionPaths, expand, summary,
};
use parr_types::{Config, RegistryEntry, ShutdownReason};

const USAGE_EXIT: u8 = 2;
const SIGNAL_EXIT: u8 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match CliOptions::parse(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("Run 'parr --help' for usage.");
            return Ok(ExitCode::from(USAGE_EXIT));
        }
    };

    if options.help {
        print_help();
        return Ok(ExitCode::SUCCESS);
    }
    if options.version {
        println!("parr {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let paths = Paths::resolve();

    if options.list_workers {
        return list_workers(&paths);
    }
    if let Some(target) = options.kill.clone() {
        return kill_workers(&paths, target);
    }
    if options.show_config {
        return show_config(&options, &paths);
    }

    execute(options, paths)
}

fn execute(options: CliOptions, paths: Paths) -> Result<ExitCode> {
    let config = options.to_config();
    if let Err(err) = config.validate() {
        eprintln!("Configuration Error: {err}");
        return Ok(ExitCode::FAILURE);
    }

    let separator = match &options.separator {
        Some(name) => match Separator::parse(name) {
            Ok(separator) => Some(separator),
            Err(err) => {
                eprintln!("Task Executor Error: {err}");
                return Ok(ExitCode::FAILURE);
            }
        },
        None => None,
    };

    paths.ensure_dirs().context("cannot create data directories")?;
    let started_at = Local::now();
    let pid = std::process::id();
    let session = SessionPaths::new(&paths, pid, started_at);
    init_tracing(&session)?;

    let request = ExpandRequest {
        sources: options.sources.clone(),
        command_template: options.command.clone().unwrap_or_default(),
        arguments_file: options.arguments_file.clone(),
        separator,
        env_names: options.env_names(),
        extension_filter: options.extension.clone(),
    };

    let registry = PidRegistry::new(paths.registry_file());
    if let Err(err) = registry.reap() {
        tracing::warn!(%err, "PID registry reap failed");
    }

    let specs = match expand(&request, &config, &paths.workspace_dir()) {
        Ok(specs) => specs,
        Err(err) => {
            eprintln!("Task Executor Error: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if config.dry_run {
        println!("DRY RUN — {} task(s)", specs.len());
        for spec in &specs {
            println!("[{}/{}]: {}", spec.index, spec.total, spec.command_display);
        }
        println!("\nUse -r/--run to execute.");
        return Ok(ExitCode::SUCCESS);
    }

    let guard = registry.register_guarded(RegistryEntry::new(
        pid,
        started_at.to_rfc3339(),
        file_name(&session.log_file),
        file_name(&session.results_file),
    ));

    if config.backup_enabled {
        backup_inputs(
            &session,
            &specs,
            request.arguments_file.as_deref(),
            &request.command_template,
        );
    }

    let monitor: Option<Arc<dyn ResourceMonitor>> =
        ProcfsMonitor::detect().map(|m| Arc::new(m) as Arc<dyn ResourceMonitor>);
    let monitoring_available = monitor.is_some();

    let mut sink = ResultSink::create(&session, &config, &request.command_template)
        .context("cannot create result sink")?;

    let config = Arc::new(config);
    let runtime = tokio::runtime::Runtime::new()?;
    let scheduler = Scheduler::new(config.clone(), monitor);
    let outcome = runtime.block_on(scheduler.run(specs, &mut sink));

    let report = summary::render(&outcome, &config, &paths, &session, monitoring_available);
    if attached_to_terminal() {
        println!("{report}");
    } else {
        tracing::info!("execution completed:\n{report}");
    }
    drop(guard);

    let any_failure = outcome.results.iter().any(|r| r.status.is_failure());
    let code = match outcome.shutdown {
        ShutdownReason::Signal => ExitCode::from(SIGNAL_EXIT),
        _ if any_failure => ExitCode::FAILURE,
        ShutdownReason::StopLimit => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    };
    Ok(code)
}

fn list_workers(paths: &Paths) -> Result<ExitCode> {
    let registry = PidRegistry::new(paths.registry_file());
    let entries = registry.list().context("cannot read PID registry")?;
    if entries.is_empty() {
        println!("No running parr processes found.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("Found {} running parr process(es):\n", entries.len());
    println!("{:<8} {:<28} {:<36} RESULTS FILE", "PID", "STARTED", "LOG FILE");
    for entry in &entries {
        println!(
            "{:<8} {:<28} {:<36} {}",
            entry.pid, entry.started_at, entry.log_file, entry.result_file
        );
    }
    println!("\nCommands:");
    println!("  Kill specific:  parr -k <PID>");
    println!("  Kill all:       parr -k");
    Ok(ExitCode::SUCCESS)
}

fn kill_workers(paths: &Paths, target: KillTarget) -> Result<ExitCode> {
    let registry = PidRegistry::new(paths.registry_file());
    match target {
        KillTarget::Pid(pid) => match registry.kill(pid) {
            Ok(report) => {
                if report.forced {
                    println!("Force killed process {pid}");
                } else {
                    println!("Process {pid} terminated gracefully");
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                eprintln!("{err}");
                eprintln!("Use --list-workers to see current processes.");
                Ok(ExitCode::FAILURE)
            }
        },
        KillTarget::All => {
            let entries = registry.list().context("cannot read PID registry")?;
            if entries.is_empty() {
                println!("No running parr processes found to kill.");
                return Ok(ExitCode::SUCCESS);
            }
            let pids: Vec<u32> = entries.iter().map(|e| e.pid).collect();
            println!("WARNING: this will kill ALL {} running parr process(es)!", pids.len());
            println!("PIDs to be killed: {pids:?}");
            print!("Are you sure? Type 'yes' to confirm: ");
            std::io::stdout().flush().ok();
            let mut answer = String::new();
            std::io::stdin().read_line(&mut answer).ok();
            if answer.trim().to_lowercase() != "yes" {
                println!("Kill operation cancelled.");
                return Ok(ExitCode::SUCCESS);
            }
            let reports = registry.kill_all().context("kill failed")?;
            for report in &reports {
                if report.forced {
                    println!("Force killed process {}", report.pid);
                } else {
                    println!("Process {} terminated gracefully", report.pid);
                }
            }
            println!("Kill operation completed for {} process(es)", reports.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn show_config(options: &CliOptions, paths: &Paths) -> Result<ExitCode> {
    let config = options.to_config();
    println!("PARALLEL TASK EXECUTOR CONFIGURATION");
    println!("====================================\n");
    println!("{config}\n");
    println!("Data Root: {}", paths.root().display());
    println!("Log Dir: {}", paths.logs_dir().display());
    println!("Workspace: {}", paths.workspace_dir().display());
    println!("PID Registry: {}", paths.registry_file().display());
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(session: &SessionPaths) -> Result<()> {
    let log_file = std::fs::File::create(&session.log_file)
        .with_context(|| format!("cannot create log file {}", session.log_file.display()))?;
    let file_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(log_file));
    // Console output only while attached; a detached run logs to file alone
    let console_layer = attached_to_terminal()
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .with(console_layer)
        .init();
    Ok(())
}

/// Detached (daemonized) processes are reparented to init.
fn attached_to_terminal() -> bool {
    nix::unistd::getppid().as_raw() != 1
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
enum KillTarget {
    All,
    Pid(u32),
}

#[derive(Debug, Default)]
struct CliOptions {
    sources: Vec<PathBuf>,
    command: Option<String>,
    arguments_file: Option<PathBuf>,
    separator: Option<String>,
    env_vars: Option<String>,
    extension: Option<String>,
    max_workers: Option<usize>,
    timeout: Option<u64>,
    start_delay: Option<f64>,
    run: bool,
    enable_stop_limits: bool,
    workspace_isolation: bool,
    no_task_output_log: bool,
    no_backup: bool,
    list_workers: bool,
    kill: Option<KillTarget>,
    show_config: bool,
    help: bool,
    version: bool,
}

impl CliOptions {
    fn parse(args: &[String]) -> Result<Self, String> {
        // Expand `--flag=value` into two tokens up front
        let mut expanded: Vec<String> = Vec::with_capacity(args.len());
        for arg in args {
            match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    expanded.push(flag.to_string());
                    expanded.push(value.to_string());
                }
                _ => expanded.push(arg.clone()),
            }
        }

        let mut options = Self::default();
        let mut iter = expanded.iter().peekable();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-h" | "--help" => options.help = true,
                "-V" | "--version" => options.version = true,
                "-r" | "--run" => options.run = true,
                "--enable-stop-limits" => options.enable_stop_limits = true,
                "--workspace-isolation" => options.workspace_isolation = true,
                "--no-task-output-log" => options.no_task_output_log = true,
                "--no-backup" => options.no_backup = true,
                "--list-workers" => options.list_workers = true,
                "--show-config" => options.show_config = true,
                "-k" | "--kill" => {
                    let target = match iter.peek() {
                        Some(next) => match next.parse::<u32>() {
                            Ok(pid) => {
                                iter.next();
                                KillTarget::Pid(pid)
                            }
                            Err(_) => KillTarget::All,
                        },
                        None => KillTarget::All,
                    };
                    options.kill = Some(target);
                }
                "-T" | "--tasks" => {
                    options.sources.push(PathBuf::from(take_value(&mut iter, arg)?));
                }
                "-C" | "--command" => options.command = Some(take_value(&mut iter, arg)?),
                "-A" | "--arguments-file" => {
                    options.arguments_file = Some(PathBuf::from(take_value(&mut iter, arg)?));
                }
                "-S" | "--separator" => options.separator = Some(take_value(&mut iter, arg)?),
                "-E" | "--env-var" => options.env_vars = Some(take_value(&mut iter, arg)?),
                "--file-extension" => options.extension = Some(take_value(&mut iter, arg)?),
                "-m" | "--max" => {
                    options.max_workers = Some(parse_number(&take_value(&mut iter, arg)?, arg)?);
                }
                "-t" | "--timeout" => {
                    options.timeout = Some(parse_number(&take_value(&mut iter, arg)?, arg)?);
                }
                "-s" | "--sleep" => {
                    options.start_delay = Some(parse_number(&take_value(&mut iter, arg)?, arg)?);
                }
                other => return Err(format!("Unknown option: {other}")),
            }
        }

        let info_mode = options.help
            || options.version
            || options.list_workers
            || options.kill.is_some()
            || options.show_config;
        if !info_mode {
            if options.command.as_deref().unwrap_or("").trim().is_empty() {
                return Err("Missing required option: -C/--command".to_string());
            }
            if options.sources.is_empty() && options.arguments_file.is_none() {
                return Err(
                    "Missing task sources: provide -T/--tasks or -A/--arguments-file".to_string()
                );
            }
        }
        Ok(options)
    }

    fn to_config(&self) -> Config {
        let mut config = Config::default();
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        if let Some(start_delay) = self.start_delay {
            config.start_delay_seconds = start_delay;
        }
        config.stop_limits_enabled |= self.enable_stop_limits;
        config.workspace_isolation |= self.workspace_isolation;
        config.task_output_log_enabled = !self.no_task_output_log;
        config.backup_enabled = !self.no_backup;
        config.dry_run = !self.run;
        config
    }

    fn env_names(&self) -> Vec<String> {
        self.env_vars
            .as_deref()
            .map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn take_value<'a, I>(iter: &mut std::iter::Peekable<I>, flag: &str) -> Result<String, String>
where
    I: Iterator<Item = &'a String>,
{
    iter.next()
        .map(|value| value.to_string())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag}: invalid number: {value}"))
}

fn print_help() {
    println!(
        r#"parr {} — parallel task executor

Usage:
  parr -T <dir|file|glob> -C "cmd @TASK@"          Dry-run over task files
  parr -T <dir> -C "cmd @TASK@" -r                 Execute task files
  parr -A args.txt -C "cmd @ARG@" -r               One task per argument line
  parr -A args.csv -S comma -C "cmd @ARG_1@ @ARG_2@" -r
  parr --list-workers                              List running instances
  parr -k [PID]                                    Kill all / one instance

Options:
  -T, --tasks <PATH>          Task source: directory, file, or glob (repeatable)
  -C, --command <TEMPLATE>    Command template with @TASK@ / @ARG@ / @ARG_N@
  -A, --arguments-file <FILE> Arguments file, one task per line
  -S, --separator <NAME>      Column separator: space, whitespace, tab, comma,
                              semicolon, pipe, colon
  -E, --env-var <NAMES>       Comma-separated env var names bound to columns
      --file-extension <EXT>  Filter task files, e.g. "txt" or "txt,log,dat"
  -m, --max <N>               Maximum parallel workers
  -t, --timeout <SECONDS>     Per-task timeout
  -s, --sleep <SECONDS>       Delay between task starts (throttle)
  -r, --run                   Execute (default is dry-run)
      --enable-stop-limits    Auto-stop on failure bursts or high failure rate
      --workspace-isolation   Per-worker workspace subdirectories
      --no-task-output-log    Skip the per-task output log
      --no-backup             Skip input backups
      --list-workers          List running instances (safe)
  -k, --kill [PID]            Kill all instances, or one PID
      --show-config           Show resolved configuration and paths
  -h, --help                  Show this help
  -V, --version               Show version
"#,
        env!("CARGO_PKG_VERSION")
    );
}
