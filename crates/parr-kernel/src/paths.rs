//! Per-user data root and session file layout.
//!
//! Everything parr writes lives under one data root:
//!
//! | Purpose | Path |
//! |---------|------|
//! | Scheduler logs | `<root>/logs/<base>.log` |
//! | Result stream | `<root>/logs/<base>_results.jsonl` |
//! | Task output log | `<root>/logs/<base>_output.txt` |
//! | Input backups | `<root>/backups/<base>/` |
//! | PID registry | `<root>/pids/registry` |
//! | Task workspace | `<root>/workspace/` (+ `pid{PID}_worker{N}/` when isolated) |
//!
//! The root is `$PARR_HOME` when set, otherwise `$XDG_DATA_HOME/parr`
//! (`~/.local/share/parr`). `<base>` embeds the scheduler pid and a sortable
//! timestamp and is unique per session.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use directories::BaseDirs;

/// Resolved directory layout for one installation.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve from the environment (`$PARR_HOME` override, then XDG).
    pub fn resolve() -> Self {
        Self::from_override(std::env::var_os("PARR_HOME"))
    }

    /// Use an explicit root. Tests and embedders point this at a scratch dir.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn from_override(home_override: Option<OsString>) -> Self {
        let root = match home_override {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => BaseDirs::new()
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| {
                    std::env::var("HOME")
                        .map(PathBuf::from)
                        .unwrap_or_else(|_| std::env::temp_dir())
                        .join(".local")
                        .join("share")
                })
                .join("parr"),
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("pids")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.pids_dir().join("registry")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Per-worker isolated workspace subdirectory.
    pub fn worker_workspace(&self, pid: u32, worker_id: u32) -> PathBuf {
        self.workspace_dir().join(format!("pid{pid}_worker{worker_id}"))
    }

    /// Create every directory the session will write into.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.pids_dir())?;
        std::fs::create_dir_all(self.workspace_dir())?;
        std::fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

/// File names for one scheduler session.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    /// Unique session identifier: `parr_{pid}_{ddMonyy_HHMMSS}`.
    pub base: String,
    pub log_file: PathBuf,
    pub results_file: PathBuf,
    pub output_file: PathBuf,
    pub backup_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(paths: &Paths, pid: u32, started_at: DateTime<Local>) -> Self {
        let base = format!("parr_{pid}_{}", started_at.format("%d%b%y_%H%M%S"));
        let logs = paths.logs_dir();
        Self {
            log_file: logs.join(format!("{base}.log")),
            results_file: logs.join(format!("{base}_results.jsonl")),
            output_file: logs.join(format!("{base}_output.txt")),
            backup_dir: paths.backups_dir().join(&base),
            base,
        }
    }
}
