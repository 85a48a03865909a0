//! Cross-instance PID registry.
//!
//! Every running scheduler registers itself in a single shared file so that
//! other instances (and the `--list-workers` / `-k` surfaces) can see it.
//! All mutations and snapshots serialize through an exclusive advisory
//! `flock` on the registry file. Entries whose PIDs no longer exist are
//! reaped at startup and before every listing, so a crashed instance never
//! leaves a permanent ghost.
//!
//! Registry I/O failures are warnings for the caller, never fatal to a run.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::warn;

use parr_types::RegistryEntry;

/// Grace between SIGTERM and SIGKILL when killing a registered instance.
const KILL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("process {0} is not registered")]
    NotRegistered(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of killing one registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillReport {
    pub pid: u32,
    /// True when SIGKILL was needed after the grace expired.
    pub forced: bool,
}

/// Handle to the shared registry file.
#[derive(Debug, Clone)]
pub struct PidRegistry {
    path: PathBuf,
}

impl PidRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append an entry for a running instance, replacing any stale entry
    /// with the same pid.
    pub fn register(&self, entry: RegistryEntry) -> io::Result<()> {
        let mut lock = self.lock()?;
        let mut entries = read_entries(&mut lock);
        entries.retain(|existing| existing.pid != entry.pid);
        entries.push(entry);
        write_entries(&mut lock, &entries)
    }

    /// Remove the entry for `pid`; the file itself is removed once empty.
    pub fn unregister(&self, pid: u32) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut lock = self.lock()?;
        let mut entries = read_entries(&mut lock);
        entries.retain(|entry| entry.pid != pid);
        if entries.is_empty() {
            std::fs::remove_file(&self.path)
        } else {
            write_entries(&mut lock, &entries)
        }
    }

    /// Drop entries whose PIDs no longer exist; return the live ones.
    /// Idempotent: a second reap right after the first is a no-op.
    pub fn reap(&self) -> io::Result<Vec<RegistryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut lock = self.lock()?;
        let entries = read_entries(&mut lock);
        let live: Vec<RegistryEntry> = entries
            .iter()
            .filter(|entry| pid_alive(entry.pid))
            .cloned()
            .collect();
        if live.len() != entries.len() {
            if live.is_empty() {
                std::fs::remove_file(&self.path)?;
            } else {
                write_entries(&mut lock, &live)?;
            }
        }
        Ok(live)
    }

    /// Reap, then return every live entry.
    pub fn list(&self) -> io::Result<Vec<RegistryEntry>> {
        self.reap()
    }

    /// Kill one registered instance: SIGTERM, a bounded grace, then SIGKILL.
    /// The entry is unregistered whatever happens.
    pub fn kill(&self, pid: u32) -> Result<KillReport, RegistryError> {
        let listed = self.list()?;
        if !listed.iter().any(|entry| entry.pid == pid) {
            return Err(RegistryError::NotRegistered(pid));
        }

        let target = Pid::from_raw(pid as i32);
        let _ = kill(target, Signal::SIGTERM);
        let deadline = Instant::now() + KILL_GRACE;
        let mut forced = false;
        while pid_alive(pid) {
            if Instant::now() >= deadline {
                let _ = kill(target, Signal::SIGKILL);
                forced = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        if let Err(err) = self.unregister(pid) {
            warn!(pid, %err, "failed to unregister killed instance");
        }
        Ok(KillReport { pid, forced })
    }

    /// Kill every live registered instance. The caller is responsible for
    /// confirming with the user first.
    pub fn kill_all(&self) -> Result<Vec<KillReport>, RegistryError> {
        let mut reports = Vec::new();
        for entry in self.list()? {
            match self.kill(entry.pid) {
                Ok(report) => reports.push(report),
                // Raced with its own exit between list and kill
                Err(RegistryError::NotRegistered(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(reports)
    }

    /// Register and hand back a guard that unregisters on drop, so the entry
    /// is released on every exit path including panics.
    pub fn register_guarded(&self, entry: RegistryEntry) -> RegistrationGuard {
        let pid = entry.pid;
        if let Err(err) = self.register(entry) {
            warn!(%err, "could not register in the PID registry");
        }
        RegistrationGuard {
            registry: self.clone(),
            pid,
        }
    }

    fn lock(&self) -> io::Result<Flock<File>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| io::Error::from(errno))
    }
}

/// Unregisters the owning pid when dropped. Idempotent with the startup
/// reap: if the process dies before the drop runs, the next instance reaps
/// the entry instead.
pub struct RegistrationGuard {
    registry: PidRegistry,
    pid: u32,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if let Err(err) = self.registry.unregister(self.pid) {
            warn!(pid = self.pid, %err, "could not unregister from the PID registry");
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes existence without delivering anything
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn read_entries(file: &mut File) -> Vec<RegistryEntry> {
    let mut content = String::new();
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_string(&mut content).is_err() {
        return Vec::new();
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<RegistryEntry>(line) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(%err, "skipping malformed registry line");
                None
            }
        })
        .collect()
}

fn write_entries(file: &mut File, entries: &[RegistryEntry]) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(io::Error::other)?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}
