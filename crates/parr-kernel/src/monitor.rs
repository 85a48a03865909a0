//! Resource monitoring capability.
//!
//! Monitoring is optional: the runner takes an `Option<Arc<dyn
//! ResourceMonitor>>` and simply reports `None` memory/CPU fields when no
//! capability is present. The bundled implementation reads Linux procfs and
//! aggregates over the child's whole descendant tree, so a task that forks
//! helpers is charged for all of them.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

/// One aggregate sample over a process tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Resident set size summed over the tree, in bytes.
    pub rss_bytes: u64,
    /// Cumulative user+system CPU ticks summed over the tree.
    pub cpu_ticks: u64,
}

/// Capability interface for sampling a child's resource usage.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    /// Sample the tree rooted at `pid`. `None` when the process is already
    /// gone or the platform offers no way to look.
    async fn sample(&self, pid: u32) -> Option<ResourceSample>;
}

/// Kernel USER_HZ; fixed at 100 on every supported platform.
pub const CLOCK_TICKS_PER_SECOND: f64 = 100.0;

/// Procfs-backed monitor for Linux.
#[derive(Debug, Default)]
pub struct ProcfsMonitor;

impl ProcfsMonitor {
    /// Probe for procfs; returns `None` where `/proc` is absent.
    pub fn detect() -> Option<Self> {
        if Path::new("/proc/self/stat").exists() {
            Some(Self)
        } else {
            None
        }
    }
}

#[async_trait]
impl ResourceMonitor for ProcfsMonitor {
    async fn sample(&self, pid: u32) -> Option<ResourceSample> {
        let processes = scan_proc();
        let tree = descendants(pid, &processes)?;
        let mut rss_bytes = 0u64;
        let mut cpu_ticks = 0u64;
        for member in tree {
            if let Some(stat) = processes.get(&member) {
                rss_bytes += stat.rss_pages * page_size();
                cpu_ticks += stat.cpu_ticks;
            }
        }
        Some(ResourceSample { rss_bytes, cpu_ticks })
    }
}

#[derive(Debug, Clone, Copy)]
struct ProcStat {
    ppid: u32,
    rss_pages: u64,
    cpu_ticks: u64,
}

fn page_size() -> u64 {
    // 4 KiB everywhere parr runs; procfs reports rss in pages
    4096
}

/// Snapshot pid -> (ppid, rss, ticks) for every process on the system.
fn scan_proc() -> HashMap<u32, ProcStat> {
    let mut processes = HashMap::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return processes;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if let Some(stat) = read_stat(pid) {
            processes.insert(pid, stat);
        }
    }
    processes
}

/// Parse `/proc/<pid>/stat`. The comm field may contain spaces and
/// parentheses, so fields are located after the last `)`.
fn read_stat(pid: u32) -> Option<ProcStat> {
    let content = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = content.get(content.rfind(')')? + 2..)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Field numbering per proc(5), counting from 1 with pid=1, comm=2:
    // state=3, ppid=4, ..., utime=14, stime=15, ..., rss=24.
    let ppid: u32 = fields.get(1)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let rss_pages: u64 = fields.get(21)?.parse().ok()?;
    Some(ProcStat {
        ppid,
        rss_pages,
        cpu_ticks: utime + stime,
    })
}

/// Collect `root` and every transitive child present in the snapshot.
fn descendants(root: u32, processes: &HashMap<u32, ProcStat>) -> Option<Vec<u32>> {
    if !processes.contains_key(&root) {
        return None;
    }
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, stat) in processes {
        children.entry(stat.ppid).or_default().push(pid);
    }
    let mut tree = Vec::new();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }
    Some(tree)
}
