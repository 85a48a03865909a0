//! Task specs — fully resolved, ready-to-execute units of work.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One fully resolved unit of work.
///
/// Produced by the input expander, read-only afterwards. By construction no
/// `@TASK@`/`@ARG@`/`@ARG_i@` placeholder remains in `argv`, every token is
/// within the configured argument-length bound, and a present `task_file` has
/// been validated (regular, readable, within the size limit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// 1-based ordinal within the session.
    pub index: usize,
    /// Total number of specs in the session.
    pub total: usize,
    /// Absolute path of the per-task file; absent in arguments-only mode.
    pub task_file: Option<PathBuf>,
    /// Tokenized command after placeholder substitution, ready to exec.
    pub argv: Vec<String>,
    /// Environment variables to set in the child, in binding order.
    /// Overrides the inherited environment on conflict.
    pub env_bindings: Vec<(String, String)>,
    /// Raw argument tokens for this spec (one arguments-file line).
    pub arguments: Vec<String>,
    /// Working directory for the child. Shared workspace by default; the
    /// runner swaps in a per-worker subdirectory under isolation.
    pub working_dir: PathBuf,
    /// Printable single-string form of the command, including the env
    /// prefix. Used for dry-run output and the result stream.
    pub command_display: String,
}
