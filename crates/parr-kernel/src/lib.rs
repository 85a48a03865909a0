//! parr-kernel: the engine behind the `parr` parallel task executor.
//!
//! This crate provides:
//!
//! - **Expand**: task discovery, arguments-file parsing, placeholder
//!   substitution — inputs to an ordered task spec sequence
//! - **Words**: POSIX shell word splitting and quoting
//! - **Ring**: last-N-characters output capture buffers
//! - **Runner**: child process execution with process groups, timeouts, and
//!   escalating termination
//! - **Scheduler**: bounded worker pool with throttled dispatch, cooperative
//!   shutdown, and the auto-stop failure policy
//! - **Registry**: the cross-instance PID registry with stale-entry reaping
//! - **Sink**: the session JSONL result stream and per-task output log
//! - **Monitor**: optional procfs-backed resource sampling
//! - **Paths**: the per-user data root and session file layout

pub mod argfile;
pub mod backup;
pub mod discover;
pub mod expand;
pub mod monitor;
pub mod paths;
pub mod policy;
pub mod registry;
pub mod ring;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod summary;
pub mod template;
pub mod words;

pub use argfile::Separator;
pub use expand::{ExpandError, ExpandRequest, expand};
pub use monitor::{ProcfsMonitor, ResourceMonitor, ResourceSample};
pub use paths::{Paths, SessionPaths};
pub use policy::{FailurePolicy, Verdict};
pub use registry::{KillReport, PidRegistry, RegistrationGuard, RegistryError};
pub use ring::OutputRing;
pub use scheduler::{RunOutcome, Scheduler};
pub use sink::ResultSink;
