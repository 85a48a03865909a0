//! PID registry entries — one per running scheduler instance.

use serde::{Deserialize, Serialize};

/// Current registry file format version.
pub const REGISTRY_VERSION: u32 = 1;

/// One line of the shared `pids/registry` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// File format version; bump on incompatible change.
    pub version: u32,
    /// Scheduler process id.
    pub pid: u32,
    /// Wall-clock start time, RFC 3339 with timezone.
    pub started_at: String,
    /// File name of the session's human-readable log.
    pub log_file: String,
    /// File name of the session's JSONL result stream.
    pub result_file: String,
}

impl RegistryEntry {
    pub fn new(pid: u32, started_at: String, log_file: String, result_file: String) -> Self {
        Self {
            version: REGISTRY_VERSION,
            pid,
            started_at,
            log_file,
            result_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_as_json_line() {
        let entry = RegistryEntry::new(
            4242,
            "2025-06-17T18:16:23+02:00".to_string(),
            "parr_4242_17Jun25_181623.log".to_string(),
            "parr_4242_17Jun25_181623_results.jsonl".to_string(),
        );
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains('\n'));
        let back: RegistryEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.version, REGISTRY_VERSION);
    }
}
