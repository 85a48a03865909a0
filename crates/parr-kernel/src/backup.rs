//! Best-effort input backups.
//!
//! Before a run starts, the distinct task files (or the template), the
//! arguments file, and a small metadata record are copied into
//! `backups/<base>/`. A failed backup never blocks the run — it only logs a
//! warning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::json;
use tracing::warn;

use parr_types::TaskSpec;

use crate::paths::SessionPaths;

/// Copy the run's inputs into the session backup directory.
pub fn backup_inputs(
    session: &SessionPaths,
    specs: &[TaskSpec],
    arguments_file: Option<&Path>,
    command_template: &str,
) {
    if let Err(err) = std::fs::create_dir_all(&session.backup_dir) {
        warn!(%err, dir = %session.backup_dir.display(), "backup directory creation failed");
        return;
    }

    let task_files: BTreeSet<&PathBuf> =
        specs.iter().filter_map(|spec| spec.task_file.as_ref()).collect();
    let mut copied = Vec::new();
    for file in &task_files {
        match copy_into(file, &session.backup_dir) {
            Ok(target) => copied.push(target),
            Err(err) => warn!(%err, file = %file.display(), "task file backup failed"),
        }
    }

    let mut arguments_copy = None;
    if let Some(arguments) = arguments_file {
        match copy_into(arguments, &session.backup_dir) {
            Ok(target) => arguments_copy = Some(target),
            Err(err) => warn!(%err, file = %arguments.display(), "arguments file backup failed"),
        }
    }

    let metadata = json!({
        "session_id": session.base,
        "created_at": Local::now().to_rfc3339(),
        "command_template": command_template,
        "task_count": specs.len(),
        "task_files": task_files.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
        "arguments_file": arguments_file.map(|p| p.to_string_lossy()),
        "backed_up": copied.iter().chain(arguments_copy.iter())
            .map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
    });
    let metadata_path = session.backup_dir.join("session.json");
    if let Err(err) = std::fs::write(&metadata_path, format!("{metadata:#}\n")) {
        warn!(%err, "session metadata backup failed");
    }
}

fn copy_into(file: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| std::io::Error::other("path has no file name"))?;
    let target = dir.join(name);
    std::fs::copy(file, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;

    #[test]
    fn copies_inputs_and_writes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        paths.ensure_dirs().unwrap();
        let session = SessionPaths::new(&paths, 1, Local::now());

        let task_file = dir.path().join("t1.txt");
        std::fs::write(&task_file, "payload").unwrap();
        let args_file = dir.path().join("args.txt");
        std::fs::write(&args_file, "alpha\n").unwrap();

        let spec = TaskSpec {
            index: 1,
            total: 1,
            task_file: Some(task_file.clone()),
            argv: vec!["true".into()],
            env_bindings: Vec::new(),
            arguments: Vec::new(),
            working_dir: dir.path().to_path_buf(),
            command_display: "true".into(),
        };
        backup_inputs(&session, &[spec], Some(&args_file), "true");

        assert!(session.backup_dir.join("t1.txt").exists());
        assert!(session.backup_dir.join("args.txt").exists());
        let metadata = std::fs::read_to_string(session.backup_dir.join("session.json")).unwrap();
        assert!(metadata.contains(&session.base));
    }

    #[test]
    fn missing_inputs_only_warn() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let session = SessionPaths::new(&paths, 1, Local::now());
        // Nothing exists yet; must not panic or error
        backup_inputs(&session, &[], Some(Path::new("/definitely/absent")), "true");
    }
}
