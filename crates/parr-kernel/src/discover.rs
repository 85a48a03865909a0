//! Task-file discovery for file mode.
//!
//! Each source is a directory (immediate children only), a file path, or a
//! glob pattern. The result is deduplicated, lexicographically sorted, and
//! validated: every file must be regular, readable, and within the size
//! bound.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::expand::ExpandError;

/// Discover and validate task files from the given sources.
pub fn discover_task_files(
    sources: &[PathBuf],
    extension_filter: Option<&str>,
    max_file_size: u64,
) -> Result<Vec<PathBuf>, ExpandError> {
    let extensions = parse_extensions(extension_filter);
    let mut found = BTreeSet::new();

    for source in sources {
        if source.is_file() {
            if matches_filter(source, &extensions) {
                found.insert(absolute(source)?);
            }
        } else if source.is_dir() {
            for entry in std::fs::read_dir(source).map_err(|source_err| ExpandError::Unreadable {
                path: source.clone(),
                source: source_err,
            })? {
                let path = entry
                    .map_err(|source_err| ExpandError::Unreadable {
                        path: source.clone(),
                        source: source_err,
                    })?
                    .path();
                if path.is_file() && matches_filter(&path, &extensions) {
                    found.insert(absolute(&path)?);
                }
            }
        } else {
            // Not an existing path; maybe a glob pattern the shell left alone
            let pattern = source.to_string_lossy().into_owned();
            let matches = glob::glob(&pattern).map_err(|source_err| ExpandError::BadGlob {
                pattern: pattern.clone(),
                source: source_err,
            })?;
            let mut matched_any = false;
            for path in matches.flatten() {
                if path.is_file() {
                    matched_any = true;
                    if matches_filter(&path, &extensions) {
                        found.insert(absolute(&path)?);
                    }
                }
            }
            if !matched_any {
                return Err(ExpandError::PathNotFound(source.clone()));
            }
        }
    }

    if found.is_empty() {
        let filter_note = if extensions.is_empty() {
            String::new()
        } else {
            format!(" matching extensions: {}", extensions.join(", "))
        };
        return Err(ExpandError::NoTasksFound(filter_note));
    }

    let files: Vec<PathBuf> = found.into_iter().collect();
    for file in &files {
        validate_task_file(file, max_file_size)?;
    }
    Ok(files)
}

/// Parse `txt` or `txt,log,dat` into normalized `.ext` strings.
fn parse_extensions(filter: Option<&str>) -> Vec<String> {
    let Some(filter) = filter else {
        return Vec::new();
    };
    filter
        .split(',')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            if ext.starts_with('.') { ext } else { format!(".{ext}") }
        })
        .collect()
}

fn matches_filter(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default();
    extensions.iter().any(|allowed| *allowed == suffix)
}

fn absolute(path: &Path) -> Result<PathBuf, ExpandError> {
    path.canonicalize().map_err(|source| ExpandError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_task_file(path: &Path, max_file_size: u64) -> Result<(), ExpandError> {
    let metadata = std::fs::metadata(path).map_err(|source| ExpandError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(ExpandError::NotRegularFile(path.to_path_buf()));
    }
    if metadata.len() > max_file_size {
        return Err(ExpandError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_file_size,
        });
    }
    // Readability probe; permission problems surface here, not mid-run
    std::fs::File::open(path).map_err(|source| ExpandError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
