//! Input expander — turns sources, templates, and argument files into an
//! ordered sequence of ready-to-execute task specs.
//!
//! Two modes:
//!
//! - **File mode**: task sources (directories, files, globs) are discovered,
//!   sorted, and bound to the command via `@TASK@`.
//! - **Arguments mode**: an arguments file supplies one line per task; each
//!   line is split by the chosen separator and bound via `@ARG@`/`@ARG_i@`
//!   placeholders and optional environment variables. A single optional
//!   template file may also be bound via `@TASK@`.
//!
//! Every spec is validated on the way out: no placeholder survives,
//! every argv token is within the length bound, and task files are regular
//! and within the size bound.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use parr_types::{Config, TaskSpec};

use crate::argfile::{self, Separator};
use crate::discover;
use crate::template;
use crate::words::{self, WordsError};

/// Everything the expander needs, already parsed from the outside world.
#[derive(Debug, Clone, Default)]
pub struct ExpandRequest {
    /// Task sources: directories, files, or glob patterns. In arguments mode
    /// at most one entry, interpreted as the template file.
    pub sources: Vec<PathBuf>,
    /// Command template containing `@TASK@`, `@ARG@`, `@ARG_i@` placeholders.
    pub command_template: String,
    /// Arguments file: one task per non-comment line.
    pub arguments_file: Option<PathBuf>,
    /// Separator for splitting argument lines into columns.
    pub separator: Option<Separator>,
    /// Environment variable names bound positionally to the columns.
    pub env_names: Vec<String>,
    /// Extension filter for file discovery, e.g. `txt` or `txt,log,dat`.
    pub extension_filter: Option<String>,
}

/// Spec-validation failures. All are fatal before dispatch.
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("no task sources specified")]
    NoSources,
    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),
    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("task file too large: {path} ({size} bytes, limit {limit})")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("no task files found{0}")]
    NoTasksFound(String),
    #[error("invalid glob pattern {pattern}: {source}")]
    BadGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("arguments file not found: {0}")]
    ArgumentsFileNotFound(PathBuf),
    #[error("arguments file has no usable lines: {0}")]
    EmptyArgumentsFile(PathBuf),
    #[error("inconsistent argument counts: line {line} has {found}, line {first_line} has {expected}")]
    InconsistentArgumentCounts {
        line: usize,
        found: usize,
        first_line: usize,
        expected: usize,
    },
    #[error("unknown separator: {0} (expected space, whitespace, tab, comma, semicolon, pipe, or colon)")]
    UnknownSeparator(String),
    #[error("separator requires an arguments file")]
    SeparatorWithoutArgumentsFile,
    #[error("invalid environment variable name: {0}")]
    InvalidEnvName(String),
    #[error("{env_count} environment variables given but argument lines carry only {arg_count}")]
    TooManyEnvVars { env_count: usize, arg_count: usize },
    #[error("placeholder index out of range: {}", .0.join(", "))]
    PlaceholderOutOfRange(Vec<String>),
    #[error("unmatched argument placeholder: {0}")]
    UnmatchedPlaceholder(String),
    #[error("command contains @TASK@ but no task file is available")]
    TaskPlaceholderWithoutFile,
    #[error("arguments mode requires at most one template file")]
    MultipleTemplates,
    #[error("template file not found: {0}")]
    TemplateNotFound(PathBuf),
    #[error("empty command after parsing")]
    EmptyCommand,
    #[error("argument too long: {length} characters (limit {limit})")]
    ArgumentTooLong { length: usize, limit: usize },
    #[error("invalid command syntax: {0}")]
    Words(#[from] WordsError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Expand a request into the ordered task spec sequence.
///
/// `workspace` is the shared working directory specs start with; the runner
/// substitutes a per-worker subdirectory under isolation.
pub fn expand(
    request: &ExpandRequest,
    config: &Config,
    workspace: &Path,
) -> Result<Vec<TaskSpec>, ExpandError> {
    if request.separator.is_some() && request.arguments_file.is_none() {
        return Err(ExpandError::SeparatorWithoutArgumentsFile);
    }
    template::validate_env_names(&request.env_names)?;

    let drafts = match &request.arguments_file {
        Some(arguments_file) => expand_arguments_mode(request, config, arguments_file)?,
        None => expand_file_mode(request, config)?,
    };

    let total = drafts.len();
    let mut specs = Vec::with_capacity(total);
    for (i, draft) in drafts.into_iter().enumerate() {
        let argv = build_argv(&draft.command, config)?;
        specs.push(TaskSpec {
            index: i + 1,
            total,
            task_file: draft.task_file,
            argv,
            command_display: format!(
                "{}{}",
                template::env_prefix(&draft.env_bindings),
                draft.command
            ),
            env_bindings: draft.env_bindings,
            arguments: draft.arguments,
            working_dir: workspace.to_path_buf(),
        });
    }
    Ok(specs)
}

struct Draft {
    task_file: Option<PathBuf>,
    command: String,
    env_bindings: Vec<(String, String)>,
    arguments: Vec<String>,
}

fn expand_file_mode(request: &ExpandRequest, config: &Config) -> Result<Vec<Draft>, ExpandError> {
    if request.sources.is_empty() {
        return Err(ExpandError::NoSources);
    }
    if let Some(placeholder) = template::first_arg_placeholder(&request.command_template) {
        // @ARG*@ can only be bound from an arguments file
        return Err(ExpandError::UnmatchedPlaceholder(placeholder));
    }
    if !request.env_names.is_empty() {
        warn!("environment variable bindings are ignored without an arguments file");
    }

    let files = discover::discover_task_files(
        &request.sources,
        request.extension_filter.as_deref(),
        config.max_file_size_bytes,
    )?;

    files
        .into_iter()
        .map(|file| {
            let command =
                template::substitute(&request.command_template, Some(file.as_path()), &[])?;
            Ok(Draft {
                task_file: Some(file),
                command,
                env_bindings: Vec::new(),
                arguments: Vec::new(),
            })
        })
        .collect()
}

fn expand_arguments_mode(
    request: &ExpandRequest,
    config: &Config,
    arguments_file: &Path,
) -> Result<Vec<Draft>, ExpandError> {
    if request.sources.len() > 1 {
        return Err(ExpandError::MultipleTemplates);
    }
    let template_file = match request.sources.first() {
        Some(path) => Some(validate_template_file(path, config)?),
        None => None,
    };

    let lines = argfile::read_lines(arguments_file, request.separator)?;
    let arg_count = argfile::uniform_count(&lines)?;

    let env_count = request.env_names.len();
    if env_count > arg_count {
        return Err(ExpandError::TooManyEnvVars { env_count, arg_count });
    }
    if env_count > 0 && env_count < arg_count {
        warn!(
            env_count,
            arg_count,
            "fewer environment variables than argument columns; binding the first {env_count} only"
        );
    }

    lines
        .into_iter()
        .map(|line| {
            let command = template::substitute(
                &request.command_template,
                template_file.as_deref(),
                &line.values,
            )?;
            let env_bindings = request
                .env_names
                .iter()
                .cloned()
                .zip(line.values.iter().cloned())
                .collect();
            Ok(Draft {
                task_file: template_file.clone(),
                command,
                env_bindings,
                arguments: line.values,
            })
        })
        .collect()
}

fn validate_template_file(path: &Path, config: &Config) -> Result<PathBuf, ExpandError> {
    let metadata =
        std::fs::metadata(path).map_err(|_| ExpandError::TemplateNotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(ExpandError::TemplateNotFound(path.to_path_buf()));
    }
    if metadata.len() > config.max_file_size_bytes {
        return Err(ExpandError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: config.max_file_size_bytes,
        });
    }
    path.canonicalize().map_err(|source| ExpandError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn build_argv(command: &str, config: &Config) -> Result<Vec<String>, ExpandError> {
    let argv = words::split(command)?;
    if argv.is_empty() {
        return Err(ExpandError::EmptyCommand);
    }
    for token in &argv {
        let length = token.chars().count();
        if length > config.max_argument_length {
            return Err(ExpandError::ArgumentTooLong {
                length,
                limit: config.max_argument_length,
            });
        }
    }
    Ok(argv)
}
