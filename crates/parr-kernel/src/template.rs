//! Placeholder substitution for command templates.
//!
//! `@TASK@` binds the absolute task-file path; `@ARG@` is shorthand for
//! `@ARG_1@`; `@ARG_i@` binds column `i` (1-based) of the argument line.
//! Substituted values are shell-quoted so a value with spaces stays inside a
//! single argv token after word splitting. Substitution is a single pass
//! over the template, so substituted values are never rescanned for
//! placeholders.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::expand::ExpandError;
use crate::words::quote;

static ARG_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@ARG(?:_(\d+))?@").expect("placeholder pattern"));

/// Name pattern for environment variable bindings.
static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env name pattern"));

/// Substitute every placeholder in `command`.
///
/// With no arguments available, any `@ARG*@` placeholder is an error; an
/// index outside `1..=arguments.len()` fails with every offending
/// placeholder listed.
pub fn substitute(
    command: &str,
    task_file: Option<&Path>,
    arguments: &[String],
) -> Result<String, ExpandError> {
    let command = if command.contains("@TASK@") {
        let task_file = task_file.ok_or(ExpandError::TaskPlaceholderWithoutFile)?;
        command.replace("@TASK@", &quote(&task_file.to_string_lossy()))
    } else {
        command.to_string()
    };

    let mut offenders = Vec::new();
    for captures in ARG_PLACEHOLDER.captures_iter(&command) {
        let placeholder = captures.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
        if arguments.is_empty() {
            return Err(ExpandError::UnmatchedPlaceholder(placeholder));
        }
        let index: usize = match captures.get(1) {
            Some(digits) => digits.as_str().parse().unwrap_or(usize::MAX),
            None => 1,
        };
        if index < 1 || index > arguments.len() {
            if !offenders.contains(&placeholder) {
                offenders.push(placeholder);
            }
        }
    }
    if !offenders.is_empty() {
        return Err(ExpandError::PlaceholderOutOfRange(offenders));
    }

    let substituted = ARG_PLACEHOLDER.replace_all(&command, |captures: &regex::Captures| {
        let index: usize = captures
            .get(1)
            .map(|digits| digits.as_str().parse().unwrap_or(1))
            .unwrap_or(1);
        quote(&arguments[index - 1])
    });
    Ok(substituted.into_owned())
}

/// First `@ARG*@` placeholder in the template, if any.
pub fn first_arg_placeholder(command: &str) -> Option<String> {
    ARG_PLACEHOLDER
        .find(command)
        .map(|found| found.as_str().to_string())
}

/// Render env bindings as a `NAME=value ` command prefix for display.
pub fn env_prefix(bindings: &[(String, String)]) -> String {
    if bindings.is_empty() {
        return String::new();
    }
    let mut prefix = String::new();
    for (name, value) in bindings {
        prefix.push_str(name);
        prefix.push('=');
        prefix.push_str(&quote(value));
        prefix.push(' ');
    }
    prefix
}

/// Reject names the child environment could not carry.
pub fn validate_env_names(names: &[String]) -> Result<(), ExpandError> {
    for name in names {
        if !ENV_NAME.is_match(name) {
            return Err(ExpandError::InvalidEnvName(name.clone()));
        }
    }
    Ok(())
}
