//! POSIX shell word splitting and quoting.
//!
//! Command templates are substituted textually and then split into argv
//! tokens with POSIX semantics: unquoted whitespace separates words, `'…'`
//! preserves everything literally, `"…"` preserves everything except
//! `\"`, `\\`, `\$`, `` \` `` escapes, and a bare backslash escapes the next
//! character. `quote()` is the inverse used for substituted values, so a
//! value containing spaces stays inside a single argv token.

use thiserror::Error;

/// Word-splitting errors. Always a spec-validation failure, never recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordsError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    #[error("trailing backslash")]
    TrailingBackslash,
}

/// Split a command string into argv tokens using POSIX shell rules.
///
/// Quote removal is performed: the returned tokens contain the quoted
/// content, not the quote characters.
pub fn split(input: &str) -> Result<Vec<String>, WordsError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(WordsError::UnterminatedSingleQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\' | '$' | '`')) => current.push(esc),
                            // Line continuation inside double quotes
                            Some('\n') => {}
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(WordsError::UnterminatedDoubleQuote),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(WordsError::UnterminatedDoubleQuote),
                    }
                }
            }
            '\\' => match chars.next() {
                // Line continuation: backslash-newline disappears
                Some('\n') => {}
                Some(esc) => {
                    in_word = true;
                    current.push(esc);
                }
                None => return Err(WordsError::TrailingBackslash),
            },
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Quote a value so that `split` returns it as exactly one token.
///
/// Values made only of shell-safe characters pass through unchanged;
/// everything else is wrapped in single quotes, with embedded single quotes
/// rendered as `'\''`.
pub fn quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(is_shell_safe) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-' | '_')
}
