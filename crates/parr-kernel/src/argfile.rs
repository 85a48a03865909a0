//! Arguments-file parsing.
//!
//! UTF-8 text, one task per line. Blank lines and lines whose first
//! non-whitespace character is `#` are skipped. Remaining lines are split by
//! the selected separator into columns; every kept line must produce the
//! same column count.

use std::path::Path;

use crate::expand::ExpandError;

/// Column separator for argument lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// One-or-more ASCII spaces.
    Space,
    /// Any whitespace run (spaces and tabs).
    Whitespace,
    /// One-or-more tabs.
    Tab,
    Comma,
    Semicolon,
    Pipe,
    Colon,
}

impl Separator {
    pub fn parse(name: &str) -> Result<Self, ExpandError> {
        match name {
            "space" => Ok(Separator::Space),
            "whitespace" => Ok(Separator::Whitespace),
            "tab" => Ok(Separator::Tab),
            "comma" => Ok(Separator::Comma),
            "semicolon" => Ok(Separator::Semicolon),
            "pipe" => Ok(Separator::Pipe),
            "colon" => Ok(Separator::Colon),
            other => Err(ExpandError::UnknownSeparator(other.to_string())),
        }
    }

    /// Split one line into trimmed, non-empty columns.
    pub fn split(self, line: &str) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Separator::Whitespace => return line.split_whitespace().map(String::from).collect(),
            Separator::Space => line.split(' ').collect(),
            Separator::Tab => line.split('\t').collect(),
            Separator::Comma => line.split(',').collect(),
            Separator::Semicolon => line.split(';').collect(),
            Separator::Pipe => line.split('|').collect(),
            Separator::Colon => line.split(':').collect(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect()
    }
}

/// One kept line of the arguments file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgLine {
    /// 1-based line number in the file (comments and blanks included).
    pub line_no: usize,
    pub values: Vec<String>,
}

/// Read and split the arguments file.
pub fn read_lines(path: &Path, separator: Option<Separator>) -> Result<Vec<ArgLine>, ExpandError> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ExpandError::ArgumentsFileNotFound(path.to_path_buf())
        } else {
            ExpandError::Unreadable {
                path: path.to_path_buf(),
                source: err,
            }
        }
    })?;

    let mut lines = Vec::new();
    for (line_no, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let values = match separator {
            Some(sep) => sep.split(trimmed),
            None => vec![trimmed.to_string()],
        };
        if values.is_empty() {
            // A line of pure separators carries nothing
            continue;
        }
        lines.push(ArgLine {
            line_no: line_no + 1,
            values,
        });
    }

    if lines.is_empty() {
        return Err(ExpandError::EmptyArgumentsFile(path.to_path_buf()));
    }
    Ok(lines)
}

/// Require every line to carry the same column count; return it.
pub fn uniform_count(lines: &[ArgLine]) -> Result<usize, ExpandError> {
    let first = &lines[0];
    let expected = first.values.len();
    for line in &lines[1..] {
        if line.values.len() != expected {
            return Err(ExpandError::InconsistentArgumentCounts {
                line: line.line_no,
                found: line.values.len(),
                first_line: first.line_no,
                expected,
            });
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn separator_names_parse() {
        assert_eq!(Separator::parse("comma").unwrap(), Separator::Comma);
        assert_eq!(Separator::parse("whitespace").unwrap(), Separator::Whitespace);
        assert!(matches!(
            Separator::parse("dash"),
            Err(ExpandError::UnknownSeparator(_))
        ));
    }

    #[test]
    fn space_splits_on_runs_but_not_tabs() {
        assert_eq!(Separator::Space.split("a  b   c"), vec!["a", "b", "c"]);
        // A tab is not a space separator; it survives inside the column
        assert_eq!(Separator::Space.split("a\tb c"), vec!["a\tb", "c"]);
    }

    #[test]
    fn whitespace_splits_on_spaces_and_tabs() {
        assert_eq!(Separator::Whitespace.split("a \t b"), vec!["a", "b"]);
    }

    #[test]
    fn single_char_separators_trim_and_drop_empties() {
        assert_eq!(Separator::Comma.split("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(Separator::Comma.split("a,,b"), vec!["a", "b"]);
        assert_eq!(Separator::Pipe.split("x|y|z"), vec!["x", "y", "z"]);
        assert_eq!(Separator::Colon.split("x:y"), vec!["x", "y"]);
        assert_eq!(Separator::Semicolon.split("x;y"), vec!["x", "y"]);
    }

    #[test]
    fn skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "args.txt", "# header\n\nalpha\n  # indented comment\nbeta\n");
        let lines = read_lines(&path, None).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].values, vec!["alpha"]);
        assert_eq!(lines[0].line_no, 3);
        assert_eq!(lines[1].values, vec!["beta"]);
        assert_eq!(lines[1].line_no, 5);
    }

    #[test]
    fn without_separator_the_line_is_one_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "args.txt", "one two three\n");
        let lines = read_lines(&path, None).unwrap();
        assert_eq!(lines[0].values, vec!["one two three"]);
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "args.txt", "# only comments\n\n");
        assert!(matches!(
            read_lines(&path, None),
            Err(ExpandError::EmptyArgumentsFile(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        assert!(matches!(
            read_lines(&path, None),
            Err(ExpandError::ArgumentsFileNotFound(_))
        ));
    }

    #[test]
    fn uniform_count_accepts_equal_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "args.txt", "a,1,prod\nb,2,dev\n");
        let lines = read_lines(&path, Some(Separator::Comma)).unwrap();
        assert_eq!(uniform_count(&lines).unwrap(), 3);
    }

    #[test]
    fn uniform_count_rejects_mismatched_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "args.txt", "a,1\nb,2,3\n");
        let lines = read_lines(&path, Some(Separator::Comma)).unwrap();
        let err = uniform_count(&lines).unwrap_err();
        assert!(err.to_string().contains("inconsistent argument counts"));
        assert!(err.to_string().contains("line 2"));
    }
}
