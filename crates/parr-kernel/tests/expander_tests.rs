//! Input expander integration tests: discovery, arguments files, placeholders.

use std::path::{Path, PathBuf};

use rstest::rstest;
use tempfile::TempDir;

use parr_kernel::expand::{ExpandError, ExpandRequest, expand};
use parr_kernel::{Separator, words};
use parr_types::Config;

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn request(command: &str) -> ExpandRequest {
    ExpandRequest {
        command_template: command.to_string(),
        ..ExpandRequest::default()
    }
}

fn workspace(dir: &TempDir) -> PathBuf {
    dir.path().join("workspace")
}

#[test]
fn discovers_directory_children_sorted_and_filtered() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "b.txt", "b");
    write_file(dir.path(), "a.txt", "a");
    write_file(dir.path(), "c.log", "c");

    let mut req = request("cat @TASK@");
    req.sources = vec![dir.path().to_path_buf()];
    req.extension_filter = Some("txt".to_string());

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 2);
    assert!(specs[0].task_file.as_ref().unwrap().ends_with("a.txt"));
    assert!(specs[1].task_file.as_ref().unwrap().ends_with("b.txt"));
    assert_eq!(specs[0].index, 1);
    assert_eq!(specs[0].total, 2);
    assert_eq!(specs[1].index, 2);
}

#[test]
fn deduplicates_overlapping_sources() {
    let dir = TempDir::new().unwrap();
    let file = write_file(dir.path(), "only.txt", "x");

    let mut req = request("cat @TASK@");
    req.sources = vec![dir.path().to_path_buf(), file];

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 1);
}

#[test]
fn expands_glob_sources() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "t1.txt", "1");
    write_file(dir.path(), "t2.txt", "2");
    write_file(dir.path(), "skip.log", "3");

    let mut req = request("cat @TASK@");
    req.sources = vec![dir.path().join("*.txt")];

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 2);
}

#[test]
fn missing_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut req = request("cat @TASK@");
    req.sources = vec![dir.path().join("absent")];
    assert!(matches!(
        expand(&req, &Config::default(), &workspace(&dir)),
        Err(ExpandError::PathNotFound(_))
    ));
}

#[test]
fn oversized_task_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "big.txt", "0123456789");

    let mut req = request("cat @TASK@");
    req.sources = vec![dir.path().to_path_buf()];
    let config = Config {
        max_file_size_bytes: 4,
        ..Config::default()
    };
    assert!(matches!(
        expand(&req, &config, &workspace(&dir)),
        Err(ExpandError::FileTooLarge { .. })
    ));
}

#[test]
fn file_mode_rejects_arg_placeholders() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "t.txt", "x");
    let mut req = request("run @ARG@");
    req.sources = vec![dir.path().to_path_buf()];
    let err = expand(&req, &Config::default(), &workspace(&dir)).unwrap_err();
    assert!(err.to_string().contains("unmatched argument placeholder"));
}

#[rstest]
#[case("comma", "val1,val2,val3")]
#[case("semicolon", "val1;val2;val3")]
#[case("pipe", "val1|val2|val3")]
#[case("colon", "val1:val2:val3")]
#[case("space", "val1 val2 val3")]
#[case("tab", "val1\tval2\tval3")]
#[case("whitespace", "val1 \tval2\t val3")]
fn every_separator_splits_columns(#[case] name: &str, #[case] line: &str) {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", &format!("{line}\n"));

    let mut req = request("/bin/echo @ARG_1@ @ARG_2@ @ARG_3@");
    req.arguments_file = Some(args);
    req.separator = Some(Separator::parse(name).unwrap());

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].arguments, vec!["val1", "val2", "val3"]);
    assert_eq!(specs[0].argv, vec!["/bin/echo", "val1", "val2", "val3"]);
}

#[test]
fn inconsistent_column_counts_fail() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "a,1\nb,2,3\n");

    let mut req = request("/bin/echo @ARG_1@");
    req.arguments_file = Some(args);
    req.separator = Some(Separator::Comma);

    let err = expand(&req, &Config::default(), &workspace(&dir)).unwrap_err();
    assert!(err.to_string().contains("inconsistent argument counts"));
}

#[test]
fn more_env_vars_than_columns_fails() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "a,1\n");

    let mut req = request("/bin/echo @ARG_1@");
    req.arguments_file = Some(args);
    req.separator = Some(Separator::Comma);
    req.env_names = vec!["A".into(), "B".into(), "C".into()];

    assert!(matches!(
        expand(&req, &Config::default(), &workspace(&dir)),
        Err(ExpandError::TooManyEnvVars { env_count: 3, arg_count: 2 })
    ));
}

#[test]
fn fewer_env_vars_bind_a_prefix() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "a,1,prod\n");

    let mut req = request("/bin/echo @ARG_1@");
    req.arguments_file = Some(args);
    req.separator = Some(Separator::Comma);
    req.env_names = vec!["HOST".into()];

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs[0].env_bindings, vec![("HOST".to_string(), "a".to_string())]);
}

#[test]
fn env_bindings_preserve_order_and_show_in_display() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "server1,8080,prod\n");

    let mut req = request("/bin/echo @ARG_1@");
    req.arguments_file = Some(args);
    req.separator = Some(Separator::Comma);
    req.env_names = vec!["HOST".into(), "PORT".into(), "ENV".into()];

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(
        specs[0].env_bindings,
        vec![
            ("HOST".to_string(), "server1".to_string()),
            ("PORT".to_string(), "8080".to_string()),
            ("ENV".to_string(), "prod".to_string()),
        ]
    );
    assert!(specs[0].command_display.starts_with("HOST=server1 PORT=8080 ENV=prod "));
}

#[test]
fn separator_without_arguments_file_fails() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "t.txt", "x");
    let mut req = request("cat @TASK@");
    req.sources = vec![dir.path().to_path_buf()];
    req.separator = Some(Separator::Comma);
    assert!(matches!(
        expand(&req, &Config::default(), &workspace(&dir)),
        Err(ExpandError::SeparatorWithoutArgumentsFile)
    ));
}

#[test]
fn out_of_range_placeholders_report_every_offender() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "a,b\n");

    let mut req = request("run @ARG_1@ @ARG_3@ @ARG_7@");
    req.arguments_file = Some(args);
    req.separator = Some(Separator::Comma);

    match expand(&req, &Config::default(), &workspace(&dir)) {
        Err(ExpandError::PlaceholderOutOfRange(offenders)) => {
            assert_eq!(offenders, vec!["@ARG_3@", "@ARG_7@"]);
        }
        other => panic!("expected PlaceholderOutOfRange, got {other:?}"),
    }
}

#[test]
fn arguments_only_mode_needs_no_template() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "alpha\nbeta\n");

    let mut req = request("/bin/echo @ARG@");
    req.arguments_file = Some(args);

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 2);
    assert!(specs[0].task_file.is_none());
    assert_eq!(specs[0].argv, vec!["/bin/echo", "alpha"]);
    assert_eq!(specs[1].argv, vec!["/bin/echo", "beta"]);
}

#[test]
fn arguments_only_mode_rejects_task_placeholder() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "alpha\n");

    let mut req = request("run @TASK@ @ARG@");
    req.arguments_file = Some(args);

    assert!(matches!(
        expand(&req, &Config::default(), &workspace(&dir)),
        Err(ExpandError::TaskPlaceholderWithoutFile)
    ));
}

#[test]
fn template_binds_task_and_argument_lines() {
    let dir = TempDir::new().unwrap();
    let template = write_file(dir.path(), "template.sh", "#!/bin/sh\n");
    let args = write_file(dir.path(), "args.txt", "# hosts\nalpha\n\nbeta\n");

    let mut req = request("bash @TASK@ @ARG@");
    req.sources = vec![template.clone()];
    req.arguments_file = Some(args);
    req.env_names = vec!["HOST".into()];

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 2);
    let canonical = template.canonicalize().unwrap();
    for (spec, expected) in specs.iter().zip(["alpha", "beta"]) {
        assert_eq!(spec.task_file.as_deref(), Some(canonical.as_path()));
        assert_eq!(
            spec.argv,
            vec![
                "bash".to_string(),
                canonical.to_string_lossy().into_owned(),
                expected.to_string()
            ]
        );
        assert_eq!(spec.env_bindings, vec![("HOST".to_string(), expected.to_string())]);
    }
}

#[test]
fn values_with_spaces_stay_single_argv_tokens() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", "hello world\n");

    let mut req = request("/bin/echo @ARG@");
    req.arguments_file = Some(args);

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs[0].argv, vec!["/bin/echo", "hello world"]);
    // And the display form round-trips through the word splitter
    let tokens = words::split(specs[0].command_display.as_str()).unwrap();
    assert_eq!(tokens, vec!["/bin/echo", "hello world"]);
}

#[test]
fn overlong_argument_is_rejected() {
    let dir = TempDir::new().unwrap();
    let args = write_file(dir.path(), "args.txt", &format!("{}\n", "x".repeat(50)));

    let mut req = request("/bin/echo @ARG@");
    req.arguments_file = Some(args);
    let config = Config {
        max_argument_length: 10,
        ..Config::default()
    };
    assert!(matches!(
        expand(&req, &config, &workspace(&dir)),
        Err(ExpandError::ArgumentTooLong { .. })
    ));
}

#[test]
fn line_count_equals_task_count() {
    let dir = TempDir::new().unwrap();
    let content = "one\ntwo\n# comment\nthree\n\nfour\n";
    let args = write_file(dir.path(), "args.txt", content);

    let mut req = request("/bin/echo @ARG@");
    req.arguments_file = Some(args);

    let specs = expand(&req, &Config::default(), &workspace(&dir)).unwrap();
    assert_eq!(specs.len(), 4);
    assert_eq!(specs.last().unwrap().total, 4);
}
