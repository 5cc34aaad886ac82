use std::fs;
use std::path::Path;
use std::process::Command;

use clap::Parser;
use smartcollect::cli::Cli;
use smartcollect::run::{Selection, resolve_config, select};
use smartcollect_analysis::TestOutcome;
use smartcollect_config::SmartCollectConfig;
use tempfile::tempdir;

const HELLO: &str = "def hello():\n    return 'hi'\n\n\ndef goodbye():\n    return 'bye'\n";
const TEST_HELLO: &str =
    "from hello import hello\n\n\ndef test_hello():\n    assert hello() == 'hi'\n";
const TEST_GOODBYE: &str =
    "from hello import goodbye\n\n\ndef test_goodbye():\n    assert goodbye() == 'bye'\n";

fn init_repo(workspace: &Path) {
    run_git(workspace, &["init", "-q"]);
    run_git(workspace, &["config", "user.email", "tester@example.com"]);
    run_git(workspace, &["config", "user.name", "Tester"]);
    run_git(workspace, &["config", "commit.gpgsign", "false"]);
}

fn commit_all(workspace: &Path, message: &str) {
    run_git(workspace, &["add", "-A"]);
    run_git(workspace, &["commit", "-q", "-m", message]);
}

fn run_git(workspace: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {:?} failed", args);
}

fn write(root: &Path, path: &str, source: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, source).expect("write");
}

fn outcome<'a>(selection: &'a Selection, test_id: &str) -> &'a TestOutcome {
    &selection
        .decisions
        .iter()
        .find(|decision| decision.test_id == test_id)
        .unwrap_or_else(|| panic!("no decision for {test_id}"))
        .outcome
}

fn config_for(workspace: &Path, args: &[&str]) -> SmartCollectConfig {
    let mut argv = vec!["smartcollect", "--workspace"];
    let workspace_arg = workspace.to_string_lossy().into_owned();
    argv.push(workspace_arg.as_str());
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).expect("cli");
    resolve_config(&cli, workspace).expect("config")
}

fn hello_project() -> (tempfile::TempDir, std::path::PathBuf) {
    let temp = tempdir().expect("tempdir");
    let workspace = temp.path().canonicalize().expect("workspace");
    init_repo(&workspace);
    write(&workspace, "hello.py", HELLO);
    write(&workspace, "test_hello.py", TEST_HELLO);
    write(&workspace, "test_goodbye.py", TEST_GOODBYE);
    commit_all(&workspace, "initial");
    (temp, workspace)
}

#[test]
fn single_commit_history_runs_every_test_as_new() {
    let (_temp, workspace) = hello_project();

    let selection = select(&workspace, &SmartCollectConfig::default(), false).expect("select");

    assert_eq!(selection.decisions.len(), 2);
    assert_eq!(
        outcome(&selection, "test_hello.py::test_hello"),
        &TestOutcome::RunNewTest
    );
    assert_eq!(
        outcome(&selection, "test_goodbye.py::test_goodbye"),
        &TestOutcome::RunNewTest
    );
}

#[test]
fn modified_function_selects_only_its_tests() {
    let (_temp, workspace) = hello_project();
    write(
        &workspace,
        "hello.py",
        &HELLO.replace("return 'hi'", "return 'hello'"),
    );
    commit_all(&workspace, "change greeting");

    let selection = select(&workspace, &SmartCollectConfig::default(), false).expect("select");

    assert_eq!(
        outcome(&selection, "test_hello.py::test_hello"),
        &TestOutcome::RunDependencyChanged {
            chain: vec![
                "test_hello.py::test_hello".to_owned(),
                "hello.py::hello".to_owned(),
            ],
        }
    );
    assert_eq!(
        outcome(&selection, "test_goodbye.py::test_goodbye"),
        &TestOutcome::SkipUnchanged
    );
    assert_eq!(selection.selected().count(), 1);
    assert_eq!(selection.log.len(), 2);
}

#[test]
fn all_files_flag_overrides_the_diff() {
    let (_temp, workspace) = hello_project();
    write(&workspace, "README.md", "docs only\n");
    commit_all(&workspace, "docs");

    let diffed = select(&workspace, &SmartCollectConfig::default(), false).expect("select");
    assert_eq!(diffed.selected().count(), 0);

    let everything = select(&workspace, &SmartCollectConfig::default(), true).expect("select");
    assert_eq!(everything.selected().count(), 2);
}

#[test]
fn ignored_sources_do_not_trigger_tests() {
    let (_temp, workspace) = hello_project();
    write(
        &workspace,
        "hello.py",
        &HELLO.replace("return 'bye'", "return 'farewell'"),
    );
    commit_all(&workspace, "change farewell");

    let config = config_for(&workspace, &["--ignore-source", "hello.py"]);
    let selection = select(&workspace, &config, false).expect("select");

    assert_eq!(
        outcome(&selection, "test_goodbye.py::test_goodbye"),
        &TestOutcome::SkipUnchanged
    );
}

#[test]
fn last_failed_cache_forces_a_run() {
    let (_temp, workspace) = hello_project();
    write(&workspace, "notes.py", "NOTE = 1\n");
    commit_all(&workspace, "unrelated");
    write(
        &workspace,
        ".pytest_cache/v/cache/lastfailed",
        r#"{"test_goodbye.py::test_goodbye": true}"#,
    );

    let selection = select(&workspace, &SmartCollectConfig::default(), false).expect("select");

    assert_eq!(
        outcome(&selection, "test_goodbye.py::test_goodbye"),
        &TestOutcome::RunPreviouslyFailed
    );
    assert_eq!(
        outcome(&selection, "test_hello.py::test_hello"),
        &TestOutcome::SkipUnchanged
    );
}

#[test]
fn deleted_module_still_imported_fails_unless_downgraded() {
    let (_temp, workspace) = hello_project();
    write(&workspace, "legacy.py", "def old():\n    return 1\n");
    write(
        &workspace,
        "test_legacy.py",
        "import legacy\n\n\ndef test_old():\n    assert legacy.old() == 1\n",
    );
    commit_all(&workspace, "add legacy");
    fs::remove_file(workspace.join("legacy.py")).expect("remove");
    commit_all(&workspace, "drop legacy");

    let strict = select(&workspace, &SmartCollectConfig::default(), false)
        .expect_err("dangling import is fatal");
    assert!(format!("{strict:#}").contains("legacy"));

    let config = config_for(
        &workspace,
        &["--warn-dangling-references", "--warn-unresolved-imports"],
    );
    let relaxed = select(&workspace, &config, false).expect("downgraded to warnings");
    assert!(
        relaxed
            .warnings
            .iter()
            .any(|warning| warning.code == "dangling_reference")
    );
}

#[test]
fn report_file_has_one_row_per_decision() {
    let (_temp, workspace) = hello_project();
    let selection = select(&workspace, &SmartCollectConfig::default(), false).expect("select");

    let mut out = Vec::new();
    selection
        .log
        .write_delimited(&mut out, ',')
        .expect("write report");
    let text = String::from_utf8(out).expect("utf8");
    let lines = text.lines().collect::<Vec<_>>();

    assert_eq!(lines[0], "decision,test_id,reason");
    assert_eq!(lines.len(), 3);
    assert!(lines[1..].iter().all(|line| line.starts_with("run,")));
}
