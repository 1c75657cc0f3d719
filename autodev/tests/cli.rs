use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use autodev::core::types::{FinalStatus, Task, TaskMode};
use autodev::exit_codes;
use autodev::io::task_log::{TaskLogStore, TaskLogger};
use autodev::test_support::TestRepo;

fn autodev(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autodev"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("run autodev")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn dry_run_prints_next_backlog_task() {
    let repo = TestRepo::new().expect("repo");
    repo.write("TODO.md", "- [x] done\n- [ ] add widgets\n**NEXT STEP**: fix parser\n")
        .expect("write");

    let output = autodev(&["--dry-run"], repo.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("fix parser"));
    // Nothing ran, so nothing was logged or changed.
    assert!(!repo.path().join("logs").exists());
}

#[test]
fn dry_run_outside_a_repository_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = autodev(&["--dry-run"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&output).contains("not a git repository"));
}

#[test]
fn analyze_logs_reports_statistics() {
    let temp = tempfile::tempdir().expect("tempdir");
    let logs = temp.path().join("logs");
    let store = TaskLogStore::new(&logs);

    let mut failed = TaskLogger::new(&Task::manual("broken task"), TaskMode::SingleTask);
    failed.add_error("Verification error: type mismatch");
    store
        .save(&failed.finish(FinalStatus::FailedVerification))
        .expect("save");
    store
        .save(
            &TaskLogger::new(&Task::manual("good task"), TaskMode::SingleTask)
                .finish(FinalStatus::CompletedSuccessfully),
        )
        .expect("save");
    fs::write(logs.join("task_corrupt.json"), "not json").expect("write");

    let output = autodev(
        &["--analyze-logs", "--log-dir", logs.to_str().expect("utf8")],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Total tasks: 2"));
    assert!(out.contains("Successful: 1 (50.0%)"));
    assert!(out.contains("Failed verification: 1 (50.0%)"));
    assert!(out.contains("(1 occurrences) Verification error: type mismatch"));
    assert!(out.contains("warning: Error reading task_corrupt.json"));
}

#[test]
fn analyze_logs_with_log_dir_ignores_repository_and_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let logs = temp.path().join("logs");
    TaskLogStore::new(&logs)
        .save(
            &TaskLogger::new(&Task::manual("good task"), TaskMode::SingleTask)
                .finish(FinalStatus::CompletedSuccessfully),
        )
        .expect("save");
    fs::write(temp.path().join("autodev.toml"), "max_attempts = \"lots\"\n").expect("write");

    let output = autodev(
        &["--analyze-logs", "--log-dir", "logs", "--repo", "missing-repo"],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("Total tasks: 1"));
}

#[test]
fn show_log_validates_attempt_number() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = TaskLogStore::new(temp.path());
    let path = store
        .save(
            &TaskLogger::new(&Task::manual("empty"), TaskMode::Interactive)
                .finish(FinalStatus::FailedUnknown),
        )
        .expect("save");
    let path = path.to_str().expect("utf8");

    let output = autodev(&["--show-log", path], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("Final status: failed_unknown"));

    let output = autodev(&["--show-log", path, "--attempt", "1"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&output).contains("Valid range: 1-0"));
}

#[test]
fn single_task_with_command_backend_commits() {
    let repo = TestRepo::new().expect("repo");
    let reply = r#"{"analysis":"add","files":[{"path":"hello.txt","action":"create","content":"hello\n","explanation":"greeting"}],"commit_message":"feat: add hello"}"#;
    repo.write("reply.json", reply).expect("write");
    repo.write(
        "autodev.toml",
        "push = false\n\
         [generator]\nbackend = \"command\"\ncommand = [\"sh\", \"-c\", \"cat >/dev/null; cat reply.json\"]\n\
         [verifier]\ncommand = [\"test\", \"-f\", \"hello.txt\"]\n",
    )
    .expect("write");
    repo.commit_all("chore: setup").expect("commit");

    let output = autodev(&["--task", "add hello"], repo.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("completed_successfully (1 attempts): add hello"));
    assert_eq!(repo.read("hello.txt").expect("read"), "hello\n");
    assert_eq!(repo.log_subjects().expect("log")[0], "feat: add hello");
}

#[test]
fn failing_task_exits_with_task_failed() {
    let repo = TestRepo::new().expect("repo");
    repo.write(
        "autodev.toml",
        "push = false\nmax_attempts = 2\n\
         [generator]\nbackend = \"command\"\ncommand = [\"sh\", \"-c\", \"echo not json\"]\n\
         [verifier]\ncommand = [\"true\"]\n",
    )
    .expect("write");
    repo.commit_all("chore: setup").expect("commit");

    let output = autodev(&["--task", "anything"], repo.path());
    assert_eq!(output.status.code(), Some(exit_codes::TASK_FAILED));
    assert!(stdout(&output).contains("failed_json_parsing (2 attempts)"));
}
