#![cfg(unix)]

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const EDIT_README: &str = "README.md\n<<<<<<< SEARCH\nhello\n=======\nhello world\n>>>>>>> REPLACE\n";
const EDIT_README_AGAIN: &str =
    "README.md\n<<<<<<< SEARCH\nhello world\n=======\ngoodbye world\n>>>>>>> REPLACE\n";

fn setup_fake_codex(dir: &Path, responses: &[&str]) -> std::io::Result<PathBuf> {
    let bin_dir = dir.join("bin");
    fs::create_dir_all(&bin_dir)?;

    let llm_dir = dir.join("llm");
    fs::create_dir_all(&llm_dir)?;

    for (index, response) in responses.iter().enumerate() {
        let mut file = fs::File::create(llm_dir.join(index.to_string()))?;
        file.write_all(response.as_bytes())?;
    }

    let script_path = bin_dir.join("codex");
    let mut script = fs::File::create(&script_path)?;
    script.write_all(
        br#"#!/bin/bash
set -euo pipefail

cat > /dev/null

DIR="${FAKE_LLM_DIR:?}"
COUNTER_FILE="$DIR/counter"

if [[ ! -f "$COUNTER_FILE" ]]; then
  echo 0 > "$COUNTER_FILE"
fi

COUNTER=$(cat "$COUNTER_FILE")
RESPONSE_FILE="$DIR/$COUNTER"

if [[ ! -f "$RESPONSE_FILE" ]]; then
  echo "fake codex: no response prepared for index $COUNTER" >&2
  exit 1
fi

cat "$RESPONSE_FILE"
COUNTER=$((COUNTER + 1))
echo "$COUNTER" > "$COUNTER_FILE"
"#,
    )?;

    drop(script);
    let mut perms = fs::metadata(&script_path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms)?;

    Ok(llm_dir)
}

fn prepend_path(bin_dir: &Path) -> String {
    let current = std::env::var("PATH").unwrap_or_else(|_| String::new());
    format!("{}:{}", bin_dir.display(), current)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir, &["config", "user.name", "Tester"]);
    git(dir, &["config", "user.email", "tester@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(dir, &["add", "README.md"]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

fn commit_plan(dir: &Path, plan: &str) {
    fs::write(dir.join("plan.md"), plan).unwrap();
    git(dir, &["add", "plan.md"]);
    git(dir, &["commit", "-q", "-m", "plan"]);
}

/// The binary under test, inside `workdir`, answering through the fake codex.
fn pairline(workdir: &Path, harness: &Path, llm_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pairline").unwrap();
    cmd.current_dir(workdir)
        .env("PATH", prepend_path(&harness.join("bin")))
        .env("FAKE_LLM_DIR", llm_dir)
        .args(["--backend", "tools", "--tools", "codex", "--yes-always"]);
    cmd
}

#[test]
fn code_from_plan_runs_counted_steps() {
    let harness = tempdir().unwrap();
    let repo = tempdir().unwrap();
    init_repo(repo.path());
    commit_plan(repo.path(), "## Step 1\nGreet the world\n## Step 2\nSay goodbye\n");

    let llm_dir = setup_fake_codex(
        harness.path(),
        &[
            "2",
            "README.md",
            "README.md",
            EDIT_README,
            "feat: greet the world",
            EDIT_README_AGAIN,
            "feat: say goodbye",
        ],
    )
    .unwrap();

    pairline(repo.path(), harness.path(), &llm_dir)
        .args(["code-from-plan", "plan.md"])
        .assert()
        .success()
        .stdout(contains("Found 2 steps in the plan."))
        .stdout(contains("Implementing step 2"))
        .stdout(contains("Plan execution completed!"));

    assert_eq!(
        fs::read_to_string(repo.path().join("README.md")).unwrap(),
        "goodbye world\n"
    );
    let log = git(repo.path(), &["log", "--format=%s"]);
    assert!(log.starts_with("feat: say goodbye\nfeat: greet the world\n"));
    let author = git(repo.path(), &["log", "-1", "--format=%an"]);
    assert_eq!(author.trim(), "Tester (pairline)");
}

#[test]
fn code_from_plan_without_step_count_runs_whole_plan() {
    let harness = tempdir().unwrap();
    let repo = tempdir().unwrap();
    init_repo(repo.path());
    commit_plan(repo.path(), "Greet the world.\n");

    let llm_dir = setup_fake_codex(
        harness.path(),
        &["quite a few", "README.md", EDIT_README, "feat: greet the world"],
    )
    .unwrap();

    pairline(repo.path(), harness.path(), &llm_dir)
        .args(["code-from-plan", "plan.md"])
        .assert()
        .success()
        .stderr(contains(
            "Unable to determine number of steps. Will try to solve them all at once.",
        ))
        .stdout(contains("Implementing step 1"));

    assert_eq!(
        fs::read_to_string(repo.path().join("README.md")).unwrap(),
        "hello world\n"
    );
}

#[test]
fn chat_edit_then_undo() {
    let harness = tempdir().unwrap();
    let repo = tempdir().unwrap();
    init_repo(repo.path());

    let llm_dir =
        setup_fake_codex(harness.path(), &[EDIT_README, "docs: widen greeting"]).unwrap();

    pairline(repo.path(), harness.path(), &llm_dir)
        .args(["chat", "--file", "README.md"])
        .write_stdin("say hello to the world\n/undo\n")
        .assert()
        .success()
        .stdout(contains("Applied edit to README.md"))
        .stdout(contains("Removed:"));

    assert_eq!(
        fs::read_to_string(repo.path().join("README.md")).unwrap(),
        "hello\n"
    );
    let log = git(repo.path(), &["log", "--format=%s"]);
    assert_eq!(log.trim(), "initial");
}

#[test]
fn commit_subcommand_writes_message_with_model() {
    let harness = tempdir().unwrap();
    let repo = tempdir().unwrap();
    init_repo(repo.path());
    fs::write(repo.path().join("README.md"), "hello again\n").unwrap();

    let llm_dir = setup_fake_codex(harness.path(), &["docs: say hello again"]).unwrap();

    pairline(repo.path(), harness.path(), &llm_dir)
        .arg("commit")
        .assert()
        .success();

    let log = git(repo.path(), &["log", "-1", "--format=%s"]);
    assert_eq!(log.trim(), "docs: say hello again");
}

#[test]
fn save_and_load_restore_chat_files() {
    let harness = tempdir().unwrap();
    let repo = tempdir().unwrap();
    init_repo(repo.path());
    fs::write(repo.path().join("notes.md"), "notes\n").unwrap();
    let llm_dir = setup_fake_codex(harness.path(), &[]).unwrap();

    pairline(repo.path(), harness.path(), &llm_dir)
        .args(["chat", "--file", "README.md", "--read", "notes.md", "--message", "/save session.txt"])
        .assert()
        .success();

    let saved = fs::read_to_string(repo.path().join("session.txt")).unwrap();
    assert!(saved.starts_with("/drop\n"));
    assert!(saved.contains("/add       \"README.md\"\n"));
    assert!(saved.contains("/read-only \"notes.md\"\n"));

    pairline(repo.path(), harness.path(), &llm_dir)
        .args(["chat", "--load", "session.txt", "--message", "/ls"])
        .assert()
        .success()
        .stdout(contains("Read-only files:\n\n  notes.md"))
        .stdout(contains("Files in chat:\n\n  README.md"));
}

#[test]
fn git_commands_outside_a_repository_report_errors() {
    let harness = tempdir().unwrap();
    let workdir = tempdir().unwrap();
    let llm_dir = setup_fake_codex(harness.path(), &[]).unwrap();

    pairline(workdir.path(), harness.path(), &llm_dir)
        .args(["chat", "--message", "/undo"])
        .assert()
        .success()
        .stderr(contains("Unable to complete undo"));
}
