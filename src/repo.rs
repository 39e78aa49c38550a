// Copyright (c) 2025 Sean McNamara <smcnam@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Git adapter. Every operation shells out to the `git` (or `gh`) binary
//! with the repository root as working directory.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::SystemTime;

use crate::config::GitSettings;
use crate::constants::{ATTRIBUTION_SUFFIX, COMMIT_MESSAGE_PREFIX, DEFAULT_BRANCH_CANDIDATES};
use crate::error::PairError;
use crate::ignore::IgnoreSpec;

/// A commit this tool made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub short_hash: String,
    pub message: String,
}

pub struct GitRepo {
    root: PathBuf,
    settings: GitSettings,
    ignore_path: PathBuf,
    ignore_mtime: Option<SystemTime>,
    ignore: IgnoreSpec,
}

impl GitRepo {
    /// Find the repository containing `start`.
    pub fn discover(start: &Path, settings: GitSettings, ignore_file: &str) -> Result<Self> {
        let output = Command::new("git")
            .current_dir(start)
            .args(["rev-parse", "--show-toplevel"])
            .output()
            .context("Failed to execute git. Is git installed?")?;

        if !output.status.success() {
            return Err(PairError::NoRepo.into());
        }

        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let root = fs::canonicalize(&top).unwrap_or_else(|_| PathBuf::from(&top));

        let ignore_path = if Path::new(ignore_file).is_absolute() {
            PathBuf::from(ignore_file)
        } else {
            root.join(ignore_file)
        };

        let mut repo = Self {
            root,
            settings,
            ignore_path,
            ignore_mtime: None,
            ignore: IgnoreSpec::default(),
        };
        repo.refresh_ignore()?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore_path(&self) -> &Path {
        &self.ignore_path
    }

    fn output(&self, args: &[&str], env: &[(&str, String)]) -> Result<Output> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root).args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.output()
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    /// Run git and return stdout, turning a non-zero exit into a git error.
    fn git(&self, args: &[&str]) -> Result<String> {
        self.git_with_env(args, &[])
    }

    fn git_with_env(&self, args: &[&str], env: &[(&str, String)]) -> Result<String> {
        let output = self.output(args, env)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let command = args.first().copied().unwrap_or("git");
            Err(PairError::git(command, String::from_utf8_lossy(&output.stderr).trim()).into())
        }
    }

    fn git_succeeds(&self, args: &[&str]) -> bool {
        self.output(args, &[])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Run an arbitrary git command line for `/git`, returning combined output.
    pub fn raw(&self, args: &[String]) -> Result<String> {
        let output = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .env("GIT_EDITOR", "true")
            .output()
            .context("Failed to execute git")?;
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }

    /// Reload the ignore file if it changed on disk.
    pub fn refresh_ignore(&mut self) -> Result<()> {
        let mtime = fs::metadata(&self.ignore_path)
            .and_then(|m| m.modified())
            .ok();

        if mtime != self.ignore_mtime {
            self.ignore = IgnoreSpec::load(&self.ignore_path)?;
            self.ignore_mtime = mtime;
        }
        Ok(())
    }

    /// Whether the ignore file hides this path (relative to the root).
    pub fn ignored_file(&self, rel_path: &str) -> bool {
        self.ignore.is_ignored(Path::new(rel_path))
    }

    /// Whether git itself ignores this path.
    pub fn git_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.git_succeeds(&["check-ignore", "-q", path.as_ref()])
    }

    /// Files in the index (committed or staged), minus ignored ones.
    pub fn tracked_files(&self) -> Result<Vec<String>> {
        let listing = self.git(&["ls-files", "--cached"])?;
        let files: BTreeSet<String> = listing
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .filter(|line| !self.ignored_file(line))
            .map(String::from)
            .collect();
        Ok(files.into_iter().collect())
    }

    pub fn path_in_repo(&self, rel_path: &str) -> bool {
        self.git_succeeds(&["ls-files", "--error-unmatch", "--", rel_path])
    }

    pub fn user_name(&self) -> Option<String> {
        self.git(&["config", "--get", "user.name"])
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    pub fn head_sha(&self, short: bool) -> Option<String> {
        let args: &[&str] = if short {
            &["rev-parse", "--short=7", "HEAD"]
        } else {
            &["rev-parse", "HEAD"]
        };
        self.git(args).ok().map(|sha| sha.trim().to_string())
    }

    pub fn head_message(&self) -> Option<String> {
        self.git(&["log", "-1", "--pretty=%B"])
            .ok()
            .map(|message| message.trim().to_string())
    }

    pub fn head_parents(&self) -> Result<Vec<String>> {
        let line = self.git(&["rev-list", "--parents", "-n", "1", "HEAD"])?;
        Ok(line.split_whitespace().skip(1).map(String::from).collect())
    }

    pub fn files_in_commit(&self, commit: &str) -> Result<Vec<String>> {
        let listing = self.git(&["diff-tree", "--root", "--no-commit-id", "--name-only", "-r", commit])?;
        Ok(listing
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(String::from)
            .collect())
    }

    pub fn exists_in(&self, rev: &str, rel_path: &str) -> bool {
        self.git_succeeds(&["cat-file", "-e", &format!("{}:{}", rev, rel_path)])
    }

    pub fn checkout_file(&self, rev: &str, rel_path: &str) -> Result<()> {
        self.git(&["checkout", rev, "--", rel_path])?;
        Ok(())
    }

    pub fn reset_soft(&self, rev: &str) -> Result<()> {
        self.git(&["reset", "--soft", rev])?;
        Ok(())
    }

    pub fn rev_parse(&self, rev: &str) -> Option<String> {
        self.git(&["rev-parse", "--verify", "--quiet", rev])
            .ok()
            .map(|sha| sha.trim().to_string())
            .filter(|sha| !sha.is_empty())
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?.trim().to_string())
    }

    /// `main` if it exists, else `master`.
    pub fn default_branch(&self) -> Option<String> {
        DEFAULT_BRANCH_CANDIDATES
            .iter()
            .find(|branch| self.rev_parse(branch).is_some())
            .map(|branch| branch.to_string())
    }

    /// Untracked paths count as dirty; otherwise staged or unstaged changes do.
    pub fn is_dirty(&self, rel_path: Option<&str>) -> Result<bool> {
        let mut args = vec!["status", "--porcelain", "--untracked-files=no"];
        if let Some(path) = rel_path {
            if !self.path_in_repo(path) {
                return Ok(true);
            }
            args.push("--");
            args.push(path);
        }
        Ok(!self.git(&args)?.trim().is_empty())
    }

    /// Diff of the working tree and index against HEAD for the given files.
    pub fn get_diffs(&self, fnames: &[String]) -> Result<String> {
        let mut diffs = String::new();
        for fname in fnames {
            if !self.path_in_repo(fname) {
                diffs.push_str(&format!("Added {}\n", fname));
            }
        }

        let mut tail: Vec<&str> = vec!["--"];
        tail.extend(fnames.iter().map(String::as_str));

        if self.head_sha(false).is_some() {
            let mut args = vec!["diff", "HEAD"];
            args.extend(&tail);
            diffs.push_str(&self.git(&args)?);
            return Ok(diffs);
        }

        let mut index_args = vec!["diff", "--cached"];
        index_args.extend(&tail);
        diffs.push_str(&self.git(&index_args)?);

        let mut wd_args = vec!["diff"];
        wd_args.extend(&tail);
        diffs.push_str(&self.git(&wd_args)?);
        Ok(diffs)
    }

    pub fn diff_commits(&self, pretty: bool, from: &str, to: &str) -> Result<String> {
        let color = if pretty { "--color" } else { "--color=never" };
        self.git(&["diff", color, from, to])
    }

    /// Commit the given files (or everything tracked when empty).
    ///
    /// `tool_edits` marks commits of edits the model made, which get the
    /// author attribution and optional message prefix. Returns `None` when
    /// there was nothing to commit.
    pub fn commit(
        &self,
        fnames: &[String],
        message: &str,
        tool_edits: bool,
    ) -> Result<Option<CommitInfo>> {
        if fnames.is_empty() && !self.is_dirty(None)? {
            return Ok(None);
        }
        if self.get_diffs(fnames)?.trim().is_empty() {
            return Ok(None);
        }

        let mut commit_message = message.trim().to_string();
        if commit_message.is_empty() {
            commit_message = "(no commit message provided)".to_string();
        }
        if tool_edits && self.settings.attribute_commit_message {
            commit_message = format!("{}{}", COMMIT_MESSAGE_PREFIX, commit_message);
        }

        for fname in fnames {
            self.git(&["add", "--", fname])?;
        }

        let mut args: Vec<&str> = vec!["commit", "-m", commit_message.as_str()];
        if !self.settings.commit_verify {
            args.push("--no-verify");
        }
        if fnames.is_empty() {
            args.push("-a");
        } else {
            args.push("--");
            args.extend(fnames.iter().map(String::as_str));
        }

        let mut env = Vec::new();
        if let Some(name) = self.user_name() {
            let attributed = format!("{} {}", name, ATTRIBUTION_SUFFIX);
            if self.settings.attribute_committer {
                env.push(("GIT_COMMITTER_NAME", attributed.clone()));
            }
            if tool_edits && self.settings.attribute_author {
                env.push(("GIT_AUTHOR_NAME", attributed));
            }
        }

        self.git_with_env(&args, &env)?;

        let short_hash = self
            .head_sha(true)
            .ok_or_else(|| PairError::git("commit", "HEAD missing after commit"))?;
        Ok(Some(CommitInfo {
            short_hash,
            message: commit_message,
        }))
    }

    /// `git log base..head` as one-line summaries.
    pub fn commit_history(&self, base: &str, head: &str) -> Result<String> {
        self.git(&[
            "log",
            &format!("{}..{}", base, head),
            "--pretty=format:%h %s",
            "--no-merges",
        ])
    }

    pub fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let listing = self.git(&["diff", &format!("{}..{}", base, head), "--name-only"])?;
        Ok(listing
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(String::from)
            .collect())
    }

    pub fn push(&self, branch: &str) -> Result<()> {
        let output = self.output(&["push", "origin", "-u", branch], &[])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(PairError::git("push", classify_push_error(&stderr)).into())
    }

    /// Pull request templates in the root, `docs/` and `.github/`, plus any
    /// markdown file inside a `PULL_REQUEST_TEMPLATE/` directory there.
    pub fn find_pr_templates(&self) -> Vec<PathBuf> {
        let mut locations = vec![
            self.root.clone(),
            self.root.join("docs"),
            self.root.join(".github"),
        ];
        for location in locations.clone() {
            let template_dir = location.join("PULL_REQUEST_TEMPLATE");
            if template_dir.is_dir() {
                locations.push(template_dir);
            }
        }

        let mut found = Vec::new();
        for location in &locations {
            let Ok(entries) = fs::read_dir(location) else {
                continue;
            };
            let mut names: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            names.sort();

            let in_template_dir = location
                .file_name()
                .is_some_and(|name| name == "PULL_REQUEST_TEMPLATE");

            for path in names {
                let lower = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                let matches = lower == "pull_request_template.md"
                    || (in_template_dir && lower.ends_with(".md"));
                if matches && !found.contains(&path) {
                    found.push(path);
                }
            }
        }
        found
    }

    /// Push `head` and open a pull request against `base` with gh. Returns the PR URL.
    pub fn raise_pr(&self, base: &str, head: &str, title: &str, body: &str) -> Result<String> {
        if !gh_available() {
            anyhow::bail!(
                "GitHub CLI (gh) not found. Please install it to create PRs. You can create the PR manually using this description."
            );
        }

        self.push(head)
            .context("Failed to push changes before creating PR")?;

        let output = Command::new("gh")
            .current_dir(&self.root)
            .args([
                "pr", "create", "--base", base, "--head", head, "--title", title, "--body", body,
            ])
            .output()
            .context("Failed to execute gh pr create")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            anyhow::bail!(
                "Failed to create PR: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )
        }
    }
}

/// Check if gh CLI is available
pub fn gh_available() -> bool {
    Command::new("gh")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Turn git push stderr into an actionable message.
pub fn classify_push_error(stderr: &str) -> String {
    if stderr.contains("Authentication failed") {
        "Git authentication failed. Please check your credentials.".to_string()
    } else if stderr.contains("could not read Username") {
        "Git credentials not found. Please configure your git credentials.".to_string()
    } else if stderr.contains("Connection timed out") || stderr.contains("Could not resolve host") {
        "Network error while pushing to remote. Please check your connection.".to_string()
    } else {
        format!("Git push failed: {}", stderr)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap();
        assert!(
            status.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&status.stderr)
        );
    }

    /// A fresh repository on `main` with one committed file.
    pub(crate) fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        run_git(dir.path(), &["init", "-q"]);
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(dir.path(), &["config", "user.name", "Tester"]);
        run_git(dir.path(), &["config", "user.email", "tester@example.com"]);
        run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
        fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "-q", "-m", "initial"]);
        dir
    }

    fn open(dir: &TempDir) -> GitRepo {
        GitRepo::discover(dir.path(), GitSettings::default(), ".pairlineignore").unwrap()
    }

    #[test]
    fn test_discover_outside_repo_fails() {
        let dir = TempDir::new().unwrap();
        let err = GitRepo::discover(dir.path(), GitSettings::default(), ".pairlineignore")
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<PairError>(), Some(PairError::NoRepo)));
    }

    #[test]
    fn test_commit_attributes_tool_edits() {
        let dir = init_repo();
        let repo = open(&dir);
        fs::write(dir.path().join("README.md"), "hello world\n").unwrap();
        assert!(repo.is_dirty(Some("README.md")).unwrap());

        let info = repo
            .commit(&["README.md".to_string()], "docs: expand greeting", true)
            .unwrap()
            .unwrap();
        assert_eq!(info.message, "docs: expand greeting");
        assert_eq!(repo.head_sha(true).unwrap(), info.short_hash);
        assert!(!repo.is_dirty(None).unwrap());

        let names = repo.git(&["log", "-1", "--pretty=%an|%cn"]).unwrap();
        assert_eq!(names.trim(), "Tester (pairline)|Tester (pairline)");
    }

    #[test]
    fn test_commit_without_changes_is_noop() {
        let dir = init_repo();
        let repo = open(&dir);
        assert!(repo.commit(&[], "nothing", false).unwrap().is_none());
    }

    #[test]
    fn test_commit_new_file_and_history() {
        let dir = init_repo();
        let repo = open(&dir);
        fs::write(dir.path().join("new.txt"), "fresh\n").unwrap();

        let diffs = repo.get_diffs(&["new.txt".to_string()]).unwrap();
        assert!(diffs.starts_with("Added new.txt"));

        repo.commit(&["new.txt".to_string()], "feat: add new file", false)
            .unwrap()
            .unwrap();
        assert!(repo.tracked_files().unwrap().contains(&"new.txt".to_string()));
        assert_eq!(repo.files_in_commit("HEAD").unwrap(), vec!["new.txt"]);
        assert_eq!(repo.head_parents().unwrap().len(), 1);
        assert!(!repo.exists_in("HEAD~1", "new.txt"));
        assert!(repo.exists_in("HEAD", "new.txt"));

        let history = repo.commit_history("HEAD~1", "HEAD").unwrap();
        assert!(history.ends_with("feat: add new file"));
    }

    #[test]
    fn test_default_branch_prefers_main() {
        let dir = init_repo();
        let repo = open(&dir);
        assert_eq!(repo.default_branch().as_deref(), Some("main"));
        assert_eq!(repo.current_branch().unwrap(), "main");
        assert!(repo.rev_parse("master").is_none());
    }

    #[test]
    fn test_tracked_files_respect_ignore_file() {
        let dir = init_repo();
        fs::write(dir.path().join("secret.env"), "KEY=1\n").unwrap();
        run_git(dir.path(), &["add", "secret.env"]);
        fs::write(dir.path().join(".pairlineignore"), "*.env\n").unwrap();

        let repo = open(&dir);
        let files = repo.tracked_files().unwrap();
        assert!(files.contains(&"README.md".to_string()));
        assert!(!files.contains(&"secret.env".to_string()));
    }

    #[test]
    fn test_find_pr_templates() {
        let dir = init_repo();
        fs::create_dir_all(dir.path().join(".github/PULL_REQUEST_TEMPLATE")).unwrap();
        fs::write(dir.path().join(".github/pull_request_template.md"), "x").unwrap();
        fs::write(dir.path().join(".github/PULL_REQUEST_TEMPLATE/bugfix.md"), "y").unwrap();

        let repo = open(&dir);
        let templates = repo.find_pr_templates();
        assert_eq!(templates.len(), 2);
        assert!(templates[0].ends_with(".github/pull_request_template.md"));
        assert!(templates[1].ends_with("PULL_REQUEST_TEMPLATE/bugfix.md"));
    }

    #[test]
    fn test_classify_push_error() {
        assert!(classify_push_error("fatal: Authentication failed for x").contains("authentication"));
        assert!(classify_push_error("ssh: Could not resolve host: github.com").contains("Network"));
        assert_eq!(classify_push_error("rejected"), "Git push failed: rejected");
    }
}
