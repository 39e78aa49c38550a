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

use anyhow::Result;
use std::io::IsTerminal;
use std::path::PathBuf;

use super::files::parse_quoted_filenames;
use super::{Commands, Outcome};
use crate::chat::Message;
use crate::coder::{ChatMode, Coder};
use crate::error::PairError;
use crate::prompts;

impl Commands {
    pub(super) fn cmd_commit(&mut self, args: &str) -> Result<Outcome> {
        let repo = self.session.repo()?;
        if !repo.is_dirty(None)? {
            self.session.io.warning("No more changes to commit.");
            return Ok(Outcome::Continue);
        }

        let message = Some(args.trim()).filter(|m| !m.is_empty());
        self.session.commit_files(&[], message, false)?;
        Ok(Outcome::Continue)
    }

    /// Diff from the commit that was HEAD before the last message to HEAD.
    pub(super) fn cmd_diff(&mut self, _args: &str) -> Result<Outcome> {
        let repo = self.session.repo()?;
        let Some(current_head) = repo.head_sha(false) else {
            self.session.io.warning("No commits yet.");
            return Ok(Outcome::Continue);
        };

        let since = match self.session.commit_before_message().last() {
            Some(sha) => sha.clone(),
            None => match repo.rev_parse("HEAD^") {
                Some(parent) => parent,
                None => {
                    self.session
                        .io
                        .warning("No changes to display since the last message.");
                    return Ok(Outcome::Continue);
                }
            },
        };

        if since == current_head {
            self.session
                .io
                .warning("No changes to display since the last message.");
            return Ok(Outcome::Continue);
        }

        let pretty = std::io::stdout().is_terminal();
        let diff = repo.diff_commits(pretty, &since, "HEAD")?;
        let short: String = since.chars().take(7).collect();
        self.session.io.output(&format!("Diff since {}...", short));
        self.session.io.output(&diff);
        Ok(Outcome::Continue)
    }

    /// Undo the last commit, but only if this session made it and it is safe.
    pub(super) fn cmd_undo(&mut self, _args: &str) -> Result<Outcome> {
        let repo = self.session.repo()?;

        let parents = repo.head_parents().unwrap_or_default();
        if parents.is_empty() {
            self.session
                .io
                .error("This is the first commit in the repository. Cannot undo.");
            return Ok(Outcome::Continue);
        }

        let last_hash = repo
            .head_sha(true)
            .ok_or_else(|| PairError::git("rev-parse", "HEAD is not a commit"))?;
        let last_message = repo.head_message().unwrap_or_default();

        if !self.session.made_commit(&last_hash) {
            self.session
                .io
                .error("The last commit was not made by pairline in this chat session.");
            self.session.io.output(
                "You could try `/git reset --hard HEAD^` but be aware that this is a destructive command!",
            );
            return Ok(Outcome::Continue);
        }

        if parents.len() > 1 {
            self.session.io.error(&format!(
                "The last commit {} has more than 1 parent, can't undo.",
                last_hash
            ));
            return Ok(Outcome::Continue);
        }

        let changed = repo.files_in_commit("HEAD")?;
        for file in &changed {
            if repo.is_dirty(Some(file))? {
                self.session.io.error(&format!(
                    "The file {} has uncommitted changes. Please stash them before undoing.",
                    file
                ));
                return Ok(Outcome::Continue);
            }
        }

        for file in &changed {
            if !repo.exists_in("HEAD~1", file) {
                self.session.io.error(&format!(
                    "The file {} was not in the repository in the previous commit. Cannot undo safely.",
                    file
                ));
                return Ok(Outcome::Continue);
            }
        }

        let branch = repo.current_branch()?;
        let local_head = repo.head_sha(false);
        if let Some(remote_head) = repo.rev_parse(&format!("origin/{}", branch)) {
            if local_head.as_deref() == Some(remote_head.as_str()) {
                self.session.io.error(
                    "The last commit has already been pushed to the origin. Undoing is not possible.",
                );
                return Ok(Outcome::Continue);
            }
        }

        for file in &changed {
            repo.checkout_file("HEAD~1", file)?;
        }
        repo.reset_soft("HEAD~1")?;

        let now_hash = repo.head_sha(true).unwrap_or_default();
        let now_message = repo.head_message().unwrap_or_default();
        self.session
            .io
            .output(&format!("Removed: {} {}", last_hash, last_message));
        self.session
            .io
            .output(&format!("Now at:  {} {}", now_hash, now_message));

        self.coder.history.push(Message::user(prompts::UNDO_REPLY));
        self.coder
            .history
            .push(Message::assistant(prompts::RUN_OUTPUT_REPLY));
        self.coder.history.move_back_cur_messages();
        Ok(Outcome::Continue)
    }

    pub(super) fn cmd_git(&mut self, args: &str) -> Result<Outcome> {
        let repo = self.session.repo()?;
        let output = repo.raw(&parse_quoted_filenames(args))?;
        self.session.io.output(output.trim_end());
        Ok(Outcome::Continue)
    }

    /// Summarise the session, write a PR description and title, push and
    /// open the PR with gh.
    pub(super) fn cmd_raise_pr(&mut self, _args: &str) -> Result<Outcome> {
        self.session.repo()?;

        self.drop_all_files();

        let mut summary_coder = Coder::from_coder(&self.coder, ChatMode::Ask, true);
        let summary = summary_coder.run_one(&mut self.session, prompts::SESSION_SUMMARY_PROMPT)?;

        self.clear_chat_history();

        let repo = self.session.repo()?;
        let current_branch = repo.current_branch()?;
        let Some(default_branch) = repo.default_branch() else {
            self.session
                .io
                .error("Could not determine default branch (main or master).");
            return Ok(Outcome::Continue);
        };

        let commit_history = repo.commit_history(&default_branch, &current_branch)?;
        let changed_files = repo.changed_files(&default_branch, &current_branch)?;
        let templates = repo.find_pr_templates();

        self.session.io.output(&format!(
            "Creating PR from branch '{}' to '{}' based on changes...",
            current_branch, default_branch
        ));

        let existing: Vec<String> = changed_files
            .iter()
            .filter(|f| self.coder.root().join(f).exists())
            .map(|f| format!("\"{}\"", f))
            .collect();
        if !existing.is_empty() {
            self.cmd_add(&existing.join(" "))?;
        }

        let mut ask_coder = Coder::from_coder(&self.coder, ChatMode::Ask, false);
        let template = self.select_pr_template(&mut ask_coder, &templates, &commit_history, &changed_files)?;

        let description = ask_coder.run_one(
            &mut self.session,
            &prompts::pr_description_message(&commit_history, &summary, template.as_deref()),
        )?;
        let title = ask_coder
            .run_one(&mut self.session, &prompts::pr_title_message(&description))?
            .trim()
            .to_string();

        let url = self
            .session
            .repo()?
            .raise_pr(&default_branch, &current_branch, &title, &description)?;
        self.session
            .io
            .output(&format!("Pull request created: {}", url));
        Ok(Outcome::Continue)
    }

    /// Pick a PR template: the only one, or the one the model names, falling
    /// back to the first.
    fn select_pr_template(
        &mut self,
        ask_coder: &mut Coder,
        templates: &[PathBuf],
        commit_history: &str,
        changed_files: &[String],
    ) -> Result<Option<String>> {
        let Some(first) = templates.first() else {
            return Ok(None);
        };
        if templates.len() == 1 {
            return Ok(self.session.io.read_text(first));
        }

        let names: Vec<String> = templates
            .iter()
            .map(|path| self.coder.get_rel_fname(path))
            .collect();
        let choice = ask_coder.run_one(
            &mut self.session,
            &prompts::pr_template_selection_message(commit_history, changed_files, &names),
        )?;
        let choice = choice.trim().trim_matches('`').trim_matches('"');

        let selected = templates
            .iter()
            .zip(&names)
            .find(|(path, name)| {
                name.as_str() == choice
                    || path
                        .file_name()
                        .is_some_and(|file| file.to_string_lossy() == choice)
            })
            .map(|(path, _)| path)
            .unwrap_or(first);
        Ok(self.session.io.read_text(selected))
    }
}
