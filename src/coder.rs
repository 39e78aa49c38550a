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

//! Editing sessions: what the model sees, and what happens to its replies.

use anyhow::{Result, bail};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::chat::{ChatHistory, Message};
use crate::config::Settings;
use crate::constants::MAX_REFLECTIONS;
use crate::editblock::{self, EditBlock};
use crate::error::PairError;
use crate::llm::{ChatModel, remove_reasoning_content};
use crate::logger::Io;
use crate::prompts;
use crate::repo::{CommitInfo, GitRepo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Code,
    Ask,
    Context,
    Plan,
}

impl ChatMode {
    pub const ALL: [ChatMode; 4] = [Self::Code, Self::Ask, Self::Context, Self::Plan];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Ask => "ask",
            Self::Context => "context",
            Self::Plan => "plan",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Code => "Ask for changes to your code.",
            Self::Ask => "Ask questions about your code without making any changes.",
            Self::Context => "Automatically identify which files will need to be edited.",
            Self::Plan => "Write an implementation plan for a ticket.",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.name() == name)
    }

    fn system_prompt(&self) -> String {
        match self {
            Self::Code => prompts::CODE_SYSTEM_PROMPT.to_string(),
            Self::Ask => prompts::ASK_SYSTEM_PROMPT.to_string(),
            Self::Context => prompts::CONTEXT_SYSTEM_PROMPT.to_string(),
            Self::Plan => format!(
                "{}\n{}",
                prompts::PLAN_SYSTEM_PROMPT,
                prompts::PLAN_SYSTEM_REMINDER
            ),
        }
    }
}

/// State shared by every coder for the life of the process.
pub struct Session {
    pub io: Io,
    pub model: Box<dyn ChatModel>,
    pub repo: Option<GitRepo>,
    pub settings: Settings,
    pub root: PathBuf,
    commit_hashes: BTreeSet<String>,
    commit_before_message: Vec<String>,
}

impl Session {
    pub fn new(
        io: Io,
        model: Box<dyn ChatModel>,
        repo: Option<GitRepo>,
        settings: Settings,
        root: PathBuf,
    ) -> Self {
        Self {
            io,
            model,
            repo,
            settings,
            root,
            commit_hashes: BTreeSet::new(),
            commit_before_message: Vec::new(),
        }
    }

    pub fn repo(&self) -> Result<&GitRepo> {
        self.repo.as_ref().ok_or_else(|| PairError::NoRepo.into())
    }

    /// Send messages and return the reply with reasoning blocks removed.
    pub fn send(&mut self, messages: &[Message]) -> Result<String> {
        let reply = self.model.send(messages, &mut self.io)?;
        Ok(remove_reasoning_content(&reply))
    }

    /// Whether a short hash names a commit made in this session.
    pub fn made_commit(&self, short_hash: &str) -> bool {
        self.commit_hashes.contains(short_hash)
    }

    pub fn commit_before_message(&self) -> &[String] {
        &self.commit_before_message
    }

    fn mark_before_message(&mut self) {
        if let Some(sha) = self.repo.as_ref().and_then(|repo| repo.head_sha(false)) {
            if self.commit_before_message.last() != Some(&sha) {
                self.commit_before_message.push(sha);
            }
        }
    }

    /// One-line commit message for a diff, written by the model.
    pub fn commit_message(&mut self, diffs: &str) -> String {
        let messages = [
            Message::system(prompts::COMMIT_SYSTEM_PROMPT),
            Message::user(format!("{}{}", prompts::COMMIT_DIFFS_HEADER, diffs)),
        ];

        let reply = match self.send(&messages) {
            Ok(reply) => reply,
            Err(e) => {
                self.io.error(&format!("Failed to generate commit message! {}", e));
                return String::new();
            }
        };

        let line = reply.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        line.strip_prefix('"')
            .and_then(|l| l.strip_suffix('"'))
            .unwrap_or(line)
            .trim()
            .to_string()
    }

    /// Commit files (all tracked changes when empty). A missing message is
    /// written by the model. Commits of model edits count toward `/undo`.
    pub fn commit_files(
        &mut self,
        fnames: &[String],
        message: Option<&str>,
        tool_edits: bool,
    ) -> Result<Option<CommitInfo>> {
        let diffs = self.repo()?.get_diffs(fnames)?;
        if diffs.trim().is_empty() && !self.repo()?.is_dirty(None)? {
            return Ok(None);
        }

        let message = match message {
            Some(msg) if !msg.trim().is_empty() => msg.trim().to_string(),
            _ => self.commit_message(&diffs),
        };

        let info = self.repo()?.commit(fnames, &message, tool_edits)?;
        if let Some(info) = &info {
            if tool_edits {
                self.commit_hashes.insert(info.short_hash.clone());
            }
            self.io
                .output(&format!("Commit {} {}", info.short_hash, info.message));
        }
        Ok(info)
    }
}

/// What applying a reply's edit blocks produced.
#[derive(Debug, Default)]
pub struct EditOutcome {
    pub edited: Vec<String>,
    pub failed: Vec<String>,
}

/// One conversation with the model over a set of files.
#[derive(Debug, Clone)]
pub struct Coder {
    pub mode: ChatMode,
    root: PathBuf,
    editable: BTreeSet<PathBuf>,
    read_only: BTreeSet<PathBuf>,
    pub history: ChatHistory,
    last_response: String,
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn fenced(rel: &str, content: &str) -> String {
    let mut block = format!("{}\n```\n{}", rel, content);
    if !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str("```\n");
    block
}

impl Coder {
    pub fn new(root: &Path, mode: ChatMode) -> Self {
        Self {
            mode,
            root: root.to_path_buf(),
            editable: BTreeSet::new(),
            read_only: BTreeSet::new(),
            history: ChatHistory::default(),
            last_response: String::new(),
        }
    }

    /// A new coder over the same files, optionally carrying the conversation.
    pub fn from_coder(other: &Coder, mode: ChatMode, keep_history: bool) -> Self {
        Self {
            mode,
            root: other.root.clone(),
            editable: other.editable.clone(),
            read_only: other.read_only.clone(),
            history: if keep_history {
                other.history.clone()
            } else {
                ChatHistory::default()
            },
            last_response: String::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn editable(&self) -> &BTreeSet<PathBuf> {
        &self.editable
    }

    pub fn read_only(&self) -> &BTreeSet<PathBuf> {
        &self.read_only
    }

    pub fn add_editable(&mut self, abs: PathBuf) -> bool {
        self.read_only.remove(&abs);
        self.editable.insert(abs)
    }

    pub fn add_read_only(&mut self, abs: PathBuf) -> bool {
        self.editable.remove(&abs);
        self.read_only.insert(abs)
    }

    pub fn remove_read_only(&mut self, abs: &Path) -> bool {
        self.read_only.remove(abs)
    }

    pub fn clear_editable(&mut self) {
        self.editable.clear();
    }

    pub fn retain_read_only(&mut self, keep: impl Fn(&Path) -> bool) {
        self.read_only.retain(|path| keep(path));
    }

    /// Path relative to the root, or the path itself when it lies outside.
    pub fn get_rel_fname(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.root)
            .unwrap_or(abs)
            .to_string_lossy()
            .into_owned()
    }

    /// Absolute, normalized form of a root-relative or absolute path.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize(&joined);
        fs::canonicalize(&normalized).unwrap_or(normalized)
    }

    /// Resolve a root-relative (or absolute) path, refusing anything outside the root.
    pub fn abs_root_path(&self, path: &str) -> Result<PathBuf> {
        let resolved = self.resolve_path(path);
        if !resolved.starts_with(&self.root) {
            bail!(
                "Can not add {}, which is not within {}",
                resolved.display(),
                self.root.display()
            );
        }
        Ok(resolved)
    }

    pub fn add_rel_fname(&mut self, rel: &str) -> Result<bool> {
        let abs = self.abs_root_path(rel)?;
        Ok(self.add_editable(abs))
    }

    pub fn drop_rel_fname(&mut self, rel: &str) -> bool {
        match self.abs_root_path(rel) {
            Ok(abs) => self.editable.remove(&abs),
            Err(_) => false,
        }
    }

    pub fn inchat_relative_files(&self) -> Vec<String> {
        self.editable.iter().map(|p| self.get_rel_fname(p)).collect()
    }

    pub fn read_only_relative_files(&self) -> Vec<String> {
        self.read_only.iter().map(|p| self.get_rel_fname(p)).collect()
    }

    /// Every file the model may refer to: tracked files, or a walk of the
    /// root outside a git repository.
    pub fn all_relative_files(&self, session: &Session) -> Result<Vec<String>> {
        if let Some(repo) = &session.repo {
            let mut files: BTreeSet<String> = repo.tracked_files()?.into_iter().collect();
            files.extend(self.inchat_relative_files());
            return Ok(files.into_iter().collect());
        }

        let mut files = BTreeSet::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                files.insert(self.get_rel_fname(entry.path()));
            }
        }
        files.extend(self.inchat_relative_files());
        Ok(files.into_iter().collect())
    }

    /// Repository listing and file contents, as user/assistant pairs.
    pub fn context_messages(&self, session: &mut Session) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        if session.repo.is_some() {
            let inchat: BTreeSet<String> = self.inchat_relative_files().into_iter().collect();
            let others: Vec<String> = self
                .all_relative_files(session)?
                .into_iter()
                .filter(|f| !inchat.contains(f))
                .collect();
            if !others.is_empty() {
                messages.push(Message::user(format!(
                    "{}{}\n",
                    prompts::REPO_FILES_PREFIX,
                    others.join("\n")
                )));
                messages.push(Message::assistant(prompts::REPO_FILES_REPLY));
            }
        }

        if !self.read_only.is_empty() {
            let mut content = prompts::READ_ONLY_FILES_PREFIX.to_string();
            for path in &self.read_only {
                if let Some(text) = session.io.read_text(path) {
                    content.push('\n');
                    content.push_str(&fenced(&self.get_rel_fname(path), &text));
                }
            }
            messages.push(Message::user(content));
            messages.push(Message::assistant(prompts::READ_ONLY_FILES_REPLY));
        }

        if !self.editable.is_empty() {
            let mut content = prompts::CHAT_FILES_PREFIX.to_string();
            for path in &self.editable {
                if let Some(text) = session.io.read_text(path) {
                    content.push('\n');
                    content.push_str(&fenced(&self.get_rel_fname(path), &text));
                }
            }
            messages.push(Message::user(content));
            messages.push(Message::assistant(prompts::CHAT_FILES_REPLY));
        }

        Ok(messages)
    }

    pub fn system_message(&self) -> Message {
        Message::system(self.mode.system_prompt())
    }

    fn format_messages(&self, session: &mut Session, user_message: &str) -> Result<Vec<Message>> {
        let mut messages = vec![self.system_message()];
        messages.extend(self.context_messages(session)?);
        messages.extend(self.history.all().cloned());
        messages.push(Message::user(user_message));
        Ok(messages)
    }

    fn send_message(&mut self, session: &mut Session, user_message: &str) -> Result<String> {
        let messages = self.format_messages(session, user_message)?;
        let reply = session.send(&messages)?;

        self.history.push(Message::user(user_message));
        self.history.push(Message::assistant(reply.clone()));
        self.history.move_back_cur_messages();

        session.io.stream_reply(self.mode.name(), &reply);
        self.last_response = reply.clone();
        Ok(reply)
    }

    /// Send one user message and act on the reply according to the mode.
    /// Code mode may follow up on its own (failed edits, newly added files).
    pub fn run_one(&mut self, session: &mut Session, message: &str) -> Result<String> {
        session.mark_before_message();

        let mut message = message.to_string();
        let mut reflections = 0;

        loop {
            let reply = self.send_message(session, &message)?;

            let reflection = match self.mode {
                ChatMode::Code => self.apply_reply(session, &reply)?,
                ChatMode::Context => {
                    self.identify_files(session, &reply)?;
                    None
                }
                ChatMode::Ask | ChatMode::Plan => None,
            };

            let Some(next) = reflection else {
                break;
            };
            if reflections >= MAX_REFLECTIONS {
                session.io.warning(&format!(
                    "Only {} reflections allowed, stopping.",
                    MAX_REFLECTIONS
                ));
                break;
            }
            reflections += 1;
            message = next;
        }

        Ok(self.last_response.clone())
    }

    /// Repository files named in `content`, by full relative path or by a
    /// basename that is unique among `candidates`.
    pub fn file_mentions(content: &str, candidates: &[String]) -> Vec<String> {
        let words: BTreeSet<&str> = content
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| ",.!;:?`'\"*()[]<>".contains(c)))
            .filter(|w| !w.is_empty())
            .collect();

        let mut found = BTreeSet::new();
        for candidate in candidates {
            if words.contains(candidate.as_str()) {
                found.insert(candidate.clone());
                continue;
            }

            let basename = Path::new(candidate)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !basename.contains(['.', '_', '-']) || !words.contains(basename.as_str()) {
                continue;
            }
            let unique = candidates
                .iter()
                .filter(|other| Path::new(other).file_name() == Path::new(candidate).file_name())
                .count()
                == 1;
            if unique {
                found.insert(candidate.clone());
            }
        }
        found.into_iter().collect()
    }

    /// Context mode: the files the reply names become the editable set.
    fn identify_files(&mut self, session: &mut Session, reply: &str) -> Result<()> {
        let candidates = self.all_relative_files(session)?;
        let mentioned = Self::file_mentions(reply, &candidates);

        self.editable.clear();
        for rel in &mentioned {
            if let Ok(abs) = self.abs_root_path(rel) {
                self.read_only.remove(&abs);
                self.editable.insert(abs);
            }
        }

        if mentioned.is_empty() {
            session.io.output("No repository files identified.");
        } else {
            session
                .io
                .output(&format!("Identified files: {}", mentioned.join(", ")));
        }
        Ok(())
    }

    /// Confirm edits to a file outside the chat and add it as editable.
    fn allow_edit(&mut self, session: &mut Session, block: &EditBlock) -> Result<Option<PathBuf>> {
        let abs = self.abs_root_path(&block.path)?;
        if self.editable.contains(&abs) {
            return Ok(Some(abs));
        }

        if let Some(repo) = &session.repo {
            if repo.ignored_file(&block.path) {
                session.io.warning(&format!(
                    "Skipping edits to {} that matches the ignore file.",
                    block.path
                ));
                return Ok(None);
            }
        }

        let question = if abs.exists() {
            format!(
                "Allow edits to {} which was not previously added to chat?",
                block.path
            )
        } else {
            format!("Create new file {}?", block.path)
        };
        if !session.io.confirm(&question, true) {
            session
                .io
                .warning(&format!("Skipping edits to {}", block.path));
            return Ok(None);
        }

        self.add_editable(abs.clone());
        Ok(Some(abs))
    }

    /// Apply the edit blocks in a reply. Returns the follow-up message, if any.
    fn apply_reply(&mut self, session: &mut Session, reply: &str) -> Result<Option<String>> {
        let mut valid = self.inchat_relative_files();
        valid.extend(self.all_relative_files(session)?);

        let blocks = match editblock::parse_edit_blocks(reply, &valid) {
            Ok(blocks) => blocks,
            Err(e) => {
                session.io.error(&e.to_string());
                return Ok(Some(e.to_string()));
            }
        };

        let outcome = self.apply_edits(session, &blocks)?;

        let mut reflection = Vec::new();
        if !outcome.failed.is_empty() {
            reflection.push(prompts::failed_edits_reply(&outcome.failed));
        }

        let candidates: Vec<String> = self
            .all_relative_files(session)?
            .into_iter()
            .filter(|f| {
                self.abs_root_path(f)
                    .map(|abs| !self.editable.contains(&abs) && !self.read_only.contains(&abs))
                    .unwrap_or(false)
            })
            .collect();

        let mut added = Vec::new();
        for rel in Self::file_mentions(reply, &candidates) {
            if session.io.confirm(&format!("Add {} to the chat?", rel), true) {
                self.add_rel_fname(&rel)?;
                session.io.output(&format!("Added {} to the chat", rel));
                added.push(rel);
            }
        }
        if !added.is_empty() {
            reflection.push(prompts::files_added_reply(&added));
        }

        if reflection.is_empty() {
            Ok(None)
        } else {
            Ok(Some(reflection.join("\n\n")))
        }
    }

    pub fn apply_edits(&mut self, session: &mut Session, blocks: &[EditBlock]) -> Result<EditOutcome> {
        let mut outcome = EditOutcome::default();
        if blocks.is_empty() {
            return Ok(outcome);
        }

        let mut allowed = Vec::new();
        for block in blocks {
            match self.allow_edit(session, block) {
                Ok(Some(abs)) => allowed.push((block, abs)),
                Ok(None) => {}
                Err(e) => {
                    session.io.error(&e.to_string());
                    outcome
                        .failed
                        .push(format!("## {}\n{}", e, block.render()));
                }
            }
        }

        self.commit_dirty_files(session, &allowed)?;

        for (block, abs) in allowed {
            if editblock::apply_to_file(&abs, block)? {
                let rel = self.get_rel_fname(&abs);
                if !outcome.edited.contains(&rel) {
                    session.io.output(&format!("Applied edit to {}", rel));
                    outcome.edited.push(rel);
                }
            } else {
                outcome.failed.push(format!(
                    "## SearchReplaceNoExactMatch: This SEARCH block failed to exactly match lines in {}\n{}",
                    block.path,
                    block.render()
                ));
            }
        }

        if !outcome.edited.is_empty() && session.settings.git.auto_commits && session.repo.is_some() {
            session.commit_files(&outcome.edited, None, true)?;
        }

        Ok(outcome)
    }

    /// Commit pre-existing changes to files the model is about to edit.
    fn commit_dirty_files(&self, session: &mut Session, allowed: &[(&EditBlock, PathBuf)]) -> Result<()> {
        if !session.settings.git.dirty_commits {
            return Ok(());
        }
        let Some(repo) = &session.repo else {
            return Ok(());
        };

        let mut dirty = BTreeSet::new();
        for (_, abs) in allowed {
            let rel = self.get_rel_fname(abs);
            if abs.exists() && repo.path_in_repo(&rel) && repo.is_dirty(Some(&rel))? {
                dirty.insert(rel);
            }
        }

        if !dirty.is_empty() {
            let dirty: Vec<String> = dirty.into_iter().collect();
            session.commit_files(&dirty, None, false)?;
        }
        Ok(())
    }
}
