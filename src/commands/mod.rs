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

//! Slash commands and the dispatcher that routes input to them.

mod chat;
mod files;
mod git;
mod workflow;

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::coder::{ChatMode, Coder, Session};

/// What the caller should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Send this text to the model as the next user message.
    Send(String),
    Exit,
}

type Handler = fn(&mut Commands, &str) -> Result<Outcome>;

struct CommandSpec {
    name: &'static str,
    help: &'static str,
    handler: Handler,
    /// Changes the interactive mode, so it is skipped when replaying a file.
    interactive_only: bool,
}

const fn command(name: &'static str, help: &'static str, handler: Handler) -> CommandSpec {
    CommandSpec {
        name,
        help,
        handler,
        interactive_only: false,
    }
}

const fn interactive(name: &'static str, help: &'static str, handler: Handler) -> CommandSpec {
    CommandSpec {
        name,
        help,
        handler,
        interactive_only: true,
    }
}

static COMMANDS: &[CommandSpec] = &[
    command("add", "Add files to the chat so the model can edit them", Commands::cmd_add),
    interactive("ask", "Ask questions about the code base without editing any files", Commands::cmd_ask),
    command("chat-mode", "Switch to a new chat mode", Commands::cmd_chat_mode),
    command("clean-code", "Clean up code files changed on this branch (low, medium or high)", Commands::cmd_clean_code),
    command("clear", "Clear the chat history", Commands::cmd_clear),
    interactive("code", "Ask for changes to your code", Commands::cmd_code),
    command("code-from-plan", "Execute a coding plan from a Markdown file step by step", Commands::cmd_code_from_plan),
    command("commit", "Commit edits to the repo made outside the chat (commit message optional)", Commands::cmd_commit),
    interactive("context", "Identify which files need to be edited for a request", Commands::cmd_context),
    command("copy", "Copy the last assistant message to the clipboard", Commands::cmd_copy),
    command("copy-context", "Copy the current chat context as markdown, suitable to paste into a web UI", Commands::cmd_copy_context),
    command("diff", "Display the diff of changes since the last message", Commands::cmd_diff),
    command("drop", "Remove files from the chat session to free up context space", Commands::cmd_drop),
    interactive("editor", "Open an editor to write a prompt", Commands::cmd_editor),
    interactive("exit", "Exit the application", Commands::cmd_exit),
    command("git", "Run a git command (output excluded from chat)", Commands::cmd_git),
    command("help", "List the available commands", Commands::cmd_help),
    command("load", "Load and execute commands from a file", Commands::cmd_load),
    command("ls", "List all known files and indicate which are included in the chat session", Commands::cmd_ls),
    command("model", "Show or switch the model (a tool list for the tools backend)", Commands::cmd_model),
    interactive("paste", "Paste text from the clipboard into the chat", Commands::cmd_paste),
    command("plan-implementation", "Generate an implementation plan from a JIRA ticket or feature specification file", Commands::cmd_plan_implementation),
    interactive("quit", "Exit the application", Commands::cmd_exit),
    command("raise-pr", "Create a pull request for the current branch with a generated description", Commands::cmd_raise_pr),
    command("read-only", "Add files to the chat that are for reference only, or turn added files to read-only", Commands::cmd_read_only),
    command("reset", "Drop all files and clear the chat history", Commands::cmd_reset),
    command("run", "Run a shell command and optionally add the output to the chat (alias: !)", Commands::cmd_run),
    command("save", "Save commands to a file that can reconstruct the current chat session's files", Commands::cmd_save),
    command("settings", "Print out the current settings", Commands::cmd_settings),
    command("solve-jira", "Implement a JIRA issue; add --with-pr to raise a PR or --with-code-cleanup to tidy up", Commands::cmd_solve_jira),
    command("test", "Run a shell command and add the output to the chat on non-zero exit code", Commands::cmd_test),
    command("tokens", "Report on the approximate number of tokens used by the current chat context", Commands::cmd_tokens),
    command("undo", "Undo the last git commit if it was done by pairline", Commands::cmd_undo),
];

/// Result of looking up the first word of a command line.
#[derive(Debug, PartialEq, Eq)]
enum Lookup {
    Found(&'static str),
    Ambiguous(Vec<&'static str>),
    Unknown,
}

fn lookup(word: &str) -> Lookup {
    let word = word.trim_start_matches('/').to_lowercase();
    if let Some(spec) = COMMANDS.iter().find(|c| c.name == word) {
        return Lookup::Found(spec.name);
    }

    let matches: Vec<&'static str> = COMMANDS
        .iter()
        .filter(|c| c.name.starts_with(&word))
        .map(|c| c.name)
        .collect();

    match matches.len() {
        0 => Lookup::Unknown,
        1 => Lookup::Found(matches[0]),
        _ => Lookup::Ambiguous(matches),
    }
}

fn spec_for(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// The interactive front end: one session, one active coder.
pub struct Commands {
    pub session: Session,
    pub coder: Coder,
    original_read_only: BTreeSet<PathBuf>,
}

impl Commands {
    pub fn new(session: Session) -> Self {
        let coder = Coder::new(&session.root, ChatMode::Code);
        Self {
            session,
            coder,
            original_read_only: BTreeSet::new(),
        }
    }

    /// Files given with `--read` at startup; `/drop` with no arguments keeps them.
    pub fn set_original_read_only(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        self.original_read_only = files.into_iter().collect();
    }

    pub fn is_command(line: &str) -> bool {
        let line = line.trim_start();
        line.starts_with('/') || line.starts_with('!')
    }

    /// Handle one line of user input: commands are dispatched, anything else
    /// goes to the active coder.
    pub fn handle_input(&mut self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome::Continue;
        }

        let outcome = if Self::is_command(line) {
            self.run(line)
        } else {
            Outcome::Send(line.to_string())
        };

        match outcome {
            Outcome::Send(message) => {
                if let Err(e) = self.coder.run_one(&mut self.session, &message) {
                    self.session.io.error(&format!("Error: {:#}", e));
                }
                Outcome::Continue
            }
            other => other,
        }
    }

    /// Dispatch a slash command line. `!cmd` is shorthand for `/run cmd`.
    pub fn run(&mut self, line: &str) -> Outcome {
        let line = line.trim();
        let line = match line.strip_prefix('!') {
            Some(rest) => format!("/run {}", rest),
            None => line.to_string(),
        };

        let (word, args) = match line.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (line.as_str(), ""),
        };

        match lookup(word) {
            Lookup::Found(name) => self.do_run(name, args),
            Lookup::Ambiguous(names) => {
                self.session
                    .io
                    .error(&format!("Ambiguous command: {}", names.join(", ")));
                Outcome::Continue
            }
            Lookup::Unknown => {
                self.session
                    .io
                    .error(&format!("Invalid command: {}", word));
                Outcome::Continue
            }
        }
    }

    fn do_run(&mut self, name: &str, args: &str) -> Outcome {
        let Some(spec) = spec_for(name) else {
            self.session.io.error(&format!("Invalid command: {}", name));
            return Outcome::Continue;
        };

        match (spec.handler)(self, args) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.session
                    .io
                    .error(&format!("Unable to complete {}: {:#}", name, e));
                Outcome::Continue
            }
        }
    }

    fn cmd_help(&mut self, _args: &str) -> Result<Outcome> {
        for spec in COMMANDS {
            self.session
                .io
                .output(&format!("/{:<20} {}", spec.name, spec.help));
        }
        self.session
            .io
            .output("Use `!cmd` as a shortcut for `/run cmd`.");
        Ok(Outcome::Continue)
    }

    fn cmd_exit(&mut self, _args: &str) -> Result<Outcome> {
        Ok(Outcome::Exit)
    }

    /// Replay a file of commands, one per line.
    fn cmd_load(&mut self, args: &str) -> Result<Outcome> {
        let path = args.trim();
        if path.is_empty() {
            self.session
                .io
                .error("Please provide a filename containing commands to load.");
            return Ok(Outcome::Continue);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.session.io.error(&format!("File not found: {}", path));
                return Ok(Outcome::Continue);
            }
            Err(e) => {
                self.session.io.error(&format!("Error reading file: {}", e));
                return Ok(Outcome::Continue);
            }
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            self.session.io.output(&format!("\nExecuting: {}", line));

            let word = line.split_whitespace().next().unwrap_or_default();
            let interactive_only = !word.starts_with('/')
                || matches!(lookup(word), Lookup::Found(name) if spec_for(name).is_some_and(|s| s.interactive_only));
            if interactive_only && !word.starts_with('!') {
                self.session.io.error(&format!(
                    "Command '{}' is only supported in interactive mode, skipping.",
                    line
                ));
                continue;
            }

            if self.run(line) == Outcome::Exit {
                return Ok(Outcome::Exit);
            }
        }
        Ok(Outcome::Continue)
    }

    /// Empty the editable set and every read-only file not given at startup.
    fn drop_all_files(&mut self) {
        self.coder.clear_editable();
        let original = &self.original_read_only;
        let root = self.coder.root().to_path_buf();
        self.coder.retain_read_only(|path| {
            original.contains(path)
                || path
                    .strip_prefix(&root)
                    .is_ok_and(|rel| original.contains(rel))
        });
    }

    fn clear_chat_history(&mut self) {
        self.coder.history.clear();
    }

    /// Run `prompt` in a new code-mode coder over the current files, make it
    /// the active coder, then drop every file it has in chat except `keep`.
    fn run_new_coder(&mut self, prompt: &str, keep: &[String], keep_history: bool) -> Result<()> {
        let mut step_coder = Coder::from_coder(&self.coder, ChatMode::Code, keep_history);
        let result = step_coder.run_one(&mut self.session, prompt);
        self.coder = step_coder;

        let to_drop: Vec<String> = self
            .coder
            .inchat_relative_files()
            .into_iter()
            .filter(|rel| !keep.contains(rel))
            .collect();
        self.session
            .io
            .output(&format!("Dropping files in chat: {:?}", to_drop));
        for rel in &to_drop {
            self.coder.drop_rel_fname(rel);
        }

        result.map(|_| ())
    }

    /// Run `f` with every confirmation answered yes.
    fn with_auto_confirm<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = self.session.io.set_auto_confirm(true);
        let result = f(self);
        self.session.io.set_auto_confirm(previous);
        result
    }
}
