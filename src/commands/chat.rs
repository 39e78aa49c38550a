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

use anyhow::{Context, Result};
use arboard::Clipboard;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

use super::{Commands, Outcome};
use crate::chat::{Message, Role};
use crate::cli::Backend;
use crate::coder::{ChatMode, Coder};
use crate::llm::create_model;
use crate::prompts;

/// Rough token count; four characters per token.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Run a shell command, returning its exit code and interleaved output.
fn run_shell(command: &str) -> Result<(i32, String)> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .with_context(|| format!("Failed to run {}", command))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.code().unwrap_or(1), combined))
}

impl Commands {
    /// With a message, answer it in `mode` and come back; without one, switch modes.
    fn run_in_mode(&mut self, mode: ChatMode, args: &str) -> Result<Outcome> {
        if args.trim().is_empty() {
            self.coder.mode = mode;
            self.session
                .io
                .output(&format!("Switched to {} mode.", mode.name()));
            return Ok(Outcome::Continue);
        }

        let original = self.coder.mode;
        let mut temp = Coder::from_coder(&self.coder, mode, true);
        let result = temp.run_one(&mut self.session, args);
        self.coder = Coder::from_coder(&temp, original, true);
        result.map(|_| Outcome::Continue)
    }

    pub(super) fn cmd_ask(&mut self, args: &str) -> Result<Outcome> {
        self.run_in_mode(ChatMode::Ask, args)
    }

    pub(super) fn cmd_code(&mut self, args: &str) -> Result<Outcome> {
        self.run_in_mode(ChatMode::Code, args)
    }

    pub(super) fn cmd_context(&mut self, args: &str) -> Result<Outcome> {
        self.run_in_mode(ChatMode::Context, args)
    }

    pub(super) fn cmd_chat_mode(&mut self, args: &str) -> Result<Outcome> {
        let name = args.trim().to_lowercase();
        match ChatMode::from_name(&name) {
            Some(mode) => {
                self.coder.mode = mode;
                self.session
                    .io
                    .output(&format!("Switched to {} mode.", mode.name()));
            }
            None => {
                if !name.is_empty() {
                    self.session
                        .io
                        .error(&format!("Chat mode \"{}\" should be one of these:\n", name));
                } else {
                    self.session.io.output("Chat mode should be one of these:\n");
                }
                let width = ChatMode::ALL.iter().map(|m| m.name().len()).max().unwrap_or(0);
                for mode in ChatMode::ALL {
                    self.session.io.output(&format!(
                        "- {:<width$} : {}",
                        mode.name(),
                        mode.description(),
                        width = width
                    ));
                }
            }
        }
        Ok(Outcome::Continue)
    }

    pub(super) fn cmd_clear(&mut self, _args: &str) -> Result<Outcome> {
        self.clear_chat_history();
        self.session.io.output("All chat history cleared.");
        Ok(Outcome::Continue)
    }

    pub(super) fn cmd_reset(&mut self, _args: &str) -> Result<Outcome> {
        self.drop_all_files();
        self.clear_chat_history();
        self.session
            .io
            .output("All files dropped and chat history cleared.");
        Ok(Outcome::Continue)
    }

    fn add_command_output(&mut self, command: &str, output: &str) {
        self.coder
            .history
            .push(Message::user(prompts::run_output_message(command, output)));
        self.coder
            .history
            .push(Message::assistant(prompts::RUN_OUTPUT_REPLY));
        self.coder.history.move_back_cur_messages();
    }

    pub(super) fn cmd_run(&mut self, args: &str) -> Result<Outcome> {
        let command = args.trim();
        if command.is_empty() {
            self.session.io.error("Please provide a command to run.");
            return Ok(Outcome::Continue);
        }

        let (_, output) = run_shell(command)?;
        self.session.io.output(output.trim_end());

        let k_tokens = estimate_tokens(&output) as f64 / 1000.0;
        let question = format!("Add {:.1}k tokens of command output to the chat?", k_tokens);
        if self.session.io.confirm(&question, true) {
            self.add_command_output(command, &output);
            let lines = output.lines().count();
            self.session.io.output(&format!(
                "Added {} line{} of output to the chat.",
                lines,
                if lines == 1 { "" } else { "s" }
            ));
        }
        Ok(Outcome::Continue)
    }

    /// Run the test command; failing output is added to the chat.
    pub(super) fn cmd_test(&mut self, args: &str) -> Result<Outcome> {
        let command = match args.trim() {
            "" => self.session.settings.test_cmd.clone().unwrap_or_default(),
            given => given.to_string(),
        };
        if command.is_empty() {
            self.session
                .io
                .error("No test command provided. Use --test-cmd or pass one to /test.");
            return Ok(Outcome::Continue);
        }

        let (status, output) = run_shell(&command)?;
        self.session.io.output(output.trim_end());
        if status != 0 {
            self.add_command_output(&command, &output);
            self.session.io.warning(&format!(
                "Tests failed with exit code {}; output added to the chat.",
                status
            ));
        }
        Ok(Outcome::Continue)
    }

    /// Show the model, or switch it. For the tools backend the argument is a
    /// comma-separated tool list.
    pub(super) fn cmd_model(&mut self, args: &str) -> Result<Outcome> {
        let name = args.trim();
        if name.is_empty() {
            self.session
                .io
                .output(&format!("Current model: {}", self.session.model.name()));
            return Ok(Outcome::Continue);
        }

        let settings = &mut self.session.settings;
        match settings.backend {
            Backend::Api => settings.models.model = Some(name.to_string()),
            Backend::Tools => settings.tools = name.to_string(),
        }
        self.session.model = create_model(settings.backend, &settings.tools, &settings.models)?;
        self.session
            .io
            .output(&format!("Model switched to {}", self.session.model.name()));
        Ok(Outcome::Continue)
    }

    pub(super) fn cmd_settings(&mut self, _args: &str) -> Result<Outcome> {
        let description = self.session.settings.describe();
        self.session.io.output(&description);
        self.session
            .io
            .output(&format!("active model: {}", self.session.model.name()));
        self.session
            .io
            .output(&format!("chat mode: {}", self.coder.mode.name()));
        Ok(Outcome::Continue)
    }

    /// Approximate context size, split by where the tokens come from.
    pub(super) fn cmd_tokens(&mut self, _args: &str) -> Result<Outcome> {
        let mut rows: Vec<(usize, String)> = Vec::new();

        rows.push((
            estimate_tokens(&self.coder.system_message().content),
            "system messages".to_string(),
        ));

        let history: String = self
            .coder
            .history
            .all()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if !history.is_empty() {
            rows.push((estimate_tokens(&history), "chat history".to_string()));
        }

        if self.session.repo.is_some() {
            let inchat: std::collections::BTreeSet<String> =
                self.coder.inchat_relative_files().into_iter().collect();
            let listing: Vec<String> = self
                .coder
                .all_relative_files(&self.session)?
                .into_iter()
                .filter(|f| !inchat.contains(f))
                .collect();
            rows.push((
                estimate_tokens(&listing.join("\n")),
                "repository file list".to_string(),
            ));
        }

        let files: Vec<(std::path::PathBuf, &'static str)> = self
            .coder
            .editable()
            .iter()
            .map(|p| (p.clone(), "/drop to remove"))
            .chain(
                self.coder
                    .read_only()
                    .iter()
                    .map(|p| (p.clone(), "/drop to remove (read-only)")),
            )
            .collect();
        for (path, hint) in files {
            let rel = self.coder.get_rel_fname(&path);
            if let Some(text) = self.session.io.read_text(&path) {
                rows.push((
                    estimate_tokens(&text),
                    format!("{} {}", rel, hint),
                ));
            }
        }

        self.session
            .io
            .output("Approximate context window usage, in tokens:\n");
        let mut total = 0;
        for (tokens, label) in &rows {
            total += tokens;
            self.session
                .io
                .output(&format!("{:>9} {}", format_tokens(*tokens), label));
        }
        self.session.io.output(&"=".repeat(9));
        self.session
            .io
            .output(&format!("{:>9} tokens total", format_tokens(total)));
        Ok(Outcome::Continue)
    }

    pub(super) fn cmd_copy(&mut self, _args: &str) -> Result<Outcome> {
        let Some(last) = self.coder.history.last_assistant() else {
            self.session.io.error("No assistant messages found to copy.");
            return Ok(Outcome::Continue);
        };
        let text = last.content.clone();

        let mut clipboard = Clipboard::new().context("Failed to access the clipboard")?;
        clipboard
            .set_text(text.clone())
            .context("Failed to copy to clipboard")?;

        let preview = if text.chars().count() > 50 {
            format!("{}...", text.chars().take(50).collect::<String>())
        } else {
            text
        };
        self.session.io.output(&format!(
            "Copied last assistant message to clipboard. Preview: {}",
            preview
        ));
        Ok(Outcome::Continue)
    }

    /// The repository listing and file contents as markdown, ready to paste
    /// into a web chat.
    pub(super) fn context_markdown(&mut self, extra: &str) -> Result<String> {
        let mut markdown = String::new();
        for message in self.coder.context_messages(&mut self.session)? {
            if message.role == Role::User {
                markdown.push_str(&message.content);
                markdown.push_str("\n\n");
            }
        }
        markdown.push_str(&prompts::copy_context_footer(extra));
        Ok(markdown)
    }

    pub(super) fn cmd_copy_context(&mut self, args: &str) -> Result<Outcome> {
        let markdown = self.context_markdown(args.trim())?;
        let mut clipboard = Clipboard::new().context("Failed to access the clipboard")?;
        clipboard
            .set_text(markdown)
            .context("Failed to copy to clipboard")?;
        self.session.io.output("Copied code context to clipboard.");
        Ok(Outcome::Continue)
    }

    /// Send clipboard text (and any extra words) as the next message.
    pub(super) fn cmd_paste(&mut self, args: &str) -> Result<Outcome> {
        let mut clipboard = Clipboard::new().context("Failed to access the clipboard")?;
        let text = clipboard
            .get_text()
            .context("No text content found in the clipboard")?;
        if text.trim().is_empty() {
            self.session.io.error("No text content found in the clipboard.");
            return Ok(Outcome::Continue);
        }

        self.session.io.output("Text content found in clipboard:");
        self.session.io.output(&text);

        let message = match args.trim() {
            "" => text,
            extra => format!("{}\n\n{}", extra, text),
        };
        Ok(Outcome::Send(message))
    }

    /// Compose a message in $VISUAL or $EDITOR.
    pub(super) fn cmd_editor(&mut self, args: &str) -> Result<Outcome> {
        let mut draft = NamedTempFile::with_suffix(".md").context("Failed to create temp file")?;
        draft.write_all(args.as_bytes())?;
        draft.flush()?;

        let editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string());
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$1\"", editor))
            .arg("sh")
            .arg(draft.path())
            .status()
            .with_context(|| format!("Failed to launch editor {}", editor))?;
        if !status.success() {
            anyhow::bail!("Editor {} exited with {}", editor, status);
        }

        let text = fs::read_to_string(draft.path())?;
        if text.trim().is_empty() {
            return Ok(Outcome::Continue);
        }
        Ok(Outcome::Send(text.trim_end().to_string()))
    }
}

fn format_tokens(count: usize) -> String {
    if count < 1000 {
        count.to_string()
    } else {
        format!("{:.1}k", count as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::commands_in;
    use crate::repo::tests::init_repo;

    #[test]
    fn test_estimate_and_format_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(12_345), "12.3k");
    }

    #[test]
    fn test_chat_mode_switches_and_rejects_unknown() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/chat-mode ask");
        assert_eq!(commands.coder.mode, ChatMode::Ask);
        commands.run("/chat-mode poetry");
        assert_eq!(commands.coder.mode, ChatMode::Ask);
    }

    #[test]
    fn test_ask_with_message_returns_to_previous_mode() {
        let dir = init_repo();
        let (mut commands, seen) = commands_in(&dir, &["It prints hello."]);
        commands.run("/add README.md");
        commands.run("/ask what does the readme say?");

        assert_eq!(commands.coder.mode, ChatMode::Code);
        assert_eq!(commands.coder.inchat_relative_files(), vec!["README.md"]);
        assert_eq!(
            commands.coder.history.last_assistant().unwrap().content,
            "It prints hello."
        );
        assert!(seen.borrow()[0][0].content.contains("expert code analyst"));
    }

    #[test]
    fn test_test_adds_output_only_on_failure() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/test echo fine");
        assert!(commands.coder.history.is_empty());

        commands.run("/test sh -c 'echo broken; exit 3'");
        let first = commands.coder.history.all().next().unwrap();
        assert!(first.content.contains("broken"));
    }

    #[test]
    fn test_context_markdown_lists_files_and_footer() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add README.md");
        let markdown = commands.context_markdown("make it louder").unwrap();
        assert!(markdown.contains("README.md\n```\nhello\n```"));
        assert!(markdown.contains("Just tell me how to edit the files"));
        assert!(markdown.trim_end().ends_with("make it louder"));
    }

    #[test]
    fn test_clear_and_reset() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add README.md");
        commands.run("!echo hi");
        assert!(!commands.coder.history.is_empty());

        commands.run("/clear");
        assert!(commands.coder.history.is_empty());
        assert_eq!(commands.coder.inchat_relative_files(), vec!["README.md"]);

        commands.run("/reset");
        assert!(commands.coder.editable().is_empty());
    }
}
