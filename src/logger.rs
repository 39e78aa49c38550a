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
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Logger for streaming output to both console and file with buffered writing
pub struct Logger {
    writer: BufWriter<std::fs::File>,
}

impl Logger {
    pub fn new(log_path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path))?;

        Ok(Self {
            writer: BufWriter::with_capacity(8192, file),
        })
    }

    pub fn log(&mut self, message: &str) -> Result<()> {
        self.writer.write_all(message.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn logln(&mut self, message: &str) -> Result<()> {
        self.writer.write_all(message.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Terminal front-end shared by every command and session.
///
/// Everything printed is mirrored into the chat history log when one is open.
/// Confirmation prompts read from `input`, which is stdin outside of tests.
pub struct Io {
    logger: Option<Logger>,
    auto_confirm: bool,
    input: Box<dyn BufRead>,
}

impl Io {
    pub fn new(log_file: Option<&str>, yes_always: bool) -> Self {
        let logger = match log_file {
            Some(path) if !path.is_empty() => match Logger::new(path) {
                Ok(log) => Some(log),
                Err(e) => {
                    eprintln!("Warning: Failed to create log file '{}': {}", path, e);
                    eprintln!("Continuing without logging to file.");
                    None
                }
            },
            _ => None,
        };

        Self {
            logger,
            auto_confirm: yes_always,
            input: Box::new(BufReader::new(io::stdin())),
        }
    }

    /// Replace the input source used by confirmations and the chat prompt.
    #[cfg(test)]
    pub fn with_input(mut self, input: Box<dyn BufRead>) -> Self {
        self.input = input;
        self
    }

    pub fn output(&mut self, message: &str) {
        println!("{}", message);
        self.log_line(message);
        let _ = io::stdout().flush();
    }

    pub fn warning(&mut self, message: &str) {
        eprintln!("{}", message);
        self.log_line(message);
        let _ = io::stderr().flush();
    }

    pub fn error(&mut self, message: &str) {
        eprintln!("{}", message);
        self.log_line(message);
        let _ = io::stderr().flush();
    }

    /// Print a model reply framed by header and footer lines.
    pub fn stream_reply(&mut self, label: &str, text: &str) {
        let header = format!("\n--- {} ---", label.to_uppercase());
        let footer = format!("--- END {} ---\n", label.to_uppercase());

        self.output(&header);
        if !text.is_empty() {
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
            if let Some(log) = self.logger.as_mut() {
                let _ = log.log(text);
                if !text.ends_with('\n') {
                    let _ = log.log("\n");
                }
            }
        }
        self.output(&footer);
    }

    /// Set the auto-confirm flag, returning the previous value.
    pub fn set_auto_confirm(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.auto_confirm, value)
    }

    pub fn confirm(&mut self, question: &str, default_yes: bool) -> bool {
        let hint = if default_yes { "[Yes]" } else { "[No]" };
        let prompt = format!("{} (Y)es/(N)o {}: ", question, hint);

        if self.auto_confirm {
            self.output(&format!("{}y", prompt));
            return true;
        }

        print!("{}", prompt);
        let _ = io::stdout().flush();

        let mut response = String::new();
        match self.input.read_line(&mut response) {
            Ok(0) | Err(_) => {
                println!();
                self.log_line(&format!("{}n", prompt));
                false
            }
            Ok(_) => {
                let answer = response.trim().to_lowercase();
                let accepted = if answer.is_empty() {
                    default_yes
                } else {
                    answer.starts_with('y')
                };
                self.log_line(&format!("{}{}", prompt, if accepted { "y" } else { "n" }));
                accepted
            }
        }
    }

    /// Read one line of user input. Returns `None` at end of input.
    pub fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{}", prompt);
        io::stdout().flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']).to_string();
        self.log_line(&format!("{}{}", prompt, line));
        Ok(Some(line))
    }

    /// Read a text file, reporting failures instead of returning them.
    pub fn read_text(&mut self, path: &Path) -> Option<String> {
        match fs::read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.error(&format!("{}: file not found error", path.display()));
                None
            }
            Err(e) => {
                self.error(&format!("{}: unable to read: {}", path.display(), e));
                None
            }
        }
    }

    pub fn write_text(&mut self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn log_line(&mut self, message: &str) {
        if let Some(log) = self.logger.as_mut() {
            let _ = log.logln(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn scripted(answers: &str) -> Io {
        Io::new(None, false).with_input(Box::new(Cursor::new(answers.as_bytes().to_vec())))
    }

    #[test]
    fn test_confirm_reads_answers() {
        let mut io = scripted("y\nno\n\n");
        assert!(io.confirm("First?", false));
        assert!(!io.confirm("Second?", true));
        assert!(io.confirm("Third?", true));
    }

    #[test]
    fn test_confirm_at_eof_declines() {
        let mut io = scripted("");
        assert!(!io.confirm("Anything?", true));
    }

    #[test]
    fn test_auto_confirm_skips_input() {
        let mut io = scripted("n\n");
        let previous = io.set_auto_confirm(true);
        assert!(!previous);
        assert!(io.confirm("Proceed?", false));
        io.set_auto_confirm(previous);
        assert!(!io.confirm("Proceed?", false));
    }

    #[test]
    fn test_log_file_mirrors_output() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("history.md");
        let mut io = Io::new(Some(log_path.to_str().unwrap()), false);
        io.output("hello");
        io.stream_reply("ask", "reply text");

        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("hello\n"));
        assert!(contents.contains("--- ASK ---"));
        assert!(contents.contains("reply text\n"));
    }

    #[test]
    fn test_read_text_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut io = Io::new(None, false);
        assert!(io.read_text(&dir.path().join("missing.txt")).is_none());
    }
}
