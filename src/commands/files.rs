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
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Commands, Outcome};
use crate::constants::IMAGE_EXTENSIONS;

static QUOTED_OR_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r#""(.+?)"|(\S+)"#).unwrap());

/// Split command arguments into file names; double quotes group names with spaces.
pub fn parse_quoted_filenames(args: &str) -> Vec<String> {
    QUOTED_OR_WORD
        .captures_iter(args)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn has_glob_chars(word: &str) -> bool {
    word.contains(['*', '?', '[', ']'])
}

fn escape_glob(word: &str) -> String {
    let mut escaped = String::with_capacity(word.len());
    for c in word.chars() {
        if matches!(c, '*' | '?' | '[' | ']') {
            escaped.push('[');
            escaped.push(c);
            escaped.push(']');
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn is_image_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// A file, or every file below a directory.
fn expand_subdir(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    if path.is_dir() {
        return WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
    }
    Vec::new()
}

impl Commands {
    /// Root-relative files matching a glob, limited to tracked files inside a repo.
    pub(super) fn glob_filtered_to_repo(&mut self, pattern: &str) -> Result<Vec<String>> {
        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            self.coder.root().join(pattern).to_string_lossy().into_owned()
        };

        let mut matched = BTreeSet::new();
        let paths = match glob::glob(&full) {
            Ok(paths) => paths,
            Err(e) => {
                self.session
                    .io
                    .error(&format!("Error matching {}: {}", pattern, e));
                return Ok(Vec::new());
            }
        };
        for path in paths.filter_map(|p| p.ok()) {
            for file in expand_subdir(&path) {
                matched.insert(self.coder.get_rel_fname(&file));
            }
        }

        if let Some(repo) = &self.session.repo {
            let tracked: BTreeSet<String> = repo.tracked_files()?.into_iter().collect();
            matched.retain(|rel| tracked.contains(rel));
        }
        Ok(matched.into_iter().collect())
    }

    pub(super) fn cmd_add(&mut self, args: &str) -> Result<Outcome> {
        let mut all_matched = BTreeSet::new();

        for word in parse_quoted_filenames(args) {
            let fname = if Path::new(&word).is_absolute() {
                PathBuf::from(&word)
            } else {
                self.coder.root().join(&word)
            };

            if let Some(repo) = &mut self.session.repo {
                repo.refresh_ignore()?;
                let rel = fname.strip_prefix(repo.root()).unwrap_or(fname.as_path());
                if repo.ignored_file(&rel.to_string_lossy()) {
                    self.session.io.warning(&format!(
                        "Skipping {} due to {}.",
                        fname.display(),
                        repo.ignore_path().display()
                    ));
                    continue;
                }
            }

            let mut pattern = word.clone();
            if fname.exists() {
                if fname.is_file() {
                    all_matched.insert(fname.to_string_lossy().into_owned());
                    continue;
                }
                pattern = escape_glob(&word);
            }

            let matched = self.glob_filtered_to_repo(&pattern)?;
            if !matched.is_empty() {
                all_matched.extend(matched);
                continue;
            }

            if word.contains(['*', '?']) {
                self.session.io.error(&format!(
                    "No match, and cannot create file with wildcard characters: {}",
                    fname.display()
                ));
                continue;
            }

            if fname.is_dir() && self.session.repo.is_some() {
                self.session
                    .io
                    .error(&format!("Directory {} is not in git.", fname.display()));
                self.session.io.output(&format!(
                    "You can add to git with: /git add {}",
                    fname.display()
                ));
                continue;
            }

            if let Err(e) = self.coder.abs_root_path(&word) {
                self.session.io.error(&e.to_string());
                continue;
            }

            let question = format!(
                "No files matched '{}'. Do you want to create {}?",
                word,
                fname.display()
            );
            if self.session.io.confirm(&question, true) {
                if let Some(parent) = fname.parent() {
                    fs::create_dir_all(parent)?;
                }
                match fs::OpenOptions::new().create(true).append(true).open(&fname) {
                    Ok(_) => {
                        all_matched.insert(fname.to_string_lossy().into_owned());
                    }
                    Err(e) => self.session.io.error(&format!(
                        "Error creating file {}: {}",
                        fname.display(),
                        e
                    )),
                }
            }
        }

        for matched in all_matched {
            self.add_matched_file(&matched)?;
        }
        Ok(Outcome::Continue)
    }

    fn add_matched_file(&mut self, matched: &str) -> Result<()> {
        let abs = match self.coder.abs_root_path(matched) {
            Ok(abs) => abs,
            Err(e) => {
                self.session.io.error(&e.to_string());
                return Ok(());
            }
        };
        let rel = self.coder.get_rel_fname(&abs);

        if let Some(repo) = &self.session.repo {
            if repo.git_ignored(&abs) {
                self.session
                    .io
                    .error(&format!("Can't add {} which is in gitignore", rel));
                return Ok(());
            }
        }

        if self.coder.editable().contains(&abs) {
            self.session.io.error(&format!(
                "{} is already in the chat as an editable file",
                rel
            ));
            return Ok(());
        }

        if self.coder.read_only().contains(&abs) {
            let in_repo = self
                .session
                .repo
                .as_ref()
                .is_some_and(|repo| repo.path_in_repo(&rel));
            if in_repo {
                self.coder.add_editable(abs);
                self.session.io.output(&format!(
                    "Moved {} from read-only to editable files in the chat",
                    rel
                ));
            } else {
                self.session.io.error(&format!(
                    "Cannot add {} as it's not part of the repository",
                    rel
                ));
            }
            return Ok(());
        }

        if is_image_file(&rel) {
            self.session
                .io
                .error(&format!("Cannot add image file {} to the chat.", rel));
            return Ok(());
        }

        if self.session.io.read_text(&abs).is_none() {
            self.session.io.error(&format!("Unable to read {}", rel));
            return Ok(());
        }

        self.coder.add_editable(abs);
        self.session.io.output(&format!("Added {} to the chat", rel));
        Ok(())
    }

    pub(super) fn cmd_drop(&mut self, args: &str) -> Result<Outcome> {
        if args.trim().is_empty() {
            if self.original_read_only.is_empty() {
                self.session.io.output("Dropping all files from the chat session.");
            } else {
                self.session.io.output(
                    "Dropping all files from the chat session except originally read-only files.",
                );
            }
            self.drop_all_files();
            return Ok(Outcome::Continue);
        }

        for word in parse_quoted_filenames(args) {
            let read_only_matched: Vec<PathBuf> = self
                .coder
                .read_only()
                .iter()
                .filter(|path| path.to_string_lossy().contains(word.as_str()))
                .cloned()
                .collect();
            for path in read_only_matched {
                self.coder.remove_read_only(&path);
                self.session.io.output(&format!(
                    "Removed read-only file {} from the chat",
                    path.display()
                ));
            }

            let mut matched = if has_glob_chars(&word) {
                self.glob_filtered_to_repo(&word)?
            } else {
                self.coder
                    .editable()
                    .iter()
                    .filter(|path| path.to_string_lossy().contains(word.as_str()))
                    .map(|path| self.coder.get_rel_fname(path))
                    .collect()
            };
            if matched.is_empty() {
                matched.push(word.clone());
            }

            for rel in matched {
                if self.coder.drop_rel_fname(&rel) {
                    self.session
                        .io
                        .output(&format!("Removed {} from the chat", rel));
                }
            }
        }
        Ok(Outcome::Continue)
    }

    pub(super) fn cmd_read_only(&mut self, args: &str) -> Result<Outcome> {
        if args.trim().is_empty() {
            let editable: Vec<PathBuf> = self.coder.editable().iter().cloned().collect();
            for path in editable {
                let rel = self.coder.get_rel_fname(&path);
                self.coder.add_read_only(path);
                self.session
                    .io
                    .output(&format!("Converted {} to read-only", rel));
            }
            return Ok(Outcome::Continue);
        }

        let mut all_paths = BTreeSet::new();
        for pattern in parse_quoted_filenames(args) {
            let is_abs = Path::new(&pattern).is_absolute();
            let candidate = if is_abs {
                PathBuf::from(&pattern)
            } else {
                self.coder.root().join(&pattern)
            };

            let matches: Vec<PathBuf> = if candidate.exists() {
                vec![candidate]
            } else {
                let full = if is_abs {
                    pattern.clone()
                } else {
                    self.coder.root().join(&pattern).to_string_lossy().into_owned()
                };
                glob::glob(&full)
                    .map(|paths| paths.filter_map(|p| p.ok()).collect())
                    .unwrap_or_default()
            };

            if matches.is_empty() {
                self.session
                    .io
                    .error(&format!("No matches found for: {}", pattern));
            } else {
                all_paths.extend(matches);
            }
        }

        for path in all_paths {
            let abs = self.coder.resolve_path(&path.to_string_lossy());
            let name = self.coder.get_rel_fname(&abs);
            if abs.is_file() {
                self.add_read_only_file(abs, &name);
            } else if abs.is_dir() {
                self.add_read_only_directory(&abs, &name);
            } else {
                self.session
                    .io
                    .error(&format!("Not a file or directory: {}", abs.display()));
            }
        }
        Ok(Outcome::Continue)
    }

    fn add_read_only_file(&mut self, abs: PathBuf, name: &str) {
        if is_image_file(name) {
            self.session
                .io
                .error(&format!("Cannot add image file {} to the chat.", name));
        } else if self.coder.read_only().contains(&abs) {
            self.session.io.error(&format!(
                "{} is already in the chat as a read-only file",
                name
            ));
        } else if self.coder.editable().contains(&abs) {
            self.coder.add_read_only(abs);
            self.session.io.output(&format!(
                "Moved {} from editable to read-only files in the chat",
                name
            ));
        } else {
            self.coder.add_read_only(abs);
            self.session
                .io
                .output(&format!("Added {} to read-only files.", name));
        }
    }

    fn add_read_only_directory(&mut self, abs: &Path, name: &str) {
        let mut added = 0;
        for file in expand_subdir(abs) {
            if !self.coder.editable().contains(&file) && !self.coder.read_only().contains(&file) {
                self.coder.add_read_only(file);
                added += 1;
            }
        }

        if added > 0 {
            self.session.io.output(&format!(
                "Added {} files from directory {} to read-only files.",
                added, name
            ));
        } else {
            self.session.io.output(&format!(
                "No new files added from directory {}.",
                name
            ));
        }
    }

    pub(super) fn cmd_ls(&mut self, _args: &str) -> Result<Outcome> {
        let files = self.coder.all_relative_files(&self.session)?;

        let inchat: BTreeSet<String> = self.coder.inchat_relative_files().into_iter().collect();
        let (chat_files, other_files): (Vec<String>, Vec<String>) =
            files.into_iter().partition(|f| inchat.contains(f));
        let read_only_files = self.coder.read_only_relative_files();

        if chat_files.is_empty() && other_files.is_empty() && read_only_files.is_empty() {
            self.session
                .io
                .output("\nNo files in chat, git repo, or read-only list.");
            return Ok(Outcome::Continue);
        }

        let io = &mut self.session.io;
        if !other_files.is_empty() {
            io.output("Repo files not in the chat:\n");
            for file in &other_files {
                io.output(&format!("  {}", file));
            }
        }
        if !read_only_files.is_empty() {
            io.output("\nRead-only files:\n");
            for file in &read_only_files {
                io.output(&format!("  {}", file));
            }
        }
        if !chat_files.is_empty() {
            io.output("\nFiles in chat:\n");
            for file in &chat_files {
                io.output(&format!("  {}", file));
            }
        }
        Ok(Outcome::Continue)
    }

    /// Write `/add` and `/read-only` lines that rebuild the current file set.
    pub(super) fn cmd_save(&mut self, args: &str) -> Result<Outcome> {
        let target = args.trim();
        if target.is_empty() {
            self.session
                .io
                .error("Please provide a filename to save the commands to.");
            return Ok(Outcome::Continue);
        }

        let mut content = String::from("/drop\n");
        for rel in self.coder.inchat_relative_files() {
            content.push_str(&format!("/add       \"{}\"\n", rel));
        }
        for path in self.coder.read_only() {
            // Files outside the root keep their absolute path.
            content.push_str(&format!(
                "/read-only \"{}\"\n",
                self.coder.get_rel_fname(path)
            ));
        }

        fs::write(target, content)
            .with_context(|| format!("Error saving commands to file: {}", target))?;
        self.session
            .io
            .output(&format!("Saved commands to {}", target));
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::commands_in;
    use crate::repo::tests::{init_repo, run_git};

    #[test]
    fn test_parse_quoted_filenames() {
        assert_eq!(
            parse_quoted_filenames(r#"a.txt "my file.txt" src/*.rs"#),
            vec!["a.txt", "my file.txt", "src/*.rs"]
        );
        assert!(parse_quoted_filenames("   ").is_empty());
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("dir[1]/*"), "dir[[]1[]]/[*]");
    }

    #[test]
    fn test_add_existing_glob_and_created_files() {
        let dir = init_repo();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.rs"), "a\n").unwrap();
        fs::write(dir.path().join("src/b.rs"), "b\n").unwrap();
        fs::write(dir.path().join("src/untracked.rs"), "u\n").unwrap();
        run_git(dir.path(), &["add", "src/a.rs", "src/b.rs"]);

        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add README.md src/*.rs new/notes.md");

        assert_eq!(
            commands.coder.inchat_relative_files(),
            vec!["README.md", "new/notes.md", "src/a.rs", "src/b.rs"]
        );
        assert!(dir.path().join("new/notes.md").exists());
    }

    #[test]
    fn test_add_rejects_outside_root_and_wildcard_misses() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add ../escape.txt nothing*.rs");
        assert!(commands.coder.inchat_relative_files().is_empty());
    }

    #[test]
    fn test_add_skips_gitignored_files() {
        let dir = init_repo();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("debug.log"), "x\n").unwrap();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add debug.log");
        assert!(commands.coder.inchat_relative_files().is_empty());
    }

    #[test]
    fn test_add_moves_read_only_to_editable() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/read-only README.md");
        assert_eq!(commands.coder.read_only_relative_files(), vec!["README.md"]);

        commands.run("/add README.md");
        assert!(commands.coder.read_only().is_empty());
        assert_eq!(commands.coder.inchat_relative_files(), vec!["README.md"]);
    }

    #[test]
    fn test_drop_by_substring_and_glob() {
        let dir = init_repo();
        fs::write(dir.path().join("alpha.rs"), "a\n").unwrap();
        fs::write(dir.path().join("beta.rs"), "b\n").unwrap();
        run_git(dir.path(), &["add", "alpha.rs", "beta.rs"]);
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add alpha.rs beta.rs README.md");

        commands.run("/drop alph");
        assert_eq!(commands.coder.inchat_relative_files(), vec!["README.md", "beta.rs"]);

        commands.run("/drop *.rs");
        assert_eq!(commands.coder.inchat_relative_files(), vec!["README.md"]);
    }

    #[test]
    fn test_read_only_without_args_converts_editable() {
        let dir = init_repo();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add README.md");
        commands.run("/read-only");
        assert!(commands.coder.editable().is_empty());
        assert_eq!(commands.coder.read_only_relative_files(), vec!["README.md"]);
    }

    #[test]
    fn test_read_only_directory() {
        let dir = init_repo();
        fs::create_dir_all(dir.path().join("docs/api")).unwrap();
        fs::write(dir.path().join("docs/a.md"), "a\n").unwrap();
        fs::write(dir.path().join("docs/api/b.md"), "b\n").unwrap();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/read-only docs");
        assert_eq!(
            commands.coder.read_only_relative_files(),
            vec!["docs/a.md", "docs/api/b.md"]
        );
    }

    #[test]
    fn test_save_then_load_restores_files() {
        let dir = init_repo();
        fs::write(dir.path().join("guide.md"), "g\n").unwrap();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run("/add README.md");
        commands.run("/read-only guide.md");

        let saved = dir.path().join("session.cmds");
        commands.run(&format!("/save {}", saved.display()));
        let text = fs::read_to_string(&saved).unwrap();
        assert_eq!(
            text,
            "/drop\n/add       \"README.md\"\n/read-only \"guide.md\"\n"
        );

        commands.run("/drop");
        assert!(commands.coder.editable().is_empty());
        assert!(commands.coder.read_only().is_empty());

        commands.run(&format!("/load {}", saved.display()));
        assert_eq!(commands.coder.inchat_relative_files(), vec!["README.md"]);
        assert_eq!(commands.coder.read_only_relative_files(), vec!["guide.md"]);
    }

    #[test]
    fn test_save_then_load_keeps_spaced_names_whole() {
        let dir = init_repo();
        fs::write(dir.path().join("my notes.md"), "n\n").unwrap();
        fs::write(dir.path().join("style guide.md"), "g\n").unwrap();
        let (mut commands, _) = commands_in(&dir, &[]);
        commands.run(r#"/add "my notes.md""#);
        commands.run(r#"/read-only "style guide.md""#);

        let saved = dir.path().join("session.cmds");
        commands.run(&format!("/save {}", saved.display()));
        let text = fs::read_to_string(&saved).unwrap();
        assert!(text.contains("/add       \"my notes.md\"\n"));

        commands.run(&format!("/load {}", saved.display()));
        assert_eq!(commands.coder.inchat_relative_files(), vec!["my notes.md"]);
        assert_eq!(
            commands.coder.read_only_relative_files(),
            vec!["style guide.md"]
        );
        assert!(!dir.path().join("my").exists());
        assert!(!dir.path().join("notes.md").exists());
    }
}
