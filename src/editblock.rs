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

//! SEARCH/REPLACE edit blocks: parsing model replies and applying them to text.
//!
//! A block looks like:
//!
//! ```text
//! path/to/file.rs
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//!
//! The filename line may be wrapped in a code fence or decorated with
//! backticks, `#` or `**`. When a block omits the filename, the previous
//! block's filename is reused.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::PairError;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// How many lines above a SEARCH marker may hold the filename.
const FILENAME_LOOKBACK: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBlock {
    pub path: String,
    pub search: String,
    pub replace: String,
}

impl EditBlock {
    pub fn creates_file(&self) -> bool {
        self.search.trim().is_empty()
    }

    /// Render the block back to text, used when reporting a failed match.
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}{}\n{}{}",
            self.path, SEARCH_MARKER, self.search, DIVIDER, self.replace, REPLACE_MARKER
        )
    }
}

fn strip_filename(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed == "..." || trimmed.starts_with("```") {
        return None;
    }
    if trimmed.starts_with(SEARCH_MARKER)
        || trimmed.starts_with(DIVIDER)
        || trimmed.starts_with(REPLACE_MARKER)
    {
        return None;
    }

    let name = trimmed
        .trim_end_matches(':')
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim_matches('`')
        .trim();

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn looks_like_path(name: &str) -> bool {
    !name.contains(' ') && (name.contains('.') || name.contains('/'))
}

fn find_filename(lines: &[&str], marker_index: usize, valid_fnames: &[String]) -> Option<String> {
    let start = marker_index.saturating_sub(FILENAME_LOOKBACK);
    let mut candidates = Vec::new();

    for line in lines[start..marker_index].iter().rev() {
        if line.trim() == REPLACE_MARKER {
            break;
        }
        if let Some(name) = strip_filename(line) {
            candidates.push(name);
        }
    }

    if let Some(exact) = candidates.iter().find(|c| valid_fnames.contains(c)) {
        return Some(exact.clone());
    }

    if let Some(by_basename) = candidates.iter().find_map(|c| {
        valid_fnames.iter().find(|valid| {
            Path::new(valid.as_str()).file_name() == Path::new(c.as_str()).file_name()
        })
    }) {
        return Some(by_basename.clone());
    }

    candidates.into_iter().find(|c| looks_like_path(c))
}

/// Parse every SEARCH/REPLACE block in a model reply.
///
/// `valid_fnames` are relative paths the session knows about; they win over
/// other filename candidates found near a block.
pub fn parse_edit_blocks(content: &str, valid_fnames: &[String]) -> Result<Vec<EditBlock>, PairError> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut current_path: Option<String> = None;
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim() != SEARCH_MARKER {
            i += 1;
            continue;
        }

        let path = find_filename(&lines, i, valid_fnames)
            .or_else(|| current_path.clone())
            .ok_or_else(|| {
                PairError::Unparsable(format!(
                    "SEARCH/REPLACE block on line {} is missing its filename",
                    i + 1
                ))
            })?;

        let mut search = String::new();
        let mut replace = String::new();
        let mut in_replace = false;
        let mut closed = false;
        i += 1;

        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();
            if !in_replace && trimmed == DIVIDER {
                in_replace = true;
            } else if in_replace && trimmed == REPLACE_MARKER {
                closed = true;
                break;
            } else if in_replace {
                replace.push_str(line);
                replace.push('\n');
            } else {
                search.push_str(line);
                search.push('\n');
            }
            i += 1;
        }

        if !closed {
            return Err(PairError::Unparsable(format!(
                "Incomplete SEARCH/REPLACE block for {}",
                path
            )));
        }

        current_path = Some(path.clone());
        blocks.push(EditBlock {
            path,
            search,
            replace,
        });
        i += 1;
    }

    Ok(blocks)
}

/// Replace the first occurrence of `search` in `content`.
///
/// Falls back to a line-by-line match that ignores trailing whitespace.
/// Returns `None` when nothing matches.
pub fn replace_most_similar(content: &str, search: &str, replace: &str) -> Option<String> {
    if search.trim().is_empty() {
        let mut updated = content.to_string();
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(replace);
        return Some(updated);
    }

    if let Some(start) = content.find(search) {
        let mut updated = String::with_capacity(content.len() + replace.len());
        updated.push_str(&content[..start]);
        updated.push_str(replace);
        updated.push_str(&content[start + search.len()..]);
        return Some(updated);
    }

    let content_lines: Vec<&str> = content.split_inclusive('\n').collect();
    let search_lines: Vec<&str> = search.lines().collect();
    if search_lines.is_empty() || search_lines.len() > content_lines.len() {
        return None;
    }

    for start in 0..=(content_lines.len() - search_lines.len()) {
        let window = &content_lines[start..start + search_lines.len()];
        let matches = window
            .iter()
            .zip(search_lines.iter())
            .all(|(have, want)| have.trim_end() == want.trim_end());

        if matches {
            let mut updated = String::new();
            for line in &content_lines[..start] {
                updated.push_str(line);
            }
            updated.push_str(replace);
            for line in &content_lines[start + search_lines.len()..] {
                updated.push_str(line);
            }
            return Some(updated);
        }
    }

    None
}

/// Apply one block to a file on disk. Returns false if the SEARCH text did not match.
pub fn apply_to_file(path: &Path, block: &EditBlock) -> Result<bool> {
    let content = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    } else if block.creates_file() {
        String::new()
    } else {
        return Ok(false);
    };

    match replace_most_similar(&content, &block.search, &block.replace) {
        Some(updated) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, updated).with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_fenced_block() {
        let reply = r#"Here is the change.

src/lib.rs
```rust
<<<<<<< SEARCH
fn old() {}
=======
fn new() {}
>>>>>>> REPLACE
```
"#;
        let blocks = parse_edit_blocks(reply, &[]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].path, "src/lib.rs");
        assert_eq!(blocks[0].search, "fn old() {}\n");
        assert_eq!(blocks[0].replace, "fn new() {}\n");
    }

    #[test]
    fn test_parse_reuses_previous_filename() {
        let reply = "a.py\n<<<<<<< SEARCH\nx = 1\n=======\nx = 2\n>>>>>>> REPLACE\n\n<<<<<<< SEARCH\ny = 1\n=======\ny = 2\n>>>>>>> REPLACE\n";
        let blocks = parse_edit_blocks(reply, &[]).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].path, "a.py");
        assert_eq!(blocks[1].search, "y = 1\n");
    }

    #[test]
    fn test_parse_prefers_known_filename() {
        let reply = "Update the helper in **utils.py**:\n\nsrc/utils.py\n<<<<<<< SEARCH\n=======\nprint()\n>>>>>>> REPLACE\n";
        let valid = vec!["src/utils.py".to_string()];
        let blocks = parse_edit_blocks(reply, &valid).unwrap();
        assert_eq!(blocks[0].path, "src/utils.py");
        assert!(blocks[0].creates_file());
    }

    #[test]
    fn test_parse_incomplete_block_errors() {
        let reply = "a.py\n<<<<<<< SEARCH\nx\n=======\ny\n";
        assert!(matches!(
            parse_edit_blocks(reply, &[]),
            Err(PairError::Unparsable(_))
        ));
    }

    #[test]
    fn test_parse_missing_filename_errors() {
        let reply = "<<<<<<< SEARCH\nx\n=======\ny\n>>>>>>> REPLACE\n";
        assert!(parse_edit_blocks(reply, &[]).is_err());
    }

    #[test]
    fn test_no_blocks_is_empty() {
        assert!(parse_edit_blocks("Just an answer.", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_replace_exact_first_occurrence() {
        let updated = replace_most_similar("a\nb\na\n", "a\n", "z\n").unwrap();
        assert_eq!(updated, "z\nb\na\n");
    }

    #[test]
    fn test_replace_ignores_trailing_whitespace() {
        let content = "fn main() {   \n    run();\n}\n";
        let updated = replace_most_similar(content, "fn main() {\n    run();\n", "fn main() {\n    go();\n")
            .unwrap();
        assert_eq!(updated, "fn main() {\n    go();\n}\n");
    }

    #[test]
    fn test_replace_no_match() {
        assert!(replace_most_similar("a\n", "b\n", "c\n").is_none());
    }

    #[test]
    fn test_apply_creates_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/new.txt");
        let block = EditBlock {
            path: "nested/new.txt".to_string(),
            search: String::new(),
            replace: "hello\n".to_string(),
        };
        assert!(apply_to_file(&path, &block).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_apply_missing_file_with_search_fails() {
        let dir = TempDir::new().unwrap();
        let block = EditBlock {
            path: "gone.txt".to_string(),
            search: "x\n".to_string(),
            replace: "y\n".to_string(),
        };
        assert!(!apply_to_file(&dir.path().join("gone.txt"), &block).unwrap());
    }
}
