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

//! Gitignore-style patterns for hiding repository files from the model.
//!
//! Supports comments, blank lines, `!` negation, trailing `/` for
//! directories, leading `/` anchoring and `**`. Later rules win.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Component, Path};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug)]
struct IgnoreRule {
    pattern: Pattern,
    negated: bool,
    dir_only: bool,
    /// Pattern contains a separator, so it matches against the whole path
    rooted: bool,
}

impl IgnoreRule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line.strip_prefix('\\').unwrap_or(line)),
        };

        let dir_only = rest.ends_with('/');
        let rest = rest.trim_end_matches('/');
        let rooted = rest.contains('/');
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            return None;
        }

        let pattern = Pattern::new(rest).ok()?;
        Some(Self {
            pattern,
            negated,
            dir_only,
            rooted,
        })
    }

    fn matches(&self, candidate: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.rooted {
            return self.pattern.matches_with(candidate, MATCH_OPTIONS);
        }
        let basename = candidate.rsplit('/').next().unwrap_or(candidate);
        self.pattern.matches_with(basename, MATCH_OPTIONS)
    }
}

#[derive(Debug, Default)]
pub struct IgnoreSpec {
    rules: Vec<IgnoreRule>,
}

impl IgnoreSpec {
    pub fn parse(content: &str) -> Self {
        Self {
            rules: content.lines().filter_map(IgnoreRule::parse).collect(),
        }
    }

    /// Load an ignore file; a missing file ignores nothing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ignore file: {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a path relative to the repository root is ignored.
    ///
    /// A file inside an ignored directory is ignored too.
    pub fn is_ignored(&self, rel_path: &Path) -> bool {
        let parts: Vec<String> = rel_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            return false;
        }

        let mut prefix = String::new();
        for (index, part) in parts.iter().enumerate() {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            let is_dir = index + 1 < parts.len();

            let ignored = self.decide(&prefix, is_dir);
            if ignored || !is_dir {
                return ignored;
            }
        }
        false
    }

    fn decide(&self, candidate: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(candidate, is_dir) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_basename_patterns_match_anywhere() {
        let spec = IgnoreSpec::parse("*.log\n# comment\n\nsecrets.txt\n");
        assert!(spec.is_ignored(Path::new("app.log")));
        assert!(spec.is_ignored(Path::new("deep/nested/app.log")));
        assert!(spec.is_ignored(Path::new("config/secrets.txt")));
        assert!(!spec.is_ignored(Path::new("src/main.rs")));
    }

    #[test]
    fn test_directory_patterns_cover_contents() {
        let spec = IgnoreSpec::parse("build/\n/vendor\n");
        assert!(spec.is_ignored(Path::new("build/out.o")));
        assert!(spec.is_ignored(Path::new("pkg/build/out.o")));
        assert!(!spec.is_ignored(Path::new("build")));
        assert!(spec.is_ignored(Path::new("vendor/lib.rs")));
        assert!(!spec.is_ignored(Path::new("src/vendor.rs")));
    }

    #[test]
    fn test_negation_and_anchored_globs() {
        let spec = IgnoreSpec::parse("docs/**/*.md\n!docs/keep/README.md\n");
        assert!(spec.is_ignored(Path::new("docs/a/b.md")));
        assert!(!spec.is_ignored(Path::new("docs/keep/README.md")));
        assert!(!spec.is_ignored(Path::new("README.md")));
    }

    #[test]
    fn test_load_missing_file_ignores_nothing() {
        let dir = TempDir::new().unwrap();
        let spec = IgnoreSpec::load(&dir.path().join(".pairlineignore")).unwrap();
        assert!(spec.is_empty());
        assert!(!spec.is_ignored(Path::new("anything")));
    }
}
