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

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::cli::{Backend, SessionArgs};
use crate::constants::{DEFAULT_IGNORE_FILE, DEFAULT_LOG_FILE, DEFAULT_TOOLS};
use crate::jira::JiraOverrides;
use crate::llm::ModelConfig;

/// Configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Model backend ("api" or "tools")
    pub backend: Option<String>,

    /// Chat API model, base URL and key
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,

    /// LLM tools to use (comma-separated: claude, codex, gemini)
    pub tools: Option<String>,

    /// Per-tool model specifications
    pub claude_model: Option<String>,
    pub codex_model: Option<String>,
    pub gemini_model: Option<String>,

    /// Chat history file
    pub log_file: Option<String>,

    pub auto_commits: Option<bool>,
    pub dirty_commits: Option<bool>,
    pub attribute_author: Option<bool>,
    pub attribute_committer: Option<bool>,
    pub attribute_commit_message: Option<bool>,
    pub git_commit_verify: Option<bool>,

    pub ignore_file: Option<String>,

    /// Command run by /test
    pub test_cmd: Option<String>,

    pub yes_always: Option<bool>,

    pub jira_server_url: Option<String>,
    pub jira_email: Option<String>,
    pub jira_api_token: Option<String>,
}

impl Config {
    /// Load config from a file, or return default if file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Merge this config with CLI args, where CLI args take precedence
    pub fn merge_with_cli<T>(&self, cli_value: T, config_value: Option<T>, default_value: T) -> T
    where
        T: PartialEq + Clone,
    {
        // If CLI value differs from default, use CLI value
        if cli_value != default_value {
            cli_value
        } else if let Some(config_val) = config_value {
            // Otherwise use config value if present
            config_val
        } else {
            // Fall back to default
            default_value
        }
    }
}

/// Commit behaviour shared by every git write the session makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
    pub auto_commits: bool,
    pub dirty_commits: bool,
    pub attribute_author: bool,
    pub attribute_committer: bool,
    pub attribute_commit_message: bool,
    pub commit_verify: bool,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            auto_commits: true,
            dirty_commits: true,
            attribute_author: true,
            attribute_committer: true,
            attribute_commit_message: false,
            commit_verify: false,
        }
    }
}

/// Fully resolved session settings: CLI, then config file, then defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: Backend,
    pub tools: String,
    pub models: ModelConfig,
    pub log_file: String,
    pub git: GitSettings,
    pub ignore_file: String,
    pub test_cmd: Option<String>,
    pub yes_always: bool,
    pub jira: JiraOverrides,
}

impl Settings {
    pub fn resolve(args: &SessionArgs, config: &Config) -> Result<Self> {
        let backend = if args.backend == Backend::Tools {
            match &config.backend {
                Some(name) => name.parse::<Backend>().map_err(|err| anyhow!(err))?,
                None => args.backend,
            }
        } else {
            args.backend
        };

        let api_key = args
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .or_else(|| std::env::var("PAIRLINE_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());

        let models = ModelConfig {
            model: args.model.clone().or_else(|| config.model.clone()),
            api_base: args.api_base.clone().or_else(|| config.api_base.clone()),
            api_key,
            gemini_model: args.gemini_model.clone().or_else(|| config.gemini_model.clone()),
            claude_model: args.claude_model.clone().or_else(|| config.claude_model.clone()),
            codex_model: args.codex_model.clone().or_else(|| config.codex_model.clone()),
        };

        let defaults = GitSettings::default();
        let git = GitSettings {
            auto_commits: config.merge_with_cli(
                !args.no_auto_commits,
                config.auto_commits,
                defaults.auto_commits,
            ),
            dirty_commits: config.merge_with_cli(
                !args.no_dirty_commits,
                config.dirty_commits,
                defaults.dirty_commits,
            ),
            attribute_author: config.merge_with_cli(
                !args.no_attribute_author,
                config.attribute_author,
                defaults.attribute_author,
            ),
            attribute_committer: config.merge_with_cli(
                !args.no_attribute_committer,
                config.attribute_committer,
                defaults.attribute_committer,
            ),
            attribute_commit_message: config.merge_with_cli(
                args.attribute_commit_message,
                config.attribute_commit_message,
                defaults.attribute_commit_message,
            ),
            commit_verify: config.merge_with_cli(
                args.git_commit_verify,
                config.git_commit_verify,
                defaults.commit_verify,
            ),
        };

        Ok(Self {
            backend,
            tools: config.merge_with_cli(
                args.tools.clone(),
                config.tools.clone(),
                DEFAULT_TOOLS.to_string(),
            ),
            models,
            log_file: config.merge_with_cli(
                args.log_file.clone(),
                config.log_file.clone(),
                DEFAULT_LOG_FILE.to_string(),
            ),
            git,
            ignore_file: config.merge_with_cli(
                args.ignore_file.clone(),
                config.ignore_file.clone(),
                DEFAULT_IGNORE_FILE.to_string(),
            ),
            test_cmd: args.test_cmd.clone().or_else(|| config.test_cmd.clone()),
            yes_always: config.merge_with_cli(args.yes_always, config.yes_always, false),
            jira: JiraOverrides {
                server_url: args
                    .jira_server_url
                    .clone()
                    .or_else(|| config.jira_server_url.clone()),
                email: args.jira_email.clone().or_else(|| config.jira_email.clone()),
                api_token: args
                    .jira_api_token
                    .clone()
                    .or_else(|| config.jira_api_token.clone()),
            },
        })
    }

    /// Human-readable dump used by /settings.
    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("backend: {:?}", self.backend).to_lowercase(),
            format!("tools: {}", self.tools),
        ];
        if let Some(model) = &self.models.model {
            lines.push(format!("model: {}", model));
        }
        if let Some(base) = &self.models.api_base {
            lines.push(format!("api_base: {}", base));
        }
        lines.push(format!(
            "api_key: {}",
            if self.models.api_key.is_some() { "set" } else { "unset" }
        ));
        lines.push(format!("log_file: {}", self.log_file));
        lines.push(format!("auto_commits: {}", self.git.auto_commits));
        lines.push(format!("dirty_commits: {}", self.git.dirty_commits));
        lines.push(format!("attribute_author: {}", self.git.attribute_author));
        lines.push(format!("attribute_committer: {}", self.git.attribute_committer));
        lines.push(format!(
            "attribute_commit_message: {}",
            self.git.attribute_commit_message
        ));
        lines.push(format!("git_commit_verify: {}", self.git.commit_verify));
        lines.push(format!("ignore_file: {}", self.ignore_file));
        lines.push(format!(
            "test_cmd: {}",
            self.test_cmd.as_deref().unwrap_or("(none)")
        ));
        lines.push(format!("yes_always: {}", self.yes_always));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("pairline.toml")).unwrap();
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_config_file_fills_unset_cli_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairline.toml");
        fs::write(
            &path,
            "backend = \"api\"\ntools = \"codex\"\nauto_commits = false\nmodel = \"gpt-test\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let cli = Cli::parse_from(["pairline"]);

        let settings = Settings::resolve(&cli.session, &config).unwrap();
        assert_eq!(settings.backend, Backend::Api);
        assert_eq!(settings.tools, "codex");
        assert!(!settings.git.auto_commits);
        assert_eq!(settings.models.model.as_deref(), Some("gpt-test"));
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config {
            tools: Some("gemini".to_string()),
            yes_always: Some(false),
            ..Config::default()
        };
        let cli = Cli::parse_from(["pairline", "--tools", "claude", "--yes-always"]);

        let settings = Settings::resolve(&cli.session, &config).unwrap();
        assert_eq!(settings.tools, "claude");
        assert!(settings.yes_always);
    }

    #[test]
    fn test_bad_backend_in_config_errors() {
        let config = Config {
            backend: Some("telepathy".to_string()),
            ..Config::default()
        };
        let cli = Cli::parse_from(["pairline"]);
        assert!(Settings::resolve(&cli.session, &config).is_err());
    }
}
