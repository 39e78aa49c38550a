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

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::constants::{DEFAULT_IGNORE_FILE, DEFAULT_LOG_FILE, DEFAULT_TOOLS};

#[derive(Parser)]
#[command(name = "pairline")]
#[command(about = "AI pair programming in your terminal, on top of git")]
#[command(version)]
pub struct Cli {
    /// Path to config file (defaults to pairline.toml in current directory if it exists)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Backend {
    /// OpenAI-compatible chat completions API
    Api,
    /// Agent CLIs (claude, codex, gemini) with rate-limit fallback
    Tools,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "tools" => Ok(Self::Tools),
            other => Err(format!("Invalid backend: {}", other)),
        }
    }
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Where model replies come from
    #[arg(long, value_enum, global = true, default_value_t = Backend::Tools)]
    pub backend: Backend,

    /// Model name for the chat API
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Base URL of the chat API (e.g., https://api.openai.com/v1)
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// API key for the chat API (defaults to OPENAI_API_KEY or PAIRLINE_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Comma-separated list of LLM tools to try (claude, codex, gemini)
    #[arg(long, global = true, default_value = DEFAULT_TOOLS)]
    pub tools: String,

    /// Model to use for Claude CLI (e.g., sonnet, opus)
    #[arg(long, global = true)]
    pub claude_model: Option<String>,

    /// Model to use for Codex CLI (e.g., o3, o4-mini)
    #[arg(long, global = true)]
    pub codex_model: Option<String>,

    /// Model to use for Gemini CLI (e.g., gemini-2.5-pro)
    #[arg(long, global = true)]
    pub gemini_model: Option<String>,

    /// Chat history file that mirrors all output
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    pub log_file: String,

    /// Do not commit edits made by the model
    #[arg(long, global = true)]
    pub no_auto_commits: bool,

    /// Do not commit pre-existing changes before the model edits a dirty file
    #[arg(long, global = true)]
    pub no_dirty_commits: bool,

    /// Leave the git author name untouched on model edits
    #[arg(long, global = true)]
    pub no_attribute_author: bool,

    /// Leave the git committer name untouched
    #[arg(long, global = true)]
    pub no_attribute_committer: bool,

    /// Prefix commit messages of model edits with "pairline: "
    #[arg(long, global = true)]
    pub attribute_commit_message: bool,

    /// Run git commit hooks (commits use --no-verify otherwise)
    #[arg(long, global = true)]
    pub git_commit_verify: bool,

    /// Gitignore-style file listing paths to hide from the model
    #[arg(long, global = true, default_value = DEFAULT_IGNORE_FILE)]
    pub ignore_file: String,

    /// Command run by /test
    #[arg(long, global = true)]
    pub test_cmd: Option<String>,

    /// Answer yes to every confirmation
    #[arg(long, global = true)]
    pub yes_always: bool,

    /// JIRA base URL (defaults to JIRA_SERVER_URL)
    #[arg(long, global = true)]
    pub jira_server_url: Option<String>,

    /// JIRA account email (defaults to JIRA_EMAIL)
    #[arg(long, global = true)]
    pub jira_email: Option<String>,

    /// JIRA API token (defaults to JIRA_API_TOKEN)
    #[arg(long, global = true)]
    pub jira_api_token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat session (the default)
    Chat {
        /// Files to add to the chat as editable
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Files to add to the chat as read-only
        #[arg(long = "read")]
        read: Vec<PathBuf>,

        /// Send one message (or slash command), then exit
        #[arg(short, long)]
        message: Option<String>,

        /// Replay commands from a file before chatting
        #[arg(long)]
        load: Option<PathBuf>,
    },

    /// Write an implementation plan for a ticket file
    Plan {
        /// Text file describing the ticket
        ticket: PathBuf,
    },

    /// Implement a plan file step by step
    CodeFromPlan {
        /// Markdown implementation plan
        plan: PathBuf,
    },

    /// Plan and implement a JIRA issue end to end
    SolveJira {
        /// Issue key (e.g., PROJ-123)
        issue: String,

        /// Raise a pull request and move the issue to review
        #[arg(long)]
        with_pr: bool,

        /// Run a low-intensity cleanup over changed files before the PR
        #[arg(long)]
        with_code_cleanup: bool,
    },

    /// Clean up code files changed on this branch
    CleanCode {
        /// low, medium or high
        intensity: Option<String>,
    },

    /// Push the branch and open a pull request with gh
    RaisePr,

    /// Commit outstanding changes
    Commit {
        /// Commit message (written by the model when omitted)
        message: Option<String>,
    },
}

impl Commands {
    /// The slash command line equivalent to a one-shot subcommand.
    pub fn as_slash_command(&self) -> Option<String> {
        match self {
            Self::Chat { .. } => None,
            Self::Plan { ticket } => Some(format!("/plan-implementation {}", ticket.display())),
            Self::CodeFromPlan { plan } => Some(format!("/code-from-plan {}", plan.display())),
            Self::SolveJira {
                issue,
                with_pr,
                with_code_cleanup,
            } => {
                let mut line = format!("/solve-jira {}", issue);
                if *with_pr {
                    line.push_str(" --with-pr");
                }
                if *with_code_cleanup {
                    line.push_str(" --with-code-cleanup");
                }
                Some(line)
            }
            Self::CleanCode { intensity } => Some(match intensity {
                Some(level) => format!("/clean-code {}", level),
                None => "/clean-code".to_string(),
            }),
            Self::RaisePr => Some("/raise-pr".to_string()),
            Self::Commit { message } => Some(match message {
                Some(msg) => format!("/commit {}", msg),
                None => "/commit".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_subcommand() {
        let cli = Cli::parse_from(["pairline"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.session.backend, Backend::Tools);
        assert_eq!(cli.session.tools, DEFAULT_TOOLS);
        assert!(!cli.session.yes_always);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "pairline",
            "code-from-plan",
            "plan.md",
            "--backend",
            "api",
            "--yes-always",
        ]);
        assert_eq!(cli.session.backend, Backend::Api);
        assert!(cli.session.yes_always);
        assert_eq!(
            cli.command.unwrap().as_slash_command().unwrap(),
            "/code-from-plan plan.md"
        );
    }

    #[test]
    fn test_solve_jira_flags_map_to_slash_command() {
        let cli = Cli::parse_from(["pairline", "solve-jira", "PROJ-1", "--with-pr"]);
        assert_eq!(
            cli.command.unwrap().as_slash_command().unwrap(),
            "/solve-jira PROJ-1 --with-pr"
        );
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("API".parse::<Backend>().unwrap(), Backend::Api);
        assert!("carrier-pigeon".parse::<Backend>().is_err());
    }
}
