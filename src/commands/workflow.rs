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

//! Multi-step workflows: planning, executing plans, JIRA tickets and cleanup.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Commands, Outcome};
use crate::coder::{ChatMode, Coder};
use crate::constants::{CODE_EXTENSIONS, language_for_extension};
use crate::jira::Jira;
use crate::plan::{self, StepFiles, StepRunner};
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupIntensity {
    Low,
    Medium,
    High,
}

impl CleanupIntensity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn tasks(&self) -> &'static [&'static str] {
        match self {
            Self::Low => &[
                "Add or update docstrings and comments where needed",
                "Fix syntax issues and indentation",
            ],
            Self::Medium => &[
                "Make the code less verbose",
                "Keep the style consistent with the rest of the file",
                "Fix obvious bugs and unhandled edge cases",
            ],
            Self::High => &[
                "Refactor code for clarity",
                "Remove unused code and imports",
                "Optimize the code structure",
                "Simplify complex logic",
                "Follow the naming conventions of the language",
                "Improve error handling",
                "Apply the best practices of the language",
            ],
        }
    }
}

fn is_code_file(rel: &str) -> bool {
    Path::new(rel)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
}

fn language_of(rel: &str) -> &'static str {
    let ext = Path::new(rel)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    language_for_extension(&ext)
}

/// Flags of `/solve-jira`, matched case-insensitively.
#[derive(Debug, Default, PartialEq, Eq)]
struct SolveJiraArgs {
    issue: Option<String>,
    with_pr: bool,
    with_code_cleanup: bool,
}

impl SolveJiraArgs {
    fn parse(args: &str) -> Self {
        let mut parsed = Self::default();
        for word in args.split_whitespace() {
            match word.to_lowercase().as_str() {
                "--with-pr" | "-pr" => parsed.with_pr = true,
                "--with-code-cleanup" | "-cleanup" => parsed.with_code_cleanup = true,
                _ if parsed.issue.is_none() => parsed.issue = Some(word.to_string()),
                _ => {}
            }
        }
        parsed
    }
}

/// Runs plan steps against the live command state.
struct PlanSteps<'a> {
    commands: &'a mut Commands,
    plan_name: String,
    files: StepFiles,
    whole_plan: bool,
}

impl StepRunner for PlanSteps<'_> {
    fn run_step(&mut self, step: usize) -> Result<()> {
        self.commands
            .session
            .io
            .output(&format!("Implementing step {}", step));

        let files = self.files.get(step).cloned().unwrap_or_default();
        for rel in &files {
            if self.commands.coder.root().join(rel).is_file() {
                self.commands.coder.add_rel_fname(rel)?;
            }
        }

        let prompt = if self.whole_plan {
            prompts::whole_plan_prompt(&self.plan_name)
        } else {
            prompts::step_prompt(step, &self.plan_name)
        };
        let keep = [self.plan_name.clone()];
        self.commands.run_new_coder(&prompt, &keep, true)
    }

    fn step_failed(&mut self, step: usize, error: &anyhow::Error) {
        self.commands.session.io.error(&format!("{:#}", error));
        self.commands.session.io.warning(&format!(
            "Failed to implement step {}, trying again.",
            step
        ));
    }
}

impl Commands {
    /// Write `<stem>_implementation_plan.md` next to a ticket file. Returns
    /// the saved plan path.
    fn plan_implementation(&mut self, ticket: &Path) -> Result<Option<PathBuf>> {
        if !ticket.exists() {
            self.session
                .io
                .error(&format!("File not found: {}", ticket.display()));
            return Ok(None);
        }

        let ticket_content = match fs::read_to_string(ticket) {
            Ok(content) => content,
            Err(e) => {
                self.session.io.error(&format!("Error reading file: {}", e));
                return Ok(None);
            }
        };

        self.session.io.output(&format!(
            "Generating implementation plan from {}...",
            ticket.display()
        ));

        let base = Coder::new(self.coder.root(), ChatMode::Code);
        let plan = plan::generate_plan(&mut self.session, &base, &ticket_content)?;

        let plan_path = plan::plan_path_for(ticket);
        match self.session.io.write_text(&plan_path, &plan) {
            Ok(()) => {
                self.session.io.output(&format!(
                    "Implementation plan saved to {}",
                    plan_path.display()
                ));
                Ok(Some(plan_path))
            }
            Err(e) => {
                self.session
                    .io
                    .error(&format!("Error saving implementation plan: {:#}", e));
                Ok(None)
            }
        }
    }

    pub(super) fn cmd_plan_implementation(&mut self, args: &str) -> Result<Outcome> {
        let path = args.trim();
        if path.is_empty() {
            self.session
                .io
                .error("Please provide a path to a JIRA ticket or feature specification file");
            return Ok(Outcome::Continue);
        }

        let ticket = self.coder.resolve_path(path);
        self.plan_implementation(&ticket)?;
        Ok(Outcome::Continue)
    }

    /// Add the plan, count its steps, find each step's files, then run the
    /// steps one editing session at a time.
    pub(super) fn cmd_code_from_plan(&mut self, args: &str) -> Result<Outcome> {
        let path = args.trim();
        if path.is_empty() {
            self.session
                .io
                .error("Please provide a path to a Markdown plan file");
            return Ok(Outcome::Continue);
        }

        let plan_path = self.coder.resolve_path(path);
        if !plan_path.is_file() {
            self.session
                .io
                .error(&format!("Plan file not found: {}", path));
            return Ok(Outcome::Continue);
        }

        self.cmd_add(&format!("\"{}\"", plan_path.display()))?;
        let plan_name = self.coder.get_rel_fname(&plan_path);

        self.session
            .io
            .output("Analyzing the plan to determine the number of steps...");
        let step_count = plan::count_steps(&mut self.session, &self.coder)?;

        let mut files = StepFiles::default();
        let (steps, whole_plan) = match step_count {
            Some(count) => {
                self.session
                    .io
                    .output(&format!("Found {} steps in the plan.", count));
                for step in 1..=count {
                    let found =
                        plan::discover_step_files(&mut self.session, &self.coder, &plan_name, Some(step))?;
                    files.insert(step, found);
                }
                (count, false)
            }
            None => {
                self.session.io.warning(
                    "Unable to determine number of steps. Will try to solve them all at once.",
                );
                let found = plan::discover_step_files(&mut self.session, &self.coder, &plan_name, None)?;
                files.insert(1, found);
                (1, true)
            }
        };

        let needed: Vec<String> = files.all().into_iter().collect();
        if !needed.is_empty() {
            self.session
                .io
                .output(&format!("Files needed by the plan: {}", needed.join(", ")));
        }

        let mut runner = PlanSteps {
            commands: self,
            plan_name,
            files,
            whole_plan,
        };
        plan::execute_steps(&mut runner, steps)?;

        self.session.io.output("\nPlan execution completed!");
        Ok(Outcome::Continue)
    }

    /// Fetch a ticket, plan it, implement the plan, and optionally clean up
    /// and open a pull request.
    pub(super) fn cmd_solve_jira(&mut self, args: &str) -> Result<Outcome> {
        let parsed = SolveJiraArgs::parse(args);
        let Some(key) = parsed.issue else {
            self.session
                .io
                .error("Please provide a JIRA issue key or ID");
            return Ok(Outcome::Continue);
        };

        let jira = Jira::from_env(&self.session.settings.jira)?;
        let content = jira.get_issue_content(&key)?;

        let ticket_path = self.coder.root().join(format!("jira_issue_{}.txt", key));
        self.session
            .io
            .write_text(&ticket_path, &serde_json::to_string_pretty(&content)?)?;

        let Some(plan_path) = self.plan_implementation(&ticket_path)? else {
            return Ok(Outcome::Continue);
        };
        if !plan_path.is_file() {
            self.session.io.error(&format!(
                "Implementation plan file not found: {}",
                plan_path.display()
            ));
            return Ok(Outcome::Continue);
        }

        let plan_name = self.coder.get_rel_fname(&plan_path);
        self.session.commit_files(
            &[plan_name.clone()],
            Some(format!("Add implementation plan for JIRA issue {}", key).as_str()),
            true,
        )?;

        self.clear_chat_history();
        self.drop_all_files();

        self.cmd_code_from_plan(&plan_name)?;

        self.coder.drop_rel_fname(&plan_name);
        fs::remove_file(&plan_path)?;
        self.session.commit_files(
            &[plan_name],
            Some(format!("Delete implementation plan for JIRA issue {} from git", key).as_str()),
            true,
        )?;

        if let Err(e) = fs::remove_file(&ticket_path) {
            self.session
                .io
                .error(&format!("Unable to delete JIRA ticket file: {}", e));
        }

        if parsed.with_code_cleanup {
            self.session
                .io
                .output("Cleaning up code with low intensity...");
            self.cmd_clean_code(CleanupIntensity::Low.name())?;
        }

        if parsed.with_pr {
            self.session
                .io
                .output("Creating pull request with all committed changes...");
            self.cmd_raise_pr("")?;
            let status = jira.set_ticket_to_review(&key)?;
            self.session
                .io
                .output(&format!("Moved {} to {}", key, status));
        }

        Ok(Outcome::Continue)
    }

    /// Clean the code files changed on this branch, one editing session per
    /// file.
    pub(super) fn cmd_clean_code(&mut self, args: &str) -> Result<Outcome> {
        if self.session.repo.is_none() {
            self.session.io.error("No git repository found.");
            return Ok(Outcome::Continue);
        }

        let requested = args.trim();
        let intensity = match CleanupIntensity::parse(requested) {
            Some(intensity) => intensity,
            None => {
                if !requested.is_empty() {
                    self.session.io.warning(&format!(
                        "Invalid intensity level: {}. Using 'medium' instead.",
                        requested
                    ));
                }
                CleanupIntensity::Medium
            }
        };

        self.session.io.output(&format!(
            "Starting code cleanup with {} intensity...",
            intensity.name()
        ));

        let repo = self.session.repo()?;
        let current_branch = repo.current_branch()?;
        let Some(default_branch) = repo.default_branch() else {
            self.session.io.error("Could not determine default branch.");
            return Ok(Outcome::Continue);
        };

        let changed = repo.changed_files(&default_branch, &current_branch)?;
        let commit_history = repo.commit_history(&default_branch, &current_branch)?;

        if changed.is_empty() {
            self.session
                .io
                .output("No modified files found in the current branch.");
            return Ok(Outcome::Continue);
        }

        let code_files: Vec<String> = changed.into_iter().filter(|f| is_code_file(f)).collect();
        if code_files.is_empty() {
            self.session
                .io
                .output("No code files found among the modified files.");
            return Ok(Outcome::Continue);
        }

        self.session.io.output(&format!(
            "Found {} modified code files to clean",
            code_files.len()
        ));
        self.session.io.output(&format!(
            "\nSelected cleanup intensity: {}",
            intensity.name()
        ));
        self.session.io.output("Cleanup operations to perform:");
        for (i, task) in intensity.tasks().iter().enumerate() {
            self.session.io.output(&format!("  {}. {}", i + 1, task));
        }

        self.with_auto_confirm(|this| {
            for file in &code_files {
                if !this.coder.root().join(file).exists() {
                    this.session
                        .io
                        .warning(&format!("File {} no longer exists, skipping.", file));
                    continue;
                }

                this.session.io.output(&format!("\nCleaning {}...", file));
                let prompt =
                    prompts::cleanup_message(language_of(file), intensity.tasks(), &commit_history);
                let result = this
                    .cmd_add(&format!("\"{}\"", file))
                    .and_then(|_| this.run_new_coder(&prompt, &[], false));
                if let Err(e) = result {
                    this.session
                        .io
                        .error(&format!("Error processing {}: {:#}", file, e));
                }
            }
        });

        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::commands_in;
    use crate::repo::tests::{init_repo, run_git};

    const EDIT_README: &str =
        "README.md\n<<<<<<< SEARCH\nhello\n=======\nhello world\n>>>>>>> REPLACE\n";
    const EDIT_README_AGAIN: &str =
        "README.md\n<<<<<<< SEARCH\nhello world\n=======\ngoodbye world\n>>>>>>> REPLACE\n";

    fn git_log(commands: &Commands) -> String {
        commands
            .session
            .repo
            .as_ref()
            .unwrap()
            .raw(&["log".to_string(), "--format=%s".to_string()])
            .unwrap()
    }

    fn last_request(seen: &crate::commands::tests::Seen, index: usize) -> String {
        seen.borrow()[index].last().unwrap().content.clone()
    }

    #[test]
    fn test_cleanup_intensity_parse_and_tasks() {
        assert_eq!(CleanupIntensity::parse("HIGH"), Some(CleanupIntensity::High));
        assert_eq!(CleanupIntensity::parse("extreme"), None);
        assert_eq!(CleanupIntensity::Low.tasks().len(), 2);
        assert_eq!(CleanupIntensity::Medium.tasks().len(), 3);
        assert_eq!(CleanupIntensity::High.tasks().len(), 7);
    }

    #[test]
    fn test_solve_jira_args() {
        let parsed = SolveJiraArgs::parse("PROJ-12 -PR --With-Code-Cleanup");
        assert_eq!(
            parsed,
            SolveJiraArgs {
                issue: Some("PROJ-12".to_string()),
                with_pr: true,
                with_code_cleanup: true,
            }
        );
        assert_eq!(SolveJiraArgs::parse("--with-pr").issue, None);
    }

    #[test]
    fn test_is_code_file() {
        assert!(is_code_file("src/main.rs"));
        assert!(is_code_file("app/Model.PY"));
        assert!(!is_code_file("README.md"));
        assert!(!is_code_file("Makefile"));
    }

    #[test]
    fn test_code_from_plan_runs_each_step() {
        let dir = init_repo();
        fs::write(
            dir.path().join("plan.md"),
            "## Step 1\nGreet the world\n## Step 2\nSay goodbye\n",
        )
        .unwrap();
        run_git(dir.path(), &["add", "plan.md"]);
        run_git(dir.path(), &["commit", "-q", "-m", "plan"]);

        let (mut commands, seen) = commands_in(
            &dir,
            &[
                "2",
                "README.md",
                "README.md",
                EDIT_README,
                "feat: greet the world",
                EDIT_README_AGAIN,
                "feat: say goodbye",
            ],
        );
        commands.run("/code-from-plan plan.md");

        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "goodbye world\n"
        );
        assert!(last_request(&seen, 1).contains("only step 1"));
        assert!(last_request(&seen, 2).contains("only step 2"));
        assert!(last_request(&seen, 3).starts_with("Implement only step 1 of the plan"));
        assert!(last_request(&seen, 5).starts_with("Implement only step 2 of the plan"));
        assert_eq!(commands.coder.inchat_relative_files(), vec!["plan.md"]);

        let log = git_log(&commands);
        assert!(log.starts_with("feat: say goodbye\nfeat: greet the world\nplan\n"));
    }

    #[test]
    fn test_code_from_plan_falls_back_to_whole_plan() {
        let dir = init_repo();
        fs::write(dir.path().join("plan.md"), "Greet the world.\n").unwrap();
        run_git(dir.path(), &["add", "plan.md"]);
        run_git(dir.path(), &["commit", "-q", "-m", "plan"]);

        let (mut commands, seen) = commands_in(
            &dir,
            &["a few", "README.md", EDIT_README, "feat: greet the world"],
        );
        commands.run("/code-from-plan plan.md");

        assert!(last_request(&seen, 1).contains("the whole plan"));
        assert!(last_request(&seen, 2).starts_with("Please, implement the plan in the plan.md file"));
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "hello world\n"
        );
    }

    #[test]
    fn test_code_from_plan_retries_remaining_steps() {
        let dir = init_repo();
        fs::write(dir.path().join("plan.md"), "## Step 1\nGreet\n").unwrap();
        run_git(dir.path(), &["add", "plan.md"]);
        run_git(dir.path(), &["commit", "-q", "-m", "plan"]);

        // The first step attempt has no scripted reply left after the
        // discovery reply is consumed, so it fails and the retry also fails.
        let (mut commands, seen) = commands_in(&dir, &["1", "README.md"]);
        assert_eq!(commands.run("/code-from-plan plan.md"), Outcome::Continue);
        assert_eq!(seen.borrow().len(), 4);
    }

    #[test]
    fn test_code_from_plan_missing_file() {
        let dir = init_repo();
        let (mut commands, seen) = commands_in(&dir, &[]);
        commands.run("/code-from-plan missing.md");
        assert!(seen.borrow().is_empty());
        assert!(commands.coder.editable().is_empty());
    }

    #[test]
    fn test_plan_implementation_saves_plan_next_to_ticket() {
        let dir = init_repo();
        fs::write(dir.path().join("ticket.txt"), "Greet the world\n").unwrap();

        let (mut commands, _) = commands_in(
            &dir,
            &["## Step 1\nEdit README.md", "README.md", "## Step 1\nChange README.md"],
        );
        commands.run("/plan-implementation ticket.txt");

        let saved = fs::read_to_string(dir.path().join("ticket_implementation_plan.md")).unwrap();
        assert_eq!(saved, "## Step 1\nChange README.md");
        assert!(commands.coder.editable().is_empty());
    }

    #[test]
    fn test_clean_code_cleans_branch_code_files() {
        let dir = init_repo();
        run_git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();
        fs::write(dir.path().join("notes.md"), "notes\n").unwrap();
        run_git(dir.path(), &["add", "app.py", "notes.md"]);
        run_git(dir.path(), &["commit", "-q", "-m", "add app"]);

        let (mut commands, seen) = commands_in(
            &dir,
            &[
                "app.py\n<<<<<<< SEARCH\nprint('hi')\n=======\nprint(\"hi\")\n>>>>>>> REPLACE\n",
                "style: normalize quotes",
            ],
        );
        commands.run("/clean-code low");

        assert_eq!(
            fs::read_to_string(dir.path().join("app.py")).unwrap(),
            "print(\"hi\")\n"
        );
        let request = last_request(&seen, 0);
        assert!(request.contains("clean up the following Python code file"));
        assert!(request.contains("- Fix syntax issues and indentation"));
        assert!(request.contains("add app"));
        assert!(commands.coder.editable().is_empty());
    }

    #[test]
    fn test_clean_code_on_default_branch_does_nothing() {
        let dir = init_repo();
        let (mut commands, seen) = commands_in(&dir, &[]);
        commands.run("/clean-code extreme");
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_solve_jira_plans_implements_and_cleans_up() {
        let mut server = mockito::Server::new();
        let issue = server
            .mock("GET", "/rest/api/2/issue/PROJ-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"fields":{"summary":"Greet the world","description":"Say hello world in the readme"}}"#)
            .create();

        let dir = init_repo();
        let (mut commands, seen) = commands_in(
            &dir,
            &[
                "## Step 1\nUpdate README.md",
                "README.md",
                "## Step 1\nChange the greeting in README.md",
                "1",
                "README.md",
                EDIT_README,
                "feat: greet the world",
            ],
        );
        commands.session.settings.jira.server_url = Some(server.url());
        commands.session.settings.jira.email = Some("dev@example.com".to_string());
        commands.session.settings.jira.api_token = Some("token".to_string());

        commands.run("/solve-jira PROJ-1");

        issue.assert();
        assert!(last_request(&seen, 0).contains("Greet the world"));
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "hello world\n"
        );
        assert!(!dir.path().join("jira_issue_PROJ-1.txt").exists());
        assert!(!dir.path().join("jira_issue_PROJ-1_implementation_plan.md").exists());

        let log = git_log(&commands);
        assert!(log.starts_with(
            "Delete implementation plan for JIRA issue PROJ-1 from git\nfeat: greet the world\nAdd implementation plan for JIRA issue PROJ-1\ninitial\n"
        ));
    }
}
