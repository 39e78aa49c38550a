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

//! Implementation plans: writing them from a ticket and walking their steps.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::coder::{ChatMode, Coder, Session};
use crate::constants::PLAN_FILE_SUFFIX;
use crate::error::PairError;
use crate::llm::remove_reasoning_content;
use crate::prompts;

static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Where the plan for a ticket file is saved: `<stem>_implementation_plan.md`
/// next to the ticket.
pub fn plan_path_for(ticket: &Path) -> PathBuf {
    let stem = ticket
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ticket".to_string());
    let name = format!("{}{}", stem, PLAN_FILE_SUFFIX);
    match ticket.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

/// Read a step count out of a model reply. A bare integer is taken as is,
/// otherwise the first integer in the text. Zero counts as no answer.
pub fn parse_step_count(reply: &str) -> Result<usize, PairError> {
    let cleaned = remove_reasoning_content(reply);
    let trimmed = cleaned.trim();

    let count = match trimmed.parse::<usize>() {
        Ok(count) => Some(count),
        Err(_) => FIRST_INTEGER
            .find(trimmed)
            .and_then(|m| m.as_str().parse::<usize>().ok()),
    };

    match count {
        Some(count) if count > 0 => Ok(count),
        _ => Err(PairError::Unparsable(format!(
            "expected a step count, got {:?}",
            trimmed
        ))),
    }
}

/// Files discovered for each step of a plan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepFiles {
    steps: BTreeMap<usize, BTreeSet<String>>,
}

impl StepFiles {
    pub fn insert(&mut self, step: usize, files: BTreeSet<String>) {
        self.steps.entry(step).or_default().extend(files);
    }

    pub fn get(&self, step: usize) -> Option<&BTreeSet<String>> {
        self.steps.get(&step)
    }

    /// Every file any step touches.
    pub fn all(&self) -> BTreeSet<String> {
        self.steps.values().flatten().cloned().collect()
    }

}

/// Write a plan for a ticket: a first draft, the files it touches, then a
/// final plan written with those files' contents in view.
pub fn generate_plan(session: &mut Session, base: &Coder, ticket: &str) -> Result<String> {
    let mut planner = Coder::from_coder(base, ChatMode::Plan, false);
    let initial = planner.run_one(session, &prompts::initial_plan_message(ticket))?;

    let affected = identify_affected_files(session, base, &initial)?;

    let mut contents = String::new();
    for rel in &affected {
        if let Some(text) = session.io.read_text(&base.root().join(rel)) {
            contents.push_str(&format!("\n\n{}\n```\n{}\n```", rel, text));
        }
    }

    planner.run_one(
        session,
        &prompts::final_plan_message(ticket, &initial, &affected, &contents),
    )
}

/// Ask a context session which repository files a plan will touch.
pub fn identify_affected_files(session: &mut Session, base: &Coder, plan: &str) -> Result<Vec<String>> {
    let mut finder = Coder::from_coder(base, ChatMode::Context, false);
    finder.run_one(session, &prompts::affected_files_message(plan))?;
    Ok(finder.inchat_relative_files())
}

/// Ask how many steps the plan in `base`'s chat has. Confirmations are
/// answered automatically while asking.
pub fn count_steps(session: &mut Session, base: &Coder) -> Result<Option<usize>> {
    let previous = session.io.set_auto_confirm(true);
    let mut asker = Coder::from_coder(base, ChatMode::Ask, false);
    let reply = asker.run_one(session, prompts::STEP_COUNT_PROMPT);
    session.io.set_auto_confirm(previous);

    Ok(parse_step_count(&reply?).ok())
}

/// Files needed for one step, or for the whole plan when `step` is `None`.
/// The plan file itself is left out.
pub fn discover_step_files(
    session: &mut Session,
    base: &Coder,
    plan_name: &str,
    step: Option<usize>,
) -> Result<BTreeSet<String>> {
    let message = match step {
        Some(step) => prompts::step_files_message(step, plan_name),
        None => prompts::whole_plan_files_message(plan_name),
    };

    let mut finder = Coder::from_coder(base, ChatMode::Context, false);
    finder.run_one(session, &message)?;

    Ok(finder
        .inchat_relative_files()
        .into_iter()
        .filter(|rel| rel != plan_name)
        .collect())
}

/// Runs individual plan steps for [`execute_steps`].
pub trait StepRunner {
    fn run_step(&mut self, step: usize) -> Result<()>;

    fn step_failed(&mut self, step: usize, error: &anyhow::Error);
}

/// Run steps `1..=step_count` in order. If a step fails, that step and every
/// step after it are run once more, and a second failure is returned.
pub fn execute_steps(runner: &mut impl StepRunner, step_count: usize) -> Result<()> {
    for step in 1..=step_count {
        if let Err(e) = runner.run_step(step) {
            runner.step_failed(step, &e);
            for retry in step..=step_count {
                runner.run_step(retry)?;
            }
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::tests::session_in;
    use crate::repo::tests::{init_repo, run_git};
    use std::fs;

    #[test]
    fn test_parse_step_count() {
        assert_eq!(parse_step_count("4").unwrap(), 4);
        assert_eq!(parse_step_count("  7\n").unwrap(), 7);
        assert_eq!(parse_step_count("The plan has 5 steps.").unwrap(), 5);
        assert_eq!(parse_step_count("<think>maybe 9</think>3").unwrap(), 3);
    }

    #[test]
    fn test_parse_step_count_rejects_missing_or_zero() {
        assert!(matches!(
            parse_step_count("several"),
            Err(PairError::Unparsable(_))
        ));
        assert!(parse_step_count("0").is_err());
        assert!(parse_step_count("").is_err());
    }

    #[test]
    fn test_plan_path_for() {
        assert_eq!(
            plan_path_for(Path::new("tickets/PROJ-1.txt")),
            PathBuf::from("tickets/PROJ-1_implementation_plan.md")
        );
        assert_eq!(
            plan_path_for(Path::new("feature.md")),
            PathBuf::from("feature_implementation_plan.md")
        );
    }

    #[test]
    fn test_step_files_merge_per_step() {
        let mut files = StepFiles::default();
        files.insert(1, BTreeSet::from(["a.rs".to_string()]));
        files.insert(1, BTreeSet::from(["b.rs".to_string()]));
        files.insert(2, BTreeSet::from(["a.rs".to_string()]));
        assert_eq!(files.get(1).unwrap().len(), 2);
        assert!(files.get(3).is_none());
        assert_eq!(files.all().len(), 2);
    }

    #[derive(Default)]
    struct Recorder {
        runs: Vec<usize>,
        failures: Vec<usize>,
        fail_once_at: Option<usize>,
        always_fail_at: Option<usize>,
    }

    impl StepRunner for Recorder {
        fn run_step(&mut self, step: usize) -> Result<()> {
            self.runs.push(step);
            if self.fail_once_at == Some(step) {
                self.fail_once_at = None;
                anyhow::bail!("step {} broke", step);
            }
            if self.always_fail_at == Some(step) {
                anyhow::bail!("step {} keeps breaking", step);
            }
            Ok(())
        }

        fn step_failed(&mut self, step: usize, _error: &anyhow::Error) {
            self.failures.push(step);
        }
    }

    #[test]
    fn test_execute_steps_in_order() {
        let mut recorder = Recorder::default();
        execute_steps(&mut recorder, 3).unwrap();
        assert_eq!(recorder.runs, vec![1, 2, 3]);
        assert!(recorder.failures.is_empty());
    }

    #[test]
    fn test_execute_steps_retries_the_rest() {
        let mut recorder = Recorder {
            fail_once_at: Some(2),
            ..Default::default()
        };
        execute_steps(&mut recorder, 4).unwrap();
        assert_eq!(recorder.runs, vec![1, 2, 2, 3, 4]);
        assert_eq!(recorder.failures, vec![2]);
    }

    #[test]
    fn test_execute_steps_gives_up_after_second_failure() {
        let mut recorder = Recorder {
            always_fail_at: Some(3),
            ..Default::default()
        };
        assert!(execute_steps(&mut recorder, 4).is_err());
        assert_eq!(recorder.runs, vec![1, 2, 3, 3]);
    }

    #[test]
    fn test_generate_plan_embeds_affected_files() {
        let dir = init_repo();
        fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();
        run_git(dir.path(), &["add", "app.py"]);

        let (mut session, seen) = session_in(
            &dir,
            &["## Step 1\nEdit app.py", "app.py\n", "## Step 1\nChange the greeting in app.py"],
        );
        let base = Coder::new(&session.root.clone(), ChatMode::Code);

        let plan = generate_plan(&mut session, &base, "Greet the user by name").unwrap();
        assert_eq!(plan, "## Step 1\nChange the greeting in app.py");

        let prompts = seen.borrow();
        assert_eq!(prompts.len(), 3);
        let final_request = &prompts[2].last().unwrap().content;
        assert!(final_request.contains("Greet the user by name"));
        assert!(final_request.contains("\n\napp.py\n```\nprint('hi')\n"));
    }

    #[test]
    fn test_count_steps_falls_back_to_none() {
        let dir = init_repo();
        let (mut session, _) = session_in(&dir, &["a handful"]);
        let base = Coder::new(&session.root.clone(), ChatMode::Code);
        assert_eq!(count_steps(&mut session, &base).unwrap(), None);
    }

    #[test]
    fn test_discover_step_files_skips_plan() {
        let dir = init_repo();
        fs::write(dir.path().join("plan.md"), "## Step 1\n").unwrap();
        fs::write(dir.path().join("lib.rs"), "\n").unwrap();
        run_git(dir.path(), &["add", "plan.md", "lib.rs"]);

        let (mut session, seen) = session_in(&dir, &["plan.md\nlib.rs\n"]);
        let base = Coder::new(&session.root.clone(), ChatMode::Code);
        let files = discover_step_files(&mut session, &base, "plan.md", Some(2)).unwrap();

        assert_eq!(files, BTreeSet::from(["lib.rs".to_string()]));
        let prompts = seen.borrow();
        let request = &prompts[0].last().unwrap().content;
        assert!(request.contains("only step 2"));
    }
}
