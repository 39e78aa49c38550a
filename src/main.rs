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

mod chat;
mod cli;
mod coder;
mod commands;
mod config;
mod constants;
mod editblock;
mod error;
mod ignore;
mod jira;
mod llm;
mod logger;
mod plan;
mod prompts;
mod repo;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::coder::Session;
use crate::commands::{Commands, Outcome};
use crate::config::{Config, Settings};
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::llm::create_model;
use crate::logger::Io;
use crate::repo::GitRepo;

fn main() -> Result<()> {
    // Handle Ctrl+C gracefully
    ctrlc::set_handler(|| {
        println!("\nInterrupted. Exiting.");
        std::process::exit(0);
    })
    .context("Error setting Ctrl-C handler")?;

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = Config::load(&config_path)?;
    let settings = Settings::resolve(&cli.session, &config)?;

    let mut io = Io::new(Some(settings.log_file.as_str()), settings.yes_always);
    io.output(&format!(
        "\n# pairline chat started at {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));

    let model = create_model(settings.backend, &settings.tools, &settings.models)?;

    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let repo = match GitRepo::discover(&cwd, settings.git.clone(), &settings.ignore_file) {
        Ok(repo) => Some(repo),
        Err(e) => {
            io.warning(&format!("{:#}", e));
            io.warning("Git features (commits, /undo, /diff, PRs) are disabled.");
            None
        }
    };
    let root = match &repo {
        Some(repo) => repo.root().to_path_buf(),
        None => cwd.canonicalize().unwrap_or(cwd),
    };

    io.output(&format!("Model: {}", model.name()));
    if let Some(repo) = &repo {
        io.output(&format!("Git repo: {}", repo.root().display()));
    }

    let session = Session::new(io, model, repo, settings, root);
    let mut commands = Commands::new(session);

    match cli.command {
        Some(cli::Commands::Chat {
            files,
            read,
            message,
            load,
        }) => {
            for file in &files {
                commands.run(&format!("/add \"{}\"", file.display()));
            }
            for file in &read {
                commands.run(&format!("/read-only \"{}\"", file.display()));
            }
            commands.set_original_read_only(commands.coder.read_only().clone());

            if let Some(load) = load {
                if commands.run(&format!("/load {}", load.display())) == Outcome::Exit {
                    return Ok(());
                }
            }

            match message {
                Some(message) => {
                    commands.handle_input(&message);
                }
                None => chat_loop(&mut commands)?,
            }
        }
        Some(other) => {
            if let Some(line) = other.as_slash_command() {
                commands.run(&line);
            }
        }
        None => chat_loop(&mut commands)?,
    }

    Ok(())
}

/// Read lines until end of input or `/exit`.
fn chat_loop(commands: &mut Commands) -> Result<()> {
    commands
        .session
        .io
        .output("Use /help to see the commands. Ctrl+D or /exit to leave.");

    loop {
        let prompt = format!("{}> ", commands.coder.mode.name());
        let Some(line) = commands.session.io.read_line(&prompt)? else {
            println!();
            break;
        };
        if commands.handle_input(&line) == Outcome::Exit {
            break;
        }
    }
    Ok(())
}
