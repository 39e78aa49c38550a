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

use std::path::PathBuf;
use thiserror::Error;

/// Failures the command dispatcher reports by name.
#[derive(Debug, Error)]
pub enum PairError {
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("No git repository found.")]
    NoRepo,

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unable to parse LLM response: {0}")]
    Unparsable(String),

    #[error("JIRA request failed: {0}")]
    Jira(String),
}

impl PairError {
    pub fn git(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            message: message.into(),
        }
    }
}
