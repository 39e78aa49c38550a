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

//! JIRA REST v2 client: fetch issues and move them to review.

use anyhow::{Context, Result};
use chrono::DateTime;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::constants::HTTP_TIMEOUT_SECS;
use crate::error::PairError;

const JIRA_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// Values from the command line or config file that win over the environment.
#[derive(Debug, Clone, Default)]
pub struct JiraOverrides {
    pub server_url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueComment {
    pub author: String,
    pub last_updated: String,
    pub comment: String,
}

/// The parts of an issue a plan is written from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueContent {
    pub summary: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<IssueComment>>,
}

#[derive(Debug, Deserialize)]
struct TransitionList {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    #[serde(default)]
    name: String,
    to: Option<TransitionTarget>,
}

#[derive(Debug, Deserialize)]
struct TransitionTarget {
    #[serde(default)]
    name: String,
}

pub struct Jira {
    client: Client,
    v2_endpoint: String,
    email: String,
    api_token: String,
}

impl Jira {
    /// Build a client from overrides, falling back to JIRA_SERVER_URL,
    /// JIRA_EMAIL and JIRA_API_TOKEN.
    pub fn from_env(overrides: &JiraOverrides) -> Result<Self> {
        Self::from_lookup(overrides, |var| std::env::var(var).ok())
    }

    fn from_lookup(
        overrides: &JiraOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let pick = |value: &Option<String>, var: &str| {
            value
                .clone()
                .or_else(|| lookup(var))
                .filter(|v| !v.trim().is_empty())
        };

        let (Some(base_url), Some(email), Some(api_token)) = (
            pick(&overrides.server_url, "JIRA_SERVER_URL"),
            pick(&overrides.email, "JIRA_EMAIL"),
            pick(&overrides.api_token, "JIRA_API_TOKEN"),
        ) else {
            return Err(PairError::Jira(
                "One of the following env variables required for JIRA has not been properly set: JIRA_SERVER_URL, JIRA_EMAIL, JIRA_API_TOKEN".to_string(),
            )
            .into());
        };

        Self::new(&base_url, &email, &api_token)
    }

    pub fn new(base_url: &str, email: &str, api_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            v2_endpoint: format!("{}/rest/api/2", base_url.trim_end_matches('/')),
            email: email.to_string(),
            api_token: api_token.to_string(),
        })
    }

    pub fn get_issue(&self, issue_key: &str) -> Result<Value> {
        let url = format!("{}/issue/{}", self.v2_endpoint, issue_key);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .send()
            .map_err(|e| PairError::Jira(format!("Could not retrieve issue {}:\n{}", issue_key, e)))?;

        if response.status().as_u16() != 200 {
            return Err(PairError::Jira(format!(
                "Request for issue {} raised error: {}",
                issue_key,
                response.status().as_u16()
            ))
            .into());
        }

        response
            .json()
            .with_context(|| format!("Failed to parse issue {}", issue_key))
    }

    pub fn get_issue_content(&self, issue_key: &str) -> Result<IssueContent> {
        let issue = self.get_issue(issue_key)?;
        let fields = &issue["fields"];

        let summary = fields["summary"]
            .as_str()
            .ok_or_else(|| PairError::Jira(format!("Issue {} has no summary", issue_key)))?
            .to_string();
        let description = fields["description"].as_str().map(String::from);

        let comments: Vec<IssueComment> = fields["comment"]["comments"]
            .as_array()
            .map(|list| list.iter().map(comment_content).collect())
            .unwrap_or_default();

        Ok(IssueContent {
            summary,
            description,
            comments: if comments.is_empty() {
                None
            } else {
                Some(comments)
            },
        })
    }

    /// Apply the first transition whose name or target status mentions review.
    pub fn set_ticket_to_review(&self, issue_key: &str) -> Result<String> {
        let url = format!("{}/issue/{}/transitions", self.v2_endpoint, issue_key);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .send()
            .map_err(|e| PairError::Jira(format!("Could not list transitions for {}: {}", issue_key, e)))?;

        if !response.status().is_success() {
            return Err(PairError::Jira(format!(
                "Listing transitions for {} raised error: {}",
                issue_key,
                response.status().as_u16()
            ))
            .into());
        }

        let list: TransitionList = response
            .json()
            .context("Failed to parse JIRA transitions")?;

        let transition = list
            .transitions
            .into_iter()
            .find(|t| {
                t.name.to_lowercase().contains("review")
                    || t
                        .to
                        .as_ref()
                        .is_some_and(|to| to.name.to_lowercase().contains("review"))
            })
            .ok_or_else(|| {
                PairError::Jira(format!("No review transition available for {}", issue_key))
            })?;

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&serde_json::json!({ "transition": { "id": transition.id } }))
            .send()
            .map_err(|e| PairError::Jira(format!("Could not transition {}: {}", issue_key, e)))?;

        if !response.status().is_success() {
            return Err(PairError::Jira(format!(
                "Transition of {} raised error: {}",
                issue_key,
                response.status().as_u16()
            ))
            .into());
        }

        Ok(transition.name)
    }
}

fn comment_content(comment: &Value) -> IssueComment {
    let updated = comment["updated"].as_str().unwrap_or_default();
    let last_updated = DateTime::parse_from_str(updated, JIRA_TIMESTAMP_FORMAT)
        .map(|ts| ts.format("%Y-%m-%dT%H:%M%:z").to_string())
        .unwrap_or_else(|_| updated.to_string());

    IssueComment {
        author: comment["author"]["displayName"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        last_updated,
        comment: comment["body"].as_str().unwrap_or_default().to_string(),
    }
}
