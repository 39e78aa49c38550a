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
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use crate::chat::Message;
use crate::cli::Backend;
use crate::constants::{DEFAULT_API_BASE, DEFAULT_MODEL, HTTP_TIMEOUT_SECS};
use crate::logger::Io;

/// Anything that can answer a list of chat messages with one reply.
pub trait ChatModel {
    fn name(&self) -> String;

    fn send(&mut self, messages: &[Message], io: &mut Io) -> Result<String>;
}

static REASONING_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<think>.*?</think>|<thinking>.*?</thinking>|<reasoning>.*?</reasoning>")
        .unwrap()
});

/// Strip inline reasoning blocks some models emit ahead of the answer.
pub fn remove_reasoning_content(text: &str) -> String {
    REASONING_BLOCK.replace_all(text, "").trim().to_string()
}

/// Flatten a conversation into one prompt for CLI agents that take plain text.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(&format!("## {}\n\n", message.role.label()));
        prompt.push_str(message.content.trim_end());
        prompt.push_str("\n\n");
    }
    prompt
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions endpoint.
pub struct ChatApi {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl ChatApi {
    pub fn new(api_base: &str, api_key: Option<String>, model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }
}

impl ChatModel for ChatApi {
    fn name(&self) -> String {
        self.model.clone()
    }

    fn send(&mut self, messages: &[Message], _io: &mut Io) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .with_context(|| format!("Failed to reach chat API at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("Chat API returned error {}: {}", status, body);
        }

        let parsed: ChatResponse = response.json().context("Failed to parse chat API response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Chat API response contained no message content"))
    }
}

/// LLM tool kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmToolKind {
    Gemini,
    Codex,
    Claude,
}

/// An agent CLI that takes a prompt and prints its reply
#[derive(Debug, Clone)]
pub struct LlmTool {
    kind: LlmToolKind,
    model: Option<String>,
}

impl LlmTool {
    pub fn from_name(name: &str) -> Result<Self> {
        let kind = match name.to_lowercase().as_str() {
            "gemini" => LlmToolKind::Gemini,
            "codex" => LlmToolKind::Codex,
            "claude" => LlmToolKind::Claude,
            _ => anyhow::bail!("Unsupported LLM tool: {}. Supported: gemini, codex, claude", name),
        };
        Ok(Self { kind, model: None })
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            LlmToolKind::Gemini => "gemini",
            LlmToolKind::Codex => "codex",
            LlmToolKind::Claude => "claude",
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = match self.kind {
            LlmToolKind::Gemini => vec!["--yolo".to_string()],
            LlmToolKind::Codex => vec!["exec".to_string()],
            LlmToolKind::Claude => vec![
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
        };

        if let Some(ref model) = self.model {
            let flag = match self.kind {
                LlmToolKind::Gemini | LlmToolKind::Codex => "-m",
                LlmToolKind::Claude => "--model",
            };
            args.push(flag.to_string());
            args.push(model.clone());
        }

        args
    }

    fn rate_limit_patterns(&self) -> &'static [&'static str] {
        match self.kind {
            LlmToolKind::Gemini => &[
                "rate limit",
                "quota exceeded",
                "429",
                "too many requests",
                "resource exhausted",
            ],
            LlmToolKind::Codex => &[
                "rate limit reached",
                "rate_limit_error",
                "429",
                "too many requests",
            ],
            LlmToolKind::Claude => &[
                "usage limit reached",
                "rate limit reached",
                "rate_limit_error",
                "429",
                "limit will reset",
            ],
        }
    }

    pub fn is_rate_limited(&self, stdout: &str, stderr: &str) -> bool {
        let combined = format!("{}{}", stdout, stderr).to_lowercase();
        self.rate_limit_patterns()
            .iter()
            .any(|pattern| combined.contains(pattern))
    }

    pub fn invoke(&self, prompt: &str) -> Result<(String, String)> {
        let mut cmd = Command::new(self.name());
        cmd.args(self.args());

        // Gemini takes the prompt as a positional argument, the others read stdin
        if self.kind == LlmToolKind::Gemini {
            cmd.arg(prompt);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a terminal SIGINT reaches us, not the agent
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to spawn {} process. Is {} CLI installed?",
                self.name(),
                self.name()
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if self.kind != LlmToolKind::Gemini {
                stdin.write_all(prompt.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() && stdout.trim().is_empty() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.name(),
                output.status,
                stderr.trim()
            );
        }

        Ok((stdout, stderr))
    }
}

/// Per-tool model configuration
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub claude_model: Option<String>,
    pub codex_model: Option<String>,
}

impl ModelConfig {
    pub fn get_model_for_tool(&self, kind: LlmToolKind) -> Option<String> {
        match kind {
            LlmToolKind::Gemini => self.gemini_model.clone(),
            LlmToolKind::Claude => self.claude_model.clone(),
            LlmToolKind::Codex => self.codex_model.clone(),
        }
    }
}

/// Agent CLIs tried in order of preference. A tool that reports a rate limit
/// is benched for a while and the next one answers instead.
pub struct LlmToolChain {
    tools: Vec<LlmTool>,
    active: usize,
    benched_at: HashMap<&'static str, Instant>,
    bench_for: Duration,
}

impl LlmToolChain {
    pub fn with_models(tool_names: &str, model_config: &ModelConfig) -> Result<Self> {
        let mut tools = Vec::new();
        for name in tool_names.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let tool = LlmTool::from_name(name)?;
            let model = model_config.get_model_for_tool(tool.kind);
            tools.push(tool.with_model(model));
        }

        if tools.is_empty() {
            anyhow::bail!("No valid LLM tools specified");
        }

        Ok(Self {
            tools,
            active: 0,
            benched_at: HashMap::new(),
            bench_for: Duration::from_secs(300),
        })
    }

    fn is_benched(&self, tool: &LlmTool) -> bool {
        self.benched_at
            .get(tool.name())
            .is_some_and(|since| since.elapsed() < self.bench_for)
    }

    /// Move back to the most preferred tool whose bench time is over.
    fn restore_preferred(&mut self, io: &mut Io) {
        let preferred = self.tools[..self.active]
            .iter()
            .position(|tool| !self.is_benched(tool));

        if let Some(index) = preferred {
            io.output(&format!(
                "Rate limit timeout expired for {}. Resetting to preferred tool.",
                self.tools[index].name()
            ));
            self.active = index;
        }
    }

    /// Step to the next tool, or fail with `exhausted` when none is left.
    fn fall_back(&mut self, io: &mut Io, exhausted: anyhow::Error) -> Result<()> {
        if self.active + 1 >= self.tools.len() {
            return Err(exhausted);
        }
        self.active += 1;
        io.output(&format!(
            "Switching to fallback tool: {}",
            self.tools[self.active].name()
        ));
        Ok(())
    }

    pub fn invoke_with_fallback(&mut self, prompt: &str, io: &mut Io) -> Result<(String, String)> {
        self.restore_preferred(io);

        loop {
            let tool = self.tools[self.active].clone();
            io.output(&format!("Using LLM tool: {}", tool.name()));

            match tool.invoke(prompt) {
                Ok((stdout, stderr)) if !tool.is_rate_limited(&stdout, &stderr) => {
                    return Ok((stdout, stderr));
                }
                Ok(_) => {
                    self.benched_at.insert(tool.name(), Instant::now());
                    io.warning(&format!(
                        "Rate limit detected for {}. Temporarily squelching for 5 minutes.",
                        tool.name()
                    ));
                    self.fall_back(io, anyhow!("All LLM tools exhausted due to rate limits"))?;
                }
                Err(e) => {
                    io.error(&format!("Error invoking {}: {}", tool.name(), e));
                    self.fall_back(io, e)?;
                }
            }
        }
    }
}

impl ChatModel for LlmToolChain {
    fn name(&self) -> String {
        self.tools[self.active].name().to_string()
    }

    fn send(&mut self, messages: &[Message], io: &mut Io) -> Result<String> {
        let (stdout, _stderr) = self.invoke_with_fallback(&render_transcript(messages), io)?;
        Ok(stdout)
    }
}

/// Build the model backend selected by the command line and config file.
pub fn create_model(
    backend: Backend,
    tools: &str,
    model_config: &ModelConfig,
) -> Result<Box<dyn ChatModel>> {
    match backend {
        Backend::Api => {
            let api_base = model_config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
            let model = model_config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());
            Ok(Box::new(ChatApi::new(
                &api_base,
                model_config.api_key.clone(),
                &model,
            )?))
        }
        Backend::Tools => Ok(Box::new(LlmToolChain::with_models(tools, model_config)?)),
    }
}
