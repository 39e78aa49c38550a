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

//! Role-tagged chat messages and the per-session conversation history.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation state: finished exchanges plus the one in progress.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    done: Vec<Message>,
    cur: Vec<Message>,
}

impl ChatHistory {
    pub fn push(&mut self, message: Message) {
        self.cur.push(message);
    }

    /// Close the current exchange, keeping it as context for later turns.
    pub fn move_back_cur_messages(&mut self) {
        self.done.append(&mut self.cur);
    }

    pub fn clear(&mut self) {
        self.done.clear();
        self.cur.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty() && self.cur.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &Message> {
        self.done.iter().chain(self.cur.iter())
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.all().filter(|m| m.role == Role::Assistant).last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_order_across_exchanges() {
        let mut history = ChatHistory::default();
        history.push(Message::user("one"));
        history.push(Message::assistant("two"));
        history.move_back_cur_messages();
        history.push(Message::user("three"));

        let contents: Vec<&str> = history.all().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(history.last_assistant().unwrap().content, "two");
    }

    #[test]
    fn test_clear_empties_both_lists() {
        let mut history = ChatHistory::default();
        history.push(Message::user("one"));
        history.move_back_cur_messages();
        history.push(Message::user("two"));
        history.clear();
        assert!(history.is_empty());
        assert!(history.last_assistant().is_none());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::system("hi")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"hi"}"#);
    }
}
