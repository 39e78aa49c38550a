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

pub const DEFAULT_CONFIG_FILE: &str = "pairline.toml";

pub const DEFAULT_LOG_FILE: &str = ".pairline.history.md";

pub const DEFAULT_IGNORE_FILE: &str = ".pairlineignore";

pub const DEFAULT_TOOLS: &str = "claude,codex,gemini";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const HTTP_TIMEOUT_SECS: u64 = 600;

/// Appended to the git user name on commits this tool makes.
pub const ATTRIBUTION_SUFFIX: &str = "(pairline)";

pub const COMMIT_MESSAGE_PREFIX: &str = "pairline: ";

/// Follow-up turns a single message may trigger (failed edits, added files).
pub const MAX_REFLECTIONS: usize = 3;

pub const PLAN_FILE_SUFFIX: &str = "_implementation_plan.md";

pub const DEFAULT_BRANCH_CANDIDATES: [&str; 2] = ["main", "master"];

pub const CODE_EXTENSIONS: [&str; 24] = [
    ".py", ".js", ".jsx", ".ts", ".tsx", ".java", ".c", ".cpp", ".h", ".hpp", ".cs", ".go", ".rb",
    ".php", ".swift", ".kt", ".rs", ".scala", ".sh", ".html", ".css", ".scss", ".sass", ".less",
];

/// Human name of the language behind a file extension (with the dot).
pub fn language_for_extension(extension: &str) -> &'static str {
    match extension {
        ".py" => "Python",
        ".js" => "JavaScript",
        ".jsx" => "JavaScript React",
        ".ts" => "TypeScript",
        ".tsx" => "TypeScript React",
        ".java" => "Java",
        ".c" => "C",
        ".cpp" => "C++",
        ".h" => "C/C++ Header",
        ".hpp" => "C++ Header",
        ".cs" => "C#",
        ".go" => "Go",
        ".rb" => "Ruby",
        ".php" => "PHP",
        ".swift" => "Swift",
        ".kt" => "Kotlin",
        ".rs" => "Rust",
        ".scala" => "Scala",
        ".sh" => "Shell",
        ".html" => "HTML",
        ".css" => "CSS",
        ".scss" => "SCSS",
        ".sass" => "Sass",
        ".less" => "Less",
        _ => "code",
    }
}

pub const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp"];
