//! Command extractor - 단계 설명에서 실행할 명령 추출
//!
//! 기본 구현(`PatternExtractor`)이 인식하는 형태:
//! - `$ cmd` 프롬프트 접두 줄
//! - 주석 줄(`#`, `//`) 바로 다음의 명령 줄
//! - 알려진 CLI 도구 이름으로 시작하는 줄
//!
//! 결과는 줄 순서이며 같은 단계 안의 중복은 제거됩니다.

use regex::Regex;

/// 명령 추출기
pub trait CommandExtractor: Send + Sync {
    fn extract(&self, step_text: &str) -> Vec<String>;
}

/// 줄 시작에 오면 명령으로 보는 도구 이름
pub const KNOWN_TOOLS: &[&str] = &[
    "npm", "yarn", "npx", "python", "pip", "docker", "git", "mkdir", "cd", "touch", "cp", "mv",
    "rm", "cat", "echo", "curl", "wget",
];

/// 정규식 기반 추출기
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    prompt_line: Regex,
    comment_line: Regex,
    command_like: Regex,
    tool_line: Regex,
    trailing_comment: Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        let tools = KNOWN_TOOLS.join("|");
        Self {
            prompt_line: compile(r"^\s*\$\s+(.+)$"),
            comment_line: compile(r"^\s*(#|//)"),
            command_like: compile(r"^\s*([a-z][a-zA-Z0-9_\-.]*\s+.+)$"),
            tool_line: compile(&format!(r"^\s*((?:{})\s+.+)$", tools)),
            trailing_comment: compile(r"(^|\s)#.*$"),
        }
    }

    fn clean(&self, raw: &str) -> String {
        let raw = raw.trim();
        let raw = raw.strip_prefix("$ ").unwrap_or(raw);
        self.trailing_comment.replace(raw, "").trim().to_string()
    }

    fn capture(re: &Regex, line: &str) -> Option<String> {
        re.captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExtractor for PatternExtractor {
    fn extract(&self, step_text: &str) -> Vec<String> {
        let lines: Vec<&str> = step_text.lines().collect();
        let mut commands: Vec<String> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            let raw = if let Some(cmd) = Self::capture(&self.prompt_line, line) {
                Some(cmd)
            } else if self.comment_line.is_match(line) {
                // 주석 다음 줄이 명령처럼 보이면 그 줄을 채택
                lines
                    .get(i + 1)
                    .filter(|next| !self.prompt_line.is_match(next))
                    .and_then(|next| Self::capture(&self.command_like, next))
            } else {
                Self::capture(&self.tool_line, line)
            };

            let Some(raw) = raw else { continue };
            let command = self.clean(&raw);
            if !command.is_empty() && !commands.contains(&command) {
                commands.push(command);
            }
        }

        commands
    }
}

/// 내장 고정 패턴 전용
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in extractor pattern")
}
