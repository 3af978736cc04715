//! Intent - 모델 응답에서 실행할 동작 추출
//!
//! 응답 텍스트 안의 펜스 블록만 동작으로 취급합니다.
//!
//! | 블록 언어       | 결과                              |
//! |-----------------|-----------------------------------|
//! | `action`        | JSON 객체 또는 배열 (Intent)       |
//! | `bash` / `sh`   | 줄마다 ExecuteCommand              |
//! | `plan`          | 단계 목록 (`1. ...` / `- ...`)     |
//!
//! action / plan 블록은 사용자에게 보여줄 본문(prose)에서 제거됩니다.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

// ============================================================================
// Intent
// ============================================================================

/// 구조화된 실행 의도
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    ExecuteCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    StartProcess {
        command: String,
    },
    SendToProcess {
        id: String,
        input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<String>,
    },
    TerminateProcess {
        id: String,
    },
}

/// 분류용 의도 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Command,
    Process,
    File,
}

impl Intent {
    pub fn command(command: impl Into<String>) -> Self {
        Intent::ExecuteCommand {
            command: command.into(),
            timeout_secs: None,
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::ExecuteCommand { .. } => IntentKind::Command,
            Intent::StartProcess { .. }
            | Intent::SendToProcess { .. }
            | Intent::TerminateProcess { .. } => IntentKind::Process,
            Intent::ReadFile { .. } | Intent::WriteFile { .. } => IntentKind::File,
        }
    }

    /// 응답에 쓸 한 줄 설명
    pub fn describe(&self) -> String {
        match self {
            Intent::ExecuteCommand { command, .. } => format!("$ {}", command),
            Intent::ReadFile { path } => format!("read {}", path),
            Intent::WriteFile { path, content } => {
                format!("write {} ({} bytes)", path, content.len())
            }
            Intent::StartProcess { command } => format!("start `{}`", command),
            Intent::SendToProcess { id, input, .. } => format!("send to {}: {}", id, input),
            Intent::TerminateProcess { id } => format!("terminate {}", id),
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

/// 파싱 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    /// action / plan 블록을 뺀 본문
    pub prose: String,
    pub intents: Vec<Intent>,
    /// 제안된 플랜 단계
    pub steps: Vec<String>,
    /// 해석하지 못한 블록
    pub warnings: Vec<String>,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```([A-Za-z]*)[ \t]*\r?\n(.*?)```").expect("built-in fence pattern")
    })
}

fn step_marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+").expect("built-in step marker pattern")
    })
}

/// 모델 응답 파서
#[derive(Debug, Clone, Default)]
pub struct IntentParser;

impl IntentParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, reply: &str) -> ParsedReply {
        let mut parsed = ParsedReply::default();
        let mut prose = String::new();
        let mut last_end = 0;

        for caps in fence_regex().captures_iter(reply) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let lang = caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();

            let keep_in_prose = match lang.as_str() {
                "action" => {
                    self.parse_action_block(body.as_str(), &mut parsed);
                    false
                }
                "plan" => {
                    parsed.steps.extend(parse_steps(body.as_str()));
                    false
                }
                "bash" | "sh" | "shell" => {
                    parsed
                        .intents
                        .extend(shell_lines(body.as_str()).into_iter().map(Intent::command));
                    true
                }
                _ => true,
            };

            prose.push_str(&reply[last_end..whole.start()]);
            if keep_in_prose {
                prose.push_str(whole.as_str());
            }
            last_end = whole.end();
        }
        prose.push_str(&reply[last_end..]);

        parsed.prose = collapse_blank_lines(&prose);
        parsed
    }

    fn parse_action_block(&self, body: &str, parsed: &mut ParsedReply) {
        let value: serde_json::Value = match serde_json::from_str(body.trim()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed action block: {}", e);
                parsed.warnings.push(format!("malformed action block: {}", e));
                return;
            }
        };

        let items = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };

        for item in items {
            match serde_json::from_value::<Intent>(item) {
                Ok(intent) => parsed.intents.push(intent),
                Err(e) => {
                    warn!("Ignoring unknown action: {}", e);
                    parsed.warnings.push(format!("unknown action: {}", e));
                }
            }
        }
    }
}

/// 한 줄에 명령 하나, `\` 로 끝나면 다음 줄과 이어붙임
fn shell_lines(body: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut pending = String::new();

    for line in body.lines() {
        let line = line.trim();
        let line = line.strip_prefix("$ ").unwrap_or(line);
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head.trim_end());
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        commands.push(std::mem::take(&mut pending).trim().to_string());
    }
    if !pending.trim().is_empty() {
        commands.push(pending.trim().to_string());
    }
    commands
}

fn parse_steps(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| step_marker_regex().replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank = false;
    for line in text.lines() {
        let is_blank = line.trim().is_empty();
        if is_blank && blank {
            continue;
        }
        blank = is_blank;
        out.push(line);
    }
    out.join("\n").trim().to_string()
}
