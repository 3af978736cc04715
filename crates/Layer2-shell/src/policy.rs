//! Command policy - 명령어 텍스트 패턴 검사
//!
//! 샌드박스가 아니라 명백히 위험한 명령만 걸러내는 단순 검사입니다.
//! - Forbidden: 항상 차단 (rm -rf /, mkfs, dd if=, > /dev/..., chmod 777)
//! - Privileged: 권한 상승 (sudo, su, passwd), 승인 시에만 실행

use crate::error::{Result, ShellError};
use regex::Regex;
use tracing::warn;

/// 명령어 위험도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRisk {
    Safe,
    Privileged,
    Forbidden,
}

/// 검사 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub risk: CommandRisk,
    pub matched_pattern: Option<String>,
}

impl PolicyVerdict {
    pub fn is_blocked(&self) -> bool {
        self.risk == CommandRisk::Forbidden
    }
}

/// 기본 금지 패턴
const FORBIDDEN: &[&str] = &[
    r"rm\s+-rf\s+/(\s|$|\*)",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+if=",
    r">\s*/dev/(sd|hd|nvme|disk)",
    r"\bchmod\s+(-R\s+)?777\b",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
];

/// 권한 상승 패턴
const PRIVILEGED: &[&str] = &[
    r"(^|[;&|]\s*)sudo\b",
    r"(^|[;&|]\s*)su(\s|$)",
    r"(^|[;&|]\s*)passwd\b",
];

/// 명령어 정책
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    forbidden: Vec<Regex>,
    privileged: Vec<Regex>,
}

impl CommandPolicy {
    /// 기본 패턴 + 추가 금지 패턴
    ///
    /// 잘못된 추가 패턴은 경고 후 무시합니다.
    pub fn new(extra_forbidden: &[String]) -> Self {
        let mut forbidden = compile_all(FORBIDDEN.iter().copied());
        for pattern in extra_forbidden {
            match Regex::new(pattern) {
                Ok(re) => forbidden.push(re),
                Err(e) => warn!("Ignoring invalid dangerous pattern '{}': {}", pattern, e),
            }
        }
        Self {
            forbidden,
            privileged: compile_all(PRIVILEGED.iter().copied()),
        }
    }

    pub fn check(&self, command: &str) -> PolicyVerdict {
        let command = command.trim();

        if let Some(re) = self.forbidden.iter().find(|re| re.is_match(command)) {
            return PolicyVerdict {
                risk: CommandRisk::Forbidden,
                matched_pattern: Some(re.as_str().to_string()),
            };
        }
        if let Some(re) = self.privileged.iter().find(|re| re.is_match(command)) {
            return PolicyVerdict {
                risk: CommandRisk::Privileged,
                matched_pattern: Some(re.as_str().to_string()),
            };
        }

        PolicyVerdict {
            risk: CommandRisk::Safe,
            matched_pattern: None,
        }
    }

    /// 금지 명령이면 `ShellError::Blocked`
    pub fn ensure_allowed(&self, command: &str) -> Result<PolicyVerdict> {
        let verdict = self.check(command);
        if verdict.is_blocked() {
            return Err(ShellError::Blocked(command.trim().to_string()));
        }
        Ok(verdict)
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(&[])
    }
}

fn compile_all<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<Regex> {
    patterns.filter_map(|p| Regex::new(p).ok()).collect()
}
