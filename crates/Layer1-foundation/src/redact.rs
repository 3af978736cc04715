//! Environment redaction
//!
//! 셸 세션의 환경변수는 컨텍스트 DB에 스냅샷으로 남습니다.
//! 저장 전에 비밀값으로 보이는 변수를 가립니다.
//!
//! - 차단 패턴 (`AWS_*`, `*_TOKEN`)에 걸리면 값이 `***` 로 바뀜
//! - 허용 패턴이 차단 패턴보다 우선
//! - 출력 텍스트에 섞인 비밀값도 지울 수 있음

use crate::config::SecuritySettings;
use std::collections::HashMap;

/// 환경변수 마스킹 규칙
#[derive(Debug, Clone)]
pub struct EnvRedactor {
    /// 차단 패턴 (예: "AWS_*", "*_TOKEN")
    pub blocked_patterns: Vec<String>,

    /// 허용 패턴 (차단보다 우선)
    pub allowed_patterns: Vec<String>,

    /// 마스킹 문자열
    pub mask: String,
}

impl Default for EnvRedactor {
    fn default() -> Self {
        let blocked = [
            // Cloud credentials
            "AWS_*",
            "AZURE_*",
            "GCP_*",
            "GOOGLE_*",
            // Generic secrets
            "*_SECRET",
            "*_SECRET_*",
            "*_TOKEN",
            "*_TOKEN_*",
            "*_KEY",
            "*_APIKEY",
            "*_PASSWORD",
            "*_PASS",
            "*_AUTH",
            "*_PRIVATE_*",
            "*_CREDENTIALS",
            // Database
            "DATABASE_URL",
            "MONGODB_URI",
            "REDIS_URL",
            // SSH/GPG
            "SSH_*",
            "GPG_*",
        ];
        let allowed = [
            "PATH", "HOME", "USER", "SHELL", "TERM", "LANG", "LC_*", "TZ", "PWD", "OLDPWD",
            "EDITOR", "VISUAL", "RUST_LOG", "CARGO_*",
        ];

        Self {
            blocked_patterns: blocked.iter().map(|s| s.to_string()).collect(),
            allowed_patterns: allowed.iter().map(|s| s.to_string()).collect(),
            mask: "***".to_string(),
        }
    }
}

impl EnvRedactor {
    /// 설정의 추가 패턴을 기본 목록에 더함
    pub fn from_settings(settings: &SecuritySettings) -> Self {
        let mut redactor = Self::default();
        redactor
            .blocked_patterns
            .extend(settings.blocked_env.iter().cloned());
        redactor
            .allowed_patterns
            .extend(settings.allowed_env.iter().cloned());
        redactor
    }

    /// 민감 변수 여부
    pub fn is_sensitive(&self, name: &str) -> bool {
        if self
            .allowed_patterns
            .iter()
            .any(|p| pattern_matches(p, name))
        {
            return false;
        }
        self.blocked_patterns
            .iter()
            .any(|p| pattern_matches(p, name))
    }

    /// 값 마스킹 (키는 유지)
    pub fn redact(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .map(|(k, v)| {
                if self.is_sensitive(k) {
                    (k.clone(), self.mask.clone())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }

    /// 민감 변수 제거
    pub fn filter(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| !self.is_sensitive(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 출력 텍스트에 섞인 민감 값 마스킹
    pub fn mask_output(&self, output: &str, env: &HashMap<String, String>) -> String {
        let mut result = output.to_string();
        for (name, value) in env {
            // 너무 짧은 값은 오탐이 많음
            if value.len() > 3 && self.is_sensitive(name) {
                result = result.replace(value.as_str(), &self.mask);
            }
        }
        result
    }
}

/// 단순 glob 매칭 (`*` 접두/접미/양쪽)
pub fn pattern_matches(pattern: &str, s: &str) -> bool {
    if pattern.len() > 1 && pattern.starts_with('*') && pattern.ends_with('*') {
        s.contains(&pattern[1..pattern.len() - 1])
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        s.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        s.starts_with(prefix)
    } else {
        s == pattern
    }
}
