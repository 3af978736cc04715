//! Pocket Config - 통합 설정
//!
//! 글로벌(`~/.config/pocketshell/config.json`) 위에 프로젝트
//! (`.pocketshell/config.json`) 설정을 덮어써서 사용합니다.
//! 파일에는 바꾸고 싶은 키만 적으면 되고 나머지는 기본값을 씁니다.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// 설정 파일명
pub const POCKET_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Pocket Config (통합)
// ============================================================================

/// PocketShell 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PocketConfig {
    /// 메인 셸 세션
    pub shell: ShellSettings,

    /// 대화형 보조 프로세스
    pub processes: ProcessSettings,

    /// 저장 위치
    pub storage: StorageSettings,

    /// 대화 컨텍스트
    pub context: ContextSettings,

    /// 에이전트 흐름
    pub agent: AgentSettings,

    /// 보안 (환경변수 마스킹, 위험 명령어)
    pub security: SecuritySettings,
}

impl PocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            layers.push(global);
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            layers.push(project);
        }

        Self::load_layers(&layers)
    }

    /// 주어진 저장소들을 순서대로 병합 (뒤쪽이 우선)
    pub fn load_layers(stores: &[JsonStore]) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for store in stores {
            if let Some(overlay) = store.load_optional::<Value>(POCKET_CONFIG_FILE)? {
                merge_value(&mut merged, overlay);
            }
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(POCKET_CONFIG_FILE, self)
    }

    /// 데이터 디렉토리 (미지정 시 ~/.pocketshell)
    pub fn data_dir(&self) -> PathBuf {
        match &self.storage.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pocketshell"),
        }
    }
}

/// JSON 객체 재귀 병합 (overlay가 우선)
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// 메인 셸 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellSettings {
    /// 실행할 셸 (bash, zsh, sh 또는 절대 경로)
    pub program: String,
    /// 명령 기본 타임아웃
    pub timeout_secs: u64,
    /// 프롬프트 협상 타임아웃
    pub init_timeout_secs: u64,
    pub rows: u16,
    pub cols: u16,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            timeout_secs: 30,
            init_timeout_secs: 10,
            rows: 24,
            cols: 200,
        }
    }
}

impl ShellSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

/// 보조 프로세스 타이밍
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSettings {
    /// 시작 직후 출력 수집 시간
    pub settle_ms: u64,
    /// 종료 단계 사이 유예 시간
    pub grace_ms: u64,
    /// 패턴 없는 send / peek 의 읽기 시간
    pub drain_ms: u64,
    /// expect 기본 타임아웃
    pub expect_timeout_secs: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            grace_ms: 500,
            drain_ms: 1000,
            expect_timeout_secs: 30,
        }
    }
}

impl ProcessSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn expect_timeout(&self) -> Duration {
        Duration::from_secs(self.expect_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// 대화 컨텍스트 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// 요약에 사용할 최근 턴 수
    pub window_size: usize,
    /// 응답 생성 시 불러올 최근 턴 수
    pub recent_turns: usize,
    /// N 턴마다 자동 요약 (0 = 끔)
    pub summarize_every: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            recent_turns: 50,
            summarize_every: 0,
        }
    }
}

/// 에이전트 흐름 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// 권한 거부 시 최대 시도 횟수 (첫 시도 포함)
    pub max_permission_attempts: u32,
    /// `sudo -n` 재시도 허용
    pub allow_escalation: bool,
    /// ReadFile 결과 최대 바이트
    pub max_read_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_permission_attempts: 2,
            allow_escalation: false,
            max_read_bytes: 64 * 1024,
        }
    }
}

/// 보안 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// 저장 전 환경변수 마스킹
    pub redact_env: bool,
    /// 추가 차단 패턴 (기본 목록에 더해짐)
    pub blocked_env: Vec<String>,
    /// 추가 허용 패턴 (차단보다 우선)
    pub allowed_env: Vec<String>,
    /// 추가 위험 명령어 정규식
    pub dangerous_patterns: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            redact_env: true,
            blocked_env: Vec::new(),
            allowed_env: Vec::new(),
            dangerous_patterns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_default() {
        let config = PocketConfig::new();
        assert_eq!(config.shell.program, "bash");
        assert_eq!(config.shell.timeout(), Duration::from_secs(30));
        assert_eq!(config.processes.grace(), Duration::from_millis(500));
        assert_eq!(config.context.window_size, 20);
        assert!(config.security.redact_env);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PocketConfig =
            serde_json::from_value(json!({ "shell": { "program": "zsh" } })).unwrap();
        assert_eq!(config.shell.program, "zsh");
        assert_eq!(config.shell.timeout_secs, 30);
        assert_eq!(config.agent.max_permission_attempts, 2);
    }

    #[test]
    fn test_layers_merge() {
        let global = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let global = JsonStore::new(global.path());
        let project = JsonStore::new(project.path());

        global
            .save(
                POCKET_CONFIG_FILE,
                &json!({ "shell": { "program": "zsh", "timeoutSecs": 5 } }),
            )
            .unwrap();
        project
            .save(POCKET_CONFIG_FILE, &json!({ "shell": { "timeoutSecs": 9 } }))
            .unwrap();

        let config = PocketConfig::load_layers(&[global, project]).unwrap();
        assert_eq!(config.shell.program, "zsh");
        assert_eq!(config.shell.timeout_secs, 9);
        assert_eq!(config.shell.rows, 24);
    }
}
