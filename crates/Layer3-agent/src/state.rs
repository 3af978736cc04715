//! Shared State - 요청 하나가 흐름을 지나며 쌓는 상태
//!
//! 각 단계의 `finalize` 만 이 상태를 바꿉니다.

use crate::intent::Intent;
use crate::stage::{Phase, StageId};
use crate::tools::{IntentOutcome, ToolSet};
use pocket_foundation::Turn;
use pocket_task::PlanProgress;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// 요청 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Shell,
    Coding,
    Integrated,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Shell => "shell",
            RequestKind::Coding => "coding",
            RequestKind::Integrated => "integrated",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 흐름을 멈춘 에러
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    pub stage: StageId,
    pub phase: Phase,
    /// `pocket_foundation::Error::kind()`
    pub kind: &'static str,
    pub message: String,
}

impl FlowError {
    /// 응답에 붙는 라벨
    pub fn label(&self) -> String {
        format!("Error during {}: {}", self.stage, self.message)
    }
}

/// 플랜 단계 명령 실행 기록
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRun {
    pub step_index: usize,
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

/// 요청 단위 공유 상태
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub request: String,
    pub cancel: CancellationToken,

    // Interpret
    pub prior_turns: Vec<Turn>,
    pub reply: String,
    pub prose: String,
    pub intents: Vec<Intent>,
    pub proposed_steps: Vec<String>,
    /// `plan` 블록이 아니라 본문 목록에서 뽑은 단계
    pub steps_inferred: bool,
    pub parse_warnings: Vec<String>,

    // Classify
    pub kind: Option<RequestKind>,

    // SelectTools
    pub tools: Option<ToolSet>,
    pub outcomes: Vec<IntentOutcome>,
    pub step_runs: Vec<StepRun>,
    pub plan_id: Option<String>,
    pub plan_progress: Option<PlanProgress>,
    pub plan_render: Option<String>,

    // RefreshContext
    pub working_dir: String,
    /// 셸 세션의 PATH
    pub search_path: Option<String>,
    pub recent_turns: Vec<Turn>,
    pub summary: Option<String>,
    pub context_warnings: Vec<String>,

    // ComposeResponse
    pub grounding_notes: Vec<String>,
    pub response: Option<String>,

    error: Option<FlowError>,
}

impl SharedState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn error(&self) -> Option<&FlowError> {
        self.error.as_ref()
    }

    /// 처음 한 번만 기록, 이후 호출은 무시하고 false
    pub fn set_error(&mut self, error: FlowError) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(error);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_error(message: &str) -> FlowError {
        FlowError {
            stage: StageId::SelectTools,
            phase: Phase::Execute,
            kind: "startup",
            message: message.to_string(),
        }
    }

    #[test]
    fn test_error_set_once() {
        let mut state = SharedState::new("ls");
        assert!(state.set_error(flow_error("first")));
        assert!(!state.set_error(flow_error("second")));
        assert_eq!(state.error().unwrap().message, "first");
    }

    #[test]
    fn test_error_label() {
        assert_eq!(
            flow_error("shell died").label(),
            "Error during select_tools: shell died"
        );
    }
}
