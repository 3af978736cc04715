//! Stage - 3단계 계약
//!
//! 모든 단계는 같은 순서로 실행됩니다.
//!
//! 1. `prepare`: 공유 상태를 읽기만 함 (부수효과 없음)
//! 2. `execute`: 실제 작업, 협력자 호출 가능, 공유 상태 변경 불가
//! 3. `finalize`: 공유 상태를 바꾸는 유일한 단계, 다음 Action 결정
//!
//! `Flow` 는 타입이 지워진 `StageRunner` 로 단계를 다룹니다.

use crate::state::SharedState;
use async_trait::async_trait;
use pocket_foundation::Result;
use std::fmt;

// ============================================================================
// StageId / Action
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Interpret,
    Classify,
    SelectTools,
    RefreshContext,
    ComposeResponse,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Interpret => "interpret",
            StageId::Classify => "classify",
            StageId::SelectTools => "select_tools",
            StageId::RefreshContext => "refresh_context",
            StageId::ComposeResponse => "compose_response",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 단계가 내보내는 라벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Classify,
    Shell,
    Coding,
    Integrated,
    Execute,
    Default,
    Complete,
    /// 어느 단계든 낼 수 있음, 라우팅 없이 흐름 중단
    Error,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Classify => "classify",
            Action::Shell => "shell",
            Action::Coding => "coding",
            Action::Integrated => "integrated",
            Action::Execute => "execute",
            Action::Default => "default",
            Action::Complete => "complete",
            Action::Error => "error",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Stage
// ============================================================================

#[async_trait]
pub trait Stage: Send + Sync {
    /// prepare 결과
    type Prepared: Send + Sync;
    /// execute 결과
    type Output: Send;

    fn id(&self) -> StageId;

    /// `Action::Error` 를 제외하고 이 단계가 낼 수 있는 라벨
    fn emits(&self) -> &'static [Action];

    fn prepare(&self, state: &SharedState) -> Result<Self::Prepared>;

    async fn execute(&self, prepared: &Self::Prepared) -> Result<Self::Output>;

    fn finalize(
        &self,
        state: &mut SharedState,
        prepared: Self::Prepared,
        output: Self::Output,
    ) -> Result<Action>;
}

/// 단계 실패 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Execute,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Prepare => "prepare",
            Phase::Execute => "execute",
            Phase::Finalize => "finalize",
        };
        write!(f, "{}", name)
    }
}

/// 단계 실패 (어느 phase 에서 났는지 포함)
#[derive(Debug)]
pub struct StageFailure {
    pub phase: Phase,
    pub error: pocket_foundation::Error,
}

impl StageFailure {
    fn at(phase: Phase) -> impl FnOnce(pocket_foundation::Error) -> Self {
        move |error| StageFailure { phase, error }
    }
}

/// 타입이 지워진 단계
#[async_trait]
pub trait StageRunner: Send + Sync {
    fn id(&self) -> StageId;
    fn emits(&self) -> &'static [Action];
    async fn run(&self, state: &mut SharedState) -> std::result::Result<Action, StageFailure>;
}

#[async_trait]
impl<S> StageRunner for S
where
    S: Stage,
{
    fn id(&self) -> StageId {
        Stage::id(self)
    }

    fn emits(&self) -> &'static [Action] {
        Stage::emits(self)
    }

    async fn run(&self, state: &mut SharedState) -> std::result::Result<Action, StageFailure> {
        let prepared = self.prepare(state).map_err(StageFailure::at(Phase::Prepare))?;
        let output = self
            .execute(&prepared)
            .await
            .map_err(StageFailure::at(Phase::Execute))?;
        self.finalize(state, prepared, output)
            .map_err(StageFailure::at(Phase::Finalize))
    }
}
