//! # pocket-agent
//!
//! 요청 하나를 다섯 단계로 처리하는 Flow 와 그 협력자 묶음입니다.
//!
//! ## 흐름
//!
//! ```text
//! Interpret ──classify──▶ Classify ──shell|coding|integrated──▶ SelectTools
//!     ──execute──▶ RefreshContext ──default──▶ ComposeResponse ──complete──▶ 끝
//!
//! 어느 단계든 error → 즉시 중단, "Error during <stage>: ..." 응답
//! ```
//!
//! ## 핵심 컴포넌트
//!
//! - **Stage**: prepare / execute / finalize 3단계 계약
//! - **Flow**: `(StageId, Action) → Route` 라우팅 표 + 정적 검증
//! - **IntentParser**: 모델 응답의 펜스 블록 → 구조화된 Intent
//! - **ToolDispatcher**: Intent → 셸 / 프로세스 / 파일 작업
//! - **GroundingChecker**: 응답에 언급된 경로 확인
//! - **Agent**: 설정에서 조립하는 진입점

pub mod agent;
pub mod context;
pub mod flow;
pub mod grounding;
pub mod intent;
pub mod stage;
pub mod stages;
pub mod state;
pub mod tools;

pub use agent::Agent;
pub use context::{AgentContext, FlowSettings, DEFAULT_SYSTEM_INSTRUCTION};
pub use flow::{Flow, FlowOutcome, Route};
pub use grounding::{GroundingChecker, MissingReference, ReferenceKind};
pub use intent::{Intent, IntentKind, IntentParser, ParsedReply};
pub use stage::{Action, Phase, Stage, StageFailure, StageId, StageRunner};
pub use stages::{classify, ClassifyStage, ComposeStage, InterpretStage, RefreshStage, SelectToolsStage};
pub use state::{FlowError, RequestKind, SharedState, StepRun};
pub use tools::{CommandRun, IntentOutcome, OutcomeStatus, ToolDispatcher, ToolSet};
