//! # pocket-task
//!
//! 요청을 단계별 플랜으로 나누고 진행 상황을 추적합니다.
//!
//! - `TaskTracker`: 단계 상태 머신 (pending → in_progress → completed | error)
//! - `CommandExtractor`: 단계 설명에서 실행할 명령 추출
//! - `PlanStore`: 플랜 영속화 (`<plan_id>.json` + `active_plan.json`)

pub mod error;
pub mod extractor;
pub mod plan;
pub mod state;
pub mod store;
pub mod tracker;

pub use error::{Result, TaskError};
pub use extractor::{CommandExtractor, PatternExtractor, KNOWN_TOOLS};
pub use plan::{PlanCommand, Step, TaskPlan};
pub use state::Status;
pub use store::{JsonPlanStore, PlanStore, ACTIVE_PLAN_FILE};
pub use tracker::{CommandCursor, PlanProgress, TaskTracker};
