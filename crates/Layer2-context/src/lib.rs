//! # pocket-context
//!
//! 세션 단위의 대화 턴과 셸 상태 스냅샷을 SQLite 에 남깁니다.
//!
//! - `ContextDb`: 스키마와 행 단위 연산 (여러 세션이 공유)
//! - `ContextStore`: 세션 하나에 묶인 고수준 API (append, snapshot, summarize)

pub mod db;
pub mod error;
pub mod store;

pub use db::{ContextDb, SessionRecord, StateSnapshot, CONTEXT_DB_FILE};
pub use error::{ContextError, Result};
pub use store::{ContextStore, DEFAULT_WINDOW_SIZE};
