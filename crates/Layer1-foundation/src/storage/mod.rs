//! Storage module for PocketShell
//!
//! - `json`: JSON - 설정 파일, 플랜 기록 (원자적 저장)
//!
//! 대화 로그(SQLite)는 pocket-context 에서 관리

mod json;

pub use json::{JsonStore, APP_DIR, PROJECT_DIR};
