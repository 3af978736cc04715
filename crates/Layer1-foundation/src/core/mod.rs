//! Core Module - 핵심 인터페이스 및 타입
//!
//! - `types.rs`: 데이터 타입 (Turn, TurnRole, CommandRecord)
//! - `traits.rs`: 외부 협력자 인터페이스 (TextGenerator, EscalationPolicy)

mod traits;
mod types;

pub use traits::{DenyEscalation, EscalationPolicy, StaticEscalation, TextGenerator};
pub use types::{new_session_id, CommandRecord, Turn, TurnRole};
