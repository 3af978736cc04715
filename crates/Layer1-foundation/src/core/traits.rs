//! Core Traits - 외부 협력자 인터페이스
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Layer4-CLI                                                 │
//! │  └── TextGenerator / EscalationPolicy 구현 주입              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layer3-Agent                                               │
//! │  └── Flow (Interpret → … → ComposeResponse)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layer2-Shell / Task / Context                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layer1-Foundation (이 레이어)                              │
//! │  └── Trait 정의 (TextGenerator, EscalationPolicy)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use super::types::Turn;
use crate::Result;
use async_trait::async_trait;

// ============================================================================
// TextGenerator - 언어 모델 호출
// ============================================================================

/// 텍스트 생성 기능
///
/// 모델 호출 자체는 이 crate 바깥에서 구현합니다.
/// 실패는 `Error::Request` 로 돌려줍니다.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prior_turns: &[Turn],
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String>;
}

// ============================================================================
// EscalationPolicy - 권한 거부 재시도
// ============================================================================

/// 권한 거부된 명령을 다시 시도할지 결정
///
/// `attempt` 는 1부터 시작하는 지금까지의 시도 횟수입니다.
#[async_trait]
pub trait EscalationPolicy: Send + Sync {
    async fn allow_escalation(&self, command: &str, attempt: u32) -> bool;
}

/// 항상 거절
pub struct DenyEscalation;

#[async_trait]
impl EscalationPolicy for DenyEscalation {
    async fn allow_escalation(&self, _command: &str, _attempt: u32) -> bool {
        false
    }
}

/// 설정값 그대로
pub struct StaticEscalation(pub bool);

#[async_trait]
impl EscalationPolicy for StaticEscalation {
    async fn allow_escalation(&self, _command: &str, _attempt: u32) -> bool {
        self.0
    }
}
