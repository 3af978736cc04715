//! Error types for PocketShell
//!
//! 모든 레이어의 에러를 중앙에서 관리합니다.
//! 각 하위 crate는 자체 에러 타입을 두고 `From` 변환으로 여기에 합류합니다.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// PocketShell 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 프로세스 관련
    // ========================================================================
    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Process is not running: {0}")]
    ProcessDead(String),

    #[error("Command blocked: {0}")]
    Blocked(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ========================================================================
    // 텍스트 생성 관련
    // ========================================================================
    #[error("Request error: {0}")]
    Request(String),

    #[error("Summarization error: {0}")]
    Summarization(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Request(_))
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Validation(_)
                | Error::Blocked(_)
                | Error::ProcessDead(_)
                | Error::Cancelled
        )
    }

    /// 에러 분류 라벨 (응답/로그용)
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Startup(_) => "startup",
            Error::Timeout(_) => "timeout",
            Error::ProcessDead(_) => "process_dead",
            Error::Blocked(_) => "blocked",
            Error::Cancelled => "cancelled",
            Error::Persistence(_) => "persistence",
            Error::Request(_) => "request",
            Error::Summarization(_) => "summarization",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout("execute".into()).is_retryable());
        assert!(Error::Request("503".into()).is_retryable());
        assert!(!Error::Validation("index".into()).is_retryable());
    }

    #[test]
    fn test_kind_and_display() {
        let err = Error::NotFound("proc_1".into());
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "Not found: proc_1");
        assert!(err.is_user_facing());
    }
}
