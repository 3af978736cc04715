//! Error types for pocket-shell
//!
//! ShellError는 PTY/프로세스 관련 세부 에러를 관리합니다.
//! pocket_foundation::Error와의 변환을 지원합니다.

use pocket_foundation::Error as FoundationError;
use std::io;
use thiserror::Error;

/// Result type for shell operations
pub type Result<T> = std::result::Result<T, ShellError>;

/// Errors that can occur during shell/process operations
#[derive(Error, Debug)]
pub enum ShellError {
    /// PTY 생성, 프로세스 spawn, 프롬프트 협상 실패
    #[error("Failed to start {target}: {reason}")]
    Startup { target: String, reason: String },

    /// Pattern wait timed out
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Process is no longer running
    #[error("Process {0} is not running")]
    ProcessDead(String),

    /// Unknown process id
    #[error("No process with id {0}")]
    NotFound(String),

    /// Invalid expect pattern
    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Command text could not be parsed
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Rejected by the command policy
    #[error("Command blocked by policy: {0}")]
    Blocked(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    pub fn startup(target: impl Into<String>, reason: impl ToString) -> Self {
        ShellError::Startup {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// 프로세스가 더 이상 쓸 수 없는 상태인지
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Startup { .. } | Self::ProcessDead(_))
    }
}

// ============================================================================
// pocket_foundation::Error 변환
// ============================================================================

impl From<ShellError> for FoundationError {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::Startup { target, reason } => {
                FoundationError::Startup(format!("{}: {}", target, reason))
            }
            ShellError::Timeout(ms) => FoundationError::Timeout(format!("{} ms", ms)),
            ShellError::ProcessDead(id) => FoundationError::ProcessDead(id),
            ShellError::NotFound(id) => FoundationError::NotFound(format!("process {}", id)),
            ShellError::Pattern { pattern, reason } => {
                FoundationError::Validation(format!("pattern '{}': {}", pattern, reason))
            }
            ShellError::InvalidCommand(msg) => FoundationError::Validation(msg),
            ShellError::Blocked(cmd) => FoundationError::Blocked(cmd),
            ShellError::Io(e) => FoundationError::Io(e),
        }
    }
}
