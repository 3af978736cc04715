//! Step / plan status state machine

use serde::{Deserialize, Serialize};

/// Step 및 Plan 상태
///
/// 전이는 `Pending → InProgress → {Completed | Error}` 한 방향뿐입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl Status {
    /// 더 이상 전이할 수 없는 상태
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }

    /// `self → next` 가 허용되는지
    ///
    /// `Pending → InProgress`, `InProgress → Completed | Error` 만 허용.
    /// 같은 상태로의 갱신도 허용 (출력만 바뀌는 경우).
    pub fn can_transition_to(&self, next: Status) -> bool {
        *self == next
            || matches!(
                (self, next),
                (Status::Pending, Status::InProgress)
                    | (Status::InProgress, Status::Completed)
                    | (Status::InProgress, Status::Error)
            )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }

    /// 체크리스트 마커
    pub fn marker(&self) -> &'static str {
        match self {
            Status::Pending => "[ ]",
            Status::InProgress => "[→]",
            Status::Completed => "[x]",
            Status::Error => "[!]",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "error" => Ok(Status::Error),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}
