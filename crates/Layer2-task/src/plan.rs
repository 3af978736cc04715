//! Plan / Step / Command 데이터 모델

use crate::state::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 단계 설명에서 뽑아낸 명령 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCommand {
    pub command: String,
    /// false → true 한 방향
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            executed: false,
            output: None,
            error: None,
        }
    }
}

/// 플랜의 한 단계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub description: String,
    pub status: Status,
    #[serde(default)]
    pub commands: Vec<PlanCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Step {
    pub fn new(description: impl Into<String>, commands: Vec<PlanCommand>) -> Self {
        Self {
            description: description.into(),
            status: Status::Pending,
            commands,
            output: None,
        }
    }

    /// 아직 실행하지 않은 첫 명령
    pub fn next_command(&self) -> Option<(usize, &PlanCommand)> {
        self.commands.iter().enumerate().find(|(_, c)| !c.executed)
    }
}

/// 요청 하나를 단계로 나눈 플랜
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub id: String,
    pub request: String,
    pub steps: Vec<Step>,
    /// 현재 단계 (모두 끝나면 `steps.len()`)
    pub current_index: usize,
    pub status: Status,
    pub percent: u8,
    #[serde(default)]
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandon_reason: Option<String>,
    /// completeSelf / abandon 으로 닫힌 시각
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl TaskPlan {
    pub fn new(request: impl Into<String>, steps: Vec<Step>) -> Self {
        let now = Utc::now();
        let id = format!(
            "plan_{}_{}",
            now.format("%Y%m%d%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..6]
        );
        let mut plan = Self {
            id,
            request: request.into(),
            steps,
            current_index: 0,
            status: Status::InProgress,
            percent: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
            summary: None,
            abandon_reason: None,
            closed_at: None,
        };
        if let Some(first) = plan.steps.first_mut() {
            first.status = Status::InProgress;
        }
        plan.recompute();
        plan
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_index)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == Status::Completed)
            .count()
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::InProgress
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// 완료율 재계산, 모든 단계가 완료면 플랜도 완료
    pub(crate) fn recompute(&mut self) {
        let total = self.steps.len();
        let completed = self.completed_steps();
        self.percent = if total == 0 {
            100
        } else {
            (completed * 100 / total) as u8
        };
        if completed == total && !self.is_closed() {
            self.status = Status::Completed;
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_plan_starts_first_step() {
        let plan = TaskPlan::new(
            "build",
            vec![Step::new("a", vec![]), Step::new("b", vec![])],
        );
        assert!(plan.id.starts_with("plan_"));
        assert_eq!(plan.status, Status::InProgress);
        assert_eq!(plan.steps[0].status, Status::InProgress);
        assert_eq!(plan.steps[1].status, Status::Pending);
        assert_eq!(plan.percent, 0);
    }

    #[test]
    fn test_empty_plan_is_complete() {
        let plan = TaskPlan::new("nothing", vec![]);
        assert_eq!(plan.status, Status::Completed);
        assert_eq!(plan.percent, 100);
        assert!(plan.current_step().is_none());
    }

    #[test]
    fn test_camel_case_json() {
        let plan = TaskPlan::new("x", vec![Step::new("a", vec![PlanCommand::new("ls")])]);
        let json = serde_json::to_value(&plan).unwrap();
        assert!(json.get("currentIndex").is_some());
        assert!(json.get("errorCount").is_some());
        assert_eq!(json["steps"][0]["commands"][0]["executed"], false);
        assert!(json.get("summary").is_none());
    }
}
