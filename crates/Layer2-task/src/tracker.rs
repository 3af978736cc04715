//! Task Step Tracker
//!
//! 요청을 단계별 플랜으로 나누고 진행 상황을 추적합니다.
//! 모든 변경 호출은 반환 전에 플랜 전체와 활성 포인터를 저장합니다.
//! 저장 실패는 로그만 남기고 메모리 상태를 되돌리지 않습니다.

use crate::error::{Result, TaskError};
use crate::extractor::CommandExtractor;
use crate::plan::{PlanCommand, Step, TaskPlan};
use crate::state::Status;
use crate::store::PlanStore;
use pocket_foundation::{EventKind, ObservedEvent, Observer};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 렌더링에 포함할 단계 출력 최대 길이
const RENDER_OUTPUT_LIMIT: usize = 500;

/// 현재 실행할 명령 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCursor {
    pub step_index: usize,
    pub command_index: usize,
    pub command: String,
}

/// 진행 상황 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanProgress {
    /// 플랜이 없으면 `None`
    pub status: Option<Status>,
    pub percent: u8,
    pub current: Option<String>,
    pub total: usize,
    pub completed: usize,
    pub error_count: u32,
}

impl PlanProgress {
    fn none() -> Self {
        Self {
            status: None,
            percent: 0,
            current: None,
            total: 0,
            completed: 0,
            error_count: 0,
        }
    }
}

/// 단계 추적기 (단일 writer)
pub struct TaskTracker {
    store: Arc<dyn PlanStore>,
    extractor: Arc<dyn CommandExtractor>,
    observer: Arc<dyn Observer>,
    plan: Option<TaskPlan>,
}

impl TaskTracker {
    pub fn new(
        store: Arc<dyn PlanStore>,
        extractor: Arc<dyn CommandExtractor>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            store,
            extractor,
            observer,
            plan: None,
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// 플랜 생성 후 id 반환
    ///
    /// 단계가 없으면 완료 상태(100%)의 빈 플랜이 만들어지며 활성 포인터는 설정하지 않습니다.
    pub fn create_plan(&mut self, request: &str, step_descriptions: &[String]) -> String {
        let steps = step_descriptions
            .iter()
            .map(|description| self.build_step(description))
            .collect();
        let plan = TaskPlan::new(request, steps);
        let id = plan.id.clone();

        info!("Created plan {} with {} steps", id, plan.steps.len());
        self.observer.record(
            ObservedEvent::new("tracker", EventKind::Started, "create_plan")
                .field("plan_id", &id)
                .field("steps", plan.steps.len()),
        );

        self.plan = Some(plan);
        self.persist();
        id
    }

    fn build_step(&self, description: &str) -> Step {
        let commands = self
            .extractor
            .extract(description)
            .into_iter()
            .map(PlanCommand::new)
            .collect();
        Step::new(description, commands)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn plan(&self) -> Option<&TaskPlan> {
        self.plan.as_ref()
    }

    /// 진행 중인 플랜이 있는지
    pub fn has_active_plan(&self) -> bool {
        self.plan.as_ref().map(|p| p.is_active()).unwrap_or(false)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.plan.as_ref().and_then(|p| p.current_step())
    }

    /// 현재 단계에서 아직 실행하지 않은 첫 명령
    pub fn current_command(&self) -> Option<CommandCursor> {
        let plan = self.plan.as_ref()?;
        let step = plan.current_step()?;
        step.next_command().map(|(index, command)| CommandCursor {
            step_index: plan.current_index,
            command_index: index,
            command: command.command.clone(),
        })
    }

    /// 현재 단계의 미실행 명령 전부
    pub fn pending_commands(&self) -> Vec<CommandCursor> {
        let Some(plan) = self.plan.as_ref() else {
            return Vec::new();
        };
        let Some(step) = plan.current_step() else {
            return Vec::new();
        };
        step.commands
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.executed)
            .map(|(index, c)| CommandCursor {
                step_index: plan.current_index,
                command_index: index,
                command: c.command.clone(),
            })
            .collect()
    }

    pub fn progress(&self) -> PlanProgress {
        let Some(plan) = self.plan.as_ref() else {
            return PlanProgress::none();
        };
        PlanProgress {
            status: Some(plan.status),
            percent: plan.percent,
            current: plan.current_step().map(|s| s.description.clone()),
            total: plan.steps.len(),
            completed: plan.completed_steps(),
            error_count: plan.error_count,
        }
    }

    /// 체크리스트 형태 텍스트
    pub fn render(&self) -> String {
        let Some(plan) = self.plan.as_ref() else {
            return "No active plan.".to_string();
        };

        let mut out = String::new();
        let _ = writeln!(out, "# Plan: {}", plan.request);
        let _ = writeln!(out, "Progress: {}% complete ({})", plan.percent, plan.status);
        out.push('\n');

        for (i, step) in plan.steps.iter().enumerate() {
            let _ = writeln!(out, "{}. {} {}", i + 1, step.status.marker(), step.description);
            if let Some(output) = step.output.as_deref().map(str::trim) {
                if !output.is_empty() && output.len() < RENDER_OUTPUT_LIMIT {
                    for line in output.lines() {
                        let _ = writeln!(out, "   > {}", line);
                    }
                }
            }
        }

        if let Some(summary) = &plan.summary {
            let _ = writeln!(out, "\nSummary: {}", summary);
        }
        if let Some(reason) = &plan.abandon_reason {
            let _ = writeln!(out, "\nAbandoned: {}", reason);
        }
        out
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// 단계 상태 갱신
    ///
    /// - 이미 종료된 단계의 갱신은 아무것도 하지 않음
    /// - 시작하지 않은(pending) 단계를 바로 끝내려 하면 `Validation`
    /// - 현재 단계가 completed 가 되면 다음 단계로 진행 (단계 수에서 멈춤)
    /// - error 는 `error_count` 를 올리고 플랜은 진행 중으로 남김
    pub fn update_step_status(
        &mut self,
        index: usize,
        status: Status,
        output: Option<&str>,
    ) -> Result<&TaskPlan> {
        let plan = self.plan.as_mut().ok_or(TaskError::NoActivePlan)?;
        let len = plan.steps.len();
        let step = plan
            .steps
            .get_mut(index)
            .ok_or_else(|| TaskError::index_out_of_range("step", index, len))?;

        if step.status.is_terminal() {
            debug!("Step {} already {}, ignoring update to {}", index, step.status, status);
        } else if !step.status.can_transition_to(status) {
            return Err(TaskError::Validation(format!(
                "step {} cannot move from {} to {}",
                index, step.status, status
            )));
        } else {
            step.status = status;
            if let Some(output) = output {
                step.output = Some(output.to_string());
            }

            match status {
                Status::Completed if index == plan.current_index => {
                    // 먼저 끝난 단계는 건너뜀
                    let mut next = plan.current_index + 1;
                    while plan
                        .steps
                        .get(next)
                        .is_some_and(|s| s.status == Status::Completed)
                    {
                        next += 1;
                    }
                    plan.current_index = next.min(len);
                    if let Some(next) = plan.steps.get_mut(plan.current_index) {
                        if next.status == Status::Pending {
                            next.status = Status::InProgress;
                        }
                    }
                }
                Status::Error => {
                    plan.error_count += 1;
                    warn!("Step {} of plan {} failed", index, plan.id);
                }
                _ => {}
            }

            plan.recompute();
            plan.touch();
            debug!("Step {} -> {} ({}%)", index, status, plan.percent);
        }

        self.persist();
        self.current()
    }

    /// 명령 실행 기록 (`executed` 는 되돌리지 않음)
    pub fn update_command_status(
        &mut self,
        step_index: usize,
        command_index: usize,
        executed: bool,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let plan = self.plan.as_mut().ok_or(TaskError::NoActivePlan)?;
        let steps = plan.steps.len();
        let step = plan
            .steps
            .get_mut(step_index)
            .ok_or_else(|| TaskError::index_out_of_range("step", step_index, steps))?;
        let commands = step.commands.len();
        let command = step
            .commands
            .get_mut(command_index)
            .ok_or_else(|| TaskError::index_out_of_range("command", command_index, commands))?;

        command.executed |= executed;
        if let Some(output) = output {
            command.output = Some(output.to_string());
        }
        if let Some(error) = error {
            command.error = Some(error.to_string());
        }
        plan.touch();

        self.persist();
        Ok(())
    }

    /// 끝에 단계 추가
    ///
    /// 자동 완료된 플랜은 다시 진행 중이 됩니다. 명시적으로 닫힌 플랜은 `PlanClosed`.
    pub fn add_step(&mut self, description: &str) -> Result<&TaskPlan> {
        let step = self.build_step(description);
        let plan = self.plan.as_mut().ok_or(TaskError::NoActivePlan)?;
        if plan.is_closed() {
            return Err(TaskError::PlanClosed(plan.id.clone()));
        }

        plan.steps.push(step);
        if plan.current_index == plan.steps.len() - 1 {
            plan.steps[plan.current_index].status = Status::InProgress;
        }
        plan.status = Status::InProgress;
        plan.recompute();
        plan.touch();
        info!("Added step {} to plan {}", plan.steps.len(), plan.id);

        self.persist();
        self.current()
    }

    /// 요약과 함께 플랜을 완료로 닫음
    pub fn complete_self(&mut self, summary: Option<&str>) -> Result<&TaskPlan> {
        let plan = self.plan.as_mut().ok_or(TaskError::NoActivePlan)?;
        plan.status = Status::Completed;
        plan.percent = 100;
        plan.summary = summary.map(str::to_string);
        plan.closed_at = Some(chrono::Utc::now());
        plan.touch();
        info!("Plan {} completed", plan.id);

        self.observer.record(
            ObservedEvent::new("tracker", EventKind::Completed, "complete_self")
                .field("plan_id", &plan.id),
        );
        self.persist();
        self.current()
    }

    /// 사유와 함께 플랜 포기
    pub fn abandon(&mut self, reason: &str) -> Result<&TaskPlan> {
        let plan = self.plan.as_mut().ok_or(TaskError::NoActivePlan)?;
        plan.status = Status::Error;
        plan.abandon_reason = Some(reason.to_string());
        plan.closed_at = Some(chrono::Utc::now());
        plan.touch();
        warn!("Plan {} abandoned: {}", plan.id, reason);

        self.observer.record(
            ObservedEvent::new("tracker", EventKind::Warning, "abandon")
                .field("plan_id", &plan.id)
                .field("reason", reason),
        );
        self.persist();
        self.current()
    }

    // ========================================================================
    // Load / Resume
    // ========================================================================

    /// 활성 포인터가 가리키는 플랜 복원
    pub fn resume(&mut self) -> Result<Option<&TaskPlan>> {
        let Some(id) = self.store.active()? else {
            return Ok(None);
        };
        let plan = self.store.load(&id)?;
        info!("Resumed plan {} at step {}", plan.id, plan.current_index);
        self.plan = Some(plan);
        Ok(self.plan.as_ref())
    }

    /// id 로 플랜 로드 (진행 중이면 활성으로 지정)
    pub fn load(&mut self, plan_id: &str) -> Result<&TaskPlan> {
        let plan = self.store.load(plan_id)?;
        self.plan = Some(plan);
        self.persist_pointer();
        self.current()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn current(&self) -> Result<&TaskPlan> {
        self.plan.as_ref().ok_or(TaskError::NoActivePlan)
    }

    fn persist(&self) {
        let Some(plan) = self.plan.as_ref() else {
            return;
        };
        if let Err(e) = self.store.save(plan) {
            self.persistence_failed(&plan.id, &e);
        }
        self.persist_pointer();
    }

    fn persist_pointer(&self) {
        let Some(plan) = self.plan.as_ref() else {
            return;
        };
        let pointer = plan.is_active().then_some(plan.id.as_str());
        if let Err(e) = self.store.set_active(pointer) {
            self.persistence_failed(&plan.id, &e);
        }
    }

    fn persistence_failed(&self, plan_id: &str, err: &TaskError) {
        warn!("Failed to persist plan {}: {}", plan_id, err);
        self.observer.record(
            ObservedEvent::new("tracker", EventKind::Failed, "persist")
                .field("plan_id", plan_id)
                .field("error", err),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PatternExtractor;
    use crate::store::JsonPlanStore;
    use pocket_foundation::NullObserver;

    fn tracker(dir: &std::path::Path) -> TaskTracker {
        TaskTracker::new(
            Arc::new(JsonPlanStore::new(dir)),
            Arc::new(PatternExtractor::new()),
            Arc::new(NullObserver),
        )
    }

    fn steps(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_and_current_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["step A", "step B"]));

        let step = tracker.current_step().unwrap();
        assert_eq!(step.description, "step A");
        assert_eq!(step.status, Status::InProgress);
        assert!(tracker.has_active_plan());
    }

    #[test]
    fn test_completion_advances_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a", "b"]));

        let plan = tracker.update_step_status(0, Status::Completed, Some("ok")).unwrap();
        assert_eq!(plan.current_index, 1);
        assert_eq!(plan.percent, 50);
        assert_eq!(plan.steps[1].status, Status::InProgress);

        let plan = tracker.update_step_status(1, Status::Completed, None).unwrap();
        assert_eq!(plan.current_index, 2);
        assert_eq!(plan.percent, 100);
        assert_eq!(plan.status, Status::Completed);
        assert!(tracker.current_step().is_none());
        assert!(!tracker.has_active_plan());
    }

    #[test]
    fn test_completed_step_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a", "b", "c"]));

        tracker.update_step_status(0, Status::Completed, Some("first")).unwrap();
        let before = tracker.plan().unwrap().clone();
        let after = tracker
            .update_step_status(0, Status::Completed, Some("second"))
            .unwrap();
        assert_eq!(after.current_index, before.current_index);
        assert_eq!(after.steps[0].output.as_deref(), Some("first"));

        // 종료된 단계는 error 로도 바뀌지 않음
        let after = tracker.update_step_status(0, Status::Error, None).unwrap();
        assert_eq!(after.steps[0].status, Status::Completed);
        assert_eq!(after.error_count, 0);
    }

    #[test]
    fn test_index_validation_and_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        assert!(matches!(
            tracker.update_step_status(0, Status::Completed, None),
            Err(TaskError::NoActivePlan)
        ));

        tracker.create_plan("req", &steps(&["a"]));
        assert!(matches!(
            tracker.update_step_status(5, Status::Completed, None),
            Err(TaskError::Validation(_))
        ));
        assert!(matches!(
            tracker.update_step_status(0, Status::Pending, None),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn test_out_of_order_completion_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a", "b", "c"]));

        assert!(matches!(
            tracker.update_step_status(1, Status::Completed, None),
            Err(TaskError::Validation(_))
        ));
        assert!(matches!(
            tracker.update_step_status(2, Status::Error, None),
            Err(TaskError::Validation(_))
        ));
        assert_eq!(tracker.plan().unwrap().steps[1].status, Status::Pending);
        assert_eq!(tracker.plan().unwrap().error_count, 0);

        tracker.update_step_status(0, Status::Completed, None).unwrap();
        let plan = tracker.update_step_status(1, Status::Completed, None).unwrap();
        assert_eq!(plan.current_index, 2);
        assert_eq!(plan.steps[2].status, Status::InProgress);
        assert_eq!(plan.percent, 66);
        assert_eq!(tracker.current_step().unwrap().description, "c");
    }

    #[test]
    fn test_advance_skips_steps_finished_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a", "b", "c"]));

        // 현재 단계가 아니어도 시작 후 완료는 가능
        tracker.update_step_status(1, Status::InProgress, None).unwrap();
        tracker.update_step_status(1, Status::Completed, None).unwrap();
        assert_eq!(tracker.plan().unwrap().current_index, 0);

        let plan = tracker.update_step_status(0, Status::Completed, None).unwrap();
        assert_eq!(plan.current_index, 2);
        assert_eq!(plan.steps[2].status, Status::InProgress);
    }

    #[test]
    fn test_error_counts_without_advancing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a", "b"]));

        let plan = tracker.update_step_status(0, Status::Error, Some("boom")).unwrap();
        assert_eq!(plan.error_count, 1);
        assert_eq!(plan.current_index, 0);
        assert_eq!(plan.status, Status::InProgress);
        assert_eq!(tracker.progress().error_count, 1);
    }

    #[test]
    fn test_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        let id = tracker.create_plan("nothing to do", &[]);

        let progress = tracker.progress();
        assert_eq!(progress.status, Some(Status::Completed));
        assert_eq!(progress.percent, 100);
        assert!(!tracker.has_active_plan());

        let store = JsonPlanStore::new(dir.path());
        assert_eq!(store.active().unwrap(), None);
        assert!(store.load(&id).is_ok());
    }

    #[test]
    fn test_commands_extracted_and_marked() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan(
            "setup",
            &steps(&["Create dirs\n$ mkdir -p out\n$ mkdir -p out", "Explain"]),
        );

        let step = tracker.current_step().unwrap();
        assert_eq!(step.commands.len(), 1);

        let cursor = tracker.current_command().unwrap();
        assert_eq!(cursor.command, "mkdir -p out");
        tracker
            .update_command_status(cursor.step_index, cursor.command_index, true, Some(""), None)
            .unwrap();
        assert!(tracker.current_command().is_none());

        // executed 는 되돌아가지 않음
        tracker.update_command_status(0, 0, false, None, None).unwrap();
        assert!(tracker.plan().unwrap().steps[0].commands[0].executed);

        assert!(matches!(
            tracker.update_command_status(0, 9, true, None, None),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn test_add_step_reopens_auto_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a"]));
        tracker.update_step_status(0, Status::Completed, None).unwrap();
        assert!(!tracker.has_active_plan());

        let plan = tracker.add_step("b").unwrap();
        assert_eq!(plan.status, Status::InProgress);
        assert_eq!(plan.current_index, 1);
        assert_eq!(plan.steps[1].status, Status::InProgress);
        assert_eq!(plan.percent, 50);
        assert!(tracker.has_active_plan());
    }

    #[test]
    fn test_closed_plans() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        tracker.create_plan("req", &steps(&["a", "b"]));

        let plan = tracker.complete_self(Some("done early")).unwrap();
        assert_eq!(plan.status, Status::Completed);
        assert_eq!(plan.percent, 100);
        assert!(matches!(tracker.add_step("c"), Err(TaskError::PlanClosed(_))));

        let store = JsonPlanStore::new(dir.path());
        assert_eq!(store.active().unwrap(), None);

        tracker.create_plan("other", &steps(&["x"]));
        let plan = tracker.abandon("user changed mind").unwrap();
        assert_eq!(plan.status, Status::Error);
        assert_eq!(plan.abandon_reason.as_deref(), Some("user changed mind"));
        assert!(tracker.render().contains("Abandoned: user changed mind"));
    }

    #[test]
    fn test_resume_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mut tracker = tracker(dir.path());
            let id = tracker.create_plan("req", &steps(&["a", "b"]));
            tracker.update_step_status(0, Status::Completed, None).unwrap();
            id
        };

        let mut tracker = tracker(dir.path());
        let plan = tracker.resume().unwrap().unwrap();
        assert_eq!(plan.id, id);
        assert_eq!(plan.current_index, 1);
        assert_eq!(tracker.current_step().unwrap().description, "b");

        let mut fresh = self::tracker(tempfile::tempdir().unwrap().path());
        assert!(fresh.resume().unwrap().is_none());
    }

    #[test]
    fn test_render_checklist() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        assert_eq!(tracker.render(), "No active plan.");

        tracker.create_plan("ship it", &steps(&["build", "test", "deploy"]));
        tracker.update_step_status(0, Status::Completed, Some("built")).unwrap();
        tracker.update_step_status(1, Status::Error, None).unwrap();

        let text = tracker.render();
        assert!(text.contains("# Plan: ship it"));
        assert!(text.contains("1. [x] build"));
        assert!(text.contains("   > built"));
        assert!(text.contains("2. [!] test"));
        assert!(text.contains("3. [ ] deploy"));
    }
}
