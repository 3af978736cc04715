//! SelectTools - 도구 선택, 플랜 생성, Intent 실행, 현재 단계 명령 실행

use crate::context::AgentContext;
use crate::intent::Intent;
use crate::stage::{Action, Stage, StageId};
use crate::state::{RequestKind, SharedState, StepRun};
use crate::tools::{IntentOutcome, OutcomeStatus, ToolDispatcher, ToolSet};
use async_trait::async_trait;
use pocket_foundation::{Error, Result};
use pocket_task::{CommandCursor, PlanProgress, Status};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SelectToolsStage {
    ctx: Arc<AgentContext>,
}

impl SelectToolsStage {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }
}

pub struct SelectInput {
    kind: RequestKind,
    request: String,
    intents: Vec<Intent>,
    steps: Vec<String>,
    steps_inferred: bool,
    cancel: CancellationToken,
}

pub struct SelectOutput {
    tools: ToolSet,
    outcomes: Vec<IntentOutcome>,
    step_runs: Vec<StepRun>,
    plan_id: Option<String>,
    progress: Option<PlanProgress>,
    render: Option<String>,
}

impl SelectToolsStage {
    /// 제안된 단계로 플랜을 만들거나 진행 중인 플랜 유지
    ///
    /// - 현재 단계가 error 로 멈춘 플랜은 포기
    /// - `plan` 블록의 단계는 진행 중인 플랜을 대체
    /// - 본문에서 뽑은 단계(`inferred`)는 진행 중인 플랜이 없을 때만 사용
    fn ensure_plan(&self, request: &str, steps: &[String], inferred: bool) -> Result<Option<String>> {
        let mut tracker = self.ctx.tracker.lock();

        let stalled = tracker.has_active_plan()
            && tracker.current_step().is_some_and(|s| s.status == Status::Error);
        if stalled {
            tracker.abandon("current step failed").map_err(Error::from)?;
        }

        if tracker.has_active_plan() {
            if steps.is_empty() || inferred {
                if !steps.is_empty() {
                    debug!("Plan already active, ignoring {} inferred steps", steps.len());
                }
                return Ok(tracker.plan().map(|p| p.id.clone()));
            }
            tracker
                .abandon("superseded by a new plan")
                .map_err(Error::from)?;
        }
        if steps.is_empty() {
            return Ok(None);
        }
        Ok(Some(tracker.create_plan(request, steps)))
    }

    /// 진행 중인 현재 단계의 미실행 명령
    fn pending_step_commands(&self) -> Vec<CommandCursor> {
        let tracker = self.ctx.tracker.lock();
        match tracker.current_step() {
            Some(step) if tracker.has_active_plan() && step.status == Status::InProgress => {
                tracker.pending_commands()
            }
            _ => Vec::new(),
        }
    }

    /// 남은 명령이 없는 진행 중 단계는 이번 응답이 처리한 것으로 보고 완료
    fn complete_idle_step(&self) -> Result<()> {
        let mut tracker = self.ctx.tracker.lock();
        let Some(index) = tracker.plan().map(|p| p.current_index) else {
            return Ok(());
        };
        let idle = tracker.has_active_plan()
            && tracker
                .current_step()
                .is_some_and(|s| s.status == Status::InProgress && s.next_command().is_none());
        if idle {
            tracker
                .update_step_status(index, Status::Completed, None)
                .map_err(Error::from)?;
            info!("Plan step {} has no pending commands, marked completed", index);
        }
        Ok(())
    }

    /// 현재 단계 명령을 순서대로 실행하고 결과를 tracker 에 기록
    ///
    /// 전부 성공하면 단계를 completed 로, 실패하면 error 로 바꾸고 플랜을 포기합니다.
    async fn run_current_step(&self, dispatcher: &ToolDispatcher<'_>) -> Result<Vec<StepRun>> {
        let pending = self.pending_step_commands();
        let Some(step_index) = pending.first().map(|c| c.step_index) else {
            self.complete_idle_step()?;
            return Ok(Vec::new());
        };

        let mut runs = Vec::new();
        let mut failure = None;

        for cursor in pending {
            let run = dispatcher.run_command(&cursor.command, None).await?;
            let executed = run.exit_code.is_some();
            let error = (run.status != OutcomeStatus::Succeeded)
                .then(|| format!("{}: {}", run.status.as_str(), run.output.trim()));

            self.ctx
                .tracker
                .lock()
                .update_command_status(
                    cursor.step_index,
                    cursor.command_index,
                    executed,
                    Some(&run.output),
                    error.as_deref(),
                )
                .map_err(Error::from)?;

            runs.push(StepRun {
                step_index,
                command: cursor.command,
                exit_code: run.exit_code.unwrap_or(-1),
                output: run.output,
            });

            if run.status == OutcomeStatus::Cancelled {
                info!("Plan step {} interrupted by cancellation", step_index);
                return Ok(runs);
            }
            if let Some(error) = error {
                failure = Some(error);
                break;
            }
        }

        let combined = runs
            .iter()
            .map(|r| r.output.trim())
            .filter(|o| !o.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let mut tracker = self.ctx.tracker.lock();
        match failure {
            Some(error) => {
                tracker
                    .update_step_status(step_index, Status::Error, Some(&error))
                    .map_err(Error::from)?;
                tracker
                    .abandon(&format!("step {} failed: {}", step_index + 1, error))
                    .map_err(Error::from)?;
            }
            None => {
                tracker
                    .update_step_status(step_index, Status::Completed, Some(&combined))
                    .map_err(Error::from)?;
                info!("Plan step {} -> {}", step_index, Status::Completed);
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl Stage for SelectToolsStage {
    type Prepared = SelectInput;
    type Output = SelectOutput;

    fn id(&self) -> StageId {
        StageId::SelectTools
    }

    fn emits(&self) -> &'static [Action] {
        &[Action::Execute]
    }

    fn prepare(&self, state: &SharedState) -> Result<SelectInput> {
        let kind = state
            .kind
            .ok_or_else(|| Error::Internal("request was not classified".to_string()))?;
        Ok(SelectInput {
            kind,
            request: state.request.clone(),
            intents: state.intents.clone(),
            steps: state.proposed_steps.clone(),
            steps_inferred: state.steps_inferred,
            cancel: state.cancel.clone(),
        })
    }

    async fn execute(&self, input: &SelectInput) -> Result<SelectOutput> {
        let tools = ToolSet::for_kind(input.kind);
        debug!("Selected tools {:?} for {}", tools.names(), input.kind);

        let plan_id = self.ensure_plan(&input.request, &input.steps, input.steps_inferred)?;
        let dispatcher = ToolDispatcher::new(&self.ctx, &input.cancel);

        let mut outcomes = Vec::with_capacity(input.intents.len());
        for intent in &input.intents {
            outcomes.push(dispatcher.dispatch(intent, &tools).await?);
        }

        let step_runs = if tools.commands && !input.cancel.is_cancelled() {
            self.run_current_step(&dispatcher).await?
        } else {
            Vec::new()
        };

        let (progress, render) = {
            let tracker = self.ctx.tracker.lock();
            let snapshot = tracker
                .plan()
                .is_some()
                .then(|| (tracker.progress(), tracker.render()));
            snapshot.unzip()
        };

        Ok(SelectOutput {
            tools,
            outcomes,
            step_runs,
            plan_id,
            progress,
            render,
        })
    }

    fn finalize(
        &self,
        state: &mut SharedState,
        _input: SelectInput,
        output: SelectOutput,
    ) -> Result<Action> {
        state.tools = Some(output.tools);
        state.outcomes = output.outcomes;
        state.step_runs = output.step_runs;
        state.plan_id = output.plan_id;
        state.plan_progress = output.progress;
        state.plan_render = output.render;
        Ok(Action::Execute)
    }
}
