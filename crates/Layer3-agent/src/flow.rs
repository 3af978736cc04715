//! Flow - 라우팅 표로 단계를 잇는 실행기
//!
//! 라우팅은 `(StageId, Action) → Route` 표 하나로 정의합니다.
//! `validate()` 는 각 단계가 낼 수 있는 모든 Action 에 경로가 있는지 확인합니다.
//! `Action::Error` 는 경로 없이 항상 흐름을 멈춥니다.

use crate::context::AgentContext;
use crate::stage::{Action, Phase, StageFailure, StageId, StageRunner};
use crate::stages::{ClassifyStage, ComposeStage, InterpretStage, RefreshStage, SelectToolsStage};
use crate::state::{FlowError, SharedState};
use pocket_foundation::{Error, EventKind, ObservedEvent, Observer, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 한 요청에서 방문할 수 있는 최대 단계 수
const MAX_TRANSITIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Next(StageId),
    End,
}

/// 한 번의 실행 결과
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    /// 성공 시 조립된 응답, 실패 시 라벨이 붙은 에러 설명
    pub response: String,
    pub error: Option<FlowError>,
    /// 방문 순서대로 (단계, 낸 Action)
    pub trace: Vec<(StageId, Action)>,
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Flow {
    start: StageId,
    stages: HashMap<StageId, Box<dyn StageRunner>>,
    routes: HashMap<(StageId, Action), Route>,
    observer: Arc<dyn Observer>,
}

impl Flow {
    pub fn new(start: StageId, observer: Arc<dyn Observer>) -> Self {
        Self {
            start,
            stages: HashMap::new(),
            routes: HashMap::new(),
            observer,
        }
    }

    pub fn stage(mut self, stage: impl StageRunner + 'static) -> Self {
        self.stages.insert(stage.id(), Box::new(stage));
        self
    }

    pub fn route(mut self, from: StageId, action: Action, to: Route) -> Self {
        self.routes.insert((from, action), to);
        self
    }

    /// Interpret → Classify → SelectTools → RefreshContext → ComposeResponse
    ///
    /// 표가 검증을 통과하지 못하면 `Error::Config`.
    pub fn standard(ctx: Arc<AgentContext>) -> Result<Self> {
        let observer = ctx.observer.clone();
        let flow = Flow::new(StageId::Interpret, observer)
            .stage(InterpretStage::new(ctx.clone()))
            .stage(ClassifyStage)
            .stage(SelectToolsStage::new(ctx.clone()))
            .stage(RefreshStage::new(ctx.clone()))
            .stage(ComposeStage::new(ctx))
            .route(StageId::Interpret, Action::Classify, Route::Next(StageId::Classify))
            .route(StageId::Classify, Action::Shell, Route::Next(StageId::SelectTools))
            .route(StageId::Classify, Action::Coding, Route::Next(StageId::SelectTools))
            .route(StageId::Classify, Action::Integrated, Route::Next(StageId::SelectTools))
            .route(StageId::SelectTools, Action::Execute, Route::Next(StageId::RefreshContext))
            .route(StageId::RefreshContext, Action::Default, Route::Next(StageId::ComposeResponse))
            .route(StageId::ComposeResponse, Action::Complete, Route::End);

        flow.validate()?;
        Ok(flow)
    }

    /// 정적 검증: 시작 단계 존재, 선언된 모든 Action 에 경로, 모든 경로 대상 존재
    pub fn validate(&self) -> Result<()> {
        if !self.stages.contains_key(&self.start) {
            return Err(Error::Config(format!("start stage {} is not registered", self.start)));
        }

        for (id, stage) in &self.stages {
            for action in stage.emits() {
                if *action == Action::Error {
                    continue;
                }
                if !self.routes.contains_key(&(*id, *action)) {
                    return Err(Error::Config(format!(
                        "stage {} emits '{}' but has no route for it",
                        id, action
                    )));
                }
            }
        }

        for ((from, action), route) in &self.routes {
            if let Route::Next(to) = route {
                if !self.stages.contains_key(to) {
                    return Err(Error::Config(format!(
                        "route {} --{}--> {} targets an unregistered stage",
                        from, action, to
                    )));
                }
            }
        }
        Ok(())
    }

    /// 요청 하나 실행
    ///
    /// 단계 에러는 `Action::Error` 가 되어 공유 에러를 한 번만 기록하고 멈춥니다.
    /// 이 경우에도 `response` 에는 "Error during <stage>: ..." 설명이 담깁니다.
    pub async fn run(&self, state: &mut SharedState) -> FlowOutcome {
        let mut trace = Vec::new();
        let mut current = self.start;

        for _ in 0..MAX_TRANSITIONS {
            let Some(stage) = self.stages.get(&current) else {
                self.fail(state, current, Phase::Prepare, Error::Internal("stage is not registered".into()));
                break;
            };

            self.observer.record(ObservedEvent::new("flow", EventKind::Started, current.as_str()));
            let action = match stage.run(state).await {
                Ok(action) => action,
                Err(StageFailure { phase, error }) => {
                    self.fail(state, current, phase, error);
                    Action::Error
                }
            };
            trace.push((current, action));
            debug!("{} --{}-->", current, action);

            if action == Action::Error {
                break;
            }
            match self.routes.get(&(current, action)) {
                Some(Route::Next(next)) => current = *next,
                Some(Route::End) => {
                    self.observer.record(ObservedEvent::new("flow", EventKind::Completed, "run"));
                    break;
                }
                None => {
                    let error = Error::Internal(format!("no route for action '{}'", action));
                    self.fail(state, current, Phase::Finalize, error);
                    break;
                }
            }
        }

        if state.error().is_none() && state.response.is_none() {
            let error = Error::Internal("flow stopped without a response".into());
            self.fail(state, current, Phase::Finalize, error);
        }

        let response = match (state.error(), &state.response) {
            (Some(error), Some(response)) if response.contains(&error.label()) => response.clone(),
            (Some(error), _) => error.label(),
            (None, Some(response)) => response.clone(),
            (None, None) => String::new(),
        };

        FlowOutcome {
            response,
            error: state.error().cloned(),
            trace,
        }
    }

    fn fail(&self, state: &mut SharedState, stage: StageId, phase: Phase, err: Error) {
        error!("Flow failed during {} ({}): {}", stage, phase, err);
        self.observer.record(
            ObservedEvent::new("flow", EventKind::Failed, stage.as_str())
                .field("phase", phase)
                .field("kind", err.kind())
                .field("error", &err),
        );
        let recorded = state.set_error(FlowError {
            stage,
            phase,
            kind: err.kind(),
            message: err.to_string(),
        });
        if !recorded {
            info!("Flow error already recorded, ignoring: {}", err);
        }
    }
}
