//! Agent - 설정에서 협력자를 조립하고 요청마다 Flow 실행
//!
//! ```ignore
//! let agent = Agent::start(&config, None, generator, default_observer()).await?;
//! let outcome = agent.handle("list the files here").await;
//! println!("{}", outcome.response);
//! agent.shutdown().await;
//! ```

use crate::context::{AgentContext, FlowSettings};
use crate::flow::{Flow, FlowOutcome};
use crate::state::SharedState;
use pocket_context::{ContextDb, ContextStore};
use pocket_foundation::{
    new_session_id, EnvRedactor, EventKind, ObservedEvent, Observer, PocketConfig, Result,
    TextGenerator,
};
use pocket_shell::{CommandPolicy, ProcessRegistry, RegistryConfig, SessionController, SessionOptions};
use pocket_task::{JsonPlanStore, PatternExtractor, PlanProgress, TaskTracker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Agent {
    ctx: Arc<AgentContext>,
    flow: Flow,
}

impl Agent {
    /// 이미 조립된 협력자로 생성
    pub fn new(ctx: AgentContext) -> Result<Self> {
        let ctx = Arc::new(ctx);
        let flow = Flow::standard(ctx.clone())?;
        Ok(Self { ctx, flow })
    }

    /// 설정에서 셸 세션, 레지스트리, tracker, 컨텍스트 저장소를 만들어 시작
    ///
    /// `session_id` 가 있으면 해당 컨텍스트 세션을 이어갑니다.
    pub async fn start(
        config: &PocketConfig,
        session_id: Option<String>,
        generator: Arc<dyn TextGenerator>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let data_dir = config.data_dir();

        let session =
            SessionController::initialize(SessionOptions::from_settings(&config.shell), observer.clone())
                .await?;
        let registry = ProcessRegistry::new(
            RegistryConfig::from_settings(&config.processes),
            observer.clone(),
        );

        let mut tracker = TaskTracker::new(
            Arc::new(JsonPlanStore::in_data_dir(&data_dir)),
            Arc::new(PatternExtractor::new()),
            observer.clone(),
        );
        match tracker.resume() {
            Ok(Some(plan)) => info!("Resumed plan {} ({}%)", plan.id, plan.percent),
            Ok(None) => {}
            Err(e) => warn!("Could not resume active plan: {}", e),
        }

        let redactor = config
            .security
            .redact_env
            .then(|| EnvRedactor::from_settings(&config.security));
        let context = ContextStore::open(
            ContextDb::open(&data_dir)?,
            session_id.unwrap_or_else(new_session_id),
            redactor,
            observer.clone(),
        )?;

        let ctx = AgentContext::new(session, registry, tracker, context, generator, observer)
            .with_policy(CommandPolicy::new(&config.security.dangerous_patterns))
            .with_settings(FlowSettings {
                agent: config.agent.clone(),
                context: config.context.clone(),
                ..FlowSettings::default()
            });
        Self::new(ctx)
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn session_id(&self) -> &str {
        self.ctx.context.session_id()
    }

    pub async fn handle(&self, request: &str) -> FlowOutcome {
        self.handle_cancellable(request, CancellationToken::new()).await
    }

    /// 취소 토큰과 함께 실행 (실행 중인 명령은 Ctrl-C 로 중단)
    pub async fn handle_cancellable(&self, request: &str, cancel: CancellationToken) -> FlowOutcome {
        let mut state = SharedState::new(request).with_cancel(cancel);
        let outcome = self.flow.run(&mut state).await;

        let kind = if outcome.is_success() {
            EventKind::Completed
        } else {
            EventKind::Failed
        };
        self.ctx.observer.record(
            ObservedEvent::new("agent", kind, "handle")
                .field("session_id", self.session_id())
                .field("stages", outcome.trace.len()),
        );
        outcome
    }

    /// 진행 중인 플랜을 사유와 함께 포기
    pub fn abandon_plan(&self, reason: &str) -> Result<PlanProgress> {
        let mut tracker = self.ctx.tracker.lock();
        tracker.abandon(reason)?;
        Ok(tracker.progress())
    }

    /// 남은 단계와 관계없이 플랜을 완료로 닫음
    pub fn complete_plan(&self, summary: Option<&str>) -> Result<PlanProgress> {
        let mut tracker = self.ctx.tracker.lock();
        tracker.complete_self(summary)?;
        Ok(tracker.progress())
    }

    /// 플랜 끝에 단계 추가
    pub fn add_plan_step(&self, description: &str) -> Result<PlanProgress> {
        let mut tracker = self.ctx.tracker.lock();
        tracker.add_step(description)?;
        Ok(tracker.progress())
    }

    /// 보조 프로세스 정리, 셸 종료, 세션 종료 시각 기록
    pub async fn shutdown(&self) {
        let closed = self.ctx.registry.close_all().await;
        if closed > 0 {
            info!("Closed {} interactive processes", closed);
        }
        self.ctx.session.lock().await.shutdown().await;
        if let Err(e) = self.ctx.context.close() {
            warn!("Failed to close context session: {}", e);
        }
    }
}
