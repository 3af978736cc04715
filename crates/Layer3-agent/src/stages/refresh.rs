//! RefreshContext - 사용자 턴 기록, 셸 상태 스냅샷, 주기적 요약

use crate::context::AgentContext;
use crate::stage::{Action, Stage, StageId};
use crate::state::SharedState;
use async_trait::async_trait;
use pocket_foundation::{Error, Result, Turn, TurnRole};
use std::sync::Arc;
use tracing::{debug, warn};

/// 스냅샷에 남길 최근 명령 수
const SNAPSHOT_HISTORY: usize = 20;

pub struct RefreshStage {
    ctx: Arc<AgentContext>,
}

impl RefreshStage {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }
}

pub struct RefreshInput {
    request: String,
}

pub struct RefreshOutput {
    working_dir: String,
    search_path: Option<String>,
    recent_turns: Vec<Turn>,
    summary: Option<String>,
    warnings: Vec<String>,
}

#[async_trait]
impl Stage for RefreshStage {
    type Prepared = RefreshInput;
    type Output = RefreshOutput;

    fn id(&self) -> StageId {
        StageId::RefreshContext
    }

    fn emits(&self) -> &'static [Action] {
        &[Action::Default]
    }

    fn prepare(&self, state: &SharedState) -> Result<RefreshInput> {
        Ok(RefreshInput {
            request: state.request.clone(),
        })
    }

    async fn execute(&self, input: &RefreshInput) -> Result<RefreshOutput> {
        let store = &self.ctx.context;
        let settings = &self.ctx.settings.context;
        let mut warnings = Vec::new();

        store.append_turn(TurnRole::User, &input.request)?;

        let (working_dir, search_path) = {
            let session = self.ctx.session.lock().await;
            let working_dir = session.current_directory().to_string_lossy().into_owned();
            store.snapshot_state(
                &working_dir,
                session.environment(),
                session.recent_history(SNAPSHOT_HISTORY),
            )?;
            (working_dir, session.environment().get("PATH").cloned())
        };

        let turns = store.turn_count()?;
        if settings.summarize_every > 0 && turns % settings.summarize_every == 0 {
            debug!("Turn {} reached summary cadence", turns);
            // 실패해도 이전 요약이 남으므로 흐름은 계속
            if let Err(e) = store
                .summarize(self.ctx.generator.as_ref(), settings.window_size)
                .await
            {
                warn!("Summary refresh skipped: {}", e);
                warnings.push(e.to_string());
            }
        }

        Ok(RefreshOutput {
            working_dir,
            search_path,
            recent_turns: store.recent_turns(Some(settings.recent_turns))?,
            summary: store.summary()?,
            warnings,
        })
    }

    fn finalize(
        &self,
        state: &mut SharedState,
        _input: RefreshInput,
        output: RefreshOutput,
    ) -> Result<Action> {
        if output.working_dir.trim().is_empty() {
            return Err(Error::Validation("working directory is unknown".to_string()));
        }
        state.working_dir = output.working_dir;
        state.search_path = output.search_path;
        state.recent_turns = output.recent_turns;
        state.summary = output.summary;
        state.context_warnings = output.warnings;
        Ok(Action::Default)
    }
}
