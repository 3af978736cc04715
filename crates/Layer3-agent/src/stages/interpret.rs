//! Interpret - 요청을 모델에 보내고 응답을 Intent 로 해석

use crate::context::AgentContext;
use crate::grounding::GroundingChecker;
use crate::intent::{IntentParser, ParsedReply};
use crate::stage::{Action, Stage, StageId};
use crate::state::SharedState;
use async_trait::async_trait;
use pocket_foundation::{Error, Result, Turn};
use std::sync::Arc;
use tracing::debug;

pub struct InterpretStage {
    ctx: Arc<AgentContext>,
    parser: IntentParser,
    grounding: GroundingChecker,
}

impl InterpretStage {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self {
            ctx,
            parser: IntentParser::new(),
            grounding: GroundingChecker::new(),
        }
    }
}

pub struct InterpretInput {
    request: String,
}

pub struct InterpretOutput {
    prior_turns: Vec<Turn>,
    reply: String,
    parsed: ParsedReply,
    inferred_steps: Vec<String>,
}

#[async_trait]
impl Stage for InterpretStage {
    type Prepared = InterpretInput;
    type Output = InterpretOutput;

    fn id(&self) -> StageId {
        StageId::Interpret
    }

    fn emits(&self) -> &'static [Action] {
        &[Action::Classify]
    }

    fn prepare(&self, state: &SharedState) -> Result<InterpretInput> {
        let request = state.request.trim();
        if request.is_empty() {
            return Err(Error::Validation("empty request".to_string()));
        }
        Ok(InterpretInput {
            request: request.to_string(),
        })
    }

    async fn execute(&self, input: &InterpretInput) -> Result<InterpretOutput> {
        let settings = &self.ctx.settings;
        let prior_turns = self
            .ctx
            .context
            .recent_turns(Some(settings.context.recent_turns))?;

        let reply = self
            .ctx
            .generator
            .generate(&prior_turns, &input.request, Some(settings.system_instruction.as_str()))
            .await?;
        let parsed = self.parser.parse(&reply);
        // 실행할 것이 전혀 없는 응답만 본문 목록을 단계로 봄
        let inferred_steps = if parsed.steps.is_empty() && parsed.intents.is_empty() {
            self.grounding.extract_steps(&parsed.prose)
        } else {
            Vec::new()
        };
        debug!(
            "Interpreted reply: {} intents, {} proposed steps, {} inferred",
            parsed.intents.len(),
            parsed.steps.len(),
            inferred_steps.len()
        );

        Ok(InterpretOutput {
            prior_turns,
            reply,
            parsed,
            inferred_steps,
        })
    }

    fn finalize(
        &self,
        state: &mut SharedState,
        _input: InterpretInput,
        output: InterpretOutput,
    ) -> Result<Action> {
        state.prior_turns = output.prior_turns;
        state.reply = output.reply;
        state.prose = output.parsed.prose;
        state.intents = output.parsed.intents;
        state.steps_inferred = output.parsed.steps.is_empty() && !output.inferred_steps.is_empty();
        state.proposed_steps = if state.steps_inferred {
            output.inferred_steps
        } else {
            output.parsed.steps
        };
        state.parse_warnings = output.parsed.warnings;
        Ok(Action::Classify)
    }
}
