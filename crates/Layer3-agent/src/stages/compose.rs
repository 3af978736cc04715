//! ComposeResponse - 최종 응답 조립 후 assistant 턴 기록

use crate::context::AgentContext;
use crate::grounding::GroundingChecker;
use crate::stage::{Action, Stage, StageId};
use crate::state::{SharedState, StepRun};
use crate::tools::{IntentOutcome, OutcomeStatus};
use async_trait::async_trait;
use pocket_foundation::{Result, TurnRole};
use std::ffi::OsString;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// 결과마다 보여줄 최대 출력 줄 수
const OUTPUT_LINES: usize = 40;

pub struct ComposeStage {
    ctx: Arc<AgentContext>,
    grounding: GroundingChecker,
}

impl ComposeStage {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self {
            ctx,
            grounding: GroundingChecker::new(),
        }
    }
}

pub struct ComposeInput {
    prose: String,
    outcomes: Vec<IntentOutcome>,
    step_runs: Vec<StepRun>,
    plan_render: Option<String>,
    notes: Vec<String>,
    working_dir: PathBuf,
    search_path: Option<OsString>,
    error: Option<String>,
}

pub struct ComposeOutput {
    response: String,
    grounding_notes: Vec<String>,
}

#[async_trait]
impl Stage for ComposeStage {
    type Prepared = ComposeInput;
    type Output = ComposeOutput;

    fn id(&self) -> StageId {
        StageId::ComposeResponse
    }

    fn emits(&self) -> &'static [Action] {
        &[Action::Complete]
    }

    fn prepare(&self, state: &SharedState) -> Result<ComposeInput> {
        Ok(ComposeInput {
            prose: state.prose.clone(),
            outcomes: state.outcomes.clone(),
            step_runs: state.step_runs.clone(),
            plan_render: state.plan_render.clone(),
            notes: state
                .parse_warnings
                .iter()
                .chain(state.context_warnings.iter())
                .cloned()
                .collect(),
            working_dir: PathBuf::from(&state.working_dir),
            search_path: state
                .search_path
                .as_ref()
                .map(OsString::from)
                .or_else(|| std::env::var_os("PATH")),
            error: state.error().map(|e| e.label()),
        })
    }

    async fn execute(&self, input: &ComposeInput) -> Result<ComposeOutput> {
        let grounding_notes: Vec<String> = self
            .grounding
            .missing_references(&input.prose, &input.working_dir)
            .into_iter()
            .chain(self.grounding.unknown_commands(
                &input.prose,
                input.search_path.as_deref(),
                &input.working_dir,
            ))
            .map(|m| m.note())
            .collect();

        let response = render_response(input, &grounding_notes);
        self.ctx.context.append_turn(TurnRole::Assistant, &response)?;

        Ok(ComposeOutput {
            response,
            grounding_notes,
        })
    }

    fn finalize(
        &self,
        state: &mut SharedState,
        _input: ComposeInput,
        output: ComposeOutput,
    ) -> Result<Action> {
        state.grounding_notes = output.grounding_notes;
        state.response = Some(output.response);
        Ok(Action::Complete)
    }
}

fn render_response(input: &ComposeInput, grounding_notes: &[String]) -> String {
    let mut out = String::new();

    if !input.prose.is_empty() {
        out.push_str(&input.prose);
        out.push('\n');
    }

    if !input.outcomes.is_empty() {
        let _ = writeln!(out, "\nResults:");
        for outcome in &input.outcomes {
            let mut label = outcome.status.as_str().to_string();
            if let Some(code) = outcome.exit_code {
                let _ = write!(label, ", exit {}", code);
            }
            if outcome.attempts > 1 {
                let _ = write!(label, ", {} attempts", outcome.attempts);
            }
            let _ = writeln!(out, "- {} [{}]", outcome.intent.describe(), label);
            if outcome.status != OutcomeStatus::Skipped {
                push_indented(&mut out, &outcome.output);
            }
        }
    }

    if !input.step_runs.is_empty() {
        let _ = writeln!(out, "\nPlan step {}:", input.step_runs[0].step_index + 1);
        for run in &input.step_runs {
            let _ = writeln!(out, "- $ {} [exit {}]", run.command, run.exit_code);
            push_indented(&mut out, &run.output);
        }
    }

    if let Some(render) = &input.plan_render {
        let _ = writeln!(out, "\n{}", render.trim_end());
    }

    if !grounding_notes.is_empty() {
        let _ = writeln!(out, "\nGrounding:");
        for note in grounding_notes {
            let _ = writeln!(out, "- {}", note);
        }
    }

    if !input.notes.is_empty() {
        let _ = writeln!(out, "\nNotes:");
        for note in &input.notes {
            let _ = writeln!(out, "- {}", note);
        }
    }

    if let Some(error) = &input.error {
        let _ = writeln!(out, "\n{}", error);
    }

    out.trim().to_string()
}

fn push_indented(out: &mut String, output: &str) {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    for line in lines.iter().take(OUTPUT_LINES) {
        let _ = writeln!(out, "    {}", line);
    }
    if lines.len() > OUTPUT_LINES {
        let _ = writeln!(out, "    ... ({} more lines)", lines.len() - OUTPUT_LINES);
    }
}
