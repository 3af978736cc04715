//! Classify - shell / coding / integrated

use crate::intent::{Intent, IntentKind};
use crate::stage::{Action, Stage, StageId};
use crate::state::{RequestKind, SharedState};
use async_trait::async_trait;
use pocket_foundation::Result;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

fn keyword_regexes() -> &'static (Regex, Regex) {
    static KEYWORDS: OnceLock<(Regex, Regex)> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        (
            Regex::new(r"(?i)\b(?:code|coding|file|files|script|scripts)\b")
                .expect("built-in coding keywords"),
            Regex::new(r"(?i)\b(?:run|execute|shell)\b").expect("built-in shell keywords"),
        )
    })
}

/// Intent 종류로 분류, Intent 가 없으면 요청 키워드로 판단
pub fn classify(intents: &[Intent], request: &str) -> RequestKind {
    let has_files = intents.iter().any(|i| i.kind() == IntentKind::File);
    let has_shell = intents.iter().any(|i| i.kind() != IntentKind::File);

    match (has_files, has_shell) {
        (true, true) => RequestKind::Integrated,
        (true, false) => RequestKind::Coding,
        (false, true) => RequestKind::Shell,
        (false, false) => {
            let (coding, shell) = keyword_regexes();
            if !coding.is_match(request) {
                RequestKind::Shell
            } else if shell.is_match(request) {
                RequestKind::Integrated
            } else {
                RequestKind::Coding
            }
        }
    }
}

pub struct ClassifyStage;

pub struct ClassifyInput {
    intents: Vec<Intent>,
    request: String,
}

#[async_trait]
impl Stage for ClassifyStage {
    type Prepared = ClassifyInput;
    type Output = RequestKind;

    fn id(&self) -> StageId {
        StageId::Classify
    }

    fn emits(&self) -> &'static [Action] {
        &[Action::Shell, Action::Coding, Action::Integrated]
    }

    fn prepare(&self, state: &SharedState) -> Result<ClassifyInput> {
        Ok(ClassifyInput {
            intents: state.intents.clone(),
            request: state.request.clone(),
        })
    }

    async fn execute(&self, input: &ClassifyInput) -> Result<RequestKind> {
        Ok(classify(&input.intents, &input.request))
    }

    fn finalize(
        &self,
        state: &mut SharedState,
        _input: ClassifyInput,
        kind: RequestKind,
    ) -> Result<Action> {
        info!("Classified request as {}", kind);
        state.kind = Some(kind);
        Ok(match kind {
            RequestKind::Shell => Action::Shell,
            RequestKind::Coding => Action::Coding,
            RequestKind::Integrated => Action::Integrated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_intents() {
        let read = Intent::ReadFile { path: "a.rs".into() };
        let run = Intent::command("ls");

        assert_eq!(classify(&[run.clone()], ""), RequestKind::Shell);
        assert_eq!(classify(&[read.clone()], ""), RequestKind::Coding);
        assert_eq!(classify(&[read, run], ""), RequestKind::Integrated);
    }

    #[test]
    fn test_classify_by_keywords() {
        assert_eq!(classify(&[], "list the directory"), RequestKind::Shell);
        assert_eq!(classify(&[], "fix this Script"), RequestKind::Coding);
        assert_eq!(
            classify(&[], "write a script and run it"),
            RequestKind::Integrated
        );
        // 단어 경계
        assert_eq!(classify(&[], "show my profile"), RequestKind::Shell);
    }

    #[tokio::test]
    async fn test_stage_routes_by_kind() {
        let mut state = SharedState::new("edit the file");
        let stage = ClassifyStage;
        let input = stage.prepare(&state).unwrap();
        let kind = stage.execute(&input).await.unwrap();
        let action = stage.finalize(&mut state, input, kind).unwrap();

        assert_eq!(action, Action::Coding);
        assert_eq!(state.kind, Some(RequestKind::Coding));
    }
}
