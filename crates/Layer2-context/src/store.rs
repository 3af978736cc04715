//! Context Store - 세션 단위 대화/상태 기록
//!
//! 턴은 한 번 추가되면 바뀌지 않고, 상태 스냅샷은 가장 최근 것이 "현재 상태"입니다.
//! 요약은 세션당 하나이며 요약 생성이 실패하면 이전 요약이 그대로 남습니다.

use crate::db::{ContextDb, SessionRecord, StateSnapshot};
use crate::error::{ContextError, Result};
use chrono::Utc;
use pocket_foundation::{
    CommandRecord, EnvRedactor, EventKind, ObservedEvent, Observer, TextGenerator, Turn,
    TurnRole,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 요약에 쓰는 기본 턴 수
pub const DEFAULT_WINDOW_SIZE: usize = 20;

const SUMMARY_INSTRUCTION: &str =
    "You maintain a running summary of a shell assistant conversation.";

/// 세션 하나에 묶인 컨텍스트 저장소
pub struct ContextStore {
    db: ContextDb,
    session_id: String,
    redactor: Option<EnvRedactor>,
    observer: Arc<dyn Observer>,
}

impl ContextStore {
    /// 세션 생성 또는 재개
    ///
    /// `redactor` 가 있으면 스냅샷 저장 전에 환경변수를 가립니다.
    pub fn open(
        db: ContextDb,
        session_id: impl Into<String>,
        redactor: Option<EnvRedactor>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let created = db.ensure_session(&session_id)?;
        observer.record(
            ObservedEvent::new(
                "context",
                EventKind::Started,
                if created { "open" } else { "resume" },
            )
            .field("session_id", &session_id),
        );
        Ok(Self {
            db,
            session_id,
            redactor,
            observer,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn db(&self) -> &ContextDb {
        &self.db
    }

    // ========================================================================
    // Turns
    // ========================================================================

    pub fn append_turn(&self, role: TurnRole, content: &str) -> Result<Turn> {
        let turn = Turn::new(role, content);
        self.db.insert_turn(&self.session_id, &turn)?;
        debug!("Appended {} turn to {}", role, self.session_id);
        Ok(turn)
    }

    /// 마지막 `limit` 개 (시간순), `None` 이면 전부
    pub fn recent_turns(&self, limit: Option<usize>) -> Result<Vec<Turn>> {
        self.db.turns(&self.session_id, limit)
    }

    pub fn turn_count(&self) -> Result<usize> {
        self.db.turn_count(&self.session_id)
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn snapshot_state(
        &self,
        working_dir: &str,
        env_vars: &HashMap<String, String>,
        command_history: &[CommandRecord],
    ) -> Result<()> {
        let (env_vars, command_history) = match &self.redactor {
            Some(redactor) => (
                redactor.redact(env_vars),
                command_history
                    .iter()
                    .map(|record| CommandRecord {
                        output: redactor.mask_output(&record.output, env_vars),
                        ..record.clone()
                    })
                    .collect(),
            ),
            None => (env_vars.clone(), command_history.to_vec()),
        };

        let snapshot = StateSnapshot {
            working_dir: working_dir.to_string(),
            env_vars,
            command_history,
            taken_at: Utc::now(),
        };
        self.db.insert_snapshot(&self.session_id, &snapshot)?;
        debug!("State snapshot stored for {} (cwd {})", self.session_id, working_dir);
        Ok(())
    }

    /// 가장 최근 스냅샷
    pub fn current_state(&self) -> Result<Option<StateSnapshot>> {
        self.db.latest_snapshot(&self.session_id)
    }

    // ========================================================================
    // Summary
    // ========================================================================

    /// 최근 `window_size` 턴을 요약해서 세션 요약을 교체
    pub async fn summarize(
        &self,
        summarizer: &dyn TextGenerator,
        window_size: usize,
    ) -> Result<String> {
        let turns = self.recent_turns(Some(window_size))?;
        if turns.is_empty() {
            return Err(ContextError::Summarization(
                "no conversation history".to_string(),
            ));
        }

        let prompt = summary_prompt(&turns);
        let summary = match summarizer
            .generate(&[], &prompt, Some(SUMMARY_INSTRUCTION))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                return Err(self.summary_failed("summarizer returned empty text".to_string()));
            }
            Err(e) => return Err(self.summary_failed(e.to_string())),
        };

        self.db.replace_summary(&self.session_id, &summary)?;
        info!("Summarized {} turns of {}", turns.len(), self.session_id);
        self.observer.record(
            ObservedEvent::new("context", EventKind::Completed, "summarize")
                .field("session_id", &self.session_id)
                .field("turns", turns.len()),
        );
        Ok(summary)
    }

    fn summary_failed(&self, reason: String) -> ContextError {
        warn!("Summarization failed for {}: {}", self.session_id, reason);
        self.observer.record(
            ObservedEvent::new("context", EventKind::Failed, "summarize")
                .field("session_id", &self.session_id)
                .field("reason", &reason),
        );
        ContextError::Summarization(reason)
    }

    pub fn summary(&self) -> Result<Option<String>> {
        self.db.summary(&self.session_id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 종료 시각 기록 (아무것도 지우지 않음)
    pub fn close(&self) -> Result<()> {
        self.db.end_session(&self.session_id)?;
        self.observer.record(
            ObservedEvent::new("context", EventKind::Completed, "close")
                .field("session_id", &self.session_id),
        );
        Ok(())
    }

    /// 현재 세션을 뺀 최근 세션들
    pub fn previous_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.db.sessions(limit, Some(&self.session_id))
    }
}

/// 요약 요청 프롬프트
fn summary_prompt(turns: &[Turn]) -> String {
    let conversation = turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str().to_uppercase(), t.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Provide a concise summary (max 200 words) of the following conversation, \
         focusing on the main topics, key decisions and anything worth remembering.\n\n\
         CONVERSATION:\n{}\n\nSUMMARY:",
        conversation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pocket_foundation::NullObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str, AtomicUsize);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(
            &self,
            _prior: &[Turn],
            prompt: &str,
            _system: Option<&str>,
        ) -> pocket_foundation::Result<String> {
            self.1.fetch_add(1, Ordering::SeqCst);
            assert!(prompt.contains("CONVERSATION"));
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(
            &self,
            _prior: &[Turn],
            _prompt: &str,
            _system: Option<&str>,
        ) -> pocket_foundation::Result<String> {
            Err(pocket_foundation::Error::Request("model offline".into()))
        }
    }

    fn store() -> ContextStore {
        ContextStore::open(
            ContextDb::in_memory().unwrap(),
            "session_test",
            Some(EnvRedactor::default()),
            Arc::new(NullObserver),
        )
        .unwrap()
    }

    #[test]
    fn test_append_then_recent_one() {
        let store = store();
        store.append_turn(TurnRole::User, "first").unwrap();
        let turn = store.append_turn(TurnRole::Assistant, "second").unwrap();

        let recent = store.recent_turns(Some(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, turn.content);
        assert_eq!(recent[0].role, TurnRole::Assistant);
        assert_eq!(store.turn_count().unwrap(), 2);
    }

    #[test]
    fn test_snapshot_redacts_env() {
        let store = store();
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/me".to_string());
        env.insert("GITHUB_TOKEN".to_string(), "ghp_secretvalue".to_string());
        let history = vec![CommandRecord {
            command: "echo $GITHUB_TOKEN".into(),
            output: "ghp_secretvalue".into(),
            exit_code: 0,
            timestamp: Utc::now(),
        }];

        assert!(store.current_state().unwrap().is_none());
        store.snapshot_state("/tmp", &env, &history).unwrap();
        store.snapshot_state("/srv", &env, &[]).unwrap();

        let state = store.current_state().unwrap().unwrap();
        assert_eq!(state.working_dir, "/srv");
        assert_eq!(state.env_vars["HOME"], "/home/me");
        assert_eq!(state.env_vars["GITHUB_TOKEN"], "***");
    }

    #[test]
    fn test_history_output_masked() {
        let store = store();
        let mut env = HashMap::new();
        env.insert("API_TOKEN".to_string(), "tok_12345".to_string());
        let history = vec![CommandRecord {
            command: "printenv API_TOKEN".into(),
            output: "tok_12345".into(),
            exit_code: 0,
            timestamp: Utc::now(),
        }];
        store.snapshot_state("/", &env, &history).unwrap();

        let state = store.current_state().unwrap().unwrap();
        assert_eq!(state.command_history[0].output, "***");
    }

    #[tokio::test]
    async fn test_summarize_replaces_summary() {
        let store = store();
        store.append_turn(TurnRole::User, "list files").unwrap();
        store.append_turn(TurnRole::Assistant, "done").unwrap();

        let generator = Fixed("User listed files.", AtomicUsize::new(0));
        let summary = store.summarize(&generator, DEFAULT_WINDOW_SIZE).await.unwrap();
        assert_eq!(summary, "User listed files.");
        assert_eq!(store.summary().unwrap().as_deref(), Some("User listed files."));
    }

    #[tokio::test]
    async fn test_summarize_failure_keeps_prior() {
        let store = store();
        store.append_turn(TurnRole::User, "hello").unwrap();
        store.db().replace_summary(store.session_id(), "old").unwrap();

        let err = store.summarize(&Failing, 20).await.unwrap_err();
        assert!(matches!(err, ContextError::Summarization(_)));
        assert_eq!(store.summary().unwrap().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_summarize_empty_history_skips_generator() {
        let store = store();
        let generator = Fixed("unused", AtomicUsize::new(0));
        let err = store.summarize(&generator, 20).await.unwrap_err();
        assert!(err.to_string().contains("no conversation history"));
        assert_eq!(generator.1.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_and_previous_sessions() {
        let db = ContextDb::in_memory().unwrap();
        let first = ContextStore::open(db.clone(), "session_a", None, Arc::new(NullObserver)).unwrap();
        first.append_turn(TurnRole::User, "hi").unwrap();
        first.close().unwrap();

        let second = ContextStore::open(db.clone(), "session_b", None, Arc::new(NullObserver)).unwrap();
        let previous = second.previous_sessions(5).unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].id, "session_a");
        assert!(previous[0].ended_at.is_some());
        assert_eq!(previous[0].turn_count, 1);

        // 닫아도 기록은 남음
        assert_eq!(first.recent_turns(None).unwrap().len(), 1);
    }
}
