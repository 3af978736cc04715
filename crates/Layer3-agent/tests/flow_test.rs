//! Flow 통합 테스트 - 실제 bash 세션 + 스크립트된 텍스트 생성기
//!
//! `cargo test -p pocket-agent --test flow_test`
#![cfg(unix)]

use async_trait::async_trait;
use pocket_agent::{Action, Agent, AgentContext, FlowSettings, RequestKind, StageId};
use pocket_context::{ContextDb, ContextStore};
use pocket_foundation::{
    EventKind, MemoryObserver, StaticEscalation, TextGenerator, Turn, TurnRole,
};
use pocket_shell::{ProcessRegistry, RegistryConfig, SessionController, SessionOptions};
use pocket_task::{JsonPlanStore, PatternExtractor, PlanStore, Status, TaskTracker};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// 미리 정한 응답을 순서대로 돌려주는 생성기
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<(usize, String)>>,
}

impl Scripted {
    fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        let replies = replies
            .into_iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(
        &self,
        prior_turns: &[Turn],
        prompt: &str,
        _system_instruction: Option<&str>,
    ) -> pocket_foundation::Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((prior_turns.len(), prompt.to_string()));
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(pocket_foundation::Error::Request(e)),
            None => Ok("Done.".to_string()),
        }
    }
}

async fn agent(dir: &Path, generator: Arc<Scripted>, observer: Arc<MemoryObserver>) -> Agent {
    let session = SessionController::initialize(
        SessionOptions::new("bash").cwd(dir),
        observer.clone(),
    )
    .await
    .expect("bash session should start");
    let registry = ProcessRegistry::new(RegistryConfig::default(), observer.clone());
    let tracker = TaskTracker::new(
        Arc::new(JsonPlanStore::new(dir.join(".tasks"))),
        Arc::new(PatternExtractor::new()),
        observer.clone(),
    );
    let context = ContextStore::open(
        ContextDb::in_memory().unwrap(),
        "session_flow",
        None,
        observer.clone(),
    )
    .unwrap();

    let ctx = AgentContext::new(session, registry, tracker, context, generator, observer)
        .with_settings(FlowSettings::default());
    Agent::new(ctx).unwrap()
}

#[tokio::test]
async fn test_shell_request_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Ok("Printing it.\n```bash\necho hello-pocket\n```")]);
    let observer = MemoryObserver::new();
    let agent = agent(dir.path(), generator.clone(), observer.clone()).await;

    let outcome = agent.handle("say hello").await;

    assert!(outcome.is_success(), "{}", outcome.response);
    assert!(outcome.response.starts_with("Printing it."));
    assert!(outcome.response.contains("- $ echo hello-pocket [ok, exit 0]"));
    assert!(outcome.response.contains("    hello-pocket"));
    assert_eq!(outcome.trace.len(), 5);
    assert_eq!(outcome.trace[1], (StageId::Classify, Action::Shell));
    assert_eq!(outcome.trace[4], (StageId::ComposeResponse, Action::Complete));

    let turns = agent.context().context.recent_turns(None).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].content, "say hello");
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].content, outcome.response);

    let state = agent.context().context.current_state().unwrap().unwrap();
    assert!(!state.working_dir.is_empty());
    assert_eq!(state.command_history.last().unwrap().command, "echo hello-pocket");
    assert_eq!(observer.count("flow", EventKind::Completed), 1);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_prior_turns_reach_generator() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Ok("First."), Ok("Second.")]);
    let agent = agent(dir.path(), generator.clone(), MemoryObserver::new()).await;

    agent.handle("one").await;
    agent.handle("two").await;

    let prompts = generator.prompts.lock().unwrap().clone();
    assert_eq!(prompts, vec![(0, "one".to_string()), (2, "two".to_string())]);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_plan_steps_run_across_requests() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![
        Ok("Two steps.\n```plan\n1. $ mkdir -p built\n2. $ touch built/done.txt\n```"),
        Ok("Continuing."),
    ]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let first = agent.handle("prepare the build dir").await;
    assert!(first.is_success(), "{}", first.response);
    assert!(dir.path().join("built").is_dir());
    assert!(!dir.path().join("built/done.txt").exists());
    assert!(first.response.contains("Plan step 1:"));
    assert!(first.response.contains("Progress: 50% complete"));
    {
        let tracker = agent.context().tracker.lock();
        let plan = tracker.plan().unwrap();
        assert_eq!(plan.steps[0].status, Status::Completed);
        assert_eq!(plan.current_index, 1);
        assert!(plan.steps[0].commands[0].executed);
    }

    let second = agent.handle("continue").await;
    assert!(second.is_success(), "{}", second.response);
    assert!(dir.path().join("built/done.txt").is_file());
    assert!(second.response.contains("Progress: 100% complete"));
    assert!(!agent.context().tracker.lock().has_active_plan());

    agent.shutdown().await;
}

#[tokio::test]
async fn test_failing_step_marks_error() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Ok("```plan\n1. $ ls does-not-exist\n2. $ echo never\n```")]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let outcome = agent.handle("look around").await;

    // 명령 실패는 흐름 에러가 아님
    assert!(outcome.is_success());
    let tracker = agent.context().tracker.lock();
    let plan = tracker.plan().unwrap();
    assert_eq!(plan.steps[0].status, Status::Error);
    assert_eq!(plan.steps[1].status, Status::Pending);
    assert_eq!(plan.error_count, 1);
    assert!(plan.steps[0].commands[0].error.is_some());
    // 실패한 단계는 플랜을 포기시킴
    assert!(!tracker.has_active_plan());
    assert!(plan.abandon_reason.as_deref().unwrap().starts_with("step 1 failed"));
    drop(tracker);
    assert!(outcome.response.contains("Abandoned: step 1 failed"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_next_plan_starts_after_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![
        Ok("```plan\n1. $ ls does-not-exist\n2. $ echo never\n```"),
        Ok("Retrying.\n```plan\n1. $ echo recovered\n```"),
    ]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    agent.handle("look around").await;
    let second = agent.handle("try again").await;

    assert!(second.is_success(), "{}", second.response);
    assert!(second.response.contains("- $ echo recovered [exit 0]"));
    let tracker = agent.context().tracker.lock();
    let plan = tracker.plan().unwrap();
    assert_eq!(plan.request, "try again");
    assert_eq!(plan.status, Status::Completed);
    drop(tracker);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_step_without_commands_advances() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![
        Ok("The layout is simple.\n```plan\n1. Explain the layout\n2. $ echo hi\n```"),
        Ok("Continuing."),
        Ok("```plan\n1. $ echo other\n```"),
    ]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let first = agent.handle("describe the layout").await;
    assert!(first.is_success(), "{}", first.response);
    {
        let tracker = agent.context().tracker.lock();
        let plan = tracker.plan().unwrap();
        assert_eq!(plan.steps[0].status, Status::Completed);
        assert_eq!(plan.current_index, 1);
        assert_eq!(plan.steps[1].status, Status::InProgress);
    }

    let second = agent.handle("continue").await;
    assert!(second.response.contains("- $ echo hi [exit 0]"));
    assert!(!agent.context().tracker.lock().has_active_plan());

    let third = agent.handle("something else").await;
    assert!(third.response.contains("- $ echo other [exit 0]"));
    let tracker = agent.context().tracker.lock();
    assert_eq!(tracker.plan().unwrap().request, "something else");
    drop(tracker);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_new_plan_supersedes_active_plan() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![
        Ok("```plan\n1. $ echo a\n2. $ echo b\n```"),
        Ok("Different approach.\n```plan\n1. $ echo c\n```"),
    ]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    agent.handle("first approach").await;
    let first_id = agent.context().tracker.lock().plan().unwrap().id.clone();
    agent.handle("second approach").await;

    let tracker = agent.context().tracker.lock();
    let plan = tracker.plan().unwrap();
    assert_ne!(plan.id, first_id);
    assert_eq!(plan.request, "second approach");
    drop(tracker);

    let old = JsonPlanStore::new(dir.path().join(".tasks")).load(&first_id).unwrap();
    assert_eq!(old.status, Status::Error);
    assert_eq!(old.abandon_reason.as_deref(), Some("superseded by a new plan"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_agent_plan_controls() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Ok("```plan\n1. $ echo a\n2. $ echo b\n```")]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    assert!(agent.abandon_plan("nothing to abandon").is_err());

    agent.handle("two echoes").await;
    let progress = agent.add_plan_step("$ echo c").unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 1);

    let progress = agent.complete_plan(Some("good enough")).unwrap();
    assert_eq!(progress.status, Some(Status::Completed));
    assert_eq!(progress.percent, 100);
    assert!(!agent.context().tracker.lock().has_active_plan());
    assert!(agent.add_plan_step("$ echo d").is_err());

    agent.shutdown().await;
}

#[tokio::test]
async fn test_plan_inferred_from_numbered_reply() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![
        Ok("Here is the approach:\n1. $ mkdir -p inferred\n2. Check the result"),
        Ok("Other ideas:\n1. $ mkdir -p ignored\n2. Look again"),
    ]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let first = agent.handle("set things up").await;
    assert!(first.is_success(), "{}", first.response);
    assert!(dir.path().join("inferred").is_dir());
    {
        let tracker = agent.context().tracker.lock();
        let plan = tracker.plan().unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.current_index, 1);
    }

    // 본문 목록은 진행 중인 플랜을 대체하지 않음
    agent.handle("and then").await;
    assert!(!dir.path().join("ignored").exists());
    let tracker = agent.context().tracker.lock();
    assert_eq!(tracker.plan().unwrap().request, "set things up");
    drop(tracker);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_generator_failure_is_labeled() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Err("model offline")]);
    let observer = MemoryObserver::new();
    let agent = agent(dir.path(), generator, observer.clone()).await;

    let outcome = agent.handle("anything").await;

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.response,
        "Error during interpret: Request error: model offline"
    );
    assert_eq!(outcome.trace, vec![(StageId::Interpret, Action::Error)]);
    // RefreshContext 까지 가지 않았으므로 턴 없음
    assert_eq!(agent.context().context.turn_count().unwrap(), 0);
    assert_eq!(observer.count("flow", EventKind::Failed), 1);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_file_intents_use_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let reply = r#"Saving a note.
```action
[{"type": "write_file", "path": "notes/a.txt", "content": "hi"},
 {"type": "read_file", "path": "notes/a.txt"}]
```"#;
    let generator = Scripted::new(vec![Ok(reply)]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let outcome = agent.handle("save a note").await;

    assert!(outcome.is_success(), "{}", outcome.response);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes/a.txt")).unwrap(),
        "hi"
    );
    assert!(outcome.response.contains("wrote 2 bytes"));
    assert!(outcome.response.contains("- read notes/a.txt [ok]\n    hi"));
    assert!(!outcome.response.contains("```action"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_integrated_request_and_blocked_command() {
    let dir = tempfile::tempdir().unwrap();
    let reply = "```bash\nrm -rf /\n```\n```action\n{\"type\": \"read_file\", \"path\": \"missing.txt\"}\n```";
    let generator = Scripted::new(vec![Ok(reply)]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let outcome = agent.handle("clean up").await;

    assert!(outcome.is_success(), "{}", outcome.response);
    assert_eq!(outcome.trace[1], (StageId::Classify, Action::Integrated));
    assert!(outcome.response.contains("- $ rm -rf / [blocked]"));
    assert!(outcome.response.contains("- read missing.txt [failed]"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_privileged_command_needs_escalation() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Ok("```bash\nsudo -n true\n```")]);
    let observer = MemoryObserver::new();

    let session = SessionController::initialize(
        SessionOptions::new("bash").cwd(dir.path()),
        observer.clone(),
    )
    .await
    .unwrap();
    let ctx = AgentContext::new(
        session,
        ProcessRegistry::new(RegistryConfig::default(), observer.clone()),
        TaskTracker::new(
            Arc::new(JsonPlanStore::new(dir.path().join(".tasks"))),
            Arc::new(PatternExtractor::new()),
            observer.clone(),
        ),
        ContextStore::open(ContextDb::in_memory().unwrap(), "s", None, observer.clone()).unwrap(),
        generator,
        observer,
    )
    .with_escalation(Arc::new(StaticEscalation(false)));
    let agent = Agent::new(ctx).unwrap();

    let outcome = agent.handle("check sudo").await;
    assert!(outcome.response.contains("[blocked]"));
    assert!(agent.context().session.lock().await.history().is_empty());

    agent.shutdown().await;
}

#[tokio::test]
async fn test_grounding_note_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("present.rs"), "fn main() {}").unwrap();
    let generator = Scripted::new(vec![Ok(
        "I checked file present.rs and updated file absent.rs as well.",
    )]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let outcome = agent.handle("what changed").await;

    assert!(outcome.response.contains("Grounding:"));
    assert!(outcome.response.contains("file `absent.rs` does not exist"));
    assert!(!outcome.response.contains("`present.rs`"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_grounding_note_for_unknown_command() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(vec![Ok(
        "I will run ls first, then execute frobnicate-pocket-xyz to finish.",
    )]);
    let agent = agent(dir.path(), generator, MemoryObserver::new()).await;

    let outcome = agent.handle("tidy up").await;

    assert!(outcome
        .response
        .contains("command `frobnicate-pocket-xyz` was not found on PATH"));
    assert!(!outcome.response.contains("command `ls`"));

    agent.shutdown().await;
}

#[test]
fn test_request_kind_labels() {
    assert_eq!(RequestKind::Integrated.to_string(), "integrated");
}
