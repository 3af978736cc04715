//! 플랜 추적 통합 테스트 - 저장소를 거친 전체 흐름
//!
//! `cargo test -p pocket-task --test tracker_test`

use pocket_foundation::{EventKind, MemoryObserver};
use pocket_task::{
    CommandExtractor, JsonPlanStore, PatternExtractor, PlanStore, Status, TaskPlan, TaskTracker,
};
use std::sync::Arc;

/// 한 줄을 그대로 명령으로 쓰는 추출기
struct EveryLine;

impl CommandExtractor for EveryLine {
    fn extract(&self, step_text: &str) -> Vec<String> {
        step_text.lines().map(str::to_string).collect()
    }
}

#[test]
fn test_full_plan_lifecycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonPlanStore::in_data_dir(dir.path()));
    let observer = MemoryObserver::new();
    let mut tracker = TaskTracker::new(store.clone(), Arc::new(PatternExtractor::new()), observer.clone());

    let id = tracker.create_plan(
        "scaffold a project",
        &[
            "Create the folder\n$ mkdir -p demo".to_string(),
            "Initialise git\ngit init demo".to_string(),
            "Review".to_string(),
        ],
    );

    // 매 변경마다 디스크에 반영
    let on_disk: TaskPlan = store.load(&id).unwrap();
    assert_eq!(on_disk.steps.len(), 3);
    assert_eq!(store.active().unwrap().as_deref(), Some(id.as_str()));

    for step in 0..3 {
        for cursor in tracker.pending_commands() {
            tracker
                .update_command_status(cursor.step_index, cursor.command_index, true, Some("ok"), None)
                .unwrap();
        }
        tracker.update_step_status(step, Status::Completed, None).unwrap();
        let on_disk = store.load(&id).unwrap();
        assert_eq!(on_disk.current_index, step + 1);
    }

    let on_disk = store.load(&id).unwrap();
    assert_eq!(on_disk.status, Status::Completed);
    assert_eq!(on_disk.percent, 100);
    assert!(on_disk.steps[0].commands[0].executed);
    assert_eq!(on_disk.steps[1].commands[0].command, "git init demo");
    assert_eq!(store.active().unwrap(), None);

    assert_eq!(observer.count("tracker", EventKind::Started), 1);
    assert_eq!(observer.count("tracker", EventKind::Failed), 0);
}

#[test]
fn test_injected_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = TaskTracker::new(
        Arc::new(JsonPlanStore::new(dir.path())),
        Arc::new(EveryLine),
        Arc::new(pocket_foundation::NullObserver),
    );
    tracker.create_plan("r", &["one\ntwo\none".to_string()]);

    let commands: Vec<_> = tracker.pending_commands().into_iter().map(|c| c.command).collect();
    // 같은 단계 안의 중복 제거는 추출기 책임
    assert_eq!(commands, vec!["one", "two", "one"]);
}

#[test]
fn test_load_sets_active_pointer() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonPlanStore::new(dir.path()));
    let plan = TaskPlan::new("manual", vec![pocket_task::Step::new("only", vec![])]);
    store.save(&plan).unwrap();

    let mut tracker = TaskTracker::new(
        store.clone(),
        Arc::new(PatternExtractor::new()),
        Arc::new(pocket_foundation::NullObserver),
    );
    let loaded = tracker.load(&plan.id).unwrap();
    assert_eq!(loaded.request, "manual");
    assert_eq!(store.active().unwrap(), Some(plan.id.clone()));

    assert!(tracker.load("plan_missing").is_err());
}

#[test]
fn test_storage_failure_keeps_memory_state() {
    let dir = tempfile::tempdir().unwrap();
    // 디렉토리 자리에 파일을 두어 저장이 항상 실패하게 함
    let blocker = dir.path().join("tasks");
    std::fs::write(&blocker, "not a directory").unwrap();

    let observer = MemoryObserver::new();
    let mut tracker = TaskTracker::new(
        Arc::new(JsonPlanStore::new(&blocker)),
        Arc::new(PatternExtractor::new()),
        observer.clone(),
    );
    tracker.create_plan("r", &["a".to_string(), "b".to_string()]);
    let plan = tracker.update_step_status(0, Status::Completed, None).unwrap();

    assert_eq!(plan.current_index, 1);
    assert!(observer.count("tracker", EventKind::Failed) > 0);
}
