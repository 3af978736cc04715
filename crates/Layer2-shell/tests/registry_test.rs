//! 대화형 프로세스 레지스트리 통합 테스트
//!
//! `cargo test -p pocket-shell --test registry_test`
#![cfg(unix)]

use pocket_foundation::NullObserver;
use pocket_shell::{InteractionStatus, ProcessRegistry, RegistryConfig, ShellError, Termination};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> ProcessRegistry {
    let config = RegistryConfig {
        settle: Duration::from_millis(200),
        grace: Duration::from_millis(300),
        drain: Duration::from_millis(300),
        ..RegistryConfig::default()
    };
    ProcessRegistry::new(config, Arc::new(NullObserver))
}

#[tokio::test]
async fn test_cat_round_trip_and_terminate() {
    let registry = registry();
    let started = registry.start("cat").await.unwrap();

    let reply = registry
        .send(&started.id, "hello", Some("hello"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(reply.status, InteractionStatus::Matched);
    assert!(reply.output.contains("hello"));

    let termination = registry.terminate(&started.id).await.unwrap();
    assert_ne!(termination, Termination::AlreadyExited);

    let err = registry
        .send(&started.id, "again", None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShellError::NotFound(_) | ShellError::ProcessDead(_)
    ));
    assert!(!registry.contains(&started.id).await);
}

#[tokio::test]
async fn test_ids_are_unique() {
    let registry = registry();
    let a = registry.start("cat").await.unwrap();
    let b = registry.start("cat").await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(registry.len().await, 2);

    assert_eq!(registry.close_all().await, 2);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_start_captures_initial_output() {
    let registry = registry();
    let started = registry.start("sh -c 'echo booting; cat'").await.unwrap();
    assert!(started.output.contains("booting"));

    registry.terminate(&started.id).await.unwrap();
}

#[tokio::test]
async fn test_send_without_pattern_is_bounded() {
    let registry = registry();
    let started = registry.start("cat").await.unwrap();

    let begin = tokio::time::Instant::now();
    let reply = registry.send(&started.id, "ping", None, None).await.unwrap();
    assert_eq!(reply.status, InteractionStatus::Drained);
    assert!(reply.output.contains("ping"));
    assert!(begin.elapsed() < Duration::from_secs(2));

    registry.terminate(&started.id).await.unwrap();
}

#[tokio::test]
async fn test_pattern_timeout_is_not_fatal() {
    let registry = registry();
    let started = registry.start("cat").await.unwrap();

    let reply = registry
        .send(
            &started.id,
            "abc",
            Some("never-appears"),
            Some(Duration::from_millis(300)),
        )
        .await
        .unwrap();
    assert_eq!(reply.status, InteractionStatus::TimedOut);

    // 타임아웃 후에도 계속 사용 가능
    let reply = registry
        .send(&started.id, "xyz", Some("xyz"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(reply.status, InteractionStatus::Matched);

    registry.terminate(&started.id).await.unwrap();
}

#[tokio::test]
async fn test_peek_returns_last_output_when_idle() {
    let registry = registry();
    let started = registry.start("cat").await.unwrap();

    // 패턴 없이 보내서 에코와 cat 출력을 모두 소비
    let sent = registry
        .send(&started.id, "remember-me", None, None)
        .await
        .unwrap();
    assert!(sent.output.contains("remember-me"));

    let peeked = registry
        .peek(&started.id, Some(Duration::from_millis(200)))
        .await
        .unwrap();
    assert_eq!(peeked.status, InteractionStatus::Unchanged);
    assert!(peeked.output.contains("remember-me"));

    registry.terminate(&started.id).await.unwrap();
}

#[tokio::test]
async fn test_escalates_when_interrupt_ignored() {
    let registry = registry();
    let started = registry
        .start("sh -c 'trap \"\" INT; while true; do sleep 0.1; done'")
        .await
        .unwrap();

    let termination = registry.terminate(&started.id).await.unwrap();
    assert!(matches!(
        termination,
        Termination::Terminated | Termination::Killed
    ));
    assert!(!registry.contains(&started.id).await);
}

#[tokio::test]
async fn test_natural_exit_marks_dead() {
    let registry = registry();
    let started = registry.start("sh -c 'echo bye'").await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let err = registry
        .send(&started.id, "anything", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShellError::ProcessDead(_)));

    let reaped = registry.reap().await;
    assert_eq!(reaped, vec![started.id.clone()]);
    assert!(registry.list().await.is_empty());
}
