//! Subcommand implementations

use anyhow::{bail, Context};
use chrono::{DateTime, Local, Utc};
use pocket_context::{ContextDb, SessionRecord};
use pocket_foundation::{default_observer, PocketConfig, Turn};
use pocket_shell::{ExecStatus, SessionController, SessionOptions};
use pocket_task::{JsonPlanStore, PatternExtractor, TaskTracker};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 새 셸 세션에서 명령 하나 실행, 셸의 종료 코드로 끝냄
pub async fn exec(config: &PocketConfig, command: &str, timeout: Option<u64>) -> anyhow::Result<ExitCode> {
    let policy = pocket_shell::CommandPolicy::new(&config.security.dangerous_patterns);
    policy.ensure_allowed(command)?;

    let mut session =
        SessionController::initialize(SessionOptions::from_settings(&config.shell), default_observer())
            .await
            .context("failed to start shell session")?;

    let outcome = session
        .execute(command, timeout.map(Duration::from_secs))
        .await?;
    session.shutdown().await;
    debug!(
        "'{}' finished: {:?}, exit {}, {:?}",
        command, outcome.status, outcome.exit_code, outcome.duration
    );

    if !outcome.output.is_empty() {
        println!("{}", outcome.output);
    }
    match outcome.status {
        ExecStatus::TimedOut => eprintln!("timed out after {:?}", outcome.duration),
        ExecStatus::Ended => eprintln!("shell exited"),
        _ => {}
    }
    Ok(ExitCode::from(exit_byte(outcome.exit_code)))
}

/// `pocket plan` 의 플랜 수정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEdit {
    Abandon(String),
    Complete(Option<String>),
    AddStep(String),
}

fn plan_tracker(config: &PocketConfig) -> TaskTracker {
    TaskTracker::new(
        Arc::new(JsonPlanStore::in_data_dir(&config.data_dir())),
        Arc::new(PatternExtractor::new()),
        default_observer(),
    )
}

/// 활성 플랜 출력
pub fn show_plan(config: &PocketConfig, json: bool) -> anyhow::Result<()> {
    let mut tracker = plan_tracker(config);

    if tracker.resume()?.is_none() {
        println!("No active plan.");
        return Ok(());
    }

    match tracker.plan() {
        Some(plan) if json => println!("{}", serde_json::to_string_pretty(plan)?),
        _ => print!("{}", tracker.render()),
    }
    Ok(())
}

/// 활성 플랜을 포기/완료하거나 단계 추가 후 결과 출력
pub fn edit_plan(config: &PocketConfig, edit: PlanEdit) -> anyhow::Result<()> {
    let mut tracker = plan_tracker(config);
    if tracker.resume()?.is_none() {
        bail!("no active plan");
    }

    match &edit {
        PlanEdit::Abandon(reason) => tracker.abandon(reason)?,
        PlanEdit::Complete(summary) => tracker.complete_self(summary.as_deref())?,
        PlanEdit::AddStep(step) => tracker.add_step(step)?,
    };
    debug!("Applied {:?}", edit);
    print!("{}", tracker.render());
    Ok(())
}

/// 저장된 컨텍스트 세션 목록
pub fn list_sessions(config: &PocketConfig, limit: usize) -> anyhow::Result<()> {
    let db = ContextDb::open(&config.data_dir())?;
    let sessions = db.sessions(limit, None)?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{:<28} {:<17} {:<7} {}", "ID", "Started", "Turns", "Summary");
    println!("{}", "-".repeat(80));
    for session in &sessions {
        println!("{}", session_row(session));
    }
    Ok(())
}

/// 세션의 턴 출력
pub fn show_history(config: &PocketConfig, session_id: &str, limit: Option<usize>) -> anyhow::Result<()> {
    let db = ContextDb::open(&config.data_dir())?;
    if db.session(session_id)?.is_none() {
        bail!("session not found: {}", session_id);
    }

    let turns = db.turns(session_id, limit)?;
    if turns.is_empty() {
        println!("No turns recorded.");
    }
    for turn in &turns {
        println!("{}\n", turn_block(turn));
    }
    if let Some(summary) = db.summary(session_id)? {
        println!("Summary: {}", summary);
    }
    Ok(())
}

fn session_row(session: &SessionRecord) -> String {
    let summary = session
        .summary
        .as_deref()
        .map(|s| truncate(s, 30))
        .unwrap_or_else(|| if session.ended_at.is_some() { "(ended)".into() } else { String::new() });
    format!(
        "{:<28} {:<17} {:<7} {}",
        session.id,
        local_time(&session.started_at),
        session.turn_count,
        summary
    )
}

fn turn_block(turn: &Turn) -> String {
    format!(
        "[{}] {}:\n{}",
        local_time(&turn.timestamp),
        turn.role.as_str().to_uppercase(),
        turn.content
    )
}

fn local_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// 프로세스 종료 코드 (0..=255)
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

/// Truncate a string for display
fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_chars {
        s
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
