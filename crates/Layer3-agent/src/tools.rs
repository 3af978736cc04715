//! Tools - Intent 실행
//!
//! ## 도구 집합
//! ```text
//! shell      → 명령 실행 + 대화형 프로세스
//! coding     → 파일 읽기/쓰기
//! integrated → 전부
//! ```
//!
//! ## 명령 실행 규칙
//! - `CommandPolicy` 가 금지한 명령은 실행하지 않음 (Blocked)
//! - 권한 상승 명령(sudo, su, passwd)은 `EscalationPolicy` 승인 시에만 실행
//! - 권한 거부로 실패하면 최대 `max_permission_attempts` 회까지 `sudo -n` 재시도
//!
//! 셸 재시작 실패만 에러로 돌려주고 나머지는 `IntentOutcome` 으로 표현합니다.

use crate::context::AgentContext;
use crate::intent::{Intent, IntentKind};
use crate::state::RequestKind;
use pocket_foundation::{Error, EventKind, ObservedEvent, Result};
use pocket_shell::{CommandOutcome, CommandRisk, ExecStatus, InteractionStatus};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// ToolSet
// ============================================================================

/// 요청 종류별 사용 가능한 도구
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSet {
    pub commands: bool,
    pub processes: bool,
    pub files: bool,
}

impl ToolSet {
    pub fn for_kind(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Shell => Self {
                commands: true,
                processes: true,
                files: false,
            },
            RequestKind::Coding => Self {
                commands: false,
                processes: false,
                files: true,
            },
            RequestKind::Integrated => Self {
                commands: true,
                processes: true,
                files: true,
            },
        }
    }

    pub fn allows(&self, intent: &Intent) -> bool {
        match intent.kind() {
            IntentKind::Command => self.commands,
            IntentKind::Process => self.processes,
            IntentKind::File => self.files,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.commands {
            names.push("command_runner");
        }
        if self.processes {
            names.push("process_registry");
        }
        if self.files {
            names.push("file_operator");
        }
        names
    }
}

// ============================================================================
// Outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Blocked,
    /// 선택된 도구 집합 밖
    Skipped,
    Cancelled,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "ok",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Blocked => "blocked",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

/// Intent 하나의 실행 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentOutcome {
    pub intent: Intent,
    pub status: OutcomeStatus,
    pub output: String,
    pub exit_code: Option<i32>,
    /// 실제 실행 횟수 (권한 재시도 포함)
    pub attempts: u32,
}

impl IntentOutcome {
    fn new(intent: &Intent, status: OutcomeStatus, output: impl Into<String>) -> Self {
        Self {
            intent: intent.clone(),
            status,
            output: output.into(),
            exit_code: None,
            attempts: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// 명령 한 번 (재시도 포함) 실행 결과
#[derive(Debug, Clone)]
pub struct CommandRun {
    pub status: OutcomeStatus,
    pub output: String,
    pub exit_code: Option<i32>,
    pub attempts: u32,
}

impl CommandRun {
    fn refused(status: OutcomeStatus, reason: String) -> Self {
        Self {
            status,
            output: reason,
            exit_code: None,
            attempts: 0,
        }
    }

    fn from_outcome(outcome: CommandOutcome, attempts: u32) -> Self {
        let status = match outcome.status {
            ExecStatus::Cancelled => OutcomeStatus::Cancelled,
            _ if outcome.success() => OutcomeStatus::Succeeded,
            _ => OutcomeStatus::Failed,
        };
        Self {
            status,
            output: outcome.output,
            exit_code: Some(outcome.exit_code),
            attempts,
        }
    }
}

fn permission_denied_regex() -> &'static Regex {
    static DENIED: OnceLock<Regex> = OnceLock::new();
    DENIED.get_or_init(|| {
        Regex::new(r"(?i)permission denied|operation not permitted|\bEACCES\b")
            .expect("built-in permission pattern")
    })
}

pub fn is_permission_denied(output: &str) -> bool {
    permission_denied_regex().is_match(output)
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Intent 를 협력자 호출로 바꿈
pub struct ToolDispatcher<'a> {
    ctx: &'a AgentContext,
    cancel: &'a CancellationToken,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(ctx: &'a AgentContext, cancel: &'a CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    pub async fn dispatch(&self, intent: &Intent, tools: &ToolSet) -> Result<IntentOutcome> {
        if !tools.allows(intent) {
            debug!("Skipping {:?}: not in tool set {:?}", intent.kind(), tools.names());
            return Ok(IntentOutcome::new(
                intent,
                OutcomeStatus::Skipped,
                "not available for this request",
            ));
        }
        if self.cancel.is_cancelled() {
            return Ok(IntentOutcome::new(intent, OutcomeStatus::Cancelled, ""));
        }

        let outcome = match intent {
            Intent::ExecuteCommand {
                command,
                timeout_secs,
            } => {
                let run = self
                    .run_command(command, timeout_secs.map(Duration::from_secs))
                    .await?;
                IntentOutcome {
                    intent: intent.clone(),
                    status: run.status,
                    output: run.output,
                    exit_code: run.exit_code,
                    attempts: run.attempts,
                }
            }
            Intent::ReadFile { path } => self.read_file(intent, path).await,
            Intent::WriteFile { path, content } => self.write_file(intent, path, content).await,
            Intent::StartProcess { command } => self.start_process(intent, command).await,
            Intent::SendToProcess { id, input, expect } => {
                self.send_to_process(intent, id, input, expect.as_deref())
                    .await
            }
            Intent::TerminateProcess { id } => match self.ctx.registry.terminate(id).await {
                Ok(termination) => IntentOutcome::new(
                    intent,
                    OutcomeStatus::Succeeded,
                    format!("{:?}", termination).to_lowercase(),
                ),
                Err(e) => IntentOutcome::new(intent, OutcomeStatus::Failed, e.to_string()),
            },
        };

        let kind = if outcome.succeeded() {
            EventKind::Completed
        } else {
            EventKind::Warning
        };
        self.ctx.observer.record(
            ObservedEvent::new("tools", kind, "dispatch")
                .field("intent", intent.describe())
                .field("status", outcome.status.as_str()),
        );
        Ok(outcome)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// 정책 검사 후 실행, 권한 거부 시 제한된 횟수만큼 `sudo -n` 재시도
    pub async fn run_command(&self, command: &str, timeout: Option<Duration>) -> Result<CommandRun> {
        let verdict = self.ctx.policy.check(command);
        match verdict.risk {
            CommandRisk::Forbidden => {
                warn!("Blocked command: {}", command);
                return Ok(CommandRun::refused(
                    OutcomeStatus::Blocked,
                    format!("blocked by policy ({})", verdict.matched_pattern.unwrap_or_default()),
                ));
            }
            CommandRisk::Privileged => {
                if !self.ctx.escalation.allow_escalation(command, 1).await {
                    info!("Privileged command not approved: {}", command);
                    return Ok(CommandRun::refused(
                        OutcomeStatus::Blocked,
                        "requires elevated privileges; not approved".to_string(),
                    ));
                }
            }
            CommandRisk::Safe => {}
        }

        let max_attempts = self.ctx.settings.agent.max_permission_attempts.max(1);
        let mut attempt = 1;
        let mut line = command.to_string();

        loop {
            let outcome = self.execute_line(&line, timeout).await?;
            let retry = attempt < max_attempts
                && outcome.status == ExecStatus::Completed
                && outcome.exit_code != 0
                && !line.starts_with("sudo ")
                && is_permission_denied(&outcome.output);

            if !retry || !self.ctx.escalation.allow_escalation(command, attempt).await {
                return Ok(CommandRun::from_outcome(outcome, attempt));
            }

            attempt += 1;
            line = format!("sudo -n {}", command);
            info!("Permission denied, retrying as: {} (attempt {})", line, attempt);
        }
    }

    async fn execute_line(&self, line: &str, timeout: Option<Duration>) -> Result<CommandOutcome> {
        let mut session = self.ctx.session.lock().await;
        session
            .execute_cancellable(line, timeout, self.cancel)
            .await
            .map_err(Error::from)
    }

    // ========================================================================
    // Processes
    // ========================================================================

    async fn start_process(&self, intent: &Intent, command: &str) -> IntentOutcome {
        if self.ctx.policy.check(command).risk != CommandRisk::Safe {
            return IntentOutcome::new(intent, OutcomeStatus::Blocked, "blocked by policy");
        }
        let cwd = self.working_dir().await;
        match self.ctx.registry.start_in(command, Some(cwd)).await {
            Ok(started) => {
                let output = if started.output.is_empty() {
                    format!("started {}", started.id)
                } else {
                    format!("started {}\n{}", started.id, started.output)
                };
                IntentOutcome::new(intent, OutcomeStatus::Succeeded, output)
            }
            Err(e) => IntentOutcome::new(intent, OutcomeStatus::Failed, e.to_string()),
        }
    }

    async fn send_to_process(
        &self,
        intent: &Intent,
        id: &str,
        input: &str,
        expect: Option<&str>,
    ) -> IntentOutcome {
        match self.ctx.registry.send(id, input, expect, None).await {
            Ok(interaction) => {
                let status = match interaction.status {
                    InteractionStatus::TimedOut | InteractionStatus::Exited => OutcomeStatus::Failed,
                    _ => OutcomeStatus::Succeeded,
                };
                IntentOutcome::new(intent, status, interaction.output)
            }
            Err(e) => IntentOutcome::new(intent, OutcomeStatus::Failed, e.to_string()),
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    async fn working_dir(&self) -> PathBuf {
        self.ctx.session.lock().await.current_directory().to_path_buf()
    }

    async fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir().await.join(path)
        }
    }

    async fn read_file(&self, intent: &Intent, path: &str) -> IntentOutcome {
        let full = self.resolve(path).await;
        let limit = self.ctx.settings.agent.max_read_bytes;
        match tokio::fs::read(&full).await {
            Ok(bytes) if bytes.len() > limit => {
                let mut text = String::from_utf8_lossy(&bytes[..limit]).into_owned();
                text.push_str(&format!("\n... (truncated, {} bytes total)", bytes.len()));
                IntentOutcome::new(intent, OutcomeStatus::Succeeded, text)
            }
            Ok(bytes) => IntentOutcome::new(
                intent,
                OutcomeStatus::Succeeded,
                String::from_utf8_lossy(&bytes).into_owned(),
            ),
            Err(e) => IntentOutcome::new(
                intent,
                OutcomeStatus::Failed,
                format!("{}: {}", full.display(), e),
            ),
        }
    }

    async fn write_file(&self, intent: &Intent, path: &str, content: &str) -> IntentOutcome {
        let full = self.resolve(path).await;
        let result = async {
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await
        }
        .await;

        match result {
            Ok(()) => IntentOutcome::new(
                intent,
                OutcomeStatus::Succeeded,
                format!("wrote {} bytes to {}", content.len(), full.display()),
            ),
            Err(e) => IntentOutcome::new(
                intent,
                OutcomeStatus::Failed,
                format!("{}: {}", full.display(), e),
            ),
        }
    }
}
