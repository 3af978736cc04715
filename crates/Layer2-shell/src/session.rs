//! Shell session controller
//!
//! 하나의 장수 셸 프로세스에 명령을 하나씩 동기적으로 실행합니다.
//!
//! ## 프로토콜
//!
//! 1. 셸을 PTY 위에 띄우고 고유한 프롬프트(`__POCKET_<id>__> `)로 바꿈
//! 2. 명령 + 개행을 쓰고 프롬프트가 다시 나올 때까지 대기
//! 3. 프롬프트 이전 출력이 명령 결과, 이어서 `echo $?` 로 종료 코드 조회
//!
//! 프롬프트 대입 문장은 따옴표로 둘로 쪼개서 보내므로 에코된 입력이
//! 프롬프트 패턴과 맞는 일은 없습니다.
//!
//! ## 실패 처리
//!
//! - 타임아웃: 124 반환, Ctrl-C 후 프롬프트 재동기화 (세션 유지)
//! - 취소: 130 반환, 타임아웃과 동일하게 복구
//! - EOF: 셸의 종료 코드(없으면 1) 반환, 다음 호출에서 재시작
//!
//! 한 세션에 `execute` 는 동시에 하나만 가능합니다 (`&mut self`).

use crate::error::{Result, ShellError};
use crate::pty::{ExpectOutcome, PtyProcess, SpawnOptions, INTERRUPT};
use chrono::Utc;
use pocket_foundation::{CommandRecord, EventKind, ObservedEvent, Observer, ShellSettings};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// 타임아웃 종료 코드 (coreutils `timeout` 과 동일)
pub const EXIT_TIMEOUT: i32 = 124;
/// 취소 종료 코드 (SIGINT)
pub const EXIT_CANCELLED: i32 = 130;
/// 종료 코드를 알 수 없을 때
pub const EXIT_UNKNOWN: i32 = 1;

/// 내부 왕복 (`echo $?`, `pwd`) 타임아웃
const INTERNAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Ctrl-C 후 프롬프트 재동기화 시간
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(3);
/// 셸 기본 프롬프트 대기 상한
const BANNER_TIMEOUT: Duration = Duration::from_secs(2);
/// EOF 후 종료 코드 수거 대기
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Shell kind / options
// ============================================================================

/// 지원하는 셸 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    Sh,
}

impl ShellKind {
    /// 프로그램 이름으로 추론 (`/usr/bin/zsh` → Zsh)
    pub fn from_program(program: &str) -> Self {
        let name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        match name {
            "bash" => ShellKind::Bash,
            "zsh" => ShellKind::Zsh,
            _ => ShellKind::Sh,
        }
    }

    /// rc 파일을 읽지 않게 하는 인자
    fn startup_args(&self) -> &'static [&'static str] {
        match self {
            ShellKind::Bash => &["--noprofile", "--norc"],
            ShellKind::Zsh => &["-f"],
            ShellKind::Sh => &[],
        }
    }

    /// 라인 편집/히스토리 확장을 끄고 프롬프트를 고정하는 한 줄
    fn setup_line(&self, marker: &str) -> String {
        // 에코된 입력이 프롬프트와 맞지 않도록 두 조각으로 쪼갬
        let (head, tail) = marker.split_at(marker.len() / 2);
        let ps1 = format!("PS1='{}''{}> '", head, tail);
        match self {
            ShellKind::Bash => format!(
                "stty -echo 2>/dev/null; unset HISTFILE; set +H; set +o emacs; set +o vi; \
                 PS2=''; PROMPT_COMMAND=''; {}",
                ps1
            ),
            ShellKind::Zsh => format!(
                "stty -echo 2>/dev/null; unset HISTFILE; unsetopt zle prompt_sp prompt_cr \
                 2>/dev/null; PS2=''; RPROMPT=''; {}",
                ps1
            ),
            ShellKind::Sh => format!("stty -echo 2>/dev/null; PS2=''; {}", ps1),
        }
    }
}

/// 세션 옵션
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub program: String,
    pub kind: ShellKind,
    /// 명령 기본 타임아웃
    pub timeout: Duration,
    /// 프롬프트 협상 타임아웃
    pub init_timeout: Duration,
    pub rows: u16,
    pub cols: u16,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl SessionOptions {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let kind = ShellKind::from_program(&program);
        Self {
            program,
            kind,
            timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(10),
            rows: 24,
            cols: 200,
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &ShellSettings) -> Self {
        let mut options = Self::new(settings.program.clone());
        options.timeout = settings.timeout();
        options.init_timeout = settings.init_timeout();
        options.rows = settings.rows;
        options.cols = settings.cols;
        options
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn spawn_options(&self) -> SpawnOptions {
        let mut spawn = SpawnOptions::new(self.program.clone())
            .args(self.kind.startup_args().iter().copied())
            .size(self.rows, self.cols)
            .env("TERM", "dumb");
        for (key, value) in &self.env {
            spawn = spawn.env(key.clone(), value.clone());
        }
        if let Some(cwd) = &self.cwd {
            spawn = spawn.cwd(cwd.clone());
        }
        spawn
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// 명령 종료 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// 프롬프트 복귀
    Completed,
    /// 타임아웃 (세션은 유지)
    TimedOut,
    /// 취소 토큰
    Cancelled,
    /// 셸 종료 (다음 호출에서 재시작)
    Ended,
}

/// 명령 실행 결과
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    pub status: ExecStatus,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status == ExecStatus::Completed && self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.status == ExecStatus::TimedOut
    }
}

/// 내부 왕복 결과
enum Exchange {
    Prompt(String),
    Timeout(String),
    Cancelled(String),
    Eof(String),
}

// ============================================================================
// Session Controller
// ============================================================================

/// 메인 셸 세션
pub struct SessionController {
    options: SessionOptions,
    process: Option<PtyProcess>,
    prompt: BytesRegex,
    marker: String,
    working_dir: PathBuf,
    env: HashMap<String, String>,
    history: Vec<CommandRecord>,
    observer: Arc<dyn Observer>,
}

impl SessionController {
    /// 셸을 띄우고 프롬프트를 협상
    ///
    /// spawn 실패나 `init_timeout` 안에 프롬프트가 보이지 않으면 `ShellError::Startup`.
    pub async fn initialize(options: SessionOptions, observer: Arc<dyn Observer>) -> Result<Self> {
        let marker = format!("__POCKET_{}__", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let prompt = BytesRegex::new(&regex::escape(&format!("{}> ", marker)))
            .map_err(|e| ShellError::startup(&options.program, e))?;

        let mut session = Self {
            env: options.spawn_options().effective_env(),
            working_dir: options
                .cwd
                .clone()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from("/")),
            options,
            process: None,
            prompt,
            marker,
            history: Vec::new(),
            observer,
        };
        session.start_shell().await?;
        Ok(session)
    }

    async fn start_shell(&mut self) -> Result<()> {
        let program = self.options.program.clone();
        self.observer.record(
            ObservedEvent::new("session", EventKind::Started, "initialize")
                .field("shell", &program),
        );

        let mut process = PtyProcess::spawn(&self.options.spawn_options())?;

        // 기본 프롬프트를 잠깐 기다렸다가 설정을 보냄
        let banner = BytesRegex::new(r"[$#%>]\s*$").map_err(|e| ShellError::startup(&program, e))?;
        let wait = self.options.init_timeout.min(BANNER_TIMEOUT);
        if let ExpectOutcome::Eof { output } = process.expect(&banner, wait).await {
            return Err(self.startup_failed(format!("shell exited during startup: {}", output.trim())));
        }

        process.send_line(&self.options.kind.setup_line(&self.marker))?;
        match process.expect(&self.prompt, self.options.init_timeout).await {
            ExpectOutcome::Matched { .. } => {}
            ExpectOutcome::Timeout { .. } => {
                return Err(self.startup_failed(format!(
                    "prompt not observed within {:?}",
                    self.options.init_timeout
                )));
            }
            ExpectOutcome::Eof { output } => {
                return Err(self.startup_failed(format!(
                    "shell exited during prompt setup: {}",
                    output.trim()
                )));
            }
        }

        self.process = Some(process);
        self.refresh_directory().await;

        info!(
            "Shell session ready: {} (cwd {})",
            program,
            self.working_dir.display()
        );
        self.observer.record(
            ObservedEvent::new("session", EventKind::Completed, "initialize")
                .field("shell", &program)
                .field("cwd", self.working_dir.display()),
        );
        Ok(())
    }

    fn startup_failed(&self, reason: String) -> ShellError {
        self.observer.record(
            ObservedEvent::new("session", EventKind::Failed, "initialize")
                .field("reason", &reason),
        );
        ShellError::startup(&self.options.program, reason)
    }

    /// 죽은 셸은 다시 띄움
    async fn ensure_ready(&mut self) -> Result<()> {
        let alive = match self.process.as_mut() {
            Some(process) => process.is_alive() && !process.at_eof(),
            None => false,
        };
        if !alive {
            info!("Reinitializing shell session ({})", self.options.program);
            self.process = None;
            self.start_shell().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// 명령 실행
    ///
    /// 셸 재시작이 필요한데 실패한 경우에만 `Err` 를 돌려줍니다.
    /// 타임아웃, EOF 는 `CommandOutcome` 의 상태로 표현됩니다.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome> {
        self.run(command, timeout, None).await
    }

    /// 취소 토큰과 경쟁하며 실행
    pub async fn execute_cancellable(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome> {
        self.run(command, timeout, Some(cancel)).await
    }

    async fn run(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<CommandOutcome> {
        if let Err(e) = self.ensure_ready().await {
            self.push_history(command, e.to_string(), EXIT_UNKNOWN);
            return Err(e);
        }

        let timeout = timeout.unwrap_or(self.options.timeout);
        let started = Instant::now();
        debug!("Executing: {} (timeout {:?})", command, timeout);
        self.observer.record(
            ObservedEvent::new("session", EventKind::Started, "execute").field("command", command),
        );

        let (output, exit_code, status) = match self.round_trip(command, timeout, cancel).await {
            Exchange::Prompt(output) => {
                let code = self.query_exit_status().await;
                if is_directory_change(command) {
                    self.refresh_directory().await;
                }
                (output, code, ExecStatus::Completed)
            }
            Exchange::Timeout(output) => {
                warn!("Command timed out after {:?}: {}", timeout, command);
                self.recover().await;
                (output, EXIT_TIMEOUT, ExecStatus::TimedOut)
            }
            Exchange::Cancelled(output) => {
                info!("Command cancelled: {}", command);
                self.recover().await;
                (output, EXIT_CANCELLED, ExecStatus::Cancelled)
            }
            Exchange::Eof(output) => {
                let code = self.reap().await;
                warn!("Shell ended while running '{}' (exit {})", command, code);
                (output, code, ExecStatus::Ended)
            }
        };

        self.push_history(command, output.clone(), exit_code);

        let kind = match status {
            ExecStatus::Completed => EventKind::Completed,
            ExecStatus::TimedOut | ExecStatus::Cancelled => EventKind::Warning,
            ExecStatus::Ended => EventKind::Failed,
        };
        self.observer.record(
            ObservedEvent::new("session", kind, "execute")
                .field("command", command)
                .field("exit_code", exit_code),
        );

        Ok(CommandOutcome {
            command: command.to_string(),
            output,
            exit_code,
            status,
            duration: started.elapsed(),
        })
    }

    fn push_history(&mut self, command: &str, output: String, exit_code: i32) {
        self.history.push(CommandRecord {
            command: command.to_string(),
            output,
            exit_code,
            timestamp: Utc::now(),
        });
    }

    /// 한 줄을 보내고 프롬프트까지 읽음
    async fn round_trip(
        &mut self,
        line: &str,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Exchange {
        let Some(process) = self.process.as_mut() else {
            return Exchange::Eof(String::new());
        };

        let stale = process.drain_ready();
        if !stale.is_empty() {
            trace!("Discarding stale shell output: {:?}", stale);
        }

        if let Err(e) = process.send_line(line) {
            warn!("Failed to write to shell: {}", e);
            return Exchange::Eof(String::new());
        }

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    outcome = process.expect(&self.prompt, timeout) => Some(outcome),
                    _ = token.cancelled() => None,
                }
            }
            None => Some(process.expect(&self.prompt, timeout).await),
        };

        match outcome {
            Some(ExpectOutcome::Matched { before, .. }) => Exchange::Prompt(strip_echo(&before, line)),
            Some(ExpectOutcome::Timeout { output }) => Exchange::Timeout(strip_echo(&output, line)),
            Some(ExpectOutcome::Eof { output }) => Exchange::Eof(strip_echo(&output, line)),
            None => Exchange::Cancelled(strip_echo(&process.drain_ready(), line)),
        }
    }

    /// `$?` 조회 (파싱 실패 시 1)
    async fn query_exit_status(&mut self) -> i32 {
        match self.round_trip("echo $?", INTERNAL_TIMEOUT, None).await {
            Exchange::Prompt(output) => parse_exit_status(&output),
            Exchange::Eof(_) => self.reap().await,
            _ => {
                self.recover().await;
                EXIT_UNKNOWN
            }
        }
    }

    /// `pwd` 로 작업 디렉토리 갱신
    async fn refresh_directory(&mut self) {
        match self.round_trip("pwd", INTERNAL_TIMEOUT, None).await {
            Exchange::Prompt(output) => {
                if let Some(line) = output.lines().rev().find(|l| l.starts_with('/')) {
                    self.working_dir = PathBuf::from(line.trim());
                }
            }
            Exchange::Eof(_) => {
                self.reap().await;
            }
            _ => self.recover().await,
        }
    }

    /// Ctrl-C 후 프롬프트 재동기화. 실패하면 셸을 버리고 다음 호출에서 재시작
    async fn recover(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };

        let resynced = match process.send_control(INTERRUPT) {
            Ok(()) => process.expect(&self.prompt, RECOVERY_TIMEOUT).await.is_match(),
            Err(_) => false,
        };

        if resynced {
            // 인터럽트가 만든 여분의 프롬프트 제거
            let _ = process.drain(Duration::from_millis(100)).await;
            debug!("Shell resynchronized after interrupt");
        } else {
            warn!("Shell did not return to prompt after interrupt, restarting on next call");
            if let Err(e) = process.kill() {
                warn!("Failed to kill unresponsive shell: {}", e);
            }
            self.process = None;
        }
    }

    /// EOF 후 종료 코드 수거
    async fn reap(&mut self) -> i32 {
        let code = match self.process.as_mut() {
            Some(process) => process.wait_exit(REAP_TIMEOUT).await,
            None => None,
        };
        self.process = None;
        code.unwrap_or(EXIT_UNKNOWN)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// 마지막으로 확인한 작업 디렉토리
    pub fn current_directory(&self) -> &Path {
        &self.working_dir
    }

    /// 전체 명령 기록 (호출 순서)
    pub fn history(&self) -> &[CommandRecord] {
        &self.history
    }

    /// 최근 `limit` 개 기록
    pub fn recent_history(&self, limit: usize) -> &[CommandRecord] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// spawn 시점의 환경변수
    pub fn environment(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn kind(&self) -> ShellKind {
        self.options.kind
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.as_mut().map(|p| p.is_alive()).unwrap_or(false)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// `exit` 전송 후 프로세스 해제 (이미 죽었어도 무시)
    pub async fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            if process.is_alive() {
                if let Err(e) = process.send_line("exit") {
                    debug!("Shell already gone on shutdown: {}", e);
                }
                if process.wait_exit(REAP_TIMEOUT).await.is_none() {
                    if let Err(e) = process.kill() {
                        warn!("Failed to kill shell on shutdown: {}", e);
                    }
                }
            }
        }
        self.observer
            .record(ObservedEvent::new("session", EventKind::Completed, "shutdown"));
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// 디렉토리 변경 형태 (`cd`, `pushd`, `popd`, `a && cd b`)
pub fn is_directory_change(command: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(^|[;&|]\s*)(cd|pushd|popd)(\s|$)").ok())
        .as_ref()
        .map(|re| re.is_match(command.trim()))
        .unwrap_or(false)
}

/// 종료 코드 파싱 (마지막 정수 줄, 없으면 1)
pub fn parse_exit_status(output: &str) -> i32 {
    output
        .lines()
        .rev()
        .find_map(|line| line.trim().parse::<i32>().ok())
        .unwrap_or(EXIT_UNKNOWN)
}

/// 에코가 남아 있으면 첫 줄의 입력을 제거하고 끝 개행 정리
fn strip_echo(output: &str, line: &str) -> String {
    let body = match output.strip_prefix(line) {
        Some(rest) => rest.strip_prefix('\n').unwrap_or(rest),
        None => output,
    };
    body.trim_end_matches('\n').to_string()
}
