//! Interactive process registry
//!
//! 필요할 때 띄우는 대화형 보조 프로세스(REPL, `cat`, dev 서버 등)를
//! id 로 관리합니다.
//!
//! - id → entry 맵은 자체 RwLock, entry 마다 별도 Mutex (entry 간 잠금 없음)
//! - send/peek 는 패턴 또는 시간 창으로 동기화
//! - terminate 는 Ctrl-C → SIGTERM → SIGKILL 순서로 단계적 종료

use crate::error::{Result, ShellError};
use crate::pty::{ExpectOutcome, PtyProcess, Signal, SpawnOptions, INTERRUPT};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use pocket_foundation::{EventKind, ObservedEvent, Observer, ProcessSettings};
use regex::bytes::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 레지스트리 타이밍
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 시작 직후 출력 수집 시간
    pub settle: Duration,
    /// 종료 단계 사이 유예
    pub grace: Duration,
    /// 패턴 없는 send / peek 기본 읽기 시간
    pub drain: Duration,
    /// expect 기본 타임아웃
    pub expect_timeout: Duration,
    pub rows: u16,
    pub cols: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_settings(&ProcessSettings::default())
    }
}

impl RegistryConfig {
    pub fn from_settings(settings: &ProcessSettings) -> Self {
        Self {
            settle: settings.settle(),
            grace: settings.grace(),
            drain: settings.drain(),
            expect_timeout: settings.expect_timeout(),
            rows: 24,
            cols: 200,
        }
    }
}

/// send / peek 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionStatus {
    /// 패턴 발견
    Matched,
    /// 시간 창 동안 읽음
    Drained,
    /// 새 출력 없음, 마지막 출력 재사용
    Unchanged,
    /// 패턴 대기 시간 초과
    TimedOut,
    /// 프로세스 종료
    Exited,
}

/// send / peek 결과
#[derive(Debug, Clone)]
pub struct Interaction {
    pub output: String,
    pub status: InteractionStatus,
}

/// 시작 결과
#[derive(Debug, Clone)]
pub struct StartedProcess {
    pub id: String,
    /// settle 창 동안 수집한 출력
    pub output: String,
}

/// 종료 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AlreadyExited,
    Interrupted,
    Terminated,
    Killed,
}

/// 프로세스 정보 스냅샷
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub last_output: String,
    pub alive: bool,
}

/// 레지스트리 entry
struct ProcessEntry {
    id: String,
    command: String,
    started_at: DateTime<Utc>,
    last_output: String,
    alive: bool,
    pty: PtyProcess,
}

impl ProcessEntry {
    fn refresh_liveness(&mut self) -> bool {
        if self.alive && (!self.pty.is_alive() || self.pty.at_eof()) {
            self.alive = false;
        }
        self.alive
    }

    fn info(&mut self) -> ProcessInfo {
        let alive = self.refresh_liveness();
        ProcessInfo {
            id: self.id.clone(),
            command: self.command.clone(),
            started_at: self.started_at,
            last_output: self.last_output.clone(),
            alive,
        }
    }
}

/// 대화형 프로세스 레지스트리
pub struct ProcessRegistry {
    processes: Arc<RwLock<HashMap<String, Arc<Mutex<ProcessEntry>>>>>,
    config: RegistryConfig,
    observer: Arc<dyn Observer>,
}

impl ProcessRegistry {
    pub fn new(config: RegistryConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            config,
            observer,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// 프로세스 시작 (현재 디렉토리)
    pub async fn start(&self, command: &str) -> Result<StartedProcess> {
        self.start_in(command, None).await
    }

    /// 지정 디렉토리에서 프로세스 시작
    ///
    /// settle 창 동안의 초기 출력을 함께 돌려줍니다.
    pub async fn start_in(&self, command: &str, cwd: Option<PathBuf>) -> Result<StartedProcess> {
        let argv = shlex::split(command)
            .ok_or_else(|| ShellError::InvalidCommand(format!("unbalanced quotes: {}", command)))?;
        let Some((program, args)) = argv.split_first() else {
            return Err(ShellError::InvalidCommand("empty command".to_string()));
        };

        let mut options = SpawnOptions::new(program.clone())
            .args(args.iter().cloned())
            .size(self.config.rows, self.config.cols)
            .env("TERM", "dumb");
        if let Some(cwd) = cwd {
            options = options.cwd(cwd);
        }

        let mut pty = match PtyProcess::spawn(&options) {
            Ok(pty) => pty,
            Err(e) => {
                self.observer.record(
                    ObservedEvent::new("registry", EventKind::Failed, "start")
                        .field("command", command)
                        .field("error", &e),
                );
                return Err(e);
            }
        };

        let output = pty.drain(self.config.settle).await;
        let id = self.fresh_id().await;
        let alive = pty.is_alive() && !pty.at_eof();

        let entry = ProcessEntry {
            id: id.clone(),
            command: command.to_string(),
            started_at: Utc::now(),
            last_output: output.clone(),
            alive,
            pty,
        };
        self.processes
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(entry)));

        info!("Started interactive process {}: {}", id, command);
        self.observer.record(
            ObservedEvent::new("registry", EventKind::Started, "start")
                .field("id", &id)
                .field("command", command),
        );

        Ok(StartedProcess { id, output })
    }

    async fn fresh_id(&self) -> String {
        let processes = self.processes.read().await;
        loop {
            let id = format!("proc_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
            if !processes.contains_key(&id) {
                return id;
            }
        }
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<ProcessEntry>>> {
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ShellError::NotFound(id.to_string()))
    }

    // ========================================================================
    // Send / Peek
    // ========================================================================

    /// 텍스트 + 개행 전송
    ///
    /// `expect` 가 있으면 매치/EOF/타임아웃까지 대기하고 매치까지의 출력을 돌려줍니다.
    /// 없으면 drain 창 동안만 읽습니다.
    pub async fn send(
        &self,
        id: &str,
        text: &str,
        expect: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Interaction> {
        let pattern = match expect {
            Some(p) => Some(Regex::new(p).map_err(|e| ShellError::Pattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;

        if !entry.refresh_liveness() {
            return Err(ShellError::ProcessDead(id.to_string()));
        }
        if let Err(e) = entry.pty.send_line(text) {
            debug!("Write to {} failed: {}", id, e);
            entry.alive = false;
            return Err(ShellError::ProcessDead(id.to_string()));
        }

        let interaction = match pattern {
            Some(pattern) => {
                let timeout = timeout.unwrap_or(self.config.expect_timeout);
                match entry.pty.expect(&pattern, timeout).await {
                    outcome @ ExpectOutcome::Matched { .. } => Interaction {
                        output: outcome.text(),
                        status: InteractionStatus::Matched,
                    },
                    ExpectOutcome::Timeout { output } => {
                        warn!("Pattern wait on {} timed out after {:?}", id, timeout);
                        Interaction {
                            output,
                            status: InteractionStatus::TimedOut,
                        }
                    }
                    ExpectOutcome::Eof { output } => {
                        entry.alive = false;
                        Interaction {
                            output,
                            status: InteractionStatus::Exited,
                        }
                    }
                }
            }
            None => {
                let output = entry.pty.drain(timeout.unwrap_or(self.config.drain)).await;
                let status = if entry.refresh_liveness() {
                    InteractionStatus::Drained
                } else {
                    InteractionStatus::Exited
                };
                Interaction { output, status }
            }
        };

        if !interaction.output.is_empty() {
            entry.last_output = interaction.output.clone();
        }
        Ok(interaction)
    }

    /// 마지막 읽기 이후 출력 확인 (전송 없음)
    ///
    /// 새 출력이 없으면 마지막으로 본 출력을 `Unchanged` 로 돌려줍니다.
    pub async fn peek(&self, id: &str, timeout: Option<Duration>) -> Result<Interaction> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;

        let output = entry.pty.drain(timeout.unwrap_or(self.config.drain)).await;
        let alive = entry.refresh_liveness();

        if output.is_empty() {
            return Ok(Interaction {
                output: entry.last_output.clone(),
                status: if alive {
                    InteractionStatus::Unchanged
                } else {
                    InteractionStatus::Exited
                },
            });
        }

        entry.last_output = output.clone();
        Ok(Interaction {
            output,
            status: if alive {
                InteractionStatus::Drained
            } else {
                InteractionStatus::Exited
            },
        })
    }

    // ========================================================================
    // Terminate
    // ========================================================================

    /// 단계적 종료: Ctrl-C → SIGTERM → SIGKILL
    ///
    /// 종료가 확인되거나 강제 종료한 뒤 entry 를 제거합니다.
    pub async fn terminate(&self, id: &str) -> Result<Termination> {
        let entry = self.entry(id).await?;
        let termination = {
            let mut entry = entry.lock().await;
            self.escalate(&mut entry).await
        };

        self.processes.write().await.remove(id);

        info!("Terminated interactive process {} ({:?})", id, termination);
        self.observer.record(
            ObservedEvent::new("registry", EventKind::Completed, "terminate")
                .field("id", id)
                .field("stage", format!("{:?}", termination)),
        );
        Ok(termination)
    }

    async fn escalate(&self, entry: &mut ProcessEntry) -> Termination {
        let grace = self.config.grace;

        if !entry.pty.is_alive() {
            return Termination::AlreadyExited;
        }

        if entry.pty.send_control(INTERRUPT).is_ok() && entry.pty.wait_exit(grace).await.is_some()
        {
            return Termination::Interrupted;
        }

        debug!("{} ignored interrupt, sending SIGTERM", entry.id);
        if let Err(e) = entry.pty.signal(Signal::Terminate) {
            warn!("SIGTERM to {} failed: {}", entry.id, e);
        }
        if entry.pty.wait_exit(grace).await.is_some() {
            return Termination::Terminated;
        }

        warn!("{} ignored SIGTERM, sending SIGKILL", entry.id);
        if let Err(e) = entry.pty.signal(Signal::Kill) {
            warn!("SIGKILL to {} failed: {}", entry.id, e);
            if let Err(e) = entry.pty.kill() {
                warn!("Kill of {} failed: {}", entry.id, e);
            }
        }
        entry.pty.wait_exit(grace).await;
        Termination::Killed
    }

    /// 모든 프로세스 종료, 종료한 개수 반환
    pub async fn close_all(&self) -> usize {
        let ids: Vec<String> = self.processes.read().await.keys().cloned().collect();
        let results = join_all(ids.iter().map(|id| self.terminate(id))).await;
        results.into_iter().filter(|r| r.is_ok()).count()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// 전체 스냅샷
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let entries: Vec<_> = self.processes.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(entry.lock().await.info());
        }
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    /// 스스로 종료한 프로세스 제거
    pub async fn reap(&self) -> Vec<String> {
        let entries: Vec<_> = self
            .processes
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, entry) in entries {
            if !entry.lock().await.refresh_liveness() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut processes = self.processes.write().await;
            for id in &dead {
                processes.remove(id);
            }
        }
        dead
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.processes.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.processes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processes.read().await.is_empty()
    }
}
