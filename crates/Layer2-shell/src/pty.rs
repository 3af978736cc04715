//! PTY process - expect 스타일 동기화 엔진
//!
//! portable-pty 로 띄운 프로세스 하나를 감쌉니다.
//!
//! - 전용 reader 스레드가 master 에서 읽은 바이트를 unbounded 채널로 넘김
//! - `expect` 는 누적 버퍼에 정규식이 맞을 때까지 비동기로 기다림
//! - 채널이 닫히면 end-of-stream (EOF)
//!
//! 세션 컨트롤러와 프로세스 레지스트리가 모두 이 타입 위에 올라갑니다.

use crate::error::{Result, ShellError};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use regex::bytes::Regex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Ctrl-C
pub const INTERRUPT: u8 = 0x03;

/// exit 상태 폴링 간격
const EXIT_POLL: Duration = Duration::from_millis(25);

/// 종료 신호
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

/// PTY 프로세스 spawn 옵션
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
}

impl SpawnOptions {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            rows: 24,
            cols: 200,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    /// 자식 프로세스가 보게 될 환경 (상속 + 덮어쓰기)
    pub fn effective_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(self.env.clone());
        env
    }
}

/// expect 결과
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectOutcome {
    /// 패턴 발견. `before` 는 매치 이전 출력
    Matched { before: String, matched: String },
    /// 패턴 전에 스트림 종료
    Eof { output: String },
    /// 시간 초과. 그때까지 쌓인 출력
    Timeout { output: String },
}

impl ExpectOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    /// 매치 포함 전체 출력
    pub fn text(&self) -> String {
        match self {
            Self::Matched { before, matched } => format!("{}{}", before, matched),
            Self::Eof { output } | Self::Timeout { output } => output.clone(),
        }
    }
}

/// PTY 위에서 동작하는 프로세스
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: Vec<u8>,
    eof: bool,
    pid: Option<u32>,
    label: String,
}

impl PtyProcess {
    /// PTY 를 열고 프로세스를 띄움
    pub fn spawn(options: &SpawnOptions) -> Result<Self> {
        let label = options.program.clone();
        let size = PtySize {
            rows: options.rows,
            cols: options.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| ShellError::startup(&label, format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&options.program);
        cmd.args(&options.args);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ShellError::startup(&label, e))?;
        // slave 를 닫아야 자식 종료 시 reader 가 EOF 를 받음
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ShellError::startup(&label, format!("failed to clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ShellError::startup(&label, format!("failed to take writer: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(reader, tx, label.clone())?;

        let pid = child.process_id();
        debug!("Spawned {} on PTY (pid {:?})", label, pid);

        Ok(Self {
            master: pair.master,
            writer,
            child,
            rx,
            buffer: Vec::new(),
            eof: false,
            pid,
            label,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 스트림 종료를 관측했는지
    pub fn at_eof(&self) -> bool {
        self.eof
    }

    // ========================================================================
    // Write
    // ========================================================================

    /// 텍스트 + 개행 전송
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        trace!("{} <- {:?}", self.label, text);
        Ok(())
    }

    /// 제어 문자 전송 (예: Ctrl-C)
    pub fn send_control(&mut self, byte: u8) -> Result<()> {
        self.writer.write_all(&[byte])?;
        self.writer.flush()?;
        Ok(())
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// 패턴이 나올 때까지 대기
    ///
    /// 매치된 지점까지 버퍼에서 소비하고, 나머지는 다음 호출을 위해 남깁니다.
    /// 타임아웃이나 EOF 에서는 쌓인 출력을 모두 돌려줍니다.
    pub async fn expect(&mut self, pattern: &Regex, timeout: Duration) -> ExpectOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let (start, end) = (m.start(), m.end());
                let before = clean_output(&self.buffer[..start]);
                let matched = clean_output(&self.buffer[start..end]);
                self.buffer.drain(..end);
                return ExpectOutcome::Matched { before, matched };
            }

            if self.eof {
                return ExpectOutcome::Eof {
                    output: self.take_buffer(),
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return ExpectOutcome::Timeout {
                    output: self.take_buffer(),
                };
            }

            match tokio::time::timeout(deadline - now, self.rx.recv()).await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.eof = true,
                Err(_) => {}
            }
        }
    }

    /// `window` 동안 들어오는 출력을 모음 (패턴 없이)
    pub async fn drain(&mut self, window: Duration) -> String {
        let deadline = Instant::now() + window;

        while !self.eof {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match tokio::time::timeout(deadline - now, self.rx.recv()).await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.eof = true,
                Err(_) => break,
            }
        }

        self.take_buffer()
    }

    /// 이미 도착한 출력만 즉시 수거
    pub fn drain_ready(&mut self) -> String {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
        self.take_buffer()
    }

    fn take_buffer(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        clean_output(&bytes)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 프로세스가 아직 살아 있는지
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// 종료 코드 (아직 실행 중이면 None)
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    /// `timeout` 안에 종료되기를 기다림
    pub async fn wait_exit(&mut self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.exit_code() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }

    /// 프로세스 그룹에 신호 전달
    #[cfg(unix)]
    pub fn signal(&mut self, signal: Signal) -> Result<()> {
        let Some(pid) = self.pid else {
            return self.kill();
        };
        let sig = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // PTY 자식은 세션 리더라 pid == pgid
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // 이미 사라짐
            return Ok(());
        }
        Err(ShellError::Io(err))
    }

    #[cfg(not(unix))]
    pub fn signal(&mut self, _signal: Signal) -> Result<()> {
        self.kill()
    }

    /// 강제 종료
    pub fn kill(&mut self) -> Result<()> {
        if self.is_alive() {
            self.child.kill()?;
        }
        Ok(())
    }

    /// 터미널 크기 변경
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ShellError::Io(std::io::Error::other(e.to_string())))
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to kill {} on drop: {}", self.label, e);
            }
        }
    }
}

/// blocking read 를 전용 스레드에서 수행
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    label: String,
) -> Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-reader-{}", label))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // Linux 에서 slave 가 모두 닫히면 EIO
                    Err(_) => break,
                }
            }
            trace!("PTY reader for {} finished", label);
        })
        .map(|_| ())
        .map_err(ShellError::Io)
}

/// ANSI 제거 + 개행 정규화
pub fn clean_output(bytes: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(bytes);
    String::from_utf8_lossy(&stripped)
        .replace("\r\n", "\n")
        .replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output() {
        let raw = b"\x1b[32mgreen\x1b[0m text\r\nnext\r\n";
        assert_eq!(clean_output(raw), "green text\nnext\n");
    }

    #[test]
    fn test_expect_outcome_text() {
        let outcome = ExpectOutcome::Matched {
            before: "hello ".into(),
            matched: "world".into(),
        };
        assert!(outcome.is_match());
        assert_eq!(outcome.text(), "hello world");
    }

    #[test]
    fn test_spawn_options_env() {
        let options = SpawnOptions::new("sh").env("TERM", "dumb").args(["-c", "true"]);
        assert_eq!(options.args, vec!["-c", "true"]);
        assert_eq!(options.effective_env()["TERM"], "dumb");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_expect_and_eof() {
        let options = SpawnOptions::new("sh").args(["-c", "echo ready; sleep 0.2; echo done"]);
        let mut process = PtyProcess::spawn(&options).unwrap();

        let ready = Regex::new("ready").unwrap();
        let outcome = process.expect(&ready, Duration::from_secs(5)).await;
        assert!(outcome.is_match());

        let never = Regex::new("never-printed").unwrap();
        let outcome = process.expect(&never, Duration::from_secs(5)).await;
        match outcome {
            ExpectOutcome::Eof { output } => assert!(output.contains("done")),
            other => panic!("expected EOF, got {:?}", other),
        }
        assert_eq!(process.wait_exit(Duration::from_secs(2)).await, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_expect_timeout_keeps_process() {
        let options = SpawnOptions::new("cat");
        let mut process = PtyProcess::spawn(&options).unwrap();

        let pattern = Regex::new("nothing").unwrap();
        let outcome = process.expect(&pattern, Duration::from_millis(200)).await;
        assert!(matches!(outcome, ExpectOutcome::Timeout { .. }));
        assert!(process.is_alive());

        process.signal(Signal::Kill).unwrap();
        assert!(process.wait_exit(Duration::from_secs(2)).await.is_some());
    }
}
