//! # pocket-shell
//!
//! 운영체제 프로세스를 직접 다루는 유일한 레이어입니다.
//!
//! - `pty`: PTY 프로세스 + expect 스타일 동기화
//! - `session`: 메인 셸 세션 (명령 하나씩 동기 실행)
//! - `registry`: 대화형 보조 프로세스 (send / peek / 단계적 종료)
//! - `policy`: 명령어 텍스트 패턴 검사
//!
//! ```text
//! SessionController ──┐
//!                     ├── PtyProcess ── portable-pty ── reader thread ── mpsc
//! ProcessRegistry ────┘
//! ```

pub mod error;
pub mod policy;
pub mod pty;
pub mod registry;
pub mod session;

pub use error::{Result, ShellError};
pub use policy::{CommandPolicy, CommandRisk, PolicyVerdict};
pub use pty::{clean_output, ExpectOutcome, PtyProcess, Signal, SpawnOptions};
pub use registry::{
    Interaction, InteractionStatus, ProcessInfo, ProcessRegistry, RegistryConfig,
    StartedProcess, Termination,
};
pub use session::{
    is_directory_change, CommandOutcome, ExecStatus, SessionController, SessionOptions,
    ShellKind, EXIT_CANCELLED, EXIT_TIMEOUT, EXIT_UNKNOWN,
};
