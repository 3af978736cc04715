//! # pocket-foundation
//!
//! Foundation layer for PocketShell:
//! - Core: 외부 협력자 Trait (TextGenerator, EscalationPolicy) 및 공용 타입
//! - Config: 통합 설정 (PocketConfig, 글로벌 + 프로젝트 병합)
//! - Storage: JsonStore (설정, 플랜 기록)
//! - Observe: 주입형 Observer (기본은 tracing)
//! - Redact: 환경변수 마스킹
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Flow Orchestrator (Layer3-agent)                       │
//! │      │            │             │            │          │
//! │      ▼            ▼             ▼            ▼          │
//! │  Session      Process       Task Step     Context       │
//! │  Controller   Registry      Tracker       Store         │
//! │  (Layer2-shell)             (Layer2-task) (Layer2-context)
//! │      └──────────┴──────┬──────┴────────────┘            │
//! │                        ▼                                │
//! │        Foundation (Error, Config, Observer)             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod observe;
pub mod redact;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core (핵심 Trait 및 타입)
// ============================================================================
pub use core::{
    new_session_id, CommandRecord, DenyEscalation, EscalationPolicy, StaticEscalation,
    TextGenerator, Turn, TurnRole,
};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    AgentSettings, ContextSettings, PocketConfig, ProcessSettings, SecuritySettings,
    ShellSettings, StorageSettings, POCKET_CONFIG_FILE,
};

// ============================================================================
// Storage / Observe / Redact
// ============================================================================
pub use observe::{
    default_observer, EventKind, MemoryObserver, NullObserver, ObservedEvent, Observer,
    TracingObserver,
};
pub use redact::EnvRedactor;
pub use storage::JsonStore;
