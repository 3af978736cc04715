//! Agent Context - 단계들이 공유하는 협력자 묶음
//!
//! ```text
//! AgentContext
//!   ├── session    : Mutex<SessionController>   (한 번에 명령 하나)
//!   ├── registry   : ProcessRegistry            (자체 잠금)
//!   ├── tracker    : Mutex<TaskTracker>         (동기 영속화)
//!   ├── context    : ContextStore               (SQLite)
//!   ├── generator  : dyn TextGenerator
//!   ├── policy     : CommandPolicy + dyn EscalationPolicy
//!   └── observer   : dyn Observer
//! ```

use pocket_context::ContextStore;
use pocket_foundation::{
    AgentSettings, ContextSettings, EscalationPolicy, Observer, StaticEscalation, TextGenerator,
};
use pocket_shell::{CommandPolicy, ProcessRegistry, SessionController};
use pocket_task::TaskTracker;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 시스템 지시문 (Interpret 단계)
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are a shell assistant working in the user's terminal.
Answer briefly. When you need to act, use fenced blocks:
- ```bash for commands to run in the current shell, one per line
- ```action for JSON actions: {\"type\": \"read_file\", \"path\": ...},
  write_file {path, content}, start_process {command},
  send_to_process {id, input, expect?}, terminate_process {id}
- ```plan for a numbered list of steps when the task needs several steps";

/// 흐름 설정
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub agent: AgentSettings,
    pub context: ContextSettings,
    pub system_instruction: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            agent: AgentSettings::default(),
            context: ContextSettings::default(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

/// 단계들이 공유하는 협력자
pub struct AgentContext {
    pub session: Mutex<SessionController>,
    pub registry: ProcessRegistry,
    pub tracker: parking_lot::Mutex<TaskTracker>,
    pub context: ContextStore,
    pub generator: Arc<dyn TextGenerator>,
    pub policy: CommandPolicy,
    pub escalation: Arc<dyn EscalationPolicy>,
    pub observer: Arc<dyn Observer>,
    pub settings: FlowSettings,
}

impl AgentContext {
    /// 필수 협력자로 생성, 나머지는 기본값
    pub fn new(
        session: SessionController,
        registry: ProcessRegistry,
        tracker: TaskTracker,
        context: ContextStore,
        generator: Arc<dyn TextGenerator>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let settings = FlowSettings::default();
        Self {
            session: Mutex::new(session),
            registry,
            tracker: parking_lot::Mutex::new(tracker),
            context,
            generator,
            policy: CommandPolicy::default(),
            escalation: Arc::new(StaticEscalation(settings.agent.allow_escalation)),
            observer,
            settings,
        }
    }

    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.escalation = Arc::new(StaticEscalation(settings.agent.allow_escalation));
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 설정값 대신 직접 권한 상승 판단
    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationPolicy>) -> Self {
        self.escalation = escalation;
        self
    }
}
