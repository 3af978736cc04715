//! Observer - 주입형 관찰 인터페이스
//!
//! 각 컴포넌트는 생성 시 `Arc<dyn Observer>` 를 받아 주요 사건을 알립니다.
//! 기본 구현(`TracingObserver`)은 그대로 `tracing` 으로 흘려보냅니다.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// 사건 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Completed,
    Failed,
    Warning,
}

/// 관찰된 사건
#[derive(Debug, Clone)]
pub struct ObservedEvent {
    /// 발생 컴포넌트 (session, registry, tracker, context, flow)
    pub component: &'static str,
    pub kind: EventKind,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
    pub at: DateTime<Utc>,
}

impl ObservedEvent {
    pub fn new(component: &'static str, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            component,
            kind,
            message: message.into(),
            fields: Vec::new(),
            at: Utc::now(),
        }
    }

    pub fn field(mut self, key: &'static str, value: impl ToString) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    fn fields_text(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 관찰자
pub trait Observer: Send + Sync {
    fn record(&self, event: ObservedEvent);
}

/// tracing 으로 전달
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record(&self, event: ObservedEvent) {
        let fields = event.fields_text();
        match event.kind {
            EventKind::Started => {
                tracing::debug!(component = event.component, "{} {}", event.message, fields)
            }
            EventKind::Completed => {
                tracing::info!(component = event.component, "{} {}", event.message, fields)
            }
            EventKind::Warning => {
                tracing::warn!(component = event.component, "{} {}", event.message, fields)
            }
            EventKind::Failed => {
                tracing::error!(component = event.component, "{} {}", event.message, fields)
            }
        }
    }
}

/// 아무것도 하지 않음
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn record(&self, _event: ObservedEvent) {}
}

/// 메모리에 쌓아두는 관찰자 (테스트용)
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl MemoryObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, component: &str, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.component == component && e.kind == kind)
            .count()
    }
}

impl Observer for MemoryObserver {
    fn record(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}

/// 기본 관찰자
pub fn default_observer() -> Arc<dyn Observer> {
    Arc::new(TracingObserver)
}
