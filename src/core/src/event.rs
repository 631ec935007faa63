use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Mirror progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorEvent {
    /// Event key (e.g., "unit.started", "platform.copied")
    pub key: EventKey,

    /// Unit the event belongs to
    pub unit: String,

    /// Free-form detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl MirrorEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            unit: unit.into(),
            detail: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Attach a detail message
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<MirrorEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: MirrorEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
