//! Event system for the presentation layer
//!
//! In-process broadcast bus for stage-change and log-line notifications.
//! Events are one-way and never part of control flow: if nobody subscribes
//! they are dropped without blocking the publish run.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::PublishStage;

pub type EventReceiver = broadcast::Receiver<Event>;

/// Broadcast bus for distributing progress events
///
/// Uses `tokio::sync::broadcast` for multi-subscriber support. Lagging
/// subscribers drop oldest events; emitters never block.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the specified per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers (non-blocking, drop if none)
    pub fn emit(&self, event: Event) {
        // send() errs when no receivers exist, which is fine here
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted during publish runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The scheduler moved to a new publish stage
    StageChanged {
        stage: PublishStage,
        message: String,
        cancellable: bool,
    },

    /// Free-form progress line for the presentation layer
    LogLine { message: String },

    /// One run finished; `published` counts confirmed publishes
    RunCompleted { job_id: Option<String>, published: u32 },

    /// One run failed
    RunFailed {
        job_id: Option<String>,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_change_emission() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.emit(Event::StageChanged {
            stage: PublishStage::GeneratingContent,
            message: "generating article".to_string(),
            cancellable: true,
        });

        match receiver.recv().await.unwrap() {
            Event::StageChanged {
                stage,
                message,
                cancellable,
            } => {
                assert_eq!(stage, PublishStage::GeneratingContent);
                assert_eq!(message, "generating article");
                assert!(cancellable);
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_events() {
        let bus = EventBus::new(10);
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();

        bus.emit(Event::LogLine {
            message: "hello".to_string(),
        });

        assert!(matches!(r1.recv().await.unwrap(), Event::LogLine { .. }));
        assert!(matches!(r2.recv().await.unwrap(), Event::LogLine { .. }));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_block() {
        let bus = EventBus::new(10);
        bus.emit(Event::RunCompleted {
            job_id: None,
            published: 1,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_serialization() {
        let event = Event::StageChanged {
            stage: PublishStage::Publishing,
            message: "posting".to_string(),
            cancellable: false,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("stage_changed"));
        assert!(json.contains("publishing"));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Event::StageChanged { cancellable: false, .. }));
    }
}
