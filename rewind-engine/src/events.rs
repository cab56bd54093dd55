//! Outcome notifications published by the engine.
//!
//! Events go out on a broadcast channel; collaborators (a UI, the CLI,
//! tests) subscribe and receive every event published after they joined.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Maximum number of queued events per subscriber
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    #[serde(rename = "backup:created", rename_all = "camelCase")]
    BackupCreated { game_id: String, backup_id: String },

    #[serde(rename = "backup:restored", rename_all = "camelCase")]
    BackupRestored { game_id: String, backup_id: String },

    #[serde(rename = "backup:deleted", rename_all = "camelCase")]
    BackupDeleted { game_id: String, backup_id: String },

    #[serde(rename = "backup:updated", rename_all = "camelCase")]
    BackupUpdated { game_id: String, backup_id: String },

    #[serde(rename = "backup:verified", rename_all = "camelCase")]
    BackupVerified {
        game_id: String,
        backup_id: String,
        valid: bool,
    },

    #[serde(rename = "operation:started")]
    OperationStarted { label: String },

    /// Sent exactly once per create/restore that got past validation
    #[serde(rename = "operation:finished")]
    OperationFinished { label: String },

    #[serde(rename = "operation:cancelled")]
    OperationCancelled { label: String },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Fan-out point for engine events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no subscribers is normal
    pub fn publish(&self, event: EngineEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!("Published event to {} subscriber(s)", count),
            Err(broadcast::error::SendError(event)) => {
                trace!("No subscribers for event {:?}", event)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::OperationStarted {
            label: "Creating backup".to_string(),
        });
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::OperationStarted { label: "x".into() });
        bus.publish(EngineEvent::OperationFinished { label: "x".into() });

        assert!(matches!(rx.try_recv(), Ok(EngineEvent::OperationStarted { .. })));
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::OperationFinished { .. })));
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::BackupVerified {
            game_id: "celeste".to_string(),
            backup_id: "1700000000000".to_string(),
            valid: false,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("backup:verified"));
        assert!(json.contains("\"gameId\":\"celeste\""));
        assert!(json.contains("\"valid\":false"));
    }
}
