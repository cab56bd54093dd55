//! Single-flight gate for create and restore operations.

use crate::events::{EngineEvent, EventBus};
use crate::utils::errors::{EngineError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Restore,
}

/// Backup an in-flight operation reads or writes, as `(game_id, backup_id)`
pub(crate) type BackupKey = (String, String);

#[derive(Debug)]
pub(crate) enum EngineState {
    Idle,
    Busy {
        operation: Operation,
        backup: Option<BackupKey>,
        cancel: CancellationToken,
    },
}

/// Owns the engine state; at most one operation holds it at a time
#[derive(Clone)]
pub(crate) struct OperationGate {
    state: Arc<Mutex<EngineState>>,
}

impl OperationGate {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move Idle to Busy, or fail with `Busy` leaving the state untouched
    pub fn try_begin(&self, operation: Operation, events: &EventBus, label: String) -> Result<OperationGuard> {
        let mut state = self.lock();
        if let EngineState::Busy { operation: current, .. } = &*state {
            debug!("Rejecting {:?}, {:?} in progress", operation, current);
            return Err(EngineError::Busy);
        }

        let cancel = CancellationToken::new();
        *state = EngineState::Busy {
            operation,
            backup: None,
            cancel: cancel.clone(),
        };

        Ok(OperationGuard {
            gate: self.clone(),
            events: events.clone(),
            label,
            cancel,
            announced: false,
            released: false,
        })
    }

    pub fn current(&self) -> Option<Operation> {
        match &*self.lock() {
            EngineState::Idle => None,
            EngineState::Busy { operation, .. } => Some(*operation),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    /// Whether the in-flight operation works on this backup
    pub fn is_using(&self, game_id: &str, backup_id: &str) -> bool {
        match &*self.lock() {
            EngineState::Busy {
                backup: Some((game, id)),
                ..
            } => game == game_id && id == backup_id,
            _ => false,
        }
    }

    /// Flag the in-flight operation; returns false when Idle
    pub fn cancel(&self) -> bool {
        match &*self.lock() {
            EngineState::Idle => false,
            EngineState::Busy { operation, cancel, .. } => {
                info!("Cancellation requested for {:?}", operation);
                cancel.cancel();
                true
            }
        }
    }

    fn set_backup(&self, key: BackupKey) {
        if let EngineState::Busy { backup, .. } = &mut *self.lock() {
            *backup = Some(key);
        }
    }

    fn release(&self) {
        *self.lock() = EngineState::Idle;
    }
}

impl Default for OperationGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the Busy state for one operation.
///
/// `complete` returns the engine to Idle, then publishes the outcome and the
/// one `operation:finished` event. Dropping an uncompleted guard (validation
/// failure, panicking worker) also returns to Idle; `finished` is published
/// only if the operation had been announced.
pub(crate) struct OperationGuard {
    gate: OperationGate,
    events: EventBus,
    label: String,
    cancel: CancellationToken,
    announced: bool,
    released: bool,
}

impl OperationGuard {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn track_backup(&self, game_id: &str, backup_id: &str) {
        self.gate.set_backup((game_id.to_string(), backup_id.to_string()));
    }

    /// Publish `operation:started`; from here on `finished` is guaranteed
    pub fn announce(&mut self) {
        info!("{}", self.label);
        self.events.publish(EngineEvent::OperationStarted {
            label: self.label.clone(),
        });
        self.announced = true;
    }

    pub fn complete(mut self, outcome: EngineEvent) {
        self.released = true;
        self.gate.release();
        self.events.publish(outcome);
        if self.announced {
            self.events.publish(EngineEvent::OperationFinished {
                label: self.label.clone(),
            });
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.gate.release();
        if self.announced {
            warn!("{} ended without completing", self.label);
            self.events.publish(EngineEvent::Error {
                message: format!("{} was aborted", self.label),
            });
            self.events.publish(EngineEvent::OperationFinished {
                label: self.label.clone(),
            });
        }
    }
}
