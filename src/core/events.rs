//! In-process notifier for production log changes
//!
//! [`LogEvents`] wraps a `tokio::sync::broadcast` channel so any number of
//! listeners can observe changes made through the
//! [`Store`](crate::core::store::Store). The CLI drains it after each command.
//! Sending and `try_recv` are synchronous, so no runtime is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::identity::{
    ProductionLogId, ProductionLogStepId, SerializablePartId, WorkInstructionId,
};
use crate::entities::traceability::PartOperation;

/// A change made through the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    LogCreated {
        log: ProductionLogId,
    },
    LogSaved {
        log: ProductionLogId,
    },
    LogSubmitted {
        log: ProductionLogId,
        confirmed_shortfall: bool,
    },
    LogDeleted {
        log: ProductionLogId,
    },
    AttemptRecorded {
        log: ProductionLogId,
        step: ProductionLogStepId,
        success: Option<bool>,
    },
    StepUnselected {
        log: ProductionLogId,
        step: ProductionLogStepId,
    },
    PartRecorded {
        log: ProductionLogId,
        part: SerializablePartId,
        operation: PartOperation,
    },
    WorkInstructionVersioned {
        chain: WorkInstructionId,
        version: WorkInstructionId,
    },
    WorkInstructionActivated {
        chain: WorkInstructionId,
        version: WorkInstructionId,
    },
    WorkInstructionDeactivated {
        chain: WorkInstructionId,
        version: WorkInstructionId,
    },
}

/// An event with the time it was published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Default buffer capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out notifier
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct LogEvents {
    sender: broadcast::Sender<Envelope>,
}

impl LogEvents {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers see `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. No subscribers is not an error.
    pub fn publish(&self, event: LogEvent) {
        tracing::trace!(?event, "publishing log event");
        let _ = self.sender.send(Envelope {
            at: Utc::now(),
            event,
        });
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LogEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Drain whatever is buffered for a receiver without blocking
pub fn drain(rx: &mut broadcast::Receiver<Envelope>) -> Vec<LogEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(envelope) => events.push(envelope.event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "log event receiver lagged");
            }
            Err(_) => break,
        }
    }
    events
}
