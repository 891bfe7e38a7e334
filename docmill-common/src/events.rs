//! Event types for the DocMill worker
//!
//! Progress and lifecycle events are broadcast on an [`EventBus`] backed by
//! `tokio::sync::broadcast`. Slow subscribers lag and lose old events rather
//! than blocking the pipeline; these events are observability, not
//! correctness-bearing state.

use crate::db::models::JobStage;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// DocMill event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocmillEvent {
    /// A new job was persisted at PENDING and is runnable
    JobQueued {
        job_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A processing run entered a new stage
    JobProgress {
        job_id: Uuid,
        stage: JobStage,
        progress_pct: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job finished; `result_key` locates the FINAL_DOCUMENT artifact
    JobCompleted {
        job_id: Uuid,
        result_key: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job failed; refund (if any) has already been attempted
    JobFailed {
        job_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl DocmillEvent {
    /// Event type name for logging and serialized payloads
    pub fn event_type(&self) -> &'static str {
        match self {
            DocmillEvent::JobQueued { .. } => "JobQueued",
            DocmillEvent::JobProgress { .. } => "JobProgress",
            DocmillEvent::JobCompleted { .. } => "JobCompleted",
            DocmillEvent::JobFailed { .. } => "JobFailed",
        }
    }
}

/// Broadcast event bus shared across worker components
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DocmillEvent>,
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe; the receiver only sees events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<DocmillEvent> {
        self.tx.subscribe()
    }

    /// Emit without caring whether anyone is listening
    pub fn emit_lossy(&self, event: DocmillEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let job_id = Uuid::new_v4();
        bus.emit_lossy(DocmillEvent::JobQueued {
            job_id,
            timestamp: chrono::Utc::now(),
        });

        match rx.recv().await.unwrap() {
            DocmillEvent::JobQueued { job_id: got, .. } => assert_eq!(got, job_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(1);
        bus.emit_lossy(DocmillEvent::JobFailed {
            job_id: Uuid::new_v4(),
            error: "boom".to_string(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = DocmillEvent::JobCompleted {
            job_id: Uuid::new_v4(),
            result_key: "documents/x.html".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"JobCompleted\""));
    }
}
