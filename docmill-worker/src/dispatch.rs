//! Dispatch layer: dual-trigger job intake
//!
//! Two paths feed the same entry point: a push subscription on the "new job"
//! channel (low latency) and a fixed-interval poll over PENDING jobs
//! (durability against missed notifications). An in-memory in-flight set
//! deduplicates submissions within this worker process; the orchestrator's
//! atomic claim is what prevents double processing across workers.

use docmill_common::db;
use docmill_common::events::{DocmillEvent, EventBus};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::orchestrator::JobOrchestrator;

/// Push message contract on the new-job channel
#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "jobId")]
    job_id: String,
}

/// Bridge `JobQueued` bus events onto a raw push channel in the dispatch
/// payload contract.
///
/// Any intake running in this process announces new jobs on the typed event
/// bus; this adapter gives the dispatcher the same low-latency trigger an
/// external pub/sub channel would, without changing the push contract.
pub fn push_channel_from_bus(event_bus: &EventBus, capacity: usize) -> broadcast::Receiver<String> {
    let (tx, rx) = broadcast::channel(capacity);
    let mut events = event_bus.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DocmillEvent::JobQueued { job_id, .. }) => {
                    let payload =
                        json!({ "type": "NEW_JOB", "jobId": job_id }).to_string();
                    let _ = tx.send(payload);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Push bridge lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    rx
}

/// Job identifiers currently being processed by this worker instance
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent: returns `false` when the job is already in flight
    pub fn try_insert(&self, job_id: Uuid) -> bool {
        self.inner.lock().expect("in-flight set poisoned").insert(job_id)
    }

    pub fn remove(&self, job_id: Uuid) {
        self.inner.lock().expect("in-flight set poisoned").remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("in-flight set poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dual-trigger dispatcher
pub struct Dispatcher {
    pool: SqlitePool,
    orchestrator: Arc<JobOrchestrator>,
    in_flight: InFlightSet,
    poll_interval: Duration,
    poll_batch_size: u32,
}

impl Dispatcher {
    pub fn new(
        pool: SqlitePool,
        orchestrator: Arc<JobOrchestrator>,
        in_flight: InFlightSet,
        poll_interval_secs: u64,
        poll_batch_size: u32,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            in_flight,
            poll_interval: Duration::from_secs(poll_interval_secs),
            poll_batch_size,
        }
    }

    /// Run both intake paths until the process exits. The poll loop always
    /// runs; the push path is spawned only when a channel is provided.
    pub async fn run(self: Arc<Self>, push_rx: Option<broadcast::Receiver<String>>) {
        match push_rx {
            Some(rx) => {
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move { dispatcher.push_loop(rx).await });
            }
            None => {
                // Logged once, not per poll cycle
                tracing::warn!("Push channel unavailable, running in poll-only mode");
            }
        }

        self.poll_loop().await;
    }

    /// Consume push notifications; malformed payloads are logged and dropped
    async fn push_loop(&self, mut rx: broadcast::Receiver<String>) {
        loop {
            match rx.recv().await {
                Ok(payload) => match serde_json::from_str::<PushMessage>(&payload) {
                    Ok(message) if message.kind == "NEW_JOB" => {
                        match Uuid::parse_str(&message.job_id) {
                            Ok(job_id) => self.submit(job_id),
                            Err(_) => {
                                tracing::warn!(payload = %payload, "Push message has invalid jobId, dropping");
                            }
                        }
                    }
                    Ok(message) => {
                        tracing::warn!(kind = %message.kind, "Unknown push message type, dropping");
                    }
                    Err(e) => {
                        tracing::warn!(payload = %payload, error = %e, "Malformed push payload, dropping");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // The poll loop will pick up anything we missed
                    tracing::warn!(missed, "Push subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Logged once; poll-only from here on
                    tracing::warn!("Push channel closed, degrading to poll-only mode");
                    return;
                }
            }
        }
    }

    /// List the oldest PENDING jobs every interval and submit each
    async fn poll_loop(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match db::jobs::list_pending_jobs(&self.pool, self.poll_batch_size).await {
                Ok(job_ids) => {
                    for job_id in job_ids {
                        self.submit(job_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Pending-job poll failed");
                }
            }
        }
    }

    /// Common entry point for both intake paths. A duplicate submission is a
    /// no-op; an accepted one spawns a processing attempt.
    pub fn submit(&self, job_id: Uuid) {
        if !self.in_flight.try_insert(job_id) {
            tracing::debug!(job_id = %job_id, "Job already in flight, ignoring");
            return;
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.process_job(job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "Processing attempt errored");
            }
            in_flight.remove(job_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_set_deduplicates() {
        let set = InFlightSet::new();
        let id = Uuid::new_v4();

        assert!(set.try_insert(id));
        assert!(!set.try_insert(id));
        assert_eq!(set.len(), 1);

        set.remove(id);
        assert!(set.is_empty());
        assert!(set.try_insert(id));
    }

    #[test]
    fn push_message_contract_parses() {
        let payload = r#"{"type":"NEW_JOB","jobId":"8c4707f2-9e2f-4a3a-b7a1-0f62e8d0a001"}"#;
        let message: PushMessage = serde_json::from_str(payload).unwrap();
        assert_eq!(message.kind, "NEW_JOB");
        assert!(Uuid::parse_str(&message.job_id).is_ok());
    }

    #[test]
    fn malformed_push_payload_is_an_error_not_a_panic() {
        assert!(serde_json::from_str::<PushMessage>("{not json").is_err());
        assert!(serde_json::from_str::<PushMessage>(r#"{"type":"NEW_JOB"}"#).is_err());
    }

    #[tokio::test]
    async fn bus_bridge_emits_contract_payloads() {
        let bus = EventBus::new(8);
        let mut rx = push_channel_from_bus(&bus, 8);

        let job_id = Uuid::new_v4();
        // The bridge subscribes before returning, so this emit is seen
        bus.emit_lossy(DocmillEvent::JobQueued {
            job_id,
            timestamp: chrono::Utc::now(),
        });
        // Non-queue events must not cross the bridge
        bus.emit_lossy(DocmillEvent::JobFailed {
            job_id: Uuid::new_v4(),
            error: "x".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let payload = rx.recv().await.unwrap();
        let message: PushMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(message.kind, "NEW_JOB");
        assert_eq!(Uuid::parse_str(&message.job_id).unwrap(), job_id);

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "only JobQueued events may be forwarded"
        );
    }
}
