//! docmill-worker library interface
//!
//! Exposes the dispatch, orchestration, pipeline, and provider layers for
//! integration testing.

pub mod api;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::dispatch::InFlightSet;
use docmill_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for job lifecycle events
    pub event_bus: EventBus,
    /// Jobs currently being processed by this worker
    pub in_flight: InFlightSet,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, in_flight: InFlightSet) -> Self {
        Self {
            db,
            event_bus,
            in_flight,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    api::routes().with_state(state)
}
