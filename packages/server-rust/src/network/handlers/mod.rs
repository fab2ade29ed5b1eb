//! HTTP handlers of the health endpoint.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::uow::UnitOfWork;

/// Shared state passed to handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub shutdown: Arc<ShutdownController>,
    /// Source of the open transaction count; absent when the endpoint runs
    /// without a pipeline.
    pub uow: Option<Arc<UnitOfWork>>,
    pub instance_id: i64,
    pub start_time: Instant,
}
