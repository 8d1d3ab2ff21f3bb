//! Sage Property Profiler
//!
//! Assembles a reconciled profile of a real-property parcel from many
//! independent external sources. Providers declare what context they
//! need and produce sourced field observations; a wave scheduler runs
//! them concurrently in dependency order, a merge policy picks one
//! observation per field, and the result is upserted monotonically into
//! per-category tables.

pub mod api;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use pipeline::Orchestrator;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub db: SqlitePool,
    pub startup_time: DateTime<Utc>,
}

/// Build the service router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/profile", post(api::profile::profile))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
