//! VESPA Sync & Statistics Pipeline
//!
//! A one-way ETL pipeline that ingests VESPA scores and questionnaire
//! responses from a source CRM into an analytical warehouse and maintains
//! the derived school/national statistics a downstream dashboard reads.

use sqlx::PgPool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
#[cfg(test)]
mod tests;
pub mod utils;

pub use config::Config;
pub use services::{Aggregator, Linker, Loader, RefreshService, SourceCrmClient, SyncOrchestrator};

/// Application shared state.
///
/// All services are wrapped in `Arc` for cheap cloning across Axum handlers;
/// the same pool backs both the warehouse writes the orchestrator makes and
/// the read-only lookups the HTTP handlers make.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub refresh_service: Arc<RefreshService>,
    pub refresh_bearer_token: String,
}
