//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::reporter::{Stats, StatsReporter};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub reporter: Arc<StatsReporter>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(reporter: Arc<StatsReporter>) -> Self {
        Self {
            reporter,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub title: String,
    pub status: String,
    pub last_activity: Option<DateTime<Utc>>,
    pub accounts_processed: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub total_profit: Decimal,
    pub daily_tasks_completed: u64,
    pub upgrades_performed: u64,
    pub errors: u64,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.reporter.snapshot();
    let stats = snapshot.stats;

    Json(StatusResponse {
        title: snapshot.title,
        status: if snapshot.active { "ACTIVE" } else { "INACTIVE" }.into(),
        last_activity: snapshot.last_activity,
        accounts_processed: stats.accounts_processed,
        wins: stats.wins,
        losses: stats.losses,
        win_rate: snapshot.win_rate,
        total_profit: stats.total_profit,
        daily_tasks_completed: stats.daily_tasks_completed,
        upgrades_performed: stats.upgrades_performed,
        errors: stats.errors,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.reporter.stats())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
