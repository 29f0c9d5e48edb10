//! Status and statistics reporting.
//!
//! The automation loop emits `EngineEvent`s; the reporter folds them into
//! process-lifetime counters and, on a fixed interval or on request,
//! renders a status snapshot and hands it to a `StatusChannel`. Delivery
//! failures are logged and never reach the loop.
//!
//! `EngineStatus` is the only state shared with the operator front-end:
//! an active flag read at the top of each pass and a last-activity stamp.

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::types::BoostKind;

// ---------------------------------------------------------------------------
// Engine status
// ---------------------------------------------------------------------------

/// Run state shared between the loop and the command listener.
#[derive(Debug, Default)]
pub struct EngineStatus {
    active: AtomicBool,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl EngineStatus {
    pub fn new(active: bool) -> Self {
        let status = Self::default();
        if active {
            status.start();
        }
        status
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.touch();
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stamp the current time as the last activity.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity.lock().ok().and_then(|last| *last)
    }
}

// ---------------------------------------------------------------------------
// Events and counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoundResult {
    Win,
    Lose,
}

impl fmt::Display for RoundResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundResult::Win => write!(f, "Win"),
            RoundResult::Lose => write!(f, "Lose"),
        }
    }
}

/// Everything the loop reports.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One prediction round finished.
    AccountUpdate {
        result: RoundResult,
        balance_change: Decimal,
    },
    DailyTask { completed: bool },
    Upgrade { kind: BoostKind },
    Error { context: String, message: String },
}

/// Process-lifetime aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    /// Incremented once per account-update event.
    pub accounts_processed: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_profit: Decimal,
    pub daily_tasks_completed: u64,
    pub upgrades_performed: u64,
    pub errors: u64,
}

impl Stats {
    pub fn apply(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::AccountUpdate {
                result,
                balance_change,
            } => {
                self.accounts_processed += 1;
                match result {
                    RoundResult::Win => {
                        self.wins += 1;
                        self.total_profit += *balance_change;
                    }
                    RoundResult::Lose => {
                        self.losses += 1;
                        self.total_profit -= *balance_change;
                    }
                }
            }
            EngineEvent::DailyTask { completed } => {
                if *completed {
                    self.daily_tasks_completed += 1;
                }
            }
            EngineEvent::Upgrade { .. } => self.upgrades_performed += 1,
            EngineEvent::Error { .. } => self.errors += 1,
        }
    }

    /// Win rate as a percentage. Returns 0.0 before any round.
    pub fn win_rate(&self) -> f64 {
        if self.accounts_processed == 0 {
            0.0
        } else {
            (self.wins as f64 / self.accounts_processed as f64) * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub title: String,
    pub active: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub win_rate: f64,
    pub stats: Stats,
}

impl StatusSnapshot {
    /// Operator-facing status text.
    pub fn render(&self) -> String {
        let (emoji, label) = if self.active {
            ("\u{1f7e2}", "Active")
        } else {
            ("\u{1f534}", "Inactive")
        };
        let last = self
            .last_activity
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "No recent activity".to_string());

        format!(
            "{title} Status Update\n\n\
             {emoji} Bot Status: {label}\n\
             Last Activity: {last}\n\n\
             \u{1f4ca} Overall Statistics:\n\
             Total Accounts Processed: {processed}\n\
             Wins: {wins} | Losses: {losses}\n\
             Win Rate: {rate:.2}%\n\
             Total Profit: {profit} points\n\n\
             \u{1f504} Daily Tasks Complete: {daily}\n\
             Upgrades Performed: {upgrades}",
            title = self.title,
            processed = self.stats.accounts_processed,
            wins = self.stats.wins,
            losses = self.stats.losses,
            rate = self.win_rate,
            profit = self.stats.total_profit.normalize(),
            daily = self.stats.daily_tasks_completed,
            upgrades = self.stats.upgrades_performed,
        )
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Outbound messaging channel for status text.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<()>;
}

pub struct StatsReporter {
    title: String,
    stats: Mutex<Stats>,
    status: Arc<EngineStatus>,
    channel: Option<Arc<dyn StatusChannel>>,
}

impl StatsReporter {
    pub fn new(
        title: impl Into<String>,
        status: Arc<EngineStatus>,
        channel: Option<Arc<dyn StatusChannel>>,
    ) -> Self {
        Self {
            title: title.into(),
            stats: Mutex::new(Stats::default()),
            status,
            channel,
        }
    }

    pub fn status(&self) -> &Arc<EngineStatus> {
        &self.status
    }

    pub fn record(&self, event: EngineEvent) {
        if let EngineEvent::Error { context, message } = &event {
            error!(context = %context, error = %message, "Engine error");
        }
        if let Ok(mut stats) = self.stats.lock() {
            stats.apply(&event);
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let stats = self.stats();
        StatusSnapshot {
            title: self.title.clone(),
            active: self.status.is_active(),
            last_activity: self.status.last_activity(),
            win_rate: stats.win_rate(),
            stats,
        }
    }

    /// Render and deliver a snapshot now.
    pub async fn publish(&self) {
        let snapshot = self.snapshot();
        info!(
            active = snapshot.active,
            processed = snapshot.stats.accounts_processed,
            wins = snapshot.stats.wins,
            losses = snapshot.stats.losses,
            profit = %snapshot.stats.total_profit,
            daily_tasks = snapshot.stats.daily_tasks_completed,
            upgrades = snapshot.stats.upgrades_performed,
            "Status snapshot"
        );

        if let Some(channel) = &self.channel {
            if let Err(e) = channel.deliver(&snapshot.render()).await {
                warn!(error = %e, "Failed to deliver status update");
            }
        }
    }

    /// Publish every `every` until shutdown is signalled.
    pub async fn run_periodic(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
