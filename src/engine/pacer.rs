//! Cooperative suspension points.
//!
//! Every wait in the engine (retry backoff, the price-sampling window,
//! round countdowns, the inter-pass pause) goes through a `Pacer`, so
//! tests can run the whole loop without sleeping and assert on the
//! exact waits that would have happened.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait Pacer: Send + Sync {
    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production pacer backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Pacer that returns immediately and records every requested wait.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Count down `seconds` one second at a time.
pub async fn countdown_secs(pacer: &dyn Pacer, seconds: u64) {
    for remaining in (1..=seconds).rev() {
        debug!(remaining, "Waiting to continue");
        pacer.sleep(Duration::from_secs(1)).await;
    }
}

/// Count down `total` in one-minute ticks, stopping early when
/// `cancelled` reports true between ticks. Returns false if cancelled.
pub async fn countdown_minutes(
    pacer: &dyn Pacer,
    total: Duration,
    cancelled: impl Fn() -> bool,
) -> bool {
    let tick = Duration::from_secs(60);
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancelled() {
            return false;
        }
        info!(
            remaining_mins = remaining.as_secs().div_ceil(60),
            "Completed all accounts, waiting before next pass"
        );
        let step = remaining.min(tick);
        pacer.sleep(step).await;
        remaining -= step;
    }
    !cancelled()
}
