//! Prediction round engine.
//!
//! Plays an account's remaining rounds as a small state machine:
//!
//! ```text
//! Sampling ──► Submitting ──► (chances left) ──► Sampling
//!                   │
//!                   ├──► (reload stages left) ──► Replenishing ──► Sampling
//!                   │                                   │ refused
//!                   └──► Done ◄─────────────────────────┘
//! ```
//!
//! Sampling reads the ticker twice, `price_window` apart, and predicts
//! Sell when the price fell, Buy otherwise. Every transition back to
//! Sampling makes progress: either the server reported chances left, or a
//! reload was accepted. A refused reload ends the rounds.

use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::pacer::{countdown_secs, Pacer};
use crate::api::{ApiResult, GameApi};
use crate::reporter::{EngineEvent, RoundResult, StatsReporter};
use crate::types::{AccountIdentity, BoostKind, BoostState, Credential, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// Gap between the two price samples.
    pub price_window: Duration,
    /// Countdown between rounds while chances remain (seconds).
    pub between_rounds_secs: u64,
    /// Countdown after an accepted reload (seconds).
    pub after_reload_secs: u64,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            price_window: Duration::from_secs(4),
            between_rounds_secs: 1,
            after_reload_secs: 5,
        }
    }
}

/// Per-account tally of the rounds played.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundSummary {
    pub rounds: u32,
    pub wins: u32,
    pub losses: u32,
    pub reloads: u32,
    /// Sum of payouts won minus payouts lost.
    pub net: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundState {
    Sampling,
    Submitting(Direction),
    Replenishing,
    Done,
}

pub struct PredictionEngine<'a> {
    api: &'a dyn GameApi,
    pacer: &'a dyn Pacer,
    reporter: &'a StatsReporter,
    timing: RoundTiming,
}

impl<'a> PredictionEngine<'a> {
    pub fn new(
        api: &'a dyn GameApi,
        pacer: &'a dyn Pacer,
        reporter: &'a StatsReporter,
        timing: RoundTiming,
    ) -> Self {
        Self {
            api,
            pacer,
            reporter,
            timing,
        }
    }

    /// Play rounds until chances and reloads are exhausted.
    ///
    /// `reload` is the reload boost as seen at the start of the account;
    /// it is refreshed after every accepted reload.
    pub async fn run(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        mut reload: Option<BoostState>,
    ) -> ApiResult<RoundSummary> {
        let mut summary = RoundSummary::default();
        let mut state = RoundState::Sampling;

        loop {
            state = match state {
                RoundState::Sampling => {
                    let first = self.api.fetch_market_price().await?;
                    self.pacer.sleep(self.timing.price_window).await;
                    let second = self.api.fetch_market_price().await?;
                    let direction = Direction::from_prices(first, second);
                    debug!(%first, %second, %direction, "Sampled market price");
                    RoundState::Submitting(direction)
                }

                RoundState::Submitting(direction) => {
                    let account = self.api.fetch_account(credential, identity).await?;
                    info!(
                        account = %identity,
                        balance = account.balance_points,
                        forecast = %direction,
                        "Submitting prediction"
                    );

                    let outcome = self
                        .api
                        .submit_prediction(credential, identity, direction)
                        .await?;
                    let result = if outcome.won {
                        RoundResult::Win
                    } else {
                        RoundResult::Lose
                    };
                    let payout = outcome.payout();
                    info!(
                        account = %identity,
                        result = %result,
                        multiplier = %outcome.multiplier,
                        balance = outcome.balance_points,
                        receive = %payout,
                        old_price = %outcome.prev_price,
                        current_price = %outcome.current_price,
                        chances_left = outcome.num_chance,
                        "Prediction settled"
                    );

                    self.reporter.record(EngineEvent::AccountUpdate {
                        result,
                        balance_change: payout,
                    });
                    summary.rounds += 1;
                    match result {
                        RoundResult::Win => {
                            summary.wins += 1;
                            summary.net += payout;
                        }
                        RoundResult::Lose => {
                            summary.losses += 1;
                            summary.net -= payout;
                        }
                    }

                    if outcome.num_chance > 0 {
                        countdown_secs(self.pacer, self.timing.between_rounds_secs).await;
                        RoundState::Sampling
                    } else if reload.as_ref().is_some_and(BoostState::has_stages_left) {
                        RoundState::Replenishing
                    } else {
                        info!(account = %identity, "Out of chances and reloads");
                        RoundState::Done
                    }
                }

                RoundState::Replenishing => {
                    if self.api.apply_boost(credential, BoostKind::Reload).await {
                        summary.reloads += 1;
                        info!(account = %identity, "Fuel tank reloaded");
                        countdown_secs(self.pacer, self.timing.after_reload_secs).await;
                        let boosts = self.api.fetch_boosts(credential).await;
                        reload = BoostState::find(&boosts, BoostKind::Reload).cloned();
                        RoundState::Sampling
                    } else {
                        warn!(account = %identity, "Reload refused, ending rounds");
                        RoundState::Done
                    }
                }

                RoundState::Done => return Ok(summary),
            };
        }
    }
}
