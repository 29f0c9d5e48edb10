//! Boost decision policy.
//!
//! For the capacity (fuel tank) and multiplier (turbo) boosts, decides
//! whether to attempt one upgrade step and verifies the outcome. An
//! upgrade is attempted only when the operator opted in, the account holds
//! the boost, `curStage < totalStage` and the fresh balance is strictly
//! above `pointCost`.
//!
//! After an upgrade the boost list and balance are re-fetched and compared
//! against the pre-upgrade `totalStage`/`pointCost`. Reaching the last
//! stage, dropping below the cost, or losing the boost halts the account
//! for the rest of this pass. That halt is a policy outcome, not an error.

use tracing::{info, warn};

use crate::api::{ApiResult, GameApi};
use crate::reporter::{EngineEvent, StatsReporter};
use crate::types::{AccountIdentity, BoostKind, BoostState, Credential};

/// Boosts the policy may upgrade, in evaluation order.
const UPGRADEABLE: [BoostKind; 2] = [BoostKind::FuelTank, BoostKind::Turbo];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostDecision {
    /// Not opted in, or the account does not hold the boost.
    Skipped,
    /// Held but not affordable or already maxed; nothing applied.
    Ineligible,
    /// Upgrade step attempted and verification passed.
    Upgraded,
    /// Stop processing this account for the current pass.
    Halt,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoostPolicy {
    upgrade_fuel_tank: bool,
    upgrade_turbo: bool,
}

impl BoostPolicy {
    pub fn new(upgrade_fuel_tank: bool, upgrade_turbo: bool) -> Self {
        Self {
            upgrade_fuel_tank,
            upgrade_turbo,
        }
    }

    pub fn opted_in(&self, kind: BoostKind) -> bool {
        match kind {
            BoostKind::FuelTank => self.upgrade_fuel_tank,
            BoostKind::Turbo => self.upgrade_turbo,
            BoostKind::Reload => false,
        }
    }

    /// Evaluate fuel tank then turbo against the boosts fetched at the start
    /// of the account. Returns `Halt` as soon as one upgrade fails
    /// verification.
    pub async fn run(
        &self,
        api: &dyn GameApi,
        reporter: &StatsReporter,
        credential: &Credential,
        identity: &AccountIdentity,
        boosts: &[BoostState],
    ) -> ApiResult<BoostDecision> {
        let mut last = BoostDecision::Skipped;
        for kind in UPGRADEABLE {
            last = self
                .evaluate(api, reporter, credential, identity, boosts, kind)
                .await?;
            if last == BoostDecision::Halt {
                break;
            }
        }
        Ok(last)
    }

    /// Decide and, if eligible, apply one upgrade step for `kind`.
    pub async fn evaluate(
        &self,
        api: &dyn GameApi,
        reporter: &StatsReporter,
        credential: &Credential,
        identity: &AccountIdentity,
        boosts: &[BoostState],
        kind: BoostKind,
    ) -> ApiResult<BoostDecision> {
        if !self.opted_in(kind) {
            return Ok(BoostDecision::Skipped);
        }
        let Some(before) = BoostState::find(boosts, kind) else {
            return Ok(BoostDecision::Skipped);
        };

        let balance = api.fetch_account(credential, identity).await?.balance_points;
        if !before.is_upgradable(balance) {
            info!(
                boost = %kind,
                stage = before.cur_stage,
                total = before.total_stage,
                cost = before.point_cost,
                balance,
                "Not eligible to upgrade"
            );
            return Ok(BoostDecision::Ineligible);
        }

        if api.apply_boost(credential, kind).await {
            info!(boost = %kind, from_stage = before.cur_stage, "Upgrade applied");
            reporter.record(EngineEvent::Upgrade { kind });
        }

        let refreshed = api.fetch_boosts(credential).await;
        let new_balance = api.fetch_account(credential, identity).await?.balance_points;

        match BoostState::find(&refreshed, kind) {
            Some(after)
                if after.cur_stage < before.total_stage && new_balance >= before.point_cost =>
            {
                Ok(BoostDecision::Upgraded)
            }
            after => {
                warn!(
                    boost = %kind,
                    stage = after.map(|b| b.cur_stage),
                    total = before.total_stage,
                    cost = before.point_cost,
                    balance = new_balance,
                    "Cannot upgrade further, skipping account for this pass"
                );
                Ok(BoostDecision::Halt)
            }
        }
    }
}
