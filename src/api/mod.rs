//! Remote game API.
//!
//! Defines the `GameApi` trait consumed by the engine and provides the
//! HTTP implementation against the Racer mini-game endpoints plus the
//! public market ticker. Every call goes through the retry executor.

pub mod racer;
pub mod retry;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    AccountIdentity, AccountInfo, BoostKind, BoostState, Credential, Direction,
    PredictionOutcome, RacerError, Task,
};

pub type ApiResult<T> = std::result::Result<T, RacerError>;

/// Typed operations against the external game.
///
/// Shape validation happens in the implementor: callers only ever see
/// domain types or a `RacerError`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Fetch the account's task list.
    async fn fetch_tasks(&self, credential: &Credential) -> ApiResult<Vec<Task>>;

    /// Claim a task reward. Only called for pending tasks.
    async fn claim_task(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        task_id: i64,
    ) -> ApiResult<()>;

    /// Fetch boost progress. Returns an empty list on any failure.
    async fn fetch_boosts(&self, credential: &Credential) -> Vec<BoostState>;

    /// Apply an upgrade or reload. `true` only when the server answered
    /// with code 0; failures are logged, never raised.
    async fn apply_boost(&self, credential: &Credential, kind: BoostKind) -> bool;

    /// Account info and balance. Doubles as a liveness probe.
    async fn fetch_account(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
    ) -> ApiResult<AccountInfo>;

    /// Submit a Buy/Sell forecast.
    async fn submit_prediction(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        direction: Direction,
    ) -> ApiResult<PredictionOutcome>;

    /// Current market price from the public ticker.
    async fn fetch_market_price(&self) -> ApiResult<Decimal>;
}
