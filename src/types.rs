//! Shared types for the RACER engine.
//!
//! These types form the data model used across the API client, the
//! credential store, the engine and the reporter. Wire-level shapes live
//! next to the client in `api::racer`; everything here is already
//! validated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Opaque per-account bearer credential (web-app init data).
///
/// The raw value is a URL query string. Its `user` parameter carries a
/// percent-encoded JSON object from which the external account id and
/// display name are recovered.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract `{externalId, externalName}` from the embedded `user` parameter.
    pub fn identity(&self) -> Result<AccountIdentity, RacerError> {
        let raw = self.0.trim_start_matches(['?', '#']);
        let user_param = raw
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "user")
            .map(|(_, value)| value)
            .ok_or_else(|| RacerError::Credential("missing `user` parameter".into()))?;

        // Stored credentials are decoded once by the minting step, but the
        // user parameter itself may still be double-encoded.
        let mut json = decode_component(user_param)?;
        if !json.trim_start().starts_with('{') {
            json = decode_component(&json)?;
        }

        let user: WebAppUser = serde_json::from_str(&json)
            .map_err(|e| RacerError::Credential(format!("malformed `user` parameter: {e}")))?;

        let external_name = user
            .username
            .or(user.first_name)
            .unwrap_or_default();

        Ok(AccountIdentity {
            external_id: user.id,
            external_name,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for Credential {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

fn decode_component(value: &str) -> Result<String, RacerError> {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .map_err(|e| RacerError::Credential(format!("invalid percent-encoding: {e}")))
}

#[derive(Debug, Deserialize)]
struct WebAppUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

/// External account identity recovered from a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountIdentity {
    pub external_id: i64,
    pub external_name: String,
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.external_name, self.external_id)
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Task id of the daily check-in reward.
pub const DAILY_CHECK_IN_TASK_ID: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    /// 0 = not yet completed.
    pub state: i64,
}

impl Task {
    pub fn is_pending(&self) -> bool {
        self.state == 0
    }
}

// ---------------------------------------------------------------------------
// Boosts
// ---------------------------------------------------------------------------

/// The three upgradeable per-account attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoostKind {
    /// Replenishes prediction attempts.
    Reload,
    /// Attempt capacity upgrade.
    FuelTank,
    /// Payout multiplier upgrade.
    Turbo,
}

impl BoostKind {
    pub fn id(self) -> u8 {
        match self {
            BoostKind::Reload => 1,
            BoostKind::FuelTank => 2,
            BoostKind::Turbo => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(BoostKind::Reload),
            2 => Some(BoostKind::FuelTank),
            3 => Some(BoostKind::Turbo),
            _ => None,
        }
    }
}

impl fmt::Display for BoostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoostKind::Reload => write!(f, "Reload Fuel Tank"),
            BoostKind::FuelTank => write!(f, "Fuel Tank"),
            BoostKind::Turbo => write!(f, "Turbo Charger"),
        }
    }
}

/// Stage progress of one boost for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoostState {
    pub kind: BoostKind,
    /// Display name reported by the server.
    pub name: String,
    pub cur_stage: u32,
    pub total_stage: u32,
    pub point_cost: i64,
}

impl BoostState {
    pub fn has_stages_left(&self) -> bool {
        self.cur_stage < self.total_stage
    }

    /// Upgrade is allowed only below the last stage and with a balance
    /// strictly above the cost.
    pub fn is_upgradable(&self, balance: i64) -> bool {
        self.has_stages_left() && balance > self.point_cost
    }

    /// Find the boost of a given kind in a fetched list.
    pub fn find(boosts: &[BoostState], kind: BoostKind) -> Option<&BoostState> {
        boosts.iter().find(|b| b.kind == kind)
    }
}

impl fmt::Display for BoostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}/{}", self.name, self.cur_stage, self.total_stage)
    }
}

// ---------------------------------------------------------------------------
// Account info
// ---------------------------------------------------------------------------

/// Result of the `info` call. Always fetched fresh, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub external_id: i64,
    pub external_name: String,
    pub balance_points: i64,
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sell,
    Buy,
}

impl Direction {
    /// Momentum-reversal heuristic: a falling price predicts Sell, anything
    /// else (including a tie) predicts Buy.
    pub fn from_prices(first: Decimal, second: Decimal) -> Self {
        if first > second {
            Direction::Sell
        } else {
            Direction::Buy
        }
    }

    /// Wire code used by the `assess` endpoint.
    pub fn code(self) -> u8 {
        match self {
            Direction::Sell => 0,
            Direction::Buy => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sell => write!(f, "Sell"),
            Direction::Buy => write!(f, "Buy"),
        }
    }
}

/// Server verdict for one submitted prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub won: bool,
    pub multiplier: Decimal,
    pub base_point: Decimal,
    pub balance_points: i64,
    /// Remaining attempts after this round.
    pub num_chance: i64,
    pub prev_price: Decimal,
    pub current_price: Decimal,
}

impl PredictionOutcome {
    pub fn payout(&self) -> Decimal {
        self.base_point * self.multiplier
    }
}

impl fmt::Display for PredictionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} | balance={} receive={} | old price={} current price={}",
            if self.won { "Win" } else { "Lose" },
            self.multiplier,
            self.balance_points,
            self.payout(),
            self.prev_price,
            self.current_price,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for RACER.
#[derive(Debug, thiserror::Error)]
pub enum RacerError {
    /// Transport or non-2xx failure that survived the retry budget.
    #[error("Remote call failed ({operation}): {message}")]
    Transient { operation: String, message: String },

    /// Expected fields missing or malformed in a response.
    #[error("Unexpected response shape ({operation}): {message}")]
    DataShape { operation: String, message: String },

    #[error("Invalid credential: {0}")]
    Credential(String),

    #[error("Credential minting failed: {0}")]
    Minting(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RacerError {
    pub fn transient(operation: &str, message: impl fmt::Display) -> Self {
        RacerError::Transient {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    pub fn data_shape(operation: &str, message: impl fmt::Display) -> Self {
        RacerError::DataShape {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
