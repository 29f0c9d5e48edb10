//! Racer mini-game HTTP client.
//!
//! JSON over HTTPS. The account credential travels in the
//! `X-Telegram-Init-Data` header and every game request carries a
//! `t=<epoch-ms>` cache-buster. Responses use a `{code, data}` envelope;
//! `code == 0` means a write was accepted.
//!
//! Endpoints (relative to the configured base URL):
//! - `GET  tasks`  → `[{id, state}]`
//! - `POST task`   → claim `{extUserId, id}`
//! - `GET  boosts` → `[{id, curStage, totalStage, pointCost, context: {name}}]`
//! - `POST boost`  → apply `{id}`
//! - `POST info`   → `{balancePoints, ...}`
//! - `POST assess` → `{won, multiplier, basePoint, balancePoints, numChance, prevPrice, currentPrice}`
//!
//! The market ticker is public: `{data: [{last: "<price>"}]}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use super::{ApiResult, GameApi};
use crate::config::ApiConfig;
use crate::engine::pacer::Pacer;
use crate::types::{
    AccountIdentity, AccountInfo, BoostKind, BoostState, Credential, Direction,
    PredictionOutcome, RacerError, Task,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0";

/// Static headers the game front-end sends with every request.
const FRONTEND_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json"),
    ("accept-language", "en-US,en;q=0.9"),
    ("app-type", "web"),
    ("origin", "https://www.okx.com"),
    ("referer", "https://www.okx.com/mini-app/racer"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("x-cdn", "https://www.okx.com"),
    ("x-locale", "en_US"),
    ("x-utc", "7"),
    ("x-zkdex-env", "0"),
];

// ---------------------------------------------------------------------------
// API response types (Racer JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    id: i64,
    #[serde(default)]
    state: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBoost {
    id: u8,
    cur_stage: u32,
    total_stage: u32,
    #[serde(default)]
    point_cost: f64,
    #[serde(default)]
    context: Option<WireBoostContext>,
}

#[derive(Debug, Deserialize)]
struct WireBoostContext {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInfo {
    balance_points: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAssess {
    won: bool,
    multiplier: f64,
    base_point: f64,
    balance_points: f64,
    num_chance: i64,
    #[serde(default)]
    prev_price: f64,
    #[serde(default)]
    current_price: f64,
}

#[derive(Debug, Deserialize)]
struct WireTicker {
    #[serde(default)]
    data: Vec<WireTickerEntry>,
}

#[derive(Debug, Deserialize)]
struct WireTickerEntry {
    last: String,
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_json<T: DeserializeOwned>(operation: &str, body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|e| RacerError::data_shape(operation, e))
}

fn require_data<T: DeserializeOwned>(operation: &str, body: &str) -> ApiResult<T> {
    let envelope: Envelope<T> = parse_json(operation, body)?;
    envelope.data.ok_or_else(|| {
        RacerError::data_shape(
            operation,
            format!(
                "missing `data` (code={}, msg={})",
                envelope.code,
                envelope.msg.unwrap_or_default()
            ),
        )
    })
}

fn to_decimal(operation: &str, field: &str, value: f64) -> ApiResult<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| RacerError::data_shape(operation, format!("`{field}` is not a finite number")))
}

fn parse_tasks(body: &str) -> ApiResult<Vec<Task>> {
    let tasks: Vec<WireTask> = require_data("tasks", body)?;
    Ok(tasks
        .into_iter()
        .map(|t| Task { id: t.id, state: t.state })
        .collect())
}

fn parse_boosts(body: &str) -> ApiResult<Vec<BoostState>> {
    let boosts: Vec<WireBoost> = require_data("boosts", body)?;
    Ok(boosts
        .into_iter()
        .filter_map(|b| {
            let kind = BoostKind::from_id(b.id)?;
            let name = b
                .context
                .map(|c| c.name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| kind.to_string());
            Some(BoostState {
                kind,
                name,
                cur_stage: b.cur_stage,
                total_stage: b.total_stage,
                point_cost: b.point_cost as i64,
            })
        })
        .collect())
}

fn parse_write_accepted(body: &str) -> ApiResult<bool> {
    let envelope: Envelope<serde_json::Value> = parse_json("boost", body)?;
    Ok(envelope.code == 0)
}

fn parse_account(body: &str, identity: &AccountIdentity) -> ApiResult<AccountInfo> {
    let info: WireInfo = require_data("info", body)?;
    Ok(AccountInfo {
        external_id: identity.external_id,
        external_name: identity.external_name.clone(),
        balance_points: info.balance_points as i64,
    })
}

fn parse_outcome(body: &str) -> ApiResult<PredictionOutcome> {
    const OP: &str = "assess";
    let a: WireAssess = require_data(OP, body)?;
    Ok(PredictionOutcome {
        won: a.won,
        multiplier: to_decimal(OP, "multiplier", a.multiplier)?,
        base_point: to_decimal(OP, "basePoint", a.base_point)?,
        balance_points: a.balance_points as i64,
        num_chance: a.num_chance,
        prev_price: to_decimal(OP, "prevPrice", a.prev_price)?,
        current_price: to_decimal(OP, "currentPrice", a.current_price)?,
    })
}

fn parse_price(body: &str) -> ApiResult<Decimal> {
    const OP: &str = "ticker";
    let ticker: WireTicker = parse_json(OP, body)?;
    let first = ticker
        .data
        .first()
        .ok_or_else(|| RacerError::data_shape(OP, "no price data found"))?;
    Decimal::from_str(first.last.trim())
        .map_err(|e| RacerError::data_shape(OP, format!("invalid `last` price {:?}: {e}", first.last)))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Racer game client.
pub struct RacerClient {
    http: Client,
    base_url: String,
    ticker_url: String,
    link_code: String,
    game_id: u32,
    retry: RetryPolicy,
    pacer: Arc<dyn Pacer>,
}

impl RacerClient {
    pub fn new(api: &ApiConfig, retry: RetryPolicy, pacer: Arc<dyn Pacer>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(Self::frontend_headers())
            .build()
            .context("Failed to build HTTP client for Racer")?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            ticker_url: api.ticker_url.clone(),
            link_code: api.link_code.clone(),
            game_id: api.game_id,
            retry,
            pacer,
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn frontend_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &(name, value) in FRONTEND_HEADERS {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    /// Game endpoint URL with a fresh cache-buster.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}?t={}", self.base_url, Utc::now().timestamp_millis())
    }

    /// One HTTP attempt. Transport errors and non-2xx statuses are transient.
    async fn send_once(
        &self,
        operation: &str,
        method: Method,
        url: String,
        credential: Option<&Credential>,
        body: Option<&serde_json::Value>,
    ) -> ApiResult<String> {
        debug!(operation, url = %url, "Racer request");

        let mut req = self.http.request(method, &url);
        if let Some(credential) = credential {
            req = req.header(INIT_DATA_HEADER, credential.as_str());
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RacerError::transient(operation, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RacerError::transient(operation, format!("HTTP {status}: {text}")));
        }

        resp.text()
            .await
            .map_err(|e| RacerError::transient(operation, e))
    }

    /// Game request through the retry executor; returns the raw body.
    /// The operation name doubles as the endpoint path.
    async fn call(
        &self,
        operation: &str,
        method: Method,
        credential: &Credential,
        body: Option<serde_json::Value>,
    ) -> ApiResult<String> {
        let body = body.as_ref();
        self.retry
            .execute(&*self.pacer, operation, move || {
                self.send_once(
                    operation,
                    method.clone(),
                    self.endpoint(operation),
                    Some(credential),
                    body,
                )
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// GameApi trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl GameApi for RacerClient {
    async fn fetch_tasks(&self, credential: &Credential) -> ApiResult<Vec<Task>> {
        let body = self.call("tasks", Method::GET, credential, None).await?;
        parse_tasks(&body)
    }

    async fn claim_task(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        task_id: i64,
    ) -> ApiResult<()> {
        let payload = json!({ "extUserId": identity.external_id, "id": task_id });
        self.call("task", Method::POST, credential, Some(payload)).await?;
        info!(account = %identity, task_id, "Task reward claimed");
        Ok(())
    }

    async fn fetch_boosts(&self, credential: &Credential) -> Vec<BoostState> {
        let result = match self.call("boosts", Method::GET, credential, None).await {
            Ok(body) => parse_boosts(&body),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to fetch boosts, continuing without them");
            Vec::new()
        })
    }

    async fn apply_boost(&self, credential: &Credential, kind: BoostKind) -> bool {
        let payload = json!({ "id": kind.id() });
        let result = match self.call("boost", Method::POST, credential, Some(payload)).await {
            Ok(body) => parse_write_accepted(&body),
            Err(e) => Err(e),
        };
        match result {
            Ok(true) => true,
            Ok(false) => {
                warn!(boost = %kind, "Boost rejected by server");
                false
            }
            Err(e) => {
                warn!(boost = %kind, error = %e, "Boost request failed");
                false
            }
        }
    }

    async fn fetch_account(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
    ) -> ApiResult<AccountInfo> {
        let payload = json!({
            "extUserId": identity.external_id,
            "extUserName": identity.external_name,
            "gameId": self.game_id,
            "linkCode": self.link_code,
        });
        let body = self.call("info", Method::POST, credential, Some(payload)).await?;
        parse_account(&body, identity)
    }

    async fn submit_prediction(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        direction: Direction,
    ) -> ApiResult<PredictionOutcome> {
        let payload = json!({
            "extUserId": identity.external_id,
            "predict": direction.code(),
            "gameId": self.game_id,
        });
        let body = self.call("assess", Method::POST, credential, Some(payload)).await?;
        parse_outcome(&body)
    }

    async fn fetch_market_price(&self) -> ApiResult<Decimal> {
        let url = self.ticker_url.as_str();
        let body = self
            .retry
            .execute(&*self.pacer, "ticker", move || {
                self.send_once("ticker", Method::GET, url.to_string(), None, None)
            })
            .await?;
        parse_price(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
