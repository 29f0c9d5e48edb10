//! In-memory game and minter for integration testing.
//!
//! `MockGame` implements `GameApi` with deterministic responses and
//! records every write, so tests can assert on exactly which accounts
//! were played. Accounts are keyed by the external id embedded in the
//! credential.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use racer::api::{ApiResult, GameApi};
use racer::credentials::minter::CredentialMinter;
use racer::types::*;

/// Build a well-formed credential for external id `id`.
pub fn credential(id: i64) -> Credential {
    let user = format!(r#"{{"id":{id},"username":"racer{id}"}}"#);
    Credential::new(format!(
        "query_id=AAE{id}&user={}&auth_date=1700000000&hash=h{id}",
        urlencoding::encode(&user)
    ))
}

/// Fresh scratch directory under the system temp dir.
pub fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("racer_it_{label}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a credentials file with one line per id.
pub fn write_credentials(dir: &Path, ids: &[i64]) -> PathBuf {
    let path = dir.join("data.txt");
    let body: String = ids
        .iter()
        .map(|id| format!("{}\n", credential(*id).as_str()))
        .collect();
    std::fs::write(&path, body).unwrap();
    path
}

/// Create `count` session files named `session_<n>.session`.
pub fn write_sessions(dir: &Path, count: usize) -> PathBuf {
    let sessions = dir.join("session");
    std::fs::create_dir_all(&sessions).unwrap();
    for n in 0..count {
        std::fs::write(sessions.join(format!("session_{n}.session")), "stub").unwrap();
    }
    sessions
}

pub fn boost(kind: BoostKind, cur: u32, total: u32, cost: i64) -> BoostState {
    BoostState {
        kind,
        name: kind.to_string(),
        cur_stage: cur,
        total_stage: total,
        point_cost: cost,
    }
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

pub struct MockGame {
    balance: i64,
    win: bool,
    boosts: Mutex<Vec<BoostState>>,
    dead: Mutex<HashSet<i64>>,
    tasks_fail: Mutex<bool>,
    claimed: Mutex<HashSet<i64>>,
    price_tick: Mutex<Decimal>,
    pub predictions: Mutex<Vec<(i64, Direction)>>,
    pub claims: Mutex<Vec<i64>>,
    pub applied: Mutex<Vec<BoostKind>>,
}

impl MockGame {
    /// Every account wins one round, has no reloads and 1000 points.
    pub fn new() -> Self {
        Self {
            balance: 1000,
            win: true,
            boosts: Mutex::new(vec![boost(BoostKind::Reload, 0, 0, 0)]),
            dead: Mutex::new(HashSet::new()),
            tasks_fail: Mutex::new(false),
            claimed: Mutex::new(HashSet::new()),
            price_tick: Mutex::new(dec!(60000)),
            predictions: Mutex::new(Vec::new()),
            claims: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn losing(mut self) -> Self {
        self.win = false;
        self
    }

    pub fn with_boosts(self, boosts: Vec<BoostState>) -> Self {
        *self.boosts.lock().unwrap() = boosts;
        self
    }

    /// Reject every authenticated call for this external id.
    pub fn kill(&self, id: i64) {
        self.dead.lock().unwrap().insert(id);
    }

    pub fn fail_tasks(&self) {
        *self.tasks_fail.lock().unwrap() = true;
    }

    pub fn played(&self) -> Vec<i64> {
        self.predictions.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    fn id_of(credential: &Credential) -> i64 {
        credential.identity().map(|i| i.external_id).unwrap_or(-1)
    }

    fn check_alive(&self, credential: &Credential, operation: &str) -> ApiResult<i64> {
        let id = Self::id_of(credential);
        if self.dead.lock().unwrap().contains(&id) {
            return Err(RacerError::transient(operation, "HTTP 401 Unauthorized"));
        }
        Ok(id)
    }
}

#[async_trait]
impl GameApi for MockGame {
    async fn fetch_tasks(&self, credential: &Credential) -> ApiResult<Vec<Task>> {
        let id = self.check_alive(credential, "tasks")?;
        if *self.tasks_fail.lock().unwrap() {
            return Err(RacerError::transient("tasks", "HTTP 502 Bad Gateway"));
        }
        let state = i64::from(self.claimed.lock().unwrap().contains(&id));
        Ok(vec![
            Task { id: 1, state: 1 },
            Task {
                id: DAILY_CHECK_IN_TASK_ID,
                state,
            },
        ])
    }

    async fn claim_task(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        task_id: i64,
    ) -> ApiResult<()> {
        self.check_alive(credential, "task")?;
        assert_eq!(task_id, DAILY_CHECK_IN_TASK_ID);
        self.claimed.lock().unwrap().insert(identity.external_id);
        self.claims.lock().unwrap().push(identity.external_id);
        Ok(())
    }

    async fn fetch_boosts(&self, credential: &Credential) -> Vec<BoostState> {
        if self.check_alive(credential, "boosts").is_err() {
            return Vec::new();
        }
        self.boosts.lock().unwrap().clone()
    }

    async fn apply_boost(&self, credential: &Credential, kind: BoostKind) -> bool {
        if self.check_alive(credential, "boost").is_err() {
            return false;
        }
        let mut boosts = self.boosts.lock().unwrap();
        let Some(target) = boosts.iter_mut().find(|b| b.kind == kind) else {
            return false;
        };
        if target.cur_stage >= target.total_stage {
            return false;
        }
        target.cur_stage += 1;
        self.applied.lock().unwrap().push(kind);
        true
    }

    async fn fetch_account(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
    ) -> ApiResult<AccountInfo> {
        self.check_alive(credential, "info")?;
        Ok(AccountInfo {
            external_id: identity.external_id,
            external_name: identity.external_name.clone(),
            balance_points: self.balance,
        })
    }

    async fn submit_prediction(
        &self,
        credential: &Credential,
        identity: &AccountIdentity,
        direction: Direction,
    ) -> ApiResult<PredictionOutcome> {
        self.check_alive(credential, "assess")?;
        self.predictions
            .lock()
            .unwrap()
            .push((identity.external_id, direction));
        Ok(PredictionOutcome {
            won: self.win,
            multiplier: dec!(1.5),
            base_point: dec!(20),
            balance_points: self.balance,
            num_chance: 0,
            prev_price: dec!(60000),
            current_price: dec!(60001),
        })
    }

    /// Rising ticker: every sample is one higher than the last.
    async fn fetch_market_price(&self) -> ApiResult<Decimal> {
        let mut tick = self.price_tick.lock().unwrap();
        *tick += Decimal::ONE;
        Ok(*tick)
    }
}

// ---------------------------------------------------------------------------
// Minter
// ---------------------------------------------------------------------------

/// Mints a fixed credential per session file name; unknown sessions fail.
pub struct MockMinter {
    by_session: HashMap<String, Credential>,
    pub requested: Mutex<Vec<String>>,
}

impl MockMinter {
    pub fn new(pairs: &[(&str, i64)]) -> Self {
        Self {
            by_session: pairs
                .iter()
                .map(|(name, id)| (name.to_string(), credential(*id)))
                .collect(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CredentialMinter for MockMinter {
    async fn mint(&self, session: &Path) -> Result<Credential, RacerError> {
        let name = session
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.requested.lock().unwrap().push(name.clone());
        self.by_session
            .get(&name)
            .cloned()
            .ok_or_else(|| RacerError::Minting(format!("session {name} is not authorized")))
    }
}
