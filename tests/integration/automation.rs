//! End-to-end passes of the automation loop against the in-memory game.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use racer::credentials::minter::SessionDirectory;
use racer::credentials::CredentialStore;
use racer::engine::automation::{AutomationLoop, LoopOptions};
use racer::engine::boost::BoostPolicy;
use racer::engine::pacer::{Pacer, RecordingPacer};
use racer::reporter::{EngineStatus, StatsReporter};
use racer::types::{BoostKind, Credential};

use crate::mock_game::*;

struct Harness {
    game: Arc<MockGame>,
    minter: Arc<MockMinter>,
    reporter: Arc<StatsReporter>,
    pacer: Arc<RecordingPacer>,
    engine: AutomationLoop,
    shutdown: watch::Sender<bool>,
}

fn harness(
    dir: &Path,
    game: MockGame,
    minter: MockMinter,
    ids: &[i64],
    sessions: usize,
    boosts: BoostPolicy,
) -> Harness {
    let credentials = write_credentials(dir, ids);
    let session_dir = write_sessions(dir, sessions);
    let game = Arc::new(game);
    let minter = Arc::new(minter);
    let reporter = Arc::new(StatsReporter::new(
        "RACER-IT",
        Arc::new(EngineStatus::new(true)),
        None,
    ));
    let pacer = Arc::new(RecordingPacer::new());
    let (tx, rx) = watch::channel(false);

    let engine = AutomationLoop::new(
        game.clone(),
        minter.clone(),
        CredentialStore::open(credentials).unwrap(),
        SessionDirectory::new(session_dir),
        reporter.clone(),
        pacer.clone(),
        LoopOptions {
            boosts,
            ..LoopOptions::default()
        },
        rx,
    );

    Harness {
        game,
        minter,
        reporter,
        pacer,
        engine,
        shutdown: tx,
    }
}

fn ids_of(entries: &[Credential]) -> Vec<i64> {
    entries
        .iter()
        .map(|c| c.identity().unwrap().external_id)
        .collect()
}

fn on_disk(store: &CredentialStore) -> Vec<i64> {
    let raw = std::fs::read_to_string(store.path()).unwrap();
    raw.lines()
        .map(|l| Credential::new(l).identity().unwrap().external_id)
        .collect()
}

#[tokio::test]
async fn test_pass_plays_every_account_in_order() {
    let dir = temp_dir("happy");
    let mut h = harness(&dir, MockGame::new(), MockMinter::new(&[]), &[1, 2, 3], 0, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    assert_eq!(report.pass_number, 1);
    assert_eq!(report.accounts_visited, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.wins, 3);
    assert_eq!(h.game.played(), vec![1, 2, 3]);
    assert_eq!(*h.game.claims.lock().unwrap(), vec![1, 2, 3]);

    let stats = h.reporter.stats();
    assert_eq!(stats.accounts_processed, 3);
    assert_eq!(stats.daily_tasks_completed, 3);
    assert_eq!(stats.errors, 0);
    assert!(h.reporter.status().last_activity().is_some());

    // One 4s sampling window per account, nothing else.
    assert_eq!(h.pacer.waits(), vec![Duration::from_secs(4); 3]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_second_pass_does_not_reclaim_daily_task() {
    let dir = temp_dir("daily");
    let mut h = harness(&dir, MockGame::new(), MockMinter::new(&[]), &[1, 2], 0, BoostPolicy::default());

    h.engine.run_pass().await.unwrap();
    let second = h.engine.run_pass().await.unwrap();

    assert_eq!(second.pass_number, 2);
    assert_eq!(h.game.claims.lock().unwrap().len(), 2);
    assert_eq!(h.reporter.stats().daily_tasks_completed, 2);
    assert_eq!(h.game.played(), vec![1, 2, 1, 2]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_dead_credential_replaced_at_same_index() {
    let dir = temp_dir("replace");
    let game = MockGame::new();
    game.kill(3);
    let minter = MockMinter::new(&[("session_2.session", 30)]);
    let mut h = harness(&dir, game, minter, &[1, 2, 3, 4, 5], 5, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    assert_eq!(report.replaced, 1);
    assert_eq!(report.dropped, 0);
    assert_eq!(*h.minter.requested.lock().unwrap(), vec!["session_2.session"]);

    let store = h.engine.store();
    assert_eq!(store.len(), 5);
    assert_eq!(ids_of(store.entries()), vec![1, 2, 30, 4, 5]);
    assert_eq!(on_disk(store), vec![1, 2, 30, 4, 5]);

    // The replacement is not played in the pass that minted it.
    assert_eq!(h.game.played(), vec![1, 2, 4, 5]);
    // Failed check-in plus the failed account.
    assert_eq!(h.reporter.stats().errors, 2);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_duplicate_mint_shrinks_store() {
    let dir = temp_dir("dup");
    let game = MockGame::new();
    game.kill(3);
    // Session 2 yields a credential already stored at index 3.
    let minter = MockMinter::new(&[("session_2.session", 4)]);
    let mut h = harness(&dir, game, minter, &[1, 2, 3, 4, 5], 5, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    assert_eq!(report.dropped, 1);
    let store = h.engine.store();
    assert_eq!(store.len(), 4);
    assert_eq!(ids_of(store.entries()), vec![1, 2, 4, 5]);
    assert_eq!(on_disk(store), vec![1, 2, 4, 5]);
    // Account 4 shifted into the dead slot and is picked up next pass.
    assert_eq!(h.game.played(), vec![1, 2, 5]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_failed_mint_drops_credential() {
    let dir = temp_dir("mintfail");
    let game = MockGame::new();
    game.kill(1);
    let mut h = harness(&dir, game, MockMinter::new(&[]), &[1, 2], 2, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(ids_of(h.engine.store().entries()), vec![2]);
    // Account 2 shifted into slot 0, behind the cursor.
    assert!(h.game.played().is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_malformed_credential_is_replaced() {
    let dir = temp_dir("malformed");
    let credentials = write_credentials(&dir, &[1, 2]);
    let body = std::fs::read_to_string(&credentials).unwrap();
    std::fs::write(&credentials, format!("query_id=broken&hash=0\n{body}")).unwrap();
    let session_dir = write_sessions(&dir, 1);

    let game = Arc::new(MockGame::new());
    let reporter = Arc::new(StatsReporter::new("RACER-IT", Arc::new(EngineStatus::new(true)), None));
    let (_tx, rx) = watch::channel(false);
    let mut engine = AutomationLoop::new(
        game.clone(),
        Arc::new(MockMinter::new(&[("session_0.session", 9)])),
        CredentialStore::open(&credentials).unwrap(),
        SessionDirectory::new(session_dir),
        reporter,
        Arc::new(RecordingPacer::new()),
        LoopOptions::default(),
        rx,
    );

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.replaced, 1);
    assert_eq!(ids_of(engine.store().entries()), vec![9, 1, 2]);
    assert_eq!(game.played(), vec![1, 2]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_empty_store_mints_from_sessions() {
    let dir = temp_dir("empty");
    let minter = MockMinter::new(&[("session_0.session", 10), ("session_1.session", 11)]);
    let mut h = harness(&dir, MockGame::new(), minter, &[], 2, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    assert_eq!(report.minted_at_start, 2);
    assert_eq!(ids_of(h.engine.store().entries()), vec![10, 11]);
    assert_eq!(h.game.played(), vec![10, 11]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_daily_task_failure_keeps_credential() {
    let dir = temp_dir("tasks");
    let game = MockGame::new();
    game.fail_tasks();
    let mut h = harness(&dir, game, MockMinter::new(&[]), &[1], 1, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.replaced + report.dropped, 0);
    assert_eq!(h.engine.store().len(), 1);
    assert_eq!(h.reporter.stats().errors, 1);
    assert!(h.minter.requested.lock().unwrap().is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_upgrade_to_last_stage_halts_account() {
    let dir = temp_dir("halt");
    let game = MockGame::new().with_boosts(vec![
        boost(BoostKind::Reload, 0, 0, 0),
        boost(BoostKind::FuelTank, 4, 5, 100),
    ]);
    let mut h = harness(&dir, game, MockMinter::new(&[]), &[1, 2], 0, BoostPolicy::new(true, false));

    let report = h.engine.run_pass().await.unwrap();

    // Account 1 upgrades to 5/5 and stops; account 2 sees a maxed tank.
    assert_eq!(report.halted, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(*h.game.applied.lock().unwrap(), vec![BoostKind::FuelTank]);
    assert_eq!(h.game.played(), vec![2]);
    assert_eq!(h.reporter.stats().upgrades_performed, 1);
    assert_eq!(h.engine.store().len(), 2);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_reload_extends_rounds() {
    let dir = temp_dir("reload");
    let game = MockGame::new()
        .losing()
        .with_boosts(vec![boost(BoostKind::Reload, 0, 2, 0)]);
    let mut h = harness(&dir, game, MockMinter::new(&[]), &[1], 0, BoostPolicy::default());

    let report = h.engine.run_pass().await.unwrap();

    // One round, then two accepted reloads each buying another round.
    assert_eq!(report.rounds, 3);
    assert_eq!(report.losses, 3);
    assert_eq!(
        *h.game.applied.lock().unwrap(),
        vec![BoostKind::Reload, BoostKind::Reload]
    );
    assert!(h.reporter.stats().total_profit.is_sign_negative());
    std::fs::remove_dir_all(dir).unwrap();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Pacer that requests shutdown on the first minute-long wait.
struct StopOnSleep {
    tx: watch::Sender<bool>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[async_trait]
impl Pacer for StopOnSleep {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if duration >= Duration::from_secs(60) {
            let _ = self.tx.send(true);
        }
    }
}

#[tokio::test]
async fn test_run_stops_during_inter_pass_wait() {
    let dir = temp_dir("stop");
    let credentials = write_credentials(&dir, &[1, 2]);
    let game = Arc::new(MockGame::new());
    let (tx, rx) = watch::channel(false);
    let pacer = Arc::new(StopOnSleep {
        tx,
        sleeps: std::sync::Mutex::new(Vec::new()),
    });
    let reporter = Arc::new(StatsReporter::new("RACER-IT", Arc::new(EngineStatus::new(true)), None));

    let mut engine = AutomationLoop::new(
        game.clone(),
        Arc::new(MockMinter::new(&[])),
        CredentialStore::open(credentials).unwrap(),
        SessionDirectory::new(dir.join("session")),
        reporter,
        pacer.clone(),
        LoopOptions::default(),
        rx,
    );

    engine.run().await.unwrap();

    // Exactly one pass, then the first minute tick of the wait stops it.
    assert_eq!(game.played(), vec![1, 2]);
    let long_waits: Vec<_> = pacer
        .sleeps
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|d| *d >= Duration::from_secs(60))
        .collect();
    assert_eq!(long_waits, vec![Duration::from_secs(60)]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_inactive_engine_processes_nothing() {
    let dir = temp_dir("inactive");
    let credentials = write_credentials(&dir, &[1]);
    let game = Arc::new(MockGame::new());
    let (tx, rx) = watch::channel(false);
    let pacer = Arc::new(StopOnSleep {
        tx,
        sleeps: std::sync::Mutex::new(Vec::new()),
    });
    let reporter = Arc::new(StatsReporter::new("RACER-IT", Arc::new(EngineStatus::new(false)), None));

    let mut engine = AutomationLoop::new(
        game.clone(),
        Arc::new(MockMinter::new(&[])),
        CredentialStore::open(credentials).unwrap(),
        SessionDirectory::new(dir.join("session")),
        reporter,
        pacer.clone(),
        LoopOptions::default(),
        rx,
    );

    engine.run().await.unwrap();

    assert!(game.played().is_empty());
    assert_eq!(*pacer.sleeps.lock().unwrap(), vec![Duration::from_secs(60)]);
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_shutdown_before_pass_skips_accounts() {
    let dir = temp_dir("early");
    let mut h = harness(&dir, MockGame::new(), MockMinter::new(&[]), &[1, 2], 0, BoostPolicy::default());
    let _ = h.shutdown.send(true);

    let report = h.engine.run_pass().await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.accounts_visited, 0);
    assert!(h.game.played().is_empty());
    h.engine.run().await.unwrap();
    assert!(h.game.played().is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}

/// Pacer whose waits never finish.
struct StalledPacer;

#[async_trait]
impl Pacer for StalledPacer {
    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await
    }
}

#[tokio::test]
async fn test_inactive_engine_stops_when_sender_dropped() {
    let dir = temp_dir("orphan");
    let credentials = write_credentials(&dir, &[1]);
    let game = Arc::new(MockGame::new());
    let (tx, rx) = watch::channel(false);
    let reporter = Arc::new(StatsReporter::new("RACER-IT", Arc::new(EngineStatus::new(false)), None));

    let mut engine = AutomationLoop::new(
        game.clone(),
        Arc::new(MockMinter::new(&[])),
        CredentialStore::open(credentials).unwrap(),
        SessionDirectory::new(dir.join("session")),
        reporter,
        Arc::new(StalledPacer),
        LoopOptions::default(),
        rx,
    );
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), engine.run())
        .await
        .expect("loop should stop once the shutdown sender is gone")
        .unwrap();
    assert!(game.played().is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}
