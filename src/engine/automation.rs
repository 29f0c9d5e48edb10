//! Automation loop: passes over every stored credential.
//!
//! One pass walks the credential store in order. Per account: recover the
//! identity, claim the daily check-in, show boost progress, run the boost
//! policy, then play prediction rounds. Any error aborts only that
//! account; its credential is treated as dead, removed, and replaced by a
//! freshly minted one at the same position (a duplicate mint shrinks the
//! store instead). The pass then moves on to the next slot.
//!
//! Between passes the loop waits `pass_interval` in one-minute ticks.
//! While the engine is inactive it polls every `inactive_poll`. Shutdown
//! is honoured between accounts and at pacing ticks, never mid-round.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::boost::{BoostDecision, BoostPolicy};
use super::pacer::{countdown_minutes, Pacer};
use super::prediction::{PredictionEngine, RoundSummary, RoundTiming};
use crate::api::GameApi;
use crate::credentials::minter::{
    mint_from_sessions, session_for_index, CredentialMinter, SessionDirectory,
};
use crate::credentials::CredentialStore;
use crate::reporter::{EngineEvent, EngineStatus, StatsReporter};
use crate::types::{
    AccountIdentity, BoostKind, BoostState, Credential, RacerError, DAILY_CHECK_IN_TASK_ID,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub pass_interval: Duration,
    pub inactive_poll: Duration,
    pub boosts: BoostPolicy,
    pub timing: RoundTiming,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            pass_interval: Duration::from_secs(300),
            inactive_poll: Duration::from_secs(60),
            boosts: BoostPolicy::default(),
            timing: RoundTiming::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How one account ended within a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountOutcome {
    Completed(RoundSummary),
    /// Stopped by the boost policy; not an error.
    Halted,
}

/// Summary of a single pass over the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub pass_number: u64,
    pub accounts_visited: usize,
    pub completed: usize,
    pub halted: usize,
    /// Dead credentials replaced by a fresh mint.
    pub replaced: usize,
    /// Dead credentials removed without replacement.
    pub dropped: usize,
    pub rounds: u32,
    pub wins: u32,
    pub losses: u32,
    pub minted_at_start: usize,
    /// Shutdown was requested before the pass finished.
    pub interrupted: bool,
}

impl PassReport {
    fn absorb(&mut self, summary: &RoundSummary) {
        self.completed += 1;
        self.rounds += summary.rounds;
        self.wins += summary.wins;
        self.losses += summary.losses;
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct AutomationLoop {
    api: Arc<dyn GameApi>,
    minter: Arc<dyn CredentialMinter>,
    store: CredentialStore,
    sessions: SessionDirectory,
    reporter: Arc<StatsReporter>,
    status: Arc<EngineStatus>,
    pacer: Arc<dyn Pacer>,
    options: LoopOptions,
    shutdown: watch::Receiver<bool>,
    /// Set once the shutdown sender is gone; treated as a stop request.
    sender_dropped: bool,
    passes: u64,
}

impl AutomationLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn GameApi>,
        minter: Arc<dyn CredentialMinter>,
        store: CredentialStore,
        sessions: SessionDirectory,
        reporter: Arc<StatsReporter>,
        pacer: Arc<dyn Pacer>,
        options: LoopOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let status = reporter.status().clone();
        Self {
            api,
            minter,
            store,
            sessions,
            reporter,
            status,
            pacer,
            options,
            shutdown,
            sender_dropped: false,
            passes: 0,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn cancelled(&self) -> bool {
        self.sender_dropped || *self.shutdown.borrow()
    }

    /// Run passes until shutdown is signalled.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            credentials = self.store.len(),
            pass_interval_secs = self.options.pass_interval.as_secs(),
            "Automation loop started"
        );

        while !self.cancelled() {
            if !self.status.is_active() {
                debug!("Engine inactive, waiting for start command");
                self.idle(self.options.inactive_poll).await;
                continue;
            }

            match self.run_pass().await {
                Ok(report) => log_pass_report(&report),
                Err(e) => error!(error = %e, "Pass failed, continuing to next"),
            }

            if !countdown_minutes(&*self.pacer, self.options.pass_interval, || self.cancelled())
                .await
            {
                break;
            }
        }

        info!(passes = self.passes, "Automation loop stopped");
        Ok(())
    }

    /// Sleep for `duration` or until shutdown, whichever is first.
    async fn idle(&mut self, duration: Duration) {
        let mut shutdown = self.shutdown.clone();
        let dropped = tokio::select! {
            _ = self.pacer.sleep(duration) => false,
            changed = shutdown.changed() => changed.is_err(),
        };
        if dropped {
            warn!("Shutdown sender dropped, stopping");
            self.sender_dropped = true;
        }
    }

    /// One pass over every stored credential.
    pub async fn run_pass(&mut self) -> Result<PassReport> {
        self.passes += 1;
        let mut report = PassReport {
            pass_number: self.passes,
            ..Default::default()
        };

        let sessions = self.sessions.list()?;
        if self.store.is_empty() {
            info!(sessions = sessions.len(), "No credentials stored, minting from sessions");
            report.minted_at_start =
                mint_from_sessions(&*self.minter, &sessions, &mut self.store).await?;
            self.store.reload()?;
        }

        info!(pass = report.pass_number, accounts = self.store.len(), "Starting pass");

        let mut index = 0;
        while index < self.store.len() {
            if self.cancelled() {
                info!(index, "Shutdown requested, ending pass early");
                report.interrupted = true;
                break;
            }
            let Some(credential) = self.store.get(index).cloned() else {
                break;
            };
            report.accounts_visited += 1;

            match self.process_account(index, &credential).await {
                Ok(AccountOutcome::Completed(summary)) => {
                    report.absorb(&summary);
                    self.status.touch();
                    self.reporter.publish().await;
                }
                Ok(AccountOutcome::Halted) => report.halted += 1,
                Err(e) => {
                    self.reporter.record(EngineEvent::Error {
                        context: format!("account {}", index + 1),
                        message: e.to_string(),
                    });
                    match self.replace_dead(index, &sessions).await {
                        Ok(true) => report.replaced += 1,
                        Ok(false) => report.dropped += 1,
                        Err(e) => {
                            error!(index, error = %e, "Failed to update credential store")
                        }
                    }
                }
            }

            index += 1;
        }

        Ok(report)
    }

    async fn process_account(
        &self,
        index: usize,
        credential: &Credential,
    ) -> Result<AccountOutcome, RacerError> {
        let identity = credential.identity()?;
        info!(account = index + 1, name = %identity, "Processing account");

        self.claim_daily_reward(credential, &identity).await;

        let boosts = self.api.fetch_boosts(credential).await;
        for boost in &boosts {
            info!(account = index + 1, boost = %boost, "Boost progress");
        }

        let decision = self
            .options
            .boosts
            .run(&*self.api, &self.reporter, credential, &identity, &boosts)
            .await?;
        if decision == BoostDecision::Halt {
            return Ok(AccountOutcome::Halted);
        }

        let reload = BoostState::find(&boosts, BoostKind::Reload).cloned();
        let summary = PredictionEngine::new(
            &*self.api,
            &*self.pacer,
            &self.reporter,
            self.options.timing,
        )
        .run(credential, &identity, reload)
        .await?;

        Ok(AccountOutcome::Completed(summary))
    }

    /// Claim the daily check-in if pending. Failures here never fail the
    /// account.
    async fn claim_daily_reward(&self, credential: &Credential, identity: &AccountIdentity) {
        let tasks = match self.api.fetch_tasks(credential).await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.reporter.record(EngineEvent::Error {
                    context: "daily check-in".into(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let Some(task) = tasks.iter().find(|t| t.id == DAILY_CHECK_IN_TASK_ID) else {
            debug!(account = %identity, "No daily check-in task offered");
            return;
        };

        if !task.is_pending() {
            info!(account = %identity, "Daily check-in already claimed");
            self.reporter.record(EngineEvent::DailyTask { completed: false });
            return;
        }

        match self.api.claim_task(credential, identity, task.id).await {
            Ok(()) => {
                info!(account = %identity, "Daily check-in claimed");
                self.reporter.record(EngineEvent::DailyTask { completed: true });
            }
            Err(e) => self.reporter.record(EngineEvent::Error {
                context: "daily check-in".into(),
                message: e.to_string(),
            }),
        }
    }

    /// Remove the dead credential at `index` and mint a replacement from
    /// session `index mod sessionCount` into the same slot. Returns whether
    /// a replacement was stored.
    async fn replace_dead(&mut self, index: usize, sessions: &[PathBuf]) -> Result<bool> {
        self.store.remove(index)?;
        warn!(index, "Removed dead credential");

        let replaced = match session_for_index(sessions, index) {
            None => {
                warn!(index, "No session files available, credential not replaced");
                false
            }
            Some(session) => match self.minter.mint(session).await {
                Ok(credential) => match self.store.insert(index, credential) {
                    Ok(true) => {
                        info!(index, session = %session.display(), "Replaced dead credential");
                        true
                    }
                    Ok(false) => {
                        info!(index, session = %session.display(), "Minted credential already stored");
                        false
                    }
                    Err(e) => {
                        error!(index, error = %e, "Failed to store replacement credential");
                        false
                    }
                },
                Err(e) => {
                    warn!(index, session = %session.display(), error = %e, "Replacement mint failed");
                    false
                }
            },
        };

        self.store.reload()?;
        Ok(replaced)
    }
}

/// Log a human-readable pass summary.
pub fn log_pass_report(report: &PassReport) {
    info!(
        pass = report.pass_number,
        visited = report.accounts_visited,
        completed = report.completed,
        halted = report.halted,
        replaced = report.replaced,
        dropped = report.dropped,
        rounds = report.rounds,
        wins = report.wins,
        losses = report.losses,
        interrupted = report.interrupted,
        "Pass complete"
    );
}
