//! RACER: multi-account automation engine for the Racer prediction mini-game
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the game client, credential store, reporter and optional
//! operator channel, then runs the pass loop with graceful shutdown.

use anyhow::Result;
use clap::{Parser, Subcommand};
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use racer::api::racer::RacerClient;
use racer::api::retry::RetryPolicy;
use racer::api::GameApi;
use racer::config::{self, AppConfig, TelegramConfig};
use racer::credentials::minter::{
    mint_from_sessions, CommandMinter, CredentialMinter, SessionDirectory,
};
use racer::credentials::CredentialStore;
use racer::dashboard::{self, routes::DashboardState};
use racer::engine::automation::{AutomationLoop, LoopOptions};
use racer::engine::boost::BoostPolicy;
use racer::engine::pacer::{Pacer, TokioPacer};
use racer::engine::prediction::RoundTiming;
use racer::reporter::telegram::TelegramChannel;
use racer::reporter::{EngineStatus, StatsReporter, StatusChannel};
use racer::types::BoostKind;

const BANNER: &str = r#"
 ____      _    ____ _____ ____
|  _ \    / \  / ___| ____|  _ \
| |_) |  / _ \| |   |  _| | |_) |
|  _ <  / ___ \ |___| |___|  _ <
|_| \_\/_/   \_\____|_____|_| \_\

  Multi-account Racer automation engine
  v0.1.0
"#;

/// Racer automation CLI
#[derive(Parser, Debug)]
#[command(name = "racer")]
#[command(author, version, about = "Multi-account automation for the Racer mini-game")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml", env = "RACER_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the automation loop (default)
    Run {
        /// Upgrade the fuel tank whenever affordable
        #[arg(long)]
        upgrade_fuel_tank: bool,
        /// Upgrade the turbo charger whenever affordable
        #[arg(long)]
        upgrade_turbo: bool,
    },

    /// Mint credentials from every session file, append them and exit
    Mint,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    init_logging();

    println!("{BANNER}");
    info!(
        engine_name = %cfg.engine.name,
        credentials = %cfg.engine.credentials_file.display(),
        sessions = %cfg.engine.session_dir.display(),
        "RACER starting up"
    );

    match cli.command.unwrap_or(Commands::Run {
        upgrade_fuel_tank: false,
        upgrade_turbo: false,
    }) {
        Commands::Mint => run_mint(&cfg).await,
        Commands::Run {
            upgrade_fuel_tank,
            upgrade_turbo,
        } => run_engine(cfg, upgrade_fuel_tank, upgrade_turbo).await,
    }
}

/// Mint from every session and append to the store.
async fn run_mint(cfg: &AppConfig) -> Result<()> {
    let sessions = SessionDirectory::new(&cfg.engine.session_dir).list()?;
    if sessions.is_empty() {
        warn!("No session files found, nothing to mint");
        return Ok(());
    }

    let mut store = CredentialStore::open(&cfg.engine.credentials_file)?;
    let minter = CommandMinter::new(cfg.minter.program.clone(), cfg.minter.args.clone());
    let added = mint_from_sessions(&minter, &sessions, &mut store).await?;

    info!(
        sessions = sessions.len(),
        added,
        total = store.len(),
        "Minting complete"
    );
    Ok(())
}

async fn run_engine(cfg: AppConfig, upgrade_fuel_tank: bool, upgrade_turbo: bool) -> Result<()> {
    // -- Initialise components -------------------------------------------

    let pacer: Arc<dyn Pacer> = Arc::new(TokioPacer);
    let retry = RetryPolicy::new(cfg.retry.max_attempts, cfg.retry.delay());
    let api: Arc<dyn GameApi> = Arc::new(RacerClient::new(&cfg.api, retry, pacer.clone())?);
    let minter: Arc<dyn CredentialMinter> = Arc::new(CommandMinter::new(
        cfg.minter.program.clone(),
        cfg.minter.args.clone(),
    ));
    let store = CredentialStore::open(&cfg.engine.credentials_file)?;

    // Without an operator channel there is nobody to send /start.
    let telegram = build_telegram(&cfg.telegram)?;
    let status = Arc::new(EngineStatus::new(
        cfg.engine.start_active || telegram.is_none(),
    ));
    let channel = telegram
        .clone()
        .map(|t| t as Arc<dyn StatusChannel>);
    let reporter = Arc::new(StatsReporter::new(
        cfg.engine.name.clone(),
        status.clone(),
        channel,
    ));

    let boosts = BoostPolicy::new(
        cfg.boosts.upgrade_fuel_tank || upgrade_fuel_tank,
        cfg.boosts.upgrade_turbo || upgrade_turbo,
    );
    info!(
        fuel_tank = boosts.opted_in(BoostKind::FuelTank),
        turbo = boosts.opted_in(BoostKind::Turbo),
        active = status.is_active(),
        "Upgrade preferences"
    );

    // -- Background tasks ------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(reporter.clone().run_periodic(
        Duration::from_secs(cfg.reporter.interval_secs),
        shutdown_rx.clone(),
    ));

    if let Some(telegram) = &telegram {
        tokio::spawn(telegram.clone().listen(
            status.clone(),
            reporter.clone(),
            shutdown_rx.clone(),
        ));
    }

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(reporter.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port, shutdown_rx.clone()).await?;
    }

    // -- Main loop -------------------------------------------------------

    let options = LoopOptions {
        pass_interval: cfg.engine.pass_interval(),
        inactive_poll: cfg.engine.inactive_poll(),
        boosts,
        timing: RoundTiming::default(),
    };
    let mut engine = AutomationLoop::new(
        api,
        minter,
        store,
        SessionDirectory::new(&cfg.engine.session_dir),
        reporter.clone(),
        pacer,
        options,
        shutdown_rx,
    );

    info!("Entering main loop. Press Ctrl+C to stop.");

    let run = engine.run();
    tokio::pin!(run);
    let signal = tokio::signal::ctrl_c();
    tokio::pin!(signal);

    tokio::select! {
        result = &mut run => result?,
        _ = &mut signal => {
            info!("Shutdown signal received, finishing current account.");
            let _ = shutdown_tx.send(true);
            run.await?;
        }
    }

    let _ = shutdown_tx.send(true);
    reporter.publish().await;
    info!("RACER shut down cleanly.");

    Ok(())
}

/// Build the Telegram channel when a bot token is configured.
fn build_telegram(cfg: &TelegramConfig) -> Result<Option<Arc<TelegramChannel>>> {
    let token = cfg
        .bot_token_env
        .as_deref()
        .and_then(|env| AppConfig::resolve_env(env).ok())
        .filter(|t| !t.trim().is_empty());
    let Some(token) = token else {
        warn!("No Telegram bot token configured, status updates will only be logged");
        return Ok(None);
    };

    let users = match cfg.authorized_users_env.as_deref() {
        Some(env) => config::parse_user_ids(&AppConfig::resolve_env(env).unwrap_or_default())?,
        None => Vec::new(),
    };
    if users.is_empty() {
        warn!("No authorized Telegram users configured, every command will be rejected");
    }

    Ok(Some(Arc::new(TelegramChannel::new(Secret::new(token), users)?)))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("racer=info"));

    let json_logging = std::env::var("RACER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
