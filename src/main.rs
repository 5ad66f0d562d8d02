//! DRAWHOUSE: risk-managed wagering core.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the house from disk (or creates a fresh one), serves the HTTP
//! API and runs the maintenance sweep loop with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use drawhouse::api::{self, routes::ApiState};
use drawhouse::clock::{Clock, SystemClock};
use drawhouse::config;
use drawhouse::engine::sweeper::Sweeper;
use drawhouse::engine::House;
use drawhouse::storage;
use drawhouse::types::format_amount;

const BANNER: &str = r#"
 ____  ____      ___        ___   _  ___  _   _ ____  _____
|  _ \|  _ \    / \ \      / / | | |/ _ \| | | / ___|| ____|
| | | | |_) |  / _ \ \ /\ / /| |_| | | | | | | \___ \|  _|
| |_| |  _ <  / ___ \ V  V / |  _  | |_| | |_| |___) | |___
|____/|_| \_\/_/   \_\_/\_/  |_| |_|\___/ \___/|____/|_____|

  Risk-managed wagering core, v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.house.name,
        currency = %cfg.house.currency,
        sweep_interval_secs = cfg.house.sweep_interval_secs,
        "DRAWHOUSE starting up"
    );

    let house_config = cfg.house_config()?;
    let state_file = cfg.house.state_file.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // -- Restore or create the house -------------------------------------

    let house = match storage::load_snapshot(state_file.as_deref())? {
        Some(snapshot) => {
            let house = House::restore(snapshot, house_config, clock)
                .context("Failed to restore house from snapshot")?;
            let pool = house.pool_status();
            info!(
                total_pool = %format_amount(pool.total_pool),
                escrowed = %format_amount(pool.escrowed_stakes),
                draws = house.draws().len(),
                "Resumed from saved snapshot"
            );
            house
        }
        None => {
            let house = House::new(house_config, clock).context("Failed to create house")?;
            let bankroll = cfg.initial_bankroll()?;
            if bankroll > 0 {
                house.deposit(bankroll).context("Initial bankroll deposit failed")?;
            }
            info!(total_pool = %format_amount(bankroll), "Fresh start");
            house
        }
    };
    let house = Arc::new(house);

    // -- HTTP API ----------------------------------------------------------

    if cfg.server.enabled {
        let token = cfg.operator_token();
        if token.is_none() {
            warn!(
                env = %cfg.server.operator_token_env,
                "No operator token set; operator routes will refuse every request"
            );
        }
        let state = Arc::new(ApiState::new(house.clone(), token));
        api::spawn_api(state, cfg.server.port).await?;
    }

    // -- Sweep loop --------------------------------------------------------

    let sweeper = Sweeper::new(cfg.sweeper_config()?);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.house.sweep_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.house.sweep_interval_secs,
        "Entering sweep loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweeper.sweep(&house);
                if let Err(e) = storage::save_snapshot(&house.snapshot(), state_file.as_deref()) {
                    error!(error = %e, "Failed to save snapshot");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    storage::save_snapshot(&house.snapshot(), state_file.as_deref())?;
    let pool = house.pool_status();
    info!(
        total_pool = %format_amount(pool.total_pool),
        escrowed = %format_amount(pool.escrowed_stakes),
        pending_fees = %format_amount(house.pending_operator_fees()),
        "DRAWHOUSE shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("drawhouse=info"));

    let json_logging = std::env::var("DRAWHOUSE_LOG_JSON").is_ok();

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
