//! Main entry point for an AURACLE trading session
//!
//! In simulated mode the engine trades against the paper venue, fed by a
//! synthetic discovery stream. In live mode it trades through the configured
//! quote API and signer, reading candidates as JSON lines on stdin. Both run
//! until Ctrl-C.

use anyhow::Result;
use auracle::trading::{
    read_candidates, EngineBuilder, EngineConfig, EngineEvent, LedgerStorage, SimulatedVenue,
    SqliteLedger, VenueMode,
};
use auracle::TokenCandidate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    // Initialize logging
    let level = config
        .log_level
        .as_deref()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting AURACLE {:?} trading session", config.venue.mode);

    let ledger = Arc::new(SqliteLedger::connect(&config.storage.database_url).await?);
    info!("Ledger holds {} trade records", ledger.trade_count().await?);

    let (candidate_sender, candidate_receiver) = mpsc::channel::<TokenCandidate>(100);
    let builder = EngineBuilder::new().with_config(config.clone()).with_storage(ledger);

    let (engine, feed_handles): (_, Vec<JoinHandle<()>>) = match config.venue.mode {
        VenueMode::Simulated => {
            let venue = Arc::new(
                SimulatedVenue::new(config.execution.base_mint.clone(), config.venue.paper_balance)
                    .with_random_walk(42, 0.03)
                    .with_confirm_delay(Duration::from_millis(150)),
            );
            let engine = builder
                .with_venue(venue.clone())
                .with_balance_oracle(venue.clone())
                .build()
                .await?;

            let feed_handle = tokio::spawn(synthetic_feed(venue.clone(), candidate_sender));
            let walk_handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                loop {
                    ticker.tick().await;
                    venue.tick();
                }
            });
            (engine, vec![feed_handle, walk_handle])
        }
        VenueMode::Live => {
            // The builder wires the live venue from the config
            let engine = builder.build().await?;
            info!("Reading discovery candidates as JSON lines from stdin");
            let feed_handle = tokio::spawn(async move {
                match read_candidates(BufReader::new(tokio::io::stdin()), candidate_sender).await {
                    Ok(count) => info!("Discovery input ended after {} candidates", count),
                    Err(e) => error!("Discovery input failed: {:?}", e),
                }
            });
            (engine, vec![feed_handle])
        }
    };

    let engine_handle = tokio::spawn(engine.clone().run(candidate_receiver));

    let mut events = engine.subscribe();
    let events_handle = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let EngineEvent::KillSwitch { active: true, reason, .. } = &event {
                error!("Kill-switch tripped: {}", reason);
            }
        }
    });

    let summary_engine = engine.clone();
    let summary_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            summary_engine.log_portfolio_summary().await;
        }
    });

    tokio::signal::ctrl_c().await?;
    warn!("Ctrl-C received, stopping session");

    engine.shutdown();
    for handle in &feed_handles {
        handle.abort();
    }
    summary_handle.abort();
    if let Err(e) = engine_handle.await {
        error!("Engine task failed: {}", e);
    }
    events_handle.abort();

    engine.log_portfolio_summary().await;
    let report = engine.safety_report().await;
    info!(
        "Session finished: {} trades today, {} recent errors, kill-switch {}",
        report.daily_trades,
        report.total_recent_errors,
        if report.kill_switch.is_some() { "ACTIVE" } else { "clear" }
    );

    Ok(())
}

/// Emit a random candidate every few seconds and give it a starting price.
async fn synthetic_feed(venue: Arc<SimulatedVenue>, sender: mpsc::Sender<TokenCandidate>) {
    let mut rng = StdRng::seed_from_u64(1337);
    let mut ticker = tokio::time::interval(Duration::from_secs(3));

    for i in 1u32.. {
        ticker.tick().await;

        let mint = format!("PaperMint{:05}", i);
        let candidate = TokenCandidate {
            mint: mint.clone(),
            symbol: format!("PAPER{}", i),
            liquidity: rng.gen_range(500.0..80_000.0),
            volume_24h: rng.gen_range(100.0..40_000.0),
            price_change_24h: rng.gen_range(-0.4..0.6),
            holders: rng.gen_range(10..900),
            dev_holdings_pct: rng.gen_range(0.0..40.0),
            deployer: None,
            source: Some(if rng.gen_bool(0.3) { "sniper" } else { "scanner" }.to_string()),
        };
        venue.set_price(&mint, rng.gen_range(0.000_000_5..0.000_05));

        if sender.send(candidate).await.is_err() {
            break;
        }
    }
}
