//! Persistence of trade records and the kill-switch across engine restarts

use anyhow::Result;
use auracle::trading::{
    EngineBuilder, EngineConfig, FailureKind, LedgerStorage, OpenOrder, SimulatedVenue, SqliteLedger,
    TradeStatus, WSOL_MINT,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_count(ledger: &SqliteLedger, expected: i64) -> Result<bool> {
    for _ in 0..100 {
        if ledger.trade_count().await? >= expected {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(false)
}

#[tokio::test]
async fn test_trade_records_reach_sqlite() -> Result<()> {
    let ledger = Arc::new(SqliteLedger::in_memory().await?);
    let venue = Arc::new(SimulatedVenue::new(WSOL_MINT, 10.0));
    let engine = EngineBuilder::new()
        .with_venue(venue.clone())
        .with_storage(ledger.clone())
        .build()
        .await?;

    venue.set_price("StoredMint", 0.001);
    let record = engine.coordinator().open(OpenOrder::new("StoredMint", "STORE", 0.1)).await;
    assert_eq!(record.status, TradeStatus::Confirmed);

    assert!(wait_for_count(&ledger, 1).await?);
    let stored = ledger.trades_since(Utc::now() - ChronoDuration::minutes(1)).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].mint, "StoredMint");
    assert_eq!(stored[0].signature, record.signature);
    Ok(())
}

#[tokio::test]
async fn test_kill_switch_survives_restart() -> Result<()> {
    let ledger = Arc::new(SqliteLedger::in_memory().await?);
    let mut config = EngineConfig::default();
    config.safety.max_errors = 3;

    let venue = Arc::new(SimulatedVenue::new(WSOL_MINT, 10.0));
    let first = EngineBuilder::new()
        .with_config(config.clone())
        .with_venue(venue.clone())
        .with_storage(ledger.clone())
        .build()
        .await?;

    for i in 0..3 {
        let mint = format!("BrokenMint{}", i);
        venue.set_price(&mint, 0.001);
        venue.push_submit_failure("node unhealthy");
        first.coordinator().open(OpenOrder::new(mint, "BRKN", 0.1)).await;
    }
    assert!(first.is_kill_switch_active().await);
    drop(first);

    // a fresh engine over the same ledger starts halted
    let second = EngineBuilder::new()
        .with_config(config.clone())
        .with_venue(venue.clone())
        .with_storage(ledger.clone())
        .build()
        .await?;
    assert!(second.is_kill_switch_active().await);

    venue.set_price("AfterRestart", 0.001);
    let record = second.coordinator().open(OpenOrder::new("AfterRestart", "NEXT", 0.1)).await;
    assert_eq!(record.failure, Some(FailureKind::KillSwitchActive));

    second.clear_kill_switch().await?;
    assert!(ledger.load_kill_switch().await?.is_none());

    let third = EngineBuilder::new()
        .with_config(config)
        .with_venue(venue)
        .with_storage(ledger.clone())
        .build()
        .await?;
    assert!(!third.is_kill_switch_active().await);
    Ok(())
}
