//! Storage abstraction for the trading engine.
//!
//! Defines the persistence contract for trade records and the kill-switch
//! latch, so the engine does not care which database sits behind it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::trading::safety::KillSwitchInfo;
use crate::trading::types::{EngineEvent, TradeRecord};

/// Formal contract for persistent operational memory.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Saves a terminal trade record. Returns the ID assigned by the store.
    async fn insert_trade(&self, record: &TradeRecord) -> Result<i64>;

    /// Records at or after `since`, oldest first.
    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>>;

    async fn trade_count(&self) -> Result<i64>;

    /// Persists a tripped kill-switch so it survives a restart.
    async fn save_kill_switch(&self, info: &KillSwitchInfo) -> Result<()>;

    async fn load_kill_switch(&self) -> Result<Option<KillSwitchInfo>>;

    async fn clear_kill_switch(&self) -> Result<()>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

/// Write every TradeRecord broadcast on the event bus to `store` until the
/// bus closes. Other events are ignored.
pub async fn persist_trades(store: Arc<dyn LedgerStorage>, mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Trade(record)) => {
                if let Err(e) = store.insert_trade(&record).await {
                    error!("Failed to persist {} record for {}: {:?}", record.action, record.mint, e);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Ledger writer lagged behind the event bus, {} events lost", skipped);
            }
            Err(RecvError::Closed) => {
                info!("Event bus closed. Ledger writer shutting down.");
                break;
            }
        }
    }
}

/// Volatile store used by paper sessions and tests.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    trades: Mutex<Vec<TradeRecord>>,
    kill_switch: Mutex<Option<KillSwitchInfo>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStorage for InMemoryLedger {
    async fn insert_trade(&self, record: &TradeRecord) -> Result<i64> {
        let mut trades = self.trades.lock().await;
        let id = trades.len() as i64 + 1;
        let mut stored = record.clone();
        stored.id = Some(id);
        trades.push(stored);
        Ok(id)
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let mut records: Vec<TradeRecord> = self
            .trades
            .lock()
            .await
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn trade_count(&self) -> Result<i64> {
        Ok(self.trades.lock().await.len() as i64)
    }

    async fn save_kill_switch(&self, info: &KillSwitchInfo) -> Result<()> {
        *self.kill_switch.lock().await = Some(info.clone());
        Ok(())
    }

    async fn load_kill_switch(&self) -> Result<Option<KillSwitchInfo>> {
        Ok(self.kill_switch.lock().await.clone())
    }

    async fn clear_kill_switch(&self) -> Result<()> {
        *self.kill_switch.lock().await = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_kill_switch_round_trip() -> Result<()> {
        let ledger = InMemoryLedger::new();
        assert!(ledger.load_kill_switch().await?.is_none());

        let info = KillSwitchInfo {
            reason: "10 errors in window".to_string(),
            activated_at: Utc::now(),
            error_count: 10,
        };
        ledger.save_kill_switch(&info).await?;
        assert_eq!(ledger.load_kill_switch().await?, Some(info));

        ledger.clear_kill_switch().await?;
        assert!(ledger.load_kill_switch().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_trades_writes_only_trade_events() -> Result<()> {
        use crate::trading::events::EventBus;
        use crate::trading::types::{TradeAction, TradeStatus};

        let store = Arc::new(InMemoryLedger::new());
        let bus = EventBus::new(16);
        let writer = tokio::spawn(persist_trades(store.clone(), bus.subscribe()));

        bus.emit(EngineEvent::KillSwitch {
            timestamp: Utc::now(),
            active: true,
            reason: "test".into(),
        });
        bus.emit(EngineEvent::Trade(TradeRecord {
            id: None,
            timestamp: Utc::now(),
            action: TradeAction::Open,
            mint: "MintA".into(),
            symbol: "AAA".into(),
            requested_amount: 0.1,
            realized_amount: Some(100.0),
            price_impact_pct: Some(0.1),
            slippage_bps: Some(50),
            latency_ms: 3,
            retry_count: 0,
            status: TradeStatus::Confirmed,
            failure: None,
            error: None,
            reason: None,
            signature: Some("sig".into()),
            pnl: None,
            pnl_pct: None,
        }));
        drop(bus);
        writer.await?;

        assert_eq!(store.trade_count().await?, 1);
        Ok(())
    }
}
