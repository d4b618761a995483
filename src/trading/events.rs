//! Event emission and the in-memory trade journal.
//!
//! Trading code never waits on notification delivery: events go out over a
//! broadcast channel and a slow subscriber only loses old events.

use crate::trading::types::{EngineEvent, TradeRecord};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error for the engine
        if self.sender.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Append-only history of terminal trade outcomes.
#[derive(Debug, Default)]
pub struct TradeJournal {
    records: RwLock<Vec<TradeRecord>>,
}

impl TradeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, record: TradeRecord) {
        self.records.write().await.push(record);
    }

    pub async fn records(&self) -> Vec<TradeRecord> {
        self.records.read().await.clone()
    }

    pub async fn records_for(&self, mint: &str) -> Vec<TradeRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.mint == mint)
            .cloned()
            .collect()
    }

    pub async fn since(&self, since: DateTime<Utc>) -> Vec<TradeRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
