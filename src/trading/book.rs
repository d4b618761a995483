//! The open-position set.
//!
//! Positions are indexed by mint and only change through the methods here.
//! Mints with an open order in flight are reserved so a duplicate discovery
//! event cannot open a second position.

use crate::trading::error::ExecutionError;
use crate::trading::types::{Position, PositionState};
use crate::types::Pubkey;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct BookInner {
    positions: HashMap<Pubkey, Position>,
    pending_opens: HashSet<Pubkey>,
}

impl BookInner {
    fn committed(&self) -> usize {
        self.positions.len() + self.pending_opens.len()
    }
}

#[derive(Debug)]
pub struct PositionBook {
    inner: RwLock<BookInner>,
    max_positions: usize,
}

impl PositionBook {
    pub fn new(max_positions: usize) -> Self {
        Self {
            inner: RwLock::new(BookInner::default()),
            max_positions,
        }
    }

    /// Reserve `mint` for an open order. Fails when the mint is already held
    /// or opening, or when every position slot is committed.
    pub async fn reserve_open(&self, mint: &str) -> Result<(), ExecutionError> {
        let mut inner = self.inner.write().await;
        if inner.positions.contains_key(mint) || inner.pending_opens.contains(mint) {
            return Err(ExecutionError::AlreadyOpen(mint.to_string()));
        }
        if inner.committed() >= self.max_positions {
            return Err(ExecutionError::LimitExceeded(format!(
                "max open positions reached ({})",
                self.max_positions
            )));
        }
        inner.pending_opens.insert(mint.to_string());
        Ok(())
    }

    /// Drop a reservation after a failed open.
    pub async fn release_open(&self, mint: &str) {
        self.inner.write().await.pending_opens.remove(mint);
    }

    /// Turn a reservation into a position after a confirmed open.
    pub async fn insert_confirmed(&self, position: Position) {
        let mut inner = self.inner.write().await;
        inner.pending_opens.remove(&position.mint);
        debug!("Position added for {} ({:.4} SOL)", position.mint, position.entry_size);
        inner.positions.insert(position.mint.clone(), position);
    }

    /// Move a position to CLOSING. Only one close per mint can be in flight.
    pub async fn begin_close(&self, mint: &str) -> Result<Position, ExecutionError> {
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(mint)
            .ok_or_else(|| ExecutionError::PositionNotFound(mint.to_string()))?;
        match position.state {
            PositionState::Closing => Err(ExecutionError::CloseInProgress(mint.to_string())),
            PositionState::Closed => Err(ExecutionError::PositionNotFound(mint.to_string())),
            _ => {
                position.state = PositionState::Closing;
                Ok(position.clone())
            }
        }
    }

    /// Remove a position after a confirmed close.
    pub async fn finish_close(&self, mint: &str) -> Option<Position> {
        let mut inner = self.inner.write().await;
        inner.positions.remove(mint).map(|mut p| {
            p.state = PositionState::Closed;
            p
        })
    }

    /// A close exhausted its retries; keep the position for the next cycle.
    pub async fn mark_failed_close(&self, mint: &str) {
        let mut inner = self.inner.write().await;
        if let Some(position) = inner.positions.get_mut(mint) {
            position.state = PositionState::FailedClose;
            position.failed_closes += 1;
            warn!("Close failed for {} ({} failed attempts so far)", mint, position.failed_closes);
        }
    }

    /// Put a CLOSING position back to MONITORING without counting a failure,
    /// used when a close was refused before anything was submitted.
    pub async fn revert_close(&self, mint: &str) {
        let mut inner = self.inner.write().await;
        if let Some(position) = inner.positions.get_mut(mint) {
            if position.state == PositionState::Closing {
                position.state = PositionState::Monitoring;
            }
        }
    }

    /// Promote OPEN and FAILED_CLOSE positions to MONITORING and return every
    /// position that should be evaluated this cycle.
    pub async fn positions_to_monitor(&self) -> Vec<Position> {
        let mut inner = self.inner.write().await;
        inner
            .positions
            .values_mut()
            .filter_map(|p| {
                if matches!(p.state, PositionState::Open | PositionState::FailedClose) {
                    p.state = PositionState::Monitoring;
                }
                (p.state == PositionState::Monitoring).then(|| p.clone())
            })
            .collect()
    }

    /// Apply `f` to the position for `mint` if it is still MONITORING.
    pub async fn update_monitoring<F>(&self, mint: &str, f: F) -> Option<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut inner = self.inner.write().await;
        let position = inner.positions.get_mut(mint)?;
        if position.state != PositionState::Monitoring {
            return None;
        }
        f(position);
        Some(position.clone())
    }

    /// Drop a position without closing it (operator action for positions
    /// that can no longer be sold).
    pub async fn remove(&self, mint: &str) -> Option<Position> {
        self.inner.write().await.positions.remove(mint)
    }

    pub async fn get(&self, mint: &str) -> Option<Position> {
        self.inner.read().await.positions.get(mint).cloned()
    }

    pub async fn contains(&self, mint: &str) -> bool {
        let inner = self.inner.read().await;
        inner.positions.contains_key(mint) || inner.pending_opens.contains(mint)
    }

    pub async fn snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.inner.read().await.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
        positions
    }

    /// Positions oldest first, together with the committed count (positions
    /// plus in-flight opens) read under the same lock.
    pub async fn snapshot_committed(&self) -> (Vec<Position>, usize) {
        let inner = self.inner.read().await;
        let mut positions: Vec<Position> = inner.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
        (positions, inner.committed())
    }

    /// Mints that are held or have an open order in flight.
    pub async fn held_mints(&self) -> HashSet<Pubkey> {
        let inner = self.inner.read().await;
        inner
            .positions
            .keys()
            .chain(inner.pending_opens.iter())
            .cloned()
            .collect()
    }

    /// Positions plus in-flight opens.
    pub async fn committed_count(&self) -> usize {
        self.inner.read().await.committed()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.positions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.positions.is_empty()
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryOrigin;
    use chrono::Utc;

    fn position(mint: &str) -> Position {
        Position::new(mint.into(), "SYM".into(), 0.1, 100.0, EntryOrigin::Normal, Utc::now())
    }

    #[tokio::test]
    async fn test_reservation_blocks_duplicates() {
        let book = PositionBook::new(10);
        book.reserve_open("a").await.unwrap();
        assert_eq!(
            book.reserve_open("a").await,
            Err(ExecutionError::AlreadyOpen("a".into()))
        );

        book.insert_confirmed(position("a")).await;
        assert!(book.reserve_open("a").await.is_err());
        assert_eq!(book.committed_count().await, 1);

        book.reserve_open("b").await.unwrap();
        book.release_open("b").await;
        assert!(!book.contains("b").await);
    }

    #[tokio::test]
    async fn test_slot_limit_counts_pending() {
        let book = PositionBook::new(2);
        book.reserve_open("a").await.unwrap();
        book.insert_confirmed(position("a")).await;
        book.reserve_open("b").await.unwrap();
        assert!(matches!(
            book.reserve_open("c").await,
            Err(ExecutionError::LimitExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_close_lifecycle() {
        let book = PositionBook::new(10);
        book.insert_confirmed(position("a")).await;
        assert_eq!(book.positions_to_monitor().await.len(), 1);

        let closing = book.begin_close("a").await.unwrap();
        assert_eq!(closing.state, PositionState::Closing);
        assert_eq!(
            book.begin_close("a").await.unwrap_err(),
            ExecutionError::CloseInProgress("a".into())
        );
        // CLOSING positions are skipped by the monitor
        assert!(book.positions_to_monitor().await.is_empty());

        book.mark_failed_close("a").await;
        let monitored = book.positions_to_monitor().await;
        assert_eq!(monitored[0].state, PositionState::Monitoring);
        assert_eq!(monitored[0].failed_closes, 1);

        book.begin_close("a").await.unwrap();
        let closed = book.finish_close("a").await.unwrap();
        assert_eq!(closed.state, PositionState::Closed);
        assert!(book.is_empty().await);
        assert!(matches!(
            book.begin_close("a").await,
            Err(ExecutionError::PositionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_only_touches_monitoring() {
        let book = PositionBook::new(10);
        book.insert_confirmed(position("a")).await;
        assert!(book.update_monitoring("a", |p| p.current_value = 1.0).await.is_none());

        book.positions_to_monitor().await;
        let updated = book.update_monitoring("a", |p| p.current_value = 1.0).await.unwrap();
        assert_eq!(updated.current_value, 1.0);
    }
}
