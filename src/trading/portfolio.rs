//! PortfolioAggregator - read-only summaries over open positions and the trade journal.

use crate::trading::book::PositionBook;
use crate::trading::events::TradeJournal;
use crate::trading::types::{Position, PositionState, TradeAction, TradeRecord};
use crate::types::Pubkey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// One row per open position.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSummary {
    pub mint: Pubkey,
    pub symbol: String,
    pub state: PositionState,
    pub entry_size: f64,
    pub current_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub age_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub timestamp: DateTime<Utc>,
    pub open_positions: usize,
    pub max_positions: usize,
    /// Fraction of position slots still free
    pub headroom: f64,
    pub total_invested: f64,
    pub total_current_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub closed_trades: usize,
    pub win_rate_percent: f64,
    pub profit_factor: f64,
    /// Best and worst closed trade, percent
    pub best_trade_pct: Option<f64>,
    pub worst_trade_pct: Option<f64>,
    pub positions: Vec<PositionSummary>,
}

pub struct PortfolioAggregator {
    book: Arc<PositionBook>,
    journal: Arc<TradeJournal>,
}

impl PortfolioAggregator {
    pub fn new(book: Arc<PositionBook>, journal: Arc<TradeJournal>) -> Self {
        Self { book, journal }
    }

    pub async fn summary(&self) -> PortfolioSummary {
        let (positions, committed) = self.book.snapshot_committed().await;
        let records = self.journal.records().await;
        summarize(&positions, committed, &records, self.book.max_positions(), Utc::now())
    }

    pub async fn log_summary(&self) {
        let s = self.summary().await;
        info!(
            "Portfolio: {} open ({:.0}% headroom), invested {:.4} SOL, value {:.4} SOL, unrealized {:+.4}, realized {:+.4}, win rate {:.1}% over {} closes",
            s.open_positions,
            s.headroom * 100.0,
            s.total_invested,
            s.total_current_value,
            s.unrealized_pnl,
            s.realized_pnl,
            s.win_rate_percent,
            s.closed_trades
        );
    }
}

/// Pure summary over a position snapshot and the closed-trade history.
/// `committed` counts positions plus opens still in flight; headroom is
/// measured against it, the same count the decision engine sizes from.
pub fn summarize(
    positions: &[Position],
    committed: usize,
    records: &[TradeRecord],
    max_positions: usize,
    now: DateTime<Utc>,
) -> PortfolioSummary {
    let rows: Vec<PositionSummary> = positions
        .iter()
        .map(|p| PositionSummary {
            mint: p.mint.clone(),
            symbol: p.symbol.clone(),
            state: p.state,
            entry_size: p.entry_size,
            current_value: p.current_value,
            pnl: p.unrealized_pnl(),
            pnl_pct: p.gain() * 100.0,
            age_secs: p.age_secs(now),
        })
        .collect();

    let total_invested: f64 = positions.iter().map(|p| p.entry_size).sum();
    let total_current_value: f64 = positions.iter().map(|p| p.current_value).sum();

    let closes: Vec<&TradeRecord> = records
        .iter()
        .filter(|r| r.action == TradeAction::Close && r.is_confirmed())
        .collect();

    let mut realized_pnl = 0.0;
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    let mut wins = 0usize;
    let mut best: Option<f64> = None;
    let mut worst: Option<f64> = None;

    for record in &closes {
        let pnl = record.pnl.unwrap_or_default();
        realized_pnl += pnl;
        if pnl > 0.0 {
            wins += 1;
            gross_profit += pnl;
        } else {
            gross_loss += pnl.abs();
        }
        if let Some(pct) = record.pnl_pct {
            best = Some(best.map_or(pct, |b| b.max(pct)));
            worst = Some(worst.map_or(pct, |w| w.min(pct)));
        }
    }

    let win_rate_percent = if closes.is_empty() {
        0.0
    } else {
        wins as f64 / closes.len() as f64 * 100.0
    };
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let headroom = if max_positions == 0 {
        0.0
    } else {
        let committed = committed.max(positions.len());
        max_positions.saturating_sub(committed) as f64 / max_positions as f64
    };

    PortfolioSummary {
        timestamp: now,
        open_positions: positions.len(),
        max_positions,
        headroom,
        total_invested,
        total_current_value,
        unrealized_pnl: total_current_value - total_invested,
        realized_pnl,
        closed_trades: closes.len(),
        win_rate_percent,
        profit_factor,
        best_trade_pct: best,
        worst_trade_pct: worst,
        positions: rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::types::TradeStatus;
    use crate::types::EntryOrigin;

    fn close(pnl: f64, pct: f64, status: TradeStatus) -> TradeRecord {
        TradeRecord {
            id: None,
            timestamp: Utc::now(),
            action: TradeAction::Close,
            mint: "m".into(),
            symbol: "M".into(),
            requested_amount: 100.0,
            realized_amount: Some(1.0 + pnl),
            price_impact_pct: None,
            slippage_bps: None,
            latency_ms: 1,
            retry_count: 0,
            status,
            failure: None,
            error: None,
            reason: Some("profit_target".into()),
            signature: None,
            pnl: Some(pnl),
            pnl_pct: Some(pct),
        }
    }

    #[test]
    fn test_summary_figures() {
        let now = Utc::now();
        let mut a = Position::new("a".into(), "A".into(), 1.0, 100.0, EntryOrigin::Normal, now);
        a.observe_value(1.2, None);
        let b = Position::new("b".into(), "B".into(), 0.5, 100.0, EntryOrigin::Sniper, now);

        let records = vec![
            close(0.3, 30.0, TradeStatus::Confirmed),
            close(-0.1, -10.0, TradeStatus::Confirmed),
            close(-0.5, -50.0, TradeStatus::Failed),
        ];

        let s = summarize(&[a, b], 2, &records, 10, now);
        assert_eq!(s.open_positions, 2);
        assert!((s.headroom - 0.8).abs() < 1e-9);
        assert!((s.total_invested - 1.5).abs() < 1e-9);
        assert!((s.total_current_value - 1.7).abs() < 1e-9);
        assert!((s.unrealized_pnl - 0.2).abs() < 1e-9);
        assert!((s.realized_pnl - 0.2).abs() < 1e-9);
        assert_eq!(s.closed_trades, 2);
        assert!((s.win_rate_percent - 50.0).abs() < 1e-9);
        assert!((s.profit_factor - 3.0).abs() < 1e-9);
        assert_eq!(s.best_trade_pct, Some(30.0));
        assert_eq!(s.worst_trade_pct, Some(-10.0));
        assert_eq!(s.positions.len(), 2);
        assert!((s.positions[0].pnl_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_portfolio() {
        let s = summarize(&[], 0, &[], 10, Utc::now());
        assert_eq!(s.headroom, 1.0);
        assert_eq!(s.win_rate_percent, 0.0);
        assert!(s.best_trade_pct.is_none());
    }

    #[tokio::test]
    async fn test_headroom_counts_in_flight_opens() -> Result<(), crate::trading::ExecutionError> {
        let book = Arc::new(PositionBook::new(10));
        let aggregator = PortfolioAggregator::new(book.clone(), Arc::new(TradeJournal::new()));
        book.reserve_open("PendingMint").await?;

        let s = aggregator.summary().await;
        assert_eq!(s.open_positions, 0);
        assert!((s.headroom - 0.9).abs() < 1e-9);
        Ok(())
    }
}
