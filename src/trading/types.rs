//! Data model for the trading engine.

use crate::trading::error::FailureKind;
use crate::types::{EntryOrigin, Pubkey, TokenCandidate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk classification of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Approved,
    Monitor,
    Flagged,
    Rejected,
}

/// Result of a single `RiskEvaluator::evaluate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub candidate: TokenCandidate,
    pub safe: bool,
    pub score: f64,
    /// Human-readable reasons, in the order the rules fired
    pub reasons: Vec<String>,
    pub classification: Classification,
}

/// Lifecycle of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    /// Just created from a confirmed open
    Open,
    /// Steady state, evaluated every monitor cycle
    Monitoring,
    /// Close submitted, waiting for a terminal outcome
    Closing,
    Closed,
    /// Close exhausted its retries; re-evaluated next cycle
    FailedClose,
}

/// An open position. Owned by the `PositionBook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub mint: Pubkey,
    pub symbol: String,
    /// SOL spent on entry
    pub entry_size: f64,
    /// Tokens received on entry
    pub token_amount: f64,
    pub entry_time: DateTime<Utc>,
    /// SOL per token at entry
    pub entry_price: f64,
    /// Latest SOL value of the whole position
    pub current_value: f64,
    pub highest_value: f64,
    /// Trailing-stop floor in SOL; never lowered while open
    pub trailing_floor: f64,
    pub state: PositionState,
    pub origin: EntryOrigin,
    /// Max-hold deferral already granted in profit-only mode
    pub hold_extended: bool,
    pub failed_closes: u32,
}

impl Position {
    pub fn new(
        mint: Pubkey,
        symbol: String,
        entry_size: f64,
        token_amount: f64,
        origin: EntryOrigin,
        entry_time: DateTime<Utc>,
    ) -> Self {
        let entry_price = if token_amount > 0.0 { entry_size / token_amount } else { 0.0 };
        Self {
            mint,
            symbol,
            entry_size,
            token_amount,
            entry_time,
            entry_price,
            current_value: entry_size,
            highest_value: entry_size,
            trailing_floor: 0.0,
            state: PositionState::Open,
            origin,
            hold_extended: false,
            failed_closes: 0,
        }
    }

    /// Gain as a fraction of the entry size (negative for a loss).
    pub fn gain(&self) -> f64 {
        if self.entry_size <= 0.0 {
            return 0.0;
        }
        (self.current_value - self.entry_size) / self.entry_size
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.current_value - self.entry_size
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.entry_time).num_seconds().max(0) as u64
    }

    /// Record a fresh valuation. Raises the peak and, when trailing stops are
    /// enabled, the floor; the floor never moves down.
    pub fn observe_value(&mut self, value: f64, trailing_fraction: Option<f64>) {
        self.current_value = value;
        if value > self.highest_value {
            self.highest_value = value;
            if let Some(fraction) = trailing_fraction {
                let candidate = value * (1.0 - fraction);
                if candidate > self.trailing_floor {
                    self.trailing_floor = candidate;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Open,
    Close,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Open => write!(f, "open"),
            TradeAction::Close => write!(f, "close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Confirmed,
    Failed,
    Cancelled,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Confirmed => write!(f, "confirmed"),
            TradeStatus::Failed => write!(f, "failed"),
            TradeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    QuickProfit,
    ProfitTarget,
    TrailingStop,
    StopLoss,
    MaxHold,
    MomentumDecline,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::QuickProfit => "quick_profit",
            ExitReason::ProfitTarget => "profit_target",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::MaxHold => "max_hold",
            ExitReason::MomentumDecline => "momentum_decline",
            ExitReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only outcome of one execution attempt sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Database record ID (set by storage)
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub mint: Pubkey,
    pub symbol: String,
    /// SOL for opens, tokens for closes
    pub requested_amount: f64,
    /// Tokens for opens, SOL for closes
    pub realized_amount: Option<f64>,
    pub price_impact_pct: Option<f64>,
    pub slippage_bps: Option<u16>,
    pub latency_ms: u64,
    pub retry_count: u32,
    pub status: TradeStatus,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    /// Exit trigger for closes
    pub reason: Option<String>,
    pub signature: Option<String>,
    /// Realized P&L in SOL for confirmed closes
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
}

impl TradeRecord {
    pub fn is_confirmed(&self) -> bool {
        self.status == TradeStatus::Confirmed
    }
}

/// Everything the engine reports to notification/logging collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Trade(TradeRecord),
    ExitTriggered {
        timestamp: DateTime<Utc>,
        mint: Pubkey,
        symbol: String,
        reason: ExitReason,
        value: f64,
        gain: f64,
    },
    KillSwitch {
        timestamp: DateTime<Utc>,
        active: bool,
        reason: String,
    },
    CandidateRejected {
        timestamp: DateTime<Utc>,
        mint: Pubkey,
        reason: String,
    },
}

/// Flat view of an event: timestamp, mint, action, amount, status, reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub timestamp: DateTime<Utc>,
    pub mint: Option<Pubkey>,
    pub action: String,
    pub amount: Option<f64>,
    pub status: String,
    pub reason: Option<String>,
}

impl EngineEvent {
    pub fn summary(&self) -> EventSummary {
        match self {
            EngineEvent::Trade(record) => EventSummary {
                timestamp: record.timestamp,
                mint: Some(record.mint.clone()),
                action: record.action.to_string(),
                amount: Some(record.requested_amount),
                status: record.status.to_string(),
                reason: record.reason.clone().or_else(|| record.error.clone()),
            },
            EngineEvent::ExitTriggered { timestamp, mint, reason, value, .. } => EventSummary {
                timestamp: *timestamp,
                mint: Some(mint.clone()),
                action: "exit_trigger".to_string(),
                amount: Some(*value),
                status: "closing".to_string(),
                reason: Some(reason.to_string()),
            },
            EngineEvent::KillSwitch { timestamp, active, reason } => EventSummary {
                timestamp: *timestamp,
                mint: None,
                action: "kill_switch".to_string(),
                amount: None,
                status: if *active { "active" } else { "cleared" }.to_string(),
                reason: Some(reason.clone()),
            },
            EngineEvent::CandidateRejected { timestamp, mint, reason } => EventSummary {
                timestamp: *timestamp,
                mint: Some(mint.clone()),
                action: "evaluate".to_string(),
                amount: None,
                status: "rejected".to_string(),
                reason: Some(reason.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(entry: f64) -> Position {
        Position::new("mint".into(), "SYM".into(), entry, 1000.0, EntryOrigin::Normal, Utc::now())
    }

    #[test]
    fn test_gain_and_entry_price() {
        let mut p = position(1.0);
        assert_eq!(p.entry_price, 0.001);
        p.observe_value(1.3, None);
        assert!((p.gain() - 0.3).abs() < 1e-9);
        assert!((p.unrealized_pnl() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_floor_never_decreases() {
        let mut p = position(1.0);
        let mut last_floor = p.trailing_floor;
        for value in [1.1, 1.3, 0.9, 1.2, 1.5, 0.5, 1.4] {
            p.observe_value(value, Some(0.1));
            assert!(p.trailing_floor >= last_floor);
            last_floor = p.trailing_floor;
        }
        assert!((p.highest_value - 1.5).abs() < 1e-9);
        assert!((p.trailing_floor - 1.35).abs() < 1e-9);
    }

    #[test]
    fn test_floor_untouched_without_trailing() {
        let mut p = position(1.0);
        p.observe_value(2.0, None);
        assert_eq!(p.trailing_floor, 0.0);
        assert_eq!(p.highest_value, 2.0);
    }
}
