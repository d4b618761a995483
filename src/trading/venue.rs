//! Swap venue capability set.
//!
//! The execution coordinator only talks to a `SwapVenue` (quote, submit,
//! confirm) and a `BalanceOracle`. A simulated and a live implementation
//! both satisfy it; the choice is made once when the engine is built.

use crate::trading::error::ExecutionError;
use crate::types::Pubkey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters for a quote. Amounts are UI units (SOL or whole tokens).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount: f64,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: f64,
    pub out_amount: f64,
    /// Percent, e.g. 0.8 = 0.8%
    pub price_impact_pct: f64,
    pub slippage_bps: u16,
    /// Opaque route payload handed back to the venue on submit
    #[serde(default)]
    pub route: Option<serde_json::Value>,
}

/// Handle for a submitted order awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTrade {
    pub signature: String,
    pub submitted_at: DateTime<Utc>,
    pub quote: Quote,
}

/// Terminal success reported by `SwapVenue::confirm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub signature: String,
    /// Output actually received, in UI units
    pub realized_amount: f64,
}

#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Errors
    /// - `ExecutionError::QuoteUnavailable` - no route, service down or empty output
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, ExecutionError>;

    /// Errors
    /// - `ExecutionError::SubmissionFailed` - the order was not accepted
    async fn submit(&self, quote: &Quote) -> Result<PendingTrade, ExecutionError>;

    /// Resolves once the trade reaches a terminal state. Callers bound the
    /// wait with their own timeout.
    ///
    /// Errors
    /// - `ExecutionError::Venue` - the trade landed but failed
    /// - `ExecutionError::ConfirmationTimeout` - the venue gave up waiting
    async fn confirm(&self, pending: &PendingTrade) -> Result<Confirmation, ExecutionError>;
}

#[async_trait]
pub trait BalanceOracle: Send + Sync {
    /// Spendable balance of the base asset in UI units.
    async fn get_balance(&self) -> Result<f64, ExecutionError>;
}
