//! Core types shared by the discovery collaborator and the trading engine.

use serde::{Deserialize, Serialize};

/// A simple public key representation (base58 mint address kept as a string)
pub type Pubkey = String;

/// A token proposed for evaluation by the discovery feed.
///
/// Produced by the discovery collaborator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// The mint address of the token
    pub mint: Pubkey,
    /// Ticker symbol as reported by the discovery source
    pub symbol: String,
    /// Pool liquidity in quote-currency units
    pub liquidity: f64,
    /// Traded volume over the last 24h
    pub volume_24h: f64,
    /// Price change over the last 24h as a fraction (0.05 = +5%)
    pub price_change_24h: f64,
    /// Number of holders
    pub holders: u64,
    /// Percentage of supply held by the deployer (5.0 = 5%)
    pub dev_holdings_pct: f64,
    /// Deployer/creator address, when known
    #[serde(default)]
    pub deployer: Option<Pubkey>,
    /// Which discovery source produced the candidate
    #[serde(default)]
    pub source: Option<String>,
}

impl TokenCandidate {
    /// Minimal candidate with zeroed metrics, mostly useful for tests and manual entries.
    pub fn new(mint: impl Into<Pubkey>, symbol: impl Into<String>) -> Self {
        Self {
            mint: mint.into(),
            symbol: symbol.into(),
            liquidity: 0.0,
            volume_24h: 0.0,
            price_change_24h: 0.0,
            holders: 0,
            dev_holdings_pct: 0.0,
            deployer: None,
            source: None,
        }
    }
}

/// How a position was entered. Time-critical entries get tighter exit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    #[default]
    Normal,
    /// Time-critical ("sniper") entry
    Sniper,
}

impl EntryOrigin {
    pub fn is_sniper(&self) -> bool {
        matches!(self, EntryOrigin::Sniper)
    }
}
