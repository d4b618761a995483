//! Engine configuration.
//!
//! Every section has sensible defaults so a config file only needs to list
//! the values it overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Wrapped SOL mint, the base asset every trade is denominated in.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Complete configuration passed to every component constructor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub risk: RiskConfig,
    pub decision: DecisionConfig,
    pub execution: ExecutionConfig,
    pub exits: ExitConfig,
    pub safety: SafetyConfig,
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,
    pub venue: VenueConfig,
    /// Log level for the fmt subscriber ("info", "debug", ...)
    pub log_level: Option<String>,
}

/// Static thresholds for the risk evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Below this liquidity a candidate is flagged outright
    pub min_liquidity: f64,
    /// Liquidity tiers (low, mid, high)
    pub liquidity_tiers: [f64; 3],
    /// Volume tiers (low, high)
    pub volume_tiers: [f64; 2],
    /// Holder count tiers (low, mid, high)
    pub holder_tiers: [u64; 3],
    /// Developer holdings below this percentage earn points
    pub good_dev_holdings_pct: f64,
    /// Developer holdings above this percentage lose points
    pub max_dev_holdings_pct: f64,
    /// Absolute 24h price change (fraction) considered an extreme swing
    pub extreme_price_swing: f64,
    /// Volume/liquidity ratio below which activity is considered too thin
    pub min_volume_ratio: f64,
    /// Volume/liquidity ratio above which activity looks manufactured
    pub max_volume_ratio: f64,
    /// Symbol/deployer substrings treated as blacklist patterns
    pub suspicious_patterns: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_liquidity: 1_000.0,
            liquidity_tiers: [5_000.0, 25_000.0, 50_000.0],
            volume_tiers: [1_000.0, 10_000.0],
            holder_tiers: [50, 100, 500],
            good_dev_holdings_pct: 10.0,
            max_dev_holdings_pct: 25.0,
            extreme_price_swing: 0.5,
            min_volume_ratio: 0.05,
            max_volume_ratio: 5.0,
            suspicious_patterns: ["SCAM", "RUG", "HONEYPOT", "FAKE", "TEST", "PUMP", "DUMP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Buy decision and sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Base order size in SOL
    pub base_amount: f64,
    /// Multiplier applied when confidence exceeds `high_confidence`
    pub high_confidence_multiplier: f64,
    pub high_confidence: f64,
    /// Minimum confidence for normal entries
    pub min_confidence: f64,
    /// Minimum confidence for time-critical entries
    pub sniper_min_confidence: f64,
    /// Allowed 24h price change band (fractions)
    pub min_price_change: f64,
    pub max_price_change: f64,
    /// Symbol substrings that earn a confidence bonus
    pub high_confidence_patterns: Vec<String>,
    /// Confidence liquidity tiers (low, mid, high)
    pub confidence_liquidity_tiers: [f64; 3],
    /// Confidence volume tiers (low, mid, high)
    pub confidence_volume_tiers: [f64; 3],
    /// Confidence holder tiers (mid, high)
    pub confidence_holder_tiers: [u64; 2],
    /// Developer holdings percentages (good, fair, penalised)
    pub confidence_dev_holdings_pct: [f64; 3],
    /// Absolute 24h change (fractions) that counts as steady movement
    pub steady_price_change: (f64, f64),
    /// Absolute 24h change (fraction) above which confidence drops
    pub wild_price_change: f64,
    pub max_open_positions: usize,
    pub max_daily_trades: u32,
    /// SOL kept aside for fees; never allocated to a position
    pub balance_reserve: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            base_amount: 0.01,
            high_confidence_multiplier: 1.5,
            high_confidence: 0.8,
            min_confidence: 0.6,
            sniper_min_confidence: 0.5,
            min_price_change: -0.30,
            max_price_change: 0.50,
            high_confidence_patterns: Vec::new(),
            confidence_liquidity_tiers: [10_000.0, 25_000.0, 50_000.0],
            confidence_volume_tiers: [5_000.0, 10_000.0, 20_000.0],
            confidence_holder_tiers: [200, 500],
            confidence_dev_holdings_pct: [5.0, 15.0, 30.0],
            steady_price_change: (0.02, 0.15),
            wild_price_change: 0.5,
            max_open_positions: 10,
            max_daily_trades: 50,
            balance_reserve: 0.005,
        }
    }
}

/// Quote validation, slippage and retry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Base asset mint (SOL)
    pub base_mint: String,
    /// Quotes with a larger price impact (percent) are rejected
    pub max_price_impact_pct: f64,
    /// Price impact (percent) above which slippage tolerance is widened
    pub elevated_price_impact_pct: f64,
    pub base_slippage_bps: u16,
    pub max_slippage_bps: u16,
    /// Added to the tolerance on every retry
    pub retry_widen_bps: u16,
    /// Maximum order size in SOL
    pub max_trade_size: f64,
    pub confirm_timeout_ms: u64,
    /// Total attempts per trade, including the first one
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_mint: WSOL_MINT.to_string(),
            max_price_impact_pct: 2.0,
            elevated_price_impact_pct: 0.5,
            base_slippage_bps: 50,
            max_slippage_bps: 500,
            retry_widen_bps: 50,
            max_trade_size: 1.0,
            confirm_timeout_ms: 10_000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
        }
    }
}

impl ExecutionConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Exit trigger parameters. Gains and losses are fractions (0.15 = 15%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub profit_target: f64,
    /// Negative fraction, e.g. -0.08
    pub stop_loss: f64,
    pub trailing_stop_enabled: bool,
    pub trailing_stop_fraction: f64,
    pub quick_profit_target: f64,
    pub quick_profit_window_secs: u64,
    pub sniper_quick_profit_target: f64,
    pub sniper_quick_profit_window_secs: u64,
    pub min_hold_secs: u64,
    pub max_hold_secs: u64,
    /// When set, the max-hold timeout is deferred once while P&L is above the stop loss
    pub profit_only_mode: bool,
    pub momentum_warmup_secs: u64,
    pub sniper_momentum_warmup_secs: u64,
    /// Momentum exits only consider gains between zero and this ceiling
    pub momentum_max_gain: f64,
    pub sniper_momentum_max_gain: f64,
    /// Fraction the value must have fallen from its peak
    pub momentum_drawdown: f64,
    pub sniper_momentum_drawdown: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            profit_target: 0.15,
            stop_loss: -0.08,
            trailing_stop_enabled: true,
            trailing_stop_fraction: 0.05,
            quick_profit_target: 0.10,
            quick_profit_window_secs: 300,
            sniper_quick_profit_target: 0.05,
            sniper_quick_profit_window_secs: 120,
            min_hold_secs: 60,
            max_hold_secs: 24 * 3600,
            profit_only_mode: false,
            momentum_warmup_secs: 600,
            sniper_momentum_warmup_secs: 180,
            momentum_max_gain: 0.05,
            sniper_momentum_max_gain: 0.03,
            momentum_drawdown: 0.10,
            sniper_momentum_drawdown: 0.05,
        }
    }
}

/// Kill-switch parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub error_window_secs: u64,
    pub max_errors: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            error_window_secs: 300,
            max_errors: 10,
        }
    }
}

impl SafetyConfig {
    pub fn error_window(&self) -> Duration {
        Duration::from_secs(self.error_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlx connection string; `sqlite::memory:` keeps everything in RAM
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./auracle.db?mode=rwc".to_string(),
        }
    }
}

/// Which venue implementation to build and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    pub mode: VenueMode,
    pub quote_endpoints: Vec<String>,
    pub signer_url: String,
    pub rpc_url: String,
    pub wallet_address: Option<String>,
    pub requests_per_second: u32,
    pub balance_cache_ttl_secs: u64,
    /// Starting balance for the simulated venue
    pub paper_balance: f64,
    pub http_timeout_secs: u64,
    /// Decimals assumed for traded tokens when converting to base units
    pub token_decimals: u8,
    /// Status poll interval while waiting for a confirmation
    pub confirm_poll_ms: u64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            mode: VenueMode::Simulated,
            quote_endpoints: vec!["https://quote-api.jup.ag/v6".to_string()],
            signer_url: "http://127.0.0.1:8787".to_string(),
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            wallet_address: None,
            requests_per_second: 10,
            balance_cache_ttl_secs: 5,
            paper_balance: 1.0,
            http_timeout_secs: 10,
            token_decimals: 6,
            confirm_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueMode {
    Simulated,
    Live,
}

impl EngineConfig {
    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        let d = &self.decision;
        let e = &self.execution;
        let x = &self.exits;

        if d.base_amount <= 0.0 {
            bail!("decision.base_amount must be positive");
        }
        if d.max_open_positions == 0 {
            bail!("decision.max_open_positions must be at least 1");
        }
        if d.min_price_change >= d.max_price_change {
            bail!("decision price-change band is empty");
        }
        if e.max_attempts == 0 {
            bail!("execution.max_attempts must be at least 1");
        }
        if e.max_slippage_bps < e.base_slippage_bps {
            bail!("execution.max_slippage_bps is below base_slippage_bps");
        }
        if e.max_price_impact_pct <= 0.0 {
            bail!("execution.max_price_impact_pct must be positive");
        }
        if x.stop_loss >= 0.0 {
            bail!("exits.stop_loss must be negative");
        }
        if x.profit_target <= 0.0 {
            bail!("exits.profit_target must be positive");
        }
        if !(0.0..1.0).contains(&x.trailing_stop_fraction) {
            bail!("exits.trailing_stop_fraction must be in [0, 1)");
        }
        if self.safety.max_errors == 0 {
            bail!("safety.max_errors must be at least 1");
        }
        if self.venue.mode == VenueMode::Live && self.venue.quote_endpoints.is_empty() {
            bail!("venue.quote_endpoints must not be empty in live mode");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.max_price_impact_pct, 2.0);
        assert_eq!(config.execution.confirm_timeout(), Duration::from_secs(10));
        assert_eq!(config.execution.max_attempts, 3);
        assert_eq!(config.safety.max_errors, 10);
        assert_eq!(config.safety.error_window(), Duration::from_secs(300));
        assert_eq!(config.monitor.interval_ms, 10_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "exits": { "profit_target": 0.2 } }"#).unwrap();
        assert_eq!(config.exits.profit_target, 0.2);
        assert_eq!(config.exits.stop_loss, -0.08);
        assert_eq!(config.decision.max_open_positions, 10);
    }

    #[test]
    fn test_validate_rejects_positive_stop_loss() {
        let mut config = EngineConfig::default();
        config.exits.stop_loss = 0.05;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_slippage() {
        let mut config = EngineConfig::default();
        config.execution.max_slippage_bps = 10;
        assert!(config.validate().is_err());
    }
}
