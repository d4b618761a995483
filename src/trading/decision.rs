//! Decision engine - combines risk output, confidence and portfolio limits
//! into a buy/no-buy decision with a position size.

use crate::trading::config::DecisionConfig;
use crate::trading::safety::SafetyState;
use crate::trading::types::RiskAssessment;
use crate::types::{EntryOrigin, Pubkey, TokenCandidate};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// What the decision engine needs to know about the current portfolio.
#[derive(Debug, Clone, Default)]
pub struct PortfolioView {
    /// Mints with an open position or an open order in flight
    pub held_mints: HashSet<Pubkey>,
    pub open_count: usize,
    /// Spendable SOL, when the balance oracle was consulted
    pub available_balance: Option<f64>,
}

/// Outcome of `DecisionEngine::should_buy`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyDecision {
    pub buy: bool,
    pub amount: f64,
    pub confidence: f64,
    pub origin: EntryOrigin,
    pub reason: String,
}

impl BuyDecision {
    fn reject(origin: EntryOrigin, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            buy: false,
            amount: 0.0,
            confidence,
            origin,
            reason: reason.into(),
        }
    }
}

pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    /// Decide whether to buy `candidate` and how much SOL to commit.
    #[instrument(skip_all, fields(mint = %candidate.mint))]
    pub fn should_buy(
        &self,
        candidate: &TokenCandidate,
        risk: &RiskAssessment,
        safety: &SafetyState,
        portfolio: &PortfolioView,
    ) -> BuyDecision {
        let c = &self.config;
        let origin = candidate.origin();

        if let Some(kill) = &safety.kill_switch {
            return BuyDecision::reject(origin, 0.0, format!("kill-switch active: {}", kill.reason));
        }
        if safety.daily_limit_reached() {
            return BuyDecision::reject(
                origin,
                0.0,
                format!("daily trade limit reached ({})", safety.daily_trades),
            );
        }
        if portfolio.open_count >= c.max_open_positions {
            return BuyDecision::reject(
                origin,
                0.0,
                format!("max open positions reached ({})", portfolio.open_count),
            );
        }
        if portfolio.held_mints.contains(&candidate.mint) {
            return BuyDecision::reject(origin, 0.0, "position already exists");
        }
        if !risk.safe {
            return BuyDecision::reject(
                origin,
                0.0,
                format!("risk classification {:?}", risk.classification),
            );
        }

        let confidence = self.confidence(candidate);
        let threshold = match origin {
            EntryOrigin::Sniper => c.sniper_min_confidence,
            EntryOrigin::Normal => c.min_confidence,
        };
        if confidence < threshold {
            return BuyDecision::reject(
                origin,
                confidence,
                format!("confidence {:.2} below {:.2}", confidence, threshold),
            );
        }

        let change = candidate.price_change_24h;
        if change < c.min_price_change || change > c.max_price_change {
            return BuyDecision::reject(
                origin,
                confidence,
                format!("price change {:+.1}% outside volatility band", change * 100.0),
            );
        }

        let mut amount = c.base_amount;
        if confidence > c.high_confidence {
            amount *= c.high_confidence_multiplier;
        }
        let max_positions = c.max_open_positions as f64;
        let headroom = (max_positions - portfolio.open_count as f64) / max_positions;
        amount *= headroom.clamp(0.0, 1.0);

        if let Some(balance) = portfolio.available_balance {
            let spendable = (balance - c.balance_reserve).max(0.0);
            if spendable < amount {
                debug!("Capping size {:.4} to spendable balance {:.4}", amount, spendable);
                amount = spendable;
            }
        }

        if amount <= 0.0 {
            return BuyDecision::reject(origin, confidence, "no allocation available");
        }

        BuyDecision {
            buy: true,
            amount,
            confidence,
            origin,
            reason: format!("confidence {:.2}", confidence),
        }
    }

    /// Confidence in [0, 1] from liquidity/volume/holder tiers and symbol bonuses.
    pub fn confidence(&self, candidate: &TokenCandidate) -> f64 {
        let mut confidence: f64 = 0.3;

        let symbol = candidate.symbol.to_uppercase();
        if self
            .config
            .high_confidence_patterns
            .iter()
            .any(|p| symbol.contains(&p.to_uppercase()))
        {
            confidence += 0.2;
        }

        let c = &self.config;
        let [liq_low, liq_mid, liq_high] = c.confidence_liquidity_tiers;
        confidence += match candidate.liquidity {
            l if l >= liq_high => 0.25,
            l if l >= liq_mid => 0.15,
            l if l >= liq_low => 0.1,
            _ => 0.0,
        };

        let [vol_low, vol_mid, vol_high] = c.confidence_volume_tiers;
        confidence += match candidate.volume_24h {
            v if v >= vol_high => 0.2,
            v if v >= vol_mid => 0.15,
            v if v >= vol_low => 0.1,
            _ => 0.0,
        };

        let [holders_mid, holders_high] = c.confidence_holder_tiers;
        confidence += match candidate.holders {
            h if h >= holders_high => 0.1,
            h if h >= holders_mid => 0.05,
            _ => 0.0,
        };

        let [dev_good, dev_fair, dev_penalty] = c.confidence_dev_holdings_pct;
        confidence += match candidate.dev_holdings_pct {
            d if d < dev_good => 0.1,
            d if d < dev_fair => 0.05,
            d if d > dev_penalty => -0.2,
            _ => 0.0,
        };

        let swing = candidate.price_change_24h.abs();
        let (steady_low, steady_high) = c.steady_price_change;
        if swing > steady_low && swing < steady_high {
            confidence += 0.05;
        } else if swing > c.wild_price_change {
            confidence -= 0.2;
        }

        confidence.clamp(0.0, 1.0)
    }
}

impl TokenCandidate {
    /// Candidates tagged by the sniper source are time-critical entries.
    pub fn origin(&self) -> EntryOrigin {
        match self.source.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("sniper") => EntryOrigin::Sniper,
            _ => EntryOrigin::Normal,
        }
    }
}
