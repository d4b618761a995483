//! Risk evaluator - scores candidates against static thresholds and the blacklist.
//!
//! Evaluation is deterministic: the same candidate evaluated against the same
//! blacklist/whitelist always yields the same assessment. No I/O happens here,
//! the discovery collaborator pre-fetches every metric.

use crate::trading::config::RiskConfig;
use crate::trading::types::{Classification, RiskAssessment};
use crate::types::{Pubkey, TokenCandidate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, instrument};

/// Score at or above which a candidate is approved.
pub const APPROVE_SCORE: f64 = 6.0;
/// Score at or above which a candidate is kept under observation.
pub const MONITOR_SCORE: f64 = 4.0;

/// Candidate scoring plus blacklist/whitelist management.
pub struct RiskEvaluator {
    config: RiskConfig,
    blacklist: RwLock<HashMap<Pubkey, String>>,
    whitelist: RwLock<HashMap<Pubkey, String>>,
}

/// Counters for reporting collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub blacklisted: usize,
    pub whitelisted: usize,
    pub min_liquidity: f64,
    pub max_dev_holdings_pct: f64,
}

impl RiskEvaluator {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            blacklist: RwLock::new(HashMap::new()),
            whitelist: RwLock::new(HashMap::new()),
        }
    }

    /// Score a candidate.
    #[instrument(skip(self, candidate), fields(mint = %candidate.mint))]
    pub fn evaluate(&self, candidate: &TokenCandidate) -> RiskAssessment {
        let c = &self.config;
        let mut score = 0.0;
        let mut reasons = Vec::new();
        let mut flagged = false;

        if let Some(reason) = self.blacklist_hit(candidate) {
            reasons.push(reason);
            flagged = true;
        } else if self.is_whitelisted(&candidate.mint) {
            return RiskAssessment {
                candidate: candidate.clone(),
                safe: true,
                score: 10.0,
                reasons: vec!["Whitelisted token".to_string()],
                classification: Classification::Approved,
            };
        }

        if candidate.liquidity < c.min_liquidity {
            reasons.push(format!(
                "Low liquidity: {:.0} < {:.0}",
                candidate.liquidity, c.min_liquidity
            ));
            flagged = true;
        }

        // Liquidity tiers
        let [liq_low, liq_mid, liq_high] = c.liquidity_tiers;
        if candidate.liquidity >= liq_high {
            score += 3.0;
        } else if candidate.liquidity >= liq_mid {
            score += 2.0;
        } else if candidate.liquidity >= liq_low {
            score += 1.0;
        }

        // Volume tiers
        let [vol_low, vol_high] = c.volume_tiers;
        if candidate.volume_24h >= vol_high {
            score += 2.0;
        } else if candidate.volume_24h >= vol_low {
            score += 1.0;
        } else {
            reasons.push(format!("Thin volume: {:.0}", candidate.volume_24h));
        }

        // Holder tiers
        let [holders_low, holders_mid, holders_high] = c.holder_tiers;
        if candidate.holders >= holders_high {
            score += 2.0;
        } else if candidate.holders >= holders_mid {
            score += 1.0;
        } else if candidate.holders >= holders_low {
            score += 0.5;
        } else {
            score -= 1.0;
            reasons.push(format!("Too few holders: {}", candidate.holders));
        }

        // Developer holdings, lower is better
        if candidate.dev_holdings_pct < c.good_dev_holdings_pct {
            score += 2.0;
        } else if candidate.dev_holdings_pct <= c.max_dev_holdings_pct {
            score += 1.0;
        } else {
            score -= 2.0;
            reasons.push(format!(
                "High developer holdings: {:.1}%",
                candidate.dev_holdings_pct
            ));
        }

        // Volume/liquidity ratio
        if candidate.liquidity > 0.0 {
            let ratio = candidate.volume_24h / candidate.liquidity;
            if ratio < c.min_volume_ratio {
                score -= 1.0;
                reasons.push(format!("Low volume ratio: {:.2}", ratio));
            } else if ratio > c.max_volume_ratio {
                score -= 1.0;
                reasons.push(format!("Suspiciously high volume ratio: {:.2}", ratio));
            } else if (0.2..=2.0).contains(&ratio) {
                score += 0.5;
            }
        }

        if candidate.price_change_24h.abs() > c.extreme_price_swing {
            score -= 2.0;
            reasons.push(format!(
                "Extreme price swing: {:+.1}%",
                candidate.price_change_24h * 100.0
            ));
        }

        if let Some(pattern) = self.pattern_hit(candidate) {
            score -= 3.0;
            reasons.push(format!("Suspicious pattern: {}", pattern));
            flagged = true;
        }

        let classification = if flagged {
            Classification::Flagged
        } else if score >= APPROVE_SCORE {
            Classification::Approved
        } else if score >= MONITOR_SCORE {
            Classification::Monitor
        } else {
            Classification::Rejected
        };

        if reasons.is_empty() {
            reasons.push("Passed all risk checks".to_string());
        }

        debug!(
            "Evaluated {} ({}): score {:.1}, {:?}",
            candidate.symbol, candidate.mint, score, classification
        );

        RiskAssessment {
            candidate: candidate.clone(),
            safe: classification == Classification::Approved,
            score,
            reasons,
            classification,
        }
    }

    /// Blacklist a mint or deployer. Idempotent; the first reason is kept.
    pub fn add_to_blacklist(&self, mint: &str, reason: &str) {
        let mut blacklist = self.blacklist.write().unwrap_or_else(|e| e.into_inner());
        if !blacklist.contains_key(mint) {
            blacklist.insert(mint.to_string(), reason.to_string());
            info!("Added {} to blacklist - reason: {}", mint, reason);
        }
    }

    pub fn add_to_whitelist(&self, mint: &str, reason: &str) {
        let mut whitelist = self.whitelist.write().unwrap_or_else(|e| e.into_inner());
        if !whitelist.contains_key(mint) {
            whitelist.insert(mint.to_string(), reason.to_string());
            info!("Added {} to whitelist - reason: {}", mint, reason);
        }
    }

    pub fn is_blacklisted(&self, mint: &str) -> bool {
        self.blacklist
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(mint)
    }

    fn is_whitelisted(&self, mint: &str) -> bool {
        self.whitelist
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(mint)
    }

    pub fn risk_summary(&self) -> RiskSummary {
        RiskSummary {
            blacklisted: self.blacklist.read().unwrap_or_else(|e| e.into_inner()).len(),
            whitelisted: self.whitelist.read().unwrap_or_else(|e| e.into_inner()).len(),
            min_liquidity: self.config.min_liquidity,
            max_dev_holdings_pct: self.config.max_dev_holdings_pct,
        }
    }

    fn blacklist_hit(&self, candidate: &TokenCandidate) -> Option<String> {
        let blacklist = self.blacklist.read().unwrap_or_else(|e| e.into_inner());
        if let Some(reason) = blacklist.get(&candidate.mint) {
            return Some(format!("Blacklisted token: {}", reason));
        }
        candidate
            .deployer
            .as_ref()
            .and_then(|deployer| blacklist.get(deployer))
            .map(|reason| format!("Blacklisted deployer: {}", reason))
    }

    fn pattern_hit(&self, candidate: &TokenCandidate) -> Option<&str> {
        let symbol = candidate.symbol.to_uppercase();
        let deployer = candidate
            .deployer
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_default();
        self.config
            .suspicious_patterns
            .iter()
            .find(|p| {
                let p = p.to_uppercase();
                symbol.contains(&p) || (!deployer.is_empty() && deployer.contains(&p))
            })
            .map(String::as_str)
    }
}
