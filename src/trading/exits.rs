//! Exit trigger evaluation.
//!
//! Pure functions over a position snapshot and the current time. Triggers are
//! checked in a fixed order and the first match wins.

use crate::trading::config::ExitConfig;
use crate::trading::types::{ExitReason, Position};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Close(ExitReason),
    Hold,
    /// Max hold reached in profit-only mode; keep the position one more cycle
    ExtendHold,
}

/// Per-origin exit thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OriginThresholds {
    quick_profit_target: f64,
    quick_profit_window_secs: u64,
    momentum_warmup_secs: u64,
    momentum_max_gain: f64,
    momentum_drawdown: f64,
}

#[derive(Debug, Clone)]
pub struct ExitEvaluator {
    config: ExitConfig,
}

impl ExitEvaluator {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Trail fraction to feed `Position::observe_value`, if trailing stops are on.
    pub fn trailing_fraction(&self) -> Option<f64> {
        self.config
            .trailing_stop_enabled
            .then_some(self.config.trailing_stop_fraction)
    }

    fn thresholds(&self, position: &Position) -> OriginThresholds {
        let c = &self.config;
        if position.origin.is_sniper() {
            OriginThresholds {
                quick_profit_target: c.sniper_quick_profit_target,
                quick_profit_window_secs: c.sniper_quick_profit_window_secs,
                momentum_warmup_secs: c.sniper_momentum_warmup_secs,
                momentum_max_gain: c.sniper_momentum_max_gain,
                momentum_drawdown: c.sniper_momentum_drawdown,
            }
        } else {
            OriginThresholds {
                quick_profit_target: c.quick_profit_target,
                quick_profit_window_secs: c.quick_profit_window_secs,
                momentum_warmup_secs: c.momentum_warmup_secs,
                momentum_max_gain: c.momentum_max_gain,
                momentum_drawdown: c.momentum_drawdown,
            }
        }
    }

    /// Decide what to do with a position whose value was just observed.
    pub fn evaluate(&self, position: &Position, now: DateTime<Utc>) -> ExitDecision {
        let c = &self.config;
        let t = self.thresholds(position);
        let age = position.age_secs(now);
        let gain = position.gain();

        if age < t.quick_profit_window_secs && gain >= t.quick_profit_target {
            return ExitDecision::Close(ExitReason::QuickProfit);
        }

        if gain >= c.profit_target {
            return ExitDecision::Close(ExitReason::ProfitTarget);
        }

        // The trailing stop only fires once its floor has locked in a profit
        if c.trailing_stop_enabled
            && position.trailing_floor > position.entry_size
            && position.current_value <= position.trailing_floor
        {
            return ExitDecision::Close(ExitReason::TrailingStop);
        }

        if gain <= c.stop_loss {
            return ExitDecision::Close(ExitReason::StopLoss);
        }

        if age < c.min_hold_secs {
            return ExitDecision::Hold;
        }

        if age > c.max_hold_secs {
            if c.profit_only_mode && gain > c.stop_loss && !position.hold_extended {
                return ExitDecision::ExtendHold;
            }
            return ExitDecision::Close(ExitReason::MaxHold);
        }

        if age > t.momentum_warmup_secs
            && gain > 0.0
            && gain < t.momentum_max_gain
            && position.current_value <= position.highest_value * (1.0 - t.momentum_drawdown)
        {
            return ExitDecision::Close(ExitReason::MomentumDecline);
        }

        ExitDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryOrigin;
    use chrono::Duration;

    fn position_aged(secs: i64, origin: EntryOrigin) -> (Position, DateTime<Utc>) {
        let now = Utc::now();
        let p = Position::new(
            "mint".into(),
            "SYM".into(),
            1.0,
            1000.0,
            origin,
            now - Duration::seconds(secs),
        );
        (p, now)
    }

    fn evaluator() -> ExitEvaluator {
        ExitEvaluator::new(ExitConfig::default())
    }

    fn walk(p: &mut Position, values: &[f64], e: &ExitEvaluator) {
        for v in values {
            p.observe_value(*v, e.trailing_fraction());
        }
    }

    #[test]
    fn test_quick_profit_first() {
        let e = evaluator();
        let (mut p, now) = position_aged(30, EntryOrigin::Normal);
        walk(&mut p, &[1.2], &e);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::QuickProfit));
    }

    #[test]
    fn test_sniper_quick_profit_is_tighter() {
        let e = evaluator();
        let (mut p, now) = position_aged(60, EntryOrigin::Sniper);
        walk(&mut p, &[1.06], &e);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::QuickProfit));

        let (mut p, now) = position_aged(60, EntryOrigin::Normal);
        walk(&mut p, &[1.06], &e);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Hold);

        // outside the sniper window the lower target no longer applies
        let (mut p, now) = position_aged(150, EntryOrigin::Sniper);
        walk(&mut p, &[1.06], &e);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Hold);
    }

    #[test]
    fn test_profit_target_beats_trailing_stop() {
        let mut config = ExitConfig::default();
        config.profit_target = 0.2;
        let e = ExitEvaluator::new(config);
        let (mut p, now) = position_aged(3600, EntryOrigin::Normal);
        walk(&mut p, &[1.5, 1.3], &e);

        assert!(p.current_value <= p.trailing_floor);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::ProfitTarget));
    }

    #[test]
    fn test_trailing_stop_needs_locked_profit() {
        let e = evaluator();
        let (mut p, now) = position_aged(3600, EntryOrigin::Normal);
        walk(&mut p, &[1.12, 1.06], &e);
        // floor 1.064 > entry 1.0 and value fell through it
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::TrailingStop));

        let (mut p, now) = position_aged(3600, EntryOrigin::Normal);
        walk(&mut p, &[1.02, 0.95], &e);
        // floor 0.969 is below entry, so no trailing exit
        assert_ne!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::TrailingStop));
    }

    #[test]
    fn test_stop_loss() {
        let e = evaluator();
        let (mut p, now) = position_aged(10, EntryOrigin::Normal);
        walk(&mut p, &[0.9], &e);
        // stop loss fires even inside the minimum hold
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::StopLoss));
    }

    #[test]
    fn test_min_hold_guard_skips_late_triggers() {
        let mut config = ExitConfig::default();
        config.max_hold_secs = 5;
        let e = ExitEvaluator::new(config);
        let (mut p, now) = position_aged(30, EntryOrigin::Normal);
        walk(&mut p, &[1.01], &e);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Hold);
    }

    #[test]
    fn test_max_hold_and_profit_only_deferral() {
        let mut config = ExitConfig::default();
        config.max_hold_secs = 3600;
        let e = ExitEvaluator::new(config.clone());
        let (mut p, now) = position_aged(7200, EntryOrigin::Normal);
        walk(&mut p, &[0.97], &e);
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::MaxHold));

        config.profit_only_mode = true;
        let e = ExitEvaluator::new(config);
        assert_eq!(e.evaluate(&p, now), ExitDecision::ExtendHold);
        p.hold_extended = true;
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::MaxHold));
    }

    #[test]
    fn test_momentum_decline() {
        let mut config = ExitConfig::default();
        config.trailing_stop_enabled = false;
        let e = ExitEvaluator::new(config);
        let (mut p, now) = position_aged(1200, EntryOrigin::Normal);
        walk(&mut p, &[1.14, 1.02], &e);
        // gain 2% is small-positive and 10.5% below the 1.14 peak
        assert_eq!(e.evaluate(&p, now), ExitDecision::Close(ExitReason::MomentumDecline));

        let (mut p, now) = position_aged(300, EntryOrigin::Normal);
        walk(&mut p, &[1.14, 1.02], &e);
        // still warming up
        assert_eq!(e.evaluate(&p, now), ExitDecision::Hold);
    }
}
