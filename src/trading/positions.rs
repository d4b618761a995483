//! PositionManager - the periodic monitor cycle over every open position.
//!
//! A cycle values each MONITORING position with a sell quote, records the
//! observation (peak and trailing floor), evaluates exit triggers and hands
//! triggered positions to a per-trade close task. Cycles never overlap.

use crate::trading::execution::ExecutionCoordinator;
use crate::trading::exits::{ExitDecision, ExitEvaluator};
use crate::trading::events::EventBus;
use crate::trading::types::{EngineEvent, ExitReason, Position, TradeRecord};
use crate::types::Pubkey;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// What one monitor cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Another cycle was still running
    pub skipped: bool,
    /// Kill-switch was active at cycle entry
    pub halted: bool,
    pub evaluated: usize,
    pub valuation_failures: usize,
    pub triggered: Vec<(Pubkey, ExitReason)>,
    /// Close tasks started by this cycle
    pub closes: Vec<JoinHandle<TradeRecord>>,
}

impl CycleReport {
    /// Wait for every close started by this cycle.
    pub async fn join_closes(self) -> Vec<TradeRecord> {
        let mut records = Vec::with_capacity(self.closes.len());
        for handle in self.closes {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Close task failed to complete: {}", e),
            }
        }
        records
    }
}

pub struct PositionManager {
    coordinator: Arc<ExecutionCoordinator>,
    exits: ExitEvaluator,
    events: EventBus,
    cycle_lock: Mutex<()>,
}

impl PositionManager {
    pub fn new(coordinator: Arc<ExecutionCoordinator>, exits: ExitEvaluator, events: EventBus) -> Self {
        Self {
            coordinator,
            exits,
            events,
            cycle_lock: Mutex::new(()),
        }
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.coordinator.book().snapshot().await
    }

    /// Run one monitor cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Previous monitor cycle still running, skipping");
            report.skipped = true;
            return report;
        };

        if let Some(kill) = self.coordinator.safety().kill_switch().await {
            warn!("Monitor cycle halted, kill-switch active: {}", kill.reason);
            report.halted = true;
            return report;
        }

        let book = self.coordinator.book().clone();
        let trailing = self.exits.trailing_fraction();

        for position in book.positions_to_monitor().await {
            report.evaluated += 1;

            let value = match self.coordinator.quote_value(&position).await {
                Ok((value, _impact)) => value,
                Err(e) => {
                    warn!("Could not value {} ({}): {}", position.symbol, position.mint, e);
                    report.valuation_failures += 1;
                    continue;
                }
            };

            let Some(observed) = book
                .update_monitoring(&position.mint, |p| p.observe_value(value, trailing))
                .await
            else {
                // closed or closing since the snapshot was taken
                continue;
            };

            let now = Utc::now();
            debug!(
                "{} value {:.6} SOL (gain {:+.2}%, peak {:.6}, floor {:.6}, age {}s)",
                observed.symbol,
                observed.current_value,
                observed.gain() * 100.0,
                observed.highest_value,
                observed.trailing_floor,
                observed.age_secs(now)
            );

            match self.exits.evaluate(&observed, now) {
                ExitDecision::Hold => {}
                ExitDecision::ExtendHold => {
                    info!(
                        "Max hold reached for {} in profit-only mode, holding one more cycle",
                        observed.symbol
                    );
                    book.update_monitoring(&observed.mint, |p| p.hold_extended = true).await;
                }
                ExitDecision::Close(reason) => {
                    let closing = match book.begin_close(&observed.mint).await {
                        Ok(p) => p,
                        Err(e) => {
                            debug!("Exit {} for {} not started: {}", reason, observed.mint, e);
                            continue;
                        }
                    };

                    info!(
                        "Exit trigger {} for {} ({}): value {:.6} SOL, gain {:+.2}%",
                        reason,
                        closing.symbol,
                        closing.mint,
                        closing.current_value,
                        closing.gain() * 100.0
                    );
                    self.events.emit(EngineEvent::ExitTriggered {
                        timestamp: now,
                        mint: closing.mint.clone(),
                        symbol: closing.symbol.clone(),
                        reason,
                        value: closing.current_value,
                        gain: closing.gain(),
                    });

                    report.triggered.push((closing.mint.clone(), reason));
                    let coordinator = self.coordinator.clone();
                    report.closes.push(tokio::spawn(async move {
                        coordinator.execute_close(closing, reason).await
                    }));
                }
            }
        }

        report
    }

    /// Forget a position that can no longer be sold.
    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn abandon(&self, mint: &str) -> Option<Position> {
        let removed = self.coordinator.book().remove(mint).await;
        match &removed {
            Some(p) => warn!(
                "Abandoned {} ({}) after {} failed closes, {:.4} SOL written off",
                p.symbol, p.mint, p.failed_closes, p.entry_size
            ),
            None => debug!("Nothing to abandon for {}", mint),
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::book::PositionBook;
    use crate::trading::config::{ExecutionConfig, ExitConfig, SafetyConfig, WSOL_MINT};
    use crate::trading::events::TradeJournal;
    use crate::trading::execution::OpenOrder;
    use crate::trading::safety::SafetyController;
    use crate::trading::simulated_venue::SimulatedVenue;
    use crate::trading::types::{PositionState, TradeStatus};

    fn setup(exits: ExitConfig) -> (Arc<SimulatedVenue>, Arc<ExecutionCoordinator>, PositionManager) {
        let venue = Arc::new(SimulatedVenue::new(WSOL_MINT, 10.0));
        let events = EventBus::new(64);
        let config = ExecutionConfig {
            confirm_timeout_ms: 20,
            backoff_base_ms: 2,
            backoff_max_ms: 4,
            ..ExecutionConfig::default()
        };
        let coordinator = Arc::new(ExecutionCoordinator::new(
            config,
            venue.clone(),
            Arc::new(SafetyController::new(SafetyConfig::default(), 50)),
            Arc::new(PositionBook::new(10)),
            Arc::new(TradeJournal::new()),
            events.clone(),
        ));
        let manager = PositionManager::new(coordinator.clone(), ExitEvaluator::new(exits), events);
        (venue, coordinator, manager)
    }

    fn no_quick_profit() -> ExitConfig {
        ExitConfig {
            quick_profit_window_secs: 0,
            sniper_quick_profit_window_secs: 0,
            min_hold_secs: 0,
            ..ExitConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_promotes_and_holds() {
        let (venue, coordinator, manager) = setup(no_quick_profit());
        venue.set_price("MintA", 0.001);
        coordinator.open(OpenOrder::new("MintA", "AAA", 0.5)).await;

        let report = manager.run_cycle().await;
        assert_eq!(report.evaluated, 1);
        assert!(report.triggered.is_empty());
        let position = manager.positions().await.remove(0);
        assert_eq!(position.state, PositionState::Monitoring);
    }

    #[tokio::test]
    async fn test_stop_loss_closes_position() {
        let (venue, coordinator, manager) = setup(no_quick_profit());
        venue.set_price("MintA", 0.001);
        coordinator.open(OpenOrder::new("MintA", "AAA", 0.5)).await;
        venue.scale_price("MintA", 0.85);

        let report = manager.run_cycle().await;
        assert_eq!(report.triggered, vec![("MintA".to_string(), ExitReason::StopLoss)]);
        let records = report.join_closes().await;
        assert_eq!(records[0].status, TradeStatus::Confirmed);
        assert_eq!(records[0].reason.as_deref(), Some("stop_loss"));
        assert!(manager.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_kill_switch_halts_cycle() {
        let (venue, coordinator, manager) = setup(no_quick_profit());
        venue.set_price("MintA", 0.001);
        coordinator.open(OpenOrder::new("MintA", "AAA", 0.5)).await;
        coordinator.safety().trip("test").await;
        venue.scale_price("MintA", 0.5);

        let report = manager.run_cycle().await;
        assert!(report.halted);
        assert_eq!(manager.positions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_valuation_failure_skips_position() {
        let (venue, coordinator, manager) = setup(no_quick_profit());
        venue.set_price("MintA", 0.001);
        coordinator.open(OpenOrder::new("MintA", "AAA", 0.5)).await;
        venue.fail_next_quotes(1);

        let report = manager.run_cycle().await;
        assert_eq!(report.valuation_failures, 1);
        assert!(report.triggered.is_empty());
    }

    #[tokio::test]
    async fn test_abandon_removes_position() {
        let (venue, coordinator, manager) = setup(no_quick_profit());
        venue.set_price("MintA", 0.001);
        coordinator.open(OpenOrder::new("MintA", "AAA", 0.5)).await;
        assert!(manager.abandon("MintA").await.is_some());
        assert!(manager.positions().await.is_empty());
        assert!(manager.abandon("MintA").await.is_none());
    }
}
