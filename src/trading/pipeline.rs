//! Engine - wires the components together and drives them.
//!
//! Two activities run concurrently: discovery intake (evaluate, decide, open)
//! and the periodic monitor cycle. Each open and each close runs in its own
//! task, so a slow confirmation never blocks intake or monitoring.

use crate::trading::config::EngineConfig;
use crate::trading::decision::{BuyDecision, DecisionEngine, PortfolioView};
use crate::trading::events::{EventBus, TradeJournal};
use crate::trading::execution::{ExecutionCoordinator, OpenOrder};
use crate::trading::portfolio::{PortfolioAggregator, PortfolioSummary};
use crate::trading::positions::{CycleReport, PositionManager};
use crate::trading::risk::RiskEvaluator;
use crate::trading::safety::{SafetyController, SafetyReport};
use crate::trading::storage::LedgerStorage;
use crate::trading::types::{EngineEvent, ExitReason, Position, RiskAssessment, TradeRecord};
use crate::trading::venue::BalanceOracle;
use crate::types::TokenCandidate;
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// What happened to one discovered candidate.
#[derive(Debug, Clone)]
pub enum CandidateOutcome {
    Rejected { assessment: RiskAssessment, decision: BuyDecision },
    Executed { decision: BuyDecision, record: TradeRecord },
}

impl CandidateOutcome {
    pub fn record(&self) -> Option<&TradeRecord> {
        match self {
            CandidateOutcome::Executed { record, .. } => Some(record),
            CandidateOutcome::Rejected { .. } => None,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    risk: RiskEvaluator,
    decision: DecisionEngine,
    coordinator: Arc<ExecutionCoordinator>,
    positions: PositionManager,
    portfolio: PortfolioAggregator,
    events: EventBus,
    balance: Option<Arc<dyn BalanceOracle>>,
    store: Option<Arc<dyn LedgerStorage>>,
    trading_enabled: AtomicBool,
    shutdown: Notify,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EngineConfig,
        risk: RiskEvaluator,
        decision: DecisionEngine,
        coordinator: Arc<ExecutionCoordinator>,
        positions: PositionManager,
        portfolio: PortfolioAggregator,
        events: EventBus,
        balance: Option<Arc<dyn BalanceOracle>>,
        store: Option<Arc<dyn LedgerStorage>>,
    ) -> Self {
        Self {
            config,
            risk,
            decision,
            coordinator,
            positions,
            portfolio,
            events,
            balance,
            store,
            trading_enabled: AtomicBool::new(true),
            shutdown: Notify::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn risk(&self) -> &RiskEvaluator {
        &self.risk
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    pub fn safety(&self) -> &Arc<SafetyController> {
        self.coordinator.safety()
    }

    pub fn journal(&self) -> &Arc<TradeJournal> {
        self.coordinator.journal()
    }

    pub fn store(&self) -> Option<&Arc<dyn LedgerStorage>> {
        self.store.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Score a candidate without acting on it.
    pub fn evaluate(&self, candidate: &TokenCandidate) -> RiskAssessment {
        self.risk.evaluate(candidate)
    }

    /// Evaluate, decide and, when the decision is positive, open a position.
    #[instrument(skip(self, candidate), fields(mint = %candidate.mint))]
    pub async fn process_candidate(&self, candidate: TokenCandidate) -> CandidateOutcome {
        let assessment = self.risk.evaluate(&candidate);

        let decision = if self.is_trading_enabled() {
            let safety = self.safety().snapshot().await;
            let portfolio = self.portfolio_view().await;
            self.decision.should_buy(&candidate, &assessment, &safety, &portfolio)
        } else {
            BuyDecision {
                buy: false,
                amount: 0.0,
                confidence: 0.0,
                origin: candidate.origin(),
                reason: "trading paused".to_string(),
            }
        };

        if !decision.buy {
            debug!("Skipping {} ({}): {}", candidate.symbol, candidate.mint, decision.reason);
            self.events.emit(EngineEvent::CandidateRejected {
                timestamp: Utc::now(),
                mint: candidate.mint.clone(),
                reason: decision.reason.clone(),
            });
            return CandidateOutcome::Rejected { assessment, decision };
        }

        info!(
            "Buying {} ({}): {:.4} SOL, confidence {:.2}, risk score {:.1}",
            candidate.symbol, candidate.mint, decision.amount, decision.confidence, assessment.score
        );
        let order = OpenOrder::new(candidate.mint.clone(), candidate.symbol.clone(), decision.amount)
            .with_origin(decision.origin);
        let record = self.coordinator.open(order).await;
        CandidateOutcome::Executed { decision, record }
    }

    async fn portfolio_view(&self) -> PortfolioView {
        let book = self.coordinator.book();
        let available_balance = match &self.balance {
            Some(oracle) => match oracle.get_balance().await {
                Ok(balance) => Some(balance),
                Err(e) => {
                    warn!("Balance unavailable for sizing: {}", e);
                    None
                }
            },
            None => None,
        };
        PortfolioView {
            held_mints: book.held_mints().await,
            open_count: book.committed_count().await,
            available_balance,
        }
    }

    /// Run one monitor cycle now.
    pub async fn monitor_once(&self) -> CycleReport {
        self.positions.run_cycle().await
    }

    /// Consume the discovery feed, one task per candidate, until the sender is dropped.
    pub async fn run_discovery(self: Arc<Self>, mut candidates: mpsc::Receiver<TokenCandidate>) {
        info!("Discovery intake is running...");
        while let Some(candidate) = candidates.recv().await {
            self.spawn_candidate(candidate);
        }
        info!("Discovery channel closed. Intake shutting down.");
    }

    fn spawn_candidate(self: &Arc<Self>, candidate: TokenCandidate) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.process_candidate(candidate).await;
        });
    }

    fn spawn_cycle(self: &Arc<Self>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let report = engine.positions.run_cycle().await;
            if !report.triggered.is_empty() {
                debug!("Monitor cycle started {} closes", report.triggered.len());
            }
        });
    }

    fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.config.monitor.interval_ms.max(1))
    }

    /// Main loop: discovery intake and the monitor ticker until `shutdown()`.
    /// Monitoring continues after the discovery feed closes.
    pub async fn run(self: Arc<Self>, mut candidates: mpsc::Receiver<TokenCandidate>) {
        info!(
            "Engine is running (monitor every {}ms, max {} positions)",
            self.config.monitor.interval_ms, self.config.decision.max_open_positions
        );
        let mut ticker = tokio::time::interval(self.monitor_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(candidate) = candidates.recv() => {
                    self.spawn_candidate(candidate);
                },
                _ = ticker.tick() => {
                    self.spawn_cycle();
                },
                _ = self.shutdown.notified() => {
                    info!("Engine shutdown requested.");
                    break;
                }
            }
        }
    }

    /// Stop `run` after its current iteration.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Pause or resume discovery intake. Monitoring and exits are unaffected.
    pub fn set_trading_enabled(&self, enabled: bool) {
        let previous = self.trading_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Trading {}", if enabled { "enabled" } else { "paused" });
        }
    }

    pub fn is_trading_enabled(&self) -> bool {
        self.trading_enabled.load(Ordering::SeqCst)
    }

    /// Operator-requested close.
    pub async fn close_position(&self, mint: &str) -> TradeRecord {
        self.coordinator.close(mint, ExitReason::Manual).await
    }

    /// Drop a position that can no longer be sold.
    pub async fn abandon_position(&self, mint: &str) -> Option<Position> {
        self.positions.abandon(mint).await
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.positions.positions().await
    }

    pub async fn get_portfolio_summary(&self) -> PortfolioSummary {
        self.portfolio.summary().await
    }

    pub async fn log_portfolio_summary(&self) {
        self.portfolio.log_summary().await
    }

    pub async fn is_kill_switch_active(&self) -> bool {
        self.safety().is_kill_switch_active().await
    }

    /// Manual reset of the kill-switch; the only way trading resumes after a trip.
    pub async fn clear_kill_switch(&self) -> Result<()> {
        self.safety().clear_kill_switch().await
    }

    pub async fn safety_report(&self) -> SafetyReport {
        self.safety().report().await
    }
}

/// Forward JSON-lines candidates from an external discovery process into
/// the engine's feed. Malformed lines are logged and skipped. Returns the
/// number of candidates forwarded once the input ends or the engine side
/// of the channel is gone.
pub async fn read_candidates<R>(reader: R, sender: mpsc::Sender<TokenCandidate>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TokenCandidate>(line) {
            Ok(candidate) => {
                if sender.send(candidate).await.is_err() {
                    warn!("Discovery channel closed, stopping candidate reader");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!("Skipping malformed candidate line: {}", e),
        }
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_candidates_skips_bad_lines() -> Result<()> {
        let input = concat!(
            r#"{"mint":"MintA","symbol":"AAA","liquidity":60000.0,"volume_24h":25000.0,"price_change_24h":0.05,"holders":600,"dev_holdings_pct":2.0}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"mint":"MintB","symbol":"BBB","liquidity":800.0,"volume_24h":0.0,"price_change_24h":-0.25,"holders":12,"dev_holdings_pct":0.0,"source":"sniper"}"#,
            "\n",
        );
        let (sender, mut receiver) = mpsc::channel(8);

        let forwarded = read_candidates(input.as_bytes(), sender).await?;
        assert_eq!(forwarded, 2);
        assert_eq!(receiver.recv().await.map(|c| c.mint), Some("MintA".to_string()));
        let second = receiver.recv().await.expect("second candidate");
        assert_eq!(second.source.as_deref(), Some("sniper"));
        assert!(receiver.recv().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_candidates_stops_when_engine_is_gone() -> Result<()> {
        let input = "{\"mint\":\"MintA\",\"symbol\":\"AAA\",\"liquidity\":1.0,\"volume_24h\":1.0,\"price_change_24h\":0.0,\"holders\":1,\"dev_holdings_pct\":0.0}\n";
        let (sender, receiver) = mpsc::channel(8);
        drop(receiver);
        assert_eq!(read_candidates(input.as_bytes(), sender).await?, 0);
        Ok(())
    }
}
