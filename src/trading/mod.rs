//! Trading module - risk evaluation, execution and position management.
//!
//! Candidates from the discovery feed are scored, sized and opened through a
//! swap venue; open positions are valued every monitor cycle and closed when
//! an exit trigger fires. A global kill-switch halts all trading when venue
//! errors pile up.

pub mod book;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod execution;
pub mod exits;
pub mod live_venue;
pub mod pipeline;
pub mod portfolio;
pub mod positions;
pub mod retry;
pub mod risk;
pub mod safety;
pub mod simulated_venue;
pub mod sqlite_ledger;
pub mod storage;
pub mod types;
pub mod venue;

// Re-export main public types and the engine
pub use config::{EngineConfig, VenueMode, WSOL_MINT};
pub use error::{ErrorCategory, ExecutionError, FailureKind};
pub use pipeline::{read_candidates, CandidateOutcome, Engine};
pub use types::{
    Classification, EngineEvent, ExitReason, Position, PositionState, RiskAssessment,
    TradeAction, TradeRecord, TradeStatus,
};

// Re-export other key components for advanced usage
pub use book::PositionBook;
pub use decision::{BuyDecision, DecisionEngine, PortfolioView};
pub use events::{EventBus, TradeJournal};
pub use execution::{ExecutionCoordinator, OpenOrder};
pub use exits::{ExitDecision, ExitEvaluator};
pub use live_venue::LiveVenue;
pub use portfolio::{PortfolioAggregator, PortfolioSummary, PositionSummary};
pub use positions::{CycleReport, PositionManager};
pub use risk::RiskEvaluator;
pub use safety::{KillSwitchInfo, SafetyController, SafetyReport};
pub use simulated_venue::{ConfirmBehavior, SimulatedVenue};
pub use sqlite_ledger::SqliteLedger;
pub use storage::{InMemoryLedger, LedgerStorage};
pub use venue::{BalanceOracle, Quote, QuoteRequest, SwapVenue};

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Engine builder for convenient construction with sensible defaults.
pub struct EngineBuilder {
    config: EngineConfig,
    venue: Option<Arc<dyn SwapVenue>>,
    balance: Option<Arc<dyn BalanceOracle>>,
    store: Option<Arc<dyn LedgerStorage>>,
}

impl EngineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            venue: None,
            balance: None,
            store: None,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of open positions.
    pub fn with_max_positions(mut self, max_positions: usize) -> Self {
        self.config.decision.max_open_positions = max_positions;
        self
    }

    /// Set the base order size in SOL.
    pub fn with_base_amount(mut self, amount: f64) -> Self {
        self.config.decision.base_amount = amount;
        self
    }

    /// Set profit target and stop loss (fractions, stop loss negative).
    pub fn with_exit_thresholds(mut self, profit_target: f64, stop_loss: f64) -> Self {
        self.config.exits.profit_target = profit_target;
        self.config.exits.stop_loss = stop_loss;
        self
    }

    /// Set the price-impact ceiling in percent.
    pub fn with_max_price_impact(mut self, max_pct: f64) -> Self {
        self.config.execution.max_price_impact_pct = max_pct;
        self
    }

    /// Set the kill-switch error ceiling and window.
    pub fn with_kill_switch(mut self, max_errors: usize, window_secs: u64) -> Self {
        self.config.safety.max_errors = max_errors;
        self.config.safety.error_window_secs = window_secs;
        self
    }

    /// Set the monitor cycle interval.
    pub fn with_monitor_interval(mut self, interval_ms: u64) -> Self {
        self.config.monitor.interval_ms = interval_ms;
        self
    }

    /// Use this venue instead of building one from `config.venue`.
    pub fn with_venue(mut self, venue: Arc<dyn SwapVenue>) -> Self {
        self.venue = Some(venue);
        self
    }

    pub fn with_balance_oracle(mut self, balance: Arc<dyn BalanceOracle>) -> Self {
        self.balance = Some(balance);
        self
    }

    /// Persist trade records and the kill-switch to `store`.
    pub fn with_storage(mut self, store: Arc<dyn LedgerStorage>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the engine configuration.
    pub fn build_config(self) -> EngineConfig {
        self.config
    }

    /// Wire every component. Restores a persisted kill-switch and starts the
    /// ledger writer when storage is configured.
    pub async fn build(self) -> Result<Arc<Engine>> {
        let Self { config, venue, balance, store } = self;
        config.validate()?;

        let (venue, balance): (Arc<dyn SwapVenue>, Option<Arc<dyn BalanceOracle>>) = match venue {
            Some(venue) => (venue, balance),
            None => {
                let (built, oracle): (Arc<dyn SwapVenue>, Arc<dyn BalanceOracle>) = match config.venue.mode {
                    VenueMode::Simulated => {
                        let sim = Arc::new(SimulatedVenue::new(
                            config.execution.base_mint.clone(),
                            config.venue.paper_balance,
                        ));
                        (sim.clone(), sim)
                    }
                    VenueMode::Live => {
                        let live = Arc::new(LiveVenue::new(
                            &config.venue,
                            config.execution.base_mint.clone(),
                        )?);
                        (live.clone(), live)
                    }
                };
                (built, Some(balance.unwrap_or(oracle)))
            }
        };

        let events = EventBus::new(config.monitor.event_buffer);

        let mut safety = SafetyController::new(config.safety.clone(), config.decision.max_daily_trades)
            .with_events(events.clone());
        if let Some(store) = &store {
            safety = safety.with_store(store.clone());
        }
        if safety.restore().await? {
            warn!("Engine starting with the kill-switch active; clear it to resume trading");
        }
        let safety = Arc::new(safety);

        if let Some(store) = &store {
            tokio::spawn(storage::persist_trades(store.clone(), events.subscribe()));
        }

        let book = Arc::new(PositionBook::new(config.decision.max_open_positions));
        let journal = Arc::new(TradeJournal::new());

        let mut coordinator = ExecutionCoordinator::new(
            config.execution.clone(),
            venue.clone(),
            safety,
            book.clone(),
            journal.clone(),
            events.clone(),
        );
        if let Some(balance) = &balance {
            coordinator = coordinator.with_balance_oracle(balance.clone());
        }
        let coordinator = Arc::new(coordinator);

        let positions = PositionManager::new(
            coordinator.clone(),
            ExitEvaluator::new(config.exits.clone()),
            events.clone(),
        );
        let portfolio = PortfolioAggregator::new(book, journal);

        info!(
            "Engine built with {} venue, storage {}",
            venue.name(),
            if store.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Arc::new(Engine::new(
            config.clone(),
            RiskEvaluator::new(config.risk.clone()),
            DecisionEngine::new(config.decision.clone()),
            coordinator,
            positions,
            portfolio,
            events,
            balance,
            store,
        )))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
