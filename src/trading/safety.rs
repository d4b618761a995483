//! SafetyController - error-rate tracking, daily limits and the global kill-switch.
//!
//! Errors are counted per category inside a sliding time window. When the
//! total across categories reaches the ceiling the kill-switch latches: it is
//! persisted, announced, and stays active until an operator clears it.

use crate::trading::config::SafetyConfig;
use crate::trading::error::{ErrorCategory, ExecutionError};
use crate::trading::events::EventBus;
use crate::trading::storage::LedgerStorage;
use crate::trading::types::EngineEvent;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// Why and when the kill-switch tripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchInfo {
    pub reason: String,
    pub activated_at: DateTime<Utc>,
    /// Errors inside the window at the moment of the trip
    pub error_count: usize,
}

/// Shared safety counters read by every gating check.
#[derive(Debug, Clone)]
pub struct SafetyState {
    /// Error timestamps per category, oldest first
    pub errors: HashMap<ErrorCategory, VecDeque<Instant>>,
    pub daily_trades: u32,
    pub max_daily_trades: u32,
    /// UTC day the daily counter belongs to
    pub trading_day: NaiveDate,
    pub kill_switch: Option<KillSwitchInfo>,
}

impl SafetyState {
    pub fn new(max_daily_trades: u32) -> Self {
        Self {
            errors: HashMap::new(),
            daily_trades: 0,
            max_daily_trades,
            trading_day: Utc::now().date_naive(),
            kill_switch: None,
        }
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch.is_some()
    }

    pub fn daily_limit_reached(&self) -> bool {
        self.daily_trades >= self.max_daily_trades
    }

    pub fn error_count(&self, category: ErrorCategory) -> usize {
        self.errors.get(&category).map_or(0, |q| q.len())
    }

    pub fn total_errors(&self) -> usize {
        self.errors.values().map(|q| q.len()).sum()
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        for timestamps in self.errors.values_mut() {
            while let Some(oldest) = timestamps.front() {
                if now.duration_since(*oldest) > window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if today != self.trading_day {
            debug!("New trading day {}, resetting daily counter ({} trades)", today, self.daily_trades);
            self.trading_day = today;
            self.daily_trades = 0;
        }
    }
}

/// Operator-facing view of the safety counters.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    pub recent_errors: HashMap<ErrorCategory, usize>,
    pub total_recent_errors: usize,
    pub max_errors: usize,
    /// Fraction of the error ceiling already used
    pub kill_switch_risk: f64,
    pub kill_switch: Option<KillSwitchInfo>,
    pub daily_trades: u32,
    pub max_daily_trades: u32,
}

pub struct SafetyController {
    config: SafetyConfig,
    window: Duration,
    state: RwLock<SafetyState>,
    store: Option<Arc<dyn LedgerStorage>>,
    events: Option<EventBus>,
}

impl SafetyController {
    pub fn new(config: SafetyConfig, max_daily_trades: u32) -> Self {
        let window = config.error_window();
        Self {
            config,
            window,
            state: RwLock::new(SafetyState::new(max_daily_trades)),
            store: None,
            events: None,
        }
    }

    /// Persist kill-switch trips to `store`.
    pub fn with_store(mut self, store: Arc<dyn LedgerStorage>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the sliding window with sub-second precision.
    pub fn with_error_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Reload a kill-switch tripped by a previous process. Returns whether it is active.
    pub async fn restore(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(info) = store.load_kill_switch().await? else {
            return Ok(false);
        };
        warn!(
            "Kill-switch restored from storage: {} (tripped at {})",
            info.reason, info.activated_at
        );
        self.state.write().await.kill_switch = Some(info);
        Ok(true)
    }

    /// Count one error. Trips the kill-switch when the window total reaches
    /// the ceiling; returns true only for the call that tripped it.
    #[instrument(skip(self, detail))]
    pub async fn record_error(&self, category: ErrorCategory, detail: &str) -> bool {
        let tripped = {
            let mut state = self.state.write().await;
            let now = Instant::now();
            state.prune(self.window, now);
            state.errors.entry(category).or_default().push_back(now);

            let total = state.total_errors();
            warn!(
                "Recorded {} error ({} in window, ceiling {}): {}",
                category.as_str(),
                total,
                self.config.max_errors,
                detail
            );

            if state.kill_switch.is_none() && total >= self.config.max_errors {
                let info = KillSwitchInfo {
                    reason: format!(
                        "{} errors within {}s (last: {} - {})",
                        total,
                        self.window.as_secs(),
                        category.as_str(),
                        detail
                    ),
                    activated_at: Utc::now(),
                    error_count: total,
                };
                state.kill_switch = Some(info.clone());
                Some(info)
            } else {
                None
            }
        };

        match tripped {
            Some(info) => {
                self.announce_trip(info).await;
                true
            }
            None => false,
        }
    }

    /// A successful call resets its category's counter. The kill-switch is untouched.
    pub async fn record_success(&self, category: ErrorCategory) {
        let mut state = self.state.write().await;
        if let Some(timestamps) = state.errors.get_mut(&category) {
            if !timestamps.is_empty() {
                debug!("Clearing {} {} errors after success", timestamps.len(), category.as_str());
                timestamps.clear();
            }
        }
    }

    pub async fn is_kill_switch_active(&self) -> bool {
        self.state.read().await.kill_switch.is_some()
    }

    pub async fn kill_switch(&self) -> Option<KillSwitchInfo> {
        self.state.read().await.kill_switch.clone()
    }

    /// Short-circuit error for gated operations.
    pub async fn ensure_trading_allowed(&self) -> Result<(), ExecutionError> {
        match self.kill_switch().await {
            Some(info) => Err(ExecutionError::KillSwitchActive(info.reason)),
            None => Ok(()),
        }
    }

    /// Trip the kill-switch by hand. No effect when it is already active.
    pub async fn trip(&self, reason: &str) {
        let info = {
            let mut state = self.state.write().await;
            if state.kill_switch.is_some() {
                return;
            }
            let info = KillSwitchInfo {
                reason: reason.to_string(),
                activated_at: Utc::now(),
                error_count: state.total_errors(),
            };
            state.kill_switch = Some(info.clone());
            info
        };
        self.announce_trip(info).await;
    }

    /// Operator action: release the latch and forget the recent errors.
    /// The stored latch goes first so a failed write leaves trading halted.
    #[instrument(skip(self))]
    pub async fn clear_kill_switch(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.clear_kill_switch().await?;
        }
        {
            let mut state = self.state.write().await;
            state.kill_switch = None;
            state.errors.clear();
        }
        info!("Kill-switch cleared by operator");
        if let Some(events) = &self.events {
            events.emit(EngineEvent::KillSwitch {
                timestamp: Utc::now(),
                active: false,
                reason: "cleared by operator".to_string(),
            });
        }
        Ok(())
    }

    /// Take a slot from today's trade limit for an open about to be
    /// submitted. Returns the trading day the slot was taken from.
    pub async fn reserve_trade(&self) -> Result<NaiveDate, ExecutionError> {
        let mut state = self.state.write().await;
        state.roll_day(Utc::now().date_naive());
        if state.daily_limit_reached() {
            return Err(ExecutionError::LimitExceeded(format!(
                "daily trade limit reached ({}/{})",
                state.daily_trades, state.max_daily_trades
            )));
        }
        state.daily_trades += 1;
        Ok(state.trading_day)
    }

    /// Give back a slot taken by `reserve_trade` for an open that did not
    /// confirm. Slots from a previous day are already gone.
    pub async fn release_trade(&self, day: NaiveDate) {
        let mut state = self.state.write().await;
        state.roll_day(Utc::now().date_naive());
        if state.trading_day == day {
            state.daily_trades = state.daily_trades.saturating_sub(1);
        }
    }

    /// Current counters with expired errors pruned and the day rolled over.
    pub async fn snapshot(&self) -> SafetyState {
        let mut state = self.state.write().await;
        state.prune(self.window, Instant::now());
        state.roll_day(Utc::now().date_naive());
        state.clone()
    }

    pub async fn report(&self) -> SafetyReport {
        let state = self.snapshot().await;
        let recent_errors = ErrorCategory::all()
            .into_iter()
            .map(|c| (c, state.error_count(c)))
            .collect();
        let total = state.total_errors();
        SafetyReport {
            recent_errors,
            total_recent_errors: total,
            max_errors: self.config.max_errors,
            kill_switch_risk: total as f64 / self.config.max_errors as f64,
            kill_switch: state.kill_switch,
            daily_trades: state.daily_trades,
            max_daily_trades: state.max_daily_trades,
        }
    }

    async fn announce_trip(&self, info: KillSwitchInfo) {
        error!("KILL-SWITCH ACTIVATED: {}", info.reason);
        if let Some(store) = &self.store {
            if let Err(e) = store.save_kill_switch(&info).await {
                error!("Failed to persist kill-switch state: {:?}", e);
            }
        }
        if let Some(events) = &self.events {
            events.emit(EngineEvent::KillSwitch {
                timestamp: info.activated_at,
                active: true,
                reason: info.reason,
            });
        }
    }
}
