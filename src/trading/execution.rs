//! ExecutionCoordinator - quote, validate, submit and confirm with bounded retries.
//!
//! Both `open` and `close` run the same attempt sequence under one
//! `RetryPolicy`. Every call ends in exactly one `TradeRecord`, which is
//! appended to the journal and broadcast on the event bus. Safety counters
//! are fed at the step where a failure happens, once per attempt.

use crate::trading::book::PositionBook;
use crate::trading::config::ExecutionConfig;
use crate::trading::error::{ErrorCategory, ExecutionError};
use crate::trading::events::{EventBus, TradeJournal};
use crate::trading::retry::RetryPolicy;
use crate::trading::safety::SafetyController;
use crate::trading::types::{
    EngineEvent, ExitReason, Position, TradeAction, TradeRecord, TradeStatus,
};
use crate::trading::venue::{BalanceOracle, Confirmation, Quote, QuoteRequest, SwapVenue};
use crate::types::{EntryOrigin, Pubkey};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Request to open a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub mint: Pubkey,
    pub symbol: String,
    /// SOL to spend
    pub amount: f64,
    #[serde(default)]
    pub origin: EntryOrigin,
}

impl OpenOrder {
    pub fn new(mint: impl Into<Pubkey>, symbol: impl Into<String>, amount: f64) -> Self {
        Self {
            mint: mint.into(),
            symbol: symbol.into(),
            amount,
            origin: EntryOrigin::Normal,
        }
    }

    pub fn with_origin(mut self, origin: EntryOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// What the last attempt observed, for the terminal record.
#[derive(Debug, Default, Clone, Copy)]
struct AttemptTrace {
    price_impact_pct: Option<f64>,
    slippage_bps: Option<u16>,
}

/// A confirmed attempt.
#[derive(Debug, Clone)]
struct Fill {
    quote: Quote,
    confirmation: Confirmation,
}

pub struct ExecutionCoordinator {
    config: ExecutionConfig,
    retry: RetryPolicy,
    venue: Arc<dyn SwapVenue>,
    balance: Option<Arc<dyn BalanceOracle>>,
    safety: Arc<SafetyController>,
    book: Arc<PositionBook>,
    journal: Arc<TradeJournal>,
    events: EventBus,
}

impl ExecutionCoordinator {
    pub fn new(
        config: ExecutionConfig,
        venue: Arc<dyn SwapVenue>,
        safety: Arc<SafetyController>,
        book: Arc<PositionBook>,
        journal: Arc<TradeJournal>,
        events: EventBus,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            retry,
            venue,
            balance: None,
            safety,
            book,
            journal,
            events,
        }
    }

    /// Check the base-asset balance before every open.
    pub fn with_balance_oracle(mut self, balance: Arc<dyn BalanceOracle>) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    pub fn safety(&self) -> &Arc<SafetyController> {
        &self.safety
    }

    pub fn journal(&self) -> &Arc<TradeJournal> {
        &self.journal
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn venue_name(&self) -> &str {
        self.venue.name()
    }

    /// Buy `order.amount` SOL worth of `order.mint`. A confirmed open creates
    /// a position in the book.
    #[instrument(skip(self, order), fields(mint = %order.mint))]
    pub async fn open(&self, order: OpenOrder) -> TradeRecord {
        let started = Instant::now();
        let mut record = self.draft(TradeAction::Open, &order.mint, &order.symbol, order.amount);

        let trade_day = match self.precheck_open(&order).await {
            Ok(day) => day,
            Err(e) => return self.finish_failure(record, e, 0, AttemptTrace::default(), started).await,
        };

        let request = order.base_request(&self.config);
        let trace = Mutex::new(AttemptTrace::default());
        let outcome = {
            let request = &request;
            let trace = &trace;
            self.retry
                .run(move |attempt| self.attempt(request, attempt, trace))
                .await
        };
        let trace = read_trace(&trace);
        let retries = outcome.retries();

        match outcome.result {
            Ok(fill) => {
                let position = Position::new(
                    order.mint.clone(),
                    order.symbol.clone(),
                    fill.quote.in_amount,
                    fill.confirmation.realized_amount,
                    order.origin,
                    Utc::now(),
                );
                self.book.insert_confirmed(position).await;

                record.realized_amount = Some(fill.confirmation.realized_amount);
                record.signature = Some(fill.confirmation.signature);
                record.price_impact_pct = Some(fill.quote.price_impact_pct);
                record.slippage_bps = Some(fill.quote.slippage_bps);
                self.finish_success(record, retries, started).await
            }
            Err(e) => {
                self.book.release_open(&order.mint).await;
                self.safety.release_trade(trade_day).await;
                self.finish_failure(record, e, retries, trace, started).await
            }
        }
    }

    /// Close the position for `mint` with `reason`.
    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn close(&self, mint: &str, reason: ExitReason) -> TradeRecord {
        let started = Instant::now();

        if let Err(e) = self.safety.ensure_trading_allowed().await {
            let symbol = self.book.get(mint).await.map(|p| p.symbol).unwrap_or_default();
            let mut record = self.draft(TradeAction::Close, mint, &symbol, 0.0);
            record.reason = Some(reason.to_string());
            return self.finish_failure(record, e, 0, AttemptTrace::default(), started).await;
        }

        match self.book.begin_close(mint).await {
            Ok(position) => self.execute_close(position, reason).await,
            Err(e) => {
                let mut record = self.draft(TradeAction::Close, mint, "", 0.0);
                record.reason = Some(reason.to_string());
                self.finish_failure(record, e, 0, AttemptTrace::default(), started).await
            }
        }
    }

    /// Sell a position that is already in CLOSING. A confirmed close removes
    /// it from the book; a failed close leaves it in FAILED_CLOSE.
    #[instrument(skip(self, position), fields(mint = %position.mint, reason = %reason))]
    pub async fn execute_close(&self, position: Position, reason: ExitReason) -> TradeRecord {
        let started = Instant::now();
        let mut record = self.draft(
            TradeAction::Close,
            &position.mint,
            &position.symbol,
            position.token_amount,
        );
        record.reason = Some(reason.to_string());

        if let Err(e) = self.safety.ensure_trading_allowed().await {
            self.book.revert_close(&position.mint).await;
            return self.finish_failure(record, e, 0, AttemptTrace::default(), started).await;
        }

        let request = QuoteRequest {
            input_mint: position.mint.clone(),
            output_mint: self.config.base_mint.clone(),
            amount: position.token_amount,
            slippage_bps: self.config.base_slippage_bps,
        };
        let trace = Mutex::new(AttemptTrace::default());
        let outcome = {
            let request = &request;
            let trace = &trace;
            self.retry
                .run(move |attempt| self.attempt(request, attempt, trace))
                .await
        };
        let trace = read_trace(&trace);
        let retries = outcome.retries();

        match outcome.result {
            Ok(fill) => {
                self.book.finish_close(&position.mint).await;
                let received = fill.confirmation.realized_amount;
                let pnl = received - position.entry_size;
                record.realized_amount = Some(received);
                record.signature = Some(fill.confirmation.signature);
                record.price_impact_pct = Some(fill.quote.price_impact_pct);
                record.slippage_bps = Some(fill.quote.slippage_bps);
                record.pnl = Some(pnl);
                record.pnl_pct = (position.entry_size > 0.0).then(|| pnl / position.entry_size * 100.0);
                self.finish_success(record, retries, started).await
            }
            Err(e) => {
                self.book.mark_failed_close(&position.mint).await;
                self.finish_failure(record, e, retries, trace, started).await
            }
        }
    }

    /// Current SOL value of a position, from a sell quote. Valuation quotes
    /// do not feed the safety counters.
    pub async fn quote_value(&self, position: &Position) -> Result<(f64, f64), ExecutionError> {
        let request = QuoteRequest {
            input_mint: position.mint.clone(),
            output_mint: self.config.base_mint.clone(),
            amount: position.token_amount,
            slippage_bps: self.config.base_slippage_bps,
        };
        let quote = self.venue.get_quote(&request).await?;
        if quote.out_amount <= 0.0 {
            return Err(ExecutionError::QuoteUnavailable(format!(
                "empty valuation quote for {}",
                position.mint
            )));
        }
        Ok((quote.out_amount, quote.price_impact_pct))
    }

    /// Gate an open and take its reservations: one slot of today's trade
    /// limit and the mint in the book. Nothing is held when this fails.
    async fn precheck_open(&self, order: &OpenOrder) -> Result<NaiveDate, ExecutionError> {
        self.safety.ensure_trading_allowed().await?;

        if order.amount <= 0.0 || order.amount > self.config.max_trade_size {
            return Err(ExecutionError::LimitExceeded(format!(
                "trade size {:.4} outside (0, {:.4}]",
                order.amount, self.config.max_trade_size
            )));
        }
        let trade_day = self.safety.reserve_trade().await?;
        if let Err(e) = self.book.reserve_open(&order.mint).await {
            self.safety.release_trade(trade_day).await;
            return Err(e);
        }

        if let Some(oracle) = &self.balance {
            let checked = match oracle.get_balance().await {
                Ok(available) if available < order.amount => Err(ExecutionError::InsufficientBalance {
                    required: order.amount,
                    available,
                }),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = checked {
                self.book.release_open(&order.mint).await;
                self.safety.release_trade(trade_day).await;
                return Err(e);
            }
        }
        Ok(trade_day)
    }

    /// One quote/validate/submit/confirm pass.
    async fn attempt(
        &self,
        request: &QuoteRequest,
        attempt: u32,
        trace: &Mutex<AttemptTrace>,
    ) -> Result<Fill, ExecutionError> {
        // A kill-switch tripped between retries stops the sequence
        self.safety.ensure_trading_allowed().await?;

        let mut request = request.clone();
        let previous_impact = read_trace(trace).price_impact_pct.unwrap_or(0.0);
        request.slippage_bps = self.retry.slippage_bps(previous_impact, attempt);

        let mut quote = match self.venue.get_quote(&request).await {
            Ok(q) if q.out_amount > 0.0 => q,
            Ok(_) => {
                let e = ExecutionError::QuoteUnavailable("quote returned no output".to_string());
                return Err(self.fail_step(e).await);
            }
            Err(e) => return Err(self.fail_step(e).await),
        };
        self.safety.record_success(ErrorCategory::Quote).await;

        let slippage = self.retry.slippage_bps(quote.price_impact_pct, attempt);
        quote.slippage_bps = slippage;
        {
            let mut t = trace.lock().unwrap_or_else(|e| e.into_inner());
            t.price_impact_pct = Some(quote.price_impact_pct);
            t.slippage_bps = Some(slippage);
        }

        if quote.price_impact_pct > self.config.max_price_impact_pct {
            return Err(ExecutionError::PriceImpactExceeded {
                impact_pct: quote.price_impact_pct,
                max_pct: self.config.max_price_impact_pct,
            });
        }

        debug!(
            "Attempt {}: {} -> {} in={:.6} out={:.6} impact={:.3}% slippage={}bps",
            attempt,
            quote.input_mint,
            quote.output_mint,
            quote.in_amount,
            quote.out_amount,
            quote.price_impact_pct,
            slippage
        );

        let pending = match self.venue.submit(&quote).await {
            Ok(p) => p,
            Err(e) => return Err(self.fail_step(e).await),
        };
        self.safety.record_success(ErrorCategory::Submit).await;

        let timeout = self.config.confirm_timeout();
        let confirmation = match tokio::time::timeout(timeout, self.venue.confirm(&pending)).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => return Err(self.fail_step(e).await),
            Err(_) => {
                let e = ExecutionError::ConfirmationTimeout {
                    timeout_ms: self.config.confirm_timeout_ms,
                };
                return Err(self.fail_step(e).await);
            }
        };
        self.safety.record_success(ErrorCategory::Confirm).await;

        Ok(Fill { quote, confirmation })
    }

    /// Feed the safety counter for a failed step and hand the error back.
    async fn fail_step(&self, e: ExecutionError) -> ExecutionError {
        if let Some(category) = e.category() {
            self.safety.record_error(category, &e.to_string()).await;
        }
        e
    }

    fn draft(&self, action: TradeAction, mint: &str, symbol: &str, requested: f64) -> TradeRecord {
        TradeRecord {
            id: None,
            timestamp: Utc::now(),
            action,
            mint: mint.to_string(),
            symbol: symbol.to_string(),
            requested_amount: requested,
            realized_amount: None,
            price_impact_pct: None,
            slippage_bps: None,
            latency_ms: 0,
            retry_count: 0,
            status: TradeStatus::Failed,
            failure: None,
            error: None,
            reason: None,
            signature: None,
            pnl: None,
            pnl_pct: None,
        }
    }

    async fn finish_success(&self, mut record: TradeRecord, retries: u32, started: Instant) -> TradeRecord {
        record.status = TradeStatus::Confirmed;
        record.retry_count = retries;
        record.latency_ms = started.elapsed().as_millis() as u64;
        record.timestamp = Utc::now();

        match record.action {
            TradeAction::Open => info!(
                "OPEN confirmed {} ({}): {:.4} SOL -> {:.2} tokens, {} retries, {}ms",
                record.symbol,
                record.mint,
                record.requested_amount,
                record.realized_amount.unwrap_or_default(),
                retries,
                record.latency_ms
            ),
            TradeAction::Close => info!(
                "CLOSE confirmed {} ({}) [{}]: received {:.4} SOL, P&L {:+.4} SOL ({:+.2}%)",
                record.symbol,
                record.mint,
                record.reason.as_deref().unwrap_or("-"),
                record.realized_amount.unwrap_or_default(),
                record.pnl.unwrap_or_default(),
                record.pnl_pct.unwrap_or_default()
            ),
        }

        self.publish(record).await
    }

    async fn finish_failure(
        &self,
        mut record: TradeRecord,
        error: ExecutionError,
        retries: u32,
        trace: AttemptTrace,
        started: Instant,
    ) -> TradeRecord {
        record.status = match error {
            ExecutionError::AlreadyOpen(_) | ExecutionError::CloseInProgress(_) => TradeStatus::Cancelled,
            _ => TradeStatus::Failed,
        };
        record.failure = Some(error.kind());
        record.error = Some(error.to_string());
        record.retry_count = retries;
        record.price_impact_pct = trace.price_impact_pct;
        record.slippage_bps = trace.slippage_bps;
        record.latency_ms = started.elapsed().as_millis() as u64;
        record.timestamp = Utc::now();

        warn!(
            "{} {} for {} ({}): {} after {} retries",
            record.action.to_string().to_uppercase(),
            record.status,
            record.symbol,
            record.mint,
            error,
            retries
        );

        self.publish(record).await
    }

    async fn publish(&self, record: TradeRecord) -> TradeRecord {
        self.journal.append(record.clone()).await;
        self.events.emit(EngineEvent::Trade(record.clone()));
        record
    }
}

impl OpenOrder {
    fn base_request(&self, config: &ExecutionConfig) -> QuoteRequest {
        QuoteRequest {
            input_mint: config.base_mint.clone(),
            output_mint: self.mint.clone(),
            amount: self.amount,
            slippage_bps: config.base_slippage_bps,
        }
    }
}

fn read_trace(trace: &Mutex<AttemptTrace>) -> AttemptTrace {
    *trace.lock().unwrap_or_else(|e| e.into_inner())
}
