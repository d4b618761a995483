//! Paper-trading venue.
//!
//! Prices are kept per mint (SOL per token) and can be set directly or moved
//! by a seeded random walk. Submit and confirm outcomes can be scripted so
//! every execution path is reachable without a network.

use crate::trading::error::ExecutionError;
use crate::trading::venue::{BalanceOracle, Confirmation, PendingTrade, Quote, QuoteRequest, SwapVenue};
use crate::types::Pubkey;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Scripted result for the next `confirm` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmBehavior {
    Confirm,
    /// Never resolves; the caller's timeout fires
    Hang,
    /// The trade landed but failed
    Fail(String),
}

struct SimState {
    base_mint: Pubkey,
    prices: HashMap<Pubkey, f64>,
    default_price: f64,
    price_impact_pct: HashMap<Pubkey, f64>,
    default_price_impact_pct: f64,
    quote_failures: usize,
    submit_script: VecDeque<Option<String>>,
    confirm_script: VecDeque<ConfirmBehavior>,
    confirm_delay: Duration,
    balance: f64,
    rng: StdRng,
    volatility: f64,
    next_signature: u64,
}

pub struct SimulatedVenue {
    state: Mutex<SimState>,
    quote_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    confirm_calls: AtomicUsize,
}

impl SimulatedVenue {
    pub fn new(base_mint: impl Into<Pubkey>, paper_balance: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                base_mint: base_mint.into(),
                prices: HashMap::new(),
                default_price: 0.000_001,
                price_impact_pct: HashMap::new(),
                default_price_impact_pct: 0.0,
                quote_failures: 0,
                submit_script: VecDeque::new(),
                confirm_script: VecDeque::new(),
                confirm_delay: Duration::ZERO,
                balance: paper_balance,
                rng: StdRng::seed_from_u64(7),
                volatility: 0.0,
                next_signature: 1,
            }),
            quote_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
        }
    }

    /// Enable a seeded random walk: every `tick` moves each price by up to
    /// `volatility` (fraction) in either direction.
    pub fn with_random_walk(self, seed: u64, volatility: f64) -> Self {
        {
            let mut state = self.lock();
            state.rng = StdRng::seed_from_u64(seed);
            state.volatility = volatility;
        }
        self
    }

    pub fn with_confirm_delay(self, delay: Duration) -> Self {
        self.lock().confirm_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// SOL per token for `mint`.
    pub fn set_price(&self, mint: &str, price: f64) {
        self.lock().prices.insert(mint.to_string(), price);
    }

    pub fn price(&self, mint: &str) -> f64 {
        let state = self.lock();
        state.prices.get(mint).copied().unwrap_or(state.default_price)
    }

    /// Multiply the current price of `mint` by `factor`.
    pub fn scale_price(&self, mint: &str, factor: f64) {
        let mut state = self.lock();
        let current = state.prices.get(mint).copied().unwrap_or(state.default_price);
        state.prices.insert(mint.to_string(), current * factor);
    }

    pub fn set_price_impact(&self, mint: &str, impact_pct: f64) {
        self.lock().price_impact_pct.insert(mint.to_string(), impact_pct);
    }

    pub fn set_default_price_impact(&self, impact_pct: f64) {
        self.lock().default_price_impact_pct = impact_pct;
    }

    /// The next `count` quotes fail with `QuoteUnavailable`.
    pub fn fail_next_quotes(&self, count: usize) {
        self.lock().quote_failures = count;
    }

    pub fn push_submit_failure(&self, message: &str) {
        self.lock().submit_script.push_back(Some(message.to_string()));
    }

    pub fn push_submit_success(&self) {
        self.lock().submit_script.push_back(None);
    }

    pub fn push_confirm(&self, behavior: ConfirmBehavior) {
        self.lock().confirm_script.push_back(behavior);
    }

    pub fn set_balance(&self, balance: f64) {
        self.lock().balance = balance;
    }

    pub fn balance(&self) -> f64 {
        self.lock().balance
    }

    /// Advance the random walk one step.
    pub fn tick(&self) {
        let mut state = self.lock();
        if state.volatility <= 0.0 {
            return;
        }
        let volatility = state.volatility;
        let SimState { prices, rng, .. } = &mut *state;
        for price in prices.values_mut() {
            let step: f64 = rng.gen_range(-volatility..=volatility);
            *price = (*price * (1.0 + step)).max(f64::MIN_POSITIVE);
        }
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwapVenue for SimulatedVenue {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, ExecutionError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if state.quote_failures > 0 {
            state.quote_failures -= 1;
            return Err(ExecutionError::QuoteUnavailable("simulated quote outage".to_string()));
        }

        let buying = request.input_mint == state.base_mint;
        let token = if buying { &request.output_mint } else { &request.input_mint };
        let price = state.prices.get(token).copied().unwrap_or(state.default_price);
        let impact = state
            .price_impact_pct
            .get(token)
            .copied()
            .unwrap_or(state.default_price_impact_pct);

        let gross = if buying { request.amount / price } else { request.amount * price };
        let out_amount = gross * (1.0 - impact / 100.0);
        if out_amount.is_nan() || out_amount <= 0.0 {
            return Err(ExecutionError::QuoteUnavailable(format!("no route for {}", token)));
        }

        Ok(Quote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount: request.amount,
            out_amount,
            price_impact_pct: impact,
            slippage_bps: request.slippage_bps,
            route: None,
        })
    }

    async fn submit(&self, quote: &Quote) -> Result<PendingTrade, ExecutionError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if let Some(Some(message)) = state.submit_script.pop_front() {
            return Err(ExecutionError::SubmissionFailed(message));
        }
        let signature = format!("sim-{:06}", state.next_signature);
        state.next_signature += 1;
        debug!("Simulated submit {} ({} -> {})", signature, quote.input_mint, quote.output_mint);
        Ok(PendingTrade {
            signature,
            submitted_at: Utc::now(),
            quote: quote.clone(),
        })
    }

    async fn confirm(&self, pending: &PendingTrade) -> Result<Confirmation, ExecutionError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        let (behavior, delay) = {
            let mut state = self.lock();
            let behavior = state.confirm_script.pop_front().unwrap_or(ConfirmBehavior::Confirm);
            (behavior, state.confirm_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match behavior {
            ConfirmBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(ExecutionError::ConfirmationTimeout { timeout_ms: 0 })
            }
            ConfirmBehavior::Fail(reason) => Err(ExecutionError::Venue(reason)),
            ConfirmBehavior::Confirm => {
                let quote = &pending.quote;
                let mut state = self.lock();
                if quote.input_mint == state.base_mint {
                    state.balance -= quote.in_amount;
                } else if quote.output_mint == state.base_mint {
                    state.balance += quote.out_amount;
                }
                info!("Simulated confirm {} (paper balance {:.4})", pending.signature, state.balance);
                Ok(Confirmation {
                    signature: pending.signature.clone(),
                    realized_amount: quote.out_amount,
                })
            }
        }
    }
}

#[async_trait]
impl BalanceOracle for SimulatedVenue {
    async fn get_balance(&self) -> Result<f64, ExecutionError> {
        Ok(self.balance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::config::WSOL_MINT;

    fn buy(amount: f64) -> QuoteRequest {
        QuoteRequest {
            input_mint: WSOL_MINT.to_string(),
            output_mint: "TokenA".to_string(),
            amount,
            slippage_bps: 50,
        }
    }

    #[tokio::test]
    async fn test_quotes_follow_price() {
        let venue = SimulatedVenue::new(WSOL_MINT, 1.0);
        venue.set_price("TokenA", 0.001);

        let quote = venue.get_quote(&buy(0.5)).await.unwrap();
        assert!((quote.out_amount - 500.0).abs() < 1e-9);

        let sell = QuoteRequest {
            input_mint: "TokenA".to_string(),
            output_mint: WSOL_MINT.to_string(),
            amount: 500.0,
            slippage_bps: 50,
        };
        venue.scale_price("TokenA", 1.3);
        let quote = venue.get_quote(&sell).await.unwrap();
        assert!((quote.out_amount - 0.65).abs() < 1e-9);
        assert_eq!(venue.quote_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let venue = SimulatedVenue::new(WSOL_MINT, 1.0);
        venue.set_price("TokenA", 0.001);
        venue.fail_next_quotes(1);
        assert!(matches!(
            venue.get_quote(&buy(0.1)).await,
            Err(ExecutionError::QuoteUnavailable(_))
        ));

        let quote = venue.get_quote(&buy(0.1)).await.unwrap();
        venue.push_submit_failure("blockhash expired");
        assert!(matches!(
            venue.submit(&quote).await,
            Err(ExecutionError::SubmissionFailed(_))
        ));

        let pending = venue.submit(&quote).await.unwrap();
        venue.push_confirm(ConfirmBehavior::Fail("slippage exceeded".into()));
        assert!(matches!(venue.confirm(&pending).await, Err(ExecutionError::Venue(_))));
    }

    #[tokio::test]
    async fn test_submit_script_runs_in_order() {
        let venue = SimulatedVenue::new(WSOL_MINT, 1.0);
        venue.set_price("TokenA", 0.001);
        let quote = venue.get_quote(&buy(0.1)).await.unwrap();

        venue.push_submit_success();
        venue.push_submit_failure("node behind");
        assert!(venue.submit(&quote).await.is_ok());
        assert!(matches!(
            venue.submit(&quote).await,
            Err(ExecutionError::SubmissionFailed(_))
        ));
        assert_eq!(venue.submit_calls(), 2);
    }

    #[tokio::test]
    async fn test_price_impact_default_and_override() {
        let venue = SimulatedVenue::new(WSOL_MINT, 1.0);
        venue.set_price("TokenA", 0.001);
        venue.set_price("TokenB", 0.001);
        venue.set_default_price_impact(1.0);
        venue.set_price_impact("TokenB", 3.5);

        let quote = venue.get_quote(&buy(0.5)).await.unwrap();
        assert_eq!(quote.price_impact_pct, 1.0);
        assert!((quote.out_amount - 495.0).abs() < 1e-9);

        let mut request = buy(0.5);
        request.output_mint = "TokenB".to_string();
        let quote = venue.get_quote(&request).await.unwrap();
        assert_eq!(quote.price_impact_pct, 3.5);
    }

    #[tokio::test]
    async fn test_hang_never_resolves() {
        let venue = SimulatedVenue::new(WSOL_MINT, 1.0);
        venue.set_price("TokenA", 0.001);
        let quote = venue.get_quote(&buy(0.1)).await.unwrap();
        let pending = venue.submit(&quote).await.unwrap();
        venue.push_confirm(ConfirmBehavior::Hang);

        let waited = tokio::time::timeout(Duration::from_millis(20), venue.confirm(&pending)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_paper_balance_moves_on_confirm() {
        let venue = SimulatedVenue::new(WSOL_MINT, 1.0);
        venue.set_price("TokenA", 0.001);
        let quote = venue.get_quote(&buy(0.25)).await.unwrap();
        let pending = venue.submit(&quote).await.unwrap();
        venue.confirm(&pending).await.unwrap();
        assert!((venue.get_balance().await.unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_random_walk_is_seeded() {
        let a = SimulatedVenue::new(WSOL_MINT, 1.0).with_random_walk(42, 0.05);
        let b = SimulatedVenue::new(WSOL_MINT, 1.0).with_random_walk(42, 0.05);
        a.set_price("TokenA", 0.001);
        b.set_price("TokenA", 0.001);
        for _ in 0..10 {
            a.tick();
            b.tick();
        }
        assert_eq!(a.price("TokenA"), b.price("TokenA"));
        assert_ne!(a.price("TokenA"), 0.001);
    }
}
