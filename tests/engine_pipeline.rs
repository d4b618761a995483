//! Discovery intake, decisions and the engine run loop

use anyhow::Result;
use auracle::trading::{
    CandidateOutcome, Classification, Engine, EngineBuilder, EngineConfig, EngineEvent, SimulatedVenue,
    TradeAction, TradeStatus, WSOL_MINT,
};
use auracle::TokenCandidate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn healthy_candidate(mint: &str) -> TokenCandidate {
    TokenCandidate {
        mint: mint.to_string(),
        symbol: "GOOD".to_string(),
        liquidity: 60_000.0,
        volume_24h: 25_000.0,
        price_change_24h: 0.05,
        holders: 600,
        dev_holdings_pct: 2.0,
        deployer: None,
        source: Some("scanner".to_string()),
    }
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.execution.confirm_timeout_ms = 50;
    config.execution.backoff_base_ms = 2;
    config.execution.backoff_max_ms = 4;
    config.exits.quick_profit_window_secs = 0;
    config.exits.sniper_quick_profit_window_secs = 0;
    config.exits.min_hold_secs = 0;
    config.exits.profit_target = 0.2;
    config.monitor.interval_ms = 20;
    config
}

async fn paper_engine(config: EngineConfig) -> Result<(Arc<SimulatedVenue>, Arc<Engine>)> {
    let venue = Arc::new(SimulatedVenue::new(WSOL_MINT, 1.0));
    let engine = EngineBuilder::new()
        .with_config(config)
        .with_venue(venue.clone())
        .with_balance_oracle(venue.clone())
        .build()
        .await?;
    Ok((venue, engine))
}

async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_risk_scenarios() -> Result<()> {
    let (_venue, engine) = paper_engine(fast_config()).await?;

    let approved = engine.evaluate(&TokenCandidate {
        liquidity: 50_000.0,
        volume_24h: 15_000.0,
        holders: 200,
        dev_holdings_pct: 5.0,
        price_change_24h: 0.05,
        ..TokenCandidate::new("ApprovedMint", "OKAY")
    });
    assert!(approved.safe);
    assert_eq!(approved.classification, Classification::Approved);

    let flagged = engine.evaluate(&TokenCandidate {
        liquidity: 800.0,
        holders: 12,
        price_change_24h: -0.25,
        ..TokenCandidate::new("ThinMint", "THIN")
    });
    assert!(!flagged.safe);
    assert_eq!(flagged.classification, Classification::Flagged);
    assert!(flagged.reasons.iter().any(|r| r.to_lowercase().contains("low liquidity")));
    Ok(())
}

#[tokio::test]
async fn test_healthy_candidate_is_bought() -> Result<()> {
    let (venue, engine) = paper_engine(fast_config()).await?;
    venue.set_price("BuyMint", 0.001);

    let outcome = engine.process_candidate(healthy_candidate("BuyMint")).await;
    let CandidateOutcome::Executed { decision, record } = outcome else {
        panic!("expected an open");
    };
    assert!(decision.confidence > 0.8);
    // base 0.01 scaled by the high-confidence multiplier
    assert!((decision.amount - 0.015).abs() < 1e-9);
    assert_eq!(record.status, TradeStatus::Confirmed);
    assert_eq!(engine.positions().await.len(), 1);
    assert!((venue.balance() - 0.985).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_discovery_opens_one_position() -> Result<()> {
    let (venue, engine) = paper_engine(fast_config()).await?;
    venue.set_price("DupMint", 0.001);

    let candidate = healthy_candidate("DupMint");
    let (first, second) = tokio::join!(
        engine.process_candidate(candidate.clone()),
        engine.process_candidate(candidate.clone())
    );
    let third = engine.process_candidate(candidate).await;
    assert!(third.record().is_none());

    let confirmed = [first, second]
        .iter()
        .filter_map(|o| o.record())
        .filter(|r| r.status == TradeStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(engine.positions().await.len(), 1);

    let opens = engine
        .journal()
        .records_for("DupMint")
        .await
        .into_iter()
        .filter(|r| r.action == TradeAction::Open && r.is_confirmed())
        .count();
    assert_eq!(opens, 1);
    Ok(())
}

#[tokio::test]
async fn test_rejected_candidate_emits_event() -> Result<()> {
    let (venue, engine) = paper_engine(fast_config()).await?;
    let mut events = engine.subscribe();

    let mut candidate = healthy_candidate("RugMint");
    candidate.symbol = "RUGPULL".to_string();
    let outcome = engine.process_candidate(candidate).await;
    assert!(matches!(outcome, CandidateOutcome::Rejected { .. }));
    assert_eq!(venue.quote_calls(), 0);

    match events.try_recv()? {
        EngineEvent::CandidateRejected { mint, reason, .. } => {
            assert_eq!(mint, "RugMint");
            assert!(reason.contains("Flagged"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_blacklist_applies_to_next_candidate() -> Result<()> {
    let (venue, engine) = paper_engine(fast_config()).await?;
    venue.set_price("BadMint", 0.001);
    engine.risk().add_to_blacklist("BadMint", "reported rug");

    let outcome = engine.process_candidate(healthy_candidate("BadMint")).await;
    assert!(matches!(outcome, CandidateOutcome::Rejected { .. }));
    assert!(engine.positions().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_paused_trading_rejects_candidates() -> Result<()> {
    let (venue, engine) = paper_engine(fast_config()).await?;
    venue.set_price("PauseMint", 0.001);

    engine.set_trading_enabled(false);
    let outcome = engine.process_candidate(healthy_candidate("PauseMint")).await;
    match outcome {
        CandidateOutcome::Rejected { decision, .. } => assert_eq!(decision.reason, "trading paused"),
        other => panic!("unexpected outcome {:?}", other),
    }

    engine.set_trading_enabled(true);
    let outcome = engine.process_candidate(healthy_candidate("PauseMint")).await;
    assert!(outcome.record().is_some_and(|r| r.is_confirmed()));
    Ok(())
}

#[tokio::test]
async fn test_position_count_limit() -> Result<()> {
    let mut config = fast_config();
    config.decision.max_open_positions = 2;
    let (venue, engine) = paper_engine(config).await?;

    for i in 0..3 {
        let mint = format!("CapMint{}", i);
        venue.set_price(&mint, 0.001);
        engine.process_candidate(healthy_candidate(&mint)).await;
    }
    assert_eq!(engine.positions().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_run_loop_buys_and_exits() -> Result<()> {
    let (venue, engine) = paper_engine(fast_config()).await?;
    venue.set_price("LoopMint", 0.001);

    let (sender, receiver) = mpsc::channel(8);
    let handle = tokio::spawn(engine.clone().run(receiver));

    let watched = &engine;
    sender.send(healthy_candidate("LoopMint")).await?;
    assert!(wait_until(|| async move { watched.positions().await.len() == 1 }).await);

    venue.scale_price("LoopMint", 1.3);
    assert!(wait_until(|| async move { watched.positions().await.is_empty() }).await);

    let close = engine
        .journal()
        .records_for("LoopMint")
        .await
        .into_iter()
        .find(|r| r.action == TradeAction::Close)
        .expect("close record");
    assert_eq!(close.reason.as_deref(), Some("profit_target"));
    assert_eq!(close.status, TradeStatus::Confirmed);

    engine.shutdown();
    handle.await?;
    Ok(())
}
