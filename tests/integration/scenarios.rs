//! End-to-end account runs against the scripted browser.
//!
//! Each scenario drives the public orchestrator (or executor) exactly as the
//! binary does, with the `testkit` browser standing in for Chromium.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use phoenix_trader::browser::Session;
use phoenix_trader::engine::orchestrator::Orchestrator;
use phoenix_trader::engine::swap::SwapExecutor;
use phoenix_trader::engine::EngineConfig;
use phoenix_trader::testkit::{ControlScript, EventLog, FakeProvider, FakeSession};
use phoenix_trader::types::{Account, AccountStage, SkipReason, TradeOutcome, TradeRequest};
use phoenix_trader::wallet::WalletRestorer;

/// Restorer that always succeeds and counts calls.
#[derive(Default)]
struct CountingRestorer {
    calls: AtomicUsize,
}

#[async_trait]
impl WalletRestorer for CountingRestorer {
    async fn restore(&self, _session: Arc<dyn Session>, _account: &Account) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn default_sequence() -> Vec<TradeRequest> {
    vec![TradeRequest::sell_all("SOL"), TradeRequest::sell_all("USDC")]
}

#[tokio::test]
async fn test_scenario_a_zero_balance_skips_without_submit() {
    let cfg = EngineConfig::fast_for_tests();
    let log = EventLog::new();
    let (session, _wallet, exchange) = FakeSession::phoenix("s1", &cfg, &log);
    exchange.set(&cfg.selectors.max_balance, ControlScript::with_text("Max: 0"));

    let provider = FakeProvider::new();
    provider.insert("A1", Arc::new(session));
    let report = Orchestrator::new(
        Arc::new(provider),
        Arc::new(CountingRestorer::default()),
        cfg.clone(),
        default_sequence(),
    )
    .run(vec![Account::sample("A1")])
    .await;

    let account = report.account("A1").unwrap();
    assert_eq!(account.stage, AccountStage::Completed);
    for asset in ["SOL", "USDC"] {
        assert_eq!(
            account.outcome_for(asset),
            Some(&TradeOutcome::Skipped(SkipReason::ZeroBalance))
        );
    }
    assert_eq!(log.clicks(&cfg.selectors.submit), 0);
    assert!(log.typed().is_empty());
}

#[tokio::test]
async fn test_scenario_b_default_asset_sells_configured_amount() {
    let cfg = EngineConfig {
        default_sell_amount: dec!(0.5),
        ..EngineConfig::fast_for_tests()
    };
    let log = EventLog::new();
    let (session, _wallet, _exchange) = FakeSession::phoenix("s1", &cfg, &log);

    let outcome = SwapExecutor::new(&cfg)
        .sell(&session, &Account::sample("A1"), &TradeRequest::sell_all("SOL"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TradeOutcome::Success { amount: dec!(0.5), status: "Order filled".into() }
    );
    assert_eq!(log.typed(), vec!["0.5".to_string()]);
}

#[tokio::test]
async fn test_scenario_c_blocked_label_then_normal() {
    let cfg = EngineConfig::fast_for_tests();
    let log = EventLog::new();
    let (session, wallet, exchange) = FakeSession::phoenix("s1", &cfg, &log);
    exchange
        .set(
            &cfg.selectors.submit,
            ControlScript::with_text("Insufficient liquidity").then_text("Place Order"),
        )
        .set(
            &cfg.selectors.status,
            ControlScript::with_text("Failed to send transaction"),
        );

    let outcome = SwapExecutor::new(&cfg)
        .sell(&session, &Account::sample("A1"), &TradeRequest::sell_all("USDC"))
        .await
        .unwrap();

    // Attempt 2's status decides the outcome.
    assert!(matches!(outcome, TradeOutcome::Failed { .. }));
    assert_eq!(log.reloads(wallet.title_str()), 1);
    assert_eq!(log.reloads(exchange.title_str()), 0);
    assert_eq!(log.clicks(&cfg.selectors.submit), 1);
}

#[tokio::test]
async fn test_scenario_d_connect_exhaustion_is_isolated() {
    let mut cfg = EngineConfig::fast_for_tests();
    cfg.connect_retry.max_attempts = 3;
    let log = EventLog::new();

    let (stuck, _, stuck_exchange) = FakeSession::phoenix("stuck", &cfg, &log);
    stuck_exchange.set(&cfg.selectors.connect_wallet, ControlScript::hidden());
    let (sibling, _, _) = FakeSession::phoenix("sibling", &cfg, &log);

    let provider = FakeProvider::new();
    provider.insert("STUCK", Arc::new(stuck));
    provider.insert("SIBLING", Arc::new(sibling));
    let restorer = Arc::new(CountingRestorer::default());

    let report = Orchestrator::new(
        Arc::new(provider),
        Arc::clone(&restorer) as Arc<dyn WalletRestorer>,
        cfg,
        default_sequence(),
    )
    .run(vec![Account::sample("STUCK"), Account::sample("SIBLING")])
    .await;

    assert_eq!(restorer.calls.load(Ordering::SeqCst), 2);

    let stuck = report.account("STUCK").unwrap();
    assert!(stuck.is_failed());
    assert_eq!(stuck.stage, AccountStage::Connect);
    assert!(stuck.trades.is_empty());

    let sibling = report.account("SIBLING").unwrap();
    assert!(!sibling.is_failed());
    assert_eq!(sibling.stage, AccountStage::Completed);
    assert!(sibling.outcome_for("SOL").is_some_and(TradeOutcome::is_success));
    assert!(sibling.outcome_for("USDC").is_some_and(TradeOutcome::is_success));
    assert!(report.any_failed());
}
