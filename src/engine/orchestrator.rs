//! Orchestrator.
//!
//! Fans out one task per account, optionally capped by a semaphore, and
//! collects an `AccountReport` from each. Within an account everything is
//! sequential: provision → restore → connect → sells in configured order.
//! An account failure never touches its siblings.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::{Session, SessionProvider};
use crate::types::{
    Account, AccountReport, AccountStage, AutomationError, RunReport, TradeOutcome, TradeRequest,
};
use crate::wallet::WalletRestorer;

use super::connector::WalletConnector;
use super::swap::SwapExecutor;
use super::EngineConfig;

pub struct Orchestrator {
    runner: AccountRunner,
    max_concurrent: usize,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        restorer: Arc<dyn WalletRestorer>,
        cfg: EngineConfig,
        sequence: Vec<TradeRequest>,
    ) -> Self {
        Self {
            runner: AccountRunner {
                provider,
                restorer,
                cfg: Arc::new(cfg),
                sequence: Arc::new(sequence),
                keep_browser_on_failure: true,
            },
            max_concurrent: 0,
        }
    }

    /// Cap on simultaneous account runs; 0 means unbounded.
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn keep_browser_on_failure(mut self, keep: bool) -> Self {
        self.runner.keep_browser_on_failure = keep;
        self
    }

    /// Run every account to completion. Reports come back in input order.
    pub async fn run(&self, accounts: Vec<Account>) -> RunReport {
        let limit = (self.max_concurrent > 0).then(|| Arc::new(Semaphore::new(self.max_concurrent)));
        let run_id = Uuid::new_v4();
        info!(
            run = %run_id,
            accounts = accounts.len(),
            max_concurrent = self.max_concurrent,
            "Starting run"
        );

        let mut tasks = JoinSet::new();
        for (position, account) in accounts.into_iter().enumerate() {
            let runner = self.runner.clone();
            let limit = limit.clone();
            let span = info_span!("account", run = %run_id, address = %account.address);
            tasks.spawn(
                async move {
                    let _permit = match limit {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };
                    (position, runner.run_guarded(account).await)
                }
                .instrument(span),
            );
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => reports.push(entry),
                Err(e) => error!(error = %e, "Account task did not complete"),
            }
        }
        reports.sort_by_key(|(position, _)| *position);

        RunReport {
            accounts: reports.into_iter().map(|(_, report)| report).collect(),
        }
    }
}

/// Everything one account task needs; cheap to clone.
#[derive(Clone)]
struct AccountRunner {
    provider: Arc<dyn SessionProvider>,
    restorer: Arc<dyn WalletRestorer>,
    cfg: Arc<EngineConfig>,
    sequence: Arc<Vec<TradeRequest>>,
    keep_browser_on_failure: bool,
}

impl AccountRunner {
    /// `run`, with a panic inside the account turned into a failed report.
    async fn run_guarded(self, account: Account) -> AccountReport {
        let address = account.address.clone();
        match AssertUnwindSafe(self.run(account)).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                error!("Account task panicked");
                let mut report = AccountReport::new(&address);
                report.error = Some("account task panicked".to_string());
                report
            }
        }
    }

    async fn run(&self, account: Account) -> AccountReport {
        let mut report = AccountReport::new(&account.address);
        info!(index = account.index, "Processing account");

        let session = match self.provider.open(&account).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Cannot provision browser session");
                report.error = Some(AutomationError::Provisioning(format!("{e:#}")).to_string());
                report.finished_at = Utc::now();
                return report;
            }
        };

        match self.drive(Arc::clone(&session), &account, &mut report).await {
            Ok(()) => {
                report.stage = AccountStage::Completed;
                info!(outcome = "success", "All tasks completed");
                self.close(session.as_ref()).await;
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(stage = %report.stage, error = %message, "Account aborted");
                report.error = Some(message);
                if self.keep_browser_on_failure {
                    warn!(session = session.id(), "Leaving browser open for inspection");
                } else {
                    self.close(session.as_ref()).await;
                }
            }
        }

        report.finished_at = Utc::now();
        info!(report = %report, "Account finished");
        report
    }

    /// Restore, connect, then sell. Any error ends the account.
    async fn drive(
        &self,
        session: Arc<dyn Session>,
        account: &Account,
        report: &mut AccountReport,
    ) -> Result<()> {
        report.stage = AccountStage::WalletRestore;
        self.restorer
            .restore(Arc::clone(&session), account)
            .await
            .context("Can not restore wallet")?;
        info!(outcome = "success", "Wallet restored. Starting trade...");

        report.stage = AccountStage::Connect;
        WalletConnector::new(&self.cfg)
            .connect(session.as_ref(), account)
            .await?;

        report.stage = AccountStage::Trading;
        let executor = SwapExecutor::new(&self.cfg);
        for request in self.sequence.iter() {
            match executor.sell(session.as_ref(), account, request).await {
                Ok(outcome) => {
                    info!(request = %request, outcome = outcome.label(), "{outcome}");
                    report.trades.push((request.clone(), outcome));
                }
                Err(e) => {
                    let outcome = match &e {
                        AutomationError::RetriesExhausted { attempts, last_error, .. } => {
                            TradeOutcome::Aborted {
                                attempts: *attempts,
                                last_error: last_error.clone(),
                            }
                        }
                        other => TradeOutcome::Aborted { attempts: 0, last_error: other.to_string() },
                    };
                    report.trades.push((request.clone(), outcome));
                    return Err(e).with_context(|| format!("{request} aborted"));
                }
            }
        }
        Ok(())
    }

    async fn close(&self, session: &dyn Session) {
        if let Err(e) = session.close().await {
            warn!(session = session.id(), error = %e, "Failed to close browser session");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ControlScript, EventLog, FakeProvider, FakeSession};
    use crate::wallet::MockWalletRestorer;
    use anyhow::anyhow;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn restorer_ok() -> Arc<dyn WalletRestorer> {
        let mut mock = MockWalletRestorer::new();
        mock.expect_restore().returning(|_, _| Ok(()));
        Arc::new(mock)
    }

    fn sequence() -> Vec<TradeRequest> {
        vec![TradeRequest::sell_all("SOL"), TradeRequest::sell_all("USDC")]
    }

    fn orchestrator(provider: FakeProvider, cfg: EngineConfig) -> Orchestrator {
        Orchestrator::new(Arc::new(provider), restorer_ok(), cfg, sequence())
    }

    #[tokio::test]
    async fn test_runs_sequence_in_order() {
        let cfg = EngineConfig::fast_for_tests();
        let log = EventLog::new();
        let (session, _wallet, _exchange) = FakeSession::phoenix("s1", &cfg, &log);
        let session = Arc::new(session);
        let provider = FakeProvider::new();
        provider.insert("A1", Arc::clone(&session));

        let report = orchestrator(provider, cfg.clone()).run(vec![Account::sample("A1")]).await;
        let account = report.account("A1").unwrap();

        assert!(!account.is_failed());
        assert_eq!(account.stage, AccountStage::Completed);
        assert_eq!(
            account.trades.iter().map(|(r, _)| r.asset.as_str()).collect::<Vec<_>>(),
            vec!["SOL", "USDC"]
        );
        // SOL sells the default amount, USDC sells everything.
        assert_eq!(log.typed(), vec!["0.01".to_string(), "12.5".to_string()]);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_connect_exhaustion_leaves_sibling_unaffected() {
        let mut cfg = EngineConfig::fast_for_tests();
        cfg.connect_retry.max_attempts = 3;
        let log = EventLog::new();

        let (broken, _, broken_exchange) = FakeSession::phoenix("broken", &cfg, &log);
        broken_exchange.remove(&cfg.selectors.connect_wallet);
        let (healthy, _, _) = FakeSession::phoenix("healthy", &cfg, &log);
        let broken = Arc::new(broken);

        let provider = FakeProvider::new();
        provider.insert("BAD", Arc::clone(&broken));
        provider.insert("GOOD", Arc::new(healthy));

        let report = orchestrator(provider, cfg)
            .run(vec![Account::sample("BAD"), Account::sample("GOOD")])
            .await;

        let bad = report.account("BAD").unwrap();
        assert!(bad.is_failed());
        assert_eq!(bad.stage, AccountStage::Connect);
        assert!(bad.trades.is_empty());
        assert!(bad.error.as_deref().unwrap().contains("Wallet connection"));
        // Left open for inspection by default.
        assert!(!broken.is_closed());

        let good = report.account("GOOD").unwrap();
        assert!(!good.is_failed());
        assert_eq!(good.trades.len(), 2);
        assert!(good.trades.iter().all(|(_, o)| o.is_success()));

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.accounts[0].address, "BAD");
    }

    #[tokio::test]
    async fn test_restore_failure_aborts_before_connect() {
        let cfg = EngineConfig::fast_for_tests();
        let log = EventLog::new();
        let (session, _, _) = FakeSession::phoenix("s1", &cfg, &log);
        let session = Arc::new(session);
        let provider = FakeProvider::new();
        provider.insert("A1", Arc::clone(&session));

        let mut mock = MockWalletRestorer::new();
        mock.expect_restore()
            .times(1)
            .returning(|_, _| Err(anyhow!("seed phrase rejected")));

        let report = Orchestrator::new(Arc::new(provider), Arc::new(mock), cfg.clone(), sequence())
            .keep_browser_on_failure(false)
            .run(vec![Account::sample("A1")])
            .await;

        let account = report.account("A1").unwrap();
        assert_eq!(account.stage, AccountStage::WalletRestore);
        assert!(account.error.as_deref().unwrap().contains("seed phrase rejected"));
        assert_eq!(log.clicks(&cfg.selectors.connect_wallet), 0);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_reported() {
        let report = orchestrator(FakeProvider::new(), EngineConfig::fast_for_tests())
            .run(vec![Account::sample("NOPE")])
            .await;
        let account = report.account("NOPE").unwrap();
        assert_eq!(account.stage, AccountStage::Provisioning);
        assert!(account.error.as_deref().unwrap().contains("provisioning"));
    }

    #[tokio::test]
    async fn test_sell_exhaustion_stops_remaining_sells() {
        let mut cfg = EngineConfig::fast_for_tests();
        cfg.sell_retry.max_attempts = 2;
        let log = EventLog::new();
        let (session, _, exchange) = FakeSession::phoenix("s1", &cfg, &log);
        exchange.set(&cfg.selectors.submit, ControlScript::with_text("Country not supported"));
        let provider = FakeProvider::new();
        provider.insert("A1", Arc::new(session));

        let report = orchestrator(provider, cfg).run(vec![Account::sample("A1")]).await;
        let account = report.account("A1").unwrap();

        assert!(account.is_failed());
        assert_eq!(account.trades.len(), 1);
        assert!(matches!(
            account.outcome_for("SOL"),
            Some(TradeOutcome::Aborted { attempts: 2, .. })
        ));
        assert!(account.outcome_for("USDC").is_none());
        assert_eq!(report.trade_counts(), (0, 0, 0, 1));
    }

    #[tokio::test]
    async fn test_skips_and_failures_do_not_fail_account() {
        let cfg = EngineConfig::fast_for_tests();
        let log = EventLog::new();
        let (session, _, exchange) = FakeSession::phoenix("s1", &cfg, &log);
        exchange
            .set(&cfg.selectors.max_balance, ControlScript::with_text("Max: 0").then_text("Max: 4"))
            .set(&cfg.selectors.status, ControlScript::with_text("Failed to send transaction"));
        let provider = FakeProvider::new();
        provider.insert("A1", Arc::new(session));

        let report = orchestrator(provider, cfg).run(vec![Account::sample("A1")]).await;
        let account = report.account("A1").unwrap();

        assert!(!account.is_failed());
        assert!(matches!(account.outcome_for("SOL"), Some(TradeOutcome::Skipped(_))));
        assert_eq!(
            account.outcome_for("USDC"),
            Some(&TradeOutcome::Failed {
                amount: dec!(4),
                reason: "Failed to send transaction".into()
            })
        );
    }

    #[tokio::test]
    async fn test_drive_keeps_typed_errors() {
        let mut cfg = EngineConfig::fast_for_tests();
        cfg.sell_retry.max_attempts = 1;
        let log = EventLog::new();
        let (session, _, exchange) = FakeSession::phoenix("s1", &cfg, &log);
        exchange.set(&cfg.selectors.submit, ControlScript::with_text("Insufficient liquidity"));
        let session: Arc<dyn Session> = Arc::new(session);
        let account = Account::sample("A1");

        let orchestrator = orchestrator(FakeProvider::new(), cfg);
        let mut report = AccountReport::new("A1");
        let err = orchestrator
            .runner
            .drive(Arc::clone(&session), &account, &mut report)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AutomationError>(),
            Some(AutomationError::RetriesExhausted { attempts: 1, .. })
        ));
        assert!(format!("{err:#}").contains("Insufficient liquidity"));

        let mut mock = MockWalletRestorer::new();
        mock.expect_restore().returning(|_, _| Err(anyhow!("profile locked")));
        let orchestrator = Orchestrator::new(
            Arc::new(FakeProvider::new()),
            Arc::new(mock),
            EngineConfig::fast_for_tests(),
            sequence(),
        );
        let err = orchestrator
            .runner
            .drive(session, &account, &mut AccountReport::new("A1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Can not restore wallet");
        assert_eq!(format!("{err:#}"), "Can not restore wallet: profile locked");
    }

    /// Provider that tracks how many sessions are checked out at once.
    struct CountingProvider {
        inner: FakeProvider,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SessionProvider for CountingProvider {
        async fn open(&self, account: &Account) -> anyhow::Result<Arc<dyn Session>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.open(account).await
        }
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let cfg = EngineConfig::fast_for_tests();
        let log = EventLog::new();
        let inner = FakeProvider::new();
        let mut accounts = Vec::new();
        for i in 0..6 {
            let address = format!("A{i}");
            let (session, _, _) = FakeSession::phoenix(&address, &cfg, &log);
            inner.insert(&address, Arc::new(session));
            accounts.push(Account::sample(&address));
        }

        let peak = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            inner,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        };

        let report = Orchestrator::new(Arc::new(provider), restorer_ok(), cfg, sequence())
            .with_max_concurrent(2)
            .run(accounts)
            .await;

        assert_eq!(report.accounts.len(), 6);
        assert_eq!(report.failed(), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let order: Vec<_> = report.accounts.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(order, vec!["A0", "A1", "A2", "A3", "A4", "A5"]);
    }
}
