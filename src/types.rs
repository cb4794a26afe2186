//! Shared types for the trader.
//!
//! These types form the data model used across all modules: accounts,
//! trade requests and outcomes, per-account reports, and the automation
//! error taxonomy the engine's retry loops classify on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One wallet to process. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Account {
    /// Position in the configured account list (used for port allocation).
    pub index: usize,
    /// Public wallet address, used as the account identity in logs.
    pub address: String,
    /// Browser profile directory holding the restored wallet extension state.
    pub profile_dir: Option<String>,
    /// Attach to an already running browser instead of launching one.
    pub cdp_endpoint: Option<String>,
}

impl Account {
    /// Shortened address for compact log lines.
    pub fn short_address(&self) -> String {
        let chars: Vec<char> = self.address.chars().collect();
        if chars.len() <= 10 {
            return self.address.clone();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }

    #[cfg(any(test, feature = "testkit"))]
    pub fn sample(address: &str) -> Self {
        Account {
            index: 0,
            address: address.to_string(),
            profile_dir: None,
            cdp_endpoint: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// Sell one asset. `amount == None` sells everything available, except for
/// the distinguished default asset, which sells the configured default amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub asset: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl TradeRequest {
    pub fn sell_all(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            amount: None,
        }
    }

    pub fn sell(asset: &str, amount: Decimal) -> Self {
        Self {
            asset: asset.to_string(),
            amount: Some(amount),
        }
    }
}

impl fmt::Display for TradeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.amount {
            Some(a) => write!(f, "sell {} {}", a.normalize(), self.asset),
            None => write!(f, "sell all {}", self.asset),
        }
    }
}

/// Balance scraped from the exchange's "Max:" label.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceReading {
    /// Parsed value. Zero is a meaningful reading ("nothing to sell").
    Available(Decimal),
    /// Label absent or malformed; carries what was seen for the log.
    Unreadable(String),
}

impl BalanceReading {
    /// The balance the engine acts on. Unreadable collapses to zero.
    pub fn amount(&self) -> Decimal {
        match self {
            BalanceReading::Available(v) => *v,
            BalanceReading::Unreadable(_) => Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount().is_zero()
    }
}

/// Why a sell was skipped without submitting an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    ZeroBalance,
    UnreadableBalance,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ZeroBalance => write!(f, "zero balance"),
            SkipReason::UnreadableBalance => write!(f, "unreadable balance"),
        }
    }
}

/// Terminal result of one sell.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// Order confirmed by the exchange status banner.
    Success { amount: Decimal, status: String },
    /// Order went through the full round trip but was rejected.
    Failed { amount: Decimal, reason: String },
    /// Nothing was submitted.
    Skipped(SkipReason),
    /// Retry bound exhausted; the error propagated to the account.
    Aborted { attempts: u32, last_error: String },
}

impl TradeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TradeOutcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeOutcome::Success { .. } => "success",
            TradeOutcome::Failed { .. } => "failed",
            TradeOutcome::Skipped(_) => "skipped",
            TradeOutcome::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOutcome::Success { amount, .. } => write!(f, "SUCCESS ({})", amount.normalize()),
            TradeOutcome::Failed { amount, reason } => {
                write!(f, "FAILED ({}): {reason}", amount.normalize())
            }
            TradeOutcome::Skipped(reason) => write!(f, "SKIPPED ({reason})"),
            TradeOutcome::Aborted { attempts, last_error } => {
                write!(f, "ABORTED after {attempts} attempts: {last_error}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How far an account's run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStage {
    Provisioning,
    WalletRestore,
    Connect,
    Trading,
    Completed,
}

impl fmt::Display for AccountStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStage::Provisioning => "provisioning",
            AccountStage::WalletRestore => "wallet-restore",
            AccountStage::Connect => "connect",
            AccountStage::Trading => "trading",
            AccountStage::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Result of one account's full run.
#[derive(Debug, Clone)]
pub struct AccountReport {
    pub address: String,
    pub stage: AccountStage,
    pub trades: Vec<(TradeRequest, TradeOutcome)>,
    /// Set when the run terminated early.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AccountReport {
    pub fn new(address: &str) -> Self {
        let now = Utc::now();
        Self {
            address: address.to_string(),
            stage: AccountStage::Provisioning,
            trades: Vec::new(),
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn outcome_for(&self, asset: &str) -> Option<&TradeOutcome> {
        self.trades
            .iter()
            .find(|(req, _)| req.asset == asset)
            .map(|(_, outcome)| outcome)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for AccountReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.address, self.stage)?;
        for (req, outcome) in &self.trades {
            write!(f, " | {}: {}", req.asset, outcome)?;
        }
        if let Some(ref e) = self.error {
            write!(f, " | error: {e}")?;
        }
        Ok(())
    }
}

/// Aggregate of every account in a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub accounts: Vec<AccountReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.accounts.iter().filter(|a| a.is_failed()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.accounts.len() - self.failed()
    }

    pub fn any_failed(&self) -> bool {
        self.failed() > 0
    }

    pub fn account(&self, address: &str) -> Option<&AccountReport> {
        self.accounts.iter().find(|a| a.address == address)
    }

    /// Count of trades per outcome label across all accounts.
    pub fn trade_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for (_, outcome) in self.accounts.iter().flat_map(|a| a.trades.iter()) {
            match outcome {
                TradeOutcome::Success { .. } => counts.0 += 1,
                TradeOutcome::Failed { .. } => counts.1 += 1,
                TradeOutcome::Skipped(_) => counts.2 += 1,
                TradeOutcome::Aborted { .. } => counts.3 += 1,
            }
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures of the browser automation workflows.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AutomationError {
    #[error("Surface not found: no tab title contains '{title}' and no fallback URL")]
    SurfaceNotFound { title: String },

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("Submit blocked by exchange: '{label}'")]
    BlockedSubmission { label: String },

    #[error("Automation backend error: {0}")]
    Protocol(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Wallet restore failed: {0}")]
    WalletRestore(String),

    #[error("Browser provisioning failed: {0}")]
    Provisioning(String),
}

impl AutomationError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        AutomationError::Protocol(msg.into())
    }

    /// Whether a workflow retry loop should re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AutomationError::RetriesExhausted { .. }
                | AutomationError::WalletRestore(_)
                | AutomationError::Provisioning(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unreadable_balance_is_zero() {
        let reading = BalanceReading::Unreadable("Max: abc".into());
        assert_eq!(reading.amount(), Decimal::ZERO);
        assert!(reading.is_zero());
        assert!(!BalanceReading::Available(dec!(0.5)).is_zero());
    }

    #[test]
    fn test_trade_request_display() {
        assert_eq!(TradeRequest::sell("SOL", dec!(0.050)).to_string(), "sell 0.05 SOL");
        assert_eq!(TradeRequest::sell_all("USDC").to_string(), "sell all USDC");
    }

    #[test]
    fn test_short_address() {
        let acct = Account::sample("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
        assert_eq!(acct.short_address(), "7xKX…gAsU");
        assert_eq!(Account::sample("abc").short_address(), "abc");
    }

    #[test]
    fn test_run_report_counts() {
        let mut ok = AccountReport::new("a");
        ok.stage = AccountStage::Completed;
        ok.trades.push((
            TradeRequest::sell_all("SOL"),
            TradeOutcome::Success { amount: dec!(1), status: "done".into() },
        ));
        ok.trades.push((
            TradeRequest::sell_all("USDC"),
            TradeOutcome::Skipped(SkipReason::ZeroBalance),
        ));

        let mut bad = AccountReport::new("b");
        bad.stage = AccountStage::Connect;
        bad.error = Some("boom".into());

        let report = RunReport { accounts: vec![ok, bad] };
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        assert!(report.any_failed());
        assert_eq!(report.trade_counts(), (1, 0, 1, 0));
        assert_eq!(
            report.account("a").and_then(|a| a.outcome_for("USDC")),
            Some(&TradeOutcome::Skipped(SkipReason::ZeroBalance))
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AutomationError::Timeout { what: "x".into(), after: Duration::from_secs(1) }
            .is_retryable());
        assert!(AutomationError::SurfaceNotFound { title: "Phoenix".into() }.is_retryable());
        assert!(!AutomationError::WalletRestore("locked".into()).is_retryable());
    }

    #[test]
    fn test_outcome_display() {
        let o = TradeOutcome::Aborted { attempts: 10, last_error: "timeout".into() };
        assert_eq!(o.to_string(), "ABORTED after 10 attempts: timeout");
        assert_eq!(o.label(), "aborted");
    }
}
