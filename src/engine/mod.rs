//! Core engine: surface resolution, wallet connection, and sell execution.
//!
//! Data flows top-down: the orchestrator runs one account at a time per
//! task, the connector links the wallet once, then the swap executor sells
//! each asset in order. Both operate on the two surfaces the resolver finds.

pub mod balance;
pub mod connector;
pub mod interact;
pub mod orchestrator;
pub mod surfaces;
pub mod swap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use crate::browser::Selector;

/// Upper bound on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay to wait before running `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Title substrings and fallback URLs of the two surfaces every flow uses.
#[derive(Debug, Clone)]
pub struct SurfaceTargets {
    pub wallet_title: String,
    pub wallet_url: String,
    pub exchange_title: String,
    pub exchange_url: String,
}

/// Every UI control the connector and executor touch.
#[derive(Debug, Clone)]
pub struct ExchangeSelectors {
    pub connect_wallet: Selector,
    pub wallet_option: Selector,
    pub unlock: Selector,
    pub approve: Selector,
    pub settings: Selector,
    pub fast_mode: Selector,
    pub settings_close: Selector,
    pub market_tab: Selector,
    pub max_balance: Selector,
    pub amount_input: Selector,
    pub submit: Selector,
    pub status: Selector,
}

impl Default for ExchangeSelectors {
    fn default() -> Self {
        Self {
            connect_wallet: Selector::button("Connect Wallet"),
            wallet_option: Selector::exact_text("Backpack"),
            unlock: Selector::text("Unlock"),
            approve: Selector::exact_text("Approve"),
            settings: Selector::css("svg.settings-icon"),
            fast_mode: Selector::exact_text("Fast"),
            settings_close: Selector::css("ion-icon[icon=\"close\"]").nth(1),
            market_tab: Selector::exact_text("Market"),
            max_balance: Selector::text("Max:"),
            amount_input: Selector::css("input[value=\"\"]").nth(2),
            submit: Selector::css("button.sc-eqUAAy.sc-fqkvVR.sc-iGgWBj.clpFdu.ecLVOp.dWZrWT"),
            status: Selector::xpath("//*[@id=\"root\"]/div[4]/div[2]/div[1]/div/div"),
        }
    }
}

/// Runtime knobs threaded explicitly into every workflow call.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub targets: SurfaceTargets,
    pub selectors: ExchangeSelectors,
    pub connect_retry: RetryPolicy,
    pub sell_retry: RetryPolicy,
    /// Implicit wait for a control to become visible.
    pub interaction_timeout: Duration,
    /// Wait for the post-submit status banner.
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
    pub fast_mode: bool,
    /// Asset that sells `default_sell_amount` when no amount is requested.
    pub default_asset: String,
    pub default_sell_amount: Decimal,
    /// Submit-button labels meaning the order cannot be placed yet.
    pub blocking_labels: Vec<String>,
    /// Status texts meaning the transaction was rejected.
    pub failure_phrases: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            targets: SurfaceTargets {
                wallet_title: "Backpack".to_string(),
                wallet_url:
                    "chrome-extension://aflkmfhebedbjioipglgcbcmnbpgliof/options.html?onboarding=true"
                        .to_string(),
                exchange_title: "Phoenix".to_string(),
                exchange_url: "https://app.phoenix.trade/".to_string(),
            },
            selectors: ExchangeSelectors::default(),
            connect_retry: RetryPolicy::new(10, Duration::from_millis(1000)),
            sell_retry: RetryPolicy::new(10, Duration::from_millis(1000)),
            interaction_timeout: Duration::from_millis(5000),
            confirm_timeout: Duration::from_secs(200),
            poll_interval: Duration::from_millis(250),
            fast_mode: false,
            default_asset: "SOL".to_string(),
            default_sell_amount: dec!(0.01),
            blocking_labels: [
                "Enter an amount",
                "Insufficient SOL balance",
                "Insufficient USDC balance",
                "Insufficient liquidity",
                "Insufficient size",
                "Country not supported",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            failure_phrases: vec!["Failed to send transaction".to_string()],
        }
    }
}

impl EngineConfig {
    /// Tight timings so scripted-browser tests run in milliseconds.
    #[cfg(any(test, feature = "testkit"))]
    pub fn fast_for_tests() -> Self {
        Self {
            connect_retry: RetryPolicy::new(10, Duration::ZERO),
            sell_retry: RetryPolicy::new(10, Duration::ZERO),
            interaction_timeout: Duration::from_millis(30),
            confirm_timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
            ..Self::default()
        }
    }

    pub fn is_blocking_label(&self, label: &str) -> bool {
        let label = label.trim();
        self.blocking_labels.iter().any(|b| b == label)
    }

    /// First configured failure phrase contained in `status`.
    pub fn failure_in<'a>(&'a self, status: &str) -> Option<&'a str> {
        self.failure_phrases
            .iter()
            .find(|p| status.contains(p.as_str()))
            .map(|p| p.as_str())
    }
}
