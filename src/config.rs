//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Wallet state lives in each account's browser profile; the config only
//! names where to find it.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::browser::Selector;
use crate::engine::{EngineConfig, ExchangeSelectors, RetryPolicy, SurfaceTargets};
use crate::types::{Account, TradeRequest};

const BACKPACK_EXTENSION_ID: &str = "aflkmfhebedbjioipglgcbcmnbpgliof";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    pub browser: BrowserConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    /// Simultaneous account runs. 0 means no limit.
    pub max_concurrent_accounts: usize,
    /// Exit non-zero when any account fails.
    pub fail_on_account_error: bool,
    /// Leave the browser open after a fatal account failure.
    pub keep_browser_on_failure: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrent_accounts: 0,
            fail_on_account_error: false,
            keep_browser_on_failure: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// `scheme://[user:pass@]host:port`; all browser traffic goes through it.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub headless: bool,
    /// Delay inserted before every automated action.
    #[serde(default)]
    pub slow_mo_ms: u64,
    #[serde(default = "default_chrome_path")]
    pub chrome_path: String,
    /// Unpacked wallet extension directory.
    pub extension_dir: String,
    #[serde(default = "default_base_debug_port")]
    pub base_debug_port: u16,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_chrome_path() -> String {
    "google-chrome".to_string()
}

fn default_base_debug_port() -> u16 {
    9300
}

fn default_startup_timeout_secs() -> u64 {
    30
}

impl BrowserConfig {
    pub fn slow_mo(&self) -> Duration {
        Duration::from_millis(self.slow_mo_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WalletConfig {
    /// Title substring identifying the wallet tab.
    pub title: String,
    pub onboarding_url: String,
    pub popup_url: String,
    /// Texts that only appear when the profile holds no wallet.
    pub onboarding_markers: Vec<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            title: "Backpack".to_string(),
            onboarding_url: format!(
                "chrome-extension://{BACKPACK_EXTENSION_ID}/options.html?onboarding=true"
            ),
            popup_url: format!("chrome-extension://{BACKPACK_EXTENSION_ID}/popup.html"),
            onboarding_markers: vec![
                "Create a new wallet".to_string(),
                "Import Wallet".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub title: String,
    pub url: String,
    pub selectors: SelectorsConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            title: "Phoenix".to_string(),
            url: "https://app.phoenix.trade/".to_string(),
            selectors: SelectorsConfig::default(),
        }
    }
}

/// UI selectors in compact string form (see `Selector::parse`).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SelectorsConfig {
    pub connect_wallet: String,
    pub wallet_option: String,
    pub unlock: String,
    pub approve: String,
    pub settings: String,
    pub fast_mode: String,
    pub settings_close: String,
    pub market_tab: String,
    pub max_balance: String,
    pub amount_input: String,
    pub submit: String,
    pub status: String,
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        let s = ExchangeSelectors::default();
        Self {
            connect_wallet: s.connect_wallet.to_string(),
            wallet_option: s.wallet_option.to_string(),
            unlock: s.unlock.to_string(),
            approve: s.approve.to_string(),
            settings: s.settings.to_string(),
            fast_mode: s.fast_mode.to_string(),
            settings_close: s.settings_close.to_string(),
            market_tab: s.market_tab.to_string(),
            max_balance: s.max_balance.to_string(),
            amount_input: s.amount_input.to_string(),
            submit: s.submit.to_string(),
            status: s.status.to_string(),
        }
    }
}

impl SelectorsConfig {
    fn parse(&self) -> ExchangeSelectors {
        ExchangeSelectors {
            connect_wallet: Selector::parse(&self.connect_wallet),
            wallet_option: Selector::parse(&self.wallet_option),
            unlock: Selector::parse(&self.unlock),
            approve: Selector::parse(&self.approve),
            settings: Selector::parse(&self.settings),
            fast_mode: Selector::parse(&self.fast_mode),
            settings_close: Selector::parse(&self.settings_close),
            market_tab: Selector::parse(&self.market_tab),
            max_balance: Selector::parse(&self.max_balance),
            amount_input: Selector::parse(&self.amount_input),
            submit: Selector::parse(&self.submit),
            status: Selector::parse(&self.status),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TradeConfig {
    /// Enable the exchange's fast transaction mode before each order.
    pub fast: bool,
    pub default_asset: String,
    /// Amount sold for `default_asset` when no explicit amount is requested.
    pub sol_to_sell: Decimal,
    /// Sells per account, in order.
    pub sequence: Vec<TradeRequest>,
    pub connect_retries: u32,
    pub sell_retries: u32,
    pub retry_backoff_ms: u64,
    pub interaction_timeout_ms: u64,
    pub confirm_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub blocking_labels: Vec<String>,
    pub failure_phrases: Vec<String>,
}

impl Default for TradeConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            fast: false,
            default_asset: engine.default_asset.clone(),
            sol_to_sell: dec!(0.01),
            sequence: vec![TradeRequest::sell_all("SOL"), TradeRequest::sell_all("USDC")],
            connect_retries: engine.connect_retry.max_attempts,
            sell_retries: engine.sell_retry.max_attempts,
            retry_backoff_ms: engine.sell_retry.backoff.as_millis() as u64,
            interaction_timeout_ms: engine.interaction_timeout.as_millis() as u64,
            confirm_timeout_secs: engine.confirm_timeout.as_secs(),
            poll_interval_ms: engine.poll_interval.as_millis() as u64,
            blocking_labels: engine.blocking_labels.clone(),
            failure_phrases: engine.failure_phrases.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub address: String,
    #[serde(default)]
    pub profile_dir: Option<String>,
    #[serde(default)]
    pub cdp_endpoint: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.trade.connect_retries == 0 || self.trade.sell_retries == 0 {
            bail!("Retry bounds must be at least 1");
        }
        if self.trade.sequence.is_empty() {
            bail!("trade.sequence is empty: nothing to sell");
        }
        if self.trade.sol_to_sell < Decimal::ZERO {
            bail!("trade.sol_to_sell must not be negative");
        }
        let mut seen = HashSet::new();
        for acct in &self.accounts {
            if !seen.insert(acct.address.as_str()) {
                bail!("Duplicate account address: {}", acct.address);
            }
        }
        Ok(())
    }

    /// Build the account list in configured order.
    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(index, a)| Account {
                index,
                address: a.address.clone(),
                profile_dir: a.profile_dir.clone(),
                cdp_endpoint: a.cdp_endpoint.clone(),
            })
            .collect()
    }

    /// Runtime knobs threaded into every workflow call.
    pub fn engine(&self) -> EngineConfig {
        let t = &self.trade;
        let backoff = Duration::from_millis(t.retry_backoff_ms);
        EngineConfig {
            targets: SurfaceTargets {
                wallet_title: self.wallet.title.clone(),
                wallet_url: self.wallet.onboarding_url.clone(),
                exchange_title: self.exchange.title.clone(),
                exchange_url: self.exchange.url.clone(),
            },
            selectors: self.exchange.selectors.parse(),
            connect_retry: RetryPolicy::new(t.connect_retries, backoff),
            sell_retry: RetryPolicy::new(t.sell_retries, backoff),
            interaction_timeout: Duration::from_millis(t.interaction_timeout_ms),
            confirm_timeout: Duration::from_secs(t.confirm_timeout_secs),
            poll_interval: Duration::from_millis(t.poll_interval_ms.max(1)),
            fast_mode: t.fast,
            default_asset: t.default_asset.clone(),
            default_sell_amount: t.sol_to_sell,
            blocking_labels: t.blocking_labels.clone(),
            failure_phrases: t.failure_phrases.clone(),
        }
    }
}
