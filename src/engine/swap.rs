//! Swap executor.
//!
//! Sells one asset as a market order: configure the order form, size the
//! order from the scraped balance, submit, approve in the wallet, and wait
//! for the exchange's status banner. Each attempt starts from surface
//! resolution; unexpected errors reload both tabs before the next attempt.

use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{AutomationResult, Session, Surface};
use crate::types::{Account, AutomationError, BalanceReading, SkipReason, TradeOutcome, TradeRequest};

use super::balance::{format_amount, order_amount, parse_max_label};
use super::interact::{approve_if_prompted, click_if_visible, wait_visible};
use super::surfaces::resolve_pair;
use super::EngineConfig;

/// How a single attempt ended without an error.
#[derive(Debug)]
enum Attempt {
    /// Terminal outcome; no further attempts.
    Finished(TradeOutcome),
    /// Submit button showed a blocking label; the wallet tab was reloaded.
    Blocked(String),
}

pub struct SwapExecutor<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> SwapExecutor<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    /// Sell `request.asset`, retrying up to the configured bound.
    ///
    /// Returns the terminal outcome, or `RetriesExhausted` once every attempt
    /// errored or was blocked.
    pub async fn sell(
        &self,
        session: &dyn Session,
        account: &Account,
        request: &TradeRequest,
    ) -> AutomationResult<TradeOutcome> {
        let policy = self.cfg.sell_retry;
        let asset = request.asset.as_str();
        info!(address = %account.address, asset, request = %request, "Selling...");

        let mut last_error = None;
        for attempt in 1..=policy.max_attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            match self.attempt(session, account, request).await {
                Ok(Attempt::Finished(outcome)) => return Ok(outcome),
                Ok(Attempt::Blocked(label)) => {
                    last_error = Some(AutomationError::BlockedSubmission { label });
                }
                Err(e) => {
                    error!(address = %account.address, asset, attempt, error = %e, "Error occurred");
                    self.recover(session).await;
                    last_error = Some(e);
                }
            }

            if attempt < policy.max_attempts {
                info!(
                    address = %account.address,
                    asset,
                    "Retrying... (Attempt {}/{})",
                    attempt + 1,
                    policy.max_attempts
                );
            }
        }

        error!(
            address = %account.address,
            asset,
            attempts = policy.max_attempts,
            "Swap failed after all attempts"
        );
        Err(AutomationError::RetriesExhausted {
            operation: format!("Sell {asset}"),
            attempts: policy.max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(
        &self,
        session: &dyn Session,
        account: &Account,
        request: &TradeRequest,
    ) -> AutomationResult<Attempt> {
        let s = &self.cfg.selectors;
        let address = account.address.as_str();
        let asset = request.asset.as_str();

        let surfaces = resolve_pair(session, &self.cfg.targets).await?;
        let exchange = surfaces.exchange.as_ref();
        let wallet = surfaces.wallet.as_ref();
        exchange.bring_to_front().await?;

        if self.cfg.fast_mode {
            click_if_visible(exchange, &s.settings, "Settings", self.cfg).await;
            click_if_visible(exchange, &s.fast_mode, "Fast Transactions", self.cfg).await;
            click_if_visible(exchange, &s.settings_close, "Close Settings", self.cfg).await;
        }

        click_if_visible(exchange, &s.market_tab, "Market Button", self.cfg).await;

        let reading = self.read_balance(exchange).await?;
        match &reading {
            BalanceReading::Available(v) => info!(address, asset, balance = %v, "Extracted balance"),
            BalanceReading::Unreadable(why) => {
                warn!(address, asset, reason = %why, "Balance unreadable, treating as 0")
            }
        }
        if reading.is_zero() {
            let reason = match reading {
                BalanceReading::Available(_) => SkipReason::ZeroBalance,
                BalanceReading::Unreadable(_) => SkipReason::UnreadableBalance,
            };
            info!(address, asset, %reason, "Skipping: nothing to sell");
            return Ok(Attempt::Finished(TradeOutcome::Skipped(reason)));
        }

        let amount = order_amount(request, reading.amount(), self.cfg);
        info!(address, asset, amount = %amount, "Order amount");

        let input = wait_visible(exchange, &s.amount_input, self.cfg.interaction_timeout, self.cfg.poll_interval)
            .await?;
        input.type_text(&format_amount(amount)).await?;

        let submit = wait_visible(exchange, &s.submit, self.cfg.interaction_timeout, self.cfg.poll_interval)
            .await?;
        let label = submit.text().await?.trim().to_string();
        if self.cfg.is_blocking_label(&label) {
            warn!(address, asset, label = %label, "Place Order button not working");
            wallet.reload().await?;
            return Ok(Attempt::Blocked(label));
        }

        submit.click().await?;
        approve_if_prompted(wallet, self.cfg).await?;

        let status = wait_visible(exchange, &s.status, self.cfg.confirm_timeout, self.cfg.poll_interval)
            .await?;
        let status_text = status.text().await?.trim().to_string();

        Ok(Attempt::Finished(self.judge(address, asset, amount, status_text)))
    }

    /// Balance from the max label. Absent or hidden label reads as unreadable.
    async fn read_balance(&self, exchange: &dyn Surface) -> AutomationResult<BalanceReading> {
        let Some(label) = exchange.locate(&self.cfg.selectors.max_balance).await? else {
            return Ok(BalanceReading::Unreadable("balance label not found".to_string()));
        };
        if !label.is_visible().await? {
            return Ok(BalanceReading::Unreadable("balance label not visible".to_string()));
        }
        Ok(parse_max_label(&label.text().await?))
    }

    fn judge(&self, address: &str, asset: &str, amount: Decimal, status: String) -> TradeOutcome {
        match self.cfg.failure_in(&status) {
            Some(phrase) => {
                error!(address, asset, reason = phrase, status = %status, "Failed to swap");
                TradeOutcome::Failed { amount, reason: status }
            }
            None => {
                info!(address, asset, amount = %amount, outcome = "success", "Successfully swapped");
                TradeOutcome::Success { amount, status }
            }
        }
    }

    /// Reload exchange then wallet. Failures here are logged; the next
    /// attempt re-resolves everything anyway.
    async fn recover(&self, session: &dyn Session) {
        let surfaces = match resolve_pair(session, &self.cfg.targets).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Cannot resolve surfaces for reload");
                return;
            }
        };
        if let Err(e) = surfaces.exchange.reload().await {
            warn!(error = %e, "Exchange reload failed");
        }
        if let Err(e) = surfaces.wallet.reload().await {
            warn!(error = %e, "Wallet reload failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
