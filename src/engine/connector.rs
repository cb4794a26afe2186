//! Wallet connector.
//!
//! One-shot handshake linking the extension wallet to the exchange tab:
//! Connect Wallet → pick the wallet provider → unlock if asked → approve.
//! The whole sequence is retried up to the configured bound; every attempt
//! re-resolves both surfaces from scratch.

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{AutomationResult, Session};
use crate::types::{Account, AutomationError};

use super::interact::{click, click_if_visible, is_visible_now};
use super::surfaces::resolve_pair;
use super::EngineConfig;

/// Handshake progress. `Connected` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    ResolvingSurfaces,
    RequestingConnection,
    Unlocking,
    Approving,
    Connected,
    Failed,
}

pub struct WalletConnector<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> WalletConnector<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    /// Run the handshake until connected or the retry bound is exhausted.
    pub async fn connect(&self, session: &dyn Session, account: &Account) -> AutomationResult<()> {
        let policy = self.cfg.connect_retry;
        info!(address = %account.address, "Connecting wallet...");

        let mut last_error = None;
        for attempt in 1..=policy.max_attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let mut state = ConnectState::ResolvingSurfaces;
            match self.attempt(session, &mut state).await {
                Ok(()) => {
                    info!(
                        address = %account.address,
                        attempt,
                        outcome = "success",
                        "Wallet connected successfully"
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(
                        address = %account.address,
                        attempt,
                        max_attempts = policy.max_attempts,
                        stage = ?state,
                        error = %e,
                        "Connection attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(
            address = %account.address,
            state = ?ConnectState::Failed,
            attempts = policy.max_attempts,
            "Giving up on wallet connection"
        );
        Err(AutomationError::RetriesExhausted {
            operation: "Wallet connection".to_string(),
            attempts: policy.max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, session: &dyn Session, state: &mut ConnectState) -> AutomationResult<()> {
        let s = &self.cfg.selectors;

        *state = ConnectState::ResolvingSurfaces;
        let surfaces = resolve_pair(session, &self.cfg.targets).await?;

        *state = ConnectState::RequestingConnection;
        click(surfaces.exchange.as_ref(), &s.connect_wallet, self.cfg).await?;
        click_if_visible(surfaces.exchange.as_ref(), &s.wallet_option, "Wallet Option", self.cfg)
            .await;

        *state = ConnectState::Unlocking;
        if is_visible_now(surfaces.wallet.as_ref(), &s.unlock).await {
            if let Some(unlock) = surfaces.wallet.locate(&s.unlock).await? {
                unlock.click().await?;
                info!("Wallet unlocked");
            }
        }

        *state = ConnectState::Approving;
        click_if_visible(surfaces.wallet.as_ref(), &s.approve, "Approve Button", self.cfg).await;

        *state = ConnectState::Connected;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
