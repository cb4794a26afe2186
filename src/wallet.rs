//! Wallet session restore gate.
//!
//! Before any trading, each account's session must hold an authenticated
//! wallet. `WalletRestorer` is that precondition; a failure aborts the
//! account without touching the exchange.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::browser::{Selector, Session};
use crate::config::WalletConfig;
use crate::engine::interact::is_visible_now;
use crate::engine::surfaces::resolve;
use crate::types::{Account, AutomationError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRestorer: Send + Sync {
    /// Ensure the wallet surface in `session` is restored for `account`.
    async fn restore(&self, session: Arc<dyn Session>, account: &Account) -> Result<()>;
}

/// Restore gate for browser profiles that already carry the wallet.
///
/// Opens the wallet popup if no wallet tab is present and fails when the
/// extension shows its onboarding screen, which means the profile was never
/// restored.
pub struct ProfileWalletCheck {
    title: String,
    popup_url: String,
    markers: Vec<Selector>,
}

impl ProfileWalletCheck {
    pub fn new(cfg: &WalletConfig) -> Self {
        Self {
            title: cfg.title.clone(),
            popup_url: cfg.popup_url.clone(),
            markers: cfg.onboarding_markers.iter().map(|m| Selector::text(m)).collect(),
        }
    }
}

#[async_trait]
impl WalletRestorer for ProfileWalletCheck {
    async fn restore(&self, session: Arc<dyn Session>, account: &Account) -> Result<()> {
        let surface = resolve(session.as_ref(), &self.title, Some(&self.popup_url))
            .await
            .map_err(|e| AutomationError::WalletRestore(e.to_string()))?;

        for marker in &self.markers {
            if is_visible_now(surface.as_ref(), marker).await {
                return Err(AutomationError::WalletRestore(format!(
                    "profile for {} shows onboarding ({marker})",
                    account.short_address()
                ))
                .into());
            }
        }

        info!(address = %account.address, outcome = "success", "Wallet restored");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
