//! Browser automation capability.
//!
//! Defines the `Session` / `Surface` / `Control` traits the engine drives,
//! and provides implementations for:
//! - Chrome DevTools Protocol (`cdp`), one WebSocket per tab
//! - Session provisioning (`launch`): launch or attach a Chromium profile per account
//!
//! The engine decides *what* to look for and *when* to retry; implementors
//! only answer "is it there right now" and perform raw page actions.

pub mod cdp;
pub mod launch;
pub mod selector;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{Account, AutomationError};

pub use selector::Selector;

/// Result type for raw automation calls.
pub type AutomationResult<T> = std::result::Result<T, AutomationError>;

/// One isolated browsing context, owned by exactly one account.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier for logging.
    fn id(&self) -> &str;

    /// Currently open tabs, oldest first.
    async fn surfaces(&self) -> AutomationResult<Vec<Arc<dyn Surface>>>;

    /// Open a new tab, navigate it to `url`, and return once loaded.
    async fn open_surface(&self, url: &str) -> AutomationResult<Arc<dyn Surface>>;

    /// Tear down the context. Attached (not launched) browsers are left running.
    async fn close(&self) -> AutomationResult<()>;
}

/// A single tab.
#[async_trait]
pub trait Surface: Send + Sync {
    async fn title(&self) -> AutomationResult<String>;

    async fn bring_to_front(&self) -> AutomationResult<()>;

    /// Reload and wait for the document to finish loading.
    async fn reload(&self) -> AutomationResult<()>;

    /// Find a control matching `selector` right now. `None` if nothing matches.
    async fn locate(&self, selector: &Selector) -> AutomationResult<Option<Box<dyn Control>>>;
}

/// Lazy handle to a matched element; re-resolved on every operation.
#[async_trait]
pub trait Control: Send + Sync {
    async fn is_visible(&self) -> AutomationResult<bool>;

    async fn click(&self) -> AutomationResult<()>;

    async fn type_text(&self, text: &str) -> AutomationResult<()>;

    /// Raw text content of the element.
    async fn text(&self) -> AutomationResult<String>;
}

/// Produces a browsing session with the wallet extension loaded.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, account: &Account) -> Result<Arc<dyn Session>>;
}
