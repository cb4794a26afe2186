//! Interaction helpers.
//!
//! `click_if_visible` treats optional UI affordances as no-ops when absent;
//! `approve_if_prompted` runs the wallet's unlock-then-approve dialog, where
//! the unlock is conditional and the approval is mandatory.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{AutomationResult, Control, Selector, Surface};
use crate::types::AutomationError;

use super::EngineConfig;

/// Poll until `selector` matches a visible control, or time out.
///
/// A failed lookup counts as "not visible yet". Only the deadline ends the wait.
pub async fn wait_visible(
    surface: &dyn Surface,
    selector: &Selector,
    timeout: Duration,
    poll: Duration,
) -> AutomationResult<Box<dyn Control>> {
    let deadline = Instant::now() + timeout;
    let mut last_error: Option<AutomationError> = None;
    loop {
        match probe(surface, selector).await {
            Ok(Some(control)) => return Ok(control),
            Ok(None) => {}
            Err(e) => {
                debug!(selector = %selector, error = %e, "Lookup failed, polling on");
                last_error = Some(e);
            }
        }
        if Instant::now() >= deadline {
            let what = match last_error {
                Some(e) => format!("{selector} to be visible (last error: {e})"),
                None => format!("{selector} to be visible"),
            };
            return Err(AutomationError::Timeout { what, after: timeout });
        }
        sleep(poll).await;
    }
}

/// One lookup: the control if it is present and visible.
async fn probe(surface: &dyn Surface, selector: &Selector) -> AutomationResult<Option<Box<dyn Control>>> {
    match surface.locate(selector).await? {
        Some(control) if control.is_visible().await? => Ok(Some(control)),
        _ => Ok(None),
    }
}

/// Whether `selector` is visible right now, without waiting.
/// Lookup errors read as "not visible".
pub async fn is_visible_now(surface: &dyn Surface, selector: &Selector) -> bool {
    match surface.locate(selector).await {
        Ok(Some(control)) => control.is_visible().await.unwrap_or(false),
        _ => false,
    }
}

/// Wait for `selector` within the implicit interaction timeout, then click it.
pub async fn click(
    surface: &dyn Surface,
    selector: &Selector,
    cfg: &EngineConfig,
) -> AutomationResult<()> {
    let control = wait_visible(surface, selector, cfg.interaction_timeout, cfg.poll_interval).await?;
    control.click().await
}

/// Best-effort click. Never fails: absence or a failed click is logged and ignored.
pub async fn click_if_visible(
    surface: &dyn Surface,
    selector: &Selector,
    label: &str,
    cfg: &EngineConfig,
) {
    match click(surface, selector, cfg).await {
        Ok(()) => info!(control = label, "Clicked"),
        Err(e) => warn!(control = label, selector = %selector, error = %e, "Failed to click"),
    }
}

/// Activate "Unlock" if it is showing, then require "Approve" and click it.
pub async fn approve_if_prompted(
    wallet: &dyn Surface,
    cfg: &EngineConfig,
) -> AutomationResult<()> {
    let s = &cfg.selectors;
    if is_visible_now(wallet, &s.unlock).await {
        match wallet.locate(&s.unlock).await? {
            Some(unlock) => {
                unlock.click().await?;
                info!("Unlock clicked");
            }
            None => debug!("Unlock disappeared before click"),
        }
    }

    click(wallet, &s.approve, cfg).await?;
    info!("Transaction approved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ControlScript, EventLog, FakeSurface};
    use tokio_test::assert_ok;

    fn cfg() -> EngineConfig {
        EngineConfig::fast_for_tests()
    }

    #[tokio::test]
    async fn test_wait_visible_polls_until_shown() {
        let log = EventLog::new();
        let surface = FakeSurface::new("Phoenix", &log);
        let sel = Selector::exact_text("Market");
        surface.set(&sel, ControlScript::visible().appears_after(2));

        let control = wait_visible(&surface, &sel, Duration::from_millis(200), Duration::from_millis(1))
            .await
            .unwrap();
        assert!(control.is_visible().await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_visible_times_out() {
        let log = EventLog::new();
        let surface = FakeSurface::new("Phoenix", &log);
        let sel = Selector::exact_text("Market");
        surface.set(&sel, ControlScript::hidden());

        let err = wait_visible(&surface, &sel, Duration::from_millis(20), Duration::from_millis(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AutomationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_visible_rides_out_lookup_errors() {
        let log = EventLog::new();
        let surface = FakeSurface::new("Phoenix", &log);
        let sel = Selector::text("Order filled");
        surface.set(&sel, ControlScript::visible().failing_lookups(3));

        let control = assert_ok!(
            wait_visible(&surface, &sel, Duration::from_secs(200), Duration::from_millis(1)).await
        );
        assert!(control.is_visible().await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_visible_reports_last_lookup_error_on_timeout() {
        let log = EventLog::new();
        let surface = FakeSurface::new("Phoenix", &log);
        let sel = Selector::text("Order filled");
        surface.set(&sel, ControlScript::visible().failing_lookups(u32::MAX));

        let err = wait_visible(&surface, &sel, Duration::from_millis(20), Duration::from_millis(2))
            .await
            .err()
            .unwrap();
        match err {
            AutomationError::Timeout { what, .. } => assert!(what.contains("Cannot find context")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_click_if_visible_swallows_absence() {
        let log = EventLog::new();
        let surface = FakeSurface::new("Phoenix", &log);
        let sel = Selector::css("svg.settings-icon");

        click_if_visible(&surface, &sel, "Settings", &cfg()).await;
        assert_eq!(log.clicks(&sel), 0);

        surface.set(&sel, ControlScript::visible());
        click_if_visible(&surface, &sel, "Settings", &cfg()).await;
        assert_eq!(log.clicks(&sel), 1);
    }

    #[tokio::test]
    async fn test_click_if_visible_swallows_click_failure() {
        let log = EventLog::new();
        let surface = FakeSurface::new("Phoenix", &log);
        let sel = Selector::exact_text("Fast");
        surface.set(&sel, ControlScript::visible().failing_clicks(1));

        click_if_visible(&surface, &sel, "Fast Transactions", &cfg()).await;
        assert_eq!(log.clicks(&sel), 0);
    }

    #[tokio::test]
    async fn test_approve_unlocks_when_prompted() {
        let cfg = cfg();
        let log = EventLog::new();
        let wallet = FakeSurface::new("Backpack", &log);
        wallet
            .set(&cfg.selectors.unlock, ControlScript::visible())
            .set(&cfg.selectors.approve, ControlScript::visible());

        assert_ok!(approve_if_prompted(&wallet, &cfg).await);
        assert_eq!(log.clicks(&cfg.selectors.unlock), 1);
        assert_eq!(log.clicks(&cfg.selectors.approve), 1);
    }

    #[tokio::test]
    async fn test_approve_skips_hidden_unlock() {
        let cfg = cfg();
        let log = EventLog::new();
        let wallet = FakeSurface::new("Backpack", &log);
        wallet
            .set(&cfg.selectors.unlock, ControlScript::hidden())
            .set(&cfg.selectors.approve, ControlScript::visible());

        assert_ok!(approve_if_prompted(&wallet, &cfg).await);
        assert_eq!(log.clicks(&cfg.selectors.unlock), 0);
        assert_eq!(log.clicks(&cfg.selectors.approve), 1);
    }

    #[tokio::test]
    async fn test_missing_approve_propagates() {
        let cfg = cfg();
        let log = EventLog::new();
        let wallet = FakeSurface::new("Backpack", &log);

        let result = approve_if_prompted(&wallet, &cfg).await;
        assert!(matches!(result, Err(AutomationError::Timeout { .. })));
    }
}
