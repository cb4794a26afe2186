//! Surface resolver.
//!
//! Finds an open tab by title substring, or opens one at a fallback URL.
//! No retry here: callers own their retry loops and re-resolve from scratch.

use std::sync::Arc;
use tracing::{debug, info};

use crate::browser::{AutomationResult, Session, Surface};
use crate::types::AutomationError;

use super::SurfaceTargets;

/// Return the first tab whose title contains `title` (case-sensitive).
/// Otherwise open `fallback_url` if given, or fail with `SurfaceNotFound`.
pub async fn resolve(
    session: &dyn Session,
    title: &str,
    fallback_url: Option<&str>,
) -> AutomationResult<Arc<dyn Surface>> {
    for surface in session.surfaces().await? {
        // Tabs can close or crash mid-scan; an unreadable title is just a non-match.
        let Ok(current) = surface.title().await else {
            continue;
        };
        if current.contains(title) {
            debug!(session = session.id(), title, current = %current, "Surface resolved");
            return Ok(surface);
        }
    }

    match fallback_url {
        Some(url) => {
            info!(session = session.id(), title, url, "Surface not open, navigating");
            session.open_surface(url).await
        }
        None => Err(AutomationError::SurfaceNotFound {
            title: title.to_string(),
        }),
    }
}

/// The wallet and exchange tabs, as resolved at the start of an attempt.
pub struct SurfacePair {
    pub wallet: Arc<dyn Surface>,
    pub exchange: Arc<dyn Surface>,
}

/// Resolve both working surfaces, wallet first.
pub async fn resolve_pair(
    session: &dyn Session,
    targets: &SurfaceTargets,
) -> AutomationResult<SurfacePair> {
    let wallet = resolve(session, &targets.wallet_title, Some(&targets.wallet_url)).await?;
    let exchange = resolve(session, &targets.exchange_title, Some(&targets.exchange_url)).await?;
    Ok(SurfacePair { wallet, exchange })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
