//! Scripted in-memory browser for tests.
//!
//! Provides deterministic `Session` / `Surface` / `Control` implementations
//! whose controls are programmed per selector, plus an event log recording
//! every click, keystroke, reload and tab opened, so tests can assert on
//! what the engine did rather than only on what it returned.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::browser::{AutomationResult, Control, Selector, Session, SessionProvider, Surface};
use crate::engine::EngineConfig;
use crate::types::{Account, AutomationError};

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Click { surface: String, selector: String },
    Type { surface: String, selector: String, text: String },
    Reload { surface: String },
    Front { surface: String },
    Open { url: String },
    Close { session: String },
}

/// Shared, append-only record of browser actions.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn clicks(&self, selector: &Selector) -> usize {
        let key = selector.to_string();
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Click { selector, .. } if *selector == key))
            .count()
    }

    pub fn reloads(&self, surface: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Reload { surface: s } if s == surface))
            .count()
    }

    pub fn typed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Type { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Open { url } => Some(url),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

/// Programmed behavior of one selector on one surface.
#[derive(Debug, Clone)]
pub struct ControlScript {
    visible: bool,
    /// Visibility checks that report hidden before the control shows up.
    hidden_checks: u32,
    /// Successive `text()` results; the last one repeats.
    texts: VecDeque<String>,
    /// Clicks that fail before clicks start succeeding.
    failing_clicks: u32,
    /// Lookups that fail the way a page does while its execution context
    /// is being replaced.
    failing_lookups: u32,
}

impl ControlScript {
    pub fn visible() -> Self {
        Self {
            visible: true,
            hidden_checks: 0,
            texts: VecDeque::new(),
            failing_clicks: 0,
            failing_lookups: 0,
        }
    }

    pub fn hidden() -> Self {
        Self {
            visible: false,
            ..Self::visible()
        }
    }

    pub fn with_text(text: &str) -> Self {
        Self::visible().then_text(text)
    }

    /// Append a text to the sequence returned by successive reads.
    pub fn then_text(mut self, text: &str) -> Self {
        self.texts.push_back(text.to_string());
        self
    }

    pub fn appears_after(mut self, checks: u32) -> Self {
        self.hidden_checks = checks;
        self
    }

    pub fn failing_clicks(mut self, n: u32) -> Self {
        self.failing_clicks = n;
        self
    }

    pub fn failing_lookups(mut self, n: u32) -> Self {
        self.failing_lookups = n;
        self
    }
}

#[derive(Debug, Default)]
struct SurfaceState {
    title: String,
    controls: Mutex<HashMap<String, ControlScript>>,
    after_reload: Mutex<Vec<(String, Option<ControlScript>)>>,
    reload_failures: Mutex<u32>,
    log: EventLog,
}

struct FakeControl {
    state: Arc<SurfaceState>,
    key: String,
}

impl FakeControl {
    fn with_script<T>(
        &self,
        f: impl FnOnce(&mut ControlScript) -> AutomationResult<T>,
    ) -> AutomationResult<T> {
        let mut controls = self.state.controls.lock().unwrap();
        match controls.get_mut(&self.key) {
            Some(script) => f(script),
            None => Err(AutomationError::protocol(format!("element detached: {}", self.key))),
        }
    }
}

#[async_trait]
impl Control for FakeControl {
    async fn is_visible(&self) -> AutomationResult<bool> {
        self.with_script(|s| {
            if s.hidden_checks > 0 {
                s.hidden_checks -= 1;
                return Ok(false);
            }
            Ok(s.visible)
        })
    }

    async fn click(&self) -> AutomationResult<()> {
        self.with_script(|s| {
            if !s.visible {
                return Err(AutomationError::protocol(format!("not clickable: {}", self.key)));
            }
            if s.failing_clicks > 0 {
                s.failing_clicks -= 1;
                return Err(AutomationError::protocol(format!("click intercepted: {}", self.key)));
            }
            Ok(())
        })?;
        self.state.log.push(Event::Click {
            surface: self.state.title.clone(),
            selector: self.key.clone(),
        });
        Ok(())
    }

    async fn type_text(&self, text: &str) -> AutomationResult<()> {
        self.with_script(|_| Ok(()))?;
        self.state.log.push(Event::Type {
            surface: self.state.title.clone(),
            selector: self.key.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn text(&self) -> AutomationResult<String> {
        self.with_script(|s| {
            let text = if s.texts.len() > 1 {
                s.texts.pop_front().unwrap_or_default()
            } else {
                s.texts.front().cloned().unwrap_or_default()
            };
            Ok(text)
        })
    }
}

// ---------------------------------------------------------------------------
// Surfaces
// ---------------------------------------------------------------------------

/// A scripted tab. Clones share state.
#[derive(Clone)]
pub struct FakeSurface {
    state: Arc<SurfaceState>,
}

impl FakeSurface {
    pub fn new(title: &str, log: &EventLog) -> Self {
        Self {
            state: Arc::new(SurfaceState {
                title: title.to_string(),
                log: log.clone(),
                ..Default::default()
            }),
        }
    }

    pub fn title_str(&self) -> &str {
        &self.state.title
    }

    /// Program `selector`; replaces any previous script for it.
    pub fn set(&self, selector: &Selector, script: ControlScript) -> &Self {
        self.state
            .controls
            .lock()
            .unwrap()
            .insert(selector.to_string(), script);
        self
    }

    pub fn remove(&self, selector: &Selector) -> &Self {
        self.state.controls.lock().unwrap().remove(&selector.to_string());
        self
    }

    /// Apply `script` (or remove the control when `None`) on the next reload.
    pub fn on_reload(&self, selector: &Selector, script: Option<ControlScript>) -> &Self {
        self.state
            .after_reload
            .lock()
            .unwrap()
            .push((selector.to_string(), script));
        self
    }

    pub fn fail_reloads(&self, n: u32) -> &Self {
        *self.state.reload_failures.lock().unwrap() = n;
        self
    }
}

#[async_trait]
impl Surface for FakeSurface {
    async fn title(&self) -> AutomationResult<String> {
        Ok(self.state.title.clone())
    }

    async fn bring_to_front(&self) -> AutomationResult<()> {
        self.state.log.push(Event::Front { surface: self.state.title.clone() });
        Ok(())
    }

    async fn reload(&self) -> AutomationResult<()> {
        {
            let mut failures = self.state.reload_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AutomationError::protocol("reload failed"));
            }
        }
        self.state.log.push(Event::Reload { surface: self.state.title.clone() });
        let pending: Vec<_> = self.state.after_reload.lock().unwrap().drain(..).collect();
        let mut controls = self.state.controls.lock().unwrap();
        for (key, script) in pending {
            match script {
                Some(s) => {
                    controls.insert(key, s);
                }
                None => {
                    controls.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn locate(&self, selector: &Selector) -> AutomationResult<Option<Box<dyn Control>>> {
        let key = selector.to_string();
        match self.state.controls.lock().unwrap().get_mut(&key) {
            None => return Ok(None),
            Some(script) if script.failing_lookups > 0 => {
                script.failing_lookups -= 1;
                return Err(AutomationError::protocol(
                    "Runtime.evaluate: Cannot find context with specified id",
                ));
            }
            Some(_) => {}
        }
        Ok(Some(Box::new(FakeControl {
            state: Arc::clone(&self.state),
            key,
        })))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub struct FakeSession {
    id: String,
    surfaces: Mutex<Vec<FakeSurface>>,
    routes: Mutex<HashMap<String, FakeSurface>>,
    closed: AtomicBool,
    log: EventLog,
}

impl FakeSession {
    pub fn new(id: &str, log: &EventLog) -> Self {
        Self {
            id: id.to_string(),
            surfaces: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            log: log.clone(),
        }
    }

    /// A session with both tabs open and a happy-path exchange UI:
    /// balance "Max: 12.5", submit label "Place Order", status "Order filled".
    pub fn phoenix(id: &str, cfg: &EngineConfig, log: &EventLog) -> (Self, FakeSurface, FakeSurface) {
        let session = Self::new(id, log);
        let wallet = FakeSurface::new(&format!("{} Wallet", cfg.targets.wallet_title), log);
        let exchange = FakeSurface::new(&format!("{} | Trade", cfg.targets.exchange_title), log);
        let s = &cfg.selectors;

        wallet.set(&s.approve, ControlScript::visible());

        exchange
            .set(&s.connect_wallet, ControlScript::visible())
            .set(&s.wallet_option, ControlScript::visible())
            .set(&s.settings, ControlScript::visible())
            .set(&s.fast_mode, ControlScript::visible())
            .set(&s.settings_close, ControlScript::visible())
            .set(&s.market_tab, ControlScript::visible())
            .set(&s.max_balance, ControlScript::with_text("Max: 12.5"))
            .set(&s.amount_input, ControlScript::visible())
            .set(&s.submit, ControlScript::with_text("Place Order"))
            .set(&s.status, ControlScript::with_text("Order filled"));

        session.push(wallet.clone());
        session.push(exchange.clone());
        (session, wallet, exchange)
    }

    pub fn push(&self, surface: FakeSurface) {
        self.surfaces.lock().unwrap().push(surface);
    }

    /// Surface returned when `url` is opened.
    pub fn route(&self, url: &str, surface: FakeSurface) {
        self.routes.lock().unwrap().insert(url.to_string(), surface);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.lock().unwrap().len()
    }
}

#[async_trait]
impl Session for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn surfaces(&self) -> AutomationResult<Vec<Arc<dyn Surface>>> {
        Ok(self
            .surfaces
            .lock()
            .unwrap()
            .iter()
            .map(|s| Arc::new(s.clone()) as Arc<dyn Surface>)
            .collect())
    }

    async fn open_surface(&self, url: &str) -> AutomationResult<Arc<dyn Surface>> {
        self.log.push(Event::Open { url: url.to_string() });
        let surface = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| FakeSurface::new(url, &self.log));
        self.push(surface.clone());
        Ok(Arc::new(surface))
    }

    async fn close(&self) -> AutomationResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.log.push(Event::Close { session: self.id.clone() });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Hands out pre-built sessions keyed by account address.
#[derive(Default)]
pub struct FakeProvider {
    sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, address: &str, session: Arc<FakeSession>) {
        self.sessions.lock().unwrap().insert(address.to_string(), session);
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn open(&self, account: &Account) -> Result<Arc<dyn Session>> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(&account.address)
            .cloned()
            .ok_or_else(|| anyhow!("No browser profile for {}", account.address))?;
        Ok(session as Arc<dyn Session>)
    }
}
