//! Chrome DevTools Protocol backend.
//!
//! Targets are discovered over the DevTools HTTP endpoints; each page is
//! driven over its own WebSocket, opened lazily and re-opened after a
//! transport failure. Elements are never held across calls: every control
//! operation re-runs the in-page resolver against the current DOM.
//!
//! Endpoints used:
//! - `GET  /json/version`: readiness probe
//! - `GET  /json/list`: open targets
//! - `PUT  /json/new?<url>`: open a tab
//!
//! When the upstream proxy needs credentials, one extra browser-level
//! connection runs the `Fetch` domain and answers every proxy challenge.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{AutomationResult, Control, Selector, Session, Surface};
use crate::types::AutomationError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Upper bound on a single protocol round trip.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between `document.readyState` checks.
const LOAD_POLL: Duration = Duration::from_millis(100);

/// Identity and load state of the current document.
const DOCUMENT_STATE_JS: &str = "[performance.timeOrigin, document.readyState]";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Per-page pacing and load bounds.
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    /// Delay before every mutating action.
    pub slow_mo: Duration,
    /// Bound on waiting for a document to finish loading.
    pub load_timeout: Duration,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            slow_mo: Duration::ZERO,
            load_timeout: Duration::from_secs(30),
        }
    }
}

/// In-page element resolver. Called as `(RESOLVER_JS)(selector, op)` where
/// `selector` is the serde form of [`Selector`] and `op` is one of
/// `count`, `visible`, `text`, `rect`, `focus`. Acts on the first match.
pub const RESOLVER_JS: &str = r#"(sel, op) => {
  const textOf = (el) => (el.innerText || el.textContent || '').trim();
  const shown = (el) => {
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const hits = (el, value, exact) => {
    const t = textOf(el);
    return exact ? t === value : t.toLowerCase().includes(value.toLowerCase());
  };
  const byText = (value, exact) => {
    const out = [];
    const root = document.body || document.documentElement;
    const walker = document.createTreeWalker(root, NodeFilter.SHOW_ELEMENT);
    for (let el = walker.currentNode; el; el = walker.nextNode()) {
      if (!hits(el, value, exact)) continue;
      if ([...el.children].some((c) => hits(c, value, exact))) continue;
      out.push(el);
    }
    return out;
  };
  const roles = {
    button: 'button,[role="button"],input[type="button"],input[type="submit"]',
    link: 'a[href],[role="link"]',
    textbox: 'input,textarea,[role="textbox"]',
  };
  const find = (s) => {
    switch (s.kind) {
      case 'css':
        return [...document.querySelectorAll(s.value)];
      case 'xpath': {
        const snap = document.evaluate(s.value, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
        const out = [];
        for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
        return out;
      }
      case 'text':
        return byText(s.value, s.exact);
      case 'role': {
        const name = s.name.toLowerCase();
        return [...document.querySelectorAll(roles[s.role] || `[role="${s.role}"]`)].filter((el) =>
          (el.getAttribute('aria-label') || textOf(el) || el.value || '').toLowerCase().includes(name));
      }
      case 'nth': {
        const inner = find(s.inner);
        return s.index < inner.length ? [inner[s.index]] : [];
      }
      default:
        return [];
    }
  };
  const matches = find(sel);
  const el = matches[0];
  switch (op) {
    case 'count':
      return matches.length;
    case 'visible':
      return !!el && shown(el);
    case 'text':
      return el ? textOf(el) : null;
    case 'rect': {
      if (!el) return null;
      el.scrollIntoView({ block: 'center', inline: 'center' });
      const r = el.getBoundingClientRect();
      return { x: r.x, y: r.y, width: r.width, height: r.height };
    }
    case 'focus': {
      if (!el) return false;
      el.focus();
      if (typeof el.select === 'function') el.select();
      return document.activeElement === el;
    }
    default:
      return null;
  }
}"#;

// ---------------------------------------------------------------------------
// DevTools HTTP types
// ---------------------------------------------------------------------------

/// One entry of `/json/list` (or the body of `/json/new`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    /// "page", "background_page", "service_worker", "iframe", ...
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Absent while another client holds the target.
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser", default)]
    browser: String,
    /// Browser-level target, as opposed to the per-page ones.
    #[serde(rename = "webSocketDebuggerUrl", default)]
    web_socket_debugger_url: Option<String>,
}

/// Credentials for an upstream proxy that challenges with 407.
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Rect {
    fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

fn http_error(e: reqwest::Error) -> AutomationError {
    AutomationError::protocol(format!("DevTools HTTP: {e}"))
}

// ---------------------------------------------------------------------------
// Browser (Session)
// ---------------------------------------------------------------------------

/// A Chromium instance reachable over DevTools, optionally owning its process.
pub struct CdpBrowser {
    id: String,
    endpoint: String,
    http: Client,
    options: PageOptions,
    /// Tracked tabs in the order this browser handle first saw them.
    pages: Mutex<Vec<CdpPage>>,
    child: Mutex<Option<Child>>,
    proxy_auth: Mutex<Option<JoinHandle<()>>>,
}

impl CdpBrowser {
    /// Attach to the DevTools HTTP endpoint, e.g. `http://127.0.0.1:9222`.
    pub fn attach(id: &str, endpoint: &str, options: PageOptions) -> Self {
        Self {
            id: id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: Client::new(),
            options,
            pages: Mutex::new(Vec::new()),
            child: Mutex::new(None),
            proxy_auth: Mutex::new(None),
        }
    }

    /// Take ownership of the launched process; `close()` will kill it.
    pub fn with_process(mut self, child: Child) -> Self {
        self.child = Mutex::new(Some(child));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Browser product string from `/json/version`.
    pub async fn version(&self) -> AutomationResult<String> {
        Ok(self.version_info().await?.browser)
    }

    async fn version_info(&self) -> AutomationResult<VersionInfo> {
        self.http
            .get(format!("{}/json/version", self.endpoint))
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)
    }

    /// Answer proxy authentication challenges for every target of this
    /// browser until it is closed.
    pub async fn authenticate_proxy(&self, auth: ProxyAuth) -> AutomationResult<()> {
        let ws_url = self
            .version_info()
            .await?
            .web_socket_debugger_url
            .ok_or_else(|| AutomationError::protocol("browser target has no debugger URL"))?;
        let (mut ws, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| AutomationError::protocol(format!("connect to browser target: {e}")))?;

        let enable = json!({
            "id": 1,
            "method": "Fetch.enable",
            "params": { "handleAuthRequests": true, "patterns": [{ "urlPattern": "*" }] },
        });
        ws.send(Message::Text(enable.to_string()))
            .await
            .map_err(|e| AutomationError::protocol(format!("Fetch.enable: {e}")))?;

        let task = tokio::spawn(serve_proxy_auth(ws, auth, self.id.clone()));
        if let Some(previous) = self.proxy_auth.lock().await.replace(task) {
            previous.abort();
        }
        info!(session = %self.id, "Proxy authentication enabled");
        Ok(())
    }

    pub async fn targets(&self) -> AutomationResult<Vec<TargetInfo>> {
        self.http
            .get(format!("{}/json/list", self.endpoint))
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)
    }

    /// Cached page for `target`, created on first sight.
    fn track(&self, pages: &mut Vec<CdpPage>, target: &TargetInfo) -> Option<CdpPage> {
        if let Some(page) = pages.iter().find(|p| p.target_id() == target.id) {
            return Some(page.clone());
        }
        let ws_url = target.web_socket_debugger_url.as_deref()?;
        let page = CdpPage::new(&target.id, ws_url, self.options);
        pages.push(page.clone());
        Some(page)
    }

    /// Bring `pages` in line with a `/json/list` snapshot: closed tabs are
    /// dropped, new ones appended. The list puts the most recently active
    /// target first, so unseen tabs are appended from its tail.
    fn sync_pages(&self, pages: &mut Vec<CdpPage>, targets: &[TargetInfo]) {
        pages.retain(|p| targets.iter().any(|t| t.id == p.target_id()));
        for target in targets.iter().rev().filter(|t| t.is_page()) {
            if self.track(pages, target).is_none() {
                debug!(tab = %target.id, url = %target.url, "Target not attachable");
            }
        }
    }
}

#[async_trait]
impl Session for CdpBrowser {
    fn id(&self) -> &str {
        &self.id
    }

    async fn surfaces(&self) -> AutomationResult<Vec<Arc<dyn Surface>>> {
        let targets = self.targets().await?;
        let mut pages = self.pages.lock().await;
        self.sync_pages(&mut pages, &targets);
        Ok(pages
            .iter()
            .map(|p| Arc::new(p.clone()) as Arc<dyn Surface>)
            .collect())
    }

    async fn open_surface(&self, url: &str) -> AutomationResult<Arc<dyn Surface>> {
        let target: TargetInfo = self
            .http
            .put(format!("{}/json/new?{}", self.endpoint, urlencoding::encode(url)))
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;

        let page = {
            let mut pages = self.pages.lock().await;
            self.track(&mut pages, &target).ok_or_else(|| {
                AutomationError::protocol(format!("new tab {} has no debugger URL", target.id))
            })?
        };
        page.wait_loaded().await?;
        info!(session = %self.id, url, tab = %target.id, "Opened tab");
        Ok(Arc::new(page))
    }

    async fn close(&self) -> AutomationResult<()> {
        self.pages.lock().await.clear();
        if let Some(task) = self.proxy_auth.lock().await.take() {
            task.abort();
        }
        let mut child = self.child.lock().await;
        match child.take() {
            Some(mut process) => {
                process
                    .kill()
                    .await
                    .map_err(|e| AutomationError::protocol(format!("kill browser: {e}")))?;
                info!(session = %self.id, "Browser closed");
            }
            None => debug!(session = %self.id, "Attached browser left running"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Proxy authentication
// ---------------------------------------------------------------------------

/// Event loop of the browser-level `Fetch` connection.
async fn serve_proxy_auth(mut ws: WsStream, auth: ProxyAuth, session: String) {
    let mut next_id: u64 = 2;
    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(session = %session, error = %e, "Proxy auth connection lost");
                break;
            }
        };
        let Ok(message) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if let Some(err) = message.get("error") {
            warn!(session = %session, error = %err, "Fetch command rejected");
            continue;
        }
        let Some((method, params)) = fetch_reply(&message, &auth) else {
            continue;
        };
        let command = json!({ "id": next_id, "method": method, "params": params });
        next_id += 1;
        if let Err(e) = ws.send(Message::Text(command.to_string())).await {
            warn!(session = %session, method, error = %e, "Proxy auth connection lost");
            break;
        }
    }
    debug!(session = %session, "Proxy auth handler stopped");
}

/// Command answering one `Fetch` event, if it needs an answer.
///
/// Paused requests are resumed untouched. Proxy challenges get the
/// configured credentials; server challenges fall through to the default.
fn fetch_reply(event: &Value, auth: &ProxyAuth) -> Option<(&'static str, Value)> {
    let params = event.get("params")?;
    let request_id = params.get("requestId")?.as_str()?;
    match event.get("method")?.as_str()? {
        "Fetch.requestPaused" => Some(("Fetch.continueRequest", json!({ "requestId": request_id }))),
        "Fetch.authRequired" => {
            let source = params.pointer("/authChallenge/source").and_then(Value::as_str);
            let response = if source == Some("Proxy") {
                json!({
                    "response": "ProvideCredentials",
                    "username": auth.username,
                    "password": auth.password.expose_secret(),
                })
            } else {
                json!({ "response": "Default" })
            };
            Some((
                "Fetch.continueWithAuth",
                json!({ "requestId": request_id, "authChallengeResponse": response }),
            ))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Page (Surface)
// ---------------------------------------------------------------------------

struct PageInner {
    target_id: String,
    ws_url: String,
    options: PageOptions,
    next_id: AtomicU64,
    conn: Mutex<Option<WsStream>>,
}

/// One tab. Clones share the same connection.
#[derive(Clone)]
pub struct CdpPage {
    inner: Arc<PageInner>,
}

enum CallError {
    /// Socket-level failure; the connection is discarded.
    Transport(String),
    /// The browser answered with an error object.
    Remote(String),
}

impl CdpPage {
    fn new(target_id: &str, ws_url: &str, options: PageOptions) -> Self {
        Self {
            inner: Arc::new(PageInner {
                target_id: target_id.to_string(),
                ws_url: ws_url.to_string(),
                options,
                next_id: AtomicU64::new(1),
                conn: Mutex::new(None),
            }),
        }
    }

    fn target_id(&self) -> &str {
        &self.inner.target_id
    }

    /// Send one command and wait for its reply. Events are skipped.
    async fn call(&self, method: &str, params: Value) -> AutomationResult<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.inner.conn.lock().await;
        if conn.is_none() {
            let (ws, _) = connect_async(self.inner.ws_url.as_str()).await.map_err(|e| {
                AutomationError::protocol(format!("connect to {}: {e}", self.inner.target_id))
            })?;
            *conn = Some(ws);
        }
        let Some(ws) = conn.as_mut() else {
            return Err(AutomationError::protocol("DevTools connection unavailable"));
        };

        let outcome = timeout(CALL_TIMEOUT, round_trip(ws, id, method, params)).await;
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(CallError::Remote(msg))) => Err(AutomationError::protocol(format!("{method}: {msg}"))),
            Ok(Err(CallError::Transport(msg))) => {
                warn!(tab = %self.inner.target_id, method, error = %msg, "DevTools connection lost");
                *conn = None;
                Err(AutomationError::protocol(format!("{method}: {msg}")))
            }
            Err(_) => {
                *conn = None;
                Err(AutomationError::Timeout {
                    what: format!("{method} reply"),
                    after: CALL_TIMEOUT,
                })
            }
        }
    }

    async fn evaluate(&self, expression: &str) -> AutomationResult<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;
        evaluation_value(result)
    }

    async fn query(&self, selector: &Selector, op: &str) -> AutomationResult<Value> {
        self.evaluate(&resolver_call(selector, op)?).await
    }

    async fn pace(&self) {
        let delay = self.inner.options.slow_mo;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    async fn wait_loaded(&self) -> AutomationResult<()> {
        self.wait_document(None).await
    }

    /// `timeOrigin` of the current document, if the page can be evaluated.
    async fn document_origin(&self) -> Option<f64> {
        let state = self.evaluate(DOCUMENT_STATE_JS).await.ok()?;
        state.get(0).and_then(Value::as_f64)
    }

    /// Wait for a fully loaded document. With `replaced`, the document must
    /// also differ from the one that had that `timeOrigin`.
    async fn wait_document(&self, replaced: Option<f64>) -> AutomationResult<()> {
        let bound = self.inner.options.load_timeout;
        let deadline = Instant::now() + bound;
        loop {
            // Evaluation fails while a navigation swaps the execution context.
            if let Ok(state) = self.evaluate(DOCUMENT_STATE_JS).await {
                if document_ready(&state, replaced) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    what: format!("{} to load", self.inner.target_id),
                    after: bound,
                });
            }
            sleep(LOAD_POLL).await;
        }
    }

    async fn mouse(&self, kind: &str, x: f64, y: f64) -> AutomationResult<()> {
        self.call(
            "Input.dispatchMouseEvent",
            json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
        )
        .await
        .map(|_| ())
    }
}

async fn round_trip(
    ws: &mut WsStream,
    id: u64,
    method: &str,
    params: Value,
) -> Result<Value, CallError> {
    let request = json!({ "id": id, "method": method, "params": params });
    ws.send(Message::Text(request.to_string()))
        .await
        .map_err(|e| CallError::Transport(e.to_string()))?;

    while let Some(frame) = ws.next().await {
        let text = match frame.map_err(|e| CallError::Transport(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(CallError::Transport("closed by browser".to_string())),
            _ => continue,
        };
        let Ok(reply) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if reply.get("id").and_then(Value::as_u64) == Some(id) {
            return parse_reply(reply);
        }
    }
    Err(CallError::Transport("connection closed".to_string()))
}

fn parse_reply(reply: Value) -> Result<Value, CallError> {
    if let Some(err) = reply.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(CallError::Remote(msg.to_string()));
    }
    Ok(reply.get("result").cloned().unwrap_or(Value::Null))
}

/// Whether `[timeOrigin, readyState]` describes a loaded document other
/// than the one identified by `replaced`.
fn document_ready(state: &Value, replaced: Option<f64>) -> bool {
    let origin = state.get(0).and_then(Value::as_f64);
    let complete = state.get(1).and_then(Value::as_str) == Some("complete");
    match replaced {
        Some(old) => complete && origin.is_some_and(|o| o != old),
        None => complete,
    }
}

/// Unwrap a `Runtime.evaluate` result, surfacing script exceptions.
fn evaluation_value(result: Value) -> AutomationResult<Value> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script exception");
        return Err(AutomationError::protocol(format!("evaluate: {text}")));
    }
    Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
}

/// Expression invoking the resolver for `selector`.
fn resolver_call(selector: &Selector, op: &str) -> AutomationResult<String> {
    let selector = serde_json::to_string(selector)
        .map_err(|e| AutomationError::protocol(format!("encode selector: {e}")))?;
    let op = Value::String(op.to_string());
    Ok(format!("({RESOLVER_JS})({selector}, {op})"))
}

#[async_trait]
impl Surface for CdpPage {
    async fn title(&self) -> AutomationResult<String> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn bring_to_front(&self) -> AutomationResult<()> {
        self.call("Page.bringToFront", json!({})).await.map(|_| ())
    }

    async fn reload(&self) -> AutomationResult<()> {
        self.pace().await;
        let before = self.document_origin().await;
        self.call("Page.reload", json!({})).await?;
        self.wait_document(before).await
    }

    async fn locate(&self, selector: &Selector) -> AutomationResult<Option<Box<dyn Control>>> {
        let count = self.query(selector, "count").await?.as_u64().unwrap_or(0);
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(Box::new(CdpControl {
            page: self.clone(),
            selector: selector.clone(),
        })))
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

struct CdpControl {
    page: CdpPage,
    selector: Selector,
}

impl CdpControl {
    fn detached(&self) -> AutomationError {
        AutomationError::protocol(format!("element detached: {}", self.selector))
    }
}

#[async_trait]
impl Control for CdpControl {
    async fn is_visible(&self) -> AutomationResult<bool> {
        Ok(self
            .page
            .query(&self.selector, "visible")
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn click(&self) -> AutomationResult<()> {
        self.page.pace().await;
        let value = self.page.query(&self.selector, "rect").await?;
        let rect: Rect = serde_json::from_value(value).map_err(|_| self.detached())?;
        if rect.is_empty() {
            return Err(AutomationError::protocol(format!("not clickable: {}", self.selector)));
        }
        let (x, y) = rect.center();
        self.page.mouse("mouseMoved", x, y).await?;
        self.page.mouse("mousePressed", x, y).await?;
        self.page.mouse("mouseReleased", x, y).await?;
        debug!(selector = %self.selector, x, y, "Clicked");
        Ok(())
    }

    async fn type_text(&self, text: &str) -> AutomationResult<()> {
        self.page.pace().await;
        let focused = self.page.query(&self.selector, "focus").await?;
        if focused.as_bool() != Some(true) {
            return Err(AutomationError::protocol(format!("cannot focus {}", self.selector)));
        }
        self.page
            .call("Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn text(&self) -> AutomationResult<String> {
        match self.page.query(&self.selector, "text").await? {
            Value::String(text) => Ok(text),
            _ => Err(self.detached()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_list() {
        let body = r#"[
            {"description": "", "id": "A1B2", "title": "Phoenix", "type": "page",
             "url": "https://app.phoenix.trade/",
             "webSocketDebuggerUrl": "ws://127.0.0.1:9300/devtools/page/A1B2"},
            {"id": "SW1", "title": "Service Worker", "type": "service_worker", "url": "chrome-extension://x/sw.js"},
            {"id": "C3", "title": "Backpack", "type": "page", "url": "chrome-extension://x/popup.html"}
        ]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(body).unwrap();
        assert_eq!(targets.len(), 3);
        assert!(targets[0].is_page());
        assert_eq!(
            targets[0].web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9300/devtools/page/A1B2")
        );
        assert!(!targets[1].is_page());
        assert!(targets[2].web_socket_debugger_url.is_none());
    }

    #[test]
    fn test_untracked_target_without_debugger_url_is_skipped() {
        let browser = CdpBrowser::attach("s", "http://127.0.0.1:9300/", PageOptions::default());
        assert_eq!(browser.endpoint(), "http://127.0.0.1:9300");

        let attachable: TargetInfo = serde_json::from_value(json!({
            "id": "P1", "type": "page", "webSocketDebuggerUrl": "ws://127.0.0.1:9300/devtools/page/P1"
        }))
        .unwrap();
        let mut pages = Vec::new();
        assert!(browser.track(&mut pages, &attachable).is_some());

        // Once tracked, the page stays reachable even if the list hides its URL.
        let held = TargetInfo { web_socket_debugger_url: None, ..attachable };
        assert!(browser.track(&mut pages, &held).is_some());
        assert_eq!(pages.len(), 1);

        let foreign = TargetInfo { id: "P2".into(), ..held };
        assert!(browser.track(&mut pages, &foreign).is_none());
    }

    fn page_target(id: &str) -> TargetInfo {
        serde_json::from_value(json!({
            "id": id, "type": "page", "webSocketDebuggerUrl": format!("ws://127.0.0.1:9300/devtools/page/{id}")
        }))
        .unwrap()
    }

    #[test]
    fn test_surfaces_keep_first_seen_order() {
        let browser = CdpBrowser::attach("s", "http://127.0.0.1:9300", PageOptions::default());
        let ids = |pages: &Vec<CdpPage>| pages.iter().map(|p| p.target_id().to_string()).collect::<Vec<_>>();
        let mut pages = Vec::new();

        // Most recently active first, as Chrome lists them.
        browser.sync_pages(&mut pages, &[page_target("exchange"), page_target("wallet")]);
        assert_eq!(ids(&pages), ["wallet", "exchange"]);

        // Activity reorders the list; tracked order stays put.
        browser.sync_pages(
            &mut pages,
            &[page_target("popup"), page_target("wallet"), page_target("exchange")],
        );
        assert_eq!(ids(&pages), ["wallet", "exchange", "popup"]);

        browser.sync_pages(&mut pages, &[page_target("popup"), page_target("exchange")]);
        assert_eq!(ids(&pages), ["exchange", "popup"]);
    }

    #[test]
    fn test_parse_reply() {
        let ok = parse_reply(json!({"id": 3, "result": {"frameId": "F"}}));
        assert!(matches!(ok, Ok(ref v) if v["frameId"] == "F"));

        let err = parse_reply(json!({"id": 3, "error": {"code": -32000, "message": "No node"}}));
        assert!(matches!(err, Err(CallError::Remote(ref m)) if m == "No node"));
    }

    #[test]
    fn test_evaluation_value() {
        let value = evaluation_value(json!({"result": {"type": "string", "value": "complete"}})).unwrap();
        assert_eq!(value, json!("complete"));

        let undefined = evaluation_value(json!({"result": {"type": "undefined"}})).unwrap();
        assert!(undefined.is_null());

        let thrown = evaluation_value(json!({
            "result": {"type": "object"},
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "SyntaxError: bad xpath"}}
        }));
        assert!(matches!(thrown, Err(AutomationError::Protocol(ref m)) if m.contains("bad xpath")));
    }

    #[test]
    fn test_resolver_call_embeds_selector_json() {
        let sel = Selector::css("input[value=\"\"]").nth(2);
        let expr = resolver_call(&sel, "rect").unwrap();
        assert!(expr.starts_with("((sel, op) =>"));
        assert!(expr.ends_with(r#"({"kind":"nth","inner":{"kind":"css","value":"input[value=\"\"]"},"index":2}, "rect")"#));

        let expr = resolver_call(&Selector::exact_text("Approve"), "visible").unwrap();
        assert!(expr.contains(r#"{"kind":"text","value":"Approve","exact":true}"#));
    }

    fn auth() -> ProxyAuth {
        ProxyAuth {
            username: "login".to_string(),
            password: SecretString::new("p@ss".to_string()),
        }
    }

    #[test]
    fn test_proxy_challenge_gets_credentials() {
        let event = json!({
            "method": "Fetch.authRequired",
            "params": {
                "requestId": "interception-7",
                "request": { "url": "https://app.phoenix.trade/" },
                "authChallenge": { "source": "Proxy", "origin": "http://10.0.0.1:3128", "scheme": "basic", "realm": "" }
            }
        });
        let (method, params) = fetch_reply(&event, &auth()).unwrap();
        assert_eq!(method, "Fetch.continueWithAuth");
        assert_eq!(params["requestId"], "interception-7");
        assert_eq!(
            params["authChallengeResponse"],
            json!({ "response": "ProvideCredentials", "username": "login", "password": "p@ss" })
        );
    }

    #[test]
    fn test_server_challenge_is_not_answered_with_proxy_credentials() {
        let event = json!({
            "method": "Fetch.authRequired",
            "params": { "requestId": "r1", "authChallenge": { "source": "Server", "origin": "https://x" } }
        });
        let (_, params) = fetch_reply(&event, &auth()).unwrap();
        assert_eq!(params["authChallengeResponse"], json!({ "response": "Default" }));
    }

    #[test]
    fn test_paused_requests_resume_and_other_messages_are_ignored() {
        let paused = json!({ "method": "Fetch.requestPaused", "params": { "requestId": "r2" } });
        assert_eq!(
            fetch_reply(&paused, &auth()),
            Some(("Fetch.continueRequest", json!({ "requestId": "r2" })))
        );

        let reply = json!({ "id": 1, "result": {} });
        assert!(fetch_reply(&reply, &auth()).is_none());
        let other = json!({ "method": "Target.targetCreated", "params": { "targetInfo": {} } });
        assert!(fetch_reply(&other, &auth()).is_none());
    }

    #[test]
    fn test_version_exposes_browser_target() {
        let info: VersionInfo = serde_json::from_str(
            r#"{"Browser": "Chrome/126.0.6478.61",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9300/devtools/browser/b1"}"#,
        )
        .unwrap();
        assert_eq!(info.browser, "Chrome/126.0.6478.61");
        assert_eq!(
            info.web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9300/devtools/browser/b1")
        );
    }

    #[test]
    fn test_reload_waits_for_a_new_document() {
        let old = json!([1718000000123.4, "complete"]);
        assert!(document_ready(&old, None));
        // Page.reload has returned but the old document is still current.
        assert!(!document_ready(&old, Some(1718000000123.4)));

        let loading = json!([1718000004567.8, "interactive"]);
        assert!(!document_ready(&loading, Some(1718000000123.4)));

        let fresh = json!([1718000004567.8, "complete"]);
        assert!(document_ready(&fresh, Some(1718000000123.4)));
        assert!(!document_ready(&Value::Null, None));
    }

    #[test]
    fn test_rect_center() {
        let r = Rect { x: 10.0, y: 20.0, width: 100.0, height: 40.0 };
        assert_eq!(r.center(), (60.0, 40.0));
        assert!(!r.is_empty());
        assert!(Rect { width: 0.0, ..r }.is_empty());
    }
}
