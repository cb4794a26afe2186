//! Browser session provisioning.
//!
//! One Chromium per account, each with its own profile directory and
//! DevTools port, the wallet extension loaded unpacked. Accounts with a
//! `cdp_endpoint` attach to an already running browser instead.
//!
//! `--proxy-server` takes no credentials, so a proxy URL's user info is
//! split off and answered over DevTools once the browser is up.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use secrecy::SecretString;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::cdp::{CdpBrowser, PageOptions, ProxyAuth};
use super::{Session, SessionProvider};
use crate::config::BrowserConfig;
use crate::types::Account;

/// Interval between DevTools readiness probes after launch.
const READY_POLL: Duration = Duration::from_millis(250);

/// Profile root used when an account names no `profile_dir`.
const DEFAULT_PROFILE_ROOT: &str = "profiles";

pub struct ChromeLauncher {
    cfg: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self { cfg }
    }

    fn page_options(&self) -> PageOptions {
        PageOptions {
            slow_mo: self.cfg.slow_mo(),
            load_timeout: self.startup_timeout(),
        }
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.startup_timeout_secs)
    }

    /// DevTools port for the account: `base_debug_port + index`.
    pub fn debug_port(&self, account: &Account) -> Result<u16> {
        u16::try_from(account.index)
            .ok()
            .and_then(|i| self.cfg.base_debug_port.checked_add(i))
            .with_context(|| format!("No free debug port for account #{}", account.index))
    }

    pub fn profile_dir(account: &Account) -> String {
        account
            .profile_dir
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_PROFILE_ROOT}/{}", account.address))
    }

    async fn attach(&self, account: &Account, endpoint: &str) -> Result<Arc<dyn Session>> {
        let browser = CdpBrowser::attach(&account.address, endpoint, self.page_options());
        let version = browser
            .version()
            .await
            .with_context(|| format!("Cannot reach DevTools at {endpoint}"))?;
        info!(endpoint, version = %version, "Attached to running browser");
        Ok(Arc::new(browser))
    }

    async fn launch(&self, account: &Account) -> Result<Arc<dyn Session>> {
        let port = self.debug_port(account)?;
        let profile = Self::profile_dir(account);
        let args = launch_args(&self.cfg, &profile, port)?;
        debug!(chrome = %self.cfg.chrome_path, ?args, "Launching browser");

        let child = Command::new(&self.cfg.chrome_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("Failed to launch {}", self.cfg.chrome_path))?;

        let endpoint = format!("http://127.0.0.1:{port}");
        let browser = CdpBrowser::attach(&account.address, &endpoint, self.page_options())
            .with_process(child);

        if let Err(e) = self.prepare(&browser).await {
            if let Err(close_err) = browser.close().await {
                warn!(error = %close_err, "Failed to stop browser");
            }
            return Err(e);
        }
        info!(port, profile = %profile, headless = self.cfg.headless, "Browser launched");
        Ok(Arc::new(browser))
    }

    async fn prepare(&self, browser: &CdpBrowser) -> Result<()> {
        self.wait_ready(browser).await?;
        if let Some(auth) = configured_proxy(&self.cfg)?.and_then(|p| p.auth) {
            let username = auth.username.clone();
            browser
                .authenticate_proxy(auth)
                .await
                .with_context(|| format!("Cannot enable proxy authentication for {username}"))?;
        }
        Ok(())
    }

    async fn wait_ready(&self, browser: &CdpBrowser) -> Result<()> {
        let bound = self.startup_timeout();
        let deadline = Instant::now() + bound;
        loop {
            match browser.version().await {
                Ok(version) => {
                    debug!(version = %version, "DevTools ready");
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => {
                    bail!(
                        "Browser did not expose DevTools at {} within {bound:?}: {e}",
                        browser.endpoint()
                    );
                }
                Err(_) => sleep(READY_POLL).await,
            }
        }
    }
}

#[async_trait]
impl SessionProvider for ChromeLauncher {
    async fn open(&self, account: &Account) -> Result<Arc<dyn Session>> {
        match account.cdp_endpoint.as_deref() {
            Some(endpoint) => self.attach(account, endpoint).await,
            None => self.launch(account).await,
        }
    }
}

/// Command line for one account's browser.
pub fn launch_args(cfg: &BrowserConfig, profile_dir: &str, port: u16) -> Result<Vec<String>> {
    let ext = &cfg.extension_dir;
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={profile_dir}"),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        format!("--disable-extensions-except={ext}"),
        format!("--load-extension={ext}"),
        "--lang=en-US".to_string(),
    ];
    if cfg.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(proxy) = configured_proxy(cfg)? {
        args.push(format!("--proxy-server={}", proxy.server));
    }
    Ok(args)
}

/// A proxy URL split into the command-line part and its credentials.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    /// `scheme://host:port`
    pub server: String,
    pub auth: Option<ProxyAuth>,
}

fn configured_proxy(cfg: &BrowserConfig) -> Result<Option<ProxyServer>> {
    match cfg.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(raw) => proxy_server(raw).map(Some),
        None => Ok(None),
    }
}

/// Parse `[scheme://][user[:password]@]host[:port]`. The scheme defaults
/// to http; user info is percent-decoded.
pub fn proxy_server(raw: &str) -> Result<ProxyServer> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&with_scheme).with_context(|| format!("Invalid proxy URL: {raw}"))?;
    let host = url
        .host_str()
        .with_context(|| format!("Proxy URL has no host: {raw}"))?;
    let server = match url.port_or_known_default() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };

    let auth = if url.username().is_empty() {
        None
    } else {
        let username = urlencoding::decode(url.username())
            .context("Proxy username is not valid UTF-8")?
            .into_owned();
        let password = urlencoding::decode(url.password().unwrap_or_default())
            .context("Proxy password is not valid UTF-8")?
            .into_owned();
        Some(ProxyAuth {
            username,
            password: SecretString::new(password),
        })
    };
    Ok(ProxyServer { server, auth })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
