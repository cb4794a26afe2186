//! PHOENIX TRADER: multi-account sell automation for the Phoenix exchange
//!
//! Entry point. Loads configuration, initialises structured logging,
//! launches one browser per account, and runs connect→sell for every
//! account concurrently. Exit status follows `run.fail_on_account_error`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use phoenix_trader::browser::launch::ChromeLauncher;
use phoenix_trader::config::AppConfig;
use phoenix_trader::engine::orchestrator::Orchestrator;
use phoenix_trader::types::RunReport;
use phoenix_trader::wallet::ProfileWalletCheck;

const BANNER: &str = r#"
 ___ _  _  ___  ___ _  _ _____  __
| _ \ || |/ _ \| __| \| |_ _\ \/ /
|  _/ __ | (_) | _|| .` || | >  <
|_| |_||_|\___/|___|_|\_|___/_/\_\

  Multi-account market sell automation
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "phoenix-trader")]
#[command(about = "Sell configured assets on Phoenix for every configured wallet")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Only run the account with this address
    #[arg(short, long)]
    account: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load(&cli.config.to_string_lossy())?;
    init_logging(cli.verbose);

    println!("{BANNER}");

    let mut accounts = cfg.accounts();
    if let Some(only) = cli.account.as_deref() {
        accounts.retain(|a| a.address == only);
    }
    if accounts.is_empty() {
        warn!("No accounts to process");
        return Ok(());
    }

    info!(
        accounts = accounts.len(),
        max_concurrent = cfg.run.max_concurrent_accounts,
        headless = cfg.browser.headless,
        fast = cfg.trade.fast,
        sequence = ?cfg.trade.sequence.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        "PHOENIX TRADER starting up"
    );

    let orchestrator = Orchestrator::new(
        Arc::new(ChromeLauncher::new(cfg.browser.clone())),
        Arc::new(ProfileWalletCheck::new(&cfg.wallet)),
        cfg.engine(),
        cfg.trade.sequence.clone(),
    )
    .with_max_concurrent(cfg.run.max_concurrent_accounts)
    .keep_browser_on_failure(cfg.run.keep_browser_on_failure);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let report = tokio::select! {
        report = orchestrator.run(accounts) => report,
        _ = &mut shutdown => {
            warn!("Shutdown signal received. Launched browsers are left running.");
            std::process::exit(130);
        }
    };

    log_run_report(&report);

    if cfg.run.fail_on_account_error && report.any_failed() {
        error!(failed = report.failed(), "Run finished with failed accounts");
        std::process::exit(1);
    }
    Ok(())
}

fn log_run_report(report: &RunReport) {
    for account in &report.accounts {
        let elapsed_secs = account.elapsed().num_seconds();
        if account.is_failed() {
            error!(address = %account.address, stage = %account.stage, elapsed_secs, "{account}");
        } else {
            info!(address = %account.address, elapsed_secs, "{account}");
        }
    }

    let (success, failed, skipped, aborted) = report.trade_counts();
    info!(
        accounts = report.accounts.len(),
        accounts_ok = report.succeeded(),
        accounts_failed = report.failed(),
        trades_success = success,
        trades_failed = failed,
        trades_skipped = skipped,
        trades_aborted = aborted,
        "All tasks completed."
    );
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "phoenix_trader=debug" } else { "phoenix_trader=info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let json_logging = std::env::var("PHOENIX_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
