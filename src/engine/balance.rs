//! Balance extraction and order sizing.
//!
//! The exchange shows the transferable balance as a `Max: <number>` label.
//! Anything else (absent label, missing prefix, unparseable number) reads
//! as `Unreadable`, which the executor treats exactly like a zero balance.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::{BalanceReading, TradeRequest};

use super::EngineConfig;

const MAX_PREFIX: &str = "Max:";

/// Parse the text of the max-balance label.
pub fn parse_max_label(text: &str) -> BalanceReading {
    let Some((_, rest)) = text.split_once(MAX_PREFIX) else {
        return BalanceReading::Unreadable(format!("no \"{MAX_PREFIX}\" in {text:?}"));
    };
    let number = rest.trim().replace(',', "");
    match parse_decimal(&number) {
        Some(v) if v >= Decimal::ZERO => BalanceReading::Available(v),
        Some(v) => BalanceReading::Unreadable(format!("negative balance {v}")),
        None => BalanceReading::Unreadable(format!("cannot parse {:?}", rest.trim())),
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Amount to type into the order-size field for a non-zero `available` balance.
///
/// An explicit request is capped at the balance. Without one, the default
/// asset sells the configured default amount (also capped) and any other
/// asset sells everything.
pub fn order_amount(request: &TradeRequest, available: Decimal, cfg: &EngineConfig) -> Decimal {
    match request.amount {
        Some(requested) => requested.min(available),
        None if request.asset == cfg.default_asset => cfg.default_sell_amount.min(available),
        None => available,
    }
}

/// Render an amount the way a user would type it.
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
