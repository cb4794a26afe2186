//! Element selectors.
//!
//! Serialized to JSON for the in-page resolver (see `cdp::RESOLVER_JS`) and
//! rendered with `Display` as a stable, human-readable key for logs.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Selector {
    /// CSS selector.
    Css { value: String },
    /// Element text. `exact` matches the trimmed text exactly, otherwise a
    /// case-insensitive substring match.
    Text { value: String, exact: bool },
    /// ARIA role with an accessible name substring (`button` also matches `<button>`).
    Role { role: String, name: String },
    /// XPath expression.
    #[serde(rename = "xpath")]
    XPath { value: String },
    /// The `index`-th (0-based) match of `inner`.
    Nth { inner: Box<Selector>, index: usize },
}

impl Selector {
    pub fn css(value: &str) -> Self {
        Selector::Css { value: value.to_string() }
    }

    pub fn text(value: &str) -> Self {
        Selector::Text { value: value.to_string(), exact: false }
    }

    pub fn exact_text(value: &str) -> Self {
        Selector::Text { value: value.to_string(), exact: true }
    }

    pub fn button(name: &str) -> Self {
        Selector::Role { role: "button".to_string(), name: name.to_string() }
    }

    pub fn xpath(value: &str) -> Self {
        Selector::XPath { value: value.to_string() }
    }

    pub fn nth(self, index: usize) -> Self {
        Selector::Nth { inner: Box::new(self), index }
    }

    /// Parse the compact string form used in config files:
    /// `text="Exact"`, `text=substring`, `role=button[name="Connect Wallet"]`,
    /// `xpath=//div`, leading `//` for XPath, an optional `>> nth=N` suffix,
    /// anything else is CSS.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((base, nth)) = raw.rsplit_once(">> nth=") {
            if let Ok(index) = nth.trim().parse::<usize>() {
                return Selector::parse(base).nth(index);
            }
        }
        if let Some(rest) = raw.strip_prefix("text=") {
            return match strip_quotes(rest) {
                Some(inner) => Selector::exact_text(inner),
                None => Selector::text(rest),
            };
        }
        if let Some(rest) = raw.strip_prefix("xpath=") {
            return Selector::xpath(rest);
        }
        if raw.starts_with("//") {
            return Selector::xpath(raw);
        }
        if let Some(rest) = raw.strip_prefix("role=") {
            if let Some((role, tail)) = rest.split_once("[name=") {
                let name = tail.strip_suffix(']').unwrap_or(tail);
                let name = strip_quotes(name).unwrap_or(name);
                return Selector::Role { role: role.to_string(), name: name.to_string() };
            }
            return Selector::Role { role: rest.to_string(), name: String::new() };
        }
        Selector::css(raw)
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"'))
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css { value } => write!(f, "{value}"),
            Selector::Text { value, exact: true } => write!(f, "text=\"{value}\""),
            Selector::Text { value, exact: false } => write!(f, "text={value}"),
            Selector::Role { role, name } => write!(f, "role={role}[name=\"{name}\"]"),
            Selector::XPath { value } => write!(f, "xpath={value}"),
            Selector::Nth { inner, index } => write!(f, "{inner} >> nth={index}"),
        }
    }
}
