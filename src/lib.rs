//! PHOENIX TRADER: multi-account sell automation for the Phoenix exchange
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod browser;
pub mod config;
pub mod engine;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
