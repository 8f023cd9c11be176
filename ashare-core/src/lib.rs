//! ashare-core
//!
//! Domain types, error model, configuration, and clock utilities shared by every
//! crate in the A-share market-data ingestion workspace.
//!
//! - `model`: symbol/bar/quote/sync-state value types and the `normalize_code` canonicalizer.
//! - `error`: the workspace-wide `AshareError` type.
//! - `config`: typed `SyncConfig`, TOML-backed with environment overrides.
//! - `clock`: the Beijing fixed-offset wall clock.
#![warn(missing_docs)]

/// Beijing fixed-offset wall clock.
pub mod clock;
/// Typed configuration, TOML-backed with environment overrides.
pub mod config;
/// Workspace-wide error type.
pub mod error;
/// Domain value types and the stock-code canonicalizer.
pub mod model;

pub use config::SyncConfig;
pub use error::AshareError;
pub use model::{
    market_of, normalize_code, BootstrapStatus, DailyPriceRow, Market, RealtimeQuote, SymbolRow,
    SyncState, HS300_INDEX_CODE,
};
