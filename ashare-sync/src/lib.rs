//! ashare-sync
//!
//! Multi-provider failover, per-provider retry with circuit breaker, and the
//! ingestion flows built on top: symbol sync, incremental daily sync, the
//! Pro-API prewarm path, full-history backfill, and realtime quotes.
//!
//! [`facade::SyncFacade`] is the one entry point external callers should hold;
//! [`service::SyncService`] and [`failover`] are exposed for composition and testing.
#![warn(missing_docs)]

/// Retry loop, failover loop, provider ordering, and per-provider mutex map.
pub mod failover;
/// The `SyncFacade`: status/probe/settings plus the ingestion entry points.
pub mod facade;
/// `SyncService`: the six orchestration operations.
pub mod service;

pub use facade::{StatusReport, SyncFacade};
pub use failover::{FailoverFailure, FailoverSuccess, FetchOutcome};
pub use service::{
    BackfillOptions, IncrementalOptions, RealtimeOutcome, SyncConfigPatch, SyncOutcome, SyncService,
};
