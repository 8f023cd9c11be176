//! ashare-store
//!
//! A single-file SQLite store for the symbol dictionary and daily bars, with
//! finality-ratchet upsert semantics: a non-final write can never overwrite a
//! final one. Synchronous on purpose — every method is a direct blocking
//! `rusqlite` call, and this crate pulls in no async runtime at all. Callers
//! on an async executor (the Sync Service included) call these methods
//! directly from async methods today; they are short single-statement SQLite
//! calls against a local file, not network I/O, so the blocking cost per call
//! is small, but a caller driving a latency-sensitive executor should still
//! wrap them in `tokio::task::spawn_blocking` at its own boundary.
#![warn(missing_docs)]

mod store;

pub use store::{BarStore, StoreStatus, SyncStateUpdate, TradeDateCoverage};
