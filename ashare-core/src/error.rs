//! Shared error type for the ingestion workspace.
//!
//! Mirrors the taxonomy in the ingestion core's error handling design: transport,
//! rate-limit, init, market-unsupported, store, and the aggregate "every provider
//! failed" case. `EmptyWindow` is deliberately not a variant here — it is not an
//! error, and is carried by [`crate::failover::FetchOutcome`] in `ashare-sync` instead.

use std::fmt;

/// The workspace-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AshareError {
    /// Network, timeout, or protocol-decode failure talking to a vendor.
    #[error("transport error calling {provider}: {msg}")]
    Transport {
        /// Provider name, e.g. `"eastmoney"`.
        provider: &'static str,
        /// Vendor-supplied or transport-layer message.
        msg: String,
    },

    /// The vendor rejected the call with a rate-limit signal. Fast-fail, no retry.
    #[error("rate limited by {provider}: {msg}")]
    RateLimited {
        /// Provider name.
        provider: &'static str,
        /// Vendor-supplied message.
        msg: String,
    },

    /// Provider adapter construction failed (e.g. missing/invalid credential).
    #[error("provider {provider} failed to initialize: {msg}")]
    Init {
        /// Provider name.
        provider: &'static str,
        /// Reason the constructor refused to build the adapter.
        msg: String,
    },

    /// Routing asked a provider for a market it does not support.
    ///
    /// This should never reach a caller; it is recorded in the health registry and
    /// the provider is skipped before any vendor call is made.
    #[error("{market} market not supported by {provider}")]
    MarketUnsupported {
        /// Provider name.
        provider: &'static str,
        /// Market tag, e.g. `"BJ"`.
        market: String,
    },

    /// Caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Requested entity does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was not found.
        what: String,
    },

    /// The persistent bar store failed to read or write.
    #[error("store error: {0}")]
    Store(String),

    /// Every provider in the failover order failed for a single operation.
    #[error("all providers failed: {op}, failed_providers={failed_providers:?}")]
    AllProvidersFailed {
        /// The operation that was attempted (e.g. `"fetch_stock_history"`).
        op: &'static str,
        /// Providers that were tried, in order.
        failed_providers: Vec<String>,
    },

    /// Catch-all for conditions that don't fit another variant.
    #[error("{0}")]
    Other(String),
}

impl AshareError {
    /// Build a [`AshareError::Transport`] variant.
    pub fn transport(provider: &'static str, msg: impl fmt::Display) -> Self {
        Self::Transport {
            provider,
            msg: msg.to_string(),
        }
    }

    /// Build a [`AshareError::RateLimited`] variant.
    pub fn rate_limited(provider: &'static str, msg: impl fmt::Display) -> Self {
        Self::RateLimited {
            provider,
            msg: msg.to_string(),
        }
    }

    /// Build a [`AshareError::Init`] variant.
    pub fn init(provider: &'static str, msg: impl fmt::Display) -> Self {
        Self::Init {
            provider,
            msg: msg.to_string(),
        }
    }

    /// Build a [`AshareError::MarketUnsupported`] variant.
    pub fn market_unsupported(provider: &'static str, market: impl Into<String>) -> Self {
        Self::MarketUnsupported {
            provider,
            market: market.into(),
        }
    }

    /// Build a [`AshareError::NotFound`] variant.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Build a [`AshareError::Store`] variant.
    pub fn store(msg: impl fmt::Display) -> Self {
        Self::Store(msg.to_string())
    }

    /// Build a [`AshareError::AllProvidersFailed`] variant.
    pub fn all_providers_failed(op: &'static str, failed_providers: Vec<String>) -> Self {
        Self::AllProvidersFailed {
            op,
            failed_providers,
        }
    }

    /// `true` for errors that should bypass the per-provider retry loop.
    ///
    /// Matches the fast-fail phrases from the retry discipline: disconnects the
    /// vendor initiated, and rate-limit rejections. Retrying either just burns the
    /// remaining attempt budget for no benefit.
    #[must_use]
    pub fn is_fast_fail(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport { msg, .. } => {
                let needle = msg.to_ascii_lowercase();
                const FAST_FAIL_PHRASES: &[&str] = &[
                    "remotedisconnected",
                    "connection aborted",
                    "connection reset",
                    "remote end closed",
                ];
                FAST_FAIL_PHRASES.iter().any(|p| needle.contains(p))
            }
            _ => false,
        }
    }
}
