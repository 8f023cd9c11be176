//! ashare-providers
//!
//! One adapter per vendor, all implementing the same narrow [`ProviderAdapter`]
//! contract so the failover loop in `ashare-sync` can treat them uniformly.
#![warn(missing_docs)]

/// The `ProviderAdapter` / `ProApiExt` traits.
pub mod adapter;
/// Eastmoney-proxy adapter (all markets).
pub mod eastmoney;
/// Pro-API adapter (all markets, token-gated).
pub mod pro_api;
/// Sina adapter (SH/SZ only).
pub mod sina;
/// Tencent adapter (SH/SZ only).
pub mod tencent;

pub use adapter::{ProApiExt, ProviderAdapter};
pub use eastmoney::EastmoneyAdapter;
pub use pro_api::ProApiAdapter;
pub use sina::SinaAdapter;
pub use tencent::TencentAdapter;
