//! The `ProviderAdapter` contract shared by all four vendor adapters.

use async_trait::async_trait;
use ashare_core::{AshareError, DailyPriceRow, Market, RealtimeQuote, SymbolRow};
use chrono::NaiveDate;

/// One vendor integration. Identical contract across all four concrete adapters;
/// the Pro-API adapter additionally implements [`ProApiExt`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider name used in config, health-registry keys, and logs.
    fn name(&self) -> &'static str;

    /// Whether this adapter can serve the given market at all.
    ///
    /// The failover loop consults this before making any vendor call; an adapter
    /// asked for a market it does not support is skipped entirely rather than
    /// invoked and made to return an empty list itself.
    fn supports_market(&self, market: Market) -> bool;

    /// Fetch the full symbol dictionary known to this vendor. May return an empty list.
    async fn fetch_symbols(&self) -> Result<Vec<SymbolRow>, AshareError>;

    /// Fetch daily bars for one stock in `[start_date, end_date]`, ascending by date.
    ///
    /// Returns an empty list (not an error) when the vendor has no data in the
    /// window, e.g. the stock was suspended or the window predates its listing.
    async fn fetch_stock_history(
        &self,
        stock_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        adjust: &str,
    ) -> Result<Vec<DailyPriceRow>, AshareError>;

    /// Fetch HS300 index bars for `[start_date, end_date]`.
    async fn fetch_index_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError>;

    /// Best-effort realtime spot quote, for providers whose realtime path is a
    /// cached spot table filtered by code rather than a dedicated endpoint.
    ///
    /// Default implementation reports no quote available; Eastmoney-proxy,
    /// Tencent and Sina override this. Pro-API instead implements [`ProApiExt`],
    /// which has a richer three-endpoint fallback chain.
    async fn fetch_realtime_spot(
        &self,
        _stock_code: &str,
    ) -> Result<Option<RealtimeQuote>, AshareError> {
        Ok(None)
    }
}

/// Additional operations available only on the Pro-API adapter.
#[async_trait]
pub trait ProApiExt: ProviderAdapter {
    /// Fetch all A-share bars for one trade date in a single call (~5,000 rows).
    async fn fetch_daily_by_date(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError>;

    /// Fetch the latest intraday minute bar for one stock.
    async fn fetch_realtime_intraday(
        &self,
        stock_code: &str,
    ) -> Result<Option<RealtimeQuote>, AshareError>;
}
