//! ashare-mock
//!
//! A single configurable [`MockAdapter`] standing in for any of the four vendor
//! adapters in tests: builder methods queue canned rows or a forced failure per
//! capability, so `ashare-sync`'s failover and retry tests can script exactly
//! which provider wins, fails, or returns an empty window without touching the
//! network.
#![warn(missing_docs)]

use std::sync::Mutex;

use async_trait::async_trait;
use ashare_core::{AshareError, DailyPriceRow, Market, RealtimeQuote, SymbolRow};
use ashare_providers::{ProApiExt, ProviderAdapter};
use chrono::NaiveDate;

#[derive(Default)]
struct MockState {
    symbols: Vec<SymbolRow>,
    symbols_err: Option<String>,
    history: Vec<DailyPriceRow>,
    history_err: Option<String>,
    index_history: Vec<DailyPriceRow>,
    index_history_err: Option<String>,
    realtime: Option<RealtimeQuote>,
    realtime_err: Option<String>,
    daily_by_date: Vec<DailyPriceRow>,
    daily_by_date_err: Option<String>,
    markets: Option<Vec<Market>>,
    call_count: u32,
}

/// A scriptable [`ProviderAdapter`] and [`ProApiExt`] double.
///
/// Every `with_*`/`failing_*` builder queues a fixed response or error for that
/// capability; calls after the queue is consumed keep returning the last entry.
/// `failing_history("Connection aborted.RemoteDisconnected")` produces a
/// transport error whose message trips [`AshareError::is_fast_fail`], for tests
/// that need to exercise the fast-fail path specifically.
pub struct MockAdapter {
    name: &'static str,
    state: Mutex<MockState>,
}

impl MockAdapter {
    /// Build a mock with `name`, supporting every market and returning empty/no-op
    /// results until configured otherwise.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Restrict `supports_market` to the given set instead of all four markets.
    #[must_use]
    pub fn with_markets(self, markets: Vec<Market>) -> Self {
        self.state.lock().unwrap().markets = Some(markets);
        self
    }

    /// Queue a successful `fetch_symbols` result.
    #[must_use]
    pub fn with_symbols(self, rows: Vec<SymbolRow>) -> Self {
        self.state.lock().unwrap().symbols = rows;
        self
    }

    /// Force `fetch_symbols` to fail with a transport error carrying `msg`.
    #[must_use]
    pub fn failing_symbols(self, msg: impl Into<String>) -> Self {
        self.state.lock().unwrap().symbols_err = Some(msg.into());
        self
    }

    /// Queue a successful `fetch_stock_history` result.
    #[must_use]
    pub fn with_history(self, rows: Vec<DailyPriceRow>) -> Self {
        self.state.lock().unwrap().history = rows;
        self
    }

    /// Force `fetch_stock_history` to fail with a transport error carrying `msg`.
    #[must_use]
    pub fn failing_history(self, msg: impl Into<String>) -> Self {
        self.state.lock().unwrap().history_err = Some(msg.into());
        self
    }

    /// Queue a successful `fetch_index_history` result.
    #[must_use]
    pub fn with_index_history(self, rows: Vec<DailyPriceRow>) -> Self {
        self.state.lock().unwrap().index_history = rows;
        self
    }

    /// Force `fetch_index_history` to fail with a transport error carrying `msg`.
    #[must_use]
    pub fn failing_index_history(self, msg: impl Into<String>) -> Self {
        self.state.lock().unwrap().index_history_err = Some(msg.into());
        self
    }

    /// Queue a successful `fetch_realtime_spot` / `fetch_realtime_intraday` result.
    #[must_use]
    pub fn with_realtime(self, quote: RealtimeQuote) -> Self {
        self.state.lock().unwrap().realtime = Some(quote);
        self
    }

    /// Force the realtime path to fail with a transport error carrying `msg`.
    #[must_use]
    pub fn failing_realtime(self, msg: impl Into<String>) -> Self {
        self.state.lock().unwrap().realtime_err = Some(msg.into());
        self
    }

    /// Queue a successful `fetch_daily_by_date` result (Pro-API only).
    #[must_use]
    pub fn with_daily_by_date(self, rows: Vec<DailyPriceRow>) -> Self {
        self.state.lock().unwrap().daily_by_date = rows;
        self
    }

    /// Force `fetch_daily_by_date` to fail with a transport error carrying `msg`.
    #[must_use]
    pub fn failing_daily_by_date(self, msg: impl Into<String>) -> Self {
        self.state.lock().unwrap().daily_by_date_err = Some(msg.into());
        self
    }

    /// Number of calls made to any capability so far, for call-count assertions.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.state.lock().unwrap().call_count
    }

    fn tick(&self) {
        self.state.lock().unwrap().call_count += 1;
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports_market(&self, market: Market) -> bool {
        match &self.state.lock().unwrap().markets {
            Some(allowed) => allowed.contains(&market),
            None => true,
        }
    }

    async fn fetch_symbols(&self) -> Result<Vec<SymbolRow>, AshareError> {
        self.tick();
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.symbols_err {
            return Err(AshareError::transport(self.name, msg));
        }
        Ok(state.symbols.clone())
    }

    async fn fetch_stock_history(
        &self,
        _stock_code: &str,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
        _adjust: &str,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        self.tick();
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.history_err {
            return Err(AshareError::transport(self.name, msg));
        }
        Ok(state.history.clone())
    }

    async fn fetch_index_history(
        &self,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        self.tick();
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.index_history_err {
            return Err(AshareError::transport(self.name, msg));
        }
        Ok(state.index_history.clone())
    }

    async fn fetch_realtime_spot(&self, _stock_code: &str) -> Result<Option<RealtimeQuote>, AshareError> {
        self.tick();
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.realtime_err {
            return Err(AshareError::transport(self.name, msg));
        }
        Ok(state.realtime.clone())
    }
}

#[async_trait]
impl ProApiExt for MockAdapter {
    async fn fetch_daily_by_date(&self, _trade_date: NaiveDate) -> Result<Vec<DailyPriceRow>, AshareError> {
        self.tick();
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.daily_by_date_err {
            return Err(AshareError::transport(self.name, msg));
        }
        Ok(state.daily_by_date.clone())
    }

    async fn fetch_realtime_intraday(&self, stock_code: &str) -> Result<Option<RealtimeQuote>, AshareError> {
        self.fetch_realtime_spot(stock_code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_symbols_are_returned_once_configured() {
        let adapter = MockAdapter::new("eastmoney").with_symbols(vec![SymbolRow {
            stock_code: "600000.SH".to_string(),
            stock_name: "Pudong".to_string(),
            market: "SH".to_string(),
            source: "mock".to_string(),
        }]);
        let rows = adapter.fetch_symbols().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn failing_history_returns_transport_error() {
        let adapter = MockAdapter::new("sina").failing_history("boom");
        let err = adapter
            .fetch_stock_history("000001.SZ", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), "qfq")
            .await
            .unwrap_err();
        assert!(matches!(err, AshareError::Transport { .. }));
    }

    #[tokio::test]
    async fn market_restriction_is_honored() {
        let adapter = MockAdapter::new("tencent").with_markets(vec![Market::Sh, Market::Sz]);
        assert!(adapter.supports_market(Market::Sh));
        assert!(!adapter.supports_market(Market::Bj));
    }
}
