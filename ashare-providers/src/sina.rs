//! Sina adapter. Supports SH and SZ only; BJ is always an empty result. Does not
//! expose an adjustment-regime switch; the `adjust` argument is accepted but ignored.

use std::time::Duration;

use async_trait::async_trait;
use ashare_core::{market_of, normalize_code, AshareError, DailyPriceRow, Market, SymbolRow, HS300_INDEX_CODE};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::adapter::ProviderAdapter;

const PROVIDER: &str = "sina";

fn sina_symbol(stock_code: &str) -> String {
    let full = normalize_code(stock_code);
    let pure = full.split('.').next().unwrap_or(&full);
    match market_of(&full) {
        Market::Sh => format!("sh{pure}"),
        _ => format!("sz{pure}"),
    }
}

#[derive(Debug, Deserialize)]
struct SinaDailyEntry {
    date: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    preclose: Option<String>,
    #[serde(default)]
    volume: Option<String>,
}

/// Vendor integration backed by Sina's public daily-history endpoint.
pub struct SinaAdapter {
    client: reqwest::Client,
}

impl SinaAdapter {
    /// Build a new adapter with the given per-call timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client builds with a timeout"),
        }
    }

    fn parse_entry(&self, stock_code: &str, entry: &SinaDailyEntry, source: &'static str) -> Option<DailyPriceRow> {
        let trade_date = NaiveDate::parse_from_str(&entry.date, "%Y-%m-%d").ok()?;
        let open: f64 = entry.open.parse().ok()?;
        let high: f64 = entry.high.parse().ok()?;
        let low: f64 = entry.low.parse().ok()?;
        let close: f64 = entry.close.parse().ok()?;
        let volume: f64 = entry
            .volume
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let prev_close: Option<f64> = entry.preclose.as_deref().and_then(|v| v.parse().ok());
        let change_pct = DailyPriceRow::derive_change_pct(close, prev_close);
        Some(DailyPriceRow {
            stock_code: stock_code.to_string(),
            trade_date,
            open,
            close,
            high,
            low,
            change_pct,
            volume,
            source: source.to_string(),
            is_final: false,
        })
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        stock_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let resp = self
            .client
            .get("https://quotes.sina.cn/cn/api/jsonp_v2.php/var/CN_MarketDataService.getKLineData")
            .query(&[
                ("symbol", symbol),
                ("scale", "240"),
                ("ma", "no"),
                ("datalen", "5000"),
            ])
            .send()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?
            .json::<Vec<SinaDailyEntry>>()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?;

        let mut rows: Vec<DailyPriceRow> = resp
            .iter()
            .filter_map(|e| self.parse_entry(stock_code, e, "sina.daily"))
            .filter(|r| r.trade_date >= start_date && r.trade_date <= end_date)
            .collect();
        rows.sort_by_key(|r| r.trade_date);
        Ok(rows)
    }
}

#[async_trait]
impl ProviderAdapter for SinaAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports_market(&self, market: Market) -> bool {
        matches!(market, Market::Sh | Market::Sz)
    }

    async fn fetch_symbols(&self) -> Result<Vec<SymbolRow>, AshareError> {
        // Sina has no reliable standalone full-market symbol-dictionary endpoint
        // either; the failover loop relies on another provider for `fetch_symbols`.
        Ok(Vec::new())
    }

    async fn fetch_stock_history(
        &self,
        stock_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        _adjust: &str,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let full_code = normalize_code(stock_code);
        if !self.supports_market(market_of(&full_code)) {
            return Ok(Vec::new());
        }
        let symbol = sina_symbol(&full_code);
        self.fetch_daily(&symbol, &full_code, start_date, end_date).await
    }

    async fn fetch_index_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let mut rows = self
            .fetch_daily("sh000300", HS300_INDEX_CODE, start_date, end_date)
            .await?;
        for row in &mut rows {
            if row.change_pct.is_none() {
                row.change_pct = Some(0.0);
            }
        }
        Ok(rows)
    }
}
