//! Tencent adapter. Supports SH and SZ only; BJ is always an empty result.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ashare_core::{market_of, normalize_code, AshareError, DailyPriceRow, Market, SymbolRow, HS300_INDEX_CODE};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::adapter::ProviderAdapter;

const PROVIDER: &str = "tx";

/// `sh600000` / `sz000001` form Tencent's endpoints expect. Codes outside SH/SZ
/// (BJ, unknown) are returned as the bare pure code, matching the original
/// `to_tx_symbol` helper, though callers should never reach Tencent with those.
#[must_use]
pub fn to_tx_symbol(stock_code: &str) -> String {
    let full = normalize_code(stock_code);
    let pure = full.split('.').next().unwrap_or(&full);
    match market_of(&full) {
        Market::Sh => format!("sh{pure}"),
        Market::Sz => format!("sz{pure}"),
        _ => pure.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct FqklineResponse {
    data: HashMap<String, FqklineSymbolData>,
}

#[derive(Debug, Deserialize)]
struct FqklineSymbolData {
    #[serde(default)]
    day: Vec<Vec<String>>,
}

/// Vendor integration backed by Tencent's public kline endpoint.
pub struct TencentAdapter {
    client: reqwest::Client,
}

impl TencentAdapter {
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

    fn parse_day_row(&self, stock_code: &str, day: &[String], source: &'static str) -> Option<DailyPriceRow> {
        // [date, open, close, high, low, volume]
        let trade_date = NaiveDate::parse_from_str(day.first()?, "%Y-%m-%d").ok()?;
        let open: f64 = day.get(1)?.parse().ok()?;
        let close: f64 = day.get(2)?.parse().ok()?;
        let high: f64 = day.get(3)?.parse().ok()?;
        let low: f64 = day.get(4)?.parse().ok()?;
        let volume: f64 = day.get(5).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let change_pct = if open != 0.0 {
            Some(((close - open) / open * 100.0 * 10_000.0).round() / 10_000.0)
        } else {
            None
        };
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

    async fn fetch_kline(
        &self,
        tx_symbol: &str,
        stock_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let param = format!(
            "{tx_symbol},day,{},{},640,qfq",
            start_date.format("%Y-%m-%d"),
            end_date.format("%Y-%m-%d")
        );
        let resp = self
            .client
            .get("https://web.ifzq.gtimg.cn/appstock/app/fqkline/get")
            .query(&[("param", param.as_str())])
            .send()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?
            .json::<FqklineResponse>()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?;

        let Some(symbol_data) = resp.data.get(tx_symbol) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<DailyPriceRow> = symbol_data
            .day
            .iter()
            .filter_map(|day| self.parse_day_row(stock_code, day, "tx.fqkline"))
            .filter(|r| r.trade_date >= start_date && r.trade_date <= end_date)
            .collect();
        rows.sort_by_key(|r| r.trade_date);
        Ok(rows)
    }
}

#[async_trait]
impl ProviderAdapter for TencentAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports_market(&self, market: Market) -> bool {
        matches!(market, Market::Sh | Market::Sz)
    }

    async fn fetch_symbols(&self) -> Result<Vec<SymbolRow>, AshareError> {
        // Tencent has no reliable standalone full-market symbol-dictionary
        // endpoint; the failover loop falls back to other providers for
        // `fetch_symbols` and this adapter is listed mainly for history/realtime.
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
        let tx_symbol = to_tx_symbol(&full_code);
        self.fetch_kline(&tx_symbol, &full_code, start_date, end_date).await
    }

    async fn fetch_index_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        self.fetch_kline("sh000300", HS300_INDEX_CODE, start_date, end_date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_tx_symbol_prefixes_by_market() {
        assert_eq!(to_tx_symbol("600000.SH"), "sh600000");
        assert_eq!(to_tx_symbol("000001.SZ"), "sz000001");
        assert_eq!(to_tx_symbol("600000"), "sh600000");
    }

    #[test]
    fn to_tx_symbol_leaves_bj_bare() {
        assert_eq!(to_tx_symbol("920368.BJ"), "920368");
    }

    #[test]
    fn tencent_adapter_does_not_support_bj() {
        let adapter = TencentAdapter::new(std::time::Duration::from_secs(5));
        assert!(!adapter.supports_market(Market::Bj));
        assert!(adapter.supports_market(Market::Sh));
        assert!(adapter.supports_market(Market::Sz));
    }

    #[test]
    fn parse_day_row_derives_change_pct_from_open_close() {
        let adapter = TencentAdapter::new(std::time::Duration::from_secs(5));
        let day = vec![
            "2024-01-02".to_string(),
            "10.00".to_string(),
            "10.50".to_string(),
            "10.60".to_string(),
            "9.90".to_string(),
            "1000000".to_string(),
        ];
        let row = adapter.parse_day_row("600000.SH", &day, "tx.fqkline").unwrap();
        assert_eq!(row.change_pct, Some(5.0));
    }
}
