//! Eastmoney-proxy adapter. Supports all three markets (SH, SZ, BJ).

use std::time::Duration;

use async_trait::async_trait;
use ashare_core::{market_of, normalize_code, AshareError, DailyPriceRow, Market, SymbolRow, HS300_INDEX_CODE};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::adapter::ProviderAdapter;

const PROVIDER: &str = "eastmoney";

/// Eastmoney's market-board prefix used in the `secid` query param: `0` for SZ/BJ, `1` for SH.
fn secid_for(stock_code: &str) -> String {
    let pure = stock_code.split('.').next().unwrap_or(stock_code);
    match market_of(stock_code) {
        Market::Sh => format!("1.{pure}"),
        _ => format!("0.{pure}"),
    }
}

#[derive(Debug, Deserialize)]
struct ClistResponse {
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    diff: Vec<ClistEntry>,
}

#[derive(Debug, Deserialize)]
struct ClistEntry {
    /// Stock code, e.g. "600000".
    f12: String,
    /// Display name.
    f14: String,
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    klines: Vec<String>,
}

/// Vendor integration backed by Eastmoney's public quote endpoints.
pub struct EastmoneyAdapter {
    client: reqwest::Client,
}

impl EastmoneyAdapter {
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

    fn parse_kline_line(&self, stock_code: &str, line: &str, source: &'static str) -> Option<DailyPriceRow> {
        let fields: Vec<&str> = line.split(',').collect();
        // date,open,close,high,low,volume,amount,amplitude,change_pct,change,turnover
        let trade_date = NaiveDate::parse_from_str(fields.first()?, "%Y-%m-%d").ok()?;
        let open: f64 = fields.get(1)?.parse().ok()?;
        let close: f64 = fields.get(2)?.parse().ok()?;
        let high: f64 = fields.get(3)?.parse().ok()?;
        let low: f64 = fields.get(4)?.parse().ok()?;
        let volume: f64 = fields.get(5).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let change_pct = fields.get(8).and_then(|v| v.parse().ok());
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
}

#[async_trait]
impl ProviderAdapter for EastmoneyAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports_market(&self, _market: Market) -> bool {
        true
    }

    async fn fetch_symbols(&self) -> Result<Vec<SymbolRow>, AshareError> {
        let resp = self
            .client
            .get("https://82.push2.eastmoney.com/api/qt/clist/get")
            .query(&[
                ("pn", "1"),
                ("pz", "6000"),
                ("po", "1"),
                ("fs", "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048"),
                ("fields", "f12,f14"),
            ])
            .send()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?
            .json::<ClistResponse>()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?;

        let Some(data) = resp.data else {
            return Ok(Vec::new());
        };
        Ok(data
            .diff
            .into_iter()
            .filter(|e| !e.f12.is_empty() && !e.f14.is_empty())
            .map(|e| {
                let stock_code = normalize_code(&e.f12);
                let market = market_of(&stock_code).to_string();
                SymbolRow {
                    stock_code,
                    stock_name: e.f14,
                    market,
                    source: "eastmoney.clist".to_string(),
                }
            })
            .collect())
    }

    async fn fetch_stock_history(
        &self,
        stock_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        adjust: &str,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let full_code = normalize_code(stock_code);
        let fqt = match adjust {
            "qfq" => "1",
            "hfq" => "2",
            _ => "0",
        };
        let resp = self
            .client
            .get("https://push2his.eastmoney.com/api/qt/stock/kline/get")
            .query(&[
                ("secid", secid_for(&full_code)),
                ("klt", "101".to_string()),
                ("fqt", fqt.to_string()),
                ("beg", start_date.format("%Y%m%d").to_string()),
                ("end", end_date.format("%Y%m%d").to_string()),
                (
                    "fields2",
                    "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61".to_string(),
                ),
            ])
            .send()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?
            .json::<KlineResponse>()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?;

        let Some(data) = resp.data else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<DailyPriceRow> = data
            .klines
            .iter()
            .filter_map(|line| self.parse_kline_line(&full_code, line, "eastmoney.kline"))
            .filter(|r| r.trade_date >= start_date && r.trade_date <= end_date)
            .collect();
        rows.sort_by_key(|r| r.trade_date);
        Ok(rows)
    }

    async fn fetch_index_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let resp = self
            .client
            .get("https://push2his.eastmoney.com/api/qt/stock/kline/get")
            .query(&[
                ("secid", "1.000300"),
                ("klt", "101"),
                ("fqt", "0"),
                ("beg", &start_date.format("%Y%m%d").to_string()),
                ("end", &end_date.format("%Y%m%d").to_string()),
                ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"),
            ])
            .send()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?
            .json::<KlineResponse>()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?;

        let Some(data) = resp.data else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<DailyPriceRow> = data
            .klines
            .iter()
            .filter_map(|line| self.parse_kline_line(HS300_INDEX_CODE, line, "eastmoney.index_kline"))
            .filter(|r| r.trade_date >= start_date && r.trade_date <= end_date)
            .map(|mut r| {
                if r.change_pct.is_none() {
                    r.change_pct = Some(0.0);
                }
                r
            })
            .collect();
        rows.sort_by_key(|r| r.trade_date);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secid_picks_sh_board_for_sh_codes() {
        assert_eq!(secid_for("600000.SH"), "1.600000");
    }

    #[test]
    fn secid_picks_sz_board_for_sz_and_bj_codes() {
        assert_eq!(secid_for("000001.SZ"), "0.000001");
        assert_eq!(secid_for("920368.BJ"), "0.920368");
    }

    #[test]
    fn parse_kline_line_extracts_ohlc_and_change_pct() {
        let adapter = EastmoneyAdapter::new(Duration::from_secs(5));
        let row = adapter
            .parse_kline_line(
                "600000.SH",
                "2024-01-02,10.00,10.50,10.60,9.90,1000000,10500000,7.07,5.0,0.5,1.2",
                "eastmoney.kline",
            )
            .unwrap();
        assert_eq!(row.trade_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(row.open, 10.00);
        assert_eq!(row.close, 10.50);
        assert_eq!(row.change_pct, Some(5.0));
    }
}
