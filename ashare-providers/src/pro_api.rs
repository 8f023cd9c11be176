//! Pro-API adapter. Supports all three markets. Requires a credential token and
//! refuses construction if it looks obviously wrong (empty, or cookie-shaped).

use std::time::Duration;

use async_trait::async_trait;
use ashare_core::{normalize_code, AshareError, DailyPriceRow, Market, RealtimeQuote, SymbolRow, HS300_INDEX_CODE};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{ProApiExt, ProviderAdapter};

const PROVIDER: &str = "pro_api";
const ENDPOINT: &str = "https://api.tushare.pro";

#[derive(Serialize)]
struct CallRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: Value,
    fields: &'a str,
}

#[derive(Deserialize)]
struct CallResponse {
    code: i64,
    msg: Option<String>,
    data: Option<CallData>,
}

#[derive(Deserialize)]
struct CallData {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

impl CallData {
    fn rows(&self) -> Vec<std::collections::HashMap<&str, &Value>> {
        self.items
            .iter()
            .map(|item| {
                self.fields
                    .iter()
                    .map(String::as_str)
                    .zip(item.iter())
                    .collect()
            })
            .collect()
    }
}

fn value_as_f64(v: Option<&&Value>) -> Option<f64> {
    v.and_then(|v| v.as_f64())
}

fn value_as_str(v: Option<&&Value>) -> Option<String> {
    v.and_then(|v| v.as_str()).map(str::to_string)
}

/// Vendor integration backed by Tushare Pro's JSON-RPC-style HTTP API.
pub struct ProApiAdapter {
    client: reqwest::Client,
    token: String,
}

impl ProApiAdapter {
    /// Build a new adapter, validating the token shape.
    ///
    /// # Errors
    /// Returns [`AshareError::Init`] if `token` is empty or matches a cookie-like
    /// heuristic (`uid=`, `username=`, or a `;`) rather than a bona fide API token.
    pub fn new(token: &str, timeout: Duration) -> Result<Self, AshareError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AshareError::init(PROVIDER, "tushare token invalid"));
        }
        if token.contains("uid=") || token.contains("username=") || token.contains(';') {
            return Err(AshareError::init(PROVIDER, "tushare token invalid"));
        }
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client builds with a timeout"),
            token: token.to_string(),
        })
    }

    async fn call(&self, api_name: &str, params: Value, fields: &str) -> Result<CallData, AshareError> {
        let body = CallRequest {
            api_name,
            token: &self.token,
            params,
            fields,
        };
        let resp = self
            .client
            .post(ENDPOINT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?
            .json::<CallResponse>()
            .await
            .map_err(|e| AshareError::transport(PROVIDER, e))?;
        if resp.code != 0 {
            return Err(AshareError::transport(
                PROVIDER,
                resp.msg.unwrap_or_else(|| "pro_api request failed".to_string()),
            ));
        }
        Ok(resp.data.unwrap_or(CallData {
            fields: Vec::new(),
            items: Vec::new(),
        }))
    }

    fn row_to_bar(row: &std::collections::HashMap<&str, &Value>, stock_code: Option<&str>) -> Option<DailyPriceRow> {
        let raw_date = value_as_str(row.get("trade_date"))?;
        let trade_date = NaiveDate::parse_from_str(&raw_date, "%Y%m%d").ok()?;
        let stock_code = stock_code
            .map(str::to_string)
            .or_else(|| value_as_str(row.get("ts_code")))?;
        Some(DailyPriceRow {
            stock_code,
            trade_date,
            open: value_as_f64(row.get("open"))?,
            close: value_as_f64(row.get("close"))?,
            high: value_as_f64(row.get("high"))?,
            low: value_as_f64(row.get("low"))?,
            change_pct: value_as_f64(row.get("pct_chg")),
            volume: value_as_f64(row.get("vol")).unwrap_or(0.0),
            source: "pro_api.daily".to_string(),
            is_final: false,
        })
    }
}

#[async_trait]
impl ProviderAdapter for ProApiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports_market(&self, _market: Market) -> bool {
        true
    }

    async fn fetch_symbols(&self) -> Result<Vec<SymbolRow>, AshareError> {
        let data = self
            .call(
                "stock_basic",
                serde_json::json!({"exchange": "", "list_status": "L"}),
                "ts_code,symbol,name,market",
            )
            .await?;
        Ok(data
            .rows()
            .iter()
            .filter_map(|row| {
                let ts_code = value_as_str(row.get("ts_code"))?;
                let name = value_as_str(row.get("name"))?;
                if ts_code.is_empty() || name.is_empty() {
                    return None;
                }
                let stock_code = normalize_code(&ts_code);
                let market = value_as_str(row.get("market")).unwrap_or_default();
                Some(SymbolRow {
                    stock_code,
                    stock_name: name,
                    market,
                    source: "pro_api.stock_basic".to_string(),
                })
            })
            .collect())
    }

    async fn fetch_stock_history(
        &self,
        stock_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        _adjust: &str,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let full_code = normalize_code(stock_code);
        let data = self
            .call(
                "daily",
                serde_json::json!({
                    "ts_code": full_code,
                    "start_date": start_date.format("%Y%m%d").to_string(),
                    "end_date": end_date.format("%Y%m%d").to_string(),
                }),
                "ts_code,trade_date,open,close,high,low,vol,pct_chg",
            )
            .await?;
        let mut rows: Vec<DailyPriceRow> = data
            .rows()
            .iter()
            .filter_map(|row| Self::row_to_bar(row, Some(&full_code)))
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
        let data = self
            .call(
                "index_daily",
                serde_json::json!({
                    "ts_code": HS300_INDEX_CODE,
                    "start_date": start_date.format("%Y%m%d").to_string(),
                    "end_date": end_date.format("%Y%m%d").to_string(),
                }),
                "ts_code,trade_date,open,close,high,low,vol,pct_chg",
            )
            .await?;
        let mut rows: Vec<DailyPriceRow> = data
            .rows()
            .iter()
            .filter_map(|row| Self::row_to_bar(row, Some(HS300_INDEX_CODE)))
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

    async fn fetch_realtime_spot(&self, stock_code: &str) -> Result<Option<RealtimeQuote>, AshareError> {
        // Three endpoints tried in order; first non-null price wins.
        for (api_name, source) in [
            ("rt_min", "pro_api.rt_min"),
            ("stk_mins", "pro_api.stk_mins"),
            ("realtime_quote", "pro_api.realtime_quote"),
        ] {
            let full_code = normalize_code(stock_code);
            let data = self
                .call(
                    api_name,
                    serde_json::json!({"ts_code": full_code}),
                    "ts_code,price,open,pre_close,trade_time",
                )
                .await?;
            let Some(row) = data.rows().into_iter().next() else {
                continue;
            };
            let Some(price) = value_as_f64(row.get("price")) else {
                continue;
            };
            return Ok(Some(RealtimeQuote {
                stock_code: full_code,
                price,
                pre_close: value_as_f64(row.get("pre_close")),
                open: value_as_f64(row.get("open")),
                quote_time: value_as_str(row.get("trade_time")).unwrap_or_default(),
                provider_used: PROVIDER.to_string(),
                source: source.to_string(),
            }));
        }
        Ok(None)
    }
}

#[async_trait]
impl ProApiExt for ProApiAdapter {
    async fn fetch_daily_by_date(&self, trade_date: NaiveDate) -> Result<Vec<DailyPriceRow>, AshareError> {
        let data = self
            .call(
                "daily",
                serde_json::json!({"trade_date": trade_date.format("%Y%m%d").to_string()}),
                "ts_code,trade_date,open,close,high,low,vol,pct_chg",
            )
            .await?;
        Ok(data
            .rows()
            .iter()
            .filter_map(|row| Self::row_to_bar(row, None))
            .collect())
    }

    async fn fetch_realtime_intraday(&self, stock_code: &str) -> Result<Option<RealtimeQuote>, AshareError> {
        let full_code = normalize_code(stock_code);
        let data = self
            .call(
                "stk_mins",
                serde_json::json!({"ts_code": full_code, "freq": "1min"}),
                "ts_code,close,trade_time",
            )
            .await?;
        Ok(data.rows().into_iter().next().and_then(|row| {
            let price = value_as_f64(row.get("close"))?;
            Some(RealtimeQuote {
                stock_code: full_code.clone(),
                price,
                pre_close: None,
                open: None,
                quote_time: value_as_str(row.get("trade_time")).unwrap_or_default(),
                provider_used: PROVIDER.to_string(),
                source: "pro_api.stk_mins".to_string(),
            })
        }))
    }
}
