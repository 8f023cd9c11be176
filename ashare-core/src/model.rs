//! Value types shared by every crate in the workspace: symbol dictionary rows, daily
//! bars, realtime quotes, and the sync-state cursor, plus the stock-code canonicalizer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Exchange a stock code trades on, inferred by [`normalize_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// Shanghai Stock Exchange.
    Sh,
    /// Shenzhen Stock Exchange.
    Sz,
    /// Beijing Stock Exchange.
    Bj,
    /// Suffix could not be inferred.
    Unk,
}

impl Market {
    /// The canonical two-letter tag used as the `.SH`/`.SZ`/`.BJ` suffix.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Sh => "SH",
            Self::Sz => "SZ",
            Self::Bj => "BJ",
            Self::Unk => "UNK",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// The HS300 benchmark index code, stored alongside equities with the same schema.
pub const HS300_INDEX_CODE: &str = "000300.SH";

/// Canonicalize a stock code to `DDDDDD.MM` form.
///
/// Accepts either a bare 6-digit code or an already-suffixed one. A code already
/// containing a `.` is upper-cased and passed through unchanged (aside from case);
/// a bare code has its market inferred from the leading digit: `6` → SH, `0`/`3` →
/// SZ, `4`/`8`/`9` → BJ, anything else → `UNK`.
///
/// Idempotent: `normalize_code(normalize_code(x)) == normalize_code(x)`.
#[must_use]
pub fn normalize_code(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.contains('.') {
        return trimmed.to_uppercase();
    }
    let market = match trimmed.chars().next() {
        Some('6') => Market::Sh,
        Some('0' | '3') => Market::Sz,
        Some('4' | '8' | '9') => Market::Bj,
        _ => Market::Unk,
    };
    format!("{trimmed}.{}", market.tag())
}

/// Infer the [`Market`] of an already-normalized (or bare) stock code.
#[must_use]
pub fn market_of(code: &str) -> Market {
    let normalized = normalize_code(code);
    match normalized.rsplit('.').next() {
        Some("SH") => Market::Sh,
        Some("SZ") => Market::Sz,
        Some("BJ") => Market::Bj,
        _ => Market::Unk,
    }
}

/// One row of the symbol dictionary. Unique by `stock_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRow {
    /// Canonical stock code, e.g. `"000001.SZ"`.
    pub stock_code: String,
    /// Vendor-supplied display name.
    pub stock_name: String,
    /// Market tag as reported by the provider (may predate normalization).
    pub market: String,
    /// Name of the provider this row was sourced from.
    pub source: String,
}

/// One OHLC-V daily bar. Unique by `(stock_code, trade_date, adjust)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPriceRow {
    /// Canonical stock code.
    pub stock_code: String,
    /// Trading day this bar covers.
    pub trade_date: NaiveDate,
    /// Opening price.
    pub open: f64,
    /// Closing price.
    pub close: f64,
    /// Intraday high.
    pub high: f64,
    /// Intraday low.
    pub low: f64,
    /// Percent change from previous close, rounded to 4 decimals. `None` when no
    /// vendor field was available and `prev_close` could not be derived.
    pub change_pct: Option<f64>,
    /// Traded volume (vendor units, typically shares).
    pub volume: f64,
    /// Provider this bar was sourced from.
    pub source: String,
    /// Whether this bar is asserted final (will not change further).
    pub is_final: bool,
}

impl DailyPriceRow {
    /// Derive `change_pct` from close and previous close, rounded to 4 decimals.
    ///
    /// Returns `None` if `prev_close` is zero or absent, matching vendors that
    /// supply only open/close/prior-close and no ready-made percentage field.
    #[must_use]
    pub fn derive_change_pct(close: f64, prev_close: Option<f64>) -> Option<f64> {
        let prev_close = prev_close?;
        if prev_close == 0.0 {
            return None;
        }
        let pct = (close - prev_close) / prev_close * 100.0;
        Some((pct * 10_000.0).round() / 10_000.0)
    }
}

/// A single realtime quote, the payload half of `fetch_realtime_price`'s envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeQuote {
    /// Canonical stock code.
    pub stock_code: String,
    /// Last traded price.
    pub price: f64,
    /// Previous close, backfilled from the store when no vendor supplies it.
    pub pre_close: Option<f64>,
    /// Today's opening price, if the vendor supplied one.
    pub open: Option<f64>,
    /// Vendor-reported quote timestamp, Beijing time, `YYYY-MM-DD HH:MM:SS`.
    pub quote_time: String,
    /// Name of the provider that ultimately served this quote.
    pub provider_used: String,
    /// Fine-grained source tag, e.g. `"pro_api.rt_min"`.
    pub source: String,
}

/// Bootstrap cursor status for [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatus {
    /// No backfill has ever run.
    Idle,
    /// A backfill is currently in progress.
    Running,
    /// A backfill was cooperatively stopped; the cursor is preserved.
    Stopped,
    /// A backfill completed with zero per-symbol errors.
    Done,
    /// A backfill completed but logged at least one per-symbol error.
    DoneWithErrors,
}

impl Default for BootstrapStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Singleton sync cursor row (`id = 1` in the store).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Wall-clock time of the last successful `fetch_symbols`.
    pub last_symbols_sync_at: Option<String>,
    /// Wall-clock time of the last `sync_daily_incremental` call.
    pub last_incremental_sync_at: Option<String>,
    /// Wall-clock time of the last `backfill_history_full` call.
    pub last_backfill_sync_at: Option<String>,
    /// Most recent trade date asserted final via `finalize_today_after_close`.
    pub last_finalized_trade_date: Option<String>,
    /// Resume point for `backfill_history_full`, cleared on completion.
    pub bootstrap_cursor_symbol: Option<String>,
    /// Current backfill status.
    pub bootstrap_status: BootstrapStatus,
    /// Last error message recorded by any sync operation.
    pub last_error: Option<String>,
    /// Wall-clock time this row was last mutated.
    pub updated_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_code_infers_sh() {
        assert_eq!(normalize_code("600000"), "600000.SH");
    }

    #[test]
    fn normalize_code_infers_sz() {
        assert_eq!(normalize_code("000001"), "000001.SZ");
        assert_eq!(normalize_code("300750"), "300750.SZ");
    }

    #[test]
    fn normalize_code_infers_bj() {
        assert_eq!(normalize_code("920368"), "920368.BJ");
        assert_eq!(normalize_code("430047"), "430047.BJ");
        assert_eq!(normalize_code("830799"), "830799.BJ");
    }

    #[test]
    fn normalize_code_passes_through_suffixed() {
        assert_eq!(normalize_code("600000.sh"), "600000.SH");
        assert_eq!(normalize_code("600000.SH"), "600000.SH");
    }

    #[test]
    fn normalize_code_unknown_suffix() {
        assert_eq!(normalize_code("abcdef"), "abcdef.UNK");
    }

    #[test]
    fn normalize_code_is_idempotent() {
        for code in ["600000", "000001.sz", "920368", "xyz"] {
            let once = normalize_code(code);
            let twice = normalize_code(&once);
            assert_eq!(once, twice);
        }
    }

    proptest::proptest! {
        #[test]
        fn normalize_code_is_idempotent_over_arbitrary_alnum_input(code in "[a-zA-Z0-9]{1,12}") {
            let once = normalize_code(&code);
            let twice = normalize_code(&once);
            proptest::prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalize_code_always_yields_two_dot_separated_parts(code in "[a-zA-Z0-9]{1,12}") {
            let normalized = normalize_code(&code);
            proptest::prop_assert_eq!(normalized.matches('.').count(), 1);
        }
    }

    #[test]
    fn derive_change_pct_rounds_to_four_decimals() {
        let pct = DailyPriceRow::derive_change_pct(10.12345, Some(10.0)).unwrap();
        assert_eq!(pct, 1.2345);
    }

    #[test]
    fn derive_change_pct_none_when_prev_close_zero() {
        assert_eq!(DailyPriceRow::derive_change_pct(10.0, Some(0.0)), None);
    }

    #[test]
    fn derive_change_pct_none_when_missing() {
        assert_eq!(DailyPriceRow::derive_change_pct(10.0, None), None);
    }
}
