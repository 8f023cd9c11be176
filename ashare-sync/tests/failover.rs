//! End-to-end failover/routing scenarios driven against `ashare-mock` fakes and a
//! real temp-file store, one test per scenario named in the design doc's
//! testable-properties section.
//!
//! Every test here uses provider names unique to itself. The health registry is
//! process-global (by design, see `ashare-health`), and `cargo test` runs every
//! `#[tokio::test]` in this file concurrently in one process — reusing a name
//! across tests that expect different circuit states would be a race, not a bug
//! in the code under test.

use std::sync::Arc;

use ashare_core::{DailyPriceRow, Market, RealtimeQuote, SymbolRow, SyncConfig};
use ashare_mock::MockAdapter;
use ashare_providers::ProviderAdapter;
use ashare_store::BarStore;
use ashare_sync::{IncrementalOptions, SyncService};
use tempfile::tempdir;

fn open_store() -> (tempfile::TempDir, Arc<BarStore>) {
    let dir = tempdir().unwrap();
    let store = Arc::new(BarStore::open(dir.path().join("market.db")).unwrap());
    (dir, store)
}

fn config(providers: &[&str]) -> SyncConfig {
    let mut c = SyncConfig::default();
    c.providers = providers.iter().map(|s| s.to_string()).collect();
    c.realtime_providers = c.providers.clone();
    c.sync_retry_max = 1;
    c.sync_retry_backoff_seconds = 0.0;
    c
}

fn bar(code: &str, date: chrono::NaiveDate) -> DailyPriceRow {
    DailyPriceRow {
        stock_code: code.to_string(),
        trade_date: date,
        open: 10.0,
        close: 10.1,
        high: 10.2,
        low: 9.9,
        change_pct: Some(1.0),
        volume: 1000.0,
        source: "mock".to_string(),
        is_final: true,
    }
}

trait TapClose {
    fn tap_close(self, close: f64) -> Self;
}

impl TapClose for DailyPriceRow {
    fn tap_close(mut self, close: f64) -> Self {
        self.close = close;
        self
    }
}

#[tokio::test]
async fn scenario_1_failover_on_disconnect() {
    let (_dir, store) = open_store();
    let yesterday = ashare_core::clock::now_beijing().date_naive() - chrono::Duration::days(1);
    let eastmoney = Arc::new(
        MockAdapter::new("s1_eastmoney").failing_history("Connection aborted... RemoteDisconnected"),
    );
    let pro_api = Arc::new(MockAdapter::new("s1_pro_api").with_history(vec![bar("000001.SZ", yesterday)]));
    let service = SyncService::new(
        config(&["s1_eastmoney", "s1_pro_api"]),
        store,
        vec![eastmoney as Arc<dyn ProviderAdapter>, pro_api],
        None,
    );

    let outcome = service
        .sync_daily_incremental(IncrementalOptions {
            symbols: Some(vec!["000001.SZ".to_string()]),
            include_index: false,
            sync_equities: false,
            history_days: Some(30),
            ..Default::default()
        })
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.provider_used, "s1_pro_api");
    assert!(outcome.provider_switched);
    assert!(outcome.failed_providers.contains(&"s1_eastmoney".to_string()));
    assert_eq!(outcome.upserted, 1);
}

#[tokio::test]
async fn scenario_2_total_failure() {
    let (_dir, store) = open_store();
    let eastmoney = Arc::new(MockAdapter::new("s2_eastmoney").failing_history("provider unavailable"));
    let pro_api = Arc::new(MockAdapter::new("s2_pro_api").failing_history("provider unavailable"));
    let service = SyncService::new(
        config(&["s2_eastmoney", "s2_pro_api"]),
        store,
        vec![eastmoney as Arc<dyn ProviderAdapter>, pro_api],
        None,
    );

    let outcome = service
        .sync_daily_incremental(IncrementalOptions {
            symbols: Some(vec!["000001.SZ".to_string()]),
            include_index: false,
            sync_equities: false,
            ..Default::default()
        })
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors, 1);
    assert!(outcome.failed_providers.contains(&"s2_eastmoney".to_string()));
    assert!(outcome.failed_providers.contains(&"s2_pro_api".to_string()));
    assert!(outcome.message.unwrap().contains("all providers failed"));
}

#[tokio::test]
async fn scenario_3_empty_is_not_failure() {
    let (_dir, store) = open_store();
    let eastmoney = Arc::new(MockAdapter::new("s3_eastmoney"));
    let pro_api = Arc::new(MockAdapter::new("s3_pro_api"));
    let service = SyncService::new(
        config(&["s3_eastmoney", "s3_pro_api"]),
        store,
        vec![eastmoney as Arc<dyn ProviderAdapter>, pro_api],
        None,
    );

    let outcome = service
        .sync_daily_incremental(IncrementalOptions {
            symbols: Some(vec!["600673.SH".to_string()]),
            include_index: false,
            sync_equities: false,
            ..Default::default()
        })
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.errors, 0);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.upserted, 0);
}

#[tokio::test]
async fn scenario_4_pro_api_init_guard() {
    let (_dir, store) = open_store();
    let mut cfg = config(&["pro_api"]);
    cfg.pro_api_token = String::new();
    let service = SyncService::from_config(cfg, store);

    let outcome = service.sync_symbols().await;
    assert!(!outcome.success);
    assert_eq!(outcome.failed_providers, vec!["pro_api".to_string()]);

    let snapshot = service.snapshot_all();
    let pro_api_snapshot = snapshot.iter().find(|s| s.provider == "pro_api").unwrap();
    assert!(!pro_api_snapshot.routable);
    assert!(pro_api_snapshot.disabled_reason.as_deref().unwrap_or("").starts_with("init_failed"));
}

#[tokio::test]
async fn scenario_5_bj_routing_skips_tencent_and_sina() {
    let (_dir, store) = open_store();
    let tencent = Arc::new(MockAdapter::new("s5_tencent").with_markets(vec![Market::Sh, Market::Sz]));
    let sina = Arc::new(MockAdapter::new("s5_sina").with_markets(vec![Market::Sh, Market::Sz]));
    let eastmoney = Arc::new(MockAdapter::new("s5_eastmoney").with_history(vec![bar(
        "920368.BJ",
        ashare_core::clock::now_beijing().date_naive(),
    )]));
    let pro_api = Arc::new(MockAdapter::new("s5_pro_api"));
    let service = SyncService::new(
        config(&["s5_tencent", "s5_sina", "s5_eastmoney", "s5_pro_api"]),
        store,
        vec![
            tencent.clone() as Arc<dyn ProviderAdapter>,
            sina.clone(),
            eastmoney,
            pro_api,
        ],
        None,
    );

    let outcome = service
        .sync_daily_incremental(IncrementalOptions {
            symbols: Some(vec!["920368.BJ".to_string()]),
            include_index: false,
            sync_equities: false,
            ..Default::default()
        })
        .await;
    assert!(outcome.success);
    assert_eq!(tencent.call_count(), 0);
    assert_eq!(sina.call_count(), 0);

    let snapshot = service.snapshot_all();
    let tencent_snapshot = snapshot.iter().find(|s| s.provider == "s5_tencent").unwrap();
    let sina_snapshot = snapshot.iter().find(|s| s.provider == "s5_sina").unwrap();
    assert!(!tencent_snapshot.routable);
    assert_eq!(tencent_snapshot.disabled_reason.as_deref(), Some("market_unsupported:BJ"));
    assert!(!sina_snapshot.routable);
    assert_eq!(sina_snapshot.disabled_reason.as_deref(), Some("market_unsupported:BJ"));
}

#[tokio::test]
async fn scenario_6_realtime_pre_close_backfill() {
    let (_dir, store) = open_store();
    store
        .upsert_daily_prices(
            &[bar("600000.SH", ashare_core::clock::now_beijing().date_naive() - chrono::Duration::days(2))
                .tap_close(36.2)],
            "qfq",
        )
        .unwrap();
    let pro_api = Arc::new(MockAdapter::new("s6_pro_api").with_realtime(RealtimeQuote {
        stock_code: "600000.SH".to_string(),
        price: 39.06,
        pre_close: None,
        open: Some(38.0),
        quote_time: "2024-01-03 10:30:00".to_string(),
        provider_used: "s6_pro_api".to_string(),
        source: "pro_api.rt_min".to_string(),
    }));
    let service = SyncService::new(config(&["s6_pro_api"]), store, vec![pro_api], None);

    let outcome = service.fetch_realtime_price("600000.SH").await;
    assert!(outcome.success);
    assert_eq!(outcome.price, Some(39.06));
    assert_eq!(outcome.pre_close, Some(36.2));
    assert_eq!(outcome.source.as_deref(), Some("pro_api.rt_min"));
}

#[tokio::test]
async fn boundary_sync_symbols_fails_with_pro_api_alone_on_cookie_like_token() {
    let (_dir, store) = open_store();
    let mut cfg = config(&["pro_api"]);
    cfg.pro_api_token = "uid=123;token=abc".to_string();
    let service = SyncService::from_config(cfg, store);
    let outcome = service.sync_symbols().await;
    assert!(!outcome.success);
    assert_eq!(outcome.failed_providers, vec!["pro_api".to_string()]);
}

#[tokio::test]
async fn boundary_history_days_one_still_spans_two_calendar_days() {
    let (_dir, store) = open_store();
    let today = ashare_core::clock::now_beijing().date_naive();
    let eastmoney = Arc::new(MockAdapter::new("bnd_eastmoney").with_history(vec![bar("000001.SZ", today)]));
    let service = SyncService::new(config(&["bnd_eastmoney"]), store, vec![eastmoney], None);
    let outcome = service
        .sync_daily_incremental(IncrementalOptions {
            symbols: Some(vec!["000001.SZ".to_string()]),
            include_index: false,
            sync_equities: false,
            history_days: Some(1),
            ..Default::default()
        })
        .await;
    assert!(outcome.success);
    let span = (outcome.end_date.unwrap() - outcome.start_date.unwrap()).num_days();
    assert!(span >= 2);
}

#[tokio::test]
async fn symbol_row_round_trips_through_sync_symbols() {
    let (_dir, store) = open_store();
    let eastmoney = Arc::new(MockAdapter::new("rt_eastmoney").with_symbols(vec![SymbolRow {
        stock_code: "600000.SH".to_string(),
        stock_name: "Pudong Development Bank".to_string(),
        market: "SH".to_string(),
        source: "mock".to_string(),
    }]));
    let service = SyncService::new(config(&["rt_eastmoney"]), store, vec![eastmoney], None);
    let outcome = service.sync_symbols().await;
    assert!(outcome.success);
    assert_eq!(outcome.upserted, 1);
}
