//! The Sync Service: the six orchestration operations, composing the retry loop,
//! failover loop, circuit breaker, and per-symbol cooldown from [`crate::failover`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use ashare_core::{
    clock, market_of, normalize_code, AshareError, BootstrapStatus, DailyPriceRow, Market,
    SyncConfig,
};
use ashare_health::ProviderHealthRegistry;
use ashare_providers::{
    EastmoneyAdapter, ProApiAdapter, ProApiExt, ProviderAdapter, SinaAdapter, TencentAdapter,
};
use ashare_store::{BarStore, StoreStatus, SyncStateUpdate};
use chrono::NaiveDate;

use crate::failover::{
    call_with_retry, ordered_providers, record_market_unsupported, run_failover, FailoverFailure,
    FetchOutcome, ProviderMutexes,
};

const INCREMENTAL_PROGRESS_EVERY: usize = 200;

/// HTTP timeout used for every adapter built by [`SyncService::from_config`].
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a Pro-API construction failure latches `init_failed:<msg>` for.
/// Nothing re-probes construction later in the process's life, so this is
/// effectively "until the process restarts with a corrected token".
const INIT_FAILED_DISABLE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Return envelope shared by every sync operation except the realtime quote path.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Overall success. `false` means the operation stopped early or every
    /// provider exhausted for some unit of work.
    pub success: bool,
    /// Human-readable failure detail, present only when `success` is `false`.
    pub message: Option<String>,
    /// Rows written to the store.
    pub upserted: u64,
    /// Units of work (symbols or days) that ended in a terminal failure.
    pub errors: u64,
    /// Units of work skipped: cooldown suppression or an empty vendor window.
    pub skipped: u64,
    /// Units of work considered.
    pub symbols: u64,
    /// Window start, when applicable.
    pub start_date: Option<NaiveDate>,
    /// Window end, when applicable.
    pub end_date: Option<NaiveDate>,
    /// Whether today's bar was written as final.
    pub today_final: bool,
    /// Provider that served the last (or only) request, when applicable.
    pub provider_used: String,
    /// `true` if at least one provider was tried and rejected before success.
    pub provider_switched: bool,
    /// Providers tried and rejected.
    pub failed_providers: Vec<String>,
}

/// Inputs to [`SyncService::sync_daily_incremental`].
#[derive(Debug, Clone)]
pub struct IncrementalOptions {
    /// Window size in days; defaults to the configured `incremental_history_days`.
    pub history_days: Option<i64>,
    /// Symbols to sync; defaults to every symbol known to the store.
    pub symbols: Option<Vec<String>>,
    /// Whether to also sync the HS300 index bar.
    pub include_index: bool,
    /// Whether today's bar should be asserted final, subject to the market-closed check.
    pub finalize_today: bool,
    /// Whether to sync the symbol dictionary first if the store has none.
    pub sync_equities: bool,
}

impl Default for IncrementalOptions {
    fn default() -> Self {
        Self {
            history_days: None,
            symbols: None,
            include_index: true,
            finalize_today: false,
            sync_equities: true,
        }
    }
}

/// Inputs to [`SyncService::backfill_history_full`].
#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    /// Resume from `sync_state.bootstrap_cursor_symbol` if present in the symbol list.
    pub resume: bool,
    /// Progress-log cadence override, in symbols.
    pub batch_size: Option<usize>,
    /// Cap on the number of symbols processed this call.
    pub symbol_limit: Option<usize>,
    /// Progress-log cadence override, in symbols (alias honored if `batch_size` is absent).
    pub progress_every: Option<usize>,
}

/// Return envelope for [`SyncService::fetch_realtime_price`].
#[derive(Debug, Clone, Default)]
pub struct RealtimeOutcome {
    /// Whether a quote was found.
    pub success: bool,
    /// Canonical stock code.
    pub stock_code: String,
    /// Last traded price.
    pub price: Option<f64>,
    /// Previous close, backfilled from the store if no vendor supplied one.
    pub pre_close: Option<f64>,
    /// Opening price, if the vendor supplied one.
    pub open: Option<f64>,
    /// Vendor-reported quote timestamp.
    pub quote_time: Option<String>,
    /// Provider that ultimately served the quote.
    pub provider_used: Option<String>,
    /// Sub-path within the provider that served the quote, e.g. `pro_api.rt_min`.
    pub provider_path: Option<String>,
    /// Same as `provider_path`; kept as its own field to match the return envelope shape.
    pub source: Option<String>,
    /// Providers tried and rejected before success, or all of them on failure.
    pub failed_providers: Vec<String>,
}

/// Runtime-adjustable subset of [`SyncConfig`], applied via [`SyncService::update_settings`].
///
/// `db_path` and `pro_api_token` are deliberately excluded: the store is already
/// open and the Pro-API adapter already constructed by the time a `SyncService`
/// exists, so neither can be changed without a restart.
#[derive(Debug, Clone, Default)]
pub struct SyncConfigPatch {
    /// New value for [`SyncConfig::enabled`].
    pub enabled: Option<bool>,
    /// New value for [`SyncConfig::providers`].
    pub providers: Option<Vec<String>>,
    /// New value for [`SyncConfig::realtime_providers`].
    pub realtime_providers: Option<Vec<String>>,
    /// New value for [`SyncConfig::provider_failover_enabled`].
    pub provider_failover_enabled: Option<bool>,
    /// New value for [`SyncConfig::realtime_provider_failover_enabled`].
    pub realtime_provider_failover_enabled: Option<bool>,
    /// New value for [`SyncConfig::provider_circuit_breaker_seconds`].
    pub provider_circuit_breaker_seconds: Option<f64>,
    /// New value for [`SyncConfig::sync_retry_max`].
    pub sync_retry_max: Option<u32>,
    /// New value for [`SyncConfig::sync_retry_backoff_seconds`].
    pub sync_retry_backoff_seconds: Option<f64>,
    /// New value for [`SyncConfig::sync_failure_cooldown_seconds`].
    pub sync_failure_cooldown_seconds: Option<f64>,
    /// New value for [`SyncConfig::incremental_history_days`].
    pub incremental_history_days: Option<i64>,
    /// New value for [`SyncConfig::bootstrap_batch_size`].
    pub bootstrap_batch_size: Option<usize>,
    /// New value for [`SyncConfig::close_finalize_time`].
    pub close_finalize_time: Option<String>,
}

fn now_str() -> String {
    clock::format_beijing(clock::now_beijing())
}

/// Orchestrates provider adapters, the bar store, and the process-global health
/// registry into the six public ingestion operations.
pub struct SyncService {
    config: RwLock<SyncConfig>,
    store: Arc<BarStore>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    pro_api_ext: Option<Arc<dyn ProApiExt>>,
    provider_mutexes: ProviderMutexes,
    symbol_cooldowns: Mutex<HashMap<String, Instant>>,
}

impl SyncService {
    /// Build a new service. `pro_api_ext`, if present, is also registered as a
    /// plain [`ProviderAdapter`] via supertrait coercion so it participates in
    /// the ordinary history/symbols failover path alongside the other vendors.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        store: Arc<BarStore>,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        pro_api_ext: Option<Arc<dyn ProApiExt>>,
    ) -> Self {
        let mut map = HashMap::new();
        for adapter in adapters {
            map.insert(adapter.name().to_string(), adapter);
        }
        if let Some(pro_api) = &pro_api_ext {
            let generic: Arc<dyn ProviderAdapter> = pro_api.clone();
            map.entry(generic.name().to_string()).or_insert(generic);
        }
        Self {
            config: RwLock::new(config),
            store,
            adapters: map,
            pro_api_ext,
            provider_mutexes: ProviderMutexes::new(),
            symbol_cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Build a service wired to the three always-available vendor adapters plus
    /// Pro-API, constructed from `config.pro_api_token`. If the token is empty or
    /// cookie-shaped, `ProApiAdapter::new` returns [`AshareError::Init`]; that case
    /// is caught here, latches `"init_failed:<msg>"` on the process-global health
    /// registry for the `"pro_api"` provider, and omits it from both the adapter
    /// set and the returned service's Pro-API extension slot rather than
    /// propagating the error, so the other three vendors still work.
    #[must_use]
    pub fn from_config(config: SyncConfig, store: Arc<BarStore>) -> Self {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(EastmoneyAdapter::new(DEFAULT_PROVIDER_TIMEOUT)),
            Arc::new(TencentAdapter::new(DEFAULT_PROVIDER_TIMEOUT)),
            Arc::new(SinaAdapter::new(DEFAULT_PROVIDER_TIMEOUT)),
        ];
        let pro_api_ext: Option<Arc<dyn ProApiExt>> =
            match ProApiAdapter::new(&config.pro_api_token, DEFAULT_PROVIDER_TIMEOUT) {
                Ok(adapter) => Some(Arc::new(adapter)),
                Err(AshareError::Init { provider, msg }) => {
                    ashare_health::registry().set_disabled(
                        provider,
                        format!("init_failed:{msg}"),
                        Instant::now() + INIT_FAILED_DISABLE,
                    );
                    None
                }
                Err(_) => None,
            };
        Self::new(config, store, adapters, pro_api_ext)
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.config.read().unwrap().clone()
    }

    /// Apply a partial configuration update.
    ///
    /// # Errors
    /// Returns [`AshareError::InvalidArg`] if `patch.close_finalize_time` does not parse as `HH:MM`.
    pub fn update_settings(&self, patch: SyncConfigPatch) -> Result<(), AshareError> {
        if let Some(raw) = &patch.close_finalize_time {
            if clock::parse_close_time(raw).is_none() {
                return Err(AshareError::InvalidArg(format!(
                    "close_finalize_time {raw:?} is not HH:MM"
                )));
            }
        }
        let mut config = self.config.write().unwrap();
        if let Some(v) = patch.enabled {
            config.enabled = v;
        }
        if let Some(v) = patch.providers {
            config.providers = v;
        }
        if let Some(v) = patch.realtime_providers {
            config.realtime_providers = v;
        }
        if let Some(v) = patch.provider_failover_enabled {
            config.provider_failover_enabled = v;
        }
        if let Some(v) = patch.realtime_provider_failover_enabled {
            config.realtime_provider_failover_enabled = v;
        }
        if let Some(v) = patch.provider_circuit_breaker_seconds {
            config.provider_circuit_breaker_seconds = v;
        }
        if let Some(v) = patch.sync_retry_max {
            config.sync_retry_max = v;
        }
        if let Some(v) = patch.sync_retry_backoff_seconds {
            config.sync_retry_backoff_seconds = v;
        }
        if let Some(v) = patch.sync_failure_cooldown_seconds {
            config.sync_failure_cooldown_seconds = v;
        }
        if let Some(v) = patch.incremental_history_days {
            config.incremental_history_days = v;
        }
        if let Some(v) = patch.bootstrap_batch_size {
            config.bootstrap_batch_size = v;
        }
        if let Some(v) = patch.close_finalize_time {
            config.close_finalize_time = v;
        }
        Ok(())
    }

    /// Routability snapshot for every configured adapter.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<ashare_health::ProviderSnapshot> {
        let registry = ashare_health::registry();
        self.adapters.keys().map(|name| registry.snapshot(name)).collect()
    }

    /// Store counters, for the facade's `status` method.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn store_status(&self) -> Result<StoreStatus, AshareError> {
        self.store.get_status()
    }

    fn is_cooling_down(&self, stock_code: &str) -> bool {
        self.symbol_cooldowns
            .lock()
            .unwrap()
            .get(stock_code)
            .is_some_and(|until| *until > Instant::now())
    }

    fn set_cooldown(&self, stock_code: &str, seconds: f64) {
        self.symbol_cooldowns
            .lock()
            .unwrap()
            .insert(stock_code.to_string(), Instant::now() + Duration::from_secs_f64(seconds));
    }

    fn clear_cooldown(&self, stock_code: &str) {
        self.symbol_cooldowns.lock().unwrap().remove(stock_code);
    }

    fn routable_for_market(&self, order: &[String], market: Market, op: &'static str, circuit_breaker_seconds: f64) -> Vec<String> {
        let registry = ashare_health::registry();
        order
            .iter()
            .filter(|name| match self.adapters.get(*name) {
                Some(adapter) if adapter.supports_market(market) => true,
                Some(_) => {
                    record_market_unsupported(registry, name, op, market.tag(), circuit_breaker_seconds);
                    false
                }
                None => false,
            })
            .cloned()
            .collect()
    }

    async fn fetch_history_via_failover(
        &self,
        provider_order: &[String],
        op: &'static str,
        config: &SyncConfig,
        stock_code: Option<&str>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<crate::failover::FailoverSuccess<Vec<DailyPriceRow>>, FailoverFailure> {
        let registry = ashare_health::registry();
        run_failover(
            registry,
            provider_order,
            op,
            config.provider_circuit_breaker_seconds,
            config.provider_failover_enabled,
            |provider| {
                let adapter = self.adapters.get(provider).cloned();
                let mutex = self.provider_mutexes.get(provider);
                let retry_max = config.sync_retry_max;
                let backoff = config.sync_retry_backoff_seconds;
                let adjust = config.adjust.clone();
                let stock_code = stock_code.map(str::to_string);
                async move {
                    let Some(adapter) = adapter else {
                        return FetchOutcome::Failed(AshareError::not_found(provider));
                    };
                    let result = call_with_retry(&mutex, retry_max, backoff, || {
                        let adapter = adapter.clone();
                        let adjust = adjust.clone();
                        let stock_code = stock_code.clone();
                        async move {
                            match &stock_code {
                                Some(code) => adapter.fetch_stock_history(code, start_date, end_date, &adjust).await,
                                None => adapter.fetch_index_history(start_date, end_date).await,
                            }
                        }
                    })
                    .await;
                    match result {
                        Ok(rows) if rows.is_empty() => FetchOutcome::EmptyWindow,
                        Ok(rows) => FetchOutcome::Ok(rows),
                        Err(e) => FetchOutcome::Failed(e),
                    }
                }
            },
        )
        .await
    }

    /// Sync the full symbol dictionary via the ordinary history-provider failover order.
    pub async fn sync_symbols(&self) -> SyncOutcome {
        let config = self.config();
        if !config.enabled {
            return SyncOutcome { success: true, ..Default::default() };
        }
        let order = ordered_providers(&config.providers, false);
        let registry = ashare_health::registry();
        let result = run_failover(
            registry,
            &order,
            "fetch_symbols",
            config.provider_circuit_breaker_seconds,
            config.provider_failover_enabled,
            |provider| {
                let adapter = self.adapters.get(provider).cloned();
                let mutex = self.provider_mutexes.get(provider);
                let retry_max = config.sync_retry_max;
                let backoff = config.sync_retry_backoff_seconds;
                async move {
                    let Some(adapter) = adapter else {
                        return FetchOutcome::Failed(AshareError::not_found(provider));
                    };
                    let result = call_with_retry(&mutex, retry_max, backoff, || {
                        let adapter = adapter.clone();
                        async move { adapter.fetch_symbols().await }
                    })
                    .await;
                    match result {
                        Ok(rows) if rows.is_empty() => FetchOutcome::EmptyWindow,
                        Ok(rows) => FetchOutcome::Ok(rows),
                        Err(e) => FetchOutcome::Failed(e),
                    }
                }
            },
        )
        .await;

        match result {
            Ok(success) => {
                let upserted = self.store.upsert_symbols(&success.value).unwrap_or(0) as u64;
                self.store.update_sync_state(&SyncStateUpdate {
                    last_symbols_sync_at: Some(now_str()),
                    ..Default::default()
                });
                SyncOutcome {
                    success: true,
                    upserted,
                    symbols: success.value.len() as u64,
                    provider_used: success.provider_used,
                    provider_switched: success.switched,
                    failed_providers: success.failed_providers,
                    ..Default::default()
                }
            }
            Err(failure) => {
                let failed_providers = match &failure {
                    FailoverFailure::AllFailed { failed_providers } => failed_providers.clone(),
                    FailoverFailure::AllEmpty => Vec::new(),
                };
                let err = failure.into_error("sync_symbols");
                self.store.update_sync_state(&SyncStateUpdate {
                    last_error: Some(Some(err.to_string())),
                    ..Default::default()
                });
                SyncOutcome {
                    success: false,
                    message: Some(err.to_string()),
                    failed_providers,
                    ..Default::default()
                }
            }
        }
    }

    /// The incremental-window ingestion flow. Aborts on the first symbol whose
    /// every provider fails with a real error; an empty window is a skip, not a failure.
    pub async fn sync_daily_incremental(&self, opts: IncrementalOptions) -> SyncOutcome {
        let config = self.config();
        if !config.enabled {
            return SyncOutcome { success: true, ..Default::default() };
        }

        let mut symbols = match opts.symbols {
            Some(s) => s,
            None if opts.sync_equities => {
                let known = self.store.get_symbol_codes().unwrap_or_default();
                if known.is_empty() {
                    let sym_result = self.sync_symbols().await;
                    if !sym_result.success {
                        return SyncOutcome {
                            success: false,
                            message: sym_result.message,
                            failed_providers: sym_result.failed_providers,
                            ..Default::default()
                        };
                    }
                    self.store.get_symbol_codes().unwrap_or_default()
                } else {
                    known
                }
            }
            None => Vec::new(),
        };
        symbols.sort();
        symbols.dedup();

        let history_days = opts.history_days.unwrap_or(config.incremental_history_days).max(2);
        let end_date = clock::now_beijing().date_naive();
        let start_date = end_date - chrono::Duration::days(history_days);
        let close_time = clock::parse_close_time(&config.close_finalize_time)
            .unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(15, 5, 0).unwrap());
        let today_final = opts.finalize_today && clock::market_closed_now(close_time);

        let mut upserted = 0u64;
        let mut errors = 0u64;
        let mut skipped = 0u64;
        let total = symbols.len();

        for (i, raw_code) in symbols.iter().enumerate() {
            let stock_code = normalize_code(raw_code);
            if self.is_cooling_down(&stock_code) {
                skipped += 1;
                continue;
            }
            let market = market_of(&stock_code);
            let order = ordered_providers(&config.providers, matches!(market, Market::Bj));
            let order = self.routable_for_market(&order, market, "fetch_stock_history", config.provider_circuit_breaker_seconds);

            let result = self
                .fetch_history_via_failover(&order, "fetch_stock_history", &config, Some(&stock_code), start_date, end_date)
                .await;

            match result {
                Ok(success) => {
                    let mut rows = success.value;
                    rows.retain(|r| r.trade_date >= start_date && r.trade_date <= end_date);
                    for r in &mut rows {
                        r.is_final = r.trade_date != end_date || today_final;
                    }
                    rows.sort_by_key(|r| r.trade_date);
                    match self.store.upsert_daily_prices(&rows, &config.adjust) {
                        Ok(n) => {
                            upserted += n as u64;
                            self.clear_cooldown(&stock_code);
                        }
                        Err(e) => {
                            errors += 1;
                            self.set_cooldown(&stock_code, config.sync_failure_cooldown_seconds);
                            self.store.update_sync_state(&SyncStateUpdate {
                                last_error: Some(Some(e.to_string())),
                                ..Default::default()
                            });
                            return SyncOutcome {
                                success: false,
                                upserted,
                                errors,
                                skipped,
                                symbols: (i + 1) as u64,
                                start_date: Some(start_date),
                                end_date: Some(end_date),
                                today_final,
                                message: Some(e.to_string()),
                                ..Default::default()
                            };
                        }
                    }
                }
                Err(FailoverFailure::AllEmpty) => {
                    skipped += 1;
                    self.clear_cooldown(&stock_code);
                }
                Err(failure @ FailoverFailure::AllFailed { .. }) => {
                    errors += 1;
                    self.set_cooldown(&stock_code, config.sync_failure_cooldown_seconds);
                    let failed_providers = match &failure {
                        FailoverFailure::AllFailed { failed_providers } => failed_providers.clone(),
                        FailoverFailure::AllEmpty => unreachable!(),
                    };
                    let err = failure.into_error("sync_daily_incremental");
                    self.store.update_sync_state(&SyncStateUpdate {
                        last_error: Some(Some(err.to_string())),
                        ..Default::default()
                    });
                    return SyncOutcome {
                        success: false,
                        upserted,
                        errors,
                        skipped,
                        symbols: (i + 1) as u64,
                        start_date: Some(start_date),
                        end_date: Some(end_date),
                        today_final,
                        message: Some(err.to_string()),
                        failed_providers,
                        ..Default::default()
                    };
                }
            }

            if (i + 1) % INCREMENTAL_PROGRESS_EVERY == 0 || i + 1 == total {
                tracing::info!(processed = i + 1, total, upserted, errors, skipped, "incremental sync progress");
            }
        }

        if opts.include_index {
            let order = ordered_providers(&config.providers, false);
            match self
                .fetch_history_via_failover(&order, "fetch_index_history", &config, None, start_date, end_date)
                .await
            {
                Ok(success) => {
                    let mut rows = success.value;
                    for r in &mut rows {
                        r.is_final = r.trade_date != end_date || today_final;
                        if r.change_pct.is_none() {
                            r.change_pct = Some(0.0);
                        }
                    }
                    if let Err(e) = self.store.upsert_daily_prices(&rows, &config.adjust) {
                        tracing::warn!(error = %e, "failed to persist HS300 index bars");
                    }
                }
                Err(failure) => {
                    tracing::warn!(reason = ?failure, "failed to sync HS300 index history");
                }
            }
        }

        let mut state_update = SyncStateUpdate {
            last_incremental_sync_at: Some(now_str()),
            ..Default::default()
        };
        if today_final {
            state_update.last_finalized_trade_date = Some(end_date.format("%Y-%m-%d").to_string());
        }
        self.store.update_sync_state(&state_update);

        SyncOutcome {
            success: true,
            upserted,
            errors,
            skipped,
            symbols: total as u64,
            start_date: Some(start_date),
            end_date: Some(end_date),
            today_final,
            ..Default::default()
        }
    }

    /// Assert today's bars final, after `market_closed_now()`. A thin wrapper around
    /// [`Self::sync_daily_incremental`] with `finalize_today` forced on — there is no
    /// separate algorithm, just the incremental flow's own today-rule applied once
    /// the market has closed for the day.
    pub async fn finalize_today_after_close(&self, opts: IncrementalOptions) -> SyncOutcome {
        self.sync_daily_incremental(IncrementalOptions {
            finalize_today: true,
            ..opts
        })
        .await
    }

    /// Prewarm flow: one `fetch_daily_by_date` call per trading day instead of one
    /// call per symbol. Requires the Pro-API adapter.
    pub async fn sync_daily_by_dates(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> SyncOutcome {
        let config = self.config();
        if !config.enabled {
            return SyncOutcome { success: true, ..Default::default() };
        }
        let Some(pro_api) = self.pro_api_ext.clone() else {
            return SyncOutcome {
                success: false,
                message: Some("pro_api adapter not configured".to_string()),
                ..Default::default()
            };
        };

        let wanted: std::collections::HashSet<String> = symbols.iter().map(|s| normalize_code(s)).collect();
        let yesterday = clock::now_beijing().date_naive() - chrono::Duration::days(1);
        let last_day = end_date.min(yesterday);
        let mutex = self.provider_mutexes.get(pro_api.name());

        let mut upserted = 0u64;
        let mut errors = 0u64;

        let mut day = start_date;
        while day <= last_day {
            let result = call_with_retry(&mutex, config.sync_retry_max, config.sync_retry_backoff_seconds, || {
                let pro_api = pro_api.clone();
                async move { pro_api.fetch_daily_by_date(day).await }
            })
            .await;
            match result {
                Ok(rows) => {
                    let mut filtered: Vec<DailyPriceRow> = rows
                        .into_iter()
                        .filter(|r| wanted.contains(&r.stock_code))
                        .map(|mut r| {
                            r.is_final = true;
                            r
                        })
                        .collect();
                    filtered.sort_by(|a, b| a.stock_code.cmp(&b.stock_code));
                    match self.store.upsert_daily_prices(&filtered, &config.adjust) {
                        Ok(n) => upserted += n as u64,
                        Err(e) => {
                            errors += 1;
                            tracing::warn!(day = %day, error = %e, "failed to persist daily batch");
                        }
                    }
                }
                Err(e) => {
                    errors += 1;
                    tracing::warn!(day = %day, error = %e, "failed to fetch daily batch, continuing");
                }
            }
            day += chrono::Duration::days(1);
        }

        let order = ordered_providers(&config.providers, false);
        if let Ok(success) = self
            .fetch_history_via_failover(&order, "fetch_index_history", &config, None, start_date, last_day)
            .await
        {
            let mut rows = success.value;
            for r in &mut rows {
                r.is_final = true;
                if r.change_pct.is_none() {
                    r.change_pct = Some(0.0);
                }
            }
            if let Ok(n) = self.store.upsert_daily_prices(&rows, &config.adjust) {
                upserted += n as u64;
            }
        }

        SyncOutcome {
            success: errors == 0,
            upserted,
            errors,
            symbols: symbols.len() as u64,
            start_date: Some(start_date),
            end_date: Some(last_day),
            ..Default::default()
        }
    }

    /// Full-history backfill, `[1990-01-01, today]`, tolerant of per-symbol failure.
    pub async fn backfill_history_full(
        &self,
        opts: BackfillOptions,
        stop_checker: &(dyn Fn() -> bool + Sync),
    ) -> SyncOutcome {
        let config = self.config();
        if !config.enabled {
            return SyncOutcome { success: true, ..Default::default() };
        }

        let mut symbols = self.store.get_symbol_codes().unwrap_or_default();
        if symbols.is_empty() {
            let sym_result = self.sync_symbols().await;
            if !sym_result.success {
                return SyncOutcome {
                    success: false,
                    message: sym_result.message,
                    failed_providers: sym_result.failed_providers,
                    ..Default::default()
                };
            }
            symbols = self.store.get_symbol_codes().unwrap_or_default();
        }
        if let Some(limit) = opts.symbol_limit {
            symbols.truncate(limit);
        }

        let state = self.store.get_sync_state().unwrap_or_default();
        let mut start_index = 0usize;
        if opts.resume {
            if let Some(cursor) = &state.bootstrap_cursor_symbol {
                if let Some(pos) = symbols.iter().position(|s| s == cursor) {
                    start_index = pos;
                }
            }
        }

        let start_date = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap();
        let end_date = clock::now_beijing().date_naive();
        let progress_every = opts.progress_every.or(opts.batch_size).unwrap_or(config.bootstrap_batch_size).max(1);

        let mut upserted = 0u64;
        let mut errors = 0u64;
        let mut skipped = 0u64;
        let total = symbols.len();
        let mut stopped = false;

        self.store.update_sync_state(&SyncStateUpdate {
            bootstrap_status: Some(BootstrapStatus::Running),
            ..Default::default()
        });

        for (i, raw_code) in symbols.iter().enumerate().skip(start_index) {
            if stop_checker() {
                stopped = true;
                self.store.update_sync_state(&SyncStateUpdate {
                    bootstrap_cursor_symbol: Some(Some(raw_code.clone())),
                    bootstrap_status: Some(BootstrapStatus::Stopped),
                    ..Default::default()
                });
                break;
            }

            let stock_code = normalize_code(raw_code);
            let market = market_of(&stock_code);
            let order = ordered_providers(&config.providers, matches!(market, Market::Bj));
            let order = self.routable_for_market(&order, market, "fetch_stock_history", config.provider_circuit_breaker_seconds);

            let result = self
                .fetch_history_via_failover(&order, "fetch_stock_history", &config, Some(&stock_code), start_date, end_date)
                .await;

            match result {
                Ok(success) => {
                    let mut rows = success.value;
                    rows.retain(|r| r.trade_date >= start_date && r.trade_date <= end_date);
                    for r in &mut rows {
                        r.is_final = r.trade_date < end_date;
                    }
                    rows.sort_by_key(|r| r.trade_date);
                    match self.store.upsert_daily_prices(&rows, &config.adjust) {
                        Ok(n) => upserted += n as u64,
                        Err(e) => {
                            errors += 1;
                            self.store.update_sync_state(&SyncStateUpdate {
                                last_error: Some(Some(e.to_string())),
                                ..Default::default()
                            });
                        }
                    }
                }
                Err(FailoverFailure::AllEmpty) => skipped += 1,
                Err(failure @ FailoverFailure::AllFailed { .. }) => {
                    errors += 1;
                    let err = failure.into_error("backfill_history_full");
                    self.store.update_sync_state(&SyncStateUpdate {
                        last_error: Some(Some(err.to_string())),
                        ..Default::default()
                    });
                }
            }

            self.store.update_sync_state(&SyncStateUpdate {
                bootstrap_cursor_symbol: Some(Some(raw_code.clone())),
                ..Default::default()
            });

            if (i + 1) % progress_every == 0 || i + 1 == total {
                tracing::info!(processed = i + 1, total, upserted, errors, skipped, "backfill progress");
            }
        }

        if !stopped {
            let order = ordered_providers(&config.providers, false);
            if let Ok(success) = self
                .fetch_history_via_failover(&order, "fetch_index_history", &config, None, start_date, end_date)
                .await
            {
                let mut rows = success.value;
                for r in &mut rows {
                    r.is_final = r.trade_date < end_date;
                    if r.change_pct.is_none() {
                        r.change_pct = Some(0.0);
                    }
                }
                let _ = self.store.upsert_daily_prices(&rows, &config.adjust);
            }

            let status = if errors == 0 {
                BootstrapStatus::Done
            } else {
                BootstrapStatus::DoneWithErrors
            };
            self.store.update_sync_state(&SyncStateUpdate {
                bootstrap_cursor_symbol: Some(None),
                bootstrap_status: Some(status),
                last_backfill_sync_at: Some(now_str()),
                ..Default::default()
            });
        }

        SyncOutcome {
            success: !stopped,
            upserted,
            errors,
            skipped,
            symbols: total as u64,
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..Default::default()
        }
    }

    fn backfill_pre_close(&self, stock_code: &str, adjust: &str) -> Option<f64> {
        let end = clock::now_beijing().date_naive();
        let start = end - chrono::Duration::days(20);
        let rows = self.store.get_price_range(stock_code, start, end, adjust, true).ok()?;
        rows.last().map(|r| r.close)
    }

    /// Fetch a realtime spot quote via the realtime-provider failover order. Backfills
    /// `pre_close` from the store's most recent close in the last 20 days when the
    /// vendor did not supply one.
    pub async fn fetch_realtime_price(&self, stock_code: &str) -> RealtimeOutcome {
        let config = self.config();
        let full_code = normalize_code(stock_code);
        if !config.enabled {
            return RealtimeOutcome {
                success: false,
                stock_code: full_code,
                ..Default::default()
            };
        }
        let market = market_of(&full_code);
        let order = ordered_providers(&config.realtime_providers, matches!(market, Market::Bj));
        let order = self.routable_for_market(&order, market, "fetch_realtime_price", config.provider_circuit_breaker_seconds);
        let registry = ashare_health::registry();

        let result = run_failover(
            registry,
            &order,
            "fetch_realtime_price",
            config.provider_circuit_breaker_seconds,
            config.realtime_provider_failover_enabled,
            |provider| {
                let adapter = self.adapters.get(provider).cloned();
                let pro_api_ext = self.pro_api_ext.clone();
                let mutex = self.provider_mutexes.get(provider);
                let retry_max = config.sync_retry_max;
                let backoff = config.sync_retry_backoff_seconds;
                let full_code = full_code.clone();
                let is_pro_api = provider == "pro_api";
                async move {
                    let outcome = if is_pro_api {
                        match pro_api_ext {
                            Some(pro_api) => {
                                call_with_retry(&mutex, retry_max, backoff, || {
                                    let pro_api = pro_api.clone();
                                    let full_code = full_code.clone();
                                    async move { pro_api.fetch_realtime_spot(&full_code).await }
                                })
                                .await
                            }
                            None => Err(AshareError::not_found(provider)),
                        }
                    } else {
                        match adapter {
                            Some(adapter) => {
                                call_with_retry(&mutex, retry_max, backoff, || {
                                    let adapter = adapter.clone();
                                    let full_code = full_code.clone();
                                    async move { adapter.fetch_realtime_spot(&full_code).await }
                                })
                                .await
                            }
                            None => Err(AshareError::not_found(provider)),
                        }
                    };
                    match outcome {
                        Ok(Some(quote)) => FetchOutcome::Ok(quote),
                        Ok(None) => FetchOutcome::EmptyWindow,
                        Err(e) => FetchOutcome::Failed(e),
                    }
                }
            },
        )
        .await;

        match result {
            Ok(success) => {
                let mut quote = success.value;
                if quote.pre_close.is_none() {
                    quote.pre_close = self.backfill_pre_close(&full_code, &config.adjust);
                }
                RealtimeOutcome {
                    success: true,
                    stock_code: full_code,
                    price: Some(quote.price),
                    pre_close: quote.pre_close,
                    open: quote.open,
                    quote_time: Some(quote.quote_time),
                    provider_used: Some(success.provider_used),
                    provider_path: Some(quote.source.clone()),
                    source: Some(quote.source),
                    failed_providers: success.failed_providers,
                }
            }
            Err(failure) => {
                let failed_providers = match failure {
                    FailoverFailure::AllFailed { failed_providers } => failed_providers,
                    FailoverFailure::AllEmpty => Vec::new(),
                };
                RealtimeOutcome {
                    success: false,
                    stock_code: full_code,
                    failed_providers,
                    ..Default::default()
                }
            }
        }
    }
}

/// Shared, process-wide health registry access re-exported for convenience.
#[must_use]
pub fn health_registry() -> &'static ProviderHealthRegistry {
    ashare_health::registry()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ashare_mock::MockAdapter;
    use tempfile::tempdir;

    fn service_with(adapters: Vec<Arc<dyn ProviderAdapter>>, config: SyncConfig) -> SyncService {
        let dir = tempdir().unwrap();
        let store = Arc::new(BarStore::open(dir.path().join("market.db")).unwrap());
        std::mem::forget(dir);
        SyncService::new(config, store, adapters, None)
    }

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.providers = vec!["eastmoney".to_string(), "pro_api".to_string()];
        config.realtime_providers = config.providers.clone();
        config.sync_retry_max = 1;
        config.sync_retry_backoff_seconds = 0.0;
        config
    }

    #[tokio::test]
    async fn sync_symbols_upserts_rows_from_winning_provider() {
        let adapter = Arc::new(MockAdapter::new("eastmoney").with_symbols(vec![ashare_core::SymbolRow {
            stock_code: "600000.SH".to_string(),
            stock_name: "Pudong".to_string(),
            market: "SH".to_string(),
            source: "mock".to_string(),
        }]));
        let service = service_with(vec![adapter], test_config());
        let outcome = service.sync_symbols().await;
        assert!(outcome.success);
        assert_eq!(outcome.upserted, 1);
        assert_eq!(outcome.provider_used, "eastmoney");
    }

    #[tokio::test]
    async fn incremental_skips_empty_window_as_not_a_failure() {
        let adapter = Arc::new(MockAdapter::new("eastmoney"));
        let service = service_with(vec![adapter], test_config());
        let outcome = service
            .sync_daily_incremental(IncrementalOptions {
                symbols: Some(vec!["600673.SH".to_string()]),
                include_index: false,
                sync_equities: false,
                ..Default::default()
            })
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.errors, 0);
    }

    #[tokio::test]
    async fn incremental_fails_fast_when_all_providers_error() {
        let adapter = Arc::new(MockAdapter::new("eastmoney").failing_history("provider unavailable"));
        let pro_api = Arc::new(MockAdapter::new("pro_api").failing_history("provider unavailable"));
        let service = service_with(vec![adapter, pro_api], test_config());
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
        assert_eq!(outcome.failed_providers.len(), 2);
    }

    #[tokio::test]
    async fn incremental_fails_over_on_disconnect() {
        let eastmoney = Arc::new(
            MockAdapter::new("eastmoney").failing_history("Connection aborted.RemoteDisconnected"),
        );
        let trade_date = clock::now_beijing().date_naive() - chrono::Duration::days(1);
        let pro_api = Arc::new(MockAdapter::new("pro_api").with_history(vec![DailyPriceRow {
            stock_code: "000001.SZ".to_string(),
            trade_date,
            open: 10.0,
            close: 10.1,
            high: 10.2,
            low: 9.9,
            change_pct: Some(1.0),
            volume: 1000.0,
            source: "mock".to_string(),
            is_final: true,
        }]));
        let service = service_with(vec![eastmoney, pro_api], test_config());
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
        assert_eq!(outcome.upserted, 1);
    }

    #[tokio::test]
    async fn finalize_today_after_close_forces_the_today_final_flag() {
        let close_time = clock::parse_close_time("00:00").unwrap();
        assert!(clock::market_closed_now(close_time), "00:00 close cutoff should always read as past");
        let today = clock::now_beijing().date_naive();
        let adapter = Arc::new(MockAdapter::new("eastmoney").with_history(vec![DailyPriceRow {
            stock_code: "000001.SZ".to_string(),
            trade_date: today,
            open: 10.0,
            close: 10.1,
            high: 10.2,
            low: 9.9,
            change_pct: Some(1.0),
            volume: 1000.0,
            source: "mock".to_string(),
            is_final: false,
        }]));
        let mut config = test_config();
        config.close_finalize_time = "00:00".to_string();
        let service = service_with(vec![adapter], config);
        let outcome = service
            .finalize_today_after_close(IncrementalOptions {
                symbols: Some(vec!["000001.SZ".to_string()]),
                include_index: false,
                sync_equities: false,
                history_days: Some(2),
                finalize_today: false,
                ..Default::default()
            })
            .await;
        assert!(outcome.success);
        assert!(outcome.today_final);
        assert!(service.store.has_final_for_symbol_date("000001.SZ", today, &service.config().adjust).unwrap());
    }

    #[tokio::test]
    async fn sync_daily_by_dates_filters_to_requested_symbols() {
        let pro_api = Arc::new(MockAdapter::new("pro_api").with_daily_by_date(vec![
            DailyPriceRow {
                stock_code: "000001.SZ".to_string(),
                trade_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: 10.0,
                close: 10.1,
                high: 10.2,
                low: 9.9,
                change_pct: Some(1.0),
                volume: 1000.0,
                source: "mock".to_string(),
                is_final: false,
            },
            DailyPriceRow {
                stock_code: "600000.SH".to_string(),
                trade_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: 20.0,
                close: 20.1,
                high: 20.2,
                low: 19.9,
                change_pct: Some(1.0),
                volume: 500.0,
                source: "mock".to_string(),
                is_final: false,
            },
        ]));
        let mut config = test_config();
        config.providers = vec!["pro_api".to_string()];
        let dir = tempdir().unwrap();
        let store = Arc::new(BarStore::open(dir.path().join("market.db")).unwrap());
        std::mem::forget(dir);
        let service = SyncService::new(config, store.clone(), Vec::new(), Some(pro_api));
        let outcome = service
            .sync_daily_by_dates(
                &["000001.SZ".to_string()],
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.upserted, 1);
        let rows = store
            .get_price_range("000001.SZ", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), "qfq", true)
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn sync_daily_by_dates_fails_without_a_pro_api_adapter() {
        let dir = tempdir().unwrap();
        let store = Arc::new(BarStore::open(dir.path().join("market.db")).unwrap());
        std::mem::forget(dir);
        let service = SyncService::new(test_config(), store, Vec::new(), None);
        let outcome = service
            .sync_daily_by_dates(
                &["000001.SZ".to_string()],
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.is_some());
    }

    #[tokio::test]
    async fn backfill_tolerates_a_failing_symbol_and_keeps_going() {
        let adapter = Arc::new(
            MockAdapter::new("eastmoney")
                .with_symbols(vec![
                    ashare_core::SymbolRow {
                        stock_code: "000001.SZ".to_string(),
                        stock_name: "A".to_string(),
                        market: "SZ".to_string(),
                        source: "mock".to_string(),
                    },
                    ashare_core::SymbolRow {
                        stock_code: "600000.SH".to_string(),
                        stock_name: "B".to_string(),
                        market: "SH".to_string(),
                        source: "mock".to_string(),
                    },
                ])
                .failing_history("provider unavailable"),
        );
        let service = service_with(vec![adapter], test_config());
        let outcome = service.backfill_history_full(BackfillOptions::default(), &|| false).await;
        assert!(outcome.success);
        assert_eq!(outcome.symbols, 2);
        assert_eq!(outcome.errors, 2);
        let state = service.store.get_sync_state().unwrap();
        assert_eq!(state.bootstrap_status, BootstrapStatus::DoneWithErrors);
    }

    #[tokio::test]
    async fn backfill_stops_and_records_the_cursor_when_asked() {
        let adapter = Arc::new(MockAdapter::new("eastmoney").with_symbols(vec![
            ashare_core::SymbolRow {
                stock_code: "000001.SZ".to_string(),
                stock_name: "A".to_string(),
                market: "SZ".to_string(),
                source: "mock".to_string(),
            },
            ashare_core::SymbolRow {
                stock_code: "600000.SH".to_string(),
                stock_name: "B".to_string(),
                market: "SH".to_string(),
                source: "mock".to_string(),
            },
        ]));
        let service = service_with(vec![adapter], test_config());
        let outcome = service.backfill_history_full(BackfillOptions::default(), &|| true).await;
        assert!(!outcome.success);
        let state = service.store.get_sync_state().unwrap();
        assert_eq!(state.bootstrap_status, BootstrapStatus::Stopped);
        assert_eq!(state.bootstrap_cursor_symbol.as_deref(), Some("000001.SZ"));
    }

    #[tokio::test]
    async fn fetch_realtime_price_backfills_pre_close_from_the_store() {
        let adapter = Arc::new(MockAdapter::new("eastmoney").with_realtime(ashare_core::RealtimeQuote {
            stock_code: "000001.SZ".to_string(),
            price: 11.0,
            pre_close: None,
            open: Some(10.5),
            quote_time: "2024-01-03 15:00:00".to_string(),
            provider_used: "eastmoney".to_string(),
            source: "eastmoney.spot".to_string(),
        }));
        let service = service_with(vec![adapter], test_config());
        service
            .store
            .upsert_daily_prices(
                &[DailyPriceRow {
                    stock_code: "000001.SZ".to_string(),
                    trade_date: clock::now_beijing().date_naive() - chrono::Duration::days(1),
                    open: 10.0,
                    close: 10.2,
                    high: 10.3,
                    low: 9.8,
                    change_pct: Some(1.0),
                    volume: 1000.0,
                    source: "mock".to_string(),
                    is_final: true,
                }],
                "qfq",
            )
            .unwrap();
        let outcome = service.fetch_realtime_price("000001.SZ").await;
        assert!(outcome.success);
        assert_eq!(outcome.price, Some(11.0));
        assert_eq!(outcome.pre_close, Some(10.2));
        assert_eq!(outcome.provider_used.as_deref(), Some("eastmoney"));
        assert_eq!(outcome.source.as_deref(), Some("eastmoney.spot"));
    }

    #[tokio::test]
    async fn fetch_realtime_price_reports_every_failed_provider() {
        let eastmoney = Arc::new(MockAdapter::new("eastmoney").failing_realtime("down"));
        let pro_api = Arc::new(MockAdapter::new("pro_api").failing_realtime("down"));
        let service = service_with(vec![eastmoney, pro_api], test_config());
        let outcome = service.fetch_realtime_price("000001.SZ").await;
        assert!(!outcome.success);
        assert_eq!(outcome.failed_providers.len(), 2);
    }
}
