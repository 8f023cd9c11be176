//! The public entry point: wraps [`crate::service::SyncService`] with the
//! read-only status/probe surface and the runtime settings patch.

use std::sync::Arc;

use ashare_core::{AshareError, SyncConfig, SyncState};
use ashare_health::ProviderSnapshot;
use ashare_store::BarStore;
use chrono::NaiveDate;

use crate::service::{
    BackfillOptions, IncrementalOptions, RealtimeOutcome, SyncConfigPatch, SyncOutcome, SyncService,
};

/// Combined store counters, sync cursor, and per-provider routability, for the
/// `status` surface.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Master enabled switch.
    pub enabled: bool,
    /// Rows in the symbol dictionary.
    pub symbol_count: i64,
    /// Rows in the daily bar table.
    pub bar_count: i64,
    /// The sync-state cursor.
    pub sync_state: SyncState,
    /// Routability snapshot for every configured provider.
    pub providers: Vec<ProviderSnapshot>,
}

/// Thin façade over [`SyncService`]; the surface most callers should hold.
pub struct SyncFacade {
    service: Arc<SyncService>,
}

impl SyncFacade {
    /// Wrap an existing service.
    #[must_use]
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }

    /// Build the real adapter set from `config` and wrap it. See
    /// [`SyncService::from_config`] for the Pro-API init-failure handling.
    #[must_use]
    pub fn from_config(config: SyncConfig, store: Arc<BarStore>) -> Self {
        Self::new(Arc::new(SyncService::from_config(config, store)))
    }

    /// Combined status: store counters, sync cursor, provider routability.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] if the store counters cannot be read.
    pub fn status(&self) -> Result<StatusReport, AshareError> {
        let config = self.service.config();
        let store_status = self.service.store_status()?;
        Ok(StatusReport {
            enabled: config.enabled,
            symbol_count: store_status.symbol_count,
            bar_count: store_status.bar_count,
            sync_state: store_status.sync_state,
            providers: self.service.snapshot_all(),
        })
    }

    /// Routability snapshot only, without the store round-trip `status` does.
    #[must_use]
    pub fn probe(&self) -> Vec<ProviderSnapshot> {
        self.service.snapshot_all()
    }

    /// Apply a runtime settings patch.
    ///
    /// # Errors
    /// Returns [`AshareError::InvalidArg`] if the patch is malformed.
    pub fn update_settings(&self, patch: SyncConfigPatch) -> Result<(), AshareError> {
        self.service.update_settings(patch)
    }

    /// Sync the symbol dictionary.
    pub async fn sync_symbols(&self) -> SyncOutcome {
        self.service.sync_symbols().await
    }

    /// Run the incremental-window ingestion flow.
    pub async fn sync_daily_incremental(&self, opts: IncrementalOptions) -> SyncOutcome {
        self.service.sync_daily_incremental(opts).await
    }

    /// Assert today's bars final, after market close.
    pub async fn finalize_today_after_close(&self, opts: IncrementalOptions) -> SyncOutcome {
        self.service.finalize_today_after_close(opts).await
    }

    /// Run the Pro-API prewarm path over `[start_date, end_date]`.
    pub async fn sync_daily_by_dates(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> SyncOutcome {
        self.service.sync_daily_by_dates(symbols, start_date, end_date).await
    }

    /// Run the full-history backfill, polling `stop_checker` between symbols.
    pub async fn backfill_history_full(
        &self,
        opts: BackfillOptions,
        stop_checker: &(dyn Fn() -> bool + Sync),
    ) -> SyncOutcome {
        self.service.backfill_history_full(opts, stop_checker).await
    }

    /// Fetch a realtime spot quote.
    pub async fn fetch_realtime_price(&self, stock_code: &str) -> RealtimeOutcome {
        self.service.fetch_realtime_price(stock_code).await
    }
}
