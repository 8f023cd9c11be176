//! Per-provider retry loop and cross-provider failover loop.
//!
//! Realizes the "ad-hoc exceptions as control flow" design note: the failover
//! loop's per-provider outcome is [`FetchOutcome`], a three-way sum type, instead
//! of a distinguished exception threaded through `Result`'s error channel.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use ashare_core::AshareError;
use ashare_health::ProviderHealthRegistry;
use tokio::sync::Mutex;

/// One provider's outcome for a single-window fetch.
pub enum FetchOutcome<T> {
    /// The vendor returned data.
    Ok(T),
    /// The vendor returned zero rows for a valid window — not a failure.
    EmptyWindow,
    /// The vendor call failed.
    Failed(AshareError),
}

/// A successful failover result, naming which provider ultimately served it.
#[derive(Debug, Clone)]
pub struct FailoverSuccess<T> {
    /// The value returned by the winning provider.
    pub value: T,
    /// Name of the provider that served the request.
    pub provider_used: String,
    /// `true` if at least one earlier provider was tried and failed first.
    pub switched: bool,
    /// Providers tried and rejected before `provider_used`.
    pub failed_providers: Vec<String>,
}

/// Why the failover loop produced no success.
#[derive(Debug, Clone)]
pub enum FailoverFailure {
    /// Every routable provider returned an empty window; not an error condition.
    AllEmpty,
    /// At least one provider failed with a real error and none succeeded.
    AllFailed {
        /// All providers that were tried and did not succeed.
        failed_providers: Vec<String>,
    },
}

impl FailoverFailure {
    /// Render as an [`AshareError`] for callers that must propagate a single error
    /// (e.g. `sync_symbols`, which has no "skip and continue" semantics).
    #[must_use]
    pub fn into_error(self, op: &'static str) -> AshareError {
        match self {
            Self::AllEmpty => AshareError::all_providers_failed(op, Vec::new()),
            Self::AllFailed { failed_providers } => {
                AshareError::all_providers_failed(op, failed_providers)
            }
        }
    }
}

/// Run one provider call through the per-provider retry loop.
///
/// The provider's mutex is held for the entire loop, including backoff sleeps,
/// so concurrent callers serialize on one in-flight vendor call per provider.
/// `is_fast_fail` errors and the final attempt both bypass further retries.
pub async fn call_with_retry<T, F, Fut>(
    provider_mutex: &Mutex<()>,
    retry_max: u32,
    backoff_base_secs: f64,
    mut call: F,
) -> Result<T, AshareError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AshareError>>,
{
    let _guard = provider_mutex.lock().await;
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if e.is_fast_fail() || attempt >= retry_max.max(1) {
                    return Err(e);
                }
                let backoff = backoff_base_secs * 2f64.powi(i32::try_from(attempt - 1).unwrap_or(i32::MAX));
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                attempt += 1;
            }
        }
    }
}

/// Build the ordered, deduplicated provider list for one call, moving
/// `{pro_api, eastmoney}` to the front for BJ symbols.
#[must_use]
pub fn ordered_providers(configured: &[String], is_bj: bool) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for p in configured {
        if !order.contains(p) {
            order.push(p.clone());
        }
    }
    if is_bj {
        for front in ["eastmoney", "pro_api"] {
            if let Some(pos) = order.iter().position(|p| p == front) {
                let item = order.remove(pos);
                order.insert(0, item);
            }
        }
    }
    order
}

/// Drive the cross-provider failover loop for one request.
///
/// `call` is invoked once per routable provider (already filtered by the caller
/// for market support) and must itself apply the per-provider retry loop. A
/// non-empty failure opens that provider's circuit for `circuit_breaker_seconds`;
/// when `failover_enabled` is `false` the loop stops at the first such failure
/// instead of trying the remaining providers. [`FetchOutcome::EmptyWindow`] never
/// opens a circuit and never stops the loop.
pub async fn run_failover<T, F, Fut>(
    registry: &ProviderHealthRegistry,
    provider_order: &[String],
    op: &'static str,
    circuit_breaker_seconds: f64,
    failover_enabled: bool,
    mut call: F,
) -> Result<FailoverSuccess<T>, FailoverFailure>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = FetchOutcome<T>>,
{
    let mut failed_providers = Vec::new();
    let mut saw_real_failure = false;
    let mut tried = 0u32;

    for provider in provider_order {
        if let Some(reason) = registry.get_disabled_reason(provider) {
            registry.record_failure(provider, op, &format!("provider_unavailable:{reason}"));
            failed_providers.push(provider.clone());
            saw_real_failure = true;
            continue;
        }
        tried += 1;
        match call(provider).await {
            FetchOutcome::Ok(value) => {
                return Ok(FailoverSuccess {
                    value,
                    provider_used: provider.clone(),
                    switched: tried > 1,
                    failed_providers,
                });
            }
            FetchOutcome::EmptyWindow => {}
            FetchOutcome::Failed(e) => {
                saw_real_failure = true;
                failed_providers.push(provider.clone());
                registry.record_failure(provider, op, "transport");
                let until = Instant::now() + Duration::from_secs_f64(circuit_breaker_seconds);
                registry.set_disabled(
                    provider,
                    format!("circuit_open:{circuit_breaker_seconds}s ({e})"),
                    until,
                );
                if !failover_enabled {
                    break;
                }
            }
        }
    }

    if saw_real_failure {
        Err(FailoverFailure::AllFailed { failed_providers })
    } else {
        Err(FailoverFailure::AllEmpty)
    }
}

/// Mark `provider` as unsupported for this request's market: tallied in the
/// failure log and, like a real circuit trip, reflected in the snapshot as
/// `disabled_reason = "market_unsupported:<market>"` for `circuit_breaker_seconds`.
/// The registry has no `(provider, market)` key, so this briefly makes the
/// provider unroutable for every market too — acceptable since a provider that
/// never supports BJ keeps re-tripping this on every BJ symbol anyway, and the
/// deadline clears it between unrelated calls.
pub fn record_market_unsupported(
    registry: &ProviderHealthRegistry,
    provider: &str,
    op: &str,
    market: &str,
    circuit_breaker_seconds: f64,
) {
    let reason = format!("market_unsupported:{market}");
    registry.record_failure(provider, op, &reason);
    registry.set_disabled(provider, reason, Instant::now() + Duration::from_secs_f64(circuit_breaker_seconds));
}

/// Lazily-built per-provider mutex map, one entry per distinct provider name ever seen.
#[derive(Default)]
pub struct ProviderMutexes {
    mutexes: std::sync::Mutex<HashMap<String, std::sync::Arc<Mutex<()>>>>,
}

impl ProviderMutexes {
    /// Build an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating if absent) the mutex for `provider`.
    #[must_use]
    pub fn get(&self, provider: &str) -> std::sync::Arc<Mutex<()>> {
        let mut guard = self.mutexes.lock().unwrap();
        guard
            .entry(provider.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_providers_dedups_preserving_first_occurrence() {
        let configured = vec!["sina".to_string(), "eastmoney".to_string(), "sina".to_string()];
        assert_eq!(ordered_providers(&configured, false), vec!["sina", "eastmoney"]);
    }

    #[test]
    fn ordered_providers_moves_pro_api_and_eastmoney_front_for_bj() {
        let configured = vec![
            "tencent".to_string(),
            "sina".to_string(),
            "eastmoney".to_string(),
            "pro_api".to_string(),
        ];
        assert_eq!(
            ordered_providers(&configured, true),
            vec!["pro_api", "eastmoney", "tencent", "sina"]
        );
    }

    #[tokio::test]
    async fn retry_loop_bypasses_retry_on_fast_fail() {
        let mutex = Mutex::new(());
        let mut calls = 0;
        let result: Result<(), AshareError> = call_with_retry(&mutex, 5, 0.0, || {
            calls += 1;
            async { Err(AshareError::rate_limited("eastmoney", "too many requests")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_loop_retries_up_to_max_then_gives_up() {
        let mutex = Mutex::new(());
        let mut calls = 0;
        let result: Result<(), AshareError> = call_with_retry(&mutex, 3, 0.0, || {
            calls += 1;
            async { Err(AshareError::transport("sina", "boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn failover_returns_empty_aggregate_when_all_empty() {
        let registry = ProviderHealthRegistry::new();
        let order = vec!["eastmoney".to_string(), "pro_api".to_string()];
        let result: Result<FailoverSuccess<Vec<i32>>, FailoverFailure> =
            run_failover(&registry, &order, "fetch_stock_history", 300.0, true, |_provider| async {
                FetchOutcome::EmptyWindow
            })
            .await;
        assert!(matches!(result, Err(FailoverFailure::AllEmpty)));
    }

    #[tokio::test]
    async fn failover_switches_to_second_provider_on_failure() {
        let registry = ProviderHealthRegistry::new();
        let order = vec!["eastmoney".to_string(), "pro_api".to_string()];
        let result = run_failover(
            &registry,
            &order,
            "fetch_stock_history",
            300.0,
            true,
            |provider| async move {
                if provider == "eastmoney" {
                    FetchOutcome::Failed(AshareError::transport("eastmoney", "Connection aborted: RemoteDisconnected"))
                } else {
                    FetchOutcome::Ok(vec![1])
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result.provider_used, "pro_api");
        assert!(result.switched);
        assert_eq!(result.failed_providers, vec!["eastmoney".to_string()]);
    }

    #[test]
    fn market_unsupported_disables_the_provider_and_clears_after_the_deadline() {
        let registry = ProviderHealthRegistry::new();
        assert_eq!(registry.get_disabled_reason("tencent"), None);
        record_market_unsupported(&registry, "tencent", "fetch_stock_history", "BJ", 0.01);
        assert_eq!(
            registry.get_disabled_reason("tencent").as_deref(),
            Some("market_unsupported:BJ")
        );
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.get_disabled_reason("tencent"), None);
    }

    #[tokio::test]
    async fn failover_stops_after_first_failure_when_failover_disabled() {
        let registry = ProviderHealthRegistry::new();
        let order = vec!["eastmoney".to_string(), "pro_api".to_string()];
        let result: Result<FailoverSuccess<Vec<i32>>, FailoverFailure> = run_failover(
            &registry,
            &order,
            "fetch_stock_history",
            300.0,
            false,
            |_provider| async { FetchOutcome::Failed(AshareError::transport("x", "boom")) },
        )
        .await;
        match result {
            Err(FailoverFailure::AllFailed { failed_providers }) => {
                assert_eq!(failed_providers, vec!["eastmoney".to_string()]);
            }
            _ => panic!("expected AllFailed"),
        }
    }
}
