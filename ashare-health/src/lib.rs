//! ashare-health
//!
//! Process-global provider health registry: the circuit-breaker disabled/until
//! state and the `(provider, op, reason)` failure tally with periodic drain.
//!
//! Realizes the "place the global state behind an explicit singleton created at
//! program start" design note: [`registry`] lazily builds one [`ProviderHealthRegistry`]
//! per process and every Sync Service instance shares it.
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Minimum allowed drain cadence: callers asking for less than this are clamped up to it.
pub const MIN_DRAIN_INTERVAL: Duration = Duration::from_secs(30);
/// Default drain cadence when a caller has no specific preference.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(300);

struct DisabledEntry {
    reason: String,
    until: Instant,
}

#[derive(Default)]
struct FailureCount {
    count: u64,
    last_at: Option<Instant>,
}

/// One drained failure-tally line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSummary {
    /// Provider name.
    pub provider: String,
    /// Operation name, e.g. `"fetch_stock_history"`.
    pub op: String,
    /// Failure reason tag.
    pub reason: String,
    /// Occurrences since the last drain.
    pub count: u64,
    /// Time of the most recent occurrence, seconds before the drain call.
    pub last_at_secs_ago: f64,
}

/// Current routability of one provider, for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    /// Provider name.
    pub provider: String,
    /// `true` iff the provider currently has no active disabled reason.
    pub routable: bool,
    /// The disabled reason, if any, e.g. `"circuit_open:42s"` or `"init_failed:..."`.
    pub disabled_reason: Option<String>,
    /// Seconds remaining until the disabled state auto-clears, if disabled.
    pub cooldown_remaining_secs: Option<f64>,
}

/// Process-global provider health state.
pub struct ProviderHealthRegistry {
    disabled: Mutex<HashMap<String, DisabledEntry>>,
    failures: Mutex<HashMap<(String, String, String), FailureCount>>,
    last_drain: Mutex<Instant>,
}

impl Default for ProviderHealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderHealthRegistry {
    /// Build a fresh, empty registry. Prefer [`registry`] for the process-global
    /// instance; construct directly only in tests that need isolation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            disabled: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            last_drain: Mutex::new(Instant::now()),
        }
    }

    /// Mark `provider` disabled with `reason` until `until`.
    pub fn set_disabled(&self, provider: &str, reason: impl Into<String>, until: Instant) {
        let reason = reason.into();
        tracing::warn!(provider, reason = %reason, "provider disabled");
        self.disabled.lock().unwrap().insert(
            provider.to_string(),
            DisabledEntry { reason, until },
        );
    }

    /// Clear any disabled state for `provider`.
    pub fn clear_disabled(&self, provider: &str) {
        if self.disabled.lock().unwrap().remove(provider).is_some() {
            tracing::info!(provider, "provider re-enabled");
        }
    }

    /// Current disabled reason for `provider`, auto-clearing if the deadline has passed.
    #[must_use]
    pub fn get_disabled_reason(&self, provider: &str) -> Option<String> {
        let mut disabled = self.disabled.lock().unwrap();
        let Some(entry) = disabled.get(provider) else {
            return None;
        };
        if entry.until <= Instant::now() {
            tracing::info!(provider, "circuit auto-cleared");
            disabled.remove(provider);
            return None;
        }
        Some(entry.reason.clone())
    }

    /// Record one failure occurrence for `(provider, op, reason)`.
    pub fn record_failure(&self, provider: &str, op: &str, reason: &str) {
        let mut failures = self.failures.lock().unwrap();
        let entry = failures
            .entry((provider.to_string(), op.to_string(), reason.to_string()))
            .or_default();
        entry.count += 1;
        entry.last_at = Some(Instant::now());
    }

    /// Drain and return the failure tally if at least `interval` (clamped to
    /// [`MIN_DRAIN_INTERVAL`]) has elapsed since the previous drain; otherwise `None`.
    ///
    /// Draining resets all counters to zero. The returned list is sorted by count
    /// descending.
    pub fn drain_summary_if_due(&self, interval: Duration) -> Option<Vec<FailureSummary>> {
        let interval = interval.max(MIN_DRAIN_INTERVAL);
        let mut last_drain = self.last_drain.lock().unwrap();
        if last_drain.elapsed() < interval {
            return None;
        }
        *last_drain = Instant::now();
        drop(last_drain);

        let mut failures = self.failures.lock().unwrap();
        let now = Instant::now();
        let mut summary: Vec<FailureSummary> = failures
            .drain()
            .map(|((provider, op, reason), count)| FailureSummary {
                provider,
                op,
                reason,
                count: count.count,
                last_at_secs_ago: count
                    .last_at
                    .map_or(0.0, |at| now.duration_since(at).as_secs_f64()),
            })
            .collect();
        summary.sort_by(|a, b| b.count.cmp(&a.count));
        if !summary.is_empty() {
            tracing::info!(entries = summary.len(), "drained provider failure summary");
        }
        Some(summary)
    }

    /// Snapshot current routability for `provider`, without mutating state beyond
    /// the usual auto-clear performed by [`Self::get_disabled_reason`].
    #[must_use]
    pub fn snapshot(&self, provider: &str) -> ProviderSnapshot {
        let reason = self.get_disabled_reason(provider);
        let cooldown_remaining_secs = reason.as_ref().and_then(|_| {
            self.disabled
                .lock()
                .unwrap()
                .get(provider)
                .map(|e| e.until.saturating_duration_since(Instant::now()).as_secs_f64())
        });
        ProviderSnapshot {
            provider: provider.to_string(),
            routable: reason.is_none(),
            disabled_reason: reason,
            cooldown_remaining_secs,
        }
    }
}

static REGISTRY: OnceLock<ProviderHealthRegistry> = OnceLock::new();

/// The process-global provider health registry, created on first access.
#[must_use]
pub fn registry() -> &'static ProviderHealthRegistry {
    REGISTRY.get_or_init(ProviderHealthRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_reason_is_set_and_cleared() {
        let reg = ProviderHealthRegistry::new();
        assert_eq!(reg.get_disabled_reason("tx"), None);
        reg.set_disabled("tx", "circuit_open:60s", Instant::now() + Duration::from_secs(60));
        assert_eq!(reg.get_disabled_reason("tx").as_deref(), Some("circuit_open:60s"));
        reg.clear_disabled("tx");
        assert_eq!(reg.get_disabled_reason("tx"), None);
    }

    #[test]
    fn disabled_reason_auto_clears_past_deadline() {
        let reg = ProviderHealthRegistry::new();
        reg.set_disabled("tx", "circuit_open", Instant::now() - Duration::from_millis(1));
        assert_eq!(reg.get_disabled_reason("tx"), None);
    }

    #[test]
    fn drain_respects_minimum_interval() {
        let reg = ProviderHealthRegistry::new();
        reg.record_failure("tx", "fetch_stock_history", "transport");
        // First call establishes the baseline last_drain at construction time, and
        // the registry was just built, so a zero interval still passes the clamp
        // but must wait out MIN_DRAIN_INTERVAL from `new()`.
        let result = reg.drain_summary_if_due(Duration::from_secs(0));
        assert!(result.is_none());
    }

    #[test]
    fn drain_sorts_by_count_descending() {
        let reg = ProviderHealthRegistry::new();
        *reg.last_drain.lock().unwrap() = Instant::now() - Duration::from_secs(31);
        reg.record_failure("tx", "fetch_stock_history", "transport");
        reg.record_failure("sina", "fetch_stock_history", "transport");
        reg.record_failure("sina", "fetch_stock_history", "transport");

        let summary = reg.drain_summary_if_due(Duration::from_secs(30)).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].provider, "sina");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[1].count, 1);
    }

    #[test]
    fn global_registry_is_a_singleton() {
        let a: *const ProviderHealthRegistry = registry();
        let b: *const ProviderHealthRegistry = registry();
        assert_eq!(a, b);
    }
}
