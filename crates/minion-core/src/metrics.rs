use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for control-plane counters. Implementations can forward to
/// Prometheus, StatsD, or simply log.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
}

/// Atomic counters shared by the facade and the broadcaster.
#[derive(Default)]
pub struct ControlMetrics {
    pub installs_started: AtomicU64,
    pub installs_completed: AtomicU64,
    pub installs_failed: AtomicU64,
    pub removals: AtomicU64,
    pub runs: AtomicU64,
    pub run_failures: AtomicU64,
    pub stats_samples: AtomicU64,
    pub stats_failures: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for ControlMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlMetrics")
            .field("snapshot", &self.snapshot())
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

impl ControlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::default()
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str) {
        let val = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn record_install_started(&self) {
        self.bump(&self.installs_started, "minion.installs_started");
    }

    pub fn record_install_completed(&self) {
        self.bump(&self.installs_completed, "minion.installs_completed");
    }

    pub fn record_install_failed(&self) {
        self.bump(&self.installs_failed, "minion.installs_failed");
    }

    pub fn record_removal(&self) {
        self.bump(&self.removals, "minion.removals");
    }

    /// One managed-process invocation; `ok` is false on `RunFailure`.
    pub fn record_run(&self, ok: bool) {
        self.bump(&self.runs, "minion.runs");
        if !ok {
            self.bump(&self.run_failures, "minion.run_failures");
        }
    }

    pub fn record_stats_sample(&self, ok: bool) {
        if ok {
            self.bump(&self.stats_samples, "minion.stats_samples");
        } else {
            self.bump(&self.stats_failures, "minion.stats_failures");
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            installs_started: self.installs_started.load(Ordering::Relaxed),
            installs_completed: self.installs_completed.load(Ordering::Relaxed),
            installs_failed: self.installs_failed.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
            run_failures: self.run_failures.load(Ordering::Relaxed),
            stats_samples: self.stats_samples.load(Ordering::Relaxed),
            stats_failures: self.stats_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub installs_started: u64,
    pub installs_completed: u64,
    pub installs_failed: u64,
    pub removals: u64,
    pub runs: u64,
    pub run_failures: u64,
    pub stats_samples: u64,
    pub stats_failures: u64,
}

/// Emits every counter update as a structured log event.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::info!(metric = name, value = value, kind = "counter", "metric");
    }
}
