//! Per-operation storage metrics.
//!
//! The manager records exactly one [`StorageMetric`] per facade call into a
//! [`MetricsCollector`]: a bounded ring of recent samples that is swept of
//! entries older than the retention window.
//!
//! ```rust,ignore
//! use unistore_core::metrics::{MetricsCollector, TimeRange};
//!
//! let metrics = manager.metrics();
//! let last_hour = metrics.query(Some("primary"), Some(TimeRange::last(chrono::Duration::hours(1))));
//! println!("{}", metrics.summary(Some("primary")));
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Record metrics at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Age after which samples are swept, in seconds (default: 86400)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Ring capacity; the oldest sample is dropped when full (default: 100000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Sweep period in seconds (default: 60)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_retention_secs() -> u64 {
    86_400
}

fn default_max_entries() -> usize {
    100_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_secs: default_retention_secs(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Operation class a metric is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOperation {
    Upload,
    Download,
    Delete,
    List,
    Metadata,
    Url,
}

impl MetricOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricOperation::Upload => "upload",
            MetricOperation::Download => "download",
            MetricOperation::Delete => "delete",
            MetricOperation::List => "list",
            MetricOperation::Metadata => "metadata",
            MetricOperation::Url => "url",
        }
    }
}

impl std::fmt::Display for MetricOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded facade call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMetric {
    pub provider: String,
    pub operation: MetricOperation,
    pub duration_ms: u64,
    /// Bytes moved, when the operation moves any
    pub size: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StorageMetric {
    pub fn new(
        operation: MetricOperation,
        provider: impl Into<String>,
        duration: Duration,
        size: Option<u64>,
        error: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation,
            duration_ms: duration.as_millis() as u64,
            size,
            success: error.is_none(),
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window ending now
    pub fn last(duration: ChronoDuration) -> Self {
        let end = Utc::now();
        Self {
            start: end - duration,
            end,
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Latency statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Calculate stats from samples (in milliseconds)
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<u64> = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)] as f64;

        Self {
            count,
            avg_ms: sum as f64 / count as f64,
            p50_ms: sorted[count / 2] as f64,
            p95_ms: at(0.95),
            p99_ms: at(0.99),
            max_ms: sorted[count - 1] as f64,
        }
    }
}

/// Aggregates for one operation class.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationSummary {
    pub count: u64,
    pub failures: u64,
    pub bytes: u64,
    pub latency: LatencyStats,
}

/// Aggregates over the retained samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub provider: Option<String>,
    pub operations: BTreeMap<MetricOperation, OperationSummary>,
}

impl MetricsSummary {
    pub fn total_count(&self) -> u64 {
        self.operations.values().map(|o| o.count).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.operations.values().map(|o| o.failures).sum()
    }
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "=== Storage Metrics ({}) ===",
            self.provider.as_deref().unwrap_or("all providers")
        )?;
        for (operation, summary) in &self.operations {
            writeln!(
                f,
                "{}: count={} failures={} bytes={} avg={:.2}ms p95={:.2}ms max={:.2}ms",
                operation,
                summary.count,
                summary.failures,
                summary.bytes,
                summary.latency.avg_ms,
                summary.latency.p95_ms,
                summary.latency.max_ms
            )?;
        }
        Ok(())
    }
}

/// Bounded ring of recent storage metrics.
pub struct MetricsCollector {
    config: MetricsConfig,
    entries: RwLock<VecDeque<StorageMetric>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(config.max_entries.min(1024))),
            config,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Record a metric; a no-op when metrics are disabled
    pub fn record(&self, metric: StorageMetric) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }

        let mut entries = self.entries.write();
        while entries.len() >= self.config.max_entries {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    /// Build and record a metric for one completed operation
    pub fn record_operation(
        &self,
        operation: MetricOperation,
        provider: &str,
        duration: Duration,
        size: Option<u64>,
        error: Option<String>,
    ) {
        self.record(StorageMetric::new(operation, provider, duration, size, error));
    }

    /// Metrics for `provider` (all providers when `None`) within `range`
    pub fn query(&self, provider: Option<&str>, range: Option<TimeRange>) -> Vec<StorageMetric> {
        self.entries
            .read()
            .iter()
            .filter(|m| provider.map_or(true, |p| m.provider == p))
            .filter(|m| range.map_or(true, |r| r.contains(m.timestamp)))
            .cloned()
            .collect()
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Per-operation aggregates for `provider` (all providers when `None`)
    pub fn summary(&self, provider: Option<&str>) -> MetricsSummary {
        let mut durations: BTreeMap<MetricOperation, Vec<u64>> = BTreeMap::new();
        let mut summary = MetricsSummary {
            provider: provider.map(str::to_string),
            operations: BTreeMap::new(),
        };

        for metric in self.query(provider, None) {
            let entry = summary.operations.entry(metric.operation).or_default();
            entry.count += 1;
            if !metric.success {
                entry.failures += 1;
            }
            entry.bytes += metric.size.unwrap_or(0);
            durations
                .entry(metric.operation)
                .or_default()
                .push(metric.duration_ms);
        }

        for (operation, samples) in durations {
            if let Some(entry) = summary.operations.get_mut(&operation) {
                entry.latency = LatencyStats::from_samples(&samples);
            }
        }
        summary
    }

    /// Drop samples older than the retention window; returns how many
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.retention_secs as i64);
        self.sweep_before(cutoff)
    }

    fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|m| m.timestamp >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired storage metrics", removed);
        }
        removed
    }

    /// Remove all samples
    pub fn reset(&self) {
        self.entries.write().clear();
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval_secs` until shutdown
    pub fn spawn_sweeper(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.recv() => {
                        debug!("Metrics sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}
