/*!
Observability for the undo engine.

- Structured JSON logging through `tracing-subscriber`
- Prometheus counters and histograms for the undo lifecycle (`metrics` feature)

The `record_*` hooks are always available and compile to nothing without the
`metrics` feature, so the engine can call them unconditionally.
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, UndoError};

/// Filter used when `RUST_LOG` is not set; matches every `undel_*` crate
pub const DEFAULT_LOG_DIRECTIVE: &str = "undel=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<UndoMetrics>> = OnceLock::new();

/// Prometheus instruments for schedule, restore, expiry and failure
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct UndoMetrics {
    pub scheduled_total: Counter,
    pub restored_total: Counter,
    pub expired_total: Counter,
    pub failed_total: Counter,
    pub restore_latency_seconds: Histogram,
    /// Size of each captured snapshot, in nodes
    pub snapshot_nodes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl UndoMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let scheduled_total = counter(
            &registry,
            "undel_scheduled_total",
            "Deletions scheduled for undo",
        )?;
        let restored_total = counter(&registry, "undel_restored_total", "Deletions undone")?;
        let expired_total = counter(
            &registry,
            "undel_expired_total",
            "Undo events that expired before being used",
        )?;
        let failed_total = counter(
            &registry,
            "undel_failed_total",
            "Restores that failed and were marked failed",
        )?;
        let restore_latency_seconds = histogram(
            &registry,
            HistogramOpts::new(
                "undel_restore_latency_seconds",
                "Duration of successful restores in seconds",
            ),
        )?;
        let snapshot_nodes = histogram(
            &registry,
            HistogramOpts::new("undel_snapshot_nodes", "Nodes per captured snapshot")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
        )?;

        Ok(Self {
            scheduled_total,
            restored_total,
            expired_total,
            failed_total,
            restore_latency_seconds,
            snapshot_nodes,
            registry,
        })
    }

    /// The process-wide instance; `None` if registration failed
    pub fn global() -> Option<&'static UndoMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Undo metrics unavailable");
                    None
                }
            })
            .as_ref()
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| UndoError::storage(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| UndoError::storage(format!("metrics output is not UTF-8: {e}")))
    }
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| UndoError::storage(format!("failed to create {name}: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| UndoError::storage(format!("failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
fn histogram(registry: &Registry, opts: HistogramOpts) -> Result<Histogram> {
    let name = opts.common_opts.name.clone();
    let histogram = Histogram::with_opts(opts)
        .map_err(|e| UndoError::storage(format!("failed to create {name}: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| UndoError::storage(format!("failed to register {name}: {e}")))?;
    Ok(histogram)
}

/// Text export of the global metrics, if they are available
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    UndoMetrics::global()
        .ok_or_else(|| UndoError::storage("undo metrics are not initialized"))?
        .gather_metrics()
}

pub(crate) fn record_scheduled(snapshot_nodes: usize) {
    #[cfg(feature = "metrics")]
    {
        if let Some(metrics) = UndoMetrics::global() {
            metrics.scheduled_total.inc();
            metrics.snapshot_nodes.observe(snapshot_nodes as f64);
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = snapshot_nodes;
}

pub(crate) fn record_restored(elapsed: std::time::Duration) {
    #[cfg(feature = "metrics")]
    {
        if let Some(metrics) = UndoMetrics::global() {
            metrics.restored_total.inc();
            metrics.restore_latency_seconds.observe(elapsed.as_secs_f64());
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = elapsed;
}

pub(crate) fn record_expired(count: usize) {
    #[cfg(feature = "metrics")]
    {
        if let Some(metrics) = UndoMetrics::global() {
            metrics.expired_total.inc_by(count as f64);
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

pub(crate) fn record_failed() {
    #[cfg(feature = "metrics")]
    {
        if let Some(metrics) = UndoMetrics::global() {
            metrics.failed_total.inc();
        }
    }
}

/// Install a global JSON subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_DIRECTIVE`].
///
/// # Errors
/// * `UndoError::Config` - If the directive does not parse
/// * `UndoError::Storage` - If a global subscriber is already installed
pub fn init_observability() -> Result<()> {
    #[cfg(feature = "metrics")]
    UndoMetrics::global();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_DIRECTIVE)
            .map_err(|e| UndoError::config(format!("invalid log directive: {e}")))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(false);

    let subscriber = TracingRegistry::default().with(filter).with(fmt_layer);
    set_global_default(subscriber)
        .map_err(|e| UndoError::storage(format!("failed to set global tracing subscriber: {e}")))?;

    tracing::info!("Undo observability initialized");
    Ok(())
}
