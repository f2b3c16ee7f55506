//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_total` - Transactions committed
//! - `ledger_transactions_rejected_total{reason}` - Appends refused, by reason
//! - `ledger_full_scans_total` - Full-scan rebuilds
//! - `ledger_flushes_total` - Completed flushes
//! - `ledger_flush_duration_seconds` - Histogram of flush latencies
//! - `ledger_index` - Id of the last committed transaction

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions committed
    pub transactions_total: IntCounter,

    /// Rejected appends by reason
    pub rejected_total: IntCounterVec,

    /// Full scans run
    pub full_scans_total: IntCounter,

    /// Flushes completed
    pub flushes_total: IntCounter,

    /// Flush duration histogram
    pub flush_duration: Histogram,

    /// Last committed transaction id
    pub index: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_total", &self.transactions_total.get())
            .field("index", &self.index.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total =
            IntCounter::new("ledger_transactions_total", "Transactions committed")?;
        registry.register(Box::new(transactions_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("ledger_transactions_rejected_total", "Appends refused, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let full_scans_total = IntCounter::new("ledger_full_scans_total", "Full-scan rebuilds")?;
        registry.register(Box::new(full_scans_total.clone()))?;

        let flushes_total = IntCounter::new("ledger_flushes_total", "Completed flushes")?;
        registry.register(Box::new(flushes_total.clone()))?;

        let flush_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_flush_duration_seconds", "Histogram of flush latencies")
                .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(flush_duration.clone()))?;

        let index = IntGauge::new("ledger_index", "Id of the last committed transaction")?;
        registry.register(Box::new(index.clone()))?;

        Ok(Self {
            transactions_total,
            rejected_total,
            full_scans_total,
            flushes_total,
            flush_duration,
            index,
            registry,
        })
    }

    /// Record a committed transaction
    pub fn record_commit(&self, index: u64) {
        self.transactions_total.inc();
        self.set_index(index);
    }

    /// Record a rejected append
    pub fn record_rejection(&self, reason: &str) {
        self.rejected_total.with_label_values(&[reason]).inc();
    }

    /// Record a full scan
    pub fn record_full_scan(&self) {
        self.full_scans_total.inc();
    }

    /// Record a completed flush
    pub fn record_flush(&self, duration_seconds: f64) {
        self.flushes_total.inc();
        self.flush_duration.observe(duration_seconds);
    }

    /// Update the index gauge
    pub fn set_index(&self, index: u64) {
        self.index.set(i64::try_from(index).unwrap_or(i64::MAX));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
