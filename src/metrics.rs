//! Prometheus metrics registry and metric definitions.
//!
//! The run is a one-shot batch job, so nothing is scraped; the exposition is
//! written to a file at exit for a textfile collector to pick up.

use std::path::Path;

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("music_store_analysis".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Tables created from CSV files
pub static TABLES_LOADED: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("tables_loaded_total", "Number of tables bulk-loaded from CSV");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).expect("register tables_loaded_total");
    c
});

/// Rows inserted across all tables
pub static ROWS_LOADED: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("rows_loaded_total", "Number of CSV rows inserted");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).expect("register rows_loaded_total");
    c
});

/// DDL statements that succeeded
pub static DDL_STATEMENTS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("ddl_statements_total", "Number of successful DDL statements");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).expect("register ddl_statements_total");
    c
});

/// Teardown statements that failed and were ignored
pub static TEARDOWN_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "teardown_failures_total",
        "Number of teardown statements that failed and were ignored",
    );
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).expect("register teardown_failures_total");
    c
});

/// Histogram of analytical query durations
pub static QUERY_HISTOGRAM: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "query_duration_seconds",
        "Duration of each analytical query in seconds",
    );
    let h = Histogram::with_opts(opts).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).expect("register query_duration_seconds");
    h
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}

/// Write the text exposition to `path`.
pub fn write_metrics(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, gather_metrics())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_namespaced_counters() {
        ROWS_LOADED.inc_by(3);
        TEARDOWN_FAILURES.inc();
        let text = gather_metrics();
        assert!(text.contains("music_store_analysis_rows_loaded_total"));
        assert!(text.contains("music_store_analysis_teardown_failures_total"));
    }

    #[test]
    fn metrics_file_is_written() {
        DDL_STATEMENTS.inc();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.prom");
        write_metrics(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("music_store_analysis_ddl_statements_total"));
    }
}
