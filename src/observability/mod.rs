//! Structured logging and per-call metrics.
//!
//! This module provides:
//! - [`init_logging`]: one-time structured logging setup with `RUST_LOG` support
//! - [`Metrics`]: per-call counters returned alongside traversal results

use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Initialize structured logging with `RUST_LOG` environment variable support.
///
/// Defaults to `graphwalk=info` when `RUST_LOG` is not set. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("graphwalk=info"));

    // try_init so double-init in tests doesn't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Counters for a single traversal, aggregation or estimation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Statements issued against the store during the call, guard included.
    pub queries_issued: u64,
    /// Statements issued by the guard's sampler and statistics probes.
    pub guard_queries: u64,
    pub edges_fetched: u64,
    pub levels_expanded: u32,
    pub nodes_visited: u64,
    pub elapsed_ms: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "queries_issued": self.queries_issued,
            "guard_queries": self.guard_queries,
            "edges_fetched": self.edges_fetched,
            "levels_expanded": self.levels_expanded,
            "nodes_visited": self.nodes_visited,
            "elapsed_ms": self.elapsed_ms,
        })
    }

    /// Average edges pulled per round trip, 0.0 before any query.
    pub fn edges_per_query(&self) -> f64 {
        if self.queries_issued == 0 {
            return 0.0;
        }
        self.edges_fetched as f64 / self.queries_issued as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_twice_does_not_panic() {
        init_logging();
        init_logging();
    }

    #[test]
    fn metrics_json_has_all_fields() {
        let m = Metrics {
            queries_issued: 4,
            edges_fetched: 10,
            ..Metrics::new()
        };
        let json = m.to_json();
        assert_eq!(json["queries_issued"], 4);
        assert_eq!(json["edges_fetched"], 10);
        assert_eq!(json["levels_expanded"], 0);
        assert_eq!(m.edges_per_query(), 2.5);
    }

    #[test]
    fn edges_per_query_zero_without_queries() {
        assert_eq!(Metrics::new().edges_per_query(), 0.0);
    }
}
