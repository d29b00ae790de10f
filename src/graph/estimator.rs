//! Damped size forecast for a traversal, derived from a [`SampleResult`].
//!
//! Naive geometric extrapolation badly overestimates real DAGs where
//! children are shared, so the observed growth factor is damped before it
//! is compounded over the unprobed levels:
//!
//! - `base_damping` always,
//! - `sharing_damping` when the convergence ratio shows node sharing,
//! - `decreasing_damping` when the growth trend is decreasing.
//!
//! The result is clamped to the structural table bound when one is known.

use serde::Serialize;

use crate::config::schema::EstimationConfig;
use crate::graph::sampler::{GrowthTrend, SampleResult};

/// How an estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    /// The probe exhausted the graph; count times safety margin.
    Exact,
    /// The target depth lies within the probed levels.
    Sampled,
    /// Damped geometric extrapolation beyond the probe.
    Extrapolated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    pub estimated_nodes: u64,
    pub method: EstimateMethod,
    /// Observed per-level growth before damping.
    pub growth_factor: f64,
    /// Product of all damping multipliers applied.
    pub damping: f64,
    pub clamped_to_bound: bool,
}

/// Forecast the number of nodes a traversal to `target_depth` would visit.
pub fn estimate_nodes(
    sample: &SampleResult,
    target_depth: u32,
    table_bound: Option<u64>,
    config: &EstimationConfig,
) -> Estimate {
    let growth_factor = observed_growth(&sample.level_sizes());
    let damping = damping_for(sample, config);

    let (raw, method) = if sample.terminated {
        let exact = (sample.total_nodes as f64 * config.safety_margin).ceil();
        (exact, EstimateMethod::Exact)
    } else if target_depth <= sample.depth_probed() {
        (sample.nodes_through(target_depth) as f64, EstimateMethod::Sampled)
    } else {
        let remaining = target_depth - sample.depth_probed();
        let last_level = sample.levels.last().map(|l| l.nodes).unwrap_or(0) as f64;
        let projected = geometric_tail(last_level, growth_factor * damping, remaining);
        (
            sample.total_nodes as f64 + projected,
            EstimateMethod::Extrapolated,
        )
    };

    let mut estimated_nodes = saturating_u64(raw);
    let mut clamped_to_bound = false;
    if let Some(bound) = table_bound {
        if estimated_nodes > bound {
            estimated_nodes = bound;
            clamped_to_bound = true;
        }
    }

    tracing::debug!(
        estimated_nodes,
        ?method,
        growth_factor,
        damping,
        clamped_to_bound,
        "estimated traversal size"
    );

    Estimate {
        estimated_nodes,
        method,
        growth_factor,
        damping,
        clamped_to_bound,
    }
}

/// Compounded damping multiplier for this sample.
pub fn damping_for(sample: &SampleResult, config: &EstimationConfig) -> f64 {
    let mut damping = config.base_damping;
    if sample.convergence_ratio < config.sharing_threshold {
        damping *= config.sharing_damping;
    }
    if sample.growth_trend == GrowthTrend::Decreasing {
        damping *= config.decreasing_damping;
    }
    damping
}

/// Geometric mean of the last (up to three) level-to-level ratios.
fn observed_growth(sizes: &[u64]) -> f64 {
    let ratios: Vec<f64> = sizes
        .windows(2)
        .filter(|w| w[0] > 0)
        .map(|w| w[1] as f64 / w[0] as f64)
        .collect();
    let window = &ratios[ratios.len().saturating_sub(3)..];
    if window.is_empty() {
        return 0.0;
    }
    if window.iter().any(|r| *r == 0.0) {
        return 0.0;
    }
    let log_mean = window.iter().map(|r| r.ln()).sum::<f64>() / window.len() as f64;
    log_mean.exp()
}

/// `first * (r + r^2 + ... + r^levels)`.
fn geometric_tail(first: f64, r: f64, levels: u32) -> f64 {
    let mut total = 0.0;
    let mut term = first;
    for _ in 0..levels {
        term *= r;
        total += term;
        if !total.is_finite() {
            return f64::MAX;
        }
    }
    total
}

fn saturating_u64(v: f64) -> u64 {
    if !v.is_finite() || v >= u64::MAX as f64 {
        u64::MAX
    } else if v <= 0.0 {
        0
    } else {
        v.ceil() as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::sampler::{LevelChange, LevelSample};
    use crate::types::{Direction, NodeKey};

    fn sample_from(sizes: &[u64], edges_per_node: f64, terminated: bool) -> SampleResult {
        let levels: Vec<LevelSample> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| LevelSample {
                depth: i as u32 + 1,
                nodes: n,
                edges: (n as f64 * edges_per_node) as u64,
                change: LevelChange::Grew,
                expansion_factor: 1.0,
            })
            .collect();
        let total_nodes: u64 = sizes.iter().sum();
        let total_edges: u64 = levels.iter().map(|l| l.edges).sum();
        SampleResult {
            start: NodeKey::Int(1),
            direction: Direction::Outbound,
            probe_depth: 5,
            growth_trend: GrowthTrend::Increasing,
            levels,
            total_nodes,
            total_edges,
            convergence_ratio: if total_edges == 0 {
                1.0
            } else {
                total_nodes as f64 / total_edges as f64
            },
            has_cycles: false,
            hub_detected: false,
            max_expansion_factor: 1.0,
            terminated,
            exceeded_limit: false,
        }
    }

    #[test]
    fn terminated_sample_returns_exact_count_with_margin() {
        let s = sample_from(&[3, 4, 0], 1.0, true);
        let est = estimate_nodes(&s, 20, None, &EstimationConfig::default());
        assert_eq!(est.method, EstimateMethod::Exact);
        // 7 * 1.05 = 7.35 -> 8
        assert_eq!(est.estimated_nodes, 8);
    }

    #[test]
    fn target_inside_probe_uses_sampled_prefix() {
        let s = sample_from(&[2, 4, 8, 16, 32], 1.0, false);
        let est = estimate_nodes(&s, 3, None, &EstimationConfig::default());
        assert_eq!(est.method, EstimateMethod::Sampled);
        assert_eq!(est.estimated_nodes, 14);
    }

    #[test]
    fn extrapolation_is_damped() {
        let s = sample_from(&[2, 4, 8, 16, 32], 1.0, false);
        let config = EstimationConfig::default();
        let est = estimate_nodes(&s, 7, None, &config);
        assert_eq!(est.method, EstimateMethod::Extrapolated);
        assert!((est.growth_factor - 2.0).abs() < 1e-9);
        assert!((est.damping - 0.85).abs() < 1e-9);
        // 62 + 32*1.7 + 32*1.7^2 = 62 + 54.4 + 92.48
        assert_eq!(est.estimated_nodes, 209);
        let undamped = 62 + 64 + 128;
        assert!(est.estimated_nodes < undamped);
    }

    #[test]
    fn sharing_adds_damping() {
        let tree = sample_from(&[2, 4, 8, 16, 32], 1.0, false);
        let dag = sample_from(&[2, 4, 8, 16, 32], 2.0, false);
        let config = EstimationConfig::default();
        let tree_est = estimate_nodes(&tree, 10, None, &config);
        let dag_est = estimate_nodes(&dag, 10, None, &config);
        assert!((dag_est.damping - 0.85 * 0.7).abs() < 1e-9);
        assert!(dag_est.estimated_nodes < tree_est.estimated_nodes);
    }

    #[test]
    fn decreasing_trend_adds_damping() {
        let mut s = sample_from(&[8, 4, 2], 1.0, false);
        s.growth_trend = GrowthTrend::Decreasing;
        let d = damping_for(&s, &EstimationConfig::default());
        assert!((d - 0.85 * 0.6).abs() < 1e-9);
    }

    #[test]
    fn estimate_is_clamped_to_table_bound() {
        let s = sample_from(&[10, 100, 1000], 1.0, false);
        let est = estimate_nodes(&s, 30, Some(5_000), &EstimationConfig::default());
        assert_eq!(est.estimated_nodes, 5_000);
        assert!(est.clamped_to_bound);
    }

    #[test]
    fn huge_extrapolation_saturates() {
        let s = sample_from(&[40, 1600, 64000], 1.0, false);
        let est = estimate_nodes(&s, 50, None, &EstimationConfig::default());
        assert!(est.estimated_nodes > 1_000_000_000);
    }

    #[test]
    fn observed_growth_uses_last_three_ratios() {
        // ratios: 2, 2, 2, 8 -> last three 2,2,8 -> geomean 3.1748
        let g = observed_growth(&[1, 2, 4, 8, 64]);
        assert!((g - 32f64.cbrt()).abs() < 1e-9);
    }
}
