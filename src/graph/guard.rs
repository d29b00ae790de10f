//! Pre-flight guard: decide whether a traversal may run at full scale.
//!
//! [`evaluate`] is a pure function of its inputs, so identical samples and
//! limits always produce identical verdicts. [`TraversalGuard`] wires it to
//! the sampler and table statistics for a live store.
//!
//! Decision order:
//! 1. hub in the sample → abort
//! 2. many-to-many junction table → switch strategy (aggregate instead)
//! 3. sample terminated → proceed with the exact count
//! 4. sample already passed the limit → abort
//! 5. damped estimate within limit → proceed; within relaxed limit and
//!    table bound → warn and proceed; otherwise abort

use serde::Serialize;

use crate::config::schema::EstimationConfig;
use crate::db::schema::ResolvedBinding;
use crate::error::{GraphWalkError, Hazard, Result};
use crate::graph::bound::{table_stats, TableStats};
use crate::graph::budget::CallBudget;
use crate::graph::estimator::{estimate_nodes, Estimate, EstimateMethod};
use crate::graph::sampler::{GraphSampler, GrowthTrend, SampleResult};
use crate::graph::store::EdgeStore;
use crate::types::NodeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    Proceed,
    WarnAndProceed,
    Abort,
    SwitchStrategy,
}

impl GuardDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::WarnAndProceed => "warn_and_proceed",
            Self::Abort => "abort",
            Self::SwitchStrategy => "switch_strategy",
        }
    }

    /// Whether a traversal is allowed to run under this decision.
    pub fn permits_traversal(&self) -> bool {
        !matches!(self, Self::Abort)
    }
}

impl std::fmt::Display for GuardDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCause {
    HubDetected,
    JunctionTable,
    ExactCount,
    SampleExceededLimit,
    WithinLimit,
    RelaxedLimit,
    ExceedsLimit,
}

/// Alternative computation suggested by a `switch_strategy` verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Aggregate over the relation instead of enumerating paths.
    Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardVerdict {
    pub decision: GuardDecision,
    pub cause: VerdictCause,
    pub estimate: u64,
    /// Node limit that was checked.
    pub limit: u64,
    /// Cap the traversal must run under if it proceeds.
    pub effective_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_bound: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_strategy: Option<Strategy>,
    pub reason: String,
    pub growth_trend: GrowthTrend,
    pub convergence_ratio: f64,
    pub hub_detected: bool,
    pub cycle_suspected: bool,
    pub terminated: bool,
}

impl GuardVerdict {
    /// Convert an abort into the matching typed error.
    pub fn ensure_permitted(&self) -> Result<()> {
        if self.decision.permits_traversal() {
            return Ok(());
        }
        Err(match self.cause {
            VerdictCause::HubDetected => GraphWalkError::StructuralHazard {
                hazard: Hazard::Hub,
                reason: self.reason.clone(),
            },
            _ => GraphWalkError::ResourceLimitExceeded {
                estimate: self.estimate,
                limit: self.limit,
                depth_reached: 0,
                reason: self.reason.clone(),
            },
        })
    }
}

/// Decide from a sample, the requested depth and limit, and optional table
/// statistics.
pub fn evaluate(
    sample: &SampleResult,
    target_depth: u32,
    node_limit: u64,
    stats: Option<&TableStats>,
    config: &EstimationConfig,
) -> GuardVerdict {
    let table_bound = stats.map(|s| s.table_bound(sample.direction));
    let relaxed_limit = config.relaxed_limit(node_limit);
    let estimate = estimate_nodes(sample, target_depth, table_bound, config);

    let verdict = |decision: GuardDecision, cause: VerdictCause, estimate: u64, effective_limit: u64, reason: String| {
        GuardVerdict {
            decision,
            cause,
            estimate,
            limit: node_limit,
            effective_limit,
            table_bound,
            suggested_strategy: (decision == GuardDecision::SwitchStrategy).then_some(Strategy::Aggregate),
            reason,
            growth_trend: sample.growth_trend,
            convergence_ratio: sample.convergence_ratio,
            hub_detected: sample.hub_detected,
            cycle_suspected: sample.has_cycles,
            terminated: sample.terminated,
        }
    };

    if sample.hub_detected {
        return verdict(
            GuardDecision::Abort,
            VerdictCause::HubDetected,
            estimate.estimated_nodes,
            node_limit,
            format!(
                "hub detected: a level expanded {:.0}x (threshold {:.0}x); size estimate is unreliable",
                sample.max_expansion_factor, config.hub_threshold
            ),
        );
    }

    if let Some(s) = stats.filter(|s| s.is_junction()) {
        return verdict(
            GuardDecision::SwitchStrategy,
            VerdictCause::JunctionTable,
            estimate.estimated_nodes,
            node_limit,
            format!(
                "edge table looks like a many-to-many junction (avg out {:.1}, avg in {:.1}, no shared keys); \
                 aggregate instead of enumerating",
                s.avg_out_degree(),
                s.avg_in_degree()
            ),
        );
    }

    if sample.terminated {
        let exact = sample.total_nodes;
        return if exact <= node_limit {
            verdict(
                GuardDecision::Proceed,
                VerdictCause::ExactCount,
                estimate.estimated_nodes,
                node_limit,
                format!("reachable subgraph fully sampled: {exact} nodes"),
            )
        } else if exact <= relaxed_limit {
            verdict(
                GuardDecision::WarnAndProceed,
                VerdictCause::RelaxedLimit,
                estimate.estimated_nodes,
                relaxed_limit,
                format!("exactly {exact} nodes reachable, above limit {node_limit} but within relaxed limit {relaxed_limit}"),
            )
        } else {
            verdict(
                GuardDecision::Abort,
                VerdictCause::ExceedsLimit,
                estimate.estimated_nodes,
                node_limit,
                format!("exactly {exact} nodes reachable, limit is {node_limit}"),
            )
        };
    }

    if sample.exceeded_limit && sample.total_nodes > relaxed_limit {
        return verdict(
            GuardDecision::Abort,
            VerdictCause::SampleExceededLimit,
            estimate.estimated_nodes,
            node_limit,
            format!(
                "probe already saw {} nodes by depth {} (limit {node_limit}); estimated {} at depth {target_depth}",
                sample.total_nodes,
                sample.depth_probed(),
                estimate.estimated_nodes
            ),
        );
    }

    decide_on_estimate(&estimate, node_limit, relaxed_limit, table_bound, target_depth, &verdict)
}

fn decide_on_estimate<F>(
    estimate: &Estimate,
    node_limit: u64,
    relaxed_limit: u64,
    table_bound: Option<u64>,
    target_depth: u32,
    verdict: &F,
) -> GuardVerdict
where
    F: Fn(GuardDecision, VerdictCause, u64, u64, String) -> GuardVerdict,
{
    let n = estimate.estimated_nodes;
    let method = match estimate.method {
        EstimateMethod::Exact => "exact",
        EstimateMethod::Sampled => "sampled",
        EstimateMethod::Extrapolated => "extrapolated",
    };
    if n <= node_limit {
        return verdict(
            GuardDecision::Proceed,
            VerdictCause::WithinLimit,
            n,
            node_limit,
            format!("{method} estimate {n} within limit {node_limit} at depth {target_depth}"),
        );
    }
    let within_bound = table_bound.map_or(true, |b| n <= b);
    if n <= relaxed_limit && within_bound {
        return verdict(
            GuardDecision::WarnAndProceed,
            VerdictCause::RelaxedLimit,
            n,
            relaxed_limit,
            format!("{method} estimate {n} exceeds limit {node_limit} but is within relaxed limit {relaxed_limit}"),
        );
    }
    verdict(
        GuardDecision::Abort,
        VerdictCause::ExceedsLimit,
        n,
        node_limit,
        format!(
            "{method} estimate {n} exceeds limit {node_limit} at depth {target_depth}; \
             reduce depth, add a filter or raise the limit"
        ),
    )
}

// ---------------------------------------------------------------------------
// TraversalGuard
// ---------------------------------------------------------------------------

/// Runs the sampler and table statistics against a store, then [`evaluate`]s.
pub struct TraversalGuard<'a> {
    store: &'a EdgeStore,
    config: &'a EstimationConfig,
}

/// Everything the guard learned, for callers that need more than the verdict.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub verdict: GuardVerdict,
    pub sample: SampleResult,
    pub stats: TableStats,
}

impl<'a> TraversalGuard<'a> {
    pub fn new(store: &'a EdgeStore, config: &'a EstimationConfig) -> Self {
        Self { store, config }
    }

    pub fn assess(
        &self,
        binding: &ResolvedBinding,
        start: &NodeKey,
        target_depth: u32,
        node_limit: u64,
        budget: &CallBudget,
    ) -> Result<Assessment> {
        let ceiling = self.config.relaxed_limit(node_limit);
        let sample = GraphSampler::new(self.store, binding, self.config).sample(
            start,
            self.config.probe_depth.min(target_depth.max(1)),
            Some(ceiling),
            budget,
        )?;
        let stats = table_stats(self.store, binding, budget)?;
        let verdict = evaluate(&sample, target_depth, node_limit, Some(&stats), self.config);

        match verdict.decision {
            GuardDecision::Proceed => tracing::info!(
                start = %start,
                estimate = verdict.estimate,
                limit = verdict.limit,
                "guard: proceed"
            ),
            decision => tracing::warn!(
                start = %start,
                %decision,
                estimate = verdict.estimate,
                limit = verdict.limit,
                reason = %verdict.reason,
                "guard verdict"
            ),
        }

        Ok(Assessment {
            verdict,
            sample,
            stats,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
