//! Frontier-batched BFS over a self-referential edge table.
//!
//! Each depth level costs exactly one round trip: the whole frontier is
//! expanded by a single [`EdgeFetcher`] statement. Before the walk starts,
//! the [`TraversalGuard`] probes the graph and may refuse the call; the
//! verdict is always returned to the caller, never only logged.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::config::schema::{EngineConfig, EstimationConfig};
use crate::db::schema::{resolve_binding, ResolvedBinding};
use crate::error::{GraphWalkError, Result};
use crate::graph::bound::table_stats;
use crate::graph::budget::{CallBudget, CancelToken};
use crate::graph::estimator::{estimate_nodes, EstimateMethod};
use crate::graph::fetcher::EdgeFetcher;
use crate::graph::guard::{Assessment, GuardVerdict, TraversalGuard};
use crate::graph::sampler::{GraphSampler, GrowthTrend, LevelSample};
use crate::graph::store::EdgeStore;
use crate::observability::Metrics;
use crate::types::{EdgeBinding, NodeKey, NodeRef, StopCondition, TraversedEdge};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Parameters of one `traverse` call.
#[derive(Debug, Clone)]
pub struct TraversalRequest {
    pub start: NodeKey,
    /// Requested depth; `None` uses the configured default. Always clamped
    /// to the absolute ceiling.
    pub max_depth: Option<u32>,
    pub stop: Option<StopCondition>,
    pub include_start: bool,
    /// Overrides the configured `max_nodes`.
    pub node_limit: Option<u64>,
    pub skip_estimation: bool,
    /// Opt into the guard's relaxed limit for this call.
    pub relaxed_limits: bool,
    pub cancel: Option<CancelToken>,
}

impl TraversalRequest {
    pub fn new(start: impl Into<NodeKey>) -> Self {
        Self {
            start: start.into(),
            max_depth: None,
            stop: None,
            include_start: false,
            node_limit: None,
            skip_estimation: false,
            relaxed_limits: false,
            cancel: None,
        }
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn stop_when(mut self, stop: StopCondition) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn include_start(mut self) -> Self {
        self.include_start = true;
        self
    }

    pub fn node_limit(mut self, limit: u64) -> Self {
        self.node_limit = Some(limit);
        self
    }

    pub fn skip_estimation(mut self) -> Self {
        self.skip_estimation = true;
        self
    }

    pub fn relaxed_limits(mut self) -> Self {
        self.relaxed_limits = true;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraversalResult {
    /// Visited nodes in discovery order.
    pub nodes: Vec<NodeRef>,
    /// First-discovery (shortest-hop) path from the start to each node.
    pub paths: BTreeMap<NodeKey, Vec<NodeKey>>,
    pub edges: Vec<TraversedEdge>,
    pub depth_reached: u32,
    pub nodes_visited: u64,
    /// Nodes that matched the stop condition and were not expanded.
    pub terminated_at: BTreeSet<NodeKey>,
    /// Guard verdict, absent only when estimation was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<GuardVerdict>,
    pub metrics: Metrics,
}

impl TraversalResult {
    fn empty(verdict: Option<GuardVerdict>, metrics: Metrics) -> Self {
        Self {
            nodes: Vec::new(),
            paths: BTreeMap::new(),
            edges: Vec::new(),
            depth_reached: 0,
            nodes_visited: 0,
            terminated_at: BTreeSet::new(),
            verdict,
            metrics,
        }
    }
}

/// Result of a standalone estimation call.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateReport {
    pub estimated_nodes: u64,
    pub method: EstimateMethod,
    pub terminated: bool,
    pub growth_trend: GrowthTrend,
    pub convergence_ratio: f64,
    pub hub_detected: bool,
    pub cycle_suspected: bool,
    pub table_bound: u64,
    pub levels: Vec<LevelSample>,
}

// ---------------------------------------------------------------------------
// GraphTraversal
// ---------------------------------------------------------------------------

/// Entry point for traversal, aggregation, estimation and guard calls.
///
/// Holds no per-call state: every call builds its own frontier, visited set
/// and maps, and drops them on return.
pub struct GraphTraversal<'a> {
    pub(crate) store: &'a EdgeStore,
    pub(crate) config: &'a EngineConfig,
}

impl<'a> GraphTraversal<'a> {
    pub fn new(store: &'a EdgeStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    // -------------------------------------------------------------------
    // traverse
    // -------------------------------------------------------------------

    /// Walk outward from `request.start` level by level.
    ///
    /// An unknown start key yields an empty result. Exceeding the node cap
    /// is an error, never a truncated result.
    pub fn traverse(&self, binding: &EdgeBinding, request: &TraversalRequest) -> Result<TraversalResult> {
        let budget = CallBudget::new(&self.config.limits, request.cancel.clone());
        let queries_before = self.store.queries_issued();
        let resolved = resolve_binding(self.store, binding, &budget)?;
        let max_depth = self.requested_depth(request.max_depth);
        let node_limit = request.node_limit.unwrap_or(self.config.limits.max_nodes);

        let guard_before = self.store.queries_issued();
        let assessment = self.preflight(
            &resolved,
            &request.start,
            max_depth,
            node_limit,
            request.skip_estimation,
            request.relaxed_limits,
            &budget,
        )?;
        let mut metrics = Metrics {
            guard_queries: self.store.queries_issued() - guard_before,
            ..Metrics::new()
        };
        let verdict = assessment.map(|a| a.verdict);
        let cap = verdict.as_ref().map_or(node_limit, |v| v.effective_limit);

        let start = request.start.clone();
        let fetcher = EdgeFetcher::new(self.store, &resolved).anchored_at(&start);
        let mut nodes: Vec<NodeRef> = Vec::new();

        if request.include_start {
            match fetcher.probe_node(&start, &budget)? {
                Some(attributes) => nodes.push(NodeRef {
                    key: start.clone(),
                    depth: 0,
                    attributes,
                }),
                None => {
                    tracing::debug!(start = %start, "start node not found");
                    metrics.queries_issued = self.store.queries_issued() - queries_before;
                    metrics.elapsed_ms = budget.elapsed_ms();
                    return Ok(TraversalResult::empty(verdict, metrics));
                }
            }
        }

        let mut visited: HashSet<NodeKey> = HashSet::from([start.clone()]);
        let mut paths: BTreeMap<NodeKey, Vec<NodeKey>> = BTreeMap::new();
        paths.insert(start.clone(), vec![start.clone()]);
        let mut edges: Vec<TraversedEdge> = Vec::new();
        let mut seen_edges: HashSet<(NodeKey, NodeKey)> = HashSet::new();
        let mut terminated_at: BTreeSet<NodeKey> = BTreeSet::new();
        let mut frontier = vec![start.clone()];
        let mut depth: u32 = 0;
        let mut depth_reached: u32 = 0;
        let mut discovered: u64 = 0;

        while !frontier.is_empty() && depth < max_depth {
            budget.checkpoint(depth)?;
            let batch = fetcher.fetch(&frontier, &budget, depth)?;
            metrics.edges_fetched += batch.len() as u64;
            metrics.levels_expanded += 1;

            let mut next = Vec::new();
            for edge in batch {
                let traversed = edge.to_traversed(depth);
                if seen_edges.insert((traversed.source.clone(), traversed.target.clone())) {
                    edges.push(traversed);
                }
                if visited.contains(&edge.reached) {
                    continue;
                }
                discovered += 1;
                if discovered > cap {
                    return Err(GraphWalkError::ResourceLimitExceeded {
                        estimate: verdict.as_ref().map_or(discovered, |v| v.estimate.max(discovered)),
                        limit: cap,
                        depth_reached: depth + 1,
                        reason: format!("traversal discovered more than {cap} nodes"),
                    });
                }
                visited.insert(edge.reached.clone());

                let mut path = paths.get(&edge.frontier).cloned().ok_or_else(|| {
                    GraphWalkError::InvalidBinding(format!("no path recorded for frontier node {}", edge.frontier))
                })?;
                path.push(edge.reached.clone());
                paths.insert(edge.reached.clone(), path);

                let node = NodeRef {
                    key: edge.reached,
                    depth: depth + 1,
                    attributes: edge.attributes,
                };
                if request.stop.as_ref().is_some_and(|s| s.matches(&node)) {
                    terminated_at.insert(node.key.clone());
                } else {
                    next.push(node.key.clone());
                }
                depth_reached = depth + 1;
                nodes.push(node);
            }

            tracing::debug!(depth = depth + 1, discovered = next.len(), total = discovered, "expanded level");
            frontier = next;
            depth += 1;
        }

        if !request.include_start {
            paths.remove(&start);
        }

        metrics.nodes_visited = nodes.len() as u64;
        metrics.queries_issued = self.store.queries_issued() - queries_before;
        metrics.elapsed_ms = budget.elapsed_ms();
        tracing::info!(
            start = %start,
            nodes = nodes.len(),
            depth_reached,
            queries = metrics.queries_issued,
            "traversal complete"
        );

        Ok(TraversalResult {
            nodes_visited: nodes.len() as u64,
            nodes,
            paths,
            edges,
            depth_reached,
            terminated_at,
            verdict,
            metrics,
        })
    }

    // -------------------------------------------------------------------
    // estimate
    // -------------------------------------------------------------------

    /// Sample from `start` and forecast a traversal to `target_depth`.
    ///
    /// Usable on its own by components that load whole subgraphs.
    pub fn estimate(
        &self,
        binding: &EdgeBinding,
        start: &NodeKey,
        probe_depth: Option<u32>,
        target_depth: u32,
    ) -> Result<EstimateReport> {
        let budget = CallBudget::new(&self.config.limits, None);
        let resolved = resolve_binding(self.store, binding, &budget)?;
        let est_config = &self.config.estimation;
        let target_depth = self.requested_depth(Some(target_depth));
        // Levels past the target would only inflate the forecast.
        let probe_depth = probe_depth
            .unwrap_or(est_config.probe_depth)
            .min(target_depth.max(1));

        let sample = GraphSampler::new(self.store, &resolved, est_config).sample(start, probe_depth, None, &budget)?;
        let stats = table_stats(self.store, &resolved, &budget)?;
        let table_bound = stats.table_bound(resolved.direction);
        let estimate = estimate_nodes(&sample, target_depth, Some(table_bound), est_config);

        Ok(EstimateReport {
            estimated_nodes: estimate.estimated_nodes,
            method: estimate.method,
            terminated: sample.terminated,
            growth_trend: sample.growth_trend,
            convergence_ratio: sample.convergence_ratio,
            hub_detected: sample.hub_detected,
            cycle_suspected: sample.has_cycles,
            table_bound,
            levels: sample.levels,
        })
    }

    // -------------------------------------------------------------------
    // assess
    // -------------------------------------------------------------------

    /// Run the guard without traversing. Aborts are returned as verdicts.
    pub fn assess(
        &self,
        binding: &EdgeBinding,
        start: &NodeKey,
        target_depth: u32,
        node_limit: Option<u64>,
    ) -> Result<GuardVerdict> {
        let budget = CallBudget::new(&self.config.limits, None);
        let resolved = resolve_binding(self.store, binding, &budget)?;
        let limit = node_limit.unwrap_or(self.config.limits.max_nodes);
        let assessment = TraversalGuard::new(self.store, &self.config.estimation).assess(
            &resolved,
            start,
            self.requested_depth(Some(target_depth)),
            limit,
            &budget,
        )?;
        Ok(assessment.verdict)
    }

    // -------------------------------------------------------------------
    // shared helpers
    // -------------------------------------------------------------------

    pub(crate) fn requested_depth(&self, requested: Option<u32>) -> u32 {
        self.config
            .limits
            .clamp_depth(requested.unwrap_or(self.config.limits.max_depth))
    }

    /// Run the guard unless skipped; aborts become typed errors.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn preflight(
        &self,
        resolved: &ResolvedBinding,
        start: &NodeKey,
        max_depth: u32,
        node_limit: u64,
        skip: bool,
        relaxed: bool,
        budget: &CallBudget,
    ) -> Result<Option<Assessment>> {
        if skip {
            tracing::debug!(start = %start, "estimation skipped by caller");
            return Ok(None);
        }
        let est_config = EstimationConfig {
            allow_relaxed_limits: self.config.estimation.allow_relaxed_limits || relaxed,
            ..self.config.estimation.clone()
        };
        let assessment =
            TraversalGuard::new(self.store, &est_config).assess(resolved, start, max_depth, node_limit, budget)?;
        assessment.verdict.ensure_permitted()?;
        Ok(Some(assessment))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
