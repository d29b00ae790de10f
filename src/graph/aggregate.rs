//! Diamond-safe path aggregation.
//!
//! The reachable subgraph is collected first with the same frontier-batched
//! BFS as [`GraphTraversal::traverse`], keeping *every* edge rather than only
//! first discoveries. A single Kahn pass then folds the edge values along
//! all start-to-node paths. Each node carries `(path_count, aggregate)`, so
//! no path is ever enumerated.
//!
//! | op         | value at a node                                  |
//! |------------|--------------------------------------------------|
//! | `count`    | number of distinct paths                         |
//! | `sum`      | sum over paths of the summed edge values         |
//! | `multiply` | sum over paths of the product of edge values     |
//! | `max`      | largest edge value on any path                   |
//! | `min`      | smallest edge value on any path                  |

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::schema::EngineConfig;
use crate::db::schema::resolve_binding;
use crate::error::{GraphWalkError, Hazard, Result};
use crate::graph::budget::{CallBudget, CancelToken};
use crate::graph::fetcher::EdgeFetcher;
use crate::graph::guard::GuardVerdict;
use crate::graph::traversal::GraphTraversal;
use crate::observability::Metrics;
use crate::types::{Direction, EdgeBinding, NodeKey};

// ---------------------------------------------------------------------------
// AggregateOp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Multiply,
    Max,
    Min,
    Count,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Multiply => "multiply",
            Self::Max => "max",
            Self::Min => "min",
            Self::Count => "count",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "multiply" | "product" => Ok(Self::Multiply),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "count" => Ok(Self::Count),
            other => Err(GraphWalkError::InvalidBinding(format!(
                "unknown aggregate operation '{other}' (expected sum, multiply, max, min or count)"
            ))),
        }
    }

    /// Whether the binding must name a value column.
    pub fn needs_values(&self) -> bool {
        !matches!(self, Self::Count)
    }

    /// Aggregate carried by the start node.
    pub fn seed(&self) -> Option<f64> {
        match self {
            Self::Sum => Some(0.0),
            Self::Multiply | Self::Count => Some(1.0),
            Self::Max | Self::Min => None,
        }
    }

    /// Contribution of one edge `parent -> child` to the child, given the
    /// parent's aggregate over its `parent_paths` paths. A NULL edge value
    /// acts as the operation's identity.
    pub fn extend(&self, parent: Option<f64>, parent_paths: f64, value: Option<f64>) -> Option<f64> {
        match self {
            Self::Count => Some(parent_paths),
            Self::Sum => Some(parent.unwrap_or(0.0) + parent_paths * value.unwrap_or(0.0)),
            Self::Multiply => Some(parent.unwrap_or(1.0) * value.unwrap_or(1.0)),
            Self::Max => pick(parent, value, f64::max),
            Self::Min => pick(parent, value, f64::min),
        }
    }

    /// Fold a contribution into a child's running aggregate.
    pub fn merge(&self, acc: Option<f64>, contribution: Option<f64>) -> Option<f64> {
        match self {
            Self::Count | Self::Sum | Self::Multiply => match (acc, contribution) {
                (Some(a), Some(c)) => Some(a + c),
                (a, c) => a.or(c),
            },
            Self::Max => pick(acc, contribution, f64::max),
            Self::Min => pick(acc, contribution, f64::min),
        }
    }
}

impl std::fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateOp {
    type Err = GraphWalkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn pick(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(f(x, y)),
        (x, y) => x.or(y),
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub start: NodeKey,
    pub operation: AggregateOp,
    pub max_depth: Option<u32>,
    pub node_limit: Option<u64>,
    pub skip_estimation: bool,
    pub relaxed_limits: bool,
    pub cancel: Option<CancelToken>,
}

impl AggregateRequest {
    pub fn new(start: impl Into<NodeKey>, operation: AggregateOp) -> Self {
        Self {
            start: start.into(),
            operation,
            max_depth: None,
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
pub struct AggregateResult {
    pub operation: AggregateOp,
    /// Aggregate per reachable node (start excluded). A `max`/`min` node
    /// whose paths carry only NULL values has no entry.
    pub aggregates: BTreeMap<NodeKey, f64>,
    /// Number of distinct start-to-node paths.
    pub path_counts: BTreeMap<NodeKey, u64>,
    pub total_nodes: u64,
    pub max_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<GuardVerdict>,
    pub metrics: Metrics,
}

/// One collected edge, by index into the node table.
struct Link {
    parent: usize,
    child: usize,
    value: Option<f64>,
}

impl<'a> GraphTraversal<'a> {
    /// Fold edge values over every path from `request.start`.
    ///
    /// Fails with [`GraphWalkError::StructuralHazard`] when the reachable
    /// subgraph contains a cycle, and rejects `both`-direction bindings.
    pub fn path_aggregate(&self, binding: &EdgeBinding, request: &AggregateRequest) -> Result<AggregateResult> {
        let op = request.operation;
        if binding.direction == Direction::Both {
            return Err(GraphWalkError::InvalidBinding(
                "path aggregation needs a directed binding (outbound or inbound)".into(),
            ));
        }
        if op.needs_values() && binding.value_column.is_none() {
            return Err(GraphWalkError::InvalidBinding(format!(
                "aggregate '{op}' requires a value_column"
            )));
        }

        let config: &EngineConfig = self.config;
        let budget = CallBudget::new(&config.limits, request.cancel.clone());
        let queries_before = self.store.queries_issued();
        let resolved = resolve_binding(self.store, binding, &budget)?;
        let max_depth = self.requested_depth(request.max_depth);
        let node_limit = request.node_limit.unwrap_or(config.limits.max_nodes);

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
        if let Some(a) = &assessment {
            if a.sample.has_cycles {
                return Err(GraphWalkError::StructuralHazard {
                    hazard: Hazard::Cycle,
                    reason: format!("sample from {} found a cycle; {op} aggregation needs a DAG", request.start),
                });
            }
        }
        let verdict = assessment.map(|a| a.verdict);
        let cap = verdict.as_ref().map_or(node_limit, |v| v.effective_limit);

        // Collect the reachable subgraph.
        let fetcher = EdgeFetcher::new(self.store, &resolved)
            .with_values()
            .anchored_at(&request.start);
        let mut index: HashMap<NodeKey, usize> = HashMap::new();
        let mut keys: Vec<NodeKey> = vec![request.start.clone()];
        let mut depths: Vec<u32> = vec![0];
        index.insert(request.start.clone(), 0);
        let mut arcs: Vec<Link> = Vec::new();
        let mut frontier = vec![request.start.clone()];
        let mut depth: u32 = 0;

        while !frontier.is_empty() && depth < max_depth {
            budget.checkpoint(depth)?;
            let batch = fetcher.fetch(&frontier, &budget, depth)?;
            metrics.edges_fetched += batch.len() as u64;
            metrics.levels_expanded += 1;

            let mut next = Vec::new();
            for edge in batch {
                let parent = index.get(&edge.frontier).copied().ok_or_else(|| {
                    GraphWalkError::InvalidBinding(format!("frontier node {} was never discovered", edge.frontier))
                })?;
                let child = match index.get(&edge.reached) {
                    Some(&i) => i,
                    None => {
                        let discovered = keys.len() as u64;
                        if discovered > cap {
                            return Err(GraphWalkError::ResourceLimitExceeded {
                                estimate: verdict.as_ref().map_or(discovered, |v| v.estimate.max(discovered)),
                                limit: cap,
                                depth_reached: depth + 1,
                                reason: format!("aggregation discovered more than {cap} nodes"),
                            });
                        }
                        let i = keys.len();
                        index.insert(edge.reached.clone(), i);
                        keys.push(edge.reached.clone());
                        depths.push(depth + 1);
                        next.push(edge.reached.clone());
                        i
                    }
                };
                arcs.push(Link {
                    parent,
                    child,
                    value: edge.value,
                });
            }
            tracing::debug!(depth = depth + 1, discovered = next.len(), arcs = arcs.len(), "collected level");
            frontier = next;
            depth += 1;
        }

        let (aggregates, path_counts) = accumulate(op, &keys, &arcs)?;

        metrics.nodes_visited = (keys.len() - 1) as u64;
        metrics.queries_issued = self.store.queries_issued() - queries_before;
        metrics.elapsed_ms = budget.elapsed_ms();
        tracing::info!(
            start = %request.start,
            %op,
            nodes = keys.len() - 1,
            arcs = arcs.len(),
            "path aggregation complete"
        );

        Ok(AggregateResult {
            operation: op,
            aggregates,
            path_counts,
            total_nodes: (keys.len() - 1) as u64,
            max_depth: depths.iter().copied().max().unwrap_or(0),
            verdict,
            metrics,
        })
    }
}

type Accumulated = (BTreeMap<NodeKey, f64>, BTreeMap<NodeKey, u64>);

/// Kahn pass over the collected links. Node 0 is the start.
fn accumulate(op: AggregateOp, keys: &[NodeKey], links: &[Link]) -> Result<Accumulated> {
    let n = keys.len();
    let mut in_degree = vec![0usize; n];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, link) in links.iter().enumerate() {
        in_degree[link.child] += 1;
        outgoing[link.parent].push(i);
    }

    let mut paths = vec![0f64; n];
    let mut values: Vec<Option<f64>> = vec![None; n];
    paths[0] = 1.0;
    values[0] = op.seed();

    let mut queue: VecDeque<usize> = VecDeque::new();
    if in_degree[0] == 0 {
        queue.push_back(0);
    }
    let mut settled = 0usize;
    while let Some(node) = queue.pop_front() {
        settled += 1;
        for &i in &outgoing[node] {
            let arc = &links[i];
            let contribution = op.extend(values[node], paths[node], arc.value);
            values[arc.child] = op.merge(values[arc.child], contribution);
            paths[arc.child] += paths[node];
            in_degree[arc.child] -= 1;
            if in_degree[arc.child] == 0 {
                queue.push_back(arc.child);
            }
        }
    }

    if settled < n {
        let stuck = keys
            .iter()
            .zip(&in_degree)
            .find(|(_, d)| **d > 0)
            .map(|(k, _)| k.to_string())
            .unwrap_or_default();
        return Err(GraphWalkError::StructuralHazard {
            hazard: Hazard::Cycle,
            reason: format!("reachable subgraph has a cycle through node {stuck}"),
        });
    }

    let mut aggregates = BTreeMap::new();
    let mut path_counts = BTreeMap::new();
    for (i, key) in keys.iter().enumerate().skip(1) {
        if let Some(v) = values[i] {
            aggregates.insert(key.clone(), v);
        }
        path_counts.insert(key.clone(), paths[i] as u64);
    }
    Ok((aggregates, path_counts))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
