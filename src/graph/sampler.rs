//! Bounded BFS probe used to size a traversal before running it.
//!
//! The sampler expands at most `probe_depth` levels from the start node and
//! records per-level node and edge counts plus the signals the estimator and
//! guard need: growth trend, convergence ratio, cycle and hub flags. If the
//! frontier empties inside the probe, the reachable subgraph is fully known
//! and `terminated` is set.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::schema::EstimationConfig;
use crate::db::schema::ResolvedBinding;
use crate::error::Result;
use crate::graph::budget::CallBudget;
use crate::graph::fetcher::EdgeFetcher;
use crate::graph::store::EdgeStore;
use crate::types::{Direction, NodeKey};

/// How a level's size compares with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelChange {
    Grew,
    Flat,
    Shrank,
}

/// Slope of level sizes across the last few probed levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthTrend {
    Increasing,
    Stable,
    Decreasing,
}

impl std::fmt::Display for GrowthTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Increasing => "increasing",
            Self::Stable => "stable",
            Self::Decreasing => "decreasing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSample {
    pub depth: u32,
    /// Newly discovered nodes at this depth.
    pub nodes: u64,
    /// Edges fetched while expanding the previous level.
    pub edges: u64,
    pub change: LevelChange,
    /// `nodes / previous level nodes`.
    pub expansion_factor: f64,
}

/// Outcome of one probe. Ephemeral: produced for one estimation and dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    pub start: NodeKey,
    pub direction: Direction,
    pub probe_depth: u32,
    /// Levels 1..=k that were expanded (level 0, the start, is implicit).
    pub levels: Vec<LevelSample>,
    /// Distinct nodes discovered, start excluded.
    pub total_nodes: u64,
    pub total_edges: u64,
    pub growth_trend: GrowthTrend,
    /// `total_nodes / total_edges`; 1.0 for a tree, lower when nodes are shared.
    pub convergence_ratio: f64,
    pub has_cycles: bool,
    pub hub_detected: bool,
    pub max_expansion_factor: f64,
    /// The frontier emptied inside the probe: `total_nodes` is exact.
    pub terminated: bool,
    /// Probing stopped early because `total_nodes` passed the node ceiling.
    pub exceeded_limit: bool,
}

impl SampleResult {
    /// Deepest level the probe expanded into.
    pub fn depth_probed(&self) -> u32 {
        self.levels.last().map(|l| l.depth).unwrap_or(0)
    }

    /// Nodes discovered at depths `1..=depth`.
    pub fn nodes_through(&self, depth: u32) -> u64 {
        self.levels
            .iter()
            .filter(|l| l.depth <= depth)
            .map(|l| l.nodes)
            .sum()
    }

    /// Level sizes including the implicit start level.
    pub fn level_sizes(&self) -> Vec<u64> {
        std::iter::once(1)
            .chain(self.levels.iter().map(|l| l.nodes))
            .collect()
    }
}

pub struct GraphSampler<'a> {
    store: &'a EdgeStore,
    binding: &'a ResolvedBinding,
    config: &'a EstimationConfig,
}

impl<'a> GraphSampler<'a> {
    pub fn new(store: &'a EdgeStore, binding: &'a ResolvedBinding, config: &'a EstimationConfig) -> Self {
        Self {
            store,
            binding,
            config,
        }
    }

    /// Probe up to `probe_depth` levels from `start`.
    ///
    /// Stops early once more than `node_ceiling` nodes have been seen.
    pub fn sample(
        &self,
        start: &NodeKey,
        probe_depth: u32,
        node_ceiling: Option<u64>,
        budget: &CallBudget,
    ) -> Result<SampleResult> {
        let fetcher = EdgeFetcher::new(self.store, self.binding).anchored_at(start);
        let undirected = self.binding.direction == Direction::Both;

        let mut visited: HashSet<NodeKey> = HashSet::from([start.clone()]);
        let mut parent: HashMap<NodeKey, NodeKey> = HashMap::new();
        let mut frontier = vec![start.clone()];
        let mut levels: Vec<LevelSample> = Vec::new();
        let mut total_edges: u64 = 0;
        let mut has_cycles = false;
        let mut terminated = false;
        let mut exceeded_limit = false;
        let mut prev_size: u64 = 1;

        for depth in 1..=probe_depth {
            if frontier.is_empty() {
                terminated = true;
                break;
            }
            budget.checkpoint(depth - 1)?;
            let edges = fetcher.fetch(&frontier, budget, depth - 1)?;
            total_edges += edges.len() as u64;

            let mut next = Vec::new();
            for edge in &edges {
                if visited.contains(&edge.reached) {
                    if !has_cycles && closes_cycle(&parent, start, &edge.frontier, &edge.reached, undirected) {
                        has_cycles = true;
                    }
                    continue;
                }
                visited.insert(edge.reached.clone());
                parent.insert(edge.reached.clone(), edge.frontier.clone());
                next.push(edge.reached.clone());
            }

            let size = next.len() as u64;
            let expansion_factor = size as f64 / prev_size.max(1) as f64;
            let change = if size > prev_size {
                LevelChange::Grew
            } else if size < prev_size {
                LevelChange::Shrank
            } else {
                LevelChange::Flat
            };
            levels.push(LevelSample {
                depth,
                nodes: size,
                edges: edges.len() as u64,
                change,
                expansion_factor,
            });
            tracing::debug!(depth, nodes = size, edges = edges.len(), "sampled level");

            frontier = next;
            prev_size = size;
            if size == 0 {
                terminated = true;
                break;
            }
            let seen = (visited.len() - 1) as u64;
            if node_ceiling.is_some_and(|ceiling| seen > ceiling) {
                exceeded_limit = true;
                break;
            }
        }
        // A frontier that empties exactly at the last probed level.
        if !terminated && !exceeded_limit && frontier.is_empty() {
            terminated = true;
        }

        let total_nodes = (visited.len() - 1) as u64;
        let max_expansion_factor = levels
            .iter()
            .map(|l| l.expansion_factor)
            .fold(0.0_f64, f64::max);
        let convergence_ratio = if total_edges == 0 {
            1.0
        } else {
            total_nodes as f64 / total_edges as f64
        };

        Ok(SampleResult {
            start: start.clone(),
            direction: self.binding.direction,
            probe_depth,
            growth_trend: growth_trend(&levels),
            levels,
            total_nodes,
            total_edges,
            convergence_ratio,
            has_cycles,
            hub_detected: max_expansion_factor > self.config.hub_threshold,
            max_expansion_factor,
            terminated,
            exceeded_limit,
        })
    }
}

/// True when `from -> to` leads back onto `from`'s own discovery path.
///
/// Walks `from`'s first-discovery ancestry (at most probe-depth hops). For
/// undirected walks the step straight back to the parent is not a cycle.
fn closes_cycle(
    parent: &HashMap<NodeKey, NodeKey>,
    start: &NodeKey,
    from: &NodeKey,
    to: &NodeKey,
    undirected: bool,
) -> bool {
    if from == to {
        return true;
    }
    if undirected && parent.get(from) == Some(to) {
        return false;
    }
    let mut cursor = from;
    loop {
        if cursor == to {
            return true;
        }
        if cursor == start {
            return false;
        }
        match parent.get(cursor) {
            Some(p) => cursor = p,
            None => return false,
        }
    }
}

/// Classify the slope across the last three level sizes.
fn growth_trend(levels: &[LevelSample]) -> GrowthTrend {
    let sizes: Vec<u64> = levels.iter().map(|l| l.nodes).collect();
    let window = &sizes[sizes.len().saturating_sub(3)..];
    let (first, last) = match (window.first(), window.last()) {
        (Some(&f), Some(&l)) if window.len() >= 2 => (f, l),
        _ => return GrowthTrend::Stable,
    };
    if first == 0 {
        return if last > 0 {
            GrowthTrend::Increasing
        } else {
            GrowthTrend::Stable
        };
    }
    let slope = last as f64 / first as f64;
    if slope > 1.1 {
        GrowthTrend::Increasing
    } else if slope < 0.9 {
        GrowthTrend::Decreasing
    } else {
        GrowthTrend::Stable
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
