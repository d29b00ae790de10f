//! Configuration data structures for graphwalk.
//!
//! Defines the YAML config format: traversal limits and estimator tuning.
//! Every Sampler / Estimator / Guard call receives one of these values
//! explicitly; there is no process-wide estimator state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphWalkError, Result};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the traversal engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: TraversalLimits,

    #[serde(default)]
    pub estimation: EstimationConfig,
}

impl EngineConfig {
    /// Reject values that would make limits or damping meaningless.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        self.estimation.validate()
    }
}

// ---------------------------------------------------------------------------
// TraversalLimits
// ---------------------------------------------------------------------------

/// Hard resource budgets applied to every traversal call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalLimits {
    /// Depth used when a caller does not ask for one.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// No request may go deeper than this, whatever it asks for.
    #[serde(default = "default_absolute_max_depth")]
    pub absolute_max_depth: u32,

    /// Default cap on discovered nodes.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u64,

    /// Per-statement timeout in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Whole-call wall-clock budget in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            absolute_max_depth: default_absolute_max_depth(),
            max_nodes: default_max_nodes(),
            query_timeout_ms: default_query_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl TraversalLimits {
    /// Clamp a requested depth to the absolute ceiling.
    pub fn clamp_depth(&self, requested: u32) -> u32 {
        requested.min(self.absolute_max_depth)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.absolute_max_depth == 0 {
            return Err(GraphWalkError::Config("absolute_max_depth must be positive".into()));
        }
        if self.max_depth > self.absolute_max_depth {
            return Err(GraphWalkError::Config(format!(
                "max_depth {} exceeds absolute_max_depth {}",
                self.max_depth, self.absolute_max_depth
            )));
        }
        if self.max_nodes == 0 {
            return Err(GraphWalkError::Config("max_nodes must be positive".into()));
        }
        if self.query_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err(GraphWalkError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EstimationConfig
// ---------------------------------------------------------------------------

/// Tuning knobs for the sampler, estimator and guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Levels the sampler probes before extrapolating.
    #[serde(default = "default_probe_depth")]
    pub probe_depth: u32,

    /// Per-level expansion factor above which a level counts as a hub.
    #[serde(default = "default_hub_threshold")]
    pub hub_threshold: f64,

    /// Multiplier applied to an exact (terminated) sample count.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// Uniform damping applied to the extrapolated growth factor.
    #[serde(default = "default_base_damping")]
    pub base_damping: f64,

    /// Extra damping when the convergence ratio shows node sharing.
    #[serde(default = "default_sharing_damping")]
    pub sharing_damping: f64,

    /// Convergence ratio below which the graph is treated as a shared DAG.
    #[serde(default = "default_sharing_threshold")]
    pub sharing_threshold: f64,

    /// Extra damping when the growth trend is decreasing.
    #[serde(default = "default_decreasing_damping")]
    pub decreasing_damping: f64,

    /// Whether callers may exceed the node limit by `relaxed_limit_factor`.
    #[serde(default)]
    pub allow_relaxed_limits: bool,

    /// How far past the node limit a relaxed verdict may go.
    #[serde(default = "default_relaxed_limit_factor")]
    pub relaxed_limit_factor: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            probe_depth: default_probe_depth(),
            hub_threshold: default_hub_threshold(),
            safety_margin: default_safety_margin(),
            base_damping: default_base_damping(),
            sharing_damping: default_sharing_damping(),
            sharing_threshold: default_sharing_threshold(),
            decreasing_damping: default_decreasing_damping(),
            allow_relaxed_limits: false,
            relaxed_limit_factor: default_relaxed_limit_factor(),
        }
    }
}

impl EstimationConfig {
    /// Node limit a relaxed verdict is allowed to run under.
    pub fn relaxed_limit(&self, node_limit: u64) -> u64 {
        if self.allow_relaxed_limits {
            (node_limit as f64 * self.relaxed_limit_factor).floor() as u64
        } else {
            node_limit
        }
    }

    fn validate(&self) -> Result<()> {
        if self.probe_depth == 0 {
            return Err(GraphWalkError::Config("probe_depth must be positive".into()));
        }
        if self.hub_threshold.is_nan() || self.hub_threshold <= 1.0 {
            return Err(GraphWalkError::Config("hub_threshold must exceed 1.0".into()));
        }
        if self.safety_margin.is_nan() || self.safety_margin < 1.0 {
            return Err(GraphWalkError::Config("safety_margin must be at least 1.0".into()));
        }
        for (name, value) in [
            ("base_damping", self.base_damping),
            ("sharing_damping", self.sharing_damping),
            ("decreasing_damping", self.decreasing_damping),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(GraphWalkError::Config(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sharing_threshold) {
            return Err(GraphWalkError::Config("sharing_threshold must be in [0, 1]".into()));
        }
        if self.relaxed_limit_factor.is_nan() || self.relaxed_limit_factor < 1.0 {
            return Err(GraphWalkError::Config("relaxed_limit_factor must be at least 1.0".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_max_depth() -> u32 {
    10
}

fn default_absolute_max_depth() -> u32 {
    50
}

fn default_max_nodes() -> u64 {
    10_000
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_probe_depth() -> u32 {
    5
}

fn default_hub_threshold() -> f64 {
    50.0
}

fn default_safety_margin() -> f64 {
    1.05
}

fn default_base_damping() -> f64 {
    0.85
}

fn default_sharing_damping() -> f64 {
    0.7
}

fn default_sharing_threshold() -> f64 {
    0.95
}

fn default_decreasing_damping() -> f64 {
    0.6
}

fn default_relaxed_limit_factor() -> f64 {
    2.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
