//! Error taxonomy for graphwalk.
//!
//! Every failure carries enough structured data (estimate, limit, depth
//! reached, reason) for the caller to adapt without re-running the call.

use serde::Serialize;

/// Which timer fired when a call was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutScope {
    /// A single statement exceeded the per-query timeout.
    Query,
    /// The whole call exceeded its wall-clock budget.
    Call,
}

impl std::fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => f.write_str("query"),
            Self::Call => f.write_str("call"),
        }
    }
}

/// What kind of structural problem made a call unsafe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hazard {
    /// A single level fanned out far beyond the typical branching factor.
    Hub,
    /// The reachable subgraph contains a cycle.
    Cycle,
}

impl std::fmt::Display for Hazard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hub => f.write_str("hub"),
            Self::Cycle => f.write_str("cycle"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphWalkError {
    /// Estimated or actual node count exceeds the configured cap.
    #[error("resource limit exceeded: {reason} (estimate {estimate}, limit {limit}, depth reached {depth_reached})")]
    ResourceLimitExceeded {
        estimate: u64,
        limit: u64,
        depth_reached: u32,
        reason: String,
    },

    /// Hub or cycle where the operation cannot tolerate one.
    #[error("structural hazard ({hazard}): {reason}")]
    StructuralHazard { hazard: Hazard, reason: String },

    /// Busy, locked or I/O failure from SQLite; retrying may succeed.
    #[error("transient store error: {0}")]
    TransientStore(#[source] rusqlite::Error),

    /// Any other SQLite failure. Retrying the same call will fail again.
    #[error("store error: {0}")]
    Store(#[source] rusqlite::Error),

    #[error("{scope} timeout after {elapsed_ms} ms (budget {budget_ms} ms, depth reached {depth_reached})")]
    Timeout {
        scope: TimeoutScope,
        elapsed_ms: u64,
        budget_ms: u64,
        depth_reached: u32,
    },

    #[error("traversal cancelled at depth {depth_reached}")]
    Cancelled { depth_reached: u32 },

    /// The table/column/direction configuration does not resolve.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for GraphWalkError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::Error as E;
        if let E::SqliteFailure(inner, _) = &err {
            return if is_retryable(inner.code) {
                Self::TransientStore(err)
            } else {
                Self::Store(err)
            };
        }
        match err {
            E::InvalidColumnType(_, name, ty) => Self::InvalidBinding(format!(
                "column `{name}` holds a {ty} value that cannot be read as a node key or number"
            )),
            E::FromSqlConversionFailure(idx, ty, cause) => Self::InvalidBinding(format!(
                "result column {idx} holds a {ty} value that cannot be converted: {cause}"
            )),
            E::IntegralValueOutOfRange(idx, value) => Self::InvalidBinding(format!(
                "result column {idx} holds out-of-range integer {value}"
            )),
            other => Self::Store(other),
        }
    }
}

fn is_retryable(code: rusqlite::ErrorCode) -> bool {
    use rusqlite::ErrorCode as C;
    matches!(
        code,
        C::DatabaseBusy | C::DatabaseLocked | C::SystemIoFailure | C::CannotOpen
    )
}

impl GraphWalkError {
    /// True for failures a caller may reasonably retry unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, GraphWalkError>;
