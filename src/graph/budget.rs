//! Per-call time budget and cooperative cancellation.
//!
//! A [`CallBudget`] is created at the start of every public call. It is
//! checked between depth levels (never mid-batch) and hands the store a
//! deadline for each individual statement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::schema::TraversalLimits;
use crate::error::{GraphWalkError, Result, TimeoutScope};

/// Shared flag a caller flips to abort a running traversal between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CallBudget {
    started: Instant,
    call_timeout: Duration,
    query_timeout: Duration,
    cancel: Option<CancelToken>,
}

impl CallBudget {
    pub fn new(limits: &TraversalLimits, cancel: Option<CancelToken>) -> Self {
        Self {
            started: Instant::now(),
            call_timeout: limits.call_timeout(),
            query_timeout: limits.query_timeout(),
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Fail if the caller cancelled or the call ran out of wall-clock time.
    pub fn checkpoint(&self, depth: u32) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(GraphWalkError::Cancelled {
                depth_reached: depth,
            });
        }
        if self.elapsed() >= self.call_timeout {
            return Err(self.timeout_error(TimeoutScope::Call, depth));
        }
        Ok(())
    }

    /// Deadline for the next statement and which budget it comes from.
    pub fn query_deadline(&self) -> (Instant, TimeoutScope) {
        let now = Instant::now();
        let query_end = now + self.query_timeout;
        let call_end = self.started + self.call_timeout;
        if call_end <= query_end {
            (call_end, TimeoutScope::Call)
        } else {
            (query_end, TimeoutScope::Query)
        }
    }

    pub fn timeout_error(&self, scope: TimeoutScope, depth: u32) -> GraphWalkError {
        let budget = match scope {
            TimeoutScope::Query => self.query_timeout,
            TimeoutScope::Call => self.call_timeout,
        };
        GraphWalkError::Timeout {
            scope,
            elapsed_ms: self.elapsed_ms(),
            budget_ms: budget.as_millis() as u64,
            depth_reached: depth,
        }
    }
}
