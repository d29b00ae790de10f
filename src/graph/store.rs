//! SQLite connection wrapper used by every traversal call.
//!
//! One [`EdgeStore`] owns one `rusqlite::Connection`. The engine never shares
//! a store between concurrent calls; `Connection` is not `Sync`, so the type
//! system enforces that. Each statement is counted and runs under a progress
//! handler that interrupts it once the call's deadline passes.

use std::cell::Cell;
use std::time::Instant;

use rusqlite::{Connection, ErrorCode};

use crate::error::{GraphWalkError, Result};
use crate::graph::budget::CallBudget;

/// SQLite VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

pub struct EdgeStore {
    pub conn: Connection,
    queries: Cell<u64>,
}

impl std::fmt::Debug for EdgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeStore")
            .field("queries", &self.queries.get())
            .finish_non_exhaustive()
    }
}

impl EdgeStore {
    /// Open (or create) a database file.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already-open connection (e.g. `:memory:` in tests).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            queries: Cell::new(0),
        }
    }

    /// Total statements issued through [`EdgeStore::run`] so far.
    pub fn queries_issued(&self) -> u64 {
        self.queries.get()
    }

    /// Execute one round trip under the budget's statement deadline.
    ///
    /// An interrupted statement is reported as a typed timeout. Other SQLite
    /// errors are classified by `From<rusqlite::Error>`: unreadable column
    /// values become `InvalidBinding`, busy/locked/I/O failures stay transient.
    pub fn run<T, F>(&self, budget: &CallBudget, depth: u32, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        self.queries.set(self.queries.get() + 1);
        let (deadline, scope) = budget.query_deadline();
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let outcome = f(&self.conn);
        self.conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);

        match outcome {
            Ok(value) => Ok(value),
            Err(e) if is_interrupt(&e) => Err(budget.timeout_error(scope, depth)),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::OperationInterrupted
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
