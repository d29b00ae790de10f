//! graphwalk: bounded graph traversal over SQL edge tables.
//!
//! Walks a self-referential relation (parent/child, supplier/part, ...)
//! stored in SQLite one depth level per query, folds values over every path
//! for diamond-safe rollups, and refuses traversals whose sampled size would
//! exceed the configured limits before they run.

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod observability;
pub mod types;
