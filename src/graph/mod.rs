//! Graph layer: edge fetching, traversal, aggregation, sampling and the guard.

pub mod aggregate;
pub mod bound;
pub mod budget;
pub mod estimator;
pub mod fetcher;
pub mod guard;
pub mod sampler;
pub mod store;
pub mod traversal;
