//! Database layer: binding validation against the live SQLite schema.

pub mod schema;
