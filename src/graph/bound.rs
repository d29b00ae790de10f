//! Structural statistics of an edge table and the node bound they imply.
//!
//! A traversal can never visit more distinct nodes than appear on the
//! reached side of eligible edges, so that count caps every estimate no
//! matter what the extrapolation says.

use rusqlite::types::ToSql;
use serde::Serialize;

use crate::db::schema::ResolvedBinding;
use crate::error::Result;
use crate::graph::budget::CallBudget;
use crate::graph::store::EdgeStore;
use crate::types::Direction;

/// Counts over the eligible rows of an edge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub edge_count: u64,
    pub distinct_from: u64,
    pub distinct_to: u64,
    /// Distinct values across both endpoint columns.
    pub distinct_endpoints: u64,
    /// Values appearing in both endpoint columns.
    pub shared_endpoints: u64,
}

impl TableStats {
    /// Upper bound on nodes a traversal in `direction` can discover.
    pub fn table_bound(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Outbound => self.distinct_to,
            Direction::Inbound => self.distinct_from,
            Direction::Both => self.distinct_endpoints,
        }
    }

    pub fn avg_out_degree(&self) -> f64 {
        ratio(self.edge_count, self.distinct_from)
    }

    pub fn avg_in_degree(&self) -> f64 {
        ratio(self.edge_count, self.distinct_to)
    }

    /// Many-to-many link table between two disjoint key sets.
    ///
    /// No value ever appears on both sides, so the relation is not
    /// self-referential and multi-hop enumeration only walks back and forth
    /// across the junction.
    pub fn is_junction(&self) -> bool {
        self.edge_count > 0
            && self.shared_endpoints == 0
            && self.avg_out_degree() > 1.0
            && self.avg_in_degree() > 1.0
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Compute [`TableStats`] for the binding in a single statement.
pub fn table_stats(store: &EdgeStore, binding: &ResolvedBinding, budget: &CallBudget) -> Result<TableStats> {
    let sql = table_stats_sql(binding);
    let params: Vec<&dyn ToSql> = binding.filter_values().iter().map(|v| v as &dyn ToSql).collect();

    let stats = store.run(budget, 0, |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.query_row(params.as_slice(), |row| {
            Ok(TableStats {
                edge_count: row.get::<_, i64>(0)? as u64,
                distinct_from: row.get::<_, i64>(1)? as u64,
                distinct_to: row.get::<_, i64>(2)? as u64,
                distinct_endpoints: row.get::<_, i64>(3)? as u64,
                shared_endpoints: row.get::<_, i64>(4)? as u64,
            })
        })
    })?;

    tracing::debug!(
        table = %binding.table,
        edges = stats.edge_count,
        endpoints = stats.distinct_endpoints,
        shared = stats.shared_endpoints,
        "table statistics"
    );
    Ok(stats)
}

fn table_stats_sql(b: &ResolvedBinding) -> String {
    // Filter placeholders are numbered, so every sub-select can reuse ?1..?n.
    let eligible = |column: &str| -> String {
        format!(
            "SELECT e.{column} AS v FROM {} AS e WHERE e.{column} IS NOT NULL{}",
            b.table,
            b.eligibility_sql(1)
        )
    };
    let all_rows = format!(
        "SELECT 1 FROM {} AS e WHERE e.{} IS NOT NULL AND e.{} IS NOT NULL{}",
        b.table,
        b.from_column,
        b.to_column,
        b.eligibility_sql(1)
    );
    let from_side = eligible(&b.from_column);
    let to_side = eligible(&b.to_column);
    format!(
        "SELECT \
         (SELECT COUNT(*) FROM ({all_rows})), \
         (SELECT COUNT(DISTINCT v) FROM ({from_side})), \
         (SELECT COUNT(DISTINCT v) FROM ({to_side})), \
         (SELECT COUNT(*) FROM ({from_side} UNION {to_side})), \
         (SELECT COUNT(*) FROM ({from_side} INTERSECT {to_side}))"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TraversalLimits;
    use crate::db::schema::resolve_binding;
    use crate::types::EdgeBinding;
    use rusqlite::Connection;
    use serde_json::json;

    fn budget() -> CallBudget {
        CallBudget::new(&TraversalLimits::default(), None)
    }

    fn store_with(sql: &str) -> EdgeStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(sql).unwrap();
        EdgeStore::from_connection(conn)
    }

    #[test]
    fn stats_for_self_referential_tree() {
        let store = store_with(
            "CREATE TABLE t (p INTEGER, c INTEGER, k TEXT);
             INSERT INTO t VALUES (1,2,'x'),(1,3,'x'),(2,4,'y'),(3,4,'x');",
        );
        let b = budget();
        let resolved = resolve_binding(&store, &EdgeBinding::new("t", "p", "c"), &b).unwrap();
        let stats = table_stats(&store, &resolved, &b).unwrap();
        assert_eq!(
            stats,
            TableStats {
                edge_count: 4,
                distinct_from: 3,
                distinct_to: 3,
                distinct_endpoints: 4,
                shared_endpoints: 2,
            }
        );
        assert_eq!(stats.table_bound(Direction::Outbound), 3);
        assert_eq!(stats.table_bound(Direction::Both), 4);
        assert!(!stats.is_junction());
    }

    #[test]
    fn stats_respect_filter() {
        let store = store_with(
            "CREATE TABLE t (p INTEGER, c INTEGER, k TEXT);
             INSERT INTO t VALUES (1,2,'x'),(1,3,'x'),(2,4,'y'),(3,4,'x');",
        );
        let b = budget();
        let binding = EdgeBinding::new("t", "p", "c").with_filter("k", vec![json!("x")]);
        let resolved = resolve_binding(&store, &binding, &b).unwrap();
        let stats = table_stats(&store, &resolved, &b).unwrap();
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.distinct_to, 3);
    }

    #[test]
    fn junction_table_is_detected() {
        // orders x products: disjoint key ranges, many-to-many.
        let store = store_with(
            "CREATE TABLE order_items (order_id INTEGER, product_id INTEGER);
             INSERT INTO order_items VALUES
               (1,100),(1,101),(2,100),(2,101),(3,100),(3,102);",
        );
        let b = budget();
        let resolved =
            resolve_binding(&store, &EdgeBinding::new("order_items", "order_id", "product_id"), &b).unwrap();
        let stats = table_stats(&store, &resolved, &b).unwrap();
        assert_eq!(stats.shared_endpoints, 0);
        assert!(stats.is_junction());
    }

    #[test]
    fn empty_table_has_zero_bound() {
        let store = store_with("CREATE TABLE t (p INTEGER, c INTEGER);");
        let b = budget();
        let resolved = resolve_binding(&store, &EdgeBinding::new("t", "p", "c"), &b).unwrap();
        let stats = table_stats(&store, &resolved, &b).unwrap();
        assert_eq!(stats.table_bound(Direction::Outbound), 0);
        assert!(!stats.is_junction());
    }
}
