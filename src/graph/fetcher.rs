//! Batched edge fetching: one statement per frontier, never one per node.
//!
//! The whole frontier is bound into a single `IN (...)` predicate. For
//! `both` the outbound and inbound halves are combined with `UNION ALL` and
//! share the same numbered placeholders, so it is still one round trip.
//! Frontiers wider than SQLite's variable limit are split into chunks.
//!
//! Column affinity lets an integer key match a TEXT column (and `"1"` match
//! an INTEGER one), so the stored value can decode as the other
//! [`NodeKey`] variant. Fetched endpoints are mapped back onto the keys that
//! were bound, and onto the anchor key when one is set, so callers always see
//! one key per node.

use std::collections::HashMap;

use rusqlite::types::ToSql;

use crate::db::schema::{ResolvedBinding, ResolvedNodes};
use crate::error::{GraphWalkError, Result};
use crate::graph::budget::CallBudget;
use crate::graph::store::EdgeStore;
use crate::types::{value_ref_to_json, Attributes, Direction, NodeKey, TraversedEdge};

/// Stay well under SQLITE_MAX_VARIABLE_NUMBER (32766 in bundled builds).
const MAX_BOUND_PARAMS: usize = 30_000;

/// One edge incident to the frontier, oriented from the frontier outwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedEdge {
    /// Endpoint that was in the frontier.
    pub frontier: NodeKey,
    /// Endpoint reached by following the edge.
    pub reached: NodeKey,
    /// True when the stored orientation is `frontier -> reached`.
    pub forward: bool,
    pub value: Option<f64>,
    /// Attributes of `reached`, when a node source is bound.
    pub attributes: Attributes,
}

impl FetchedEdge {
    /// The edge in stored `from -> to` orientation.
    pub fn to_traversed(&self, depth: u32) -> TraversedEdge {
        let (source, target) = if self.forward {
            (self.frontier.clone(), self.reached.clone())
        } else {
            (self.reached.clone(), self.frontier.clone())
        };
        TraversedEdge {
            source,
            target,
            depth,
        }
    }
}

pub struct EdgeFetcher<'a> {
    store: &'a EdgeStore,
    binding: &'a ResolvedBinding,
    with_values: bool,
    anchor: Option<NodeKey>,
}

impl<'a> EdgeFetcher<'a> {
    pub fn new(store: &'a EdgeStore, binding: &'a ResolvedBinding) -> Self {
        Self {
            store,
            binding,
            with_values: false,
            anchor: None,
        }
    }

    /// Report any endpoint equal in value to `start` as `start` itself.
    pub fn anchored_at(mut self, start: &NodeKey) -> Self {
        self.anchor = Some(start.clone());
        self
    }

    /// Also project the binding's value column into [`FetchedEdge::value`].
    pub fn with_values(mut self) -> Self {
        self.with_values = self.binding.value_column.is_some();
        self
    }

    /// Fetch every eligible edge incident to `frontier`.
    ///
    /// `depth` is only used to label a timeout. Errors from the store
    /// propagate immediately; nothing is retried.
    pub fn fetch(&self, frontier: &[NodeKey], budget: &CallBudget, depth: u32) -> Result<Vec<FetchedEdge>> {
        if frontier.is_empty() {
            return Ok(Vec::new());
        }
        let filter_values = self.binding.filter_values();
        let chunk_size = MAX_BOUND_PARAMS.saturating_sub(filter_values.len()).max(1);

        let mut edges = Vec::new();
        for chunk in frontier.chunks(chunk_size) {
            let sql = self.build_sql(chunk.len());
            let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + filter_values.len());
            for key in chunk {
                params.push(key);
            }
            for value in filter_values {
                params.push(value);
            }

            let batch = self.store.run(budget, depth, |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params.as_slice(), |row| self.decode(row))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })?;

            let bound: HashMap<String, &NodeKey> = chunk.iter().map(|k| (k.to_string(), k)).collect();
            for mut edge in batch {
                edge.frontier = match bound.get(&edge.frontier.to_string()) {
                    Some(key) => (*key).clone(),
                    None => {
                        return Err(GraphWalkError::InvalidBinding(format!(
                            "fetched endpoint {} matches no frontier key; \
                             the column compares keys in a form they cannot round-trip",
                            edge.frontier
                        )))
                    }
                };
                edge.reached = self.normalize_reached(edge.reached, &bound);
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    fn normalize_reached(&self, reached: NodeKey, bound: &HashMap<String, &NodeKey>) -> NodeKey {
        let canonical = reached.to_string();
        if let Some(anchor) = &self.anchor {
            if *anchor != reached && anchor.to_string() == canonical {
                return anchor.clone();
            }
        }
        match bound.get(&canonical) {
            Some(key) if **key != reached => (*key).clone(),
            _ => reached,
        }
    }

    fn build_sql(&self, frontier_len: usize) -> String {
        let b = self.binding;
        let placeholders = (1..=frontier_len)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let eligibility = b.eligibility_sql(frontier_len + 1);

        let half = |frontier_col: &str, reached_col: &str, forward: u8| -> String {
            let mut select = format!(
                "SELECT e.{frontier_col} AS frontier, e.{reached_col} AS reached, {forward} AS forward"
            );
            if self.with_values {
                if let Some(value) = &b.value_column {
                    select.push_str(&format!(", e.{value} AS value"));
                }
            }
            let mut from = format!(" FROM {} AS e", b.table);
            if let Some(nodes) = &b.nodes {
                for (i, (quoted, _)) in nodes.attributes.iter().enumerate() {
                    select.push_str(&format!(", n.{quoted} AS attr_{i}"));
                }
                from.push_str(&format!(
                    " LEFT JOIN {} AS n ON n.{} = e.{reached_col}",
                    nodes.table, nodes.key_column
                ));
            }
            format!(
                "{select}{from} WHERE e.{frontier_col} IN ({placeholders}) \
                 AND e.{reached_col} IS NOT NULL{eligibility}"
            )
        };

        let body = match b.direction {
            Direction::Outbound => half(&b.from_column, &b.to_column, 1),
            Direction::Inbound => half(&b.to_column, &b.from_column, 0),
            Direction::Both => format!(
                "{} UNION ALL {}",
                half(&b.from_column, &b.to_column, 1),
                half(&b.to_column, &b.from_column, 0)
            ),
        };
        // Deterministic tie-breaking for first-discovery paths.
        format!("{body} ORDER BY 1, 2")
    }

    fn decode(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<FetchedEdge> {
        let frontier: NodeKey = row.get(0)?;
        let reached: NodeKey = row.get(1)?;
        let forward: i64 = row.get(2)?;
        let mut idx = 3;
        let value = if self.with_values {
            idx += 1;
            row.get::<_, Option<f64>>(3)?
        } else {
            None
        };
        let attributes = match &self.binding.nodes {
            Some(nodes) => read_attributes(row, nodes, idx)?,
            None => Attributes::new(),
        };
        Ok(FetchedEdge {
            frontier,
            reached,
            forward: forward != 0,
            value,
            attributes,
        })
    }

    /// Look up the start node: its attributes if a node source is bound,
    /// otherwise whether it appears as any eligible edge endpoint.
    pub fn probe_node(&self, key: &NodeKey, budget: &CallBudget) -> Result<Option<Attributes>> {
        let b = self.binding;
        match &b.nodes {
            Some(nodes) => {
                let columns = if nodes.attributes.is_empty() {
                    "1".to_string()
                } else {
                    nodes
                        .attributes
                        .iter()
                        .map(|(quoted, _)| format!("n.{quoted}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let sql = format!(
                    "SELECT {columns} FROM {} AS n WHERE n.{} = ?1 LIMIT 1",
                    nodes.table, nodes.key_column
                );
                self.store.run(budget, 0, |conn| {
                    let mut stmt = conn.prepare_cached(&sql)?;
                    let mut rows = stmt.query([key])?;
                    match rows.next()? {
                        Some(_) if nodes.attributes.is_empty() => Ok(Some(Attributes::new())),
                        Some(row) => read_attributes(row, nodes, 0).map(Some),
                        None => Ok(None),
                    }
                })
            }
            None => {
                let sql = format!(
                    "SELECT 1 FROM {} AS e WHERE (e.{} = ?1 OR e.{} = ?1){} LIMIT 1",
                    b.table,
                    b.from_column,
                    b.to_column,
                    b.eligibility_sql(2)
                );
                let mut params: Vec<&dyn ToSql> = vec![key];
                for value in b.filter_values() {
                    params.push(value);
                }
                self.store.run(budget, 0, |conn| {
                    let mut stmt = conn.prepare_cached(&sql)?;
                    let found = stmt.exists(params.as_slice())?;
                    Ok(found.then(Attributes::new))
                })
            }
        }
    }
}

fn read_attributes(row: &rusqlite::Row<'_>, nodes: &ResolvedNodes, offset: usize) -> rusqlite::Result<Attributes> {
    let mut attributes = Attributes::new();
    for (i, (_, name)) in nodes.attributes.iter().enumerate() {
        attributes.insert(name.clone(), value_ref_to_json(row.get_ref(offset + i)?));
    }
    Ok(attributes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TraversalLimits;
    use crate::db::schema::resolve_binding;
    use crate::types::{EdgeBinding, NodeSource, SoftDeleteMode};
    use rusqlite::Connection;
    use serde_json::json;

    fn setup() -> EdgeStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE edges (src INTEGER, dst INTEGER, kind TEXT, qty REAL, deleted_at TEXT);
             INSERT INTO edges VALUES (1, 2, 'a', 2.0, NULL);
             INSERT INTO edges VALUES (1, 3, 'b', 3.0, NULL);
             INSERT INTO edges VALUES (2, 4, 'a', 1.0, NULL);
             INSERT INTO edges VALUES (3, 4, 'a', 5.0, '2024-01-01');
             INSERT INTO edges VALUES (5, 1, 'a', NULL, NULL);
             INSERT INTO edges VALUES (1, NULL, 'a', NULL, NULL);
             CREATE TABLE parts (id INTEGER PRIMARY KEY, name TEXT, leaf INTEGER);
             INSERT INTO parts VALUES (2, 'bolt', 1), (3, 'frame', 0);",
        )
        .unwrap();
        EdgeStore::from_connection(conn)
    }

    fn budget() -> CallBudget {
        CallBudget::new(&TraversalLimits::default(), None)
    }

    fn reached(edges: &[FetchedEdge]) -> Vec<NodeKey> {
        edges.iter().map(|e| e.reached.clone()).collect()
    }

    #[test]
    fn outbound_fetch_is_one_query_for_whole_frontier() {
        let store = setup();
        let b = budget();
        let resolved = resolve_binding(&store, &EdgeBinding::new("edges", "src", "dst"), &b).unwrap();
        let before = store.queries_issued();
        let edges = EdgeFetcher::new(&store, &resolved)
            .fetch(&[NodeKey::Int(1), NodeKey::Int(2), NodeKey::Int(3)], &b, 0)
            .unwrap();
        assert_eq!(store.queries_issued() - before, 1);
        // NULL endpoints are skipped; ordered by (frontier, reached).
        assert_eq!(
            reached(&edges),
            vec![NodeKey::Int(2), NodeKey::Int(3), NodeKey::Int(4), NodeKey::Int(4)]
        );
        assert!(edges.iter().all(|e| e.forward));
    }

    #[test]
    fn inbound_fetch_follows_reverse_edges() {
        let store = setup();
        let b = budget();
        let binding = EdgeBinding::new("edges", "src", "dst").with_direction(Direction::Inbound);
        let resolved = resolve_binding(&store, &binding, &b).unwrap();
        let edges = EdgeFetcher::new(&store, &resolved).fetch(&[NodeKey::Int(1)], &b, 0).unwrap();
        assert_eq!(reached(&edges), vec![NodeKey::Int(5)]);
        let t = edges[0].to_traversed(0);
        assert_eq!((t.source, t.target), (NodeKey::Int(5), NodeKey::Int(1)));
    }

    #[test]
    fn both_fetch_unions_directions_in_one_query() {
        let store = setup();
        let b = budget();
        let binding = EdgeBinding::new("edges", "src", "dst").with_direction(Direction::Both);
        let resolved = resolve_binding(&store, &binding, &b).unwrap();
        let before = store.queries_issued();
        let edges = EdgeFetcher::new(&store, &resolved).fetch(&[NodeKey::Int(1)], &b, 0).unwrap();
        assert_eq!(store.queries_issued() - before, 1);
        let mut got = reached(&edges);
        got.sort();
        assert_eq!(got, vec![NodeKey::Int(2), NodeKey::Int(3), NodeKey::Int(5)]);
    }

    #[test]
    fn soft_delete_and_filter_narrow_edges() {
        let store = setup();
        let b = budget();
        let binding = EdgeBinding::new("edges", "src", "dst")
            .with_soft_delete("deleted_at", SoftDeleteMode::NullIsLive)
            .with_filter("kind", vec![json!("a")]);
        let resolved = resolve_binding(&store, &binding, &b).unwrap();
        let fetcher = EdgeFetcher::new(&store, &resolved);
        let edges = fetcher.fetch(&[NodeKey::Int(1)], &b, 0).unwrap();
        assert_eq!(reached(&edges), vec![NodeKey::Int(2)]);
        let edges = fetcher.fetch(&[NodeKey::Int(3)], &b, 0).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn values_and_attributes_are_projected() {
        let store = setup();
        let b = budget();
        let binding = EdgeBinding::new("edges", "src", "dst")
            .with_value_column("qty")
            .with_nodes(NodeSource {
                table: "parts".into(),
                key_column: "id".into(),
                attributes: vec!["name".into(), "leaf".into()],
            });
        let resolved = resolve_binding(&store, &binding, &b).unwrap();
        let edges = EdgeFetcher::new(&store, &resolved)
            .with_values()
            .fetch(&[NodeKey::Int(1)], &b, 0)
            .unwrap();
        assert_eq!(edges[0].value, Some(2.0));
        assert_eq!(edges[0].attributes["name"], json!("bolt"));
        assert_eq!(edges[1].attributes["leaf"], json!(0));
    }

    #[test]
    fn text_columns_report_bound_integer_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE bom (parent TEXT, child TEXT);
             INSERT INTO bom VALUES ('1', '2'), ('2', '1'), ('2', '3');",
        )
        .unwrap();
        let store = EdgeStore::from_connection(conn);
        let b = budget();
        let resolved = resolve_binding(&store, &EdgeBinding::new("bom", "parent", "child"), &b).unwrap();
        let fetcher = EdgeFetcher::new(&store, &resolved).anchored_at(&NodeKey::Int(1));

        let edges = fetcher.fetch(&[NodeKey::Int(1)], &b, 0).unwrap();
        assert_eq!(edges[0].frontier, NodeKey::Int(1));
        assert_eq!(edges[0].reached, NodeKey::from("2"));

        // '1' comes back as the anchor, not as a second text key.
        let edges = fetcher.fetch(&[NodeKey::from("2")], &b, 1).unwrap();
        assert_eq!(reached(&edges), vec![NodeKey::Int(1), NodeKey::from("3")]);
    }

    #[test]
    fn empty_frontier_issues_no_query() {
        let store = setup();
        let b = budget();
        let resolved = resolve_binding(&store, &EdgeBinding::new("edges", "src", "dst"), &b).unwrap();
        let before = store.queries_issued();
        assert!(EdgeFetcher::new(&store, &resolved).fetch(&[], &b, 0).unwrap().is_empty());
        assert_eq!(store.queries_issued(), before);
    }

    #[test]
    fn probe_node_detects_presence() {
        let store = setup();
        let b = budget();
        let resolved = resolve_binding(&store, &EdgeBinding::new("edges", "src", "dst"), &b).unwrap();
        let fetcher = EdgeFetcher::new(&store, &resolved);
        assert!(fetcher.probe_node(&NodeKey::Int(4), &b).unwrap().is_some());
        assert!(fetcher.probe_node(&NodeKey::Int(99), &b).unwrap().is_none());
    }
}
