//! Binding validation against the live SQLite schema.
//!
//! Caller-supplied table and column names are spliced into SQL text, so they
//! are checked twice: lexically (plain identifiers only) and against
//! `pragma_table_info`. A resolved binding carries pre-quoted identifiers
//! ready for statement building.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::params;

use crate::error::{GraphWalkError, Result};
use crate::graph::budget::CallBudget;
use crate::graph::store::EdgeStore;
use crate::types::{json_to_sql_value, Direction, EdgeBinding, SoftDeleteMode};

const TABLE_COLUMNS_SQL: &str = "SELECT name FROM pragma_table_info(?1, ?2)";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// Check that `name` is a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(GraphWalkError::InvalidBinding(format!(
            "'{name}' is not a valid SQL identifier"
        )))
    }
}

/// Double-quote an identifier that already passed [`validate_identifier`].
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Split `schema.table` into its parts, validating both.
fn split_table(name: &str) -> Result<(Option<&str>, &str)> {
    match name.split_once('.') {
        Some((schema, table)) => {
            validate_identifier(schema)?;
            validate_identifier(table)?;
            Ok((Some(schema), table))
        }
        None => {
            validate_identifier(name)?;
            Ok((None, name))
        }
    }
}

fn quote_table(name: &str) -> Result<String> {
    Ok(match split_table(name)? {
        (Some(schema), table) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        (None, table) => quote_ident(table),
    })
}

// ---------------------------------------------------------------------------
// ResolvedBinding
// ---------------------------------------------------------------------------

/// Node attribute source with quoted identifiers.
#[derive(Debug, Clone)]
pub struct ResolvedNodes {
    pub table: String,
    pub key_column: String,
    /// `(quoted, original)` pairs; the original name keys the attribute map.
    pub attributes: Vec<(String, String)>,
}

/// An [`EdgeBinding`] whose names all exist, ready to splice into SQL.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub table: String,
    pub from_column: String,
    pub to_column: String,
    pub direction: Direction,
    /// Extra `AND` predicate on alias `e`, without parameters.
    pub soft_delete_sql: Option<String>,
    /// Quoted filter column and its values.
    pub filter: Option<(String, Vec<rusqlite::types::Value>)>,
    pub value_column: Option<String>,
    pub nodes: Option<ResolvedNodes>,
}

impl ResolvedBinding {
    /// Predicates shared by every edge query, with filter placeholders
    /// numbered from `first_param`.
    pub fn eligibility_sql(&self, first_param: usize) -> String {
        let mut clauses = Vec::new();
        if let Some(soft) = &self.soft_delete_sql {
            clauses.push(soft.clone());
        }
        if let Some((column, values)) = &self.filter {
            let placeholders = (0..values.len())
                .map(|i| format!("?{}", first_param + i))
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("e.{column} IN ({placeholders})"));
        }
        clauses
            .into_iter()
            .map(|c| format!(" AND {c}"))
            .collect::<String>()
    }

    pub fn filter_values(&self) -> &[rusqlite::types::Value] {
        self.filter.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }
}

/// Validate every identifier in `binding` and check it exists in the store.
pub fn resolve_binding(
    store: &EdgeStore,
    binding: &EdgeBinding,
    budget: &CallBudget,
) -> Result<ResolvedBinding> {
    let edge_columns = table_columns(store, &binding.table, budget)?;
    let require = |column: &str, columns: &HashSet<String>, table: &str| -> Result<String> {
        validate_identifier(column)?;
        if columns.contains(&column.to_lowercase()) {
            Ok(quote_ident(column))
        } else {
            Err(GraphWalkError::InvalidBinding(format!(
                "column '{column}' not found in table '{table}'"
            )))
        }
    };

    let from_column = require(&binding.from_column, &edge_columns, &binding.table)?;
    let to_column = require(&binding.to_column, &edge_columns, &binding.table)?;

    let soft_delete_sql = match &binding.soft_delete {
        Some(soft) => {
            let col = require(&soft.column, &edge_columns, &binding.table)?;
            Some(match soft.mode {
                SoftDeleteMode::NullIsLive => format!("e.{col} IS NULL"),
                SoftDeleteMode::ZeroIsLive => format!("(e.{col} IS NULL OR e.{col} = 0)"),
            })
        }
        None => None,
    };

    let filter = match &binding.filter {
        Some(filter) => {
            if filter.values.is_empty() {
                return Err(GraphWalkError::InvalidBinding(format!(
                    "filter on '{}' has no values",
                    filter.column
                )));
            }
            let col = require(&filter.column, &edge_columns, &binding.table)?;
            let values = filter
                .values
                .iter()
                .map(json_to_sql_value)
                .collect::<Result<Vec<_>>>()?;
            Some((col, values))
        }
        None => None,
    };

    let value_column = binding
        .value_column
        .as_deref()
        .map(|c| require(c, &edge_columns, &binding.table))
        .transpose()?;

    let nodes = match &binding.nodes {
        Some(source) => {
            let node_columns = table_columns(store, &source.table, budget)?;
            let key_column = require(&source.key_column, &node_columns, &source.table)?;
            let attributes = source
                .attributes
                .iter()
                .map(|a| Ok((require(a, &node_columns, &source.table)?, a.clone())))
                .collect::<Result<Vec<_>>>()?;
            Some(ResolvedNodes {
                table: quote_table(&source.table)?,
                key_column,
                attributes,
            })
        }
        None => None,
    };

    Ok(ResolvedBinding {
        table: quote_table(&binding.table)?,
        from_column,
        to_column,
        direction: binding.direction,
        soft_delete_sql,
        filter,
        value_column,
        nodes,
    })
}

/// Lower-cased column names of `table`; unknown tables are a binding error.
fn table_columns(store: &EdgeStore, table: &str, budget: &CallBudget) -> Result<HashSet<String>> {
    let (schema, name) = split_table(table)?;
    let schema = schema.unwrap_or("main");
    let columns: Vec<String> = store.run(budget, 0, |conn| {
        let mut stmt = conn.prepare_cached(TABLE_COLUMNS_SQL)?;
        let rows = stmt.query_map(params![name, schema], |row| row.get::<_, String>(0))?;
        rows.collect()
    })?;
    if columns.is_empty() {
        return Err(GraphWalkError::InvalidBinding(format!(
            "table '{table}' does not exist"
        )));
    }
    Ok(columns.into_iter().map(|c| c.to_lowercase()).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TraversalLimits;
    use crate::types::NodeSource;
    use rusqlite::Connection;
    use serde_json::json;

    fn setup() -> EdgeStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE supply (buyer INTEGER, seller INTEGER, region TEXT, deleted_at TEXT);
             CREATE TABLE company (id INTEGER PRIMARY KEY, name TEXT, tier INTEGER);",
        )
        .unwrap();
        EdgeStore::from_connection(conn)
    }

    fn budget() -> CallBudget {
        CallBudget::new(&TraversalLimits::default(), None)
    }

    #[test]
    fn validate_identifier_rejects_injection() {
        assert!(validate_identifier("parent_id").is_ok());
        assert!(validate_identifier("x; DROP TABLE t").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn resolve_quotes_everything() {
        let store = setup();
        let binding = EdgeBinding::new("supply", "buyer", "seller")
            .with_soft_delete("deleted_at", SoftDeleteMode::NullIsLive)
            .with_filter("region", vec![json!("EU"), json!("US")]);
        let resolved = resolve_binding(&store, &binding, &budget()).unwrap();
        assert_eq!(resolved.table, "\"supply\"");
        assert_eq!(resolved.from_column, "\"buyer\"");
        assert_eq!(
            resolved.eligibility_sql(3),
            " AND e.\"deleted_at\" IS NULL AND e.\"region\" IN (?3, ?4)"
        );
        assert_eq!(resolved.filter_values().len(), 2);
    }

    #[test]
    fn resolve_accepts_schema_qualified_table() {
        let store = setup();
        let binding = EdgeBinding::new("main.supply", "buyer", "seller");
        let resolved = resolve_binding(&store, &binding, &budget()).unwrap();
        assert_eq!(resolved.table, "\"main\".\"supply\"");
    }

    #[test]
    fn resolve_unknown_table_is_invalid_binding() {
        let store = setup();
        let err = resolve_binding(&store, &EdgeBinding::new("nope", "a", "b"), &budget()).unwrap_err();
        assert!(matches!(err, GraphWalkError::InvalidBinding(_)));
    }

    #[test]
    fn resolve_unknown_column_is_invalid_binding() {
        let store = setup();
        let binding = EdgeBinding::new("supply", "buyer", "vendor");
        let err = resolve_binding(&store, &binding, &budget()).unwrap_err();
        assert!(err.to_string().contains("vendor"));
    }

    #[test]
    fn resolve_node_source_checks_attributes() {
        let store = setup();
        let good = EdgeBinding::new("supply", "buyer", "seller").with_nodes(NodeSource {
            table: "company".into(),
            key_column: "id".into(),
            attributes: vec!["tier".into(), "name".into()],
        });
        let resolved = resolve_binding(&store, &good, &budget()).unwrap();
        let nodes = resolved.nodes.unwrap();
        assert_eq!(nodes.attributes[0], ("\"tier\"".to_string(), "tier".to_string()));

        let bad = EdgeBinding::new("supply", "buyer", "seller").with_nodes(NodeSource {
            table: "company".into(),
            key_column: "id".into(),
            attributes: vec!["revenue".into()],
        });
        assert!(resolve_binding(&store, &bad, &budget()).is_err());
    }

    #[test]
    fn resolve_rejects_empty_filter() {
        let store = setup();
        let binding = EdgeBinding::new("supply", "buyer", "seller").with_filter("region", vec![]);
        assert!(resolve_binding(&store, &binding, &budget()).is_err());
    }
}
