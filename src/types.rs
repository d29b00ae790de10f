//! Core value types: node keys, edge-table bindings, and traversal records.
//!
//! Bindings are plain configuration values supplied per call by whatever
//! layer maps abstract relationships onto physical tables. The engine never
//! discovers schema on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{GraphWalkError, Result};

// ---------------------------------------------------------------------------
// NodeKey
// ---------------------------------------------------------------------------

/// Opaque node identifier as stored in the edge table's endpoint columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeKey {
    Int(i64),
    Text(String),
}

impl From<i64> for NodeKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for NodeKey {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl ToSql for NodeKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Int(v) => ToSqlOutput::from(*v),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for NodeKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(v) => Ok(Self::Int(v)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Self::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            // REAL keys that hold whole numbers come from loosely typed columns.
            ValueRef::Real(v) if v.fract() == 0.0 => Ok(Self::Int(v as i64)),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which way edges are followed relative to the stored `from -> to` columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow `from -> to`.
    #[default]
    Outbound,
    /// Follow `to -> from`.
    Inbound,
    /// Union of both.
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
            Self::Both => "both",
        }
    }

    /// Parse a direction name, rejecting anything unrecognised.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "outbound" | "out" | "forward" => Ok(Self::Outbound),
            "inbound" | "in" | "reverse" => Ok(Self::Inbound),
            "both" | "any" => Ok(Self::Both),
            other => Err(GraphWalkError::InvalidBinding(format!(
                "unknown direction '{other}' (expected outbound, inbound or both)"
            ))),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = GraphWalkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EdgeBinding
// ---------------------------------------------------------------------------

/// How a soft-delete column marks live rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftDeleteMode {
    /// Live rows have `column IS NULL` (e.g. `deleted_at`).
    NullIsLive,
    /// Live rows have `column = 0` or NULL (e.g. `is_deleted`).
    ZeroIsLive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDelete {
    pub column: String,
    pub mode: SoftDeleteMode,
}

/// Restricts eligible edges to rows whose `column` is one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeFilter {
    pub column: String,
    pub values: Vec<serde_json::Value>,
}

/// Optional node table joined into each edge fetch to project attributes
/// of the reached node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSource {
    pub table: String,
    pub key_column: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Physical description of one recursive relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeBinding {
    pub table: String,
    pub from_column: String,
    pub to_column: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete: Option<SoftDelete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<EdgeFilter>,
    /// Numeric column read by path aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeSource>,
}

impl EdgeBinding {
    pub fn new(
        table: impl Into<String>,
        from_column: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            from_column: from_column.into(),
            to_column: to_column.into(),
            direction: Direction::Outbound,
            soft_delete: None,
            filter: None,
            value_column: None,
            nodes: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_soft_delete(mut self, column: impl Into<String>, mode: SoftDeleteMode) -> Self {
        self.soft_delete = Some(SoftDelete {
            column: column.into(),
            mode,
        });
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.filter = Some(EdgeFilter {
            column: column.into(),
            values,
        });
        self
    }

    pub fn with_value_column(mut self, column: impl Into<String>) -> Self {
        self.value_column = Some(column.into());
        self
    }

    pub fn with_nodes(mut self, source: NodeSource) -> Self {
        self.nodes = Some(source);
        self
    }
}

// ---------------------------------------------------------------------------
// Nodes and edges produced by a traversal
// ---------------------------------------------------------------------------

/// Projected attributes of a node, keyed by column name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A visited node with its BFS depth and any projected attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRef {
    pub key: NodeKey,
    pub depth: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// An edge crossed during traversal, in stored `from -> to` orientation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TraversedEdge {
    pub source: NodeKey,
    pub target: NodeKey,
    /// Depth of the node the edge was expanded from.
    pub depth: u32,
}

/// Convert a borrowed SQLite value into JSON for attribute projection.
pub fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(v) => serde_json::Value::from(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(
            bytes.iter().map(|b| format!("{b:02x}")).collect::<String>(),
        ),
    }
}

/// Convert a JSON filter value into an owned SQLite value.
pub fn json_to_sql_value(value: &serde_json::Value) -> Result<rusqlite::types::Value> {
    use rusqlite::types::Value;
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n.as_f64().map(Value::Real).ok_or_else(|| {
                GraphWalkError::InvalidBinding(format!("filter value {n} is not representable"))
            }),
        },
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        other => Err(GraphWalkError::InvalidBinding(format!(
            "filter values must be scalars, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// StopCondition
// ---------------------------------------------------------------------------

type NodePredicate = dyn Fn(&NodeRef) -> bool + Send + Sync;

/// Marks a discovered node as terminal: it is returned but not expanded.
#[derive(Clone)]
pub struct StopCondition {
    predicate: Arc<NodePredicate>,
    description: String,
}

impl StopCondition {
    /// Stop at nodes whose projected `attribute` equals `value`.
    pub fn attribute_equals(attribute: impl Into<String>, value: serde_json::Value) -> Self {
        let attribute = attribute.into();
        let description = format!("{attribute} = {value}");
        Self {
            predicate: Arc::new(move |node: &NodeRef| node.attributes.get(&attribute) == Some(&value)),
            description,
        }
    }

    /// Stop at nodes whose projected `attribute` is any of `values`.
    pub fn attribute_in(attribute: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        let attribute = attribute.into();
        let description = format!("{attribute} in {values:?}");
        Self {
            predicate: Arc::new(move |node: &NodeRef| {
                node.attributes
                    .get(&attribute)
                    .is_some_and(|v| values.contains(v))
            }),
            description,
        }
    }

    pub fn from_fn<F>(description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&NodeRef) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(f),
            description: description.into(),
        }
    }

    pub fn matches(&self, node: &NodeRef) -> bool {
        (self.predicate)(node)
    }
}

impl std::fmt::Debug for StopCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StopCondition").field(&self.description).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direction_parse_accepts_aliases() {
        assert_eq!(Direction::parse("OUTBOUND").unwrap(), Direction::Outbound);
        assert_eq!(Direction::parse(" in ").unwrap(), Direction::Inbound);
        assert_eq!(Direction::parse("both").unwrap(), Direction::Both);
    }

    #[test]
    fn direction_parse_rejects_garbage() {
        let err = Direction::parse("sideways").unwrap_err();
        assert!(matches!(err, GraphWalkError::InvalidBinding(_)));
    }

    #[test]
    fn node_key_serializes_untagged() {
        assert_eq!(serde_json::to_value(NodeKey::Int(7)).unwrap(), json!(7));
        assert_eq!(serde_json::to_value(NodeKey::from("p-1")).unwrap(), json!("p-1"));
        let back: NodeKey = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(back, NodeKey::Int(42));
    }

    #[test]
    fn node_key_orders_ints_before_text() {
        let mut keys = vec![NodeKey::from("a"), NodeKey::Int(3), NodeKey::Int(1)];
        keys.sort();
        assert_eq!(keys, vec![NodeKey::Int(1), NodeKey::Int(3), NodeKey::from("a")]);
    }

    #[test]
    fn binding_deserializes_from_yaml() {
        let yaml = r#"
table: bom
from_column: parent_id
to_column: child_id
direction: inbound
soft_delete:
  column: deleted_at
  mode: null_is_live
value_column: qty
"#;
        let binding: EdgeBinding = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(binding.direction, Direction::Inbound);
        assert_eq!(binding.value_column.as_deref(), Some("qty"));
        assert_eq!(binding.soft_delete.unwrap().mode, SoftDeleteMode::NullIsLive);
    }

    #[test]
    fn binding_rejects_unknown_direction_in_yaml() {
        let yaml = "table: t\nfrom_column: a\nto_column: b\ndirection: diagonal\n";
        let parsed: std::result::Result<EdgeBinding, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn stop_condition_matches_attribute() {
        let stop = StopCondition::attribute_equals("tier", json!(3));
        let mut node = NodeRef {
            key: NodeKey::Int(1),
            depth: 1,
            attributes: Attributes::new(),
        };
        assert!(!stop.matches(&node));
        node.attributes.insert("tier".into(), json!(3));
        assert!(stop.matches(&node));
    }

    #[test]
    fn json_filter_values_convert() {
        use rusqlite::types::Value;
        assert_eq!(json_to_sql_value(&json!(true)).unwrap(), Value::Integer(1));
        assert_eq!(json_to_sql_value(&json!("x")).unwrap(), Value::Text("x".into()));
        assert_eq!(json_to_sql_value(&json!(1.5)).unwrap(), Value::Real(1.5));
        assert!(json_to_sql_value(&json!([1])).is_err());
    }
}
