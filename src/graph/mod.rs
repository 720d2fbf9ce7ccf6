//! Graph-query interface used by the handlers, the node/edge records it returns, and the
//! SQLite-backed reference store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::dataquality::DatabaseCompleteness;
use crate::model::params::OrderBy;

pub mod cypher;
pub mod kinds;
pub mod sqlite;

pub use sqlite::SqliteGraph;

pub const BASE_KIND: &str = "Base";
pub const AZ_BASE_KIND: &str = "AZBase";
pub const TIER_ZERO_KIND: &str = "Tag_Tier_Zero";

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node not found")]
    NotFound,
    #[error("{0}")]
    InvalidCypher(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub object_id: String,
    pub kinds: Vec<String>,
    pub properties: Map<String, Value>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Node {
    /// First kind that is neither a base kind nor a tag kind.
    pub fn primary_kind(&self) -> &str {
        primary_kind_of(&self.kinds)
    }

    pub fn name(&self) -> &str {
        self.properties.get("name").and_then(Value::as_str).unwrap_or(&self.object_id)
    }

    /// Domain SID or tenant id the node belongs to.
    pub fn environment_id(&self) -> Option<&str> {
        self.properties
            .get("domainsid")
            .or_else(|| self.properties.get("tenantid"))
            .and_then(Value::as_str)
    }

    pub fn is_tier_zero(&self) -> bool {
        self.kinds.iter().any(|k| k == TIER_ZERO_KIND)
    }
}

pub fn primary_kind_of(kinds: &[String]) -> &str {
    kinds
        .iter()
        .find(|k| k.as_str() != BASE_KIND && k.as_str() != AZ_BASE_KIND && !k.starts_with("Tag_"))
        .or_else(|| kinds.first())
        .map(String::as_str)
        .unwrap_or("Unknown")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: i64,
    pub source: i64,
    pub target: i64,
    pub kind: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One-hop relationship from an entity: edges of `edge_kinds` in `direction`, optionally
/// restricted to neighbors carrying `target_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traversal {
    pub direction: Direction,
    pub edge_kinds: &'static [&'static str],
    pub target_kind: Option<&'static str>,
}

impl Traversal {
    pub const fn inbound(edge_kinds: &'static [&'static str]) -> Self {
        Self { direction: Direction::Inbound, edge_kinds, target_kind: None }
    }

    pub const fn outbound(edge_kinds: &'static [&'static str]) -> Self {
        Self { direction: Direction::Outbound, edge_kinds, target_kind: None }
    }

    pub const fn to_kind(self, kind: &'static str) -> Self {
        Self { target_kind: Some(kind), ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedNode {
    pub label: String,
    pub kind: String,
    pub kinds: Vec<String>,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "isTierZero")]
    pub is_tier_zero: bool,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl From<&Node> for UnifiedNode {
    fn from(node: &Node) -> Self {
        Self {
            label: node.name().to_string(),
            kind: node.primary_kind().to_string(),
            kinds: node.kinds.clone(),
            object_id: node.object_id.clone(),
            is_tier_zero: node.is_tier_zero(),
            last_seen: node.last_seen,
            properties: Some(node.properties.clone()),
            hidden: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedEdge {
    pub source: String,
    pub target: String,
    pub label: String,
    pub kind: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

impl From<&Edge> for UnifiedEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            source: edge.source.to_string(),
            target: edge.target.to_string(),
            label: edge.kind.clone(),
            kind: edge.kind.clone(),
            last_seen: None,
            properties: Some(edge.properties.clone()),
        }
    }
}

/// Graph response keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnifiedGraph {
    pub nodes: BTreeMap<String, UnifiedNode>,
    pub edges: Vec<UnifiedEdge>,
}

impl UnifiedGraph {
    pub fn from_parts(nodes: &[Node], edges: &[Edge]) -> Self {
        Self {
            nodes: nodes.iter().map(|n| (n.id.to_string(), UnifiedNode::from(n))).collect(),
            edges: edges.iter().map(UnifiedEdge::from).collect(),
        }
    }
}

/// Read and write access to the graph database.
#[async_trait]
pub trait GraphQuery: Send + Sync {
    /// Node with `object_id` carrying `kind`.
    async fn get_entity_by_object_id(&self, object_id: &str, kind: &str) -> GraphResult<Node>;

    async fn nodes_by_object_ids(&self, object_ids: &[String]) -> GraphResult<Vec<Node>>;

    async fn count_nodes_by_kind(&self, kind: &str) -> GraphResult<i64>;

    /// Nodes carrying `kind`, paged, plus the total.
    async fn list_nodes_by_kind(
        &self,
        kind: &str,
        order: &OrderBy,
        skip: i64,
        limit: i64,
    ) -> GraphResult<(Vec<Node>, i64)>;

    /// Nodes carrying `kind`, counted by primary kind.
    async fn count_primary_kinds_with_kind(&self, kind: &str) -> GraphResult<BTreeMap<String, i64>>;

    async fn related_entities(
        &self,
        node: &Node,
        traversal: Traversal,
        skip: i64,
        limit: i64,
    ) -> GraphResult<(Vec<Node>, i64)>;

    async fn related_count(&self, node: &Node, traversal: Traversal) -> GraphResult<i64>;

    /// The entity, its neighbors over `traversal` and the connecting edges.
    async fn related_graph(&self, node: &Node, traversal: Traversal) -> GraphResult<(Vec<Node>, Vec<Edge>)>;

    async fn set_node_property(&self, node: &Node, key: &str, value: Value) -> GraphResult<()>;

    async fn validate_cypher(&self, query: &str) -> GraphResult<()>;

    async fn completeness(&self) -> GraphResult<DatabaseCompleteness>;

    /// Creates or merges a node; kinds and properties are unioned with existing ones.
    async fn upsert_node(&self, object_id: &str, kinds: &[String], properties: Map<String, Value>) -> GraphResult<i64>;

    async fn create_edge(&self, source: i64, target: i64, kind: &str) -> GraphResult<()>;

    /// Strips `kind` from every node carrying it. Returns the number of nodes touched.
    async fn remove_kind(&self, kind: &str) -> GraphResult<u64>;
}
