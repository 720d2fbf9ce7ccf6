use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use super::{cypher, primary_kind_of, Direction, Edge, GraphError, GraphQuery, GraphResult, Node, Traversal};
use crate::model::dataquality::DatabaseCompleteness;
use crate::model::params::OrderBy;

const NODE_COLUMNS: &str = "n.id, n.object_id, n.kinds, n.properties, n.last_seen";
const LOCAL_GROUP_EDGES: &[&str] = &["AdminTo", "CanRDP", "ExecuteDCOM", "CanPSRemote"];

/// Graph store kept in the application's SQLite database (`graph_nodes`,
/// `graph_node_kinds`, `graph_edges`). Traversals are single hop.
#[derive(Clone)]
pub struct SqliteGraph {
    pool: SqlitePool,
}

impl SqliteGraph {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn nodes_by_ids(&self, ids: &[i64]) -> GraphResult<Vec<Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM graph_nodes n WHERE n.id IN (", NODE_COLUMNS));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        qb.push(") ORDER BY n.id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }
}

fn node_from_row(row: &SqliteRow) -> GraphResult<Node> {
    let kinds: String = row.try_get("kinds")?;
    let properties: String = row.try_get("properties")?;
    Ok(Node {
        id: row.try_get("id")?,
        object_id: row.try_get("object_id")?,
        kinds: serde_json::from_str(&kinds)?,
        properties: serde_json::from_str(&properties)?,
        last_seen: row.try_get::<Option<DateTime<Utc>>, _>("last_seen")?,
    })
}

fn edge_from_row(row: &SqliteRow) -> GraphResult<Edge> {
    let properties: String = row.try_get("properties")?;
    Ok(Edge {
        id: row.try_get("id")?,
        source: row.try_get("start_id")?,
        target: row.try_get("end_id")?,
        kind: row.try_get("kind")?,
        properties: serde_json::from_str(&properties)?,
    })
}

fn push_has_kind(qb: &mut QueryBuilder<'_, Sqlite>, node_column: &str, kind: &str) {
    qb.push(" AND EXISTS (SELECT 1 FROM graph_node_kinds k WHERE k.node_id = ")
        .push(node_column)
        .push(" AND k.kind = ")
        .push_bind(kind.to_string())
        .push(")");
}

fn push_edge_kinds(qb: &mut QueryBuilder<'_, Sqlite>, edge_kinds: &[&str]) {
    qb.push(" AND e.kind IN (");
    let mut sep = qb.separated(", ");
    for kind in edge_kinds {
        sep.push_bind(kind.to_string());
    }
    qb.push(")");
}

/// `(anchor column, neighbor column)` of an edge for a traversal direction.
fn edge_columns(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Outbound => ("e.start_id", "e.end_id"),
        Direction::Inbound => ("e.end_id", "e.start_id"),
    }
}

/// Restricts `n` to the neighbors of `node_id` reached through `traversal`.
fn push_related_filter(qb: &mut QueryBuilder<'_, Sqlite>, node_id: i64, traversal: Traversal) {
    let (anchor, neighbor) = edge_columns(traversal.direction);
    qb.push(" WHERE n.id IN (SELECT ")
        .push(neighbor)
        .push(" FROM graph_edges e WHERE ")
        .push(anchor)
        .push(" = ")
        .push_bind(node_id);
    push_edge_kinds(qb, traversal.edge_kinds);
    qb.push(")");
    if let Some(kind) = traversal.target_kind {
        push_has_kind(qb, "n.id", kind);
    }
}

fn ratio(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[async_trait]
impl GraphQuery for SqliteGraph {
    async fn get_entity_by_object_id(&self, object_id: &str, kind: &str) -> GraphResult<Node> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM graph_nodes n WHERE n.object_id = ", NODE_COLUMNS));
        qb.push_bind(object_id.to_string()).push(" COLLATE NOCASE");
        push_has_kind(&mut qb, "n.id", kind);
        let row = qb.build().fetch_optional(&self.pool).await?.ok_or(GraphError::NotFound)?;
        node_from_row(&row)
    }

    async fn nodes_by_object_ids(&self, object_ids: &[String]) -> GraphResult<Vec<Node>> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM graph_nodes n WHERE n.object_id COLLATE NOCASE IN (",
            NODE_COLUMNS
        ));
        let mut sep = qb.separated(", ");
        for object_id in object_ids {
            sep.push_bind(object_id.clone());
        }
        qb.push(") ORDER BY n.id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn count_nodes_by_kind(&self, kind: &str) -> GraphResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM graph_node_kinds WHERE kind = ?1")
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_nodes_by_kind(
        &self,
        kind: &str,
        order: &OrderBy,
        skip: i64,
        limit: i64,
    ) -> GraphResult<(Vec<Node>, i64)> {
        let total = self.count_nodes_by_kind(kind).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM graph_nodes n WHERE 1=1", NODE_COLUMNS));
        push_has_kind(&mut qb, "n.id", kind);
        order.push_sql(&mut qb, "n.id");
        qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let nodes = rows.iter().map(node_from_row).collect::<GraphResult<Vec<_>>>()?;
        Ok((nodes, total))
    }

    async fn count_primary_kinds_with_kind(&self, kind: &str) -> GraphResult<BTreeMap<String, i64>> {
        let rows = sqlx::query(
            r#"SELECT n.primary_kind AS primary_kind, COUNT(*) AS total
               FROM graph_nodes n
               JOIN graph_node_kinds k ON k.node_id = n.id AND k.kind = ?1
               GROUP BY n.primary_kind"#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(row.try_get::<String, _>("primary_kind")?, row.try_get::<i64, _>("total")?);
        }
        Ok(counts)
    }

    async fn related_entities(
        &self,
        node: &Node,
        traversal: Traversal,
        skip: i64,
        limit: i64,
    ) -> GraphResult<(Vec<Node>, i64)> {
        let total = self.related_count(node, traversal).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM graph_nodes n", NODE_COLUMNS));
        push_related_filter(&mut qb, node.id, traversal);
        qb.push(" ORDER BY n.id LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let nodes = rows.iter().map(node_from_row).collect::<GraphResult<Vec<_>>>()?;
        Ok((nodes, total))
    }

    async fn related_count(&self, node: &Node, traversal: Traversal) -> GraphResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM graph_nodes n");
        push_related_filter(&mut qb, node.id, traversal);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn related_graph(&self, node: &Node, traversal: Traversal) -> GraphResult<(Vec<Node>, Vec<Edge>)> {
        let (anchor, neighbor) = edge_columns(traversal.direction);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT e.id, e.start_id, e.end_id, e.kind, e.properties FROM graph_edges e WHERE ");
        qb.push(anchor).push(" = ").push_bind(node.id);
        push_edge_kinds(&mut qb, traversal.edge_kinds);
        if let Some(kind) = traversal.target_kind {
            push_has_kind(&mut qb, neighbor, kind);
        }
        qb.push(" ORDER BY e.id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        let edges = rows.iter().map(edge_from_row).collect::<GraphResult<Vec<_>>>()?;

        let mut ids: Vec<i64> = edges
            .iter()
            .map(|e| match traversal.direction {
                Direction::Outbound => e.target,
                Direction::Inbound => e.source,
            })
            .collect();
        ids.push(node.id);
        ids.sort_unstable();
        ids.dedup();
        let nodes = self.nodes_by_ids(&ids).await?;
        Ok((nodes, edges))
    }

    async fn set_node_property(&self, node: &Node, key: &str, value: Value) -> GraphResult<()> {
        let raw: Option<String> = sqlx::query_scalar("SELECT properties FROM graph_nodes WHERE id = ?1")
            .bind(node.id)
            .fetch_optional(&self.pool)
            .await?;
        let raw = raw.ok_or(GraphError::NotFound)?;
        let mut properties: Map<String, Value> = serde_json::from_str(&raw)?;
        properties.insert(key.to_string(), value);

        sqlx::query("UPDATE graph_nodes SET properties = ?1, last_seen = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(&properties)?)
            .bind(Utc::now())
            .bind(node.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn validate_cypher(&self, query: &str) -> GraphResult<()> {
        cypher::validate_read_only(query)
    }

    async fn completeness(&self) -> GraphResult<DatabaseCompleteness> {
        let computers = self.count_nodes_by_kind("Computer").await?;

        let with_sessions: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(DISTINCT e.start_id) FROM graph_edges e
               JOIN graph_node_kinds k ON k.node_id = e.start_id AND k.kind = 'Computer'
               WHERE e.kind = 'HasSession'"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(DISTINCT e.end_id) FROM graph_edges e \
             JOIN graph_node_kinds k ON k.node_id = e.end_id AND k.kind = 'Computer' WHERE 1=1",
        );
        push_edge_kinds(&mut qb, LOCAL_GROUP_EDGES);
        let with_local_groups: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(DatabaseCompleteness {
            local_group_completeness: ratio(with_local_groups, computers),
            session_completeness: ratio(with_sessions, computers),
        })
    }

    async fn upsert_node(&self, object_id: &str, kinds: &[String], properties: Map<String, Value>) -> GraphResult<i64> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id, kinds, properties FROM graph_nodes WHERE object_id = ?1 COLLATE NOCASE")
            .bind(object_id)
            .fetch_optional(&mut *tx)
            .await?;

        let (id, merged_kinds) = match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let mut merged_kinds: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("kinds")?)?;
                for kind in kinds {
                    if !merged_kinds.contains(kind) {
                        merged_kinds.push(kind.clone());
                    }
                }
                let mut merged: Map<String, Value> = serde_json::from_str(&row.try_get::<String, _>("properties")?)?;
                merged.extend(properties);
                let name = merged.get("name").and_then(Value::as_str).unwrap_or(object_id).to_string();

                sqlx::query(
                    r#"UPDATE graph_nodes SET kinds = ?1, properties = ?2, name = ?3, primary_kind = ?4, last_seen = ?5
                       WHERE id = ?6"#,
                )
                .bind(serde_json::to_string(&merged_kinds)?)
                .bind(serde_json::to_string(&merged)?)
                .bind(name)
                .bind(primary_kind_of(&merged_kinds))
                .bind(Utc::now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                (id, merged_kinds)
            }
            None => {
                let name = properties.get("name").and_then(Value::as_str).unwrap_or(object_id).to_string();
                let id: i64 = sqlx::query_scalar(
                    r#"INSERT INTO graph_nodes (object_id, name, primary_kind, kinds, properties, last_seen)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id"#,
                )
                .bind(object_id)
                .bind(name)
                .bind(primary_kind_of(kinds))
                .bind(serde_json::to_string(kinds)?)
                .bind(serde_json::to_string(&properties)?)
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?;
                (id, kinds.to_vec())
            }
        };

        for (position, kind) in merged_kinds.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO graph_node_kinds (node_id, kind, position) VALUES (?1, ?2, ?3)")
                .bind(id)
                .bind(kind)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn create_edge(&self, source: i64, target: i64, kind: &str) -> GraphResult<()> {
        sqlx::query("INSERT OR IGNORE INTO graph_edges (start_id, end_id, kind) VALUES (?1, ?2, ?3)")
            .bind(source)
            .bind(target)
            .bind(kind)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_kind(&self, kind: &str) -> GraphResult<u64> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT n.id, n.kinds FROM graph_nodes n JOIN graph_node_kinds k ON k.node_id = n.id AND k.kind = ?1",
        )
        .bind(kind)
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let mut kinds: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("kinds")?)?;
            kinds.retain(|k| k != kind);
            sqlx::query("UPDATE graph_nodes SET kinds = ?1, primary_kind = ?2 WHERE id = ?3")
                .bind(serde_json::to_string(&kinds)?)
                .bind(primary_kind_of(&kinds))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM graph_node_kinds WHERE kind = ?1").bind(kind).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(rows.len() as u64)
    }
}
