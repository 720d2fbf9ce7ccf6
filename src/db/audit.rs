use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::current_request_id;
use crate::model::audit::{AuditEntry, AuditLog};
use crate::model::filter::QueryParameterFilterMap;
use crate::model::params::OrderBy;
use crate::model::user::User;

fn audit_log_from_row(row: &SqliteRow) -> sqlx::Result<AuditLog> {
    let fields: String = row.try_get("fields")?;
    Ok(AuditLog {
        id: row.try_get("id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        actor_id: row.try_get("actor_id")?,
        actor_name: row.try_get("actor_name")?,
        actor_email: row.try_get("actor_email")?,
        action: row.try_get("action")?,
        fields: serde_json::from_str(&fields).unwrap_or(Value::Null),
        request_id: row.try_get("request_id")?,
        status: row.try_get("status")?,
        commit_id: row.try_get("commit_id")?,
        error_msg: row.try_get("error_msg")?,
    })
}

/// Appends `entry` in its current status for `actor`, tagged with the current request id.
pub async fn append(pool: &SqlitePool, actor: &User, entry: &AuditEntry) -> sqlx::Result<()> {
    let fields = Value::Object(entry.fields.clone()).to_string();
    sqlx::query(
        r#"INSERT INTO audit_logs
            (created_at, actor_id, actor_name, actor_email, action, fields, request_id, status, commit_id, error_msg)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
    )
    .bind(Utc::now())
    .bind(&actor.id)
    .bind(&actor.principal_name)
    .bind(&actor.email)
    .bind(entry.action.as_str())
    .bind(fields)
    .bind(current_request_id())
    .bind(entry.status.as_str())
    .bind(entry.commit_id.to_string())
    .bind(&entry.error_msg)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_audit_logs(
    pool: &SqlitePool,
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<AuditLog>, i64)> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
    filters.push_sql(&mut count_qb);
    let count: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, created_at, actor_id, actor_name, actor_email, action, fields, request_id, status, commit_id, \
         error_msg FROM audit_logs WHERE 1=1",
    );
    filters.push_sql(&mut qb);
    order.push_sql(&mut qb, "created_at DESC, id DESC");
    qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);
    let rows = qb.build().fetch_all(pool).await?;
    let logs = rows.iter().map(audit_log_from_row).collect::<sqlx::Result<Vec<_>>>()?;
    Ok((logs, count))
}
