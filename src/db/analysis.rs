use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::model::analysis::{AnalysisRequest, ScheduledAnalysisParameter, SCHEDULED_ANALYSIS_PARAMETER};

pub const REQUEST_TYPE_ANALYSIS: &str = "analysis";

/// Stores the pending analysis request, replacing an older one.
pub async fn request_analysis(pool: &SqlitePool, requested_by: &str) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO analysis_requests (id, requested_by, request_type, requested_at) VALUES (1, ?1, ?2, ?3)
           ON CONFLICT(id) DO UPDATE SET requested_by = excluded.requested_by,
               request_type = excluded.request_type, requested_at = excluded.requested_at"#,
    )
    .bind(requested_by)
    .bind(REQUEST_TYPE_ANALYSIS)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_analysis_request(pool: &SqlitePool) -> sqlx::Result<Option<AnalysisRequest>> {
    let row = sqlx::query("SELECT requested_by, request_type, requested_at FROM analysis_requests WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(AnalysisRequest {
            requested_by: row.try_get("requested_by")?,
            request_type: row.try_get("request_type")?,
            requested_at: row.try_get::<DateTime<Utc>, _>("requested_at")?,
        })),
        None => Ok(None),
    }
}

/// Removes the pending request if it was made at or before `started_at`; a newer request
/// is left for the next run. Returns whether one was removed.
pub async fn clear_analysis_request(pool: &SqlitePool, started_at: DateTime<Utc>) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM analysis_requests WHERE requested_at <= ?1")
        .bind(started_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_parameters(pool: &SqlitePool) -> sqlx::Result<Vec<(String, Value)>> {
    let rows = sqlx::query("SELECT key, value FROM parameters ORDER BY key").fetch_all(pool).await?;
    let mut parameters = Vec::with_capacity(rows.len());
    for row in rows {
        let raw: String = row.try_get("value")?;
        parameters.push((row.try_get("key")?, serde_json::from_str(&raw).unwrap_or(Value::Null)));
    }
    Ok(parameters)
}

pub async fn get_parameter<T: DeserializeOwned>(pool: &SqlitePool, key: &str) -> sqlx::Result<Option<T>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT value FROM parameters WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    match raw {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| sqlx::Error::Decode(Box::new(e))),
        None => Ok(None),
    }
}

pub async fn set_parameter<T: Serialize>(pool: &SqlitePool, key: &str, value: &T) -> sqlx::Result<()> {
    let raw = serde_json::to_string(value).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
    sqlx::query(
        r#"INSERT INTO parameters (key, value, updated_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
    )
    .bind(key)
    .bind(raw)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Stored `analysis.scheduled` setting, or `default` when it was never written.
pub async fn scheduled_analysis_enabled(pool: &SqlitePool, default: bool) -> sqlx::Result<bool> {
    let stored: Option<ScheduledAnalysisParameter> = get_parameter(pool, SCHEDULED_ANALYSIS_PARAMETER).await?;
    Ok(stored.map(|p| p.enabled).unwrap_or(default))
}
