use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use crate::model::filter::QueryParameterFilterMap;
use crate::model::ingest::{CompletedTask, FileType, IngestJob, IngestTask, JobStatus};
use crate::model::params::OrderBy;
use crate::model::user::User;

const JOB_COLUMNS: &str = "id, user_id, user_email_address, status, status_message, start_time, end_time, \
                           last_ingest, total_files, failed_files";
const TASK_COLUMNS: &str = "id, file_name, original_file_name, request_guid, job_id, file_type, created_at";

fn job_from_row(row: &SqliteRow) -> sqlx::Result<IngestJob> {
    let status: i64 = row.try_get("status")?;
    Ok(IngestJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_email_address: row.try_get("user_email_address")?,
        status: JobStatus::from_i64(status).unwrap_or(JobStatus::Invalid),
        status_message: row.try_get("status_message")?,
        start_time: row.try_get::<DateTime<Utc>, _>("start_time")?,
        end_time: row.try_get("end_time")?,
        last_ingest: row.try_get::<DateTime<Utc>, _>("last_ingest")?,
        total_files: row.try_get("total_files")?,
        failed_files: row.try_get("failed_files")?,
    })
}

fn file_type_of(raw: i64) -> FileType {
    FileType::from_i64(raw).unwrap_or(FileType::Json)
}

fn task_from_row(row: &SqliteRow) -> sqlx::Result<IngestTask> {
    Ok(IngestTask {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        original_file_name: row.try_get("original_file_name")?,
        request_guid: row.try_get("request_guid")?,
        job_id: row.try_get("job_id")?,
        file_type: file_type_of(row.try_get("file_type")?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

pub async fn create_job(pool: &SqlitePool, user: &User) -> sqlx::Result<IngestJob> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO ingest_jobs (user_id, user_email_address, status, status_message, start_time, last_ingest)
           VALUES (?1, ?2, ?3, '', ?4, ?4) RETURNING id"#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(JobStatus::Running.as_i64())
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(IngestJob {
        id,
        user_id: user.id.clone(),
        user_email_address: Some(user.email.clone()),
        status: JobStatus::Running,
        status_message: String::new(),
        start_time: now,
        end_time: None,
        last_ingest: now,
        total_files: 0,
        failed_files: 0,
    })
}

pub async fn get_job(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<IngestJob>> {
    let row = sqlx::query(&format!("SELECT {} FROM ingest_jobs WHERE id = ?1", JOB_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn list_jobs(
    pool: &SqlitePool,
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<IngestJob>, i64)> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM ingest_jobs WHERE 1=1");
    filters.push_sql(&mut count_qb);
    let count: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM ingest_jobs WHERE 1=1", JOB_COLUMNS));
    filters.push_sql(&mut qb);
    order.push_sql(&mut qb, "id");
    qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);
    let rows = qb.build().fetch_all(pool).await?;
    let jobs = rows.iter().map(job_from_row).collect::<sqlx::Result<Vec<_>>>()?;
    Ok((jobs, count))
}

pub async fn jobs_with_status(pool: &SqlitePool, status: JobStatus) -> sqlx::Result<Vec<IngestJob>> {
    let rows = sqlx::query(&format!("SELECT {} FROM ingest_jobs WHERE status = ?1 ORDER BY id", JOB_COLUMNS))
        .bind(status.as_i64())
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

/// Records an accepted file on a running job.
pub async fn touch_job(pool: &SqlitePool, id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE ingest_jobs SET last_ingest = ?1, total_files = total_files + 1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn end_job(pool: &SqlitePool, id: i64) -> sqlx::Result<IngestJob> {
    sqlx::query("UPDATE ingest_jobs SET status = ?1, status_message = ?2, end_time = ?3 WHERE id = ?4")
        .bind(JobStatus::Ingesting.as_i64())
        .bind("Ingesting")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    get_job(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn set_job_status(pool: &SqlitePool, id: i64, status: JobStatus, message: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE ingest_jobs SET status = ?1, status_message = ?2 WHERE id = ?3")
        .bind(status.as_i64())
        .bind(message)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn add_failed_files(pool: &SqlitePool, id: i64, count: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE ingest_jobs SET failed_files = failed_files + ?1 WHERE id = ?2")
        .bind(count)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Marks running jobs idle since before `cutoff` as timed out. Returns the affected ids.
pub async fn time_out_stale_jobs(pool: &SqlitePool, cutoff: DateTime<Utc>, message: &str) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar(
        r#"UPDATE ingest_jobs SET status = ?1, status_message = ?2, end_time = ?3
           WHERE status = ?4 AND last_ingest < ?5 RETURNING id"#,
    )
    .bind(JobStatus::TimedOut.as_i64())
    .bind(message)
    .bind(Utc::now())
    .bind(JobStatus::Running.as_i64())
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub file_name: String,
    pub original_file_name: String,
    pub request_guid: String,
    pub job_id: i64,
    pub file_type: FileType,
}

pub async fn create_task(pool: &SqlitePool, task: NewTask) -> sqlx::Result<IngestTask> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO ingest_tasks (file_name, original_file_name, request_guid, job_id, file_type, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id"#,
    )
    .bind(&task.file_name)
    .bind(&task.original_file_name)
    .bind(&task.request_guid)
    .bind(task.job_id)
    .bind(task.file_type.as_i64())
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(IngestTask {
        id,
        file_name: task.file_name,
        original_file_name: task.original_file_name,
        request_guid: task.request_guid,
        job_id: task.job_id,
        file_type: task.file_type,
        created_at: now,
    })
}

pub async fn pending_tasks(pool: &SqlitePool) -> sqlx::Result<Vec<IngestTask>> {
    let rows = sqlx::query(&format!("SELECT {} FROM ingest_tasks WHERE completed_at IS NULL ORDER BY id", TASK_COLUMNS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(task_from_row).collect()
}

pub async fn count_pending_tasks(pool: &SqlitePool, job_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM ingest_tasks WHERE job_id = ?1 AND completed_at IS NULL")
        .bind(job_id)
        .fetch_one(pool)
        .await
}

pub async fn complete_task(pool: &SqlitePool, id: i64, errors: &[String]) -> sqlx::Result<()> {
    let errors = serde_json::to_string(errors).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
    sqlx::query("UPDATE ingest_tasks SET completed_at = ?1, errors = ?2 WHERE id = ?3")
        .bind(Utc::now())
        .bind(errors)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn completed_tasks(pool: &SqlitePool, job_id: i64) -> sqlx::Result<Vec<CompletedTask>> {
    let rows = sqlx::query(
        r#"SELECT id, job_id, original_file_name, file_type, errors, created_at, completed_at
           FROM ingest_tasks WHERE job_id = ?1 AND completed_at IS NOT NULL ORDER BY id"#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> sqlx::Result<CompletedTask> {
            let errors: String = row.try_get("errors")?;
            Ok(CompletedTask {
                id: row.try_get("id")?,
                job_id: row.try_get("job_id")?,
                file_name: row.try_get("original_file_name")?,
                file_type: file_type_of(row.try_get("file_type")?),
                errors: serde_json::from_str(&errors).unwrap_or_default(),
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                completed_at: row.try_get::<DateTime<Utc>, _>("completed_at")?,
            })
        })
        .collect()
}
