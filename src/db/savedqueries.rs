use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use crate::model::filter::QueryParameterFilterMap;
use crate::model::params::OrderBy;
use crate::model::savedqueries::{NewSavedQuery, SavedQuery, SavedQueryPermissions, SavedQueryScope, ScopedSavedQuery};

const QUERY_COLUMNS: &str = "id, user_id, name, query, description, created_at, updated_at";

fn saved_query_from_row(row: &SqliteRow) -> sqlx::Result<SavedQuery> {
    Ok(SavedQuery {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        query: row.try_get("query")?,
        description: row.try_get("description")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// Restricts `saved_queries` to the rows visible under `scope` for `user_id`.
fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, scope: SavedQueryScope, user_id: &str) {
    match scope {
        SavedQueryScope::Owned => {
            qb.push(" AND user_id = ").push_bind(user_id.to_string());
        }
        SavedQueryScope::Public => {
            qb.push(" AND id IN (SELECT query_id FROM saved_query_permissions WHERE public = 1)");
        }
        SavedQueryScope::Shared => {
            qb.push(" AND id IN (SELECT query_id FROM saved_query_permissions WHERE shared_to_user_id = ")
                .push_bind(user_id.to_string())
                .push(")");
        }
        SavedQueryScope::All => {
            qb.push(" AND (user_id = ")
                .push_bind(user_id.to_string())
                .push(" OR id IN (SELECT query_id FROM saved_query_permissions WHERE public = 1 OR shared_to_user_id = ")
                .push_bind(user_id.to_string())
                .push("))");
        }
    }
}

pub async fn create_saved_query(pool: &SqlitePool, new: &NewSavedQuery) -> sqlx::Result<SavedQuery> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO saved_queries (user_id, name, query, description, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5) RETURNING id"#,
    )
    .bind(&new.user_id)
    .bind(&new.name)
    .bind(&new.query)
    .bind(&new.description)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(SavedQuery {
        id,
        user_id: new.user_id.clone(),
        name: new.name.clone(),
        query: new.query.clone(),
        description: new.description.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Inserts every query or none of them.
pub async fn create_saved_queries(pool: &SqlitePool, queries: &[NewSavedQuery]) -> sqlx::Result<usize> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for new in queries {
        sqlx::query(
            r#"INSERT INTO saved_queries (user_id, name, query, description, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
        )
        .bind(&new.user_id)
        .bind(&new.name)
        .bind(&new.query)
        .bind(&new.description)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(queries.len())
}

pub async fn get_saved_query(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<SavedQuery>> {
    let row = sqlx::query(&format!("SELECT {} FROM saved_queries WHERE id = ?1", QUERY_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(saved_query_from_row).transpose()
}

/// Queries visible under `scope`, filtered and ordered, with the unpaged total.
pub async fn list_saved_queries(
    pool: &SqlitePool,
    user_id: &str,
    scope: SavedQueryScope,
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<SavedQuery>, i64)> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM saved_queries WHERE 1=1");
    push_scope(&mut count_qb, scope, user_id);
    filters.push_sql(&mut count_qb);
    let count: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM saved_queries WHERE 1=1", QUERY_COLUMNS));
    push_scope(&mut qb, scope, user_id);
    filters.push_sql(&mut qb);
    order.push_sql(&mut qb, "id");
    qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);
    let rows = qb.build().fetch_all(pool).await?;
    let queries = rows.iter().map(saved_query_from_row).collect::<sqlx::Result<Vec<_>>>()?;
    Ok((queries, count))
}

/// Every query of each requested scope tagged with that scope, then paged as one list.
pub async fn list_scoped_saved_queries(
    pool: &SqlitePool,
    user_id: &str,
    scopes: &[SavedQueryScope],
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<ScopedSavedQuery>, i64)> {
    let mut all = Vec::new();
    for scope in scopes {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM saved_queries WHERE 1=1", QUERY_COLUMNS));
        push_scope(&mut qb, *scope, user_id);
        filters.push_sql(&mut qb);
        order.push_sql(&mut qb, "id");
        let rows = qb.build().fetch_all(pool).await?;
        for row in &rows {
            all.push(ScopedSavedQuery { query: saved_query_from_row(row)?, scope: scope.as_str().to_string() });
        }
    }

    let count = all.len() as i64;
    let page = all.into_iter().skip(skip.max(0) as usize).take(limit.max(0) as usize).collect();
    Ok((page, count))
}

/// Every query visible under `scope`, for export.
pub async fn saved_queries_for_scope(
    pool: &SqlitePool,
    user_id: &str,
    scope: SavedQueryScope,
) -> sqlx::Result<Vec<SavedQuery>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM saved_queries WHERE 1=1", QUERY_COLUMNS));
    push_scope(&mut qb, scope, user_id);
    qb.push(" ORDER BY id");
    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(saved_query_from_row).collect()
}

pub async fn update_saved_query(pool: &SqlitePool, query: &SavedQuery) -> sqlx::Result<SavedQuery> {
    let now = Utc::now();
    sqlx::query("UPDATE saved_queries SET name = ?1, query = ?2, description = ?3, updated_at = ?4 WHERE id = ?5")
        .bind(&query.name)
        .bind(&query.query)
        .bind(&query.description)
        .bind(now)
        .bind(query.id)
        .execute(pool)
        .await?;
    Ok(SavedQuery { updated_at: now, ..query.clone() })
}

pub async fn delete_saved_query(pool: &SqlitePool, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM saved_queries WHERE id = ?1").bind(id).execute(pool).await?;
    Ok(())
}

pub async fn is_public(pool: &SqlitePool, id: i64) -> sqlx::Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM saved_query_permissions WHERE query_id = ?1 AND public = 1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn is_shared_to(pool: &SqlitePool, id: i64, user_id: &str) -> sqlx::Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM saved_query_permissions WHERE query_id = ?1 AND shared_to_user_id = ?2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn get_permissions(pool: &SqlitePool, id: i64) -> sqlx::Result<SavedQueryPermissions> {
    let shared_to_user_ids: Vec<String> = sqlx::query_scalar(
        r#"SELECT shared_to_user_id FROM saved_query_permissions
           WHERE query_id = ?1 AND shared_to_user_id IS NOT NULL ORDER BY id"#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(SavedQueryPermissions { query_id: id, public: is_public(pool, id).await?, shared_to_user_ids })
}

/// Public queries are not shared to individual users, so going public drops the shares.
pub async fn set_public(pool: &SqlitePool, id: i64, public: bool) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    if public {
        sqlx::query("DELETE FROM saved_query_permissions WHERE query_id = ?1").bind(id).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO saved_query_permissions (query_id, shared_to_user_id, public, created_at) VALUES (?1, NULL, 1, ?2)")
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query("DELETE FROM saved_query_permissions WHERE query_id = ?1 AND public = 1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

pub async fn share(pool: &SqlitePool, id: i64, user_ids: &[String]) -> sqlx::Result<()> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for user_id in user_ids {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM saved_query_permissions WHERE query_id = ?1 AND shared_to_user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if exists > 0 {
            continue;
        }
        sqlx::query("INSERT INTO saved_query_permissions (query_id, shared_to_user_id, public, created_at) VALUES (?1, ?2, 0, ?3)")
            .bind(id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

pub async fn unshare(pool: &SqlitePool, id: i64, user_ids: &[String]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for user_id in user_ids {
        sqlx::query("DELETE FROM saved_query_permissions WHERE query_id = ?1 AND shared_to_user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}
