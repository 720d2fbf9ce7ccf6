use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::model::user::{EnvironmentAccess, Role, User};

const USER_COLUMNS: &str = "id, email, principal_name, role, all_environments, created_at";

async fn user_from_row(pool: &SqlitePool, row: &SqliteRow) -> sqlx::Result<User> {
    let id: String = row.try_get("id")?;
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role).ok_or_else(|| sqlx::Error::Decode(format!("unknown role: {}", role).into()))?;
    let environments = environments_for(pool, &id).await?;
    Ok(User {
        id,
        email: row.try_get("email")?,
        principal_name: row.try_get("principal_name")?,
        role,
        all_environments: row.try_get("all_environments")?,
        environments,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

async fn environments_for(pool: &SqlitePool, user_id: &str) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar("SELECT environment_id FROM user_environments WHERE user_id = ?1 ORDER BY environment_id")
        .bind(user_id)
        .fetch_all(pool)
        .await
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(user_from_row(pool, &row).await?)),
        None => Ok(None),
    }
}

/// Resolves a user by id or by email address.
pub async fn find_user(pool: &SqlitePool, id_or_email: &str) -> sqlx::Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?1 OR email = ?1 LIMIT 1", USER_COLUMNS))
        .bind(id_or_email)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(user_from_row(pool, &row).await?)),
        None => Ok(None),
    }
}

pub async fn email_for(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar("SELECT email FROM users WHERE id = ?1").bind(id).fetch_optional(pool).await
}

pub async fn create_user(pool: &SqlitePool, email: &str, principal_name: &str, role: Role) -> sqlx::Result<User> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO users (id, email, principal_name, role, all_environments, created_at)
           VALUES (?1, ?2, ?3, ?4, 1, ?5)"#,
    )
    .bind(&id)
    .bind(email)
    .bind(principal_name)
    .bind(role.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(User {
        id,
        email: email.to_string(),
        principal_name: principal_name.to_string(),
        role,
        all_environments: true,
        environments: Vec::new(),
        created_at: now,
    })
}

/// Creates the bootstrap administrator when the users table is empty.
pub async fn bootstrap_admin(pool: &SqlitePool, email: &str) -> sqlx::Result<Option<User>> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(pool).await?;
    if existing > 0 {
        return Ok(None);
    }
    let principal = email.split('@').next().unwrap_or(email);
    create_user(pool, email, principal, Role::Administrator).await.map(Some)
}

pub async fn get_environment_access(pool: &SqlitePool, user_id: &str) -> sqlx::Result<Option<EnvironmentAccess>> {
    let all: Option<bool> = sqlx::query_scalar("SELECT all_environments FROM users WHERE id = ?1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    match all {
        Some(all_environments) => Ok(Some(EnvironmentAccess {
            all_environments,
            environments: environments_for(pool, user_id).await?,
        })),
        None => Ok(None),
    }
}

/// Replaces the user's environment list.
pub async fn set_environment_access(pool: &SqlitePool, user_id: &str, access: &EnvironmentAccess) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET all_environments = ?1 WHERE id = ?2")
        .bind(access.all_environments)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user_environments WHERE user_id = ?1").bind(user_id).execute(&mut *tx).await?;
    for environment in &access.environments {
        sqlx::query("INSERT OR IGNORE INTO user_environments (user_id, environment_id) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(environment)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}
