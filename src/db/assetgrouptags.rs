use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use crate::model::assetgrouptags::{
    AssetGroupHistory, AssetGroupTag, AssetGroupTagSelector, AssetGroupTagType, HistoryAction, SelectorAutoCertifyMethod,
    SelectorSeed,
};
use crate::model::filter::QueryParameterFilterMap;
use crate::model::params::OrderBy;

const TAG_COLUMNS: &str = "id, type, kind_id, name, description, created_at, created_by, updated_at, updated_by, \
                           deleted_at, deleted_by, position, require_certify, analysis_enabled";
const SELECTOR_COLUMNS: &str = "id, asset_group_tag_id, created_at, created_by, updated_at, updated_by, disabled_at, \
                                disabled_by, name, description, auto_certify, is_default, allow_disable";

fn decode_err(what: &str, value: i64) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {}: {}", what, value).into())
}

fn tag_from_row(row: &SqliteRow) -> sqlx::Result<AssetGroupTag> {
    let raw_type: i64 = row.try_get("type")?;
    Ok(AssetGroupTag {
        id: row.try_get("id")?,
        tag_type: AssetGroupTagType::from_i64(raw_type).ok_or_else(|| decode_err("tag type", raw_type))?,
        kind_id: row.try_get("kind_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        created_by: row.try_get("created_by")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        updated_by: row.try_get("updated_by")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
        position: row.try_get("position")?,
        require_certify: row.try_get("require_certify")?,
        analysis_enabled: row.try_get("analysis_enabled")?,
    })
}

fn selector_from_row(row: &SqliteRow) -> sqlx::Result<AssetGroupTagSelector> {
    let auto_certify: i64 = row.try_get("auto_certify")?;
    Ok(AssetGroupTagSelector {
        id: row.try_get("id")?,
        asset_group_tag_id: row.try_get("asset_group_tag_id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        created_by: row.try_get("created_by")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        updated_by: row.try_get("updated_by")?,
        disabled_at: row.try_get("disabled_at")?,
        disabled_by: row.try_get("disabled_by")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        auto_certify: SelectorAutoCertifyMethod::from_i64(auto_certify)
            .ok_or_else(|| decode_err("auto_certify", auto_certify))?,
        is_default: row.try_get("is_default")?,
        allow_disable: row.try_get("allow_disable")?,
        seeds: Vec::new(),
    })
}

fn history_from_row(row: &SqliteRow) -> sqlx::Result<AssetGroupHistory> {
    Ok(AssetGroupHistory {
        id: row.try_get("id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        actor: row.try_get("actor")?,
        email: row.try_get("email")?,
        action: row.try_get("action")?,
        target: row.try_get("target")?,
        asset_group_tag_id: row.try_get("asset_group_tag_id")?,
        environment_id: row.try_get("environment_id")?,
        note: row.try_get("note")?,
    })
}

pub async fn list_tags(
    pool: &SqlitePool,
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
) -> sqlx::Result<Vec<AssetGroupTag>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM asset_group_tags WHERE deleted_at IS NULL", TAG_COLUMNS));
    filters.push_sql(&mut qb);
    order.push_sql(&mut qb, "id");
    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(tag_from_row).collect()
}

pub async fn get_tag(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<AssetGroupTag>> {
    let row = sqlx::query(&format!("SELECT {} FROM asset_group_tags WHERE id = ?1 AND deleted_at IS NULL", TAG_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(tag_from_row).transpose()
}

pub async fn count_tiers(pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM asset_group_tags WHERE type = ?1 AND deleted_at IS NULL")
        .bind(AssetGroupTagType::Tier.as_i64())
        .fetch_one(pool)
        .await
}

/// Writes every mutable column of `tag`. A changed tier position shifts the tiers in
/// between by one so positions stay contiguous.
pub async fn update_tag(pool: &SqlitePool, tag: &AssetGroupTag, previous_position: Option<i64>) -> sqlx::Result<AssetGroupTag> {
    let mut tx = pool.begin().await?;

    if let (Some(old), Some(new)) = (previous_position, tag.position) {
        if new < old {
            sqlx::query(
                r#"UPDATE asset_group_tags SET position = position + 1
                   WHERE type = ?1 AND deleted_at IS NULL AND id <> ?2 AND position >= ?3 AND position < ?4"#,
            )
            .bind(AssetGroupTagType::Tier.as_i64())
            .bind(tag.id)
            .bind(new)
            .bind(old)
            .execute(&mut *tx)
            .await?;
        } else if new > old {
            sqlx::query(
                r#"UPDATE asset_group_tags SET position = position - 1
                   WHERE type = ?1 AND deleted_at IS NULL AND id <> ?2 AND position > ?3 AND position <= ?4"#,
            )
            .bind(AssetGroupTagType::Tier.as_i64())
            .bind(tag.id)
            .bind(old)
            .bind(new)
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        r#"UPDATE asset_group_tags
           SET name = ?1, description = ?2, position = ?3, require_certify = ?4, analysis_enabled = ?5,
               updated_at = ?6, updated_by = ?7
           WHERE id = ?8"#,
    )
    .bind(&tag.name)
    .bind(&tag.description)
    .bind(tag.position)
    .bind(tag.require_certify)
    .bind(tag.analysis_enabled)
    .bind(tag.updated_at)
    .bind(&tag.updated_by)
    .bind(tag.id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(&format!("SELECT {} FROM asset_group_tags WHERE id = ?1", TAG_COLUMNS))
        .bind(tag.id)
        .fetch_one(&mut *tx)
        .await?;
    let updated = tag_from_row(&row)?;
    tx.commit().await?;
    Ok(updated)
}

pub async fn count_selectors(pool: &SqlitePool, tag_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM asset_group_tag_selectors WHERE asset_group_tag_id = ?1")
        .bind(tag_id)
        .fetch_one(pool)
        .await
}

async fn seeds_for_tag(pool: &SqlitePool, tag_id: i64) -> sqlx::Result<HashMap<i64, Vec<SelectorSeed>>> {
    let rows = sqlx::query(
        r#"SELECT s.selector_id, s.type, s.value FROM asset_group_tag_selector_seeds s
           JOIN asset_group_tag_selectors sel ON sel.id = s.selector_id
           WHERE sel.asset_group_tag_id = ?1 ORDER BY s.id"#,
    )
    .bind(tag_id)
    .fetch_all(pool)
    .await?;

    let mut seeds: HashMap<i64, Vec<SelectorSeed>> = HashMap::new();
    for row in rows {
        seeds
            .entry(row.try_get("selector_id")?)
            .or_default()
            .push(SelectorSeed { seed_type: row.try_get("type")?, value: row.try_get("value")? });
    }
    Ok(seeds)
}

pub async fn list_selectors(
    pool: &SqlitePool,
    tag_id: i64,
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
) -> sqlx::Result<Vec<AssetGroupTagSelector>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM asset_group_tag_selectors WHERE asset_group_tag_id = ",
        SELECTOR_COLUMNS
    ));
    qb.push_bind(tag_id);
    filters.push_sql(&mut qb);
    order.push_sql(&mut qb, "id");
    let rows = qb.build().fetch_all(pool).await?;

    let mut seeds = seeds_for_tag(pool, tag_id).await?;
    rows.iter()
        .map(|row| -> sqlx::Result<AssetGroupTagSelector> {
            let mut selector = selector_from_row(row)?;
            selector.seeds = seeds.remove(&selector.id).unwrap_or_default();
            Ok(selector)
        })
        .collect()
}

pub async fn get_selector(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<AssetGroupTagSelector>> {
    let row = sqlx::query(&format!("SELECT {} FROM asset_group_tag_selectors WHERE id = ?1", SELECTOR_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut selector = selector_from_row(&row)?;
    selector.seeds = sqlx::query("SELECT type, value FROM asset_group_tag_selector_seeds WHERE selector_id = ?1 ORDER BY id")
        .bind(id)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| -> sqlx::Result<SelectorSeed> {
            Ok(SelectorSeed { seed_type: r.try_get("type")?, value: r.try_get("value")? })
        })
        .collect::<sqlx::Result<Vec<_>>>()?;
    Ok(Some(selector))
}

/// Selector fields supplied by a client.
#[derive(Debug, Clone)]
pub struct SelectorInput {
    pub name: String,
    pub description: String,
    pub auto_certify: SelectorAutoCertifyMethod,
    pub seeds: Vec<SelectorSeed>,
}

pub async fn create_selector(
    pool: &SqlitePool,
    tag_id: i64,
    actor: &str,
    input: &SelectorInput,
) -> sqlx::Result<AssetGroupTagSelector> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO asset_group_tag_selectors
            (asset_group_tag_id, created_at, created_by, updated_at, updated_by, name, description,
             auto_certify, is_default, allow_disable)
           VALUES (?1, ?2, ?3, ?2, ?3, ?4, ?5, ?6, 0, 1) RETURNING id"#,
    )
    .bind(tag_id)
    .bind(now)
    .bind(actor)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.auto_certify.as_i64())
    .fetch_one(&mut *tx)
    .await?;

    for seed in &input.seeds {
        sqlx::query("INSERT INTO asset_group_tag_selector_seeds (selector_id, type, value) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(seed.seed_type)
            .bind(&seed.value)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(AssetGroupTagSelector {
        id,
        asset_group_tag_id: tag_id,
        created_at: now,
        created_by: actor.to_string(),
        updated_at: now,
        updated_by: actor.to_string(),
        disabled_at: None,
        disabled_by: None,
        name: input.name.clone(),
        description: input.description.clone(),
        auto_certify: input.auto_certify,
        is_default: false,
        allow_disable: true,
        seeds: input.seeds.clone(),
    })
}

/// Persists `selector` as given, replacing its seeds.
pub async fn update_selector(pool: &SqlitePool, selector: &AssetGroupTagSelector) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"UPDATE asset_group_tag_selectors
           SET name = ?1, description = ?2, auto_certify = ?3, disabled_at = ?4, disabled_by = ?5,
               updated_at = ?6, updated_by = ?7
           WHERE id = ?8"#,
    )
    .bind(&selector.name)
    .bind(&selector.description)
    .bind(selector.auto_certify.as_i64())
    .bind(selector.disabled_at)
    .bind(&selector.disabled_by)
    .bind(selector.updated_at)
    .bind(&selector.updated_by)
    .bind(selector.id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM asset_group_tag_selector_seeds WHERE selector_id = ?1")
        .bind(selector.id)
        .execute(&mut *tx)
        .await?;
    for seed in &selector.seeds {
        sqlx::query("INSERT INTO asset_group_tag_selector_seeds (selector_id, type, value) VALUES (?1, ?2, ?3)")
            .bind(selector.id)
            .bind(seed.seed_type)
            .bind(&seed.value)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

pub async fn delete_selector(pool: &SqlitePool, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM asset_group_tag_selectors WHERE id = ?1").bind(id).execute(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HistoryRecord<'a> {
    pub actor: &'a str,
    pub email: Option<&'a str>,
    pub action: HistoryAction,
    pub target: &'a str,
    pub asset_group_tag_id: i64,
    pub environment_id: Option<&'a str>,
    pub note: Option<&'a str>,
}

pub async fn create_history(pool: &SqlitePool, record: &HistoryRecord<'_>) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO asset_group_history
            (created_at, actor, email, action, target, asset_group_tag_id, environment_id, note)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
    )
    .bind(Utc::now())
    .bind(record.actor)
    .bind(record.email)
    .bind(record.action.as_str())
    .bind(record.target)
    .bind(record.asset_group_tag_id)
    .bind(record.environment_id)
    .bind(record.note)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_history(
    pool: &SqlitePool,
    filters: &QueryParameterFilterMap,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<AssetGroupHistory>, i64)> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM asset_group_history WHERE 1=1");
    filters.push_sql(&mut count_qb);
    let count: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, created_at, actor, email, action, target, asset_group_tag_id, environment_id, note \
         FROM asset_group_history WHERE 1=1",
    );
    filters.push_sql(&mut qb);
    order.push_sql(&mut qb, "created_at DESC, id DESC");
    qb.push(" LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(skip);
    let rows = qb.build().fetch_all(pool).await?;
    let records = rows.iter().map(history_from_row).collect::<sqlx::Result<Vec<_>>>()?;
    Ok((records, count))
}
