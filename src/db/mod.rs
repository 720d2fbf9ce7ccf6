use chrono::Utc;
use sqlx::SqlitePool;

use crate::model::assetgrouptags::{AssetGroupTagType, SelectorAutoCertifyMethod, SelectorSeedType, TIER_ZERO_POSITION};

pub mod analysis;
pub mod assetgrouptags;
pub mod audit;
pub mod dataquality;
pub mod ingest;
pub mod savedqueries;
pub mod users;

/// Actor recorded on rows created by the service itself.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            principal_name TEXT NOT NULL,
            role TEXT NOT NULL,
            all_environments INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )"#,
    ),
    (
        "user_environments",
        r#"CREATE TABLE IF NOT EXISTS user_environments (
            user_id TEXT NOT NULL,
            environment_id TEXT NOT NULL,
            PRIMARY KEY (user_id, environment_id),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "asset_group_tags",
        r#"CREATE TABLE IF NOT EXISTS asset_group_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type INTEGER NOT NULL,
            kind_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            deleted_at TEXT NULL,
            deleted_by TEXT NULL,
            position INTEGER NULL,
            require_certify INTEGER NULL,
            analysis_enabled INTEGER NULL
        )"#,
    ),
    (
        "asset_group_tag_selectors",
        r#"CREATE TABLE IF NOT EXISTS asset_group_tag_selectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            asset_group_tag_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            disabled_at TEXT NULL,
            disabled_by TEXT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            auto_certify INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            allow_disable INTEGER NOT NULL DEFAULT 1,
            UNIQUE (asset_group_tag_id, name),
            FOREIGN KEY(asset_group_tag_id) REFERENCES asset_group_tags(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "asset_group_tag_selector_seeds",
        r#"CREATE TABLE IF NOT EXISTS asset_group_tag_selector_seeds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            selector_id INTEGER NOT NULL,
            type INTEGER NOT NULL,
            value TEXT NOT NULL,
            FOREIGN KEY(selector_id) REFERENCES asset_group_tag_selectors(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "asset_group_history",
        r#"CREATE TABLE IF NOT EXISTS asset_group_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            actor TEXT NOT NULL,
            email TEXT NULL,
            action TEXT NOT NULL,
            target TEXT NOT NULL,
            asset_group_tag_id INTEGER NOT NULL,
            environment_id TEXT NULL,
            note TEXT NULL
        )"#,
    ),
    (
        "ingest_jobs",
        r#"CREATE TABLE IF NOT EXISTS ingest_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            user_email_address TEXT NULL,
            status INTEGER NOT NULL,
            status_message TEXT NOT NULL DEFAULT '',
            start_time TEXT NOT NULL,
            end_time TEXT NULL,
            last_ingest TEXT NOT NULL,
            total_files INTEGER NOT NULL DEFAULT 0,
            failed_files INTEGER NOT NULL DEFAULT 0
        )"#,
    ),
    (
        "ingest_tasks",
        r#"CREATE TABLE IF NOT EXISTS ingest_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            original_file_name TEXT NOT NULL,
            request_guid TEXT NOT NULL,
            job_id INTEGER NOT NULL,
            file_type INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT NULL,
            errors TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY(job_id) REFERENCES ingest_jobs(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "saved_queries",
        r#"CREATE TABLE IF NOT EXISTS saved_queries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            query TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, name)
        )"#,
    ),
    (
        "saved_query_permissions",
        r#"CREATE TABLE IF NOT EXISTS saved_query_permissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query_id INTEGER NOT NULL,
            shared_to_user_id TEXT NULL,
            public INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(query_id) REFERENCES saved_queries(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "ad_data_quality_stats",
        r#"CREATE TABLE IF NOT EXISTS ad_data_quality_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain_sid TEXT NOT NULL,
            run_id TEXT NOT NULL,
            users INTEGER NOT NULL DEFAULT 0,
            groups INTEGER NOT NULL DEFAULT 0,
            computers INTEGER NOT NULL DEFAULT 0,
            ous INTEGER NOT NULL DEFAULT 0,
            containers INTEGER NOT NULL DEFAULT 0,
            gpos INTEGER NOT NULL DEFAULT 0,
            aiacas INTEGER NOT NULL DEFAULT 0,
            rootcas INTEGER NOT NULL DEFAULT 0,
            enterprisecas INTEGER NOT NULL DEFAULT 0,
            ntauthstores INTEGER NOT NULL DEFAULT 0,
            certtemplates INTEGER NOT NULL DEFAULT 0,
            issuancepolicies INTEGER NOT NULL DEFAULT 0,
            acls INTEGER NOT NULL DEFAULT 0,
            sessions INTEGER NOT NULL DEFAULT 0,
            relationships INTEGER NOT NULL DEFAULT 0,
            session_completeness REAL NOT NULL DEFAULT 0,
            local_group_completeness REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "ad_data_quality_aggregations",
        r#"CREATE TABLE IF NOT EXISTS ad_data_quality_aggregations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            domains INTEGER NOT NULL DEFAULT 0,
            users INTEGER NOT NULL DEFAULT 0,
            groups INTEGER NOT NULL DEFAULT 0,
            computers INTEGER NOT NULL DEFAULT 0,
            ous INTEGER NOT NULL DEFAULT 0,
            containers INTEGER NOT NULL DEFAULT 0,
            gpos INTEGER NOT NULL DEFAULT 0,
            aiacas INTEGER NOT NULL DEFAULT 0,
            rootcas INTEGER NOT NULL DEFAULT 0,
            enterprisecas INTEGER NOT NULL DEFAULT 0,
            ntauthstores INTEGER NOT NULL DEFAULT 0,
            certtemplates INTEGER NOT NULL DEFAULT 0,
            issuancepolicies INTEGER NOT NULL DEFAULT 0,
            acls INTEGER NOT NULL DEFAULT 0,
            sessions INTEGER NOT NULL DEFAULT 0,
            relationships INTEGER NOT NULL DEFAULT 0,
            session_completeness REAL NOT NULL DEFAULT 0,
            local_group_completeness REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "azure_data_quality_stats",
        r#"CREATE TABLE IF NOT EXISTS azure_data_quality_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            relationships INTEGER NOT NULL DEFAULT 0,
            users INTEGER NOT NULL DEFAULT 0,
            groups INTEGER NOT NULL DEFAULT 0,
            apps INTEGER NOT NULL DEFAULT 0,
            service_principals INTEGER NOT NULL DEFAULT 0,
            devices INTEGER NOT NULL DEFAULT 0,
            management_groups INTEGER NOT NULL DEFAULT 0,
            subscriptions INTEGER NOT NULL DEFAULT 0,
            resource_groups INTEGER NOT NULL DEFAULT 0,
            vms INTEGER NOT NULL DEFAULT 0,
            key_vaults INTEGER NOT NULL DEFAULT 0,
            automation_accounts INTEGER NOT NULL DEFAULT 0,
            container_registries INTEGER NOT NULL DEFAULT 0,
            function_apps INTEGER NOT NULL DEFAULT 0,
            logic_apps INTEGER NOT NULL DEFAULT 0,
            managed_clusters INTEGER NOT NULL DEFAULT 0,
            vm_scale_sets INTEGER NOT NULL DEFAULT 0,
            web_apps INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "azure_data_quality_aggregations",
        r#"CREATE TABLE IF NOT EXISTS azure_data_quality_aggregations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            tenants INTEGER NOT NULL DEFAULT 0,
            relationships INTEGER NOT NULL DEFAULT 0,
            users INTEGER NOT NULL DEFAULT 0,
            groups INTEGER NOT NULL DEFAULT 0,
            apps INTEGER NOT NULL DEFAULT 0,
            service_principals INTEGER NOT NULL DEFAULT 0,
            devices INTEGER NOT NULL DEFAULT 0,
            management_groups INTEGER NOT NULL DEFAULT 0,
            subscriptions INTEGER NOT NULL DEFAULT 0,
            resource_groups INTEGER NOT NULL DEFAULT 0,
            vms INTEGER NOT NULL DEFAULT 0,
            key_vaults INTEGER NOT NULL DEFAULT 0,
            automation_accounts INTEGER NOT NULL DEFAULT 0,
            container_registries INTEGER NOT NULL DEFAULT 0,
            function_apps INTEGER NOT NULL DEFAULT 0,
            logic_apps INTEGER NOT NULL DEFAULT 0,
            managed_clusters INTEGER NOT NULL DEFAULT 0,
            vm_scale_sets INTEGER NOT NULL DEFAULT 0,
            web_apps INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "audit_logs",
        r#"CREATE TABLE IF NOT EXISTS audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            actor_name TEXT NOT NULL,
            actor_email TEXT NOT NULL,
            action TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            request_id TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            commit_id TEXT NOT NULL,
            error_msg TEXT NULL
        )"#,
    ),
    (
        "analysis_requests",
        r#"CREATE TABLE IF NOT EXISTS analysis_requests (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            requested_by TEXT NOT NULL,
            request_type TEXT NOT NULL,
            requested_at TEXT NOT NULL
        )"#,
    ),
    (
        "parameters",
        r#"CREATE TABLE IF NOT EXISTS parameters (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    ),
    (
        "graph_nodes",
        r#"CREATE TABLE IF NOT EXISTS graph_nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_id TEXT NOT NULL UNIQUE COLLATE NOCASE,
            name TEXT NOT NULL DEFAULT '',
            primary_kind TEXT NOT NULL DEFAULT 'Unknown',
            kinds TEXT NOT NULL DEFAULT '[]',
            properties TEXT NOT NULL DEFAULT '{}',
            last_seen TEXT NULL
        )"#,
    ),
    (
        "graph_node_kinds",
        r#"CREATE TABLE IF NOT EXISTS graph_node_kinds (
            node_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (node_id, kind),
            FOREIGN KEY(node_id) REFERENCES graph_nodes(id) ON DELETE CASCADE
        )"#,
    ),
    (
        "graph_edges",
        r#"CREATE TABLE IF NOT EXISTS graph_edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_id INTEGER NOT NULL,
            end_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            properties TEXT NOT NULL DEFAULT '{}',
            UNIQUE (start_id, end_id, kind),
            FOREIGN KEY(start_id) REFERENCES graph_nodes(id) ON DELETE CASCADE,
            FOREIGN KEY(end_id) REFERENCES graph_nodes(id) ON DELETE CASCADE
        )"#,
    ),
];

const INDEXES: &[(&str, &str)] = &[
    (
        "idx_asset_group_tags_name",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_asset_group_tags_name ON asset_group_tags(name) WHERE deleted_at IS NULL",
    ),
    ("idx_selectors_tag", "CREATE INDEX IF NOT EXISTS idx_selectors_tag ON asset_group_tag_selectors(asset_group_tag_id)"),
    ("idx_seeds_selector", "CREATE INDEX IF NOT EXISTS idx_seeds_selector ON asset_group_tag_selector_seeds(selector_id)"),
    ("idx_history_created", "CREATE INDEX IF NOT EXISTS idx_history_created ON asset_group_history(created_at DESC)"),
    ("idx_ingest_jobs_status", "CREATE INDEX IF NOT EXISTS idx_ingest_jobs_status ON ingest_jobs(status, last_ingest)"),
    ("idx_ingest_tasks_job", "CREATE INDEX IF NOT EXISTS idx_ingest_tasks_job ON ingest_tasks(job_id, completed_at)"),
    ("idx_saved_queries_user", "CREATE INDEX IF NOT EXISTS idx_saved_queries_user ON saved_queries(user_id)"),
    (
        "idx_saved_query_permissions_query",
        "CREATE INDEX IF NOT EXISTS idx_saved_query_permissions_query ON saved_query_permissions(query_id, shared_to_user_id)",
    ),
    (
        "idx_ad_stats_domain",
        "CREATE INDEX IF NOT EXISTS idx_ad_stats_domain ON ad_data_quality_stats(domain_sid, created_at DESC)",
    ),
    (
        "idx_azure_stats_tenant",
        "CREATE INDEX IF NOT EXISTS idx_azure_stats_tenant ON azure_data_quality_stats(tenant_id, created_at DESC)",
    ),
    ("idx_audit_logs_created", "CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at DESC)"),
    ("idx_graph_node_kinds_kind", "CREATE INDEX IF NOT EXISTS idx_graph_node_kinds_kind ON graph_node_kinds(kind)"),
    ("idx_graph_edges_start", "CREATE INDEX IF NOT EXISTS idx_graph_edges_start ON graph_edges(start_id, kind)"),
    ("idx_graph_edges_end", "CREATE INDEX IF NOT EXISTS idx_graph_edges_end ON graph_edges(end_id, kind)"),
];

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Best-effort pragmas; an in-memory database rejects WAL
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Cascades on selectors, seeds, tasks and graph rows depend on this
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    for (table, ddl) in SCHEMA {
        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            tracing::error!("Failed to create table {}: {}", table, e);
            return Err(anyhow::anyhow!("Schema creation failed for {}: {}", table, e));
        }
    }

    for (name, query) in INDEXES {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    seed_default_tags(pool).await?;

    Ok(())
}

/// Tier Zero and Owned exist from the first start on, each with a default selector that
/// cannot be disabled or deleted.
async fn seed_default_tags(pool: &SqlitePool) -> anyhow::Result<()> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM asset_group_tags").fetch_one(pool).await?;
    if existing > 0 {
        return Ok(());
    }

    let defaults = [
        (
            AssetGroupTagType::Tier,
            1_i64,
            "Tier Zero",
            "Tier Zero",
            Some(TIER_ZERO_POSITION),
            "Default Tier Zero Objects",
            "MATCH (n:Group) WHERE n.objectid ENDS WITH '-512' OR n.objectid ENDS WITH '-519' RETURN n",
        ),
        (
            AssetGroupTagType::Owned,
            2_i64,
            "Owned",
            "Owned",
            None,
            "Default Owned Objects",
            "MATCH (n:Tag_Owned) RETURN n",
        ),
    ];

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for (tag_type, kind_id, name, description, position, selector_name, seed) in defaults {
        let is_tier = tag_type == AssetGroupTagType::Tier;
        let tag_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO asset_group_tags
                (type, kind_id, name, description, created_at, created_by, updated_at, updated_by,
                 position, require_certify, analysis_enabled)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5, ?6, ?7, ?8, ?9) RETURNING id"#,
        )
        .bind(tag_type.as_i64())
        .bind(kind_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(SYSTEM_ACTOR)
        .bind(position)
        .bind(is_tier.then_some(false))
        .bind(is_tier.then_some(true))
        .fetch_one(&mut *tx)
        .await?;

        let selector_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO asset_group_tag_selectors
                (asset_group_tag_id, created_at, created_by, updated_at, updated_by, name, description,
                 auto_certify, is_default, allow_disable)
               VALUES (?1, ?2, ?3, ?2, ?3, ?4, ?4, ?5, 1, 0) RETURNING id"#,
        )
        .bind(tag_id)
        .bind(now)
        .bind(SYSTEM_ACTOR)
        .bind(selector_name)
        .bind(SelectorAutoCertifyMethod::Disabled.as_i64())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO asset_group_tag_selector_seeds (selector_id, type, value) VALUES (?1, ?2, ?3)")
            .bind(selector_id)
            .bind(SelectorSeedType::Cypher.as_i64())
            .bind(seed)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!("Seeded default asset group tags");
    Ok(())
}
