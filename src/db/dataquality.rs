use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::model::dataquality::{
    AdDataQualityAggregation, AdDataQualityStat, AzureDataQualityAggregation, AzureDataQualityStat,
    DatabaseCompleteness,
};
use crate::model::params::OrderBy;

/// Rows of `table` created inside `[start, end]`, optionally for one environment.
struct StatsQuery<'a> {
    table: &'static str,
    environment: Option<(&'static str, &'a str)>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    order: &'a OrderBy,
    skip: i64,
    limit: i64,
}

impl StatsQuery<'_> {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE created_at BETWEEN ").push_bind(self.start).push(" AND ").push_bind(self.end);
        if let Some((column, value)) = self.environment {
            qb.push(" AND ").push(column).push(" = ").push_bind(value.to_string());
        }
    }

    async fn fetch<T>(&self, pool: &SqlitePool) -> sqlx::Result<(Vec<T>, i64)>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let mut count_qb = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {}", self.table));
        self.push_where(&mut count_qb);
        let count: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT * FROM {}", self.table));
        self.push_where(&mut qb);
        self.order.push_sql(&mut qb, "created_at DESC");
        qb.push(" LIMIT ").push_bind(self.limit).push(" OFFSET ").push_bind(self.skip);
        let rows = qb.build_query_as::<T>().fetch_all(pool).await?;
        Ok((rows, count))
    }
}

pub async fn ad_domain_stats(
    pool: &SqlitePool,
    domain_sid: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<AdDataQualityStat>, i64)> {
    StatsQuery {
        table: "ad_data_quality_stats",
        environment: Some(("domain_sid", domain_sid)),
        start,
        end,
        order,
        skip,
        limit,
    }
    .fetch(pool)
    .await
}

pub async fn azure_tenant_stats(
    pool: &SqlitePool,
    tenant_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<AzureDataQualityStat>, i64)> {
    StatsQuery {
        table: "azure_data_quality_stats",
        environment: Some(("tenant_id", tenant_id)),
        start,
        end,
        order,
        skip,
        limit,
    }
    .fetch(pool)
    .await
}

pub async fn ad_platform_aggregations(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<AdDataQualityAggregation>, i64)> {
    StatsQuery { table: "ad_data_quality_aggregations", environment: None, start, end, order, skip, limit }
        .fetch(pool)
        .await
}

pub async fn azure_platform_aggregations(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    order: &OrderBy,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<AzureDataQualityAggregation>, i64)> {
    StatsQuery { table: "azure_data_quality_aggregations", environment: None, start, end, order, skip, limit }
        .fetch(pool)
        .await
}

/// Per-domain AD counts computed from the graph tables.
const AD_SNAPSHOT: &str = r#"
    INSERT INTO ad_data_quality_stats
        (domain_sid, run_id, users, groups, computers, ous, containers, gpos, aiacas, rootcas, enterprisecas,
         ntauthstores, certtemplates, issuancepolicies, acls, sessions, relationships,
         session_completeness, local_group_completeness, created_at, updated_at)
    SELECT d.domain_sid, ?1,
        SUM(n.primary_kind = 'User'), SUM(n.primary_kind = 'Group'), SUM(n.primary_kind = 'Computer'),
        SUM(n.primary_kind = 'OU'), SUM(n.primary_kind = 'Container'), SUM(n.primary_kind = 'GPO'),
        SUM(n.primary_kind = 'AIACA'), SUM(n.primary_kind = 'RootCA'), SUM(n.primary_kind = 'EnterpriseCA'),
        SUM(n.primary_kind = 'NTAuthStore'), SUM(n.primary_kind = 'CertTemplate'),
        SUM(n.primary_kind = 'IssuancePolicy'),
        (SELECT COUNT(*) FROM graph_edges e JOIN graph_nodes s ON s.id = e.start_id
            WHERE json_extract(s.properties, '$.domainsid') = d.domain_sid
              AND e.kind NOT IN ('HasSession', 'MemberOf', 'Contains', 'GPLink', 'TrustedBy')),
        (SELECT COUNT(*) FROM graph_edges e JOIN graph_nodes s ON s.id = e.start_id
            WHERE json_extract(s.properties, '$.domainsid') = d.domain_sid AND e.kind = 'HasSession'),
        (SELECT COUNT(*) FROM graph_edges e JOIN graph_nodes s ON s.id = e.start_id
            WHERE json_extract(s.properties, '$.domainsid') = d.domain_sid),
        ?2, ?3, ?4, ?4
    FROM (SELECT id, json_extract(properties, '$.domainsid') AS domain_sid FROM graph_nodes) d
    JOIN graph_nodes n ON n.id = d.id
    WHERE d.domain_sid IS NOT NULL AND NOT EXISTS (
        SELECT 1 FROM graph_node_kinds k WHERE k.node_id = n.id AND k.kind = 'AZBase')
    GROUP BY d.domain_sid
"#;

const AD_AGGREGATE: &str = r#"
    INSERT INTO ad_data_quality_aggregations
        (run_id, domains, users, groups, computers, ous, containers, gpos, aiacas, rootcas, enterprisecas,
         ntauthstores, certtemplates, issuancepolicies, acls, sessions, relationships,
         session_completeness, local_group_completeness, created_at, updated_at)
    SELECT ?1, COUNT(*), TOTAL(users), TOTAL(groups), TOTAL(computers), TOTAL(ous), TOTAL(containers),
        TOTAL(gpos), TOTAL(aiacas), TOTAL(rootcas), TOTAL(enterprisecas), TOTAL(ntauthstores),
        TOTAL(certtemplates), TOTAL(issuancepolicies), TOTAL(acls), TOTAL(sessions), TOTAL(relationships),
        ?2, ?3, ?4, ?4
    FROM ad_data_quality_stats WHERE run_id = ?1
"#;

const AZURE_SNAPSHOT: &str = r#"
    INSERT INTO azure_data_quality_stats
        (tenant_id, run_id, relationships, users, groups, apps, service_principals, devices, management_groups,
         subscriptions, resource_groups, vms, key_vaults, automation_accounts, container_registries,
         function_apps, logic_apps, managed_clusters, vm_scale_sets, web_apps, created_at, updated_at)
    SELECT t.tenant_id, ?1,
        (SELECT COUNT(*) FROM graph_edges e JOIN graph_nodes s ON s.id = e.start_id
            WHERE json_extract(s.properties, '$.tenantid') = t.tenant_id),
        SUM(n.primary_kind = 'AZUser'), SUM(n.primary_kind = 'AZGroup'), SUM(n.primary_kind = 'AZApp'),
        SUM(n.primary_kind = 'AZServicePrincipal'), SUM(n.primary_kind = 'AZDevice'),
        SUM(n.primary_kind = 'AZManagementGroup'), SUM(n.primary_kind = 'AZSubscription'),
        SUM(n.primary_kind = 'AZResourceGroup'), SUM(n.primary_kind = 'AZVM'), SUM(n.primary_kind = 'AZKeyVault'),
        SUM(n.primary_kind = 'AZAutomationAccount'), SUM(n.primary_kind = 'AZContainerRegistry'),
        SUM(n.primary_kind = 'AZFunctionApp'), SUM(n.primary_kind = 'AZLogicApp'),
        SUM(n.primary_kind = 'AZManagedCluster'), SUM(n.primary_kind = 'AZVMScaleSet'),
        SUM(n.primary_kind = 'AZWebApp'),
        ?2, ?2
    FROM (SELECT id, json_extract(properties, '$.tenantid') AS tenant_id FROM graph_nodes) t
    JOIN graph_nodes n ON n.id = t.id
    WHERE t.tenant_id IS NOT NULL
    GROUP BY t.tenant_id
"#;

const AZURE_AGGREGATE: &str = r#"
    INSERT INTO azure_data_quality_aggregations
        (run_id, tenants, relationships, users, groups, apps, service_principals, devices, management_groups,
         subscriptions, resource_groups, vms, key_vaults, automation_accounts, container_registries,
         function_apps, logic_apps, managed_clusters, vm_scale_sets, web_apps, created_at, updated_at)
    SELECT ?1, COUNT(*), TOTAL(relationships), TOTAL(users), TOTAL(groups), TOTAL(apps),
        TOTAL(service_principals), TOTAL(devices), TOTAL(management_groups), TOTAL(subscriptions),
        TOTAL(resource_groups), TOTAL(vms), TOTAL(key_vaults), TOTAL(automation_accounts),
        TOTAL(container_registries), TOTAL(function_apps), TOTAL(logic_apps), TOTAL(managed_clusters),
        TOTAL(vm_scale_sets), TOTAL(web_apps), ?2, ?2
    FROM azure_data_quality_stats WHERE run_id = ?1
"#;

/// Records one stats run per AD domain and Azure tenant in the graph, plus the platform
/// aggregations. Returns the run id.
pub async fn record_snapshot(pool: &SqlitePool, completeness: DatabaseCompleteness) -> sqlx::Result<String> {
    let run_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query(AD_SNAPSHOT)
        .bind(&run_id)
        .bind(completeness.session_completeness)
        .bind(completeness.local_group_completeness)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    let domains: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ad_data_quality_stats WHERE run_id = ?1")
        .bind(&run_id)
        .fetch_one(&mut *tx)
        .await?;
    if domains > 0 {
        sqlx::query(AD_AGGREGATE)
            .bind(&run_id)
            .bind(completeness.session_completeness)
            .bind(completeness.local_group_completeness)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(AZURE_SNAPSHOT).bind(&run_id).bind(now).execute(&mut *tx).await?;
    let tenants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM azure_data_quality_stats WHERE run_id = ?1")
        .bind(&run_id)
        .fetch_one(&mut *tx)
        .await?;
    if tenants > 0 {
        sqlx::query(AZURE_AGGREGATE).bind(&run_id).bind(now).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(run_id)
}
