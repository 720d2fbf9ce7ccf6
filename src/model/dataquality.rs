use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::filter::FilterSchema;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AdDataQualityStat {
    pub id: i64,
    pub domain_sid: String,
    pub run_id: String,
    pub users: i64,
    pub groups: i64,
    pub computers: i64,
    pub ous: i64,
    pub containers: i64,
    pub gpos: i64,
    pub aiacas: i64,
    pub rootcas: i64,
    pub enterprisecas: i64,
    pub ntauthstores: i64,
    pub certtemplates: i64,
    pub issuancepolicies: i64,
    pub acls: i64,
    pub sessions: i64,
    pub relationships: i64,
    pub session_completeness: f64,
    pub local_group_completeness: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AdDataQualityAggregation {
    pub id: i64,
    pub run_id: String,
    pub domains: i64,
    pub users: i64,
    pub groups: i64,
    pub computers: i64,
    pub ous: i64,
    pub containers: i64,
    pub gpos: i64,
    pub aiacas: i64,
    pub rootcas: i64,
    pub enterprisecas: i64,
    pub ntauthstores: i64,
    pub certtemplates: i64,
    pub issuancepolicies: i64,
    pub acls: i64,
    pub sessions: i64,
    pub relationships: i64,
    pub session_completeness: f64,
    pub local_group_completeness: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AzureDataQualityStat {
    pub id: i64,
    pub tenant_id: String,
    pub run_id: String,
    pub relationships: i64,
    pub users: i64,
    pub groups: i64,
    pub apps: i64,
    pub service_principals: i64,
    pub devices: i64,
    pub management_groups: i64,
    pub subscriptions: i64,
    pub resource_groups: i64,
    pub vms: i64,
    pub key_vaults: i64,
    pub automation_accounts: i64,
    pub container_registries: i64,
    pub function_apps: i64,
    pub logic_apps: i64,
    pub managed_clusters: i64,
    pub vm_scale_sets: i64,
    pub web_apps: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AzureDataQualityAggregation {
    pub id: i64,
    pub run_id: String,
    pub tenants: i64,
    pub relationships: i64,
    pub users: i64,
    pub groups: i64,
    pub apps: i64,
    pub service_principals: i64,
    pub devices: i64,
    pub management_groups: i64,
    pub subscriptions: i64,
    pub resource_groups: i64,
    pub vms: i64,
    pub key_vaults: i64,
    pub automation_accounts: i64,
    pub container_registries: i64,
    pub function_apps: i64,
    pub logic_apps: i64,
    pub managed_clusters: i64,
    pub vm_scale_sets: i64,
    pub web_apps: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatabaseCompleteness {
    pub local_group_completeness: f64,
    pub session_completeness: f64,
}

/// Stat listings are sorted by the record's own columns and never filtered.
pub const AD_STAT_SORTABLE: FilterSchema = FilterSchema {
    columns: &[],
    sortable: &[
        "id", "domain_sid", "run_id", "users", "groups", "computers", "ous", "containers", "gpos", "aiacas",
        "rootcas", "enterprisecas", "ntauthstores", "certtemplates", "issuancepolicies", "acls", "sessions",
        "relationships", "session_completeness", "local_group_completeness", "created_at", "updated_at",
    ],
};

pub const AD_AGGREGATION_SORTABLE: FilterSchema = FilterSchema {
    columns: &[],
    sortable: &[
        "id", "run_id", "domains", "users", "groups", "computers", "ous", "containers", "gpos", "aiacas",
        "rootcas", "enterprisecas", "ntauthstores", "certtemplates", "issuancepolicies", "acls", "sessions",
        "relationships", "session_completeness", "local_group_completeness", "created_at", "updated_at",
    ],
};

pub const AZURE_STAT_SORTABLE: FilterSchema = FilterSchema {
    columns: &[],
    sortable: &[
        "id", "tenant_id", "run_id", "relationships", "users", "groups", "apps", "service_principals", "devices",
        "management_groups", "subscriptions", "resource_groups", "vms", "key_vaults", "automation_accounts",
        "container_registries", "function_apps", "logic_apps", "managed_clusters", "vm_scale_sets", "web_apps",
        "created_at", "updated_at",
    ],
};

pub const AZURE_AGGREGATION_SORTABLE: FilterSchema = FilterSchema {
    columns: &[],
    sortable: &[
        "id", "run_id", "tenants", "relationships", "users", "groups", "apps", "service_principals", "devices",
        "management_groups", "subscriptions", "resource_groups", "vms", "key_vaults", "automation_accounts",
        "container_registries", "function_apps", "logic_apps", "managed_clusters", "vm_scale_sets", "web_apps",
        "created_at", "updated_at",
    ],
};
