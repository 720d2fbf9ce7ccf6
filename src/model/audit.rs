use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::filter::{ColumnKind, FilterSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLogStatus {
    Intent,
    Success,
    Failure,
}

impl AuditLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLogStatus::Intent => "intent",
            AuditLogStatus::Success => "success",
            AuditLogStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLogAction {
    ImportSavedQueries,
    ExportSavedQuery,
    ExportSavedQueries,
    CreateAssetGroupTagSelector,
    UpdateAssetGroupTagSelector,
    DeleteAssetGroupTagSelector,
    UpdateAssetGroupTag,
    MutateGraph,
    UpdateEnvironmentAccess,
}

impl AuditLogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLogAction::ImportSavedQueries => "ImportSavedQueries",
            AuditLogAction::ExportSavedQuery => "ExportSavedQuery",
            AuditLogAction::ExportSavedQueries => "ExportSavedQueries",
            AuditLogAction::CreateAssetGroupTagSelector => "CreateAssetGroupTagSelector",
            AuditLogAction::UpdateAssetGroupTagSelector => "UpdateAssetGroupTagSelector",
            AuditLogAction::DeleteAssetGroupTagSelector => "DeleteAssetGroupTagSelector",
            AuditLogAction::UpdateAssetGroupTag => "UpdateAssetGroupTag",
            AuditLogAction::MutateGraph => "MutateGraph",
            AuditLogAction::UpdateEnvironmentAccess => "UpdateEnvironmentAccess",
        }
    }
}

/// One audited operation. The intent row and its outcome row share `commit_id`.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub commit_id: Uuid,
    pub action: AuditLogAction,
    pub status: AuditLogStatus,
    pub fields: Map<String, Value>,
    pub error_msg: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditLogAction, fields: Map<String, Value>) -> Self {
        Self { commit_id: Uuid::new_v4(), action, status: AuditLogStatus::Intent, fields, error_msg: None }
    }

    pub fn succeeded(&mut self) {
        self.status = AuditLogStatus::Success;
        self.error_msg = None;
    }

    pub fn failed(&mut self, msg: impl Into<String>) {
        self.status = AuditLogStatus::Failure;
        self.error_msg = Some(msg.into());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_email: String,
    pub action: String,
    pub fields: Value,
    pub request_id: String,
    pub status: String,
    pub commit_id: String,
    pub error_msg: Option<String>,
}

pub const AUDIT_LOG_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("id", ColumnKind::Numeric),
        ("actor_id", ColumnKind::String),
        ("actor_name", ColumnKind::String),
        ("actor_email", ColumnKind::String),
        ("action", ColumnKind::String),
        ("request_id", ColumnKind::String),
        ("status", ColumnKind::String),
        ("commit_id", ColumnKind::String),
        ("created_at", ColumnKind::Time),
    ],
    sortable: &["id", "created_at", "action", "actor_name", "actor_email", "status"],
};
