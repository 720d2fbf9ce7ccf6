use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::filter::{ColumnKind, FilterSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedQueryScope {
    All,
    Public,
    Shared,
    Owned,
}

impl SavedQueryScope {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "public" => Some(Self::Public),
            "shared" => Some(Self::Shared),
            "owned" => Some(Self::Owned),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Public => "public",
            Self::Shared => "shared",
            Self::Owned => "owned",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedQuery {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub query: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopedSavedQuery {
    #[serde(flatten)]
    pub query: SavedQuery,
    pub scope: String,
}

/// Shape of a saved query inside export files and import payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableSavedQuery {
    pub query: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A saved query not yet persisted.
#[derive(Debug, Clone)]
pub struct NewSavedQuery {
    pub user_id: String,
    pub name: String,
    pub query: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedQueryPermissions {
    pub query_id: i64,
    pub public: bool,
    pub shared_to_user_ids: Vec<String>,
}

pub const SAVED_QUERY_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("user_id", ColumnKind::String),
        ("name", ColumnKind::String),
        ("query", ColumnKind::String),
        ("description", ColumnKind::String),
        ("id", ColumnKind::Numeric),
        ("created_at", ColumnKind::Time),
        ("updated_at", ColumnKind::Time),
    ],
    sortable: &["id", "user_id", "name", "query", "description", "created_at", "updated_at"],
};
