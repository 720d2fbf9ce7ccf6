use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::filter::{ColumnKind, FilterSchema};

lazy_static! {
    static ref TAG_NAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9 _]+$").expect("static regex");
}

pub const TIER_ZERO_POSITION: i64 = 1;

int_enum!(AssetGroupTagType { Tier = 1, Label = 2, Owned = 3 });
int_enum!(SelectorAutoCertifyMethod { Disabled = 0, AllMembers = 1, SeedsOnly = 2 });
int_enum!(SelectorSeedType { ObjectId = 1, Cypher = 2 });

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupTag {
    pub id: i64,
    #[serde(rename = "type")]
    pub tag_type: AssetGroupTagType,
    pub kind_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub position: Option<i64>,
    pub require_certify: Option<bool>,
    pub analysis_enabled: Option<bool>,
}

impl AssetGroupTag {
    /// Graph kind carried by member nodes.
    pub fn kind_name(&self) -> String {
        tag_kind_name(&self.name)
    }

    pub fn is_tier_zero(&self) -> bool {
        self.tag_type == AssetGroupTagType::Tier && self.position == Some(TIER_ZERO_POSITION)
    }
}

pub fn tag_kind_name(name: &str) -> String {
    format!("Tag_{}", name.replace(' ', "_"))
}

pub fn has_valid_tag_name(name: &str) -> bool {
    TAG_NAME_REGEX.is_match(name)
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupTagCounts {
    pub selectors: i64,
    pub members: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupTagView {
    #[serde(flatten)]
    pub tag: AssetGroupTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<AssetGroupTagCounts>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSeed {
    #[serde(rename = "type")]
    pub seed_type: i64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupTagSelector {
    pub id: i64,
    pub asset_group_tag_id: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disabled_by: Option<String>,
    pub name: String,
    pub description: String,
    pub auto_certify: SelectorAutoCertifyMethod,
    pub is_default: bool,
    pub allow_disable: bool,
    pub seeds: Vec<SelectorSeed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorCounts {
    pub members: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupTagSelectorView {
    #[serde(flatten)]
    pub selector: AssetGroupTagSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<SelectorCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    CreateSelector,
    UpdateSelector,
    DeleteSelector,
    UpdateTag,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::CreateSelector => "CreateSelector",
            HistoryAction::UpdateSelector => "UpdateSelector",
            HistoryAction::DeleteSelector => "DeleteSelector",
            HistoryAction::UpdateTag => "UpdateTag",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupHistory {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub actor: String,
    pub email: Option<String>,
    pub action: String,
    pub target: String,
    pub asset_group_tag_id: i64,
    pub environment_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetGroupMember {
    pub id: i64,
    pub object_id: String,
    pub primary_kind: String,
    pub name: String,
}

pub const TAG_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("type", ColumnKind::Numeric),
        ("id", ColumnKind::Numeric),
        ("kind_id", ColumnKind::Numeric),
        ("position", ColumnKind::Numeric),
        ("name", ColumnKind::String),
        ("description", ColumnKind::String),
        ("created_by", ColumnKind::String),
        ("updated_by", ColumnKind::String),
        ("deleted_by", ColumnKind::String),
        ("created_at", ColumnKind::Time),
        ("updated_at", ColumnKind::Time),
        ("deleted_at", ColumnKind::Time),
        ("require_certify", ColumnKind::Bool),
        ("analysis_enabled", ColumnKind::Bool),
    ],
    sortable: &["id", "name", "type", "position", "created_at", "updated_at"],
};

pub const SELECTOR_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("id", ColumnKind::Numeric),
        ("asset_group_tag_id", ColumnKind::Numeric),
        ("auto_certify", ColumnKind::Numeric),
        ("name", ColumnKind::String),
        ("description", ColumnKind::String),
        ("created_by", ColumnKind::String),
        ("updated_by", ColumnKind::String),
        ("disabled_by", ColumnKind::String),
        ("created_at", ColumnKind::Time),
        ("updated_at", ColumnKind::Time),
        ("disabled_at", ColumnKind::Time),
        ("is_default", ColumnKind::Bool),
        ("allow_disable", ColumnKind::Bool),
    ],
    sortable: &["id", "name", "created_at", "updated_at", "disabled_at"],
};

pub const HISTORY_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("actor", ColumnKind::String),
        ("email", ColumnKind::String),
        ("action", ColumnKind::String),
        ("target", ColumnKind::String),
        ("asset_group_tag_id", ColumnKind::Numeric),
        ("created_at", ColumnKind::Time),
    ],
    sortable: &["id", "created_at", "actor", "action"],
};

pub const MEMBER_SORTABLE: FilterSchema =
    FilterSchema { columns: &[], sortable: &["id", "name", "object_id", "primary_kind"] };

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_replaces_spaces() {
        assert_eq!(tag_kind_name("Tier Zero"), "Tag_Tier_Zero");
        assert_eq!(tag_kind_name("Owned"), "Tag_Owned");
    }

    #[test]
    fn tag_names_are_restricted() {
        assert!(has_valid_tag_name("Tier 2 servers"));
        assert!(!has_valid_tag_name("bad-name"));
        assert!(!has_valid_tag_name(""));
    }

    #[test]
    fn int_enums_round_trip_through_json() {
        let json = serde_json::to_string(&AssetGroupTagType::Owned).unwrap();
        assert_eq!(json, "3");
        let parsed: SelectorAutoCertifyMethod = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, SelectorAutoCertifyMethod::SeedsOnly);
        assert!(serde_json::from_str::<SelectorAutoCertifyMethod>("9").is_err());
    }
}
