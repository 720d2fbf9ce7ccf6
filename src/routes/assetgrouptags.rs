use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::analysis::{object_id_seeds, request_analysis_if_unscheduled};
use crate::db;
use crate::db::assetgrouptags::{HistoryRecord, SelectorInput};
use crate::error::{is_unique_violation, AppError, AppResult, OptionExt, RESOURCE_NOT_FOUND};
use crate::middleware::validation::parse_id;
use crate::middleware::CurrentUser;
use crate::model::assetgrouptags::{
    has_valid_tag_name, AssetGroupMember, AssetGroupTag, AssetGroupTagCounts, AssetGroupTagSelector,
    AssetGroupTagSelectorView, AssetGroupTagType, AssetGroupTagView, HistoryAction, SelectorAutoCertifyMethod,
    SelectorCounts, SelectorSeed, SelectorSeedType, HISTORY_FILTERS, MEMBER_SORTABLE, SELECTOR_FILTERS,
    TAG_FILTERS,
};
use crate::model::audit::AuditLogAction;
use crate::model::filter::parse_validated_filters;
use crate::model::params::{parse_bool, parse_limit, parse_skip, parse_sort, QueryParams};
use crate::model::response;
use crate::model::user::User;
use crate::routes::audit::{audited, fields};
use crate::routes::{require_graph_write, JsonBody};
use crate::state::AppState;

const INCLUDE_COUNTS: &str = "include_counts";

pub const NAME_EMPTY: &str = "name can not be empty";
pub const RENAME_DEFAULT_TAG: &str = "renaming default tags is forbidden currently";
pub const INVALID_TAG_NAME: &str = "name must only contain letters, numbers, spaces and underscores";
pub const NO_VALID_FIELDS: &str = "no valid fields specified";
pub const TIER_ZERO_IMMUTABLE: &str = "the position and analysis of tier zero cannot be modified";
pub const TAG_NAME_CONFLICT: &str = "tag name must be unique";
pub const SEEDS_REQUIRED: &str = "seeds are required";
pub const SEEDS_MIXED: &str = "all seeds must be of the same type";
pub const INVALID_SEED_TYPE: &str = "invalid seed type";
pub const AUTO_CERTIFY_ZONES_ONLY: &str = "auto_certify is only supported for zones";
pub const INVALID_AUTO_CERTIFY: &str = "invalid auto_certify value";
pub const SELECTOR_NAME_CONFLICT: &str = "selector name must be unique";
pub const SELECTOR_CANNOT_DISABLE: &str = "this selector cannot be disabled";
pub const DEFAULT_SELECTOR_FIELDS: &str = "default selectors only support modifying auto_certify and disabled";
pub const DEFAULT_SELECTOR_DELETE: &str = "cannot delete a default selector";

async fn load_tag(state: &AppState, raw_id: &str) -> AppResult<AssetGroupTag> {
    let id = parse_id(raw_id, AppError::NotFound)?;
    db::assetgrouptags::get_tag(&state.db, id).await?.ok_or_not_found(RESOURCE_NOT_FOUND)
}

/// Loads a selector and requires it to belong to `tag`.
async fn load_selector(state: &AppState, tag: &AssetGroupTag, raw_id: &str) -> AppResult<AssetGroupTagSelector> {
    let id = parse_id(raw_id, AppError::NotFound)?;
    db::assetgrouptags::get_selector(&state.db, id)
        .await?
        .filter(|s| s.asset_group_tag_id == tag.id)
        .ok_or_not_found(RESOURCE_NOT_FOUND)
}

async fn write_history(state: &AppState, user: &User, action: HistoryAction, target: &str, tag_id: i64) -> AppResult<()> {
    let record = HistoryRecord {
        actor: &user.id,
        email: Some(&user.email),
        action,
        target,
        asset_group_tag_id: tag_id,
        environment_id: None,
        note: None,
    };
    db::assetgrouptags::create_history(&state.db, &record).await?;
    Ok(())
}

pub async fn list_tags(State(state): State<AppState>, params: QueryParams) -> AppResult<Response> {
    let order = parse_sort(&params, &TAG_FILTERS)?;
    let filters = parse_validated_filters(&params, &[INCLUDE_COUNTS], &TAG_FILTERS)?;
    let include_counts = parse_bool(&params, INCLUDE_COUNTS, false)?;

    let tags = db::assetgrouptags::list_tags(&state.db, &filters, &order).await?;
    let mut views = Vec::with_capacity(tags.len());
    for tag in tags {
        let counts = if include_counts {
            Some(AssetGroupTagCounts {
                selectors: db::assetgrouptags::count_selectors(&state.db, tag.id).await?,
                members: state.graph.count_nodes_by_kind(&tag.kind_name()).await?,
            })
        } else {
            None
        };
        views.push(AssetGroupTagView { tag, counts });
    }
    Ok(response::ok(json!({ "tags": views })))
}

pub async fn get_tag(State(state): State<AppState>, Path(tag_id): Path<String>) -> AppResult<Response> {
    let tag = load_tag(&state, &tag_id).await?;
    Ok(response::ok(json!({ "tag": tag })))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTagRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub position: Option<i64>,
    pub require_certify: Option<bool>,
    pub analysis_enabled: Option<bool>,
}

/// Applies `req` to `tag`, enforcing the per-type rules. Returns whether analysis-relevant
/// fields changed.
async fn apply_tag_update(state: &AppState, tag: &mut AssetGroupTag, req: UpdateTagRequest) -> AppResult<bool> {
    if req.name.is_none()
        && req.description.is_none()
        && req.position.is_none()
        && req.require_certify.is_none()
        && req.analysis_enabled.is_none()
    {
        return Err(AppError::BadRequest(NO_VALID_FIELDS.to_string()));
    }

    let mut needs_analysis = false;

    if let Some(name) = req.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest(NAME_EMPTY.to_string()));
        }
        if name != tag.name {
            if tag.is_tier_zero() || tag.tag_type == AssetGroupTagType::Owned {
                return Err(AppError::BadRequest(RENAME_DEFAULT_TAG.to_string()));
            }
            if !has_valid_tag_name(&name) {
                return Err(AppError::BadRequest(INVALID_TAG_NAME.to_string()));
            }
            tag.name = name;
            needs_analysis = true;
        }
    }

    if let Some(description) = req.description {
        tag.description = description;
    }

    let zone_only = [
        ("require_certify", req.require_certify.is_some()),
        ("position", req.position.is_some()),
        ("analysis_enabled", req.analysis_enabled.is_some()),
    ];
    if tag.tag_type != AssetGroupTagType::Tier {
        if let Some((field, _)) = zone_only.iter().find(|(_, set)| *set) {
            return Err(AppError::BadRequest(format!("only zones support modifying {}", field)));
        }
    }
    if tag.is_tier_zero() && (req.position.is_some() || req.analysis_enabled.is_some()) {
        return Err(AppError::Forbidden(TIER_ZERO_IMMUTABLE.to_string()));
    }

    if let Some(position) = req.position {
        let tiers = db::assetgrouptags::count_tiers(&state.db).await?;
        if position < 2 || position > tiers {
            return Err(AppError::BadRequest(format!("position must be between 2 and {}", tiers)));
        }
        needs_analysis |= tag.position != Some(position);
        tag.position = Some(position);
    }
    if let Some(require_certify) = req.require_certify {
        needs_analysis |= tag.require_certify != Some(require_certify);
        tag.require_certify = Some(require_certify);
    }
    if let Some(analysis_enabled) = req.analysis_enabled {
        needs_analysis |= tag.analysis_enabled != Some(analysis_enabled);
        tag.analysis_enabled = Some(analysis_enabled);
    }

    Ok(needs_analysis)
}

fn tag_unchanged(a: &AssetGroupTag, b: &AssetGroupTag) -> bool {
    a.name == b.name
        && a.description == b.description
        && a.position == b.position
        && a.require_certify == b.require_certify
        && a.analysis_enabled == b.analysis_enabled
}

pub async fn update_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tag_id): Path<String>,
    JsonBody(req): JsonBody<UpdateTagRequest>,
) -> AppResult<Response> {
    require_graph_write(&user)?;
    let original = load_tag(&state, &tag_id).await?;

    let mut tag = original.clone();
    let needs_analysis = apply_tag_update(&state, &mut tag, req).await?;
    if tag_unchanged(&original, &tag) {
        return Ok(response::ok(json!({ "tag": original })));
    }
    tag.updated_at = Utc::now();
    tag.updated_by = user.id.clone();

    let audit_fields = fields(json!({ "id": tag.id, "name": tag.name }));
    let updated = audited(&state, &user, AuditLogAction::UpdateAssetGroupTag, audit_fields, async {
        db::assetgrouptags::update_tag(&state.db, &tag, original.position).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(TAG_NAME_CONFLICT.to_string())
            } else {
                e.into()
            }
        })
    })
    .await?;

    if original.name != updated.name {
        state.graph.remove_kind(&original.kind_name()).await?;
    }
    if needs_analysis {
        request_analysis_if_unscheduled(&state, &user.id).await?;
    }
    write_history(&state, &user, HistoryAction::UpdateTag, &updated.name, updated.id).await?;

    Ok(response::ok(json!({ "tag": updated })))
}

pub async fn member_counts(State(state): State<AppState>, Path(tag_id): Path<String>) -> AppResult<Response> {
    let tag = load_tag(&state, &tag_id).await?;
    let counts = state.graph.count_primary_kinds_with_kind(&tag.kind_name()).await?;
    let total: i64 = counts.values().sum();
    Ok(response::ok(json!({ "total_count": total, "counts": counts })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(tag_id): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    let tag = load_tag(&state, &tag_id).await?;
    let order = parse_sort(&params, &MEMBER_SORTABLE)?;
    let skip = parse_skip(&params, 0)?;
    let limit = parse_limit(&params, 50)?;

    let (nodes, count) = state.graph.list_nodes_by_kind(&tag.kind_name(), &order, skip, limit).await?;
    let members: Vec<AssetGroupMember> = nodes
        .iter()
        .map(|n| AssetGroupMember {
            id: n.id,
            object_id: n.object_id.clone(),
            primary_kind: n.primary_kind().to_string(),
            name: n.name().to_string(),
        })
        .collect();
    Ok(response::paginated(json!({ "members": members }), limit, skip, count))
}

async fn selector_member_count(state: &AppState, selector: &AssetGroupTagSelector) -> AppResult<i64> {
    let seeds = object_id_seeds(std::slice::from_ref(selector));
    Ok(state.graph.nodes_by_object_ids(&seeds).await?.len() as i64)
}

pub async fn list_selectors(
    State(state): State<AppState>,
    Path(tag_id): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    let tag = load_tag(&state, &tag_id).await?;
    let order = parse_sort(&params, &SELECTOR_FILTERS)?;
    let filters = parse_validated_filters(&params, &[INCLUDE_COUNTS], &SELECTOR_FILTERS)?;
    let include_counts = parse_bool(&params, INCLUDE_COUNTS, false)?;

    let selectors = db::assetgrouptags::list_selectors(&state.db, tag.id, &filters, &order).await?;
    let mut views = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let counts = if include_counts {
            Some(SelectorCounts { members: selector_member_count(&state, &selector).await? })
        } else {
            None
        };
        views.push(AssetGroupTagSelectorView { selector, counts });
    }
    Ok(response::ok(json!({ "selectors": views })))
}

/// Seeds must be non-empty, of one known type, and cypher seeds must be read-only.
async fn validate_seeds(state: &AppState, seeds: &[SelectorSeed]) -> AppResult<()> {
    let first = seeds.first().ok_or_else(|| AppError::BadRequest(SEEDS_REQUIRED.to_string()))?;
    if seeds.iter().any(|s| s.seed_type != first.seed_type) {
        return Err(AppError::BadRequest(SEEDS_MIXED.to_string()));
    }
    match SelectorSeedType::from_i64(first.seed_type) {
        Some(SelectorSeedType::ObjectId) => Ok(()),
        Some(SelectorSeedType::Cypher) => {
            for seed in seeds {
                state.graph.validate_cypher(&seed.value).await?;
            }
            Ok(())
        }
        None => Err(AppError::BadRequest(INVALID_SEED_TYPE.to_string())),
    }
}

fn validate_auto_certify(tag: &AssetGroupTag, raw: i64) -> AppResult<SelectorAutoCertifyMethod> {
    let method =
        SelectorAutoCertifyMethod::from_i64(raw).ok_or_else(|| AppError::BadRequest(INVALID_AUTO_CERTIFY.to_string()))?;
    if tag.tag_type != AssetGroupTagType::Tier && method != SelectorAutoCertifyMethod::Disabled {
        return Err(AppError::BadRequest(AUTO_CERTIFY_ZONES_ONLY.to_string()));
    }
    Ok(method)
}

fn selector_conflict(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::Conflict(SELECTOR_NAME_CONFLICT.to_string())
    } else {
        e.into()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSelectorRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub auto_certify: Option<i64>,
    #[serde(default)]
    pub seeds: Vec<SelectorSeed>,
}

pub async fn create_selector(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tag_id): Path<String>,
    JsonBody(req): JsonBody<CreateSelectorRequest>,
) -> AppResult<Response> {
    require_graph_write(&user)?;
    let tag = load_tag(&state, &tag_id).await?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest(NAME_EMPTY.to_string()));
    }
    validate_seeds(&state, &req.seeds).await?;
    let auto_certify = match req.auto_certify {
        Some(raw) => validate_auto_certify(&tag, raw)?,
        None => SelectorAutoCertifyMethod::Disabled,
    };

    let input = SelectorInput { name, description: req.description, auto_certify, seeds: req.seeds };
    let audit_fields = fields(json!({ "asset_group_tag_id": tag.id, "name": input.name }));
    let selector = audited(&state, &user, AuditLogAction::CreateAssetGroupTagSelector, audit_fields, async {
        db::assetgrouptags::create_selector(&state.db, tag.id, &user.id, &input).await.map_err(selector_conflict)
    })
    .await?;

    request_analysis_if_unscheduled(&state, &user.id).await?;
    write_history(&state, &user, HistoryAction::CreateSelector, &selector.name, tag.id).await?;

    Ok(response::basic(StatusCode::CREATED, selector))
}

pub async fn get_selector(
    State(state): State<AppState>,
    Path((tag_id, selector_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let tag = load_tag(&state, &tag_id).await?;
    let mut selector = load_selector(&state, &tag, &selector_id).await?;

    if let Some(email) = db::users::email_for(&state.db, &selector.created_by).await? {
        selector.created_by = email;
    }
    if let Some(email) = db::users::email_for(&state.db, &selector.updated_by).await? {
        selector.updated_by = email;
    }
    Ok(response::ok(json!({ "selector": selector })))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSelectorRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub auto_certify: Option<i64>,
    pub seeds: Option<Vec<SelectorSeed>>,
    pub disabled: Option<bool>,
}

pub async fn update_selector(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((tag_id, selector_id)): Path<(String, String)>,
    JsonBody(req): JsonBody<UpdateSelectorRequest>,
) -> AppResult<Response> {
    require_graph_write(&user)?;
    let tag = load_tag(&state, &tag_id).await?;
    let mut selector = load_selector(&state, &tag, &selector_id).await?;

    if req.disabled == Some(true) && !selector.allow_disable {
        return Err(AppError::Forbidden(SELECTOR_CANNOT_DISABLE.to_string()));
    }
    if selector.is_default && (req.name.is_some() || req.description.is_some() || req.seeds.is_some()) {
        return Err(AppError::Forbidden(DEFAULT_SELECTOR_FIELDS.to_string()));
    }

    if let Some(name) = req.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest(NAME_EMPTY.to_string()));
        }
        selector.name = name;
    }
    if let Some(description) = req.description {
        selector.description = description;
    }
    if let Some(seeds) = req.seeds {
        validate_seeds(&state, &seeds).await?;
        selector.seeds = seeds;
    }
    if let Some(raw) = req.auto_certify {
        selector.auto_certify = validate_auto_certify(&tag, raw)?;
    }
    match req.disabled {
        Some(true) if selector.disabled_at.is_none() => {
            selector.disabled_at = Some(Utc::now());
            selector.disabled_by = Some(user.id.clone());
        }
        Some(false) => {
            selector.disabled_at = None;
            selector.disabled_by = None;
        }
        _ => {}
    }
    selector.updated_at = Utc::now();
    selector.updated_by = user.id.clone();

    let audit_fields = fields(json!({ "asset_group_tag_id": tag.id, "selector_id": selector.id }));
    audited(&state, &user, AuditLogAction::UpdateAssetGroupTagSelector, audit_fields, async {
        db::assetgrouptags::update_selector(&state.db, &selector).await.map_err(selector_conflict)
    })
    .await?;

    request_analysis_if_unscheduled(&state, &user.id).await?;
    write_history(&state, &user, HistoryAction::UpdateSelector, &selector.name, tag.id).await?;

    Ok(response::ok(selector))
}

pub async fn delete_selector(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((tag_id, selector_id)): Path<(String, String)>,
) -> AppResult<Response> {
    require_graph_write(&user)?;
    let tag = load_tag(&state, &tag_id).await?;
    let selector = load_selector(&state, &tag, &selector_id).await?;
    if selector.is_default {
        return Err(AppError::Forbidden(DEFAULT_SELECTOR_DELETE.to_string()));
    }

    let audit_fields = fields(json!({ "asset_group_tag_id": tag.id, "selector_id": selector.id }));
    audited(&state, &user, AuditLogAction::DeleteAssetGroupTagSelector, audit_fields, async {
        db::assetgrouptags::delete_selector(&state.db, selector.id).await.map_err(AppError::from)
    })
    .await?;

    request_analysis_if_unscheduled(&state, &user.id).await?;
    write_history(&state, &user, HistoryAction::DeleteSelector, &selector.name, tag.id).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn list_history(State(state): State<AppState>, params: QueryParams) -> AppResult<Response> {
    let order = parse_sort(&params, &HISTORY_FILTERS)?;
    let filters = parse_validated_filters(&params, &[], &HISTORY_FILTERS)?;
    let skip = parse_skip(&params, 0)?;
    let limit = parse_limit(&params, 100)?;

    let (records, count) = db::assetgrouptags::list_history(&state.db, &filters, &order, skip, limit).await?;
    Ok(response::paginated(json!({ "records": records }), limit, skip, count))
}
