//! Entity detail lookups for AD and Azure nodes: properties, relationship counts, and
//! one-hop relationship listings as node lists, counts or graphs.

use axum::{
    extract::{Path, State},
    response::Response,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::access_control::{filter_graph_for, filter_nodes_for, require_access};
use crate::error::{AppError, AppResult, RESOURCE_NOT_FOUND};
use crate::graph::kinds::{ad_entity_kind, azure_entity_kind, EntityKind};
use crate::graph::{Node, UnifiedGraph, UnifiedNode};
use crate::middleware::CurrentUser;
use crate::model::audit::AuditLogAction;
use crate::model::params::{bad_query_parameter, parse_bool, parse_limit, parse_skip, QueryParams};
use crate::model::response;
use crate::model::user::User;
use crate::routes::audit::{audited, fields};
use crate::routes::{require_graph_write, JsonBody};
use crate::state::AppState;

const COUNTS: &str = "counts";
const TYPE: &str = "type";
const OBJECT_ID: &str = "object_id";
const RELATED_ENTITY_TYPE: &str = "related_entity_type";
const DOMAINS: &str = "domains";

pub const NO_DOMAIN_FIELDS: &str = "no domain fields sent for patching";

fn ad_kind(path: &str) -> AppResult<&'static EntityKind> {
    ad_entity_kind(path).ok_or_else(|| AppError::NotFound(RESOURCE_NOT_FOUND.to_string()))
}

/// Looks up the node and enforces ETAC on its environment.
async fn load_entity(state: &AppState, user: &User, entity: &EntityKind, object_id: &str) -> AppResult<Node> {
    let node = state.graph.get_entity_by_object_id(object_id, entity.kind).await?;
    let environments: Vec<&str> = node.environment_id().into_iter().collect();
    require_access(state.etac_enabled(), user, &environments)?;
    Ok(node)
}

async fn info_response(
    state: &AppState,
    user: &User,
    entity: &EntityKind,
    object_id: &str,
    params: &QueryParams,
) -> AppResult<Response> {
    let include_counts = parse_bool(params, COUNTS, true)?;
    let node = load_entity(state, user, entity, object_id).await?;

    let mut data = Map::new();
    data.insert("props".to_string(), Value::Object(node.properties.clone()));
    if include_counts {
        data.insert("kinds".to_string(), json!(node.kinds));
        for (name, traversal) in entity.relationships {
            let count = state.graph.related_count(&node, *traversal).await?;
            data.insert(name.to_string(), json!(count));
        }
    } else {
        data.insert("isTierZero".to_string(), json!(node.is_tier_zero()));
    }
    Ok(response::ok(data))
}

async fn related_response(
    state: &AppState,
    user: &User,
    entity: &EntityKind,
    object_id: &str,
    relationship: &str,
    params: &QueryParams,
) -> AppResult<Response> {
    let traversal =
        entity.relationship(relationship).ok_or_else(|| AppError::NotFound(RESOURCE_NOT_FOUND.to_string()))?;
    let node = load_entity(state, user, entity, object_id).await?;
    let etac = state.etac_enabled();

    match params.get(TYPE).unwrap_or("list") {
        "" | "list" => {
            let skip = parse_skip(params, 0)?;
            let limit = parse_limit(params, 10)?;
            let (nodes, count) = state.graph.related_entities(&node, traversal, skip, limit).await?;
            let nodes = filter_nodes_for(etac, user, nodes.iter().map(UnifiedNode::from).collect());
            Ok(response::paginated(nodes, limit, skip, count))
        }
        "count" => {
            let count = state.graph.related_count(&node, traversal).await?;
            Ok(response::ok(count))
        }
        "graph" => {
            let (nodes, edges) = state.graph.related_graph(&node, traversal).await?;
            let graph = filter_graph_for(etac, user, UnifiedGraph::from_parts(&nodes, &edges));
            Ok(response::ok(graph))
        }
        other => Err(bad_query_parameter(TYPE, format!("unsupported value: {}", other))),
    }
}

pub async fn entity_info(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((kind, object_id)): Path<(String, String)>,
    params: QueryParams,
) -> AppResult<Response> {
    info_response(&state, &user, ad_kind(&kind)?, &object_id, &params).await
}

pub async fn entity_related(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((kind, object_id, relationship)): Path<(String, String, String)>,
    params: QueryParams,
) -> AppResult<Response> {
    related_response(&state, &user, ad_kind(&kind)?, &object_id, &relationship, &params).await
}

pub async fn domain_info(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(object_id): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    info_response(&state, &user, ad_kind(DOMAINS)?, &object_id, &params).await
}

pub async fn domain_related(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((object_id, relationship)): Path<(String, String)>,
    params: QueryParams,
) -> AppResult<Response> {
    related_response(&state, &user, ad_kind(DOMAINS)?, &object_id, &relationship, &params).await
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchDomainRequest {
    pub collected: Option<bool>,
}

pub async fn patch_domain(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(object_id): Path<String>,
    JsonBody(req): JsonBody<PatchDomainRequest>,
) -> AppResult<Response> {
    require_graph_write(&user)?;
    let collected = req.collected.ok_or_else(|| AppError::BadRequest(NO_DOMAIN_FIELDS.to_string()))?;
    let domain = load_entity(&state, &user, ad_kind(DOMAINS)?, &object_id).await?;

    let audit_fields = fields(json!({ "object_id": domain.object_id, "collected": collected }));
    audited(&state, &user, AuditLogAction::MutateGraph, audit_fields, async {
        state.graph.set_node_property(&domain, "collected", Value::Bool(collected)).await.map_err(AppError::from)
    })
    .await?;

    Ok(response::ok(json!({ "collected": collected })))
}

/// `GET /azure/{entity_type}`: entity info, or a relationship listing when
/// `related_entity_type` is given.
pub async fn azure_entity(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(entity_type): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    let entity = azure_entity_kind(&entity_type)
        .ok_or_else(|| AppError::BadRequest(format!("invalid entity type: {}", entity_type)))?;
    let object_id = match params.get(OBJECT_ID) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(AppError::BadRequest(format!("missing query parameter: {}", OBJECT_ID))),
    };

    match params.get(RELATED_ENTITY_TYPE) {
        Some(relationship) if !relationship.is_empty() => {
            related_response(&state, &user, entity, &object_id, relationship, &params).await
        }
        _ => info_response(&state, &user, entity, &object_id, &params).await,
    }
}
