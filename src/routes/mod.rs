//! HTTP route handlers for the BloodHound API.
//!
//! - `analysis`: analysis requests and server parameters
//! - `assetgrouptags`: asset-group tags, selectors, members and history
//! - `audit`: audit log listing
//! - `dataquality`: completeness and data-quality statistics
//! - `entities`: AD and Azure entity details and relationships
//! - `environments`: per-user environment access (ETAC)
//! - `fileingest`: file-upload jobs
//! - `health`: health check and system status endpoints
//! - `savedqueries`: saved Cypher queries, sharing, import and export

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::error::AppError;
use crate::middleware;
use crate::model::params::QueryParams;
use crate::model::user::User;
use crate::state::AppState;

pub mod analysis;
pub mod assetgrouptags;
pub mod audit;
pub mod dataquality;
pub mod entities;
pub mod environments;
pub mod fileingest;
pub mod health;
pub mod savedqueries;

impl<S: Send + Sync> FromRequestParts<S> for QueryParams {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(format!("malformed query string: {}", e)))?;
        Ok(QueryParams::from_pairs(pairs))
    }
}

/// `Json<T>` whose rejections render through the error envelope.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(format!("error unmarshalling JSON payload: {}", e.body_text())))?;
        Ok(JsonBody(value))
    }
}

pub(crate) fn require_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("user does not have permission to perform this action".to_string()))
    }
}

pub(crate) fn require_graph_write(user: &User) -> Result<(), AppError> {
    if user.can_write_graph() {
        Ok(())
    } else {
        Err(AppError::Forbidden("user does not have permission to modify the graph".to_string()))
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // asset-group tags
        .route("/asset-group-tags", get(assetgrouptags::list_tags))
        .route("/asset-group-tags/{tag_id}", get(assetgrouptags::get_tag).patch(assetgrouptags::update_tag))
        .route("/asset-group-tags/{tag_id}/members", get(assetgrouptags::list_members))
        .route("/asset-group-tags/{tag_id}/members/counts", get(assetgrouptags::member_counts))
        .route(
            "/asset-group-tags/{tag_id}/selectors",
            get(assetgrouptags::list_selectors).post(assetgrouptags::create_selector),
        )
        .route(
            "/asset-group-tags/{tag_id}/selectors/{selector_id}",
            get(assetgrouptags::get_selector)
                .patch(assetgrouptags::update_selector)
                .delete(assetgrouptags::delete_selector),
        )
        .route("/asset-group-tags-history", get(assetgrouptags::list_history))
        // file ingest
        .route("/file-upload", get(fileingest::list_jobs))
        .route("/file-upload/accepted-types", get(fileingest::accepted_types))
        .route("/file-upload/start", post(fileingest::start_job))
        .route("/file-upload/{job_id}", post(fileingest::upload_file))
        .route("/file-upload/{job_id}/multipart", post(fileingest::upload_multipart))
        .route("/file-upload/{job_id}/completed-tasks", get(fileingest::completed_tasks))
        .route("/file-upload/{job_id}/end", post(fileingest::end_job))
        // data quality
        .route("/completeness", get(dataquality::completeness))
        .route("/ad-domains/{domain_id}/data-quality-stats", get(dataquality::ad_domain_stats))
        .route("/azure-tenants/{tenant_id}/data-quality-stats", get(dataquality::azure_tenant_stats))
        .route("/platform/{platform_id}/data-quality-stats", get(dataquality::platform_stats))
        // saved queries
        .route("/saved-queries", get(savedqueries::list_saved_queries).post(savedqueries::create_saved_query))
        .route("/saved-queries/import", post(savedqueries::import_saved_queries))
        .route("/saved-queries/export", get(savedqueries::export_saved_queries))
        .route(
            "/saved-queries/{id}",
            get(savedqueries::get_saved_query)
                .put(savedqueries::update_saved_query)
                .delete(savedqueries::delete_saved_query),
        )
        .route(
            "/saved-queries/{id}/permissions",
            get(savedqueries::get_permissions)
                .put(savedqueries::share_saved_query)
                .delete(savedqueries::unshare_saved_query),
        )
        .route("/saved-queries/{id}/export", get(savedqueries::export_saved_query))
        // analysis, parameters, audit, environment access
        .route("/analysis", put(analysis::request_analysis))
        .route("/analysis/status", get(analysis::analysis_status))
        .route("/config", get(analysis::list_parameters).put(analysis::set_parameter))
        .route("/audit", get(audit::list_audit_logs))
        .route(
            "/bloodhound-users/{user_id}/environment-access",
            get(environments::get_environment_access).put(environments::set_environment_access),
        )
        // entities
        .route("/azure/{entity_type}", get(entities::azure_entity))
        .route("/domains/{object_id}", get(entities::domain_info).patch(entities::patch_domain))
        .route("/domains/{object_id}/{relationship}", get(entities::domain_related))
        .route("/{kind}/{object_id}", get(entities::entity_info))
        .route("/{kind}/{object_id}/{relationship}", get(entities::entity_related))
}

/// The complete application: routes, middleware and state. Shared by `main` and the tests.
pub fn router(state: AppState) -> Router {
    let cfg = state.config.clone();
    let body_limit = cfg.ingest.max_upload_bytes;

    let app = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/version", get(health::version))
        .nest("/api/v2", api_routes())
        .layer(from_fn_with_state(state.clone(), middleware::auth::auth_middleware))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(cfg.clone(), middleware::validation::validate_request_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg, middleware::security_headers::security_headers_middleware))
        .layer(from_fn(middleware::request_id::request_id_middleware));

    // CORS: permissive only for local development builds
    if cfg!(debug_assertions) {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
