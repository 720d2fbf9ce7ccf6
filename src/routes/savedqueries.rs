use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use zip::write::SimpleFileOptions;

use crate::db;
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::ingest::upload::media_type;
use crate::middleware::validation::parse_id;
use crate::middleware::CurrentUser;
use crate::model::audit::AuditLogAction;
use crate::model::filter::parse_validated_filters;
use crate::model::ingest::{ALLOWED_ZIP_UPLOAD_TYPES, MEDIA_TYPE_JSON};
use crate::model::params::{parse_limit, parse_skip, parse_sort, QueryParams};
use crate::model::response;
use crate::model::savedqueries::{
    NewSavedQuery, SavedQuery, SavedQueryScope, TransferableSavedQuery, SAVED_QUERY_FILTERS,
};
use crate::model::user::User;
use crate::routes::audit::{audited, fields};
use crate::routes::JsonBody;
use crate::state::AppState;

const SCOPE: &str = "scope";

pub const QUERY_DOES_NOT_EXIST: &str = "query does not exist";
pub const EMPTY_NAME_OR_QUERY: &str = "the name and/or query field is empty";
pub const DUPLICATE_NAME: &str = "duplicate name for saved query: please choose a different name";
pub const DELETE_FORBIDDEN: &str = "User does not have permission to delete this query";
pub const INVALID_SCOPE: &str = "invalid scope param";
pub const EMPTY_SCOPE: &str = "scope query parameter cannot be empty";
pub const SHARE_FORBIDDEN: &str = "user does not have permission to share this query";
pub const UNSHARE_FORBIDDEN: &str = "user does not have permission to unshare this query";
pub const SHARE_TO_OWNER: &str = "a query cannot be shared with its owner";
pub const PUBLIC_WITH_USERS: &str = "a public query cannot also be shared with specific users";
pub const NOT_A_ZIP: &str = "not a valid zip file";
const UPLOAD_TYPES_HINT: &str = "Content type must be application/json or application/zip";

fn duplicate_name(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::BadRequest(DUPLICATE_NAME.to_string())
    } else {
        e.into()
    }
}

/// Loads query `raw_id`; unknown ids are reported as "query does not exist".
async fn load_query(state: &AppState, raw_id: &str) -> AppResult<SavedQuery> {
    let id = parse_id(raw_id, AppError::BadRequest)?;
    db::savedqueries::get_saved_query(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(QUERY_DOES_NOT_EXIST.to_string()))
}

/// Owner, a user the query is shared with, or anyone when the query is public.
async fn can_access(state: &AppState, query: &SavedQuery, user: &User) -> AppResult<bool> {
    if query.user_id == user.id {
        return Ok(true);
    }
    Ok(db::savedqueries::is_shared_to(&state.db, query.id, &user.id).await?
        || db::savedqueries::is_public(&state.db, query.id).await?)
}

fn attachment(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .map(|c| if c == ' ' || (c.is_ascii_graphic() && !matches!(c, '"' | '/' | '\\')) { c } else { '_' })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn file_response(content_type: &'static str, file_name: &str, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type)), (header::CONTENT_DISPOSITION, attachment(file_name))],
        body,
    )
        .into_response()
}

fn transferable(query: &SavedQuery) -> TransferableSavedQuery {
    TransferableSavedQuery {
        query: query.query.clone(),
        name: query.name.clone(),
        description: query.description.clone(),
    }
}

/// One `<name>.json` entry per query. Names repeated across owners get the query id
/// appended, as in `<name> (<id>).json`.
pub fn queries_zip(queries: &[SavedQuery]) -> anyhow::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut used = HashSet::new();
    for query in queries {
        let base = query.name.rsplit(['/', '\\']).next().unwrap_or(&query.name);
        let mut entry = format!("{}.json", base);
        if !used.insert(entry.clone()) {
            entry = format!("{} ({}).json", base, query.id);
            used.insert(entry.clone());
        }
        writer.start_file(entry, SimpleFileOptions::default())?;
        writer.write_all(&serde_json::to_vec(&transferable(query))?)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn parse_transferable(bytes: &[u8]) -> AppResult<TransferableSavedQuery> {
    serde_json::from_slice(bytes).map_err(|e| AppError::BadRequest(format!("failed to unmarshal json file: {}", e)))
}

/// Every JSON entry of the archive; directories, `__MACOSX` entries and dot-files are skipped.
pub fn queries_from_zip(bytes: &[u8]) -> AppResult<Vec<TransferableSavedQuery>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|_| AppError::BadRequest(NOT_A_ZIP.to_string()))?;
    let mut queries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|_| AppError::BadRequest(NOT_A_ZIP.to_string()))?;
        if entry.is_dir() || entry.name().contains("__MACOSX") || entry.name().starts_with('.') {
            continue;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        queries.push(parse_transferable(&contents)?);
    }
    Ok(queries)
}

pub async fn list_saved_queries(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: QueryParams,
) -> AppResult<Response> {
    let order = parse_sort(&params, &SAVED_QUERY_FILTERS)?;
    let filters = parse_validated_filters(&params, &[SCOPE], &SAVED_QUERY_FILTERS)?;
    let skip = parse_skip(&params, 0)?;
    let limit = parse_limit(&params, 10000)?;

    match params.get(SCOPE) {
        None => {
            let (queries, count) = db::savedqueries::list_saved_queries(
                &state.db,
                &user.id,
                SavedQueryScope::Owned,
                &filters,
                &order,
                skip,
                limit,
            )
            .await?;
            Ok(response::paginated(queries, limit, skip, count))
        }
        Some(raw) => {
            let scopes = raw
                .split(',')
                .map(|s| match SavedQueryScope::parse(s) {
                    Some(SavedQueryScope::All) | None => Err(AppError::BadRequest(INVALID_SCOPE.to_string())),
                    Some(scope) => Ok(scope),
                })
                .collect::<AppResult<Vec<_>>>()?;
            let (queries, count) =
                db::savedqueries::list_scoped_saved_queries(&state.db, &user.id, &scopes, &filters, &order, skip, limit)
                    .await?;
            Ok(response::paginated(queries, limit, skip, count))
        }
    }
}

pub async fn get_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let query = load_query(&state, &id).await?;
    if !can_access(&state, &query, &user).await? {
        return Err(AppError::NotFound(QUERY_DOES_NOT_EXIST.to_string()));
    }
    Ok(response::ok(query))
}

#[derive(Debug, Default, Deserialize)]
pub struct SavedQueryRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<SavedQueryRequest>,
) -> AppResult<Response> {
    if req.name.is_empty() || req.query.is_empty() {
        return Err(AppError::BadRequest(EMPTY_NAME_OR_QUERY.to_string()));
    }
    let new = NewSavedQuery { user_id: user.id, name: req.name, query: req.query, description: req.description };
    let query = db::savedqueries::create_saved_query(&state.db, &new).await.map_err(duplicate_name)?;
    Ok(response::basic(StatusCode::CREATED, query))
}

pub async fn update_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<SavedQueryRequest>,
) -> AppResult<Response> {
    let mut query = load_query(&state, &id).await?;
    if query.user_id != user.id && !(user.is_admin() && db::savedqueries::is_public(&state.db, query.id).await?) {
        return Err(AppError::NotFound(QUERY_DOES_NOT_EXIST.to_string()));
    }

    if !req.query.is_empty() {
        query.query = req.query;
    }
    if !req.name.is_empty() {
        query.name = req.name;
    }
    if !req.description.is_empty() {
        query.description = req.description;
    }
    let query = db::savedqueries::update_saved_query(&state.db, &query).await.map_err(duplicate_name)?;
    Ok(response::ok(query))
}

pub async fn delete_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let query = load_query(&state, &id).await?;
    if query.user_id != user.id && !(user.is_admin() && db::savedqueries::is_public(&state.db, query.id).await?) {
        return Err(AppError::Forbidden(DELETE_FORBIDDEN.to_string()));
    }
    db::savedqueries::delete_saved_query(&state.db, query.id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_permissions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let query = load_query(&state, &id).await?;
    if !user.is_admin() && !can_access(&state, &query, &user).await? {
        return Err(AppError::NotFound(QUERY_DOES_NOT_EXIST.to_string()));
    }
    let permissions = db::savedqueries::get_permissions(&state.db, query.id).await?;
    Ok(response::ok(permissions))
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareRequest {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub public: bool,
}

pub async fn share_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ShareRequest>,
) -> AppResult<Response> {
    let query = load_query(&state, &id).await?;
    let is_owner = query.user_id == user.id;
    if req.public && !req.user_ids.is_empty() {
        return Err(AppError::BadRequest(PUBLIC_WITH_USERS.to_string()));
    }
    if req.user_ids.iter().any(|id| *id == query.user_id) {
        return Err(AppError::BadRequest(SHARE_TO_OWNER.to_string()));
    }

    let was_public = db::savedqueries::is_public(&state.db, query.id).await?;
    if req.public != was_public {
        if !is_owner && !user.is_admin() {
            return Err(AppError::Forbidden(SHARE_FORBIDDEN.to_string()));
        }
        db::savedqueries::set_public(&state.db, query.id, req.public).await?;
    }
    if !req.user_ids.is_empty() {
        if !is_owner {
            return Err(AppError::Forbidden(SHARE_FORBIDDEN.to_string()));
        }
        db::savedqueries::share(&state.db, query.id, &req.user_ids).await?;
    }

    let permissions = db::savedqueries::get_permissions(&state.db, query.id).await?;
    Ok(response::ok(permissions))
}

#[derive(Debug, Default, Deserialize)]
pub struct UnshareRequest {
    #[serde(default)]
    pub user_ids: Vec<String>,
}

pub async fn unshare_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UnshareRequest>,
) -> AppResult<Response> {
    let query = load_query(&state, &id).await?;
    if req.user_ids.iter().any(|id| *id == query.user_id) {
        return Err(AppError::BadRequest(SHARE_TO_OWNER.to_string()));
    }

    let manages_query = query.user_id == user.id || user.is_admin();
    if !manages_query {
        // Anyone else may only drop their own share.
        if req.user_ids.iter().any(|id| *id != user.id) {
            return Err(AppError::Forbidden(UNSHARE_FORBIDDEN.to_string()));
        }
        if !db::savedqueries::is_shared_to(&state.db, query.id, &user.id).await? {
            return Err(AppError::BadRequest(format!("query is not shared to user: {}", user.id)));
        }
    }

    db::savedqueries::unshare(&state.db, query.id, &req.user_ids).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn export_saved_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let audit_fields = fields(json!({ "target_query_id": id, "user_id": user.id }));
    let query = audited(&state, &user, AuditLogAction::ExportSavedQuery, audit_fields, async {
        let query = load_query(&state, &id).await?;
        if !can_access(&state, &query, &user).await? {
            return Err(AppError::NotFound(QUERY_DOES_NOT_EXIST.to_string()));
        }
        Ok(query)
    })
    .await?;

    let body = serde_json::to_vec(&transferable(&query)).map_err(anyhow::Error::from)?;
    state.metrics.add_saved_queries_exported(1);
    Ok(file_response(MEDIA_TYPE_JSON, &format!("{}.json", query.name), body))
}

pub async fn export_saved_queries(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: QueryParams,
) -> AppResult<Response> {
    let raw_scope = params.get(SCOPE).unwrap_or_default().to_string();
    let audit_fields = fields(json!({ "export_saved_queries_scope": raw_scope, "user_id": user.id }));
    let archive = audited(&state, &user, AuditLogAction::ExportSavedQueries, audit_fields, async {
        if raw_scope.trim().is_empty() {
            return Err(AppError::BadRequest(EMPTY_SCOPE.to_string()));
        }
        let scope = SavedQueryScope::parse(&raw_scope)
            .ok_or_else(|| AppError::BadRequest(format!("{}: {}", INVALID_SCOPE, raw_scope)))?;
        let queries = db::savedqueries::saved_queries_for_scope(&state.db, &user.id, scope).await?;
        let archive = queries_zip(&queries)?;
        Ok((archive, queries.len()))
    })
    .await?;

    let (body, exported) = archive;
    state.metrics.add_saved_queries_exported(exported as u64);
    Ok(file_response("application/octet-stream", "exported_queries.zip", body))
}

pub async fn import_saved_queries(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let raw_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
    let media = media_type(raw_type);

    let audit_fields = fields(json!({ "user_id": user.id }));
    let imported = audited(&state, &user, AuditLogAction::ImportSavedQueries, audit_fields, async {
        let transferred = if media == MEDIA_TYPE_JSON {
            vec![parse_transferable(&body)?]
        } else if ALLOWED_ZIP_UPLOAD_TYPES.contains(&media.as_str()) {
            queries_from_zip(&body)?
        } else {
            return Err(AppError::UnsupportedMediaType(format!(
                "invalid content-type: {}; {}",
                raw_type, UPLOAD_TYPES_HINT
            )));
        };

        let queries: Vec<NewSavedQuery> = transferred
            .into_iter()
            .map(|q| NewSavedQuery {
                user_id: user.id.clone(),
                name: q.name,
                query: q.query,
                description: q.description,
            })
            .collect();
        db::savedqueries::create_saved_queries(&state.db, &queries).await.map_err(duplicate_name)
    })
    .await?;

    state.metrics.add_saved_queries_imported(imported as u64);
    Ok(response::basic(StatusCode::CREATED, format!("imported {} queries", imported)))
}
