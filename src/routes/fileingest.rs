use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::ingest::jobs::{self, NOT_RUNNING_TO_ATTACH};
use crate::ingest::upload::file_type_for;
use crate::middleware::validation::parse_id;
use crate::middleware::CurrentUser;
use crate::model::filter::parse_validated_filters;
use crate::model::ingest::{MultipartUploadResult, PartResult, ALLOWED_UPLOAD_TYPES, INGEST_JOB_FILTERS};
use crate::model::params::{parse_limit, parse_skip, parse_sort, QueryParams};
use crate::model::response;
use crate::model::user::User;
use crate::state::AppState;

pub const INGEST_FORBIDDEN: &str = "user does not have permission to upload files";
pub const ALL_PARTS_FAILED: &str = "no files in the multipart request were accepted";

fn require_ingest(user: &User) -> AppResult<()> {
    if user.can_ingest() {
        Ok(())
    } else {
        Err(AppError::Forbidden(INGEST_FORBIDDEN.to_string()))
    }
}

fn content_type(headers: &HeaderMap) -> &str {
    headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

pub async fn list_jobs(State(state): State<AppState>, params: QueryParams) -> AppResult<Response> {
    let order = parse_sort(&params, &INGEST_JOB_FILTERS)?;
    let filters = parse_validated_filters(&params, &[], &INGEST_JOB_FILTERS)?;
    let skip = parse_skip(&params, 0)?;
    let limit = parse_limit(&params, 100)?;

    let (jobs, count) = db::ingest::list_jobs(&state.db, &filters, &order, skip, limit).await?;
    Ok(response::paginated(jobs, limit, skip, count))
}

pub async fn accepted_types() -> Response {
    response::ok(ALLOWED_UPLOAD_TYPES)
}

pub async fn start_job(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> AppResult<Response> {
    require_ingest(&user)?;
    let job = jobs::start_job(&state, &user).await?;
    Ok(response::basic(StatusCode::CREATED, job))
}

pub async fn upload_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    require_ingest(&user)?;
    let file_type = file_type_for(content_type(&headers))?;
    let id = parse_id(&job_id, AppError::BadRequest)?;
    let job = jobs::running_job(&state, id, NOT_RUNNING_TO_ATTACH).await?;

    let original_name = headers
        .get("x-file-upload-name")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let task = jobs::accept_file(&state, &job, file_type, &original_name, &body).await?;
    debug!("Queued ingest task {} for job {} ({} bytes)", task.id, job.id, body.len());

    Ok(StatusCode::ACCEPTED.into_response())
}

pub async fn upload_multipart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Response> {
    require_ingest(&user)?;
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let id = parse_id(&job_id, AppError::BadRequest)?;
    let job = jobs::running_job(&state, id, NOT_RUNNING_TO_ATTACH).await?;

    let mut parts_data = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {}", e.body_text())))?
    {
        let file_name = field.file_name().or(field.name()).unwrap_or_default().to_string();
        let file_type = file_type_for(field.content_type().unwrap_or_default());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {}", e.body_text())))?;

        let errors = match file_type {
            Err(e) => {
                state.metrics.inc_files_rejected();
                vec![e.to_string()]
            }
            Ok(file_type) => match jobs::accept_file(&state, &job, file_type, &file_name, &bytes).await {
                Ok(_) => Vec::new(),
                Err(e) => vec![e.client_message()],
            },
        };
        if !errors.is_empty() {
            warn!("Rejected multipart part {} for job {}: {:?}", file_name, job.id, errors);
        }
        parts_data.push(PartResult { file_name, errors });
    }

    let failed_parts = parts_data.iter().filter(|p| !p.errors.is_empty()).count();
    let result = MultipartUploadResult { total_parts: parts_data.len(), failed_parts, parts_data };
    if result.failed_parts == result.total_parts {
        return Err(AppError::BadRequest(ALL_PARTS_FAILED.to_string()));
    }
    Ok(response::basic(StatusCode::ACCEPTED, result))
}

pub async fn completed_tasks(State(state): State<AppState>, Path(job_id): Path<String>) -> AppResult<Response> {
    let id = parse_id(&job_id, AppError::BadRequest)?;
    if db::ingest::get_job(&state.db, id).await?.is_none() {
        return Err(AppError::NotFound(jobs::JOB_NOT_FOUND.to_string()));
    }
    let tasks = db::ingest::completed_tasks(&state.db, id).await?;
    Ok(response::ok(tasks))
}

pub async fn end_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    require_ingest(&user)?;
    let id = parse_id(&job_id, AppError::BadRequest)?;
    let job = jobs::end_job(&state, id).await?;
    Ok(response::ok(job))
}
