use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::db;
use crate::error::{AppError, AppResult, OptionExt};
use crate::middleware::CurrentUser;
use crate::model::analysis::{ScheduledAnalysisParameter, SCHEDULED_ANALYSIS_PARAMETER};
use crate::model::response;
use crate::routes::{require_admin, require_graph_write, JsonBody};
use crate::state::AppState;

const NO_PENDING_ANALYSIS: &str = "no analysis request is pending";

pub async fn request_analysis(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> AppResult<Response> {
    require_graph_write(&user)?;
    db::analysis::request_analysis(&state.db, &user.id).await?;
    info!("Analysis requested by {}", user.email);
    Ok(StatusCode::ACCEPTED.into_response())
}

pub async fn analysis_status(State(state): State<AppState>) -> AppResult<Response> {
    let request = db::analysis::get_analysis_request(&state.db).await?.ok_or_not_found(NO_PENDING_ANALYSIS)?;
    Ok(response::ok(request))
}

pub async fn list_parameters(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> AppResult<Response> {
    require_admin(&user)?;
    let mut parameters: Vec<Value> = db::analysis::list_parameters(&state.db)
        .await?
        .into_iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect();

    // The scheduled-analysis switch is always listed, falling back to the configured default.
    if !parameters.iter().any(|p| p["key"] == SCHEDULED_ANALYSIS_PARAMETER) {
        let default = ScheduledAnalysisParameter { enabled: state.config.analysis.scheduled_enabled };
        parameters.push(json!({ "key": SCHEDULED_ANALYSIS_PARAMETER, "value": default }));
    }
    Ok(response::ok(parameters))
}

#[derive(Debug, Deserialize)]
pub struct SetParameterRequest {
    pub key: String,
    pub value: Value,
}

pub async fn set_parameter(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(req): JsonBody<SetParameterRequest>,
) -> AppResult<Response> {
    require_admin(&user)?;
    match req.key.as_str() {
        SCHEDULED_ANALYSIS_PARAMETER => {
            let value: ScheduledAnalysisParameter = serde_json::from_value(req.value)
                .map_err(|e| AppError::BadRequest(format!("invalid value for {}: {}", req.key, e)))?;
            db::analysis::set_parameter(&state.db, &req.key, &value).await?;
            info!("Parameter {} set to {:?} by {}", req.key, value, user.email);
            Ok(response::ok(json!({ "key": req.key, "value": value })))
        }
        other => Err(AppError::BadRequest(format!("unknown parameter: {}", other))),
    }
}
