use axum::{
    extract::{Path, State},
    response::Response,
};
use serde_json::json;

use crate::db;
use crate::error::{AppError, AppResult, OptionExt};
use crate::middleware::CurrentUser;
use crate::model::audit::AuditLogAction;
use crate::model::response;
use crate::model::user::EnvironmentAccess;
use crate::routes::audit::{audited, fields};
use crate::routes::{require_admin, JsonBody};
use crate::state::AppState;

const USER_NOT_FOUND: &str = "user not found";

pub async fn get_environment_access(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<String>,
) -> AppResult<Response> {
    require_admin(&user)?;
    let access = db::users::get_environment_access(&state.db, &user_id).await?.ok_or_not_found(USER_NOT_FOUND)?;
    Ok(response::ok(access))
}

pub async fn set_environment_access(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<String>,
    JsonBody(mut access): JsonBody<EnvironmentAccess>,
) -> AppResult<Response> {
    require_admin(&user)?;
    if db::users::get_user(&state.db, &user_id).await?.is_none() {
        return Err(AppError::NotFound(USER_NOT_FOUND.to_string()));
    }
    for env in &mut access.environments {
        *env = env.trim().to_string();
    }
    access.environments.retain(|env| !env.is_empty());
    access.environments.sort();
    access.environments.dedup();

    let audit_fields = fields(json!({
        "target_user_id": user_id,
        "all_environments": access.all_environments,
        "environments": access.environments,
    }));
    audited(&state, &user, AuditLogAction::UpdateEnvironmentAccess, audit_fields, async {
        db::users::set_environment_access(&state.db, &user_id, &access).await.map_err(AppError::from)
    })
    .await?;

    Ok(response::ok(access))
}
