use std::future::Future;

use axum::{extract::State, response::Response};
use serde_json::{json, Map, Value};

use crate::db;
use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::model::audit::{AuditEntry, AuditLogAction, AUDIT_LOG_FILTERS};
use crate::model::filter::parse_validated_filters;
use crate::model::params::{parse_limit, parse_skip, parse_sort, QueryParams};
use crate::model::response;
use crate::model::user::User;
use crate::routes::require_admin;
use crate::state::AppState;

async fn record(state: &AppState, user: &User, entry: &AuditEntry) {
    if let Err(e) = db::audit::append(&state.db, user, entry).await {
        tracing::error!("Failed to write {} audit entry: {}", entry.action.as_str(), e);
    }
}

/// Runs `op` between an intent entry and an outcome entry sharing one commit id.
pub(crate) async fn audited<T, F>(
    state: &AppState,
    user: &User,
    action: AuditLogAction,
    fields: Map<String, Value>,
    op: F,
) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    let mut entry = AuditEntry::new(action, fields);
    record(state, user, &entry).await;

    let result = op.await;
    match &result {
        Ok(_) => entry.succeeded(),
        Err(e) => entry.failed(e.client_message()),
    }
    record(state, user, &entry).await;
    result
}

/// Audit fields from a JSON object literal.
pub(crate) fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: QueryParams,
) -> AppResult<Response> {
    require_admin(&user)?;
    let order = parse_sort(&params, &AUDIT_LOG_FILTERS)?;
    let filters = parse_validated_filters(&params, &[], &AUDIT_LOG_FILTERS)?;
    let skip = parse_skip(&params, 0)?;
    let limit = parse_limit(&params, 100)?;

    let (logs, count) = db::audit::list_audit_logs(&state.db, &filters, &order, skip, limit).await?;
    Ok(response::paginated(json!({ "logs": logs }), limit, skip, count))
}
