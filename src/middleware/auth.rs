use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::db;
use crate::error::{AppError, NO_ASSOCIATED_USER};
use crate::middleware::validation::sanitize_for_logging;
use crate::model::user::User;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-bh-user";

/// Compares two tokens without short-circuiting on the first differing byte.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();
    if provided_bytes.len() != expected_bytes.len() {
        return false;
    }
    let mut diff = 0u8;
    for (i, &b) in provided_bytes.iter().enumerate() {
        diff |= b ^ expected_bytes[i];
    }
    diff == 0
}

/// Enforces the shared bearer token on `/api` routes when `auth.api_token` is set, then
/// resolves the acting user from `X-BH-User` (user id or email) into a request extension.
///
/// An unknown user is not rejected here; handlers that need a user fail through
/// [`CurrentUser`].
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if !req.uri().path().starts_with("/api") {
        return next.run(req).await;
    }

    if let Some(expected) = state.config.auth.api_token.as_deref().filter(|t| !t.trim().is_empty()) {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if !provided.is_some_and(|token| tokens_match(token, expected)) {
            return AppError::Unauthorized("missing or invalid bearer token".to_string()).into_response();
        }
    }

    let requested = req.headers().get(USER_HEADER).and_then(|v| v.to_str().ok()).map(str::trim).map(str::to_string);
    if let Some(id_or_email) = requested.filter(|v| !v.is_empty()) {
        match db::users::find_user(&state.db, &id_or_email).await {
            Ok(Some(user)) => {
                req.extensions_mut().insert(user);
            }
            Ok(None) => tracing::debug!("Unknown user in {} header: {}", USER_HEADER, sanitize_for_logging(&id_or_email)),
            Err(e) => return AppError::from(e).into_response(),
        }
    }

    next.run(req).await
}

/// The user acting on the request. Rejects with 401 when none was resolved.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized(NO_ASSOCIATED_USER.to_string()))
    }
}
