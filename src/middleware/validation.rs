use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult, ID_MALFORMED};

/// Rejects requests with traversal sequences in the path or a declared body larger than
/// the upload limit, and logs scanner user agents.
pub async fn validate_request_middleware(State(cfg): State<Arc<AppConfig>>, req: Request, next: Next) -> Response {
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        tracing::warn!("Path traversal attempt rejected: {}", sanitize_for_logging(uri_path));
        return AppError::BadRequest("path traversal detected in request".to_string()).into_response();
    }

    if let Some(user_agent) = req.headers().get("user-agent") {
        if let Ok(ua_str) = user_agent.to_str() {
            if is_suspicious_user_agent(ua_str) {
                tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua_str));
            }
        }
    }

    // Early rejection; DefaultBodyLimit enforces the same bound on the actual body
    if matches!(req.method(), &axum::http::Method::POST | &axum::http::Method::PUT) {
        let declared = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(length) = declared {
            let max_body_size = cfg.ingest.max_upload_bytes;
            if length > max_body_size {
                return AppError::PayloadTooLarge(format!(
                    "request body exceeds maximum size of {} bytes",
                    max_body_size
                ))
                .into_response();
            }
        }
    }

    next.run(req).await
}

fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") {
        return true;
    }
    if path.contains("....") {
        return true;
    }

    // URL-encoded variants (single and double encoding)
    let encoded_patterns = [
        "%2e%2e",
        "%252e%252e",
        "%2e/",
        "%252e%2f",
        "/%2e",
        "%2f%2e",
        "%2e\\",
        "%2e%5c",
        "%5c%2e",
        "%5c%5c",
        "%00",
    ];
    if encoded_patterns.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("havij")
        || ua_lower.contains("acunetix")
}

/// Parses an integer path id. `malformed` builds the error for ids that do not parse, since
/// some endpoints report them as 400 and others as 404.
pub fn parse_id(raw: &str, malformed: fn(String) -> AppError) -> AppResult<i64> {
    raw.parse::<i64>().map_err(|_| malformed(ID_MALFORMED.to_string()))
}

/// Strips control characters (except whitespace), escapes quotes and caps the length.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}
