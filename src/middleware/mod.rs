//! Middleware components for HTTP request processing: request ids, bearer-token and user
//! resolution, request validation and security headers.

pub mod auth;
pub mod request_id;
pub mod security_headers;
pub mod validation;

pub use auth::CurrentUser;
