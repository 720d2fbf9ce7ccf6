use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BasicResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub count: i64,
    pub limit: i64,
    pub skip: i64,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct TimeWindowedResponse<T> {
    pub count: i64,
    pub limit: i64,
    pub skip: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub data: T,
}

pub fn basic<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(BasicResponse { data })).into_response()
}

pub fn ok<T: Serialize>(data: T) -> Response {
    basic(StatusCode::OK, data)
}

pub fn paginated<T: Serialize>(data: T, limit: i64, skip: i64, count: i64) -> Response {
    (StatusCode::OK, Json(PaginatedResponse { count, limit, skip, data })).into_response()
}

pub fn time_windowed<T: Serialize>(
    data: T,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: i64,
    skip: i64,
    count: i64,
) -> Response {
    (StatusCode::OK, Json(TimeWindowedResponse { count, limit, skip, start, end, data })).into_response()
}
