//! Shared query-string parsing: pagination, sorting, booleans and time windows.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite};

use crate::error::{AppError, AppResult};
use crate::model::filter::{FilterError, FilterSchema};

pub const SKIP: &str = "skip";
pub const LIMIT: &str = "limit";
pub const SORT_BY: &str = "sort_by";
pub const START: &str = "start";
pub const END: &str = "end";

/// Raw query parameters in request order. Repeated keys are kept.
#[derive(Debug, Clone, Default)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0.iter().filter(|(k, _)| k == name).map(|(_, v)| v.as_str()).collect()
    }
}

pub fn bad_query_parameter(name: &str, err: impl std::fmt::Display) -> AppError {
    AppError::BadRequest(format!("query parameter \"{}\" is malformed: {}", name, err))
}

pub fn parse_skip(params: &QueryParams, default: i64) -> AppResult<i64> {
    parse_non_negative(params, SKIP, default)
}

pub fn parse_limit(params: &QueryParams, default: i64) -> AppResult<i64> {
    parse_non_negative(params, LIMIT, default)
}

fn parse_non_negative(params: &QueryParams, name: &str, default: i64) -> AppResult<i64> {
    match params.get(name) {
        None | Some("") => Ok(default),
        Some(raw) => {
            let value: i64 = raw.parse().map_err(|e| bad_query_parameter(name, e))?;
            if value < 0 {
                return Err(bad_query_parameter(name, "value must be non-negative"));
            }
            Ok(value)
        }
    }
}

/// Optional boolean parameter; absent means `default`.
pub fn parse_bool(params: &QueryParams, name: &str, default: bool) -> AppResult<bool> {
    match params.get(name) {
        None | Some("") => Ok(default),
        Some(raw) => raw.to_ascii_lowercase().parse().map_err(|e| bad_query_parameter(name, e)),
    }
}

/// `start`/`end` RFC3339 window. Without `end` it is now; without `start` it is one month
/// before `end`.
pub fn parse_time_range(params: &QueryParams) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let end = match params.get(END) {
        None | Some("") => Utc::now(),
        Some(raw) => {
            DateTime::parse_from_rfc3339(raw).map_err(|e| bad_query_parameter(END, e))?.with_timezone(&Utc)
        }
    };
    let start = match params.get(START) {
        None | Some("") => end - Duration::days(30),
        Some(raw) => {
            DateTime::parse_from_rfc3339(raw).map_err(|e| bad_query_parameter(START, e))?.with_timezone(&Utc)
        }
    };
    Ok((start, end))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortItem {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy(pub Vec<SortItem>);

impl OrderBy {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends ` ORDER BY ...`, or `default` when no sort was requested.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>, default: &str) {
        qb.push(" ORDER BY ");
        if self.0.is_empty() {
            qb.push(default);
            return;
        }
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(&item.column);
            if item.descending {
                qb.push(" DESC");
            }
        }
    }
}

/// Parses every `sort_by` value (`col` or `-col`) against the schema's sortable columns.
pub fn parse_sort(params: &QueryParams, schema: &FilterSchema) -> Result<OrderBy, FilterError> {
    let mut items = Vec::new();
    for raw in params.get_all(SORT_BY) {
        if raw.is_empty() {
            continue;
        }
        let (column, descending) = match raw.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        if !schema.is_sortable(column) {
            return Err(FilterError::NotSortable(column.to_string()));
        }
        items.push(SortItem { column: column.to_string(), descending });
    }
    Ok(OrderBy(items))
}
