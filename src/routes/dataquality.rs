use axum::{
    extract::{Path, State},
    response::Response,
};

use crate::access_control::require_access;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::model::dataquality::{
    AD_AGGREGATION_SORTABLE, AD_STAT_SORTABLE, AZURE_AGGREGATION_SORTABLE, AZURE_STAT_SORTABLE,
};
use crate::model::filter::FilterSchema;
use crate::model::params::{parse_limit, parse_skip, parse_sort, parse_time_range, OrderBy, QueryParams};
use crate::model::response;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 1000;

/// Sort, time window and paging shared by every stats listing.
struct StatsParams {
    order: OrderBy,
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    skip: i64,
    limit: i64,
}

impl StatsParams {
    fn parse(params: &QueryParams, sortable: &FilterSchema) -> AppResult<Self> {
        let order = parse_sort(params, sortable)?;
        let (start, end) = parse_time_range(params)?;
        Ok(Self { order, start, end, skip: parse_skip(params, 0)?, limit: parse_limit(params, DEFAULT_LIMIT)? })
    }

    fn respond<T: serde::Serialize>(&self, data: T, count: i64) -> Response {
        response::time_windowed(data, self.start, self.end, self.limit, self.skip, count)
    }
}

pub async fn completeness(State(state): State<AppState>) -> AppResult<Response> {
    let completeness = state.graph.completeness().await?;
    Ok(response::ok(completeness))
}

pub async fn ad_domain_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(domain_id): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    require_access(state.etac_enabled(), &user, &[domain_id.as_str()])?;
    let p = StatsParams::parse(&params, &AD_STAT_SORTABLE)?;
    let (stats, count) =
        db::dataquality::ad_domain_stats(&state.db, &domain_id, p.start, p.end, &p.order, p.skip, p.limit).await?;
    Ok(p.respond(stats, count))
}

pub async fn azure_tenant_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tenant_id): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    require_access(state.etac_enabled(), &user, &[tenant_id.as_str()])?;
    let p = StatsParams::parse(&params, &AZURE_STAT_SORTABLE)?;
    let (stats, count) =
        db::dataquality::azure_tenant_stats(&state.db, &tenant_id, p.start, p.end, &p.order, p.skip, p.limit)
            .await?;
    Ok(p.respond(stats, count))
}

pub async fn platform_stats(
    State(state): State<AppState>,
    Path(platform_id): Path<String>,
    params: QueryParams,
) -> AppResult<Response> {
    match platform_id.as_str() {
        "ad" => {
            let p = StatsParams::parse(&params, &AD_AGGREGATION_SORTABLE)?;
            let (rows, count) =
                db::dataquality::ad_platform_aggregations(&state.db, p.start, p.end, &p.order, p.skip, p.limit)
                    .await?;
            Ok(p.respond(rows, count))
        }
        "azure" => {
            let p = StatsParams::parse(&params, &AZURE_AGGREGATION_SORTABLE)?;
            let (rows, count) =
                db::dataquality::azure_platform_aggregations(&state.db, p.start, p.end, &p.order, p.skip, p.limit)
                    .await?;
            Ok(p.respond(rows, count))
        }
        other => Err(AppError::BadRequest(format!("invalid platform id specified in url: {}", other))),
    }
}
