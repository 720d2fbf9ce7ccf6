use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub requested_by: String,
    pub request_type: String,
    pub requested_at: DateTime<Utc>,
}

pub const SCHEDULED_ANALYSIS_PARAMETER: &str = "analysis.scheduled";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAnalysisParameter {
    pub enabled: bool,
}
