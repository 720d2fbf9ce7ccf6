use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::filter::{ColumnKind, FilterSchema};

int_enum!(JobStatus {
    Invalid = -1,
    Ready = 0,
    Running = 1,
    Complete = 2,
    Canceled = 3,
    TimedOut = 4,
    Failed = 5,
    Ingesting = 6,
    Analyzing = 7,
    PartiallyComplete = 8,
});

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Invalid => "INVALID",
            JobStatus::Ready => "READY",
            JobStatus::Running => "RUNNING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Canceled => "CANCELED",
            JobStatus::TimedOut => "TIMEDOUT",
            JobStatus::Failed => "FAILED",
            JobStatus::Ingesting => "INGESTING",
            JobStatus::Analyzing => "ANALYZING",
            JobStatus::PartiallyComplete => "PARTIALLYCOMPLETE",
        }
    }
}

int_enum!(FileType { Json = 0, Zip = 1 });

pub const MEDIA_TYPE_JSON: &str = "application/json";

pub const ALLOWED_ZIP_UPLOAD_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
    "application/zip-compressed",
];

pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    MEDIA_TYPE_JSON,
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
    "application/zip-compressed",
];

#[derive(Debug, Clone, Serialize)]
pub struct IngestJob {
    pub id: i64,
    pub user_id: String,
    pub user_email_address: Option<String>,
    pub status: JobStatus,
    pub status_message: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_ingest: DateTime<Utc>,
    pub total_files: i64,
    pub failed_files: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestTask {
    pub id: i64,
    pub file_name: String,
    pub original_file_name: String,
    pub request_guid: String,
    pub job_id: i64,
    pub file_type: FileType,
    pub created_at: DateTime<Utc>,
}

/// A processed task, listed under a job's completed tasks.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub id: i64,
    pub job_id: i64,
    pub file_name: String,
    pub file_type: FileType,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartResult {
    pub file_name: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultipartUploadResult {
    pub total_parts: usize,
    pub failed_parts: usize,
    pub parts_data: Vec<PartResult>,
}

pub const INGEST_JOB_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("user_id", ColumnKind::String),
        ("user_email_address", ColumnKind::String),
        ("status_message", ColumnKind::String),
        ("status", ColumnKind::Numeric),
        ("id", ColumnKind::Numeric),
        ("total_files", ColumnKind::Numeric),
        ("failed_files", ColumnKind::Numeric),
        ("start_time", ColumnKind::Time),
        ("end_time", ColumnKind::Time),
        ("last_ingest", ColumnKind::Time),
    ],
    sortable: &[
        "user_id",
        "user_email_address",
        "status_message",
        "status",
        "id",
        "total_files",
        "failed_files",
        "start_time",
        "end_time",
        "last_ingest",
    ],
};
