//! File-upload job lifecycle: start, attach files, end, idle timeout and the datapipe tick
//! that moves ended jobs through ingesting and analyzing.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis;
use crate::db;
use crate::db::ingest::NewTask;
use crate::error::{AppError, AppResult, OptionExt};
use crate::ingest::{pipeline, upload};
use crate::model::ingest::{FileType, IngestJob, IngestTask, JobStatus};
use crate::model::user::User;
use crate::state::AppState;

pub const JOB_NOT_FOUND: &str = "job not found";
pub const NOT_RUNNING_TO_ATTACH: &str = "job must be in running status to attach files";
pub const NOT_RUNNING_TO_END: &str = "job must be in running status to end";

pub const STATUS_INGESTING: &str = "Ingesting";
pub const STATUS_ANALYZING: &str = "Analyzing";
pub const STATUS_COMPLETE: &str = "Complete";
pub const STATUS_PARTIALLY_COMPLETE: &str = "Partially Completed";
pub const STATUS_ALL_FAILED: &str = "All files failed to ingest as JSON Content";

pub fn timeout_message(minutes: i64) -> String {
    format!("Ingest timeout: No ingest activity observed in {} minutes. Upload incomplete.", minutes)
}

/// Final status of an analyzed job from its file counts.
pub fn completion_status(job: &IngestJob) -> (JobStatus, &'static str) {
    if job.failed_files == 0 {
        (JobStatus::Complete, STATUS_COMPLETE)
    } else if job.failed_files < job.total_files {
        (JobStatus::PartiallyComplete, STATUS_PARTIALLY_COMPLETE)
    } else {
        (JobStatus::Failed, STATUS_ALL_FAILED)
    }
}

pub async fn start_job(state: &AppState, user: &User) -> AppResult<IngestJob> {
    let job = db::ingest::create_job(&state.db, user).await?;
    state.metrics.inc_jobs_started();
    info!("Ingest job {} started by {}", job.id, user.email);
    Ok(job)
}

/// Loads job `id` and requires it to be running; `message` is the 400 text otherwise.
pub async fn running_job(state: &AppState, id: i64, message: &str) -> AppResult<IngestJob> {
    let job = db::ingest::get_job(&state.db, id).await?.ok_or_not_found(JOB_NOT_FOUND)?;
    if job.status != JobStatus::Running {
        return Err(AppError::BadRequest(message.to_string()));
    }
    Ok(job)
}

/// Validates and stores one uploaded file for a running job and queues it for the datapipe.
pub async fn accept_file(
    state: &AppState,
    job: &IngestJob,
    file_type: FileType,
    original_file_name: &str,
    bytes: &[u8],
) -> AppResult<IngestTask> {
    if let Err(e) = upload::validate(file_type, bytes) {
        state.metrics.inc_files_rejected();
        return Err(e.into());
    }

    let dir = PathBuf::from(&state.config.ingest.temp_dir);
    let path = upload::save(&dir, file_type, bytes).await?;
    let task = NewTask {
        file_name: path.to_string_lossy().into_owned(),
        original_file_name: original_file_name.to_string(),
        request_guid: Uuid::new_v4().to_string(),
        job_id: job.id,
        file_type,
    };

    let task = match db::ingest::create_task(&state.db, task).await {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to create ingest task for job {}: {}", job.id, e);
            upload::remove(&path).await;
            return Err(e.into());
        }
    };

    db::ingest::touch_job(&state.db, job.id).await?;
    state.metrics.add_accepted_file(bytes.len() as u64);
    Ok(task)
}

pub async fn end_job(state: &AppState, id: i64) -> AppResult<IngestJob> {
    let job = running_job(state, id, NOT_RUNNING_TO_END).await?;
    let job = db::ingest::end_job(&state.db, job.id).await?;
    state.metrics.inc_jobs_ended();
    info!("Ingest job {} ended with {} files", job.id, job.total_files);
    Ok(job)
}

/// Times out running jobs without uploads for longer than the configured activity window.
pub async fn sweep_stale_jobs(state: &AppState) -> anyhow::Result<Vec<i64>> {
    let minutes = state.config.ingest.job_activity_timeout_minutes;
    let cutoff = Utc::now() - Duration::minutes(minutes);
    let ids = db::ingest::time_out_stale_jobs(&state.db, cutoff, &timeout_message(minutes)).await?;
    if !ids.is_empty() {
        warn!("Timed out {} idle ingest jobs: {:?}", ids.len(), ids);
        state.metrics.add_jobs_timed_out(ids.len());
    }
    Ok(ids)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatapipeReport {
    pub tasks_processed: usize,
    pub tasks_failed: usize,
    pub jobs_analyzing: usize,
    pub jobs_finished: usize,
    pub analyzed: bool,
}

async fn process_task(state: &AppState, task: &IngestTask) -> anyhow::Result<bool> {
    let path = Path::new(&task.file_name);
    let (failed, errors) = match pipeline::ingest_file(state.graph.as_ref(), path, task.file_type).await {
        Ok(summary) => {
            info!(
                "Ingested {} ({} nodes, {} edges) for job {}",
                task.original_file_name, summary.nodes, summary.edges, task.job_id
            );
            (false, summary.errors)
        }
        Err(e) => {
            warn!("Failed to ingest {} for job {}: {}", task.original_file_name, task.job_id, e);
            (true, vec![e.to_string()])
        }
    };

    if failed {
        db::ingest::add_failed_files(&state.db, task.job_id, 1).await?;
    }
    db::ingest::complete_task(&state.db, task.id, &errors).await?;
    upload::remove(path).await;
    Ok(failed)
}

/// One pass of the datapipe: ingest queued files, advance ended jobs, run analysis when a
/// job or a pending request needs it and finish analyzed jobs.
pub async fn datapipe_tick(state: &AppState) -> anyhow::Result<DatapipeReport> {
    let mut report = DatapipeReport::default();

    for task in db::ingest::pending_tasks(&state.db).await? {
        if process_task(state, &task).await? {
            report.tasks_failed += 1;
        }
        report.tasks_processed += 1;
    }

    for job in db::ingest::jobs_with_status(&state.db, JobStatus::Ingesting).await? {
        if db::ingest::count_pending_tasks(&state.db, job.id).await? == 0 {
            db::ingest::set_job_status(&state.db, job.id, JobStatus::Analyzing, STATUS_ANALYZING).await?;
            report.jobs_analyzing += 1;
        }
    }

    let analyzing = db::ingest::jobs_with_status(&state.db, JobStatus::Analyzing).await?;
    let requested = db::analysis::get_analysis_request(&state.db).await?.is_some();
    if analyzing.is_empty() && !requested {
        return Ok(report);
    }

    analysis::run_analysis(state).await?;
    report.analyzed = true;

    for job in analyzing {
        let (status, message) = completion_status(&job);
        db::ingest::set_job_status(&state.db, job.id, status, message).await?;
        info!("Ingest job {} finished: {}", job.id, message);
        report.jobs_finished += 1;
    }
    Ok(report)
}
