//! File ingest: upload validation, the job lifecycle and the background loops that drive it.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration as TokioDuration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::state::AppState;

pub mod jobs;
pub mod pipeline;
pub mod upload;

fn spawn_loop<F, Fut>(name: &'static str, period: TokioDuration, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = tick().await {
                        error!("{} failed: {:?}", name, e);
                    }
                }
            }
        }
        debug!("{} stopped", name);
    })
}

/// Starts the stale-job sweep and the datapipe. Both stop when `cancel` fires.
pub fn spawn_background_tasks(state: AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let sweep_state = state.clone();
    let sweep = spawn_loop(
        "stale ingest sweep",
        TokioDuration::from_secs(state.config.ingest.stale_check_interval_secs),
        cancel.clone(),
        move || {
            let state = sweep_state.clone();
            async move { jobs::sweep_stale_jobs(&state).await.map(|_| ()) }
        },
    );

    let pipe_state = state.clone();
    let datapipe = spawn_loop(
        "datapipe",
        TokioDuration::from_secs(state.config.ingest.datapipe_interval_secs),
        cancel,
        move || {
            let state = pipe_state.clone();
            async move { jobs::datapipe_tick(&state).await.map(|_| ()) }
        },
    );

    vec![sweep, datapipe]
}
