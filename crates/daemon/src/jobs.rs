//! Scheduled jobs: ticket reconciliation and the age sweep

use std::sync::Arc;

use anyhow::{anyhow, Result};
use deskrelay_relay::Relay;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Register and start both jobs
pub async fn start(relay: Arc<Relay>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("failed to create scheduler: {e:?}"))?;

    let sync_interval = relay.config().sync_interval;
    let sweep_interval = relay.config().sweep_interval;

    let sync_relay = Arc::clone(&relay);
    let sync_job = Job::new_repeated_async(sync_interval, move |_id, _scheduler| {
        let relay = Arc::clone(&sync_relay);
        Box::pin(async move {
            if let Err(e) = relay.sync_tickets().await {
                error!(error = %e, "Ticket sync failed");
            }
        })
    })
    .map_err(|e| anyhow!("failed to create sync job: {e:?}"))?;

    let sweep_relay = Arc::clone(&relay);
    let sweep_job = Job::new_repeated_async(sweep_interval, move |_id, _scheduler| {
        let relay = Arc::clone(&sweep_relay);
        Box::pin(async move {
            if let Err(e) = relay.sweep_stale_threads().await {
                error!(error = %e, "Age sweep failed");
            }
        })
    })
    .map_err(|e| anyhow!("failed to create sweep job: {e:?}"))?;

    scheduler
        .add(sync_job)
        .await
        .map_err(|e| anyhow!("failed to add sync job: {e:?}"))?;
    scheduler
        .add(sweep_job)
        .await
        .map_err(|e| anyhow!("failed to add sweep job: {e:?}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("failed to start scheduler: {e:?}"))?;

    info!(
        sync_interval_secs = sync_interval.as_secs(),
        sweep_interval_secs = sweep_interval.as_secs(),
        "Scheduled jobs started"
    );
    Ok(scheduler)
}

pub async fn stop(scheduler: &mut JobScheduler) {
    if let Err(e) = scheduler.shutdown().await {
        error!(error = ?e, "Failed to stop scheduler");
    }
}
