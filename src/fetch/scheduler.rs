use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use croner::Cron;

use super::FetchService;

/// Whether a run is due at `now` given the last run (or service start)
fn is_due(cron: &Cron, reference: &DateTime<Utc>, now: &DateTime<Utc>) -> bool {
    match cron.find_next_occurrence(reference, false) {
        Ok(next) => next <= *now,
        Err(_) => false,
    }
}

/// Start the cron scheduler that batch-fetches the whole inventory.
/// Fails fast on an invalid expression.
pub fn start_scheduler(svc: Arc<FetchService>, schedule: &str) -> Result<()> {
    let cron = Cron::new(schedule)
        .parse()
        .map_err(|e| anyhow!("invalid FETCH_SCHEDULE '{}': {}", schedule, e))?;

    tracing::info!("Scheduled fetch enabled: '{}'", schedule);

    tokio::spawn(async move {
        let mut last_run = Utc::now();
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;

            let now = Utc::now();
            if !is_due(&cron, &last_run, &now) {
                continue;
            }
            last_run = now;

            let devices = match svc.store().list_devices().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!("Scheduler: failed to list devices: {}", e);
                    continue;
                }
            };

            tracing::info!("Scheduler: fetching {} devices", devices.len());
            let batch = svc.batch_fetch(devices, false).await;
            tracing::info!("Scheduler: {}", batch.message);
        }
    });

    Ok(())
}
