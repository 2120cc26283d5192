//! Fetch service: transport -> dedup -> extract -> record, per device and in batches.

mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::OwnedMutexGuard;

use crate::db::Store;
use crate::extract::{decompose, DecomposeConflict, ExtractError, Extractor};
use crate::models::*;
use crate::transport::{DeviceTarget, Transport, TransportError};

pub use scheduler::start_scheduler;

/// Tunables for fetching and dedup
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Unchanged text younger than this is not stored again
    pub freshness: chrono::Duration,
    /// Deadline for one transport fetch
    pub fetch_timeout: Duration,
    /// Devices fetched concurrently by a batch
    pub max_in_flight: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            freshness: chrono::Duration::hours(24),
            fetch_timeout: Duration::from_secs(60),
            max_in_flight: 16,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Raw text was kept as snapshot `snapshot_id` without structured data
    #[error("{source} (raw configuration kept as snapshot {snapshot_id})")]
    Extract { snapshot_id: i64, source: ExtractError },
    /// Snapshot `snapshot_id` was kept without sub-entities
    #[error("{source} (snapshot {snapshot_id} kept without sub-entities)")]
    Decompose { snapshot_id: i64, source: DecomposeConflict },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FetchError {
    /// Snapshot persisted despite the failure, if any
    pub fn saved_snapshot(&self) -> Option<i64> {
        match self {
            Self::Extract { snapshot_id, .. } | Self::Decompose { snapshot_id, .. } => Some(*snapshot_id),
            _ => None,
        }
    }
}

/// Result of a successful fetch-and-record
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub saved: bool,
    pub snapshot_id: i64,
    pub message: String,
}

/// One async mutex per device, created on first use. Entries nobody holds
/// or waits on are dropped on the next acquire.
#[derive(Default)]
pub struct DeviceLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceLocks {
    pub async fn acquire(&self, device_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Holders and waiters keep a clone, so a count of 1 means idle
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(device_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Whether freshly fetched `raw` warrants a new snapshot. A latest snapshot
/// that failed extraction or decomposition never counts as a match, so the
/// same text is run through the pipeline again.
pub fn should_record(
    latest: Option<&LatestSnapshot>,
    raw: &str,
    now: DateTime<Utc>,
    freshness: chrono::Duration,
    force: bool,
) -> bool {
    match latest {
        _ if force => true,
        None => true,
        Some(latest) => {
            latest.parse_error.is_some() || latest.config_text != raw || now - latest.time >= freshness
        }
    }
}

/// Fetch service pulls configs from devices and records them as snapshots
pub struct FetchService {
    store: Store,
    transport: Arc<dyn Transport>,
    extractor: Extractor,
    locks: DeviceLocks,
    policy: FetchPolicy,
}

impl FetchService {
    pub fn new(store: Store, transport: Arc<dyn Transport>, extractor: Extractor, policy: FetchPolicy) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            extractor,
            locks: DeviceLocks::default(),
            policy,
        })
    }

    /// Pull the configuration off `device` and record it
    pub async fn fetch_device(&self, device: &Device, force: bool) -> Result<FetchOutcome, FetchError> {
        let target = DeviceTarget::from(device);
        let fetched = tokio::time::timeout(self.policy.fetch_timeout, self.transport.fetch(&target))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout {
                    host: device.hostname.clone(),
                    secs: self.policy.fetch_timeout.as_secs(),
                })
            });

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Fetch failed for {}: {}", device.hostname, e);
                if let Err(e) = self.store.mark_device_connect_failed(device.id).await {
                    tracing::warn!("Failed to record connect failure for {}: {}", device.hostname, e);
                }
                return Err(e.into());
            }
        };

        if device.connect_failed_at.is_some() {
            if let Err(e) = self.store.clear_device_connect_failed(device.id).await {
                tracing::warn!("Failed to clear connect failure for {}: {}", device.hostname, e);
            }
        }

        tracing::debug!("Fetched {} bytes from {}", raw.len(), device.hostname);
        self.ingest(device, &raw, force).await
    }

    /// Dedup, extract and record `raw` for `device`.
    ///
    /// Holds the device lock from reading the latest snapshot until the new
    /// one is committed.
    pub async fn ingest(&self, device: &Device, raw: &str, force: bool) -> Result<FetchOutcome, FetchError> {
        let _guard = self.locks.acquire(device.id).await;
        let now = Utc::now();

        let latest = self.store.latest_snapshot(device.id).await?;
        if let Some(latest) = latest.as_ref() {
            if !should_record(Some(latest), raw, now, self.policy.freshness, force) {
                tracing::info!("Config of {} unchanged, keeping snapshot {}", device.hostname, latest.id);
                return Ok(FetchOutcome {
                    saved: false,
                    snapshot_id: latest.id,
                    message: format!(
                        "configuration unchanged since {}, kept snapshot {}",
                        latest.time.to_rfc3339(),
                        latest.id
                    ),
                });
            }
        }

        let record = match self.extractor.extract(raw, &device.device_type) {
            Ok(record) => record,
            Err(source) => {
                let snapshot_id = self
                    .store
                    .record_snapshot(device.id, raw, None, None, Some(&source.to_string()), now)
                    .await?;
                tracing::warn!("Extraction failed for {}: {}", device.hostname, source);
                return Err(FetchError::Extract { snapshot_id, source });
            }
        };

        let parts = match decompose(&record) {
            Ok(parts) => parts,
            Err(source) => {
                let snapshot_id = self
                    .store
                    .record_snapshot(device.id, raw, Some(&record), None, Some(&source.to_string()), now)
                    .await?;
                tracing::warn!("Decomposition failed for {}: {}", device.hostname, source);
                return Err(FetchError::Decompose { snapshot_id, source });
            }
        };

        if parts.is_empty() {
            tracing::debug!("No sub-entities found in config of {}", device.hostname);
        }
        let snapshot_id = self
            .store
            .record_snapshot(device.id, raw, Some(&record), Some(&parts), None, now)
            .await?;
        tracing::info!(
            "Recorded snapshot {} for {} ({} rows)",
            snapshot_id,
            device.hostname,
            parts.row_count()
        );

        Ok(FetchOutcome {
            saved: true,
            snapshot_id,
            message: format!("configuration saved as snapshot {}", snapshot_id),
        })
    }

    /// Fetch every device, at most `max_in_flight` at a time. Each device runs
    /// in its own task; results keep the input order.
    pub async fn batch_fetch(self: &Arc<Self>, devices: Vec<Device>, force: bool) -> BatchResult {
        tracing::info!("Batch fetch of {} devices", devices.len());

        let results = stream::iter(devices.into_iter().map(|device| {
            let svc = self.clone();
            async move {
                let device_id = device.id;
                let hostname = device.hostname.clone();
                let handle = tokio::spawn(async move { svc.fetch_device(&device, force).await });
                match handle.await {
                    Ok(result) => device_result(device_id, hostname, result),
                    Err(e) => {
                        tracing::error!("Fetch task for {} aborted: {}", hostname, e);
                        DeviceFetchResult {
                            device_id,
                            hostname,
                            success: false,
                            message: format!("fetch task aborted: {}", e),
                            saved: false,
                            config_id: None,
                        }
                    }
                }
            }
        }))
        .buffered(self.policy.max_in_flight.max(1))
        .collect::<Vec<_>>()
        .await;

        let batch = BatchResult::from_results(results);
        tracing::info!(
            "Batch fetch done: {} succeeded, {} failed",
            batch.success_count,
            batch.failed_count
        );
        batch
    }

    /// Delete a snapshot under the device lock so promotion can't race a fetch
    pub async fn delete_snapshot(&self, snapshot_id: i64) -> anyhow::Result<()> {
        let device_id = self
            .store
            .snapshot_device(snapshot_id)
            .await?
            .ok_or_else(|| crate::db::NotFoundError::new("Config", &snapshot_id.to_string()))?;
        let _guard = self.locks.acquire(device_id).await;
        self.store.delete_snapshot(snapshot_id).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

fn device_result(device_id: i64, hostname: String, result: Result<FetchOutcome, FetchError>) -> DeviceFetchResult {
    match result {
        Ok(outcome) => DeviceFetchResult {
            device_id,
            hostname,
            success: true,
            message: outcome.message,
            saved: outcome.saved,
            config_id: Some(outcome.snapshot_id),
        },
        Err(e) => DeviceFetchResult {
            device_id,
            hostname,
            success: false,
            message: e.to_string(),
            saved: e.saved_snapshot().is_some(),
            config_id: e.saved_snapshot(),
        },
    }
}
