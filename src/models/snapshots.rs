use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ConfigSnapshot is one fetched configuration of a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub id: i64,
    pub device_id: i64,
    /// Hostname of the owning device
    pub device: String,
    pub config_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub is_latest: bool,
    pub time: DateTime<Utc>,
}

/// History entry: snapshot id and when it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: i64,
    pub time: DateTime<Utc>,
}

/// Fields the dedup check needs from the current latest snapshot
#[derive(Debug, Clone)]
pub struct LatestSnapshot {
    pub id: i64,
    pub config_text: String,
    pub parse_error: Option<String>,
    pub time: DateTime<Utc>,
}

/// Query parameters for listing snapshots
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    /// Device id filter
    #[serde(default)]
    pub device: Option<i64>,
    #[serde(default)]
    pub limit: Option<i32>,
    #[serde(default)]
    pub offset: Option<i32>,
}

/// Manual upload of a configuration text for a device
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfigRequest {
    pub device_id: i64,
    pub config_text: String,
    #[serde(default)]
    pub force: bool,
}

/// Optional body of the single-device fetch endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchRequest {
    #[serde(default)]
    pub force: bool,
}

/// Body of the batch fetch endpoint. An empty id list means every device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchFetchRequest {
    #[serde(default)]
    pub device_ids: Vec<i64>,
    #[serde(default)]
    pub force: bool,
}

/// FetchResponse is returned by single-device fetch and upload endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub success: bool,
    pub message: String,
    pub saved: bool,
    pub config: Option<ConfigSnapshot>,
}

/// Per-device entry of a batch fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFetchResult {
    pub device_id: i64,
    pub hostname: String,
    pub success: bool,
    pub message: String,
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_id: Option<i64>,
}

/// BatchResult aggregates a batch fetch. Counts always partition `results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    pub message: String,
    pub total_devices: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<DeviceFetchResult>,
}

impl BatchResult {
    /// Build the aggregate from ordered per-device results
    pub fn from_results(results: Vec<DeviceFetchResult>) -> Self {
        let total_devices = results.len();
        let success_count = results.iter().filter(|r| r.success).count();
        let failed_count = total_devices - success_count;
        Self {
            success: true,
            message: format!(
                "fetched {} devices: {} succeeded, {} failed",
                total_devices, success_count, failed_count
            ),
            total_devices,
            success_count,
            failed_count,
            results,
        }
    }
}

/// Response wrapper for latest-config and history lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLookupResponse<T> {
    pub success: bool,
    pub message: String,
    pub config: Option<T>,
}
