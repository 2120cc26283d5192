use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device represents a network device tracked by the CMDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub hostname: String,
    pub address: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub device_type: String, // vendor tag, e.g. hp_comware, f5_bigip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CreateDeviceRequest for creating new devices
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeviceRequest {
    pub hostname: String,
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub device_type: String,
}

/// UpdateDeviceRequest for updating devices.
/// An omitted or empty password keeps the stored one.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDeviceRequest {
    pub hostname: String,
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub device_type: String,
}

/// Outcome of a CSV inventory import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}
