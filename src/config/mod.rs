use std::env;
use std::time::Duration;

use crate::fetch::FetchPolicy;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub db_max_connections: u32,
    pub listen_addr: String,
    pub templates_dir: String,
    /// `tag=file` overrides for the vendor template map
    pub template_map: String,
    pub fetch_timeout_secs: u64,
    pub ssh_connect_timeout_secs: u64,
    pub fetch_max_in_flight: usize,
    pub freshness_window_hours: i64,
    /// Cron expression for inventory-wide fetches; empty disables it
    pub fetch_schedule: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            db_path: get_env("DB_PATH", "/data/netcmdb.db"),
            db_max_connections: get_env("DB_MAX_CONNECTIONS", "5").parse().unwrap_or(5),
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0:8080"),
            templates_dir: get_env("TEMPLATES_DIR", "./templates"),
            template_map: get_env("TEMPLATE_MAP", ""),
            fetch_timeout_secs: get_env("FETCH_TIMEOUT_SECS", "60").parse().unwrap_or(60),
            ssh_connect_timeout_secs: get_env("SSH_CONNECT_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            fetch_max_in_flight: get_env("FETCH_MAX_IN_FLIGHT", "16").parse().unwrap_or(16),
            freshness_window_hours: get_env("FRESHNESS_WINDOW_HOURS", "24").parse().unwrap_or(24),
            fetch_schedule: get_env("FETCH_SCHEDULE", ""),
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            freshness: chrono::Duration::hours(self.freshness_window_hours),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_in_flight: self.fetch_max_in_flight.max(1),
        }
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
