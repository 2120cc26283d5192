mod devices;
mod entities;
pub(crate) mod row_helpers;
mod snapshots;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::extract::Decomposition;
use crate::models::*;

use devices::DeviceRepo;
use entities::EntityRepo;
use snapshots::SnapshotRepo;

/// Typed error for "resource not found", downcast by the API error handler
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Whether `err` was caused by a UNIQUE constraint, e.g. a hostname taken
/// between the duplicate check and the insert
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

/// Store handles all database operations, delegating to per-entity repo modules.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Create a new database store with a specific pool size.
    /// File databases run in WAL mode so readers don't block the fetch writers.
    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, one connection so every query sees the same data
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Current SQLite journal mode, e.g. "wal"
    pub async fn journal_mode(&self) -> Result<String> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode)
    }

    // ========== Device Operations ==========

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        DeviceRepo::list(&self.pool).await
    }

    pub async fn list_devices_paged(&self, limit: i32, offset: i32) -> Result<Vec<Device>> {
        DeviceRepo::list_paged(&self.pool, limit, offset).await
    }

    pub async fn get_device(&self, id: i64) -> Result<Option<Device>> {
        DeviceRepo::get(&self.pool, id).await
    }

    pub async fn get_device_by_hostname(&self, hostname: &str) -> Result<Option<Device>> {
        DeviceRepo::get_by_hostname(&self.pool, hostname).await
    }

    pub async fn get_devices(&self, ids: &[i64]) -> Result<Vec<Device>> {
        DeviceRepo::get_many(&self.pool, ids).await
    }

    pub async fn create_device(&self, req: &CreateDeviceRequest) -> Result<Device> {
        DeviceRepo::create(&self.pool, req).await
    }

    pub async fn update_device(&self, id: i64, req: &UpdateDeviceRequest) -> Result<Device> {
        DeviceRepo::update(&self.pool, id, req).await
    }

    pub async fn delete_device(&self, id: i64) -> Result<()> {
        DeviceRepo::delete(&self.pool, id).await
    }

    pub async fn mark_device_connect_failed(&self, id: i64) -> Result<()> {
        DeviceRepo::set_connect_failed(&self.pool, id, Some(Utc::now())).await
    }

    pub async fn clear_device_connect_failed(&self, id: i64) -> Result<()> {
        DeviceRepo::set_connect_failed(&self.pool, id, None).await
    }

    // ========== Snapshot Operations ==========

    pub async fn record_snapshot(
        &self,
        device_id: i64,
        config_text: &str,
        config_json: Option<&Value>,
        decomposition: Option<&Decomposition>,
        parse_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        SnapshotRepo::record(&self.pool, device_id, config_text, config_json, decomposition, parse_error, at).await
    }

    pub async fn latest_snapshot(&self, device_id: i64) -> Result<Option<LatestSnapshot>> {
        SnapshotRepo::latest(&self.pool, device_id).await
    }

    pub async fn latest_config(&self, device_id: i64) -> Result<Option<ConfigSnapshot>> {
        SnapshotRepo::latest_full(&self.pool, device_id).await
    }

    pub async fn get_snapshot(&self, id: i64) -> Result<Option<ConfigSnapshot>> {
        SnapshotRepo::get(&self.pool, id).await
    }

    pub async fn list_snapshots(&self, device_id: Option<i64>, limit: i32, offset: i32) -> Result<Vec<ConfigSnapshot>> {
        SnapshotRepo::list(&self.pool, device_id, limit, offset).await
    }

    pub async fn snapshot_history(&self, device_id: i64) -> Result<Vec<SnapshotSummary>> {
        SnapshotRepo::history(&self.pool, device_id).await
    }

    pub async fn snapshot_device(&self, id: i64) -> Result<Option<i64>> {
        SnapshotRepo::device_of(&self.pool, id).await
    }

    pub async fn delete_snapshot(&self, id: i64) -> Result<()> {
        SnapshotRepo::delete(&self.pool, id).await
    }

    #[cfg(test)]
    pub async fn count_latest_snapshots(&self, device_id: i64) -> Result<i64> {
        SnapshotRepo::count_latest(&self.pool, device_id).await
    }

    #[cfg(test)]
    pub async fn count_snapshots(&self, device_id: i64) -> Result<i64> {
        SnapshotRepo::count_for_device(&self.pool, device_id).await
    }

    #[cfg(test)]
    pub async fn set_snapshot_time(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        SnapshotRepo::set_created_at(&self.pool, id, at).await
    }

    // ========== Sub-entity Operations ==========

    pub async fn list_interfaces(&self, q: &EntityQuery) -> Result<Vec<InterfaceRow>> {
        EntityRepo::list_interfaces(&self.pool, q).await
    }

    pub async fn list_virtuals(&self, q: &EntityQuery) -> Result<Vec<EntityRow<VirtualServerRecord>>> {
        EntityRepo::list_virtuals(&self.pool, q).await
    }

    pub async fn list_pools(&self, q: &EntityQuery) -> Result<Vec<EntityRow<PoolRecord>>> {
        EntityRepo::list_pools(&self.pool, q).await
    }

    pub async fn list_nodes(&self, q: &EntityQuery) -> Result<Vec<EntityRow<NodeRecord>>> {
        EntityRepo::list_nodes(&self.pool, q).await
    }

    pub async fn list_profiles(&self, q: &EntityQuery) -> Result<Vec<EntityRow<TypedObjectRecord>>> {
        EntityRepo::list_profiles(&self.pool, q).await
    }

    pub async fn list_rules(&self, q: &EntityQuery) -> Result<Vec<EntityRow<RuleRecord>>> {
        EntityRepo::list_rules(&self.pool, q).await
    }

    pub async fn list_persistence(&self, q: &EntityQuery) -> Result<Vec<EntityRow<TypedObjectRecord>>> {
        EntityRepo::list_persistence(&self.pool, q).await
    }

    pub async fn list_snat_pools(&self, q: &EntityQuery) -> Result<Vec<EntityRow<SnatPoolRecord>>> {
        EntityRepo::list_snat_pools(&self.pool, q).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::decompose;
    use serde_json::json;

    async fn device(store: &Store, hostname: &str, device_type: &str) -> Device {
        store
            .create_device(&CreateDeviceRequest {
                hostname: hostname.to_string(),
                address: "192.0.2.10".to_string(),
                username: "admin".to_string(),
                password: "secret".to_string(),
                device_type: device_type.to_string(),
            })
            .await
            .expect("create device")
    }

    fn lb_record() -> Value {
        json!({
            "virtuals": [
                {"name": "/Common/vs_a", "pool": "/Common/web", "profiles": [{"name": "/Common/tcp"}, {"name": "/Common/http"}]},
                {"name": "/Common/vs_b", "rules": {"name": "/Common/redirect"}}
            ],
            "pools": {
                "name": "/Common/web",
                "members": [{"name": "/Common/a:80", "address": "10.0.0.1"}, {"name": "/Common/b:80"}]
            },
            "nodes": {"name": "/Common/a", "address": "10.0.0.1"},
            "profiles": {"name": "/Common/http_xff", "type": "http", "defaults_from": "/Common/http"},
            "rules": {"name": "/Common/redirect"},
            "persistence": {"name": "/Common/cookie", "type": "cookie"},
            "snatpools": {"name": "/Common/snat", "members": "/Common/192.0.2.1"}
        })
    }

    #[tokio::test]
    async fn test_duplicate_hostname_is_unique_violation() {
        let store = Store::in_memory().await.unwrap();
        device(&store, "sw1", "hp_comware").await;

        let err = store
            .create_device(&CreateDeviceRequest {
                hostname: "sw1".to_string(),
                address: "192.0.2.11".to_string(),
                username: String::new(),
                password: String::new(),
                device_type: "hp_comware".to_string(),
            })
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(is_unique_violation(&err.context("import row 2")));

        let missing = store.delete_device(9999).await.unwrap_err();
        assert!(!is_unique_violation(&missing));
    }

    #[tokio::test]
    async fn test_device_crud() {
        let store = Store::in_memory().await.expect("store");
        let d = device(&store, "sw1", "hp_comware").await;
        assert_eq!(store.get_device_by_hostname("sw1").await.unwrap().map(|d| d.id), Some(d.id));

        let updated = store
            .update_device(
                d.id,
                &UpdateDeviceRequest {
                    hostname: "sw1-renamed".to_string(),
                    address: "192.0.2.11".to_string(),
                    username: "ops".to_string(),
                    password: None,
                    device_type: "hp_comware".to_string(),
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.hostname, "sw1-renamed");
        assert_eq!(updated.password, "secret");

        store.delete_device(d.id).await.expect("delete");
        let err = store.delete_device(d.id).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_record_flips_latest() {
        let store = Store::in_memory().await.expect("store");
        let d = device(&store, "sw1", "hp_comware").await;

        let first = store.record_snapshot(d.id, "one", None, None, None, Utc::now()).await.unwrap();
        let second = store.record_snapshot(d.id, "two", None, None, None, Utc::now()).await.unwrap();

        assert_eq!(store.count_latest_snapshots(d.id).await.unwrap(), 1);
        assert_eq!(store.latest_snapshot(d.id).await.unwrap().map(|s| s.id), Some(second));
        assert!(!store.get_snapshot(first).await.unwrap().unwrap().is_latest);

        let history = store.snapshot_history(d.id).await.unwrap();
        assert_eq!(history.iter().map(|h| h.id).collect::<Vec<_>>(), vec![second, first]);
    }

    #[tokio::test]
    async fn test_entities_round_trip_and_filters() {
        let store = Store::in_memory().await.expect("store");
        let d = device(&store, "lb1", "f5_bigip").await;
        let record = lb_record();
        let parts = decompose(&record).expect("decompose");

        let old = store.record_snapshot(d.id, "old", Some(&record), Some(&parts), None, Utc::now()).await.unwrap();
        let new = store.record_snapshot(d.id, "new", Some(&record), Some(&parts), None, Utc::now()).await.unwrap();

        let all = store.list_virtuals(&EntityQuery::default()).await.unwrap();
        assert_eq!(all.len(), 4);

        let latest = store
            .list_virtuals(&EntityQuery { latest: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|v| v.owner.config_id == new));
        let vs_a = latest.iter().find(|v| v.record.name == "/Common/vs_a").unwrap();
        assert_eq!(vs_a.record.profiles, vec!["/Common/tcp", "/Common/http"]);
        assert_eq!(vs_a.owner.device_name, "lb1");

        let pools = store
            .list_pools(&EntityQuery { config: Some(old), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].record.members.len(), 2);
        assert_eq!(pools[0].record.members[0].address.as_deref(), Some("10.0.0.1"));

        let q = EntityQuery { config: Some(new), ..Default::default() };
        assert_eq!(store.list_nodes(&q).await.unwrap().len(), 1);
        assert_eq!(store.list_rules(&q).await.unwrap().len(), 1);
        assert_eq!(store.list_persistence(&q).await.unwrap()[0].record.kind.as_deref(), Some("cookie"));
        assert_eq!(store.list_snat_pools(&q).await.unwrap()[0].record.members, vec!["/Common/192.0.2.1"]);
        let profiles = store.list_profiles(&q).await.unwrap();
        assert_eq!(profiles[0].record.raw["defaults_from"], json!("/Common/http"));

        let paged = store
            .list_virtuals(&EntityQuery { limit: Some(1), offset: Some(1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn test_interface_rows_carry_cidr() {
        let store = Store::in_memory().await.expect("store");
        let d = device(&store, "sw1", "hp_comware").await;
        let record = json!({"interfaces": {"interface": "Vlan-interface10", "ip_address": "10.1.0.1", "subnet_mask": "255.255.255.0", "enabled": true}});
        let parts = decompose(&record).unwrap();
        store.record_snapshot(d.id, "cfg", Some(&record), Some(&parts), None, Utc::now()).await.unwrap();

        let rows = store
            .list_interfaces(&EntityQuery { device: Some(d.id), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].record.enabled);
        assert_eq!(rows[0].if_address.as_deref(), Some("10.1.0.1/24"));
    }

    #[tokio::test]
    async fn test_delete_snapshot_cascades_and_promotes() {
        let store = Store::in_memory().await.expect("store");
        let d = device(&store, "lb1", "f5").await;
        let record = lb_record();
        let parts = decompose(&record).unwrap();

        let first = store.record_snapshot(d.id, "a", Some(&record), Some(&parts), None, Utc::now()).await.unwrap();
        let second = store.record_snapshot(d.id, "b", Some(&record), Some(&parts), None, Utc::now()).await.unwrap();

        store.delete_snapshot(second).await.expect("delete");
        assert_eq!(store.latest_snapshot(d.id).await.unwrap().map(|s| s.id), Some(first));
        let q = EntityQuery { config: Some(second), ..Default::default() };
        assert!(store.list_virtuals(&q).await.unwrap().is_empty());
        assert!(store.list_pools(&q).await.unwrap().is_empty());

        let err = store.delete_snapshot(second).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());

        store.delete_device(d.id).await.unwrap();
        assert!(store.list_virtuals(&EntityQuery::default()).await.unwrap().is_empty());
        assert_eq!(store.count_snapshots(d.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_index_rejects_second_latest() {
        let store = Store::in_memory().await.expect("store");
        let d = device(&store, "sw1", "hp_comware").await;
        store.record_snapshot(d.id, "a", None, None, None, Utc::now()).await.unwrap();

        let direct = sqlx::query(
            "INSERT INTO config_snapshots (device_id, config_text, is_latest, created_at) VALUES (?, 'x', 1, ?)",
        )
        .bind(d.id)
        .bind(Utc::now())
        .execute(&store.pool)
        .await;
        assert!(direct.is_err());
    }
}
