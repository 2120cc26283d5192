use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_device_row;

const SELECT_DEVICE: &str = r#"
    SELECT id, hostname, address, username, password, device_type,
           connect_failed_at, created_at, updated_at
    FROM devices
"#;

/// Device database operations
pub struct DeviceRepo;

impl DeviceRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!("{} ORDER BY hostname", SELECT_DEVICE))
            .fetch_all(pool)
            .await?;

        Ok(rows.iter().map(map_device_row).collect())
    }

    pub async fn list_paged(pool: &Pool<Sqlite>, limit: i32, offset: i32) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!("{} ORDER BY hostname LIMIT ? OFFSET ?", SELECT_DEVICE))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        Ok(rows.iter().map(map_device_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_DEVICE))
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_device_row))
    }

    pub async fn get_by_hostname(pool: &Pool<Sqlite>, hostname: &str) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{} WHERE hostname = ?", SELECT_DEVICE))
            .bind(hostname)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_device_row))
    }

    /// Devices in the order of `ids`; unknown ids are skipped
    pub async fn get_many(pool: &Pool<Sqlite>, ids: &[i64]) -> Result<Vec<Device>> {
        let mut devices = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(device) = Self::get(pool, id).await? {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    pub async fn create(pool: &Pool<Sqlite>, req: &CreateDeviceRequest) -> Result<Device> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO devices (hostname, address, username, password, device_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.hostname)
        .bind(&req.address)
        .bind(&req.username)
        .bind(&req.password)
        .bind(&req.device_type)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, result.last_insert_rowid())
            .await?
            .context("Device not found after creation")
    }

    pub async fn update(pool: &Pool<Sqlite>, id: i64, req: &UpdateDeviceRequest) -> Result<Device> {
        let now = Utc::now();
        let password = req.password.clone().filter(|p| !p.is_empty());
        let result = sqlx::query(
            r#"
            UPDATE devices SET hostname = ?, address = ?, username = ?,
                              password = COALESCE(?, password), device_type = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.hostname)
        .bind(&req.address)
        .bind(&req.username)
        .bind(password)
        .bind(&req.device_type)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Device", &id.to_string()).into());
        }

        Self::get(pool, id)
            .await?
            .context("Device not found after update")
    }

    /// Snapshots and their sub-entities go with the device
    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Device", &id.to_string()).into());
        }
        Ok(())
    }

    pub async fn set_connect_failed(pool: &Pool<Sqlite>, id: i64, at: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE devices SET connect_failed_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
