use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Pool, Row, Sqlite};

use crate::extract::Decomposition;
use crate::models::*;

use super::entities::EntityRepo;
use super::row_helpers::map_snapshot_row;

const SELECT_SNAPSHOT: &str = r#"
    SELECT s.id, s.device_id, d.hostname AS device, s.config_text, s.config_json,
           s.parse_error, s.is_latest, s.created_at
    FROM config_snapshots s
    JOIN devices d ON d.id = s.device_id
"#;

/// Config snapshot database operations
pub struct SnapshotRepo;

impl SnapshotRepo {
    /// Insert a snapshot as the device's latest and write its sub-entities.
    ///
    /// The previous latest row is cleared first, inside the same transaction,
    /// so the write lock is taken before anything else and the partial unique
    /// index never sees two latest rows.
    pub async fn record(
        pool: &Pool<Sqlite>,
        device_id: i64,
        config_text: &str,
        config_json: Option<&Value>,
        decomposition: Option<&Decomposition>,
        parse_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let json_text = config_json.map(serde_json::to_string).transpose()?;
        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE config_snapshots SET is_latest = 0 WHERE device_id = ? AND is_latest = 1")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        let snapshot_id = sqlx::query(
            r#"
            INSERT INTO config_snapshots (device_id, config_text, config_json, parse_error, is_latest, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(device_id)
        .bind(config_text)
        .bind(json_text)
        .bind(parse_error)
        .bind(at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert config snapshot")?
        .last_insert_rowid();

        if let Some(d) = decomposition {
            EntityRepo::insert_all(&mut *tx, snapshot_id, d)
                .await
                .context("Failed to insert config sub-entities")?;
        }

        tx.commit().await?;
        Ok(snapshot_id)
    }

    /// The fields the dedup check compares against
    pub async fn latest(pool: &Pool<Sqlite>, device_id: i64) -> Result<Option<LatestSnapshot>> {
        let row = sqlx::query(
            "SELECT id, config_text, parse_error, created_at FROM config_snapshots WHERE device_id = ? AND is_latest = 1",
        )
        .bind(device_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| LatestSnapshot {
            id: r.get("id"),
            config_text: r.get("config_text"),
            parse_error: r.get("parse_error"),
            time: r.get("created_at"),
        }))
    }

    pub async fn latest_full(pool: &Pool<Sqlite>, device_id: i64) -> Result<Option<ConfigSnapshot>> {
        let row = sqlx::query(&format!("{} WHERE s.device_id = ? AND s.is_latest = 1", SELECT_SNAPSHOT))
            .bind(device_id)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_snapshot_row))
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<ConfigSnapshot>> {
        let row = sqlx::query(&format!("{} WHERE s.id = ?", SELECT_SNAPSHOT))
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_snapshot_row))
    }

    pub async fn list(pool: &Pool<Sqlite>, device_id: Option<i64>, limit: i32, offset: i32) -> Result<Vec<ConfigSnapshot>> {
        let rows = sqlx::query(&format!(
            "{} WHERE (? IS NULL OR s.device_id = ?) ORDER BY s.created_at DESC, s.id DESC LIMIT ? OFFSET ?",
            SELECT_SNAPSHOT
        ))
        .bind(device_id)
        .bind(device_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(map_snapshot_row).collect())
    }

    /// Newest first
    pub async fn history(pool: &Pool<Sqlite>, device_id: i64) -> Result<Vec<SnapshotSummary>> {
        let rows = sqlx::query(
            "SELECT id, created_at FROM config_snapshots WHERE device_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(device_id)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| SnapshotSummary {
                id: r.get("id"),
                time: r.get("created_at"),
            })
            .collect())
    }

    /// Delete a snapshot with its sub-entities. If it was the latest, the most
    /// recent remaining snapshot of the device becomes latest.
    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let mut tx = pool.begin().await?;

        let row = sqlx::query("DELETE FROM config_snapshots WHERE id = ? RETURNING device_id, is_latest")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| super::NotFoundError::new("Config", &id.to_string()))?;
        let device_id: i64 = row.get("device_id");
        let was_latest: bool = row.get("is_latest");

        if was_latest {
            sqlx::query(
                r#"
                UPDATE config_snapshots SET is_latest = 1
                WHERE id = (SELECT id FROM config_snapshots WHERE device_id = ?
                            ORDER BY created_at DESC, id DESC LIMIT 1)
                "#,
            )
            .bind(device_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn device_of(pool: &Pool<Sqlite>, id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT device_id FROM config_snapshots WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|(device_id,)| device_id))
    }

    #[cfg(test)]
    pub async fn count_latest(pool: &Pool<Sqlite>, device_id: i64) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM config_snapshots WHERE device_id = ? AND is_latest = 1")
                .bind(device_id)
                .fetch_one(pool)
                .await?;
        Ok(count.0)
    }

    #[cfg(test)]
    pub async fn count_for_device(pool: &Pool<Sqlite>, device_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM config_snapshots WHERE device_id = ?")
            .bind(device_id)
            .fetch_one(pool)
            .await?;
        Ok(count.0)
    }

    #[cfg(test)]
    pub async fn set_created_at(pool: &Pool<Sqlite>, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE config_snapshots SET created_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
