use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::fetch::{FetchError, FetchOutcome};
use crate::models::*;
use crate::AppState;

use super::{ApiError, ApiResponse, MessageResponse};

async fn require_device(state: &AppState, id: i64) -> Result<Device, ApiError> {
    state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("device"))
}

/// Turn a fetch result into the response body. Failures that still stored a
/// snapshot report it alongside the error status.
async fn fetch_response(
    state: &AppState,
    result: Result<FetchOutcome, FetchError>,
) -> Result<(StatusCode, Json<FetchResponse>), ApiError> {
    match result {
        Ok(outcome) => {
            let config = state.store.get_snapshot(outcome.snapshot_id).await?;
            Ok((
                StatusCode::OK,
                Json(FetchResponse {
                    success: true,
                    message: outcome.message,
                    saved: outcome.saved,
                    config,
                }),
            ))
        }
        Err(e) => match e.saved_snapshot() {
            Some(snapshot_id) => {
                let config = state.store.get_snapshot(snapshot_id).await?;
                let message = e.to_string();
                let status = ApiError::from(e).status();
                Ok((
                    status,
                    Json(FetchResponse {
                        success: false,
                        message,
                        saved: true,
                        config,
                    }),
                ))
            }
            None => Err(e.into()),
        },
    }
}

/// Fetch the running configuration of one device and record it
pub async fn fetch_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<FetchRequest>>,
) -> Result<(StatusCode, Json<FetchResponse>), ApiError> {
    let force = body.map(|Json(req)| req.force).unwrap_or(false);
    let device = require_device(&state, id).await?;

    let result = state.fetch_service.fetch_device(&device, force).await;
    fetch_response(&state, result).await
}

/// Fetch several devices; an empty id list fetches the whole inventory
pub async fn batch_fetch(
    State(state): State<Arc<AppState>>,
    body: Option<Json<BatchFetchRequest>>,
) -> Result<Json<BatchResult>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let devices = if req.device_ids.is_empty() {
        state.store.list_devices().await?
    } else {
        let devices = state.store.get_devices(&req.device_ids).await?;
        if devices.is_empty() {
            return Err(ApiError::not_found("devices"));
        }
        devices
    };

    let batch = state.fetch_service.batch_fetch(devices, req.force).await;
    Ok(Json(batch))
}

/// Latest snapshot of a device
pub async fn get_latest_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ConfigLookupResponse<ConfigSnapshot>>, ApiError> {
    let device = require_device(&state, id).await?;
    let config = state
        .store
        .latest_config(device.id)
        .await?
        .ok_or_else(|| ApiError::not_found("configuration"))?;

    Ok(Json(ConfigLookupResponse {
        success: true,
        message: format!("latest configuration of {}", device.hostname),
        config: Some(config),
    }))
}

/// Snapshot history of a device, newest first
pub async fn get_config_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ConfigLookupResponse<Vec<SnapshotSummary>>>, ApiError> {
    let device = require_device(&state, id).await?;
    let history = state.store.snapshot_history(device.id).await?;

    Ok(Json(ConfigLookupResponse {
        success: true,
        message: format!("{} snapshots of {}", history.len(), device.hostname),
        config: Some(history),
    }))
}

/// List snapshots, optionally for one device
pub async fn list_configs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<ApiResponse<Vec<ConfigSnapshot>>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);
    let configs = state.store.list_snapshots(query.device, limit, offset).await?;
    Ok(ApiResponse::ok(format!("{} snapshots", configs.len()), configs))
}

/// Record a configuration text supplied by the client
pub async fn upload_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadConfigRequest>,
) -> Result<(StatusCode, Json<FetchResponse>), ApiError> {
    if req.config_text.trim().is_empty() {
        return Err(ApiError::bad_request("config_text is required"));
    }
    let device = require_device(&state, req.device_id).await?;

    let result = state
        .fetch_service
        .ingest(&device, &req.config_text, req.force)
        .await;
    fetch_response(&state, result).await
}

/// Get a single snapshot
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ConfigSnapshot>>, ApiError> {
    let config = state
        .store
        .get_snapshot(id)
        .await?
        .ok_or_else(|| ApiError::not_found("configuration"))?;
    Ok(ApiResponse::ok("ok", config))
}

/// Delete a snapshot; the previous one of the device becomes latest
pub async fn delete_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.fetch_service.delete_snapshot(id).await?;
    tracing::info!("Deleted snapshot {}", id);
    Ok(MessageResponse::new("configuration deleted"))
}
