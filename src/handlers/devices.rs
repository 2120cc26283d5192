use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::db::is_unique_violation;
use crate::utils::{is_valid_address, is_valid_hostname, split_csv_line, strip_session_suffix};
use crate::AppState;

use super::{created, ApiError, ApiResponse, MessageResponse, PaginationQuery};

/// List all devices (with optional pagination)
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<ApiResponse<Vec<Device>>>, ApiError> {
    let (limit, offset) = page.sanitize();
    let devices = state.store.list_devices_paged(limit, offset).await?;
    Ok(ApiResponse::ok(format!("{} devices", devices.len()), devices))
}

/// Get a single device by id
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Device>>, ApiError> {
    let device = state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("device"))?;
    Ok(ApiResponse::ok("ok", device))
}

fn validate(hostname: &str, address: &str, device_type: &str) -> Result<(), ApiError> {
    if hostname.is_empty() || address.is_empty() || device_type.is_empty() {
        return Err(ApiError::bad_request("hostname, address, and device_type are required"));
    }
    if !is_valid_hostname(hostname) {
        return Err(ApiError::bad_request(
            "invalid hostname: only alphanumeric, hyphens, dots, and underscores allowed",
        ));
    }
    if !is_valid_address(address) {
        return Err(ApiError::bad_request("invalid IP address"));
    }
    Ok(())
}

/// Create a new device
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Device>>), ApiError> {
    req.hostname = req.hostname.trim().to_string();
    req.address = strip_session_suffix(&req.address).to_string();
    validate(&req.hostname, &req.address, &req.device_type)?;

    // Check for duplicate
    if state.store.get_device_by_hostname(&req.hostname).await?.is_some() {
        return Err(ApiError::conflict("device with this hostname already exists"));
    }

    let device = state.store.create_device(&req).await?;
    tracing::info!("Created device {} ({})", device.hostname, device.address);
    let (status, body) = created(ApiResponse {
        success: true,
        message: "device created".to_string(),
        data: device,
    });
    Ok((status, body))
}

/// Update an existing device
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut req): Json<UpdateDeviceRequest>,
) -> Result<Json<ApiResponse<Device>>, ApiError> {
    req.hostname = req.hostname.trim().to_string();
    req.address = strip_session_suffix(&req.address).to_string();
    validate(&req.hostname, &req.address, &req.device_type)?;

    if let Some(other) = state.store.get_device_by_hostname(&req.hostname).await? {
        if other.id != id {
            return Err(ApiError::conflict("device with this hostname already exists"));
        }
    }

    let device = state.store.update_device(id, &req).await?;
    Ok(ApiResponse::ok("device updated", device))
}

/// Delete a device along with its snapshots
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store.delete_device(id).await?;
    tracing::info!("Deleted device {}", id);
    Ok(MessageResponse::new("device deleted"))
}

/// Parse an inventory CSV of `hostname,address,device_type,username,password`.
/// A header on the first data line is skipped; blank and `#` lines are
/// ignored; malformed rows become warnings.
pub fn parse_inventory_csv(text: &str) -> (Vec<CreateDeviceRequest>, Vec<String>) {
    let mut devices = Vec::new();
    let mut warnings = Vec::new();
    let mut first_row = true;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = split_csv_line(line);
        if std::mem::take(&mut first_row) && fields[0].eq_ignore_ascii_case("hostname") {
            continue;
        }
        if fields.len() < 3 {
            warnings.push(format!("line {}: expected at least 3 fields", lineno + 1));
            continue;
        }

        let req = CreateDeviceRequest {
            hostname: fields[0].clone(),
            address: strip_session_suffix(&fields[1]).to_string(),
            device_type: fields[2].clone(),
            username: fields.get(3).cloned().unwrap_or_default(),
            password: fields.get(4).cloned().unwrap_or_default(),
        };
        if let Err(e) = validate(&req.hostname, &req.address, &req.device_type) {
            warnings.push(format!("line {}: {}", lineno + 1, e.message()));
            continue;
        }
        devices.push(req);
    }

    (devices, warnings)
}

/// Import devices from a CSV body. Hostnames already present are skipped.
pub async fn import_devices(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<ApiResponse<ImportResult>>, ApiError> {
    let (rows, warnings) = parse_inventory_csv(&body);
    let mut result = ImportResult {
        skipped: warnings.len(),
        warnings,
        ..Default::default()
    };

    for req in rows {
        if state.store.get_device_by_hostname(&req.hostname).await?.is_some() {
            result.skipped += 1;
            result.warnings.push(format!("{} already exists", req.hostname));
            continue;
        }
        match state.store.create_device(&req).await {
            Ok(_) => result.imported += 1,
            // Created concurrently since the check above
            Err(e) if is_unique_violation(&e) => {
                result.skipped += 1;
                result.warnings.push(format!("{} already exists", req.hostname));
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Imported {} devices ({} skipped)", result.imported, result.skipped);
    Ok(ApiResponse::ok(
        format!("imported {} devices, skipped {}", result.imported, result.skipped),
        result,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inventory_csv() {
        let csv = "hostname,address,device_type,username,password\n\
                   sw1,10.0.0.1.xsh,hp_comware,admin,\"p,w\"\n\
                   lb1,10.0.0.2,f5_bigip\n\
                   broken,10.0.0.3\n\
                   bad host,10.0.0.4,hp_comware\n";
        let (devices, warnings) = parse_inventory_csv(csv);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].hostname, "sw1");
        assert_eq!(devices[0].address, "10.0.0.1");
        assert_eq!(devices[0].password, "p,w");
        assert_eq!(devices[1].device_type, "f5_bigip");
        assert_eq!(devices[1].username, "");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("line 4"));
    }

    #[test]
    fn test_parse_inventory_csv_header_after_comment() {
        let csv = "# exported from the jump host\n\n\
                   hostname,address,device_type,username,password\n\
                   sw1,10.0.0.1,hp_comware,admin,x\n";
        let (devices, warnings) = parse_inventory_csv(csv);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].hostname, "sw1");
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_parse_inventory_csv_without_header() {
        let (devices, warnings) = parse_inventory_csv("fw1,192.0.2.1,hillstone_stoneos,admin,x\n\n");
        assert_eq!(devices.len(), 1);
        assert!(warnings.is_empty());
    }
}
