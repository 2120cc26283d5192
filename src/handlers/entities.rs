//! Read-only listings of the sub-entities decomposed from snapshots.
//! All accept `config`, `device`, `latest`, `limit` and `offset`.

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::{ApiError, ApiResponse};

type Listing<T> = Result<Json<ApiResponse<Vec<T>>>, ApiError>;

fn listing<T: serde::Serialize>(kind: &str, rows: Vec<T>) -> Json<ApiResponse<Vec<T>>> {
    ApiResponse::ok(format!("{} {}", rows.len(), kind), rows)
}

pub async fn list_interfaces(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<InterfaceRow> {
    Ok(listing("interfaces", state.store.list_interfaces(&q).await?))
}

pub async fn list_virtuals(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<VirtualServerRecord>> {
    Ok(listing("virtual servers", state.store.list_virtuals(&q).await?))
}

/// Pools come with their members attached
pub async fn list_pools(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<PoolRecord>> {
    Ok(listing("pools", state.store.list_pools(&q).await?))
}

pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<NodeRecord>> {
    Ok(listing("nodes", state.store.list_nodes(&q).await?))
}

pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<TypedObjectRecord>> {
    Ok(listing("profiles", state.store.list_profiles(&q).await?))
}

pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<RuleRecord>> {
    Ok(listing("rules", state.store.list_rules(&q).await?))
}

pub async fn list_persistence(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<TypedObjectRecord>> {
    Ok(listing("persistence profiles", state.store.list_persistence(&q).await?))
}

pub async fn list_snat_pools(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EntityQuery>,
) -> Listing<EntityRow<SnatPoolRecord>> {
    Ok(listing("snat pools", state.store.list_snat_pools(&q).await?))
}
