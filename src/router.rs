use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        // Service routes
        .route("/api/health", get(handlers::healthcheck))
        .route("/api/index", get(handlers::index))
        .route("/api/check-wal-mode", get(handlers::check_wal_mode))
        // Device routes
        .route("/api/devices", get(handlers::devices::list_devices))
        .route("/api/devices", post(handlers::devices::create_device))
        .route("/api/devices/import", post(handlers::devices::import_devices))
        .route("/api/devices/batch-fetch-config", post(handlers::configs::batch_fetch))
        .route("/api/devices/:id", get(handlers::devices::get_device))
        .route("/api/devices/:id", put(handlers::devices::update_device))
        .route("/api/devices/:id", delete(handlers::devices::delete_device))
        .route("/api/devices/:id/fetch-config", post(handlers::configs::fetch_config))
        .route("/api/devices/:id/config", get(handlers::configs::get_latest_config))
        .route("/api/devices/:id/history", get(handlers::configs::get_config_history))
        // Snapshot routes
        .route("/api/configs", get(handlers::configs::list_configs))
        .route("/api/configs", post(handlers::configs::upload_config))
        .route("/api/configs/:id", get(handlers::configs::get_config))
        .route("/api/configs/:id", delete(handlers::configs::delete_config))
        // Sub-entity routes
        .route("/api/interfaces", get(handlers::entities::list_interfaces))
        .route("/api/virtuals", get(handlers::entities::list_virtuals))
        .route("/api/pools", get(handlers::entities::list_pools))
        .route("/api/nodes", get(handlers::entities::list_nodes))
        .route("/api/profiles", get(handlers::entities::list_profiles))
        .route("/api/rules", get(handlers::entities::list_rules))
        .route("/api/persistence", get(handlers::entities::list_persistence))
        .route("/api/snatpools", get(handlers::entities::list_snat_pools))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::Store;
    use crate::extract::Extractor;
    use crate::fetch::{FetchPolicy, FetchService};
    use crate::parser::{bundled_templates_dir, FileTemplateParser, TemplateMap};
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::TransportError;

    const SW1_CONFIG: &str = "interface eth0\n description up";

    async fn test_app() -> (Router, Arc<ScriptedTransport>, Store) {
        let store = Store::in_memory().await.unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let extractor = Extractor::new(
            TemplateMap::default(),
            Arc::new(FileTemplateParser::new(bundled_templates_dir())),
        );
        let fetch_service = FetchService::new(
            store.clone(),
            transport.clone(),
            extractor,
            FetchPolicy::default(),
        );
        let state = Arc::new(AppState {
            store: store.clone(),
            config: Config::load(),
            fetch_service,
        });
        (build(state), transport, store)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_sw1(app: &Router) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/devices",
            Some(json!({
                "hostname": "sw1",
                "address": "192.0.2.10",
                "username": "admin",
                "password": "secret",
                "device_type": "hp_comware",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = test_app().await;
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "netcmdb");
    }

    #[tokio::test]
    async fn test_device_crud() {
        let (app, _, _) = test_app().await;
        let id = create_sw1(&app).await;

        let (status, body) = send(&app, "GET", &format!("/api/devices/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["hostname"], "sw1");
        assert!(body["data"].get("password").is_none());

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/devices/{}", id),
            Some(json!({"hostname": "sw1-core", "address": "192.0.2.11", "device_type": "hp_comware"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["address"], "192.0.2.11");

        let (status, _) = send(&app, "DELETE", &format!("/api/devices/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, "GET", &format!("/api/devices/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_create_device_validation_and_conflict() {
        let (app, _, _) = test_app().await;
        create_sw1(&app).await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/devices",
            Some(json!({"hostname": "sw1", "address": "192.0.2.20", "device_type": "hp_comware"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            "/api/devices",
            Some(json!({"hostname": "sw2", "address": "not-an-ip", "device_type": "hp_comware"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_fetch_config_and_lookups() {
        let (app, transport, _) = test_app().await;
        let id = create_sw1(&app).await;
        transport.respond("sw1", SW1_CONFIG);

        let (status, body) = send(&app, "POST", &format!("/api/devices/{}/fetch-config", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["saved"], true);
        let config_id = body["config"]["id"].as_i64().unwrap();

        // Unchanged text inside the window is not stored again
        let (_, body) = send(&app, "POST", &format!("/api/devices/{}/fetch-config", id), None).await;
        assert_eq!(body["saved"], false);

        // Force stores a second snapshot
        let (_, body) = send(
            &app,
            "POST",
            &format!("/api/devices/{}/fetch-config", id),
            Some(json!({"force": true})),
        )
        .await;
        assert_eq!(body["saved"], true);
        let forced_id = body["config"]["id"].as_i64().unwrap();

        let (status, body) = send(&app, "GET", &format!("/api/devices/{}/config", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["id"].as_i64(), Some(forced_id));
        assert_eq!(body["config"]["is_latest"], true);

        let (_, body) = send(&app, "GET", &format!("/api/devices/{}/history", id), None).await;
        let history = body["config"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["id"].as_i64(), Some(forced_id));
        assert_eq!(history[1]["id"].as_i64(), Some(config_id));

        let (_, body) = send(&app, "GET", &format!("/api/interfaces?device={}&latest=true", id), None).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["interface"], "eth0");
    }

    #[tokio::test]
    async fn test_fetch_transport_error_is_bad_gateway() {
        let (app, transport, store) = test_app().await;
        let id = create_sw1(&app).await;
        transport.fail("sw1", TransportError::Auth { host: "sw1".to_string() });

        let (status, body) = send(&app, "POST", &format!("/api/devices/{}/fetch-config", id), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert_eq!(store.count_snapshots(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_unparseable_config_keeps_raw_text() {
        let (app, _, _) = test_app().await;
        let id = create_sw1(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/configs",
            Some(json!({"device_id": id, "config_text": "nothing the template knows"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["saved"], true);
        assert_eq!(body["config"]["config_text"], "nothing the template knows");
    }

    #[tokio::test]
    async fn test_delete_config_promotes_previous() {
        let (app, transport, _) = test_app().await;
        let id = create_sw1(&app).await;
        transport.respond("sw1", SW1_CONFIG);

        let (_, first) = send(&app, "POST", &format!("/api/devices/{}/fetch-config", id), None).await;
        let (_, second) = send(
            &app,
            "POST",
            &format!("/api/devices/{}/fetch-config", id),
            Some(json!({"force": true})),
        )
        .await;
        let first_id = first["config"]["id"].as_i64().unwrap();
        let second_id = second["config"]["id"].as_i64().unwrap();

        let (status, _) = send(&app, "DELETE", &format!("/api/configs/{}", second_id), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", &format!("/api/configs/{}", first_id), None).await;
        assert_eq!(body["data"]["is_latest"], true);

        let (status, _) = send(&app, "DELETE", &format!("/api/configs/{}", second_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_fetch_isolates_failures() {
        let (app, transport, _) = test_app().await;
        create_sw1(&app).await;
        send(
            &app,
            "POST",
            "/api/devices",
            Some(json!({"hostname": "sw2", "address": "192.0.2.12", "device_type": "hp_comware"})),
        )
        .await;
        transport.respond("sw1", SW1_CONFIG);

        let (status, body) = send(&app, "POST", "/api/devices/batch-fetch-config", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_devices"], 2);
        assert_eq!(body["success_count"], 1);
        assert_eq!(body["failed_count"], 1);
        assert_eq!(body["results"][0]["hostname"], "sw1");
        assert_eq!(body["results"][1]["success"], false);
    }

    #[tokio::test]
    async fn test_import_skips_existing_hostnames() {
        let (app, _, _) = test_app().await;
        create_sw1(&app).await;

        let csv = "hostname,address,device_type,username,password\n\
                   sw1,192.0.2.10,hp_comware,admin,x\n\
                   lb1,192.0.2.20.xsh,f5_bigip,admin,y\n";
        let request = Request::builder()
            .method("POST")
            .uri("/api/devices/import")
            .header("content-type", "text/csv")
            .body(Body::from(csv))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["imported"], 1);
        assert_eq!(body["data"]["skipped"], 1);

        let (_, body) = send(&app, "GET", "/api/devices", None).await;
        let devices = body["data"].as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["hostname"], "lb1");
        assert_eq!(devices[0]["address"], "192.0.2.20");
    }
}
