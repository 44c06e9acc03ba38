//! End-to-end API scenarios against a bootstrapped single-node cluster.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt; // for .collect().await
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`

use printfarm_host::store::Store;
use printfarm_host::web::api::create_router;
use printfarm_shared::config::NodeConfig;

async fn leader_node() -> (axum::Router, Arc<Store>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        id: "n1".to_string(),
        raft_addr: "127.0.0.1:7001".to_string(),
        http_addr: "127.0.0.1:8001".to_string(),
        data_dir: dir.path().to_path_buf(),
        bootstrap: true,
    };
    let store = Arc::new(Store::open(config).await.unwrap());
    store
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();
    (create_router(store.clone()), store, dir)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, String) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_register_and_list_printers() {
    let (app, _store, _dir) = leader_node().await;

    let (status, _) = send(
        &app,
        "POST",
        "/printers",
        Some(json!({"id": "p1", "name": "Ender 3 Pro"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/printers", None).await;
    assert_eq!(status, StatusCode::OK);
    let printers: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(printers, json!([{"id": "p1", "name": "Ender 3 Pro"}]));
}

#[tokio::test]
async fn test_submitted_jobs_enter_the_queue() {
    let (app, _store, _dir) = leader_node().await;

    send(&app, "POST", "/printers", Some(json!({"id": "p1", "name": "Ender 3 Pro"}))).await;
    let (status, _) = send(
        &app,
        "POST",
        "/filaments",
        Some(json!({"id": "f1", "type": "PLA", "color": "Blue", "weight_grams": 1000.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/print_jobs",
        Some(json!({
            "id": "job1",
            "file_path": "/models/boat.gcode",
            "grams_needed": 50.0,
            "printer_id": "p1",
            "filament_id": "f1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/print_jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(jobs[0]["id"], "job1");
    assert_eq!(jobs[0]["status"], "Queued");
}

#[tokio::test]
async fn test_overcommit_rejected_with_usage_figures() {
    let (app, _store, _dir) = leader_node().await;

    send(&app, "POST", "/printers", Some(json!({"id": "p1", "name": "Ender 3 Pro"}))).await;
    send(
        &app,
        "POST",
        "/filaments",
        Some(json!({"id": "f1", "type": "PLA", "color": "Blue", "weight_grams": 1000.0})),
    )
    .await;
    send(
        &app,
        "POST",
        "/print_jobs",
        Some(json!({
            "id": "job1",
            "file_path": "/models/boat.gcode",
            "grams_needed": 50.0,
            "printer_id": "p1",
            "filament_id": "f1"
        })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/print_jobs",
        Some(json!({
            "id": "job2",
            "file_path": "/models/bench.gcode",
            "grams_needed": 970.0,
            "printer_id": "p1",
            "filament_id": "f1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body.starts_with("insufficient filament: required 970.00g, available 950.00g"),
        "unexpected body: {body}"
    );
}

#[tokio::test]
async fn test_job_lifecycle_charges_the_spool_once() {
    let (app, _store, _dir) = leader_node().await;

    send(&app, "POST", "/printers", Some(json!({"id": "p1", "name": "Ender 3 Pro"}))).await;
    send(
        &app,
        "POST",
        "/filaments",
        Some(json!({"id": "f1", "type": "PLA", "color": "Blue", "weight_grams": 1000.0})),
    )
    .await;
    send(
        &app,
        "POST",
        "/print_jobs",
        Some(json!({
            "id": "job1",
            "file_path": "/models/boat.gcode",
            "grams_needed": 50.0,
            "printer_id": "p1",
            "filament_id": "f1"
        })),
    )
    .await;

    let (status, _) = send(&app, "POST", "/print_jobs/job1/status?status=Running", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "POST", "/print_jobs/job1/status?status=Done", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/filaments", None).await;
    let filaments: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(filaments[0]["weight_grams"], 950.0);

    let (_, body) = send(&app, "GET", "/print_jobs", None).await;
    let jobs: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(jobs[0]["status"], "Done");

    // Done is terminal.
    let (status, body) = send(&app, "POST", "/print_jobs/job1/status?status=Running", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "invalid status transition from 'Done' to 'Running'");
}

#[tokio::test]
async fn test_status_reports_cluster_state() {
    let (app, store, _dir) = leader_node().await;

    let (status, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["state"], "Leader");
    assert_eq!(stats["node_id"], store.node_id());
    assert_eq!(stats["leader"], "127.0.0.1:7001");
    for key in ["commit_index", "last_applied", "last_log_index"] {
        assert!(stats.get(key).is_some(), "missing key {key}");
    }
}

#[tokio::test]
async fn test_missing_or_unknown_status_parameter() {
    let (app, _store, _dir) = leader_node().await;

    let (status, body) = send(&app, "POST", "/print_jobs/job1/status", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "missing status query parameter");

    let (status, body) = send(&app, "POST", "/print_jobs/job1/status?status=Paused", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "invalid job status 'Paused'");
}

#[tokio::test]
async fn test_malformed_bodies_and_wrong_methods() {
    let (app, _store, _dir) = leader_node().await;

    let (status, body) = send(&app, "POST", "/printers", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("invalid printer payload:"));

    let (status, _) = send(&app, "DELETE", "/printers", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
