mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{Harness, client, harness, scope};
use hydra_reconciler::api::{SyncAppState, app_router};
use serde_json::Value;
use uuid::Uuid;

fn test_server(h: &Harness) -> TestServer {
    let state = SyncAppState {
        coordinator: h.coordinator.clone(),
        admin: h.hydra.clone(),
    };
    TestServer::new(app_router(state)).expect("Failed to create test server")
}

#[tokio::test]
async fn healthz_returns_ok() {
    let h = harness(vec![], vec![]);
    let server = test_server(&h);

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn sync_returns_finished_report() {
    let h = harness(vec![client("svc-a", &["read"])], vec![scope("read")]);
    let server = test_server(&h);

    let response = server.post("/api/hydra/sync").await;
    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["status"], "completed");
    assert_eq!(report["counts"]["clients"]["created"], 1);
    assert_eq!(report["counts"]["scopes"]["created"], 1);
    assert_eq!(report["errors"], serde_json::json!([]));
}

#[tokio::test]
async fn background_sync_is_accepted() {
    let h = harness(vec![], vec![]);
    let server = test_server(&h);

    let response = server
        .post("/api/hydra/sync")
        .add_query_param("background", "true")
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert!(body["run_id"].as_str().unwrap().parse::<Uuid>().is_ok());
}

#[tokio::test]
async fn concurrent_sync_is_rejected_with_active_run() {
    let h = harness(vec![], vec![]);
    let server = test_server(&h);
    let ticket = h.coordinator.begin().unwrap();

    let response = server.post("/api/hydra/sync").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["active_run_id"], ticket.id().to_string());

    let current = server.get("/api/hydra/sync/current").await;
    current.assert_status_ok();
    let record: Value = current.json();
    assert_eq!(record["id"], ticket.id().to_string());

    let cancel = server.post("/api/hydra/sync/cancel").await;
    cancel.assert_status(StatusCode::ACCEPTED);
    let body: Value = cancel.json();
    assert_eq!(body["run_id"], ticket.id().to_string());
}

#[tokio::test]
async fn idle_coordinator_has_no_current_run() {
    let h = harness(vec![], vec![]);
    let server = test_server(&h);

    server
        .get("/api/hydra/sync/current")
        .await
        .assert_status_not_found();
    server
        .post("/api/hydra/sync/cancel")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn status_reports_hydra_connectivity() {
    let h = harness(vec![], vec![]);
    let server = test_server(&h);

    let response = server.get("/api/hydra/status").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["hydra_connected"], true);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn run_history_is_served() {
    let h = harness(vec![client("svc-a", &[])], vec![]);
    let server = test_server(&h);

    let run = h.coordinator.trigger().await.unwrap();

    let response = server
        .get("/api/hydra/runs")
        .add_query_param("limit", "5")
        .await;
    response.assert_status_ok();
    let runs: Value = response.json();
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(runs[0]["id"], run.id().to_string());

    let response = server.get(&format!("/api/hydra/runs/{}", run.id())).await;
    response.assert_status_ok();
    let record: Value = response.json();
    assert_eq!(record["status"], "completed");

    server
        .get(&format!("/api/hydra/runs/{}", Uuid::new_v4()))
        .await
        .assert_status_not_found();
    server
        .get("/api/hydra/runs/not-a-uuid")
        .await
        .assert_status_bad_request();
}
