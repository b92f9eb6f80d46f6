//! Integration tests for the HTTP endpoints
//!
//! Drives the router with signed requests against the fake external system.

mod common;

use axum::http::StatusCode;
use common::{deploy_body, extract_json_body, TestClient};
use serde_json::json;

#[tokio::test]
async fn test_health_needs_no_auth() {
    let client = TestClient::new();
    let response = client.send("GET", "/health", None, vec![]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "fleet-manager");
}

#[tokio::test]
async fn test_deploy_endpoint() {
    let client = TestClient::new();
    let response = client.deploy(&deploy_body("bot1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Instance deployed for bot bot1");

    assert!(client.system.has_database("bot1"));
    assert!(client.system.has_process("bot1"));
}

#[tokio::test]
async fn test_deploy_missing_fields_is_bad_request() {
    let client = TestClient::new();
    let response = client.deploy(&json!({"bot_name": "bot1"})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json_body(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["detail"], "Missing bot_name or token field");
    assert!(client.system.history().is_empty());
}

#[tokio::test]
async fn test_deploy_invalid_name_is_bad_request() {
    let client = TestClient::new();
    let response = client.deploy(&deploy_body("../../etc")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(client.system.history().is_empty());
}

#[tokio::test]
async fn test_deploy_failure_is_server_error_with_report() {
    let client = TestClient::new();
    client.system.fail_on("CREATE DATABASE");

    let response = client.deploy(&deploy_body("bot1")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = extract_json_body(response).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("create database"));
    assert!(detail.contains("Disk space"));
    assert!(!client.system.has_database("bot1"));
    assert!(!client
        .orchestrator
        .config()
        .workspace_path("bot1")
        .exists());
}

#[tokio::test]
async fn test_delete_endpoint_is_idempotent() {
    let client = TestClient::new();
    client.deploy(&deploy_body("bot1")).await;

    for _ in 0..2 {
        let response = client
            .signed_for_name("DELETE", "/instance/bot1", "bot1")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = extract_json_body(response).await;
        assert_eq!(body["message"], "Instance bot1 deleted");
    }

    assert!(!client.system.has_process("bot1"));
    assert!(!client.system.has_database("bot1"));
}

#[tokio::test]
async fn test_start_unknown_instance_is_not_found() {
    let client = TestClient::new();
    let response = client
        .signed_for_name("POST", "/instance/ghost/start", "ghost")
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json_body(response).await;
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_stop_and_start_endpoints() {
    let client = TestClient::new();
    client.deploy(&deploy_body("bot1")).await;

    let response = client
        .signed_for_name("POST", "/instance/bot1/stop", "bot1")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        client.system.process_status("bot1").as_deref(),
        Some("stopped")
    );

    let response = client
        .signed_for_name("POST", "/instance/bot1/start", "bot1")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["message"], "Instance bot1 started");
    assert_eq!(
        client.system.process_status("bot1").as_deref(),
        Some("online")
    );
}

#[tokio::test]
async fn test_stop_not_running_is_not_found() {
    let client = TestClient::new();
    let response = client
        .signed_for_name("POST", "/instance/bot1/stop", "bot1")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_endpoint() {
    let client = TestClient::new();
    client.deploy(&deploy_body("bot1")).await;
    client.deploy(&deploy_body("bot2")).await;

    let response = client.list().await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let instances = body["instances"].as_array().unwrap();
    let names: Vec<_> = instances
        .iter()
        .map(|i| i["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bot1", "bot2"]);
    assert!(instances.iter().all(|i| i["status"] == "online"));
    assert!(instances[0]["uptime_since"].is_string());
}

#[tokio::test]
async fn test_inspect_endpoint() {
    let client = TestClient::new();
    client.deploy(&deploy_body("bot1")).await;

    let response = client
        .signed_for_name("GET", "/instance/bot1", "bot1")
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let instance = &body["instance"];
    assert_eq!(instance["status"], "active");
    assert_eq!(instance["workspace"]["state"], "present");
    assert_eq!(instance["database"]["state"], "present");
    assert_eq!(instance["process_status"], "online");
}

#[tokio::test]
async fn test_list_failure_is_server_error() {
    let client = TestClient::new();
    client.system.fail_on("pm2 jlist");

    let response = client.list().await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
