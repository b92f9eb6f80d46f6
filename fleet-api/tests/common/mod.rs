//! Common test utilities and helpers for fleet-api tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use fleet_api::{create_app, AppState, RequestAuthenticator};
use fleet_orchestrator::test_utils::{fake_orchestrator, FakeSystem};
use fleet_orchestrator::InstanceOrchestrator;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub system: Arc<FakeSystem>,
    pub orchestrator: InstanceOrchestrator,
    signer: RequestAuthenticator,
    _base: TempDir,
}

impl TestClient {
    /// App wired to a fresh fake system under a temporary directory.
    pub fn new() -> Self {
        let base = tempfile::tempdir().expect("Failed to create temp dir");
        let (orchestrator, system) = fake_orchestrator(base.path());
        let state = AppState::new(
            orchestrator.clone(),
            RequestAuthenticator::new(API_KEY, 300),
        );
        Self {
            app: create_app(state),
            system,
            orchestrator,
            signer: RequestAuthenticator::new(API_KEY, 300),
            _base: base,
        }
    }

    /// Valid authentication headers for `payload`, signed now.
    pub fn auth_headers(&self, payload: &Value) -> Vec<(&'static str, String)> {
        let ts = now().to_string();
        vec![
            ("x-api-key", API_KEY.to_string()),
            ("x-signature", self.signer.sign(&ts, payload)),
            ("x-timestamp", ts),
        ]
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        // Clone the app to allow reuse (Router is cheap to clone)
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<&Value>,
        headers: Vec<(&'static str, String)>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send_request(request).await
    }

    /// POST /deploy with a correctly signed body.
    pub async fn deploy(&self, body: &Value) -> Response<Body> {
        let headers = self.auth_headers(body);
        self.send("POST", "/deploy", Some(body), headers).await
    }

    /// A name-addressed call signed over `{"bot_name": name}`.
    pub async fn signed_for_name(&self, method: &str, uri: &str, name: &str) -> Response<Body> {
        let headers = self.auth_headers(&json!({ "bot_name": name }));
        self.send(method, uri, None, headers).await
    }

    pub async fn list(&self) -> Response<Body> {
        let headers = self.auth_headers(&json!({}));
        self.send("GET", "/instances", None, headers).await
    }
}

pub fn deploy_body(name: &str) -> Value {
    json!({
        "bot_name": name,
        "token": "tok",
        "owner": {"id": "1", "username": "u", "email": "e@x.com"},
    })
}
