use crate::{
    auth::SignatureHeaders,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use fleet_orchestrator::{Owner, ProvisionRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/instances", get(list_instances))
        .route("/instance/{name}", delete(delete_instance).get(get_instance))
        .route("/instance/{name}/start", post(start_instance))
        .route("/instance/{name}/stop", post(stop_instance))
}

/// Owner ids arrive as strings or as bare numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OwnerId {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Default, Deserialize)]
struct OwnerBody {
    id: Option<OwnerId>,
    username: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
    bot_name: Option<String>,
    token: Option<String>,
    owner: Option<OwnerBody>,
    prefix: Option<String>,
}

impl DeployRequest {
    fn into_provision_request(self) -> ApiResult<ProvisionRequest> {
        let missing = || ApiError::BadRequest("Missing bot_name or token field".to_string());
        let name = self.bot_name.filter(|s| !s.is_empty()).ok_or_else(missing)?;
        let token = self.token.filter(|s| !s.is_empty()).ok_or_else(missing)?;

        let owner = self.owner.unwrap_or_default();
        let owner = Owner {
            id: match owner.id {
                Some(OwnerId::Text(id)) => id,
                Some(OwnerId::Number(id)) => id.to_string(),
                None => String::new(),
            },
            username: owner.username.unwrap_or_default(),
            email: owner.email.unwrap_or_default(),
        };

        let request = ProvisionRequest::new(name, token, owner);
        Ok(match self.prefix {
            Some(prefix) => request.with_prefix(prefix),
            None => request,
        })
    }
}

fn name_payload(name: &str) -> Value {
    json!({ "bot_name": name })
}

async fn deploy(
    State(state): State<AppState>,
    headers: SignatureHeaders,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    state.authenticator.authorize(&headers, &payload)?;

    let req: DeployRequest = serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid deploy request: {}", e)))?;
    let req = req.into_provision_request()?;

    info!("Received deploy request for {}", req.name);
    let instance = state.orchestrator.provision(req).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Instance deployed for bot {}", instance.name),
    })))
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: SignatureHeaders,
) -> ApiResult<Json<Value>> {
    state
        .authenticator
        .authorize(&headers, &name_payload(&name))?;

    let report = state.orchestrator.delete(&name).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Instance {} deleted", name),
        "teardown": report,
    })))
}

async fn start_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: SignatureHeaders,
) -> ApiResult<Json<Value>> {
    state
        .authenticator
        .authorize(&headers, &name_payload(&name))?;

    state.orchestrator.start(&name).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Instance {} started", name),
    })))
}

async fn stop_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: SignatureHeaders,
) -> ApiResult<Json<Value>> {
    state
        .authenticator
        .authorize(&headers, &name_payload(&name))?;

    state.orchestrator.stop(&name).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Instance {} stopped", name),
    })))
}

async fn list_instances(
    State(state): State<AppState>,
    headers: SignatureHeaders,
) -> ApiResult<Json<Value>> {
    state.authenticator.authorize(&headers, &json!({}))?;

    let instances = state.orchestrator.list().await?;

    Ok(Json(json!({
        "status": "success",
        "instances": instances,
    })))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: SignatureHeaders,
) -> ApiResult<Json<Value>> {
    state
        .authenticator
        .authorize(&headers, &name_payload(&name))?;

    let instance = state.orchestrator.inspect(&name).await?;

    Ok(Json(json!({
        "status": "success",
        "instance": instance,
    })))
}
