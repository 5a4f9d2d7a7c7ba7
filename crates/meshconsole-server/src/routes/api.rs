//! JSON API under `/api/*`.
//!
//! Each endpoint validates its body, then makes one upstream call with the
//! stored key and returns the upstream answer. `/api/test_key` and
//! `/api/save_key` manage the key itself and skip the stored-key check.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use meshconsole_client::{
    ApiKey, ClientError, CreatePreAuthKey, Headscale, Node, PreAuthKey, Route, User, key_prefix,
};
use meshconsole_core::error::LifecycleError;
use meshconsole_core::lifecycle::RenewalOutcome;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use validator::Validate;

use crate::error::AppError;
use crate::extract::ValidJson;
use crate::render::cards;
use crate::state::AppState;

/// Endpoints that need a working stored key.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/machine_information", post(machine_information))
        .route("/api/delete_machine", post(delete_machine))
        .route("/api/rename_machine", post(rename_machine))
        .route("/api/move_user", post(move_user))
        .route("/api/set_machine_tags", post(set_machine_tags))
        .route("/api/register_machine", post(register_machine))
        .route("/api/rename_user", post(rename_user))
        .route("/api/add_user", post(add_user))
        .route("/api/delete_user", post(delete_user))
        .route("/api/get_users", post(get_users))
        .route("/api/add_preauth_key", post(add_preauth_key))
        .route("/api/expire_preauth_key", post(expire_preauth_key))
        .route("/api/build_preauthkey_table", post(build_preauthkey_table))
        .route("/api/get_routes", post(get_routes))
        .route("/api/update_route", post(update_route))
        .route("/api/toggle_exit", post(toggle_exit))
}

/// Key management endpoints.
pub fn key_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/test_key", get(test_stored_key).post(test_key))
        .route("/api/save_key", post(save_key))
}

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct MachineRequest {
    #[validate(range(min = 1))]
    pub machine_id: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RenameMachineRequest {
    #[validate(range(min = 1))]
    pub machine_id: u64,
    #[validate(length(min = 1))]
    pub new_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MoveUserRequest {
    #[validate(range(min = 1))]
    pub machine_id: u64,
    #[validate(length(min = 1))]
    pub user: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetTagsRequest {
    #[validate(range(min = 1))]
    pub machine_id: u64,
    /// An empty list clears the machine's tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterMachineRequest {
    #[validate(length(min = 1))]
    pub user: String,
    #[validate(length(min = 1))]
    pub key: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RenameUserRequest {
    #[validate(length(min = 1))]
    pub old_name: String,
    #[validate(length(min = 1))]
    pub new_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserNameRequest {
    #[validate(length(min = 1))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddPreAuthKeyRequest {
    #[validate(length(min = 1))]
    pub user: String,
    #[serde(default)]
    pub reusable: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, alias = "aclTags")]
    pub acl_tags: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExpirePreAuthKeyRequest {
    #[validate(length(min = 1))]
    pub user: String,
    #[validate(length(min = 1))]
    pub key: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PreAuthTableRequest {
    #[validate(length(min = 1))]
    pub user: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRouteRequest {
    #[validate(range(min = 1))]
    pub route_id: u64,
    /// Whether the route is enabled now; the route is flipped.
    pub current_state: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ToggleExitRequest {
    /// The IPv4 and IPv6 exit routes of one machine.
    #[validate(length(min = 1, max = 2))]
    pub route_ids: Vec<u64>,
    pub current_state: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct TestKeyRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveKeyRequest {
    #[validate(length(min = 1))]
    pub api_key: String,
}

// ── Machines ─────────────────────────────────────────────────────────

async fn machine_information(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<MachineRequest>,
) -> Result<Json<Node>, AppError> {
    let key = state.api_key().await?;
    Ok(Json(state.api.get_node(&key, body.machine_id).await?))
}

async fn delete_machine(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<MachineRequest>,
) -> Result<Json<Value>, AppError> {
    let key = state.api_key().await?;
    state.api.delete_node(&key, body.machine_id).await?;
    info!(machine_id = body.machine_id, "machine deleted");
    Ok(Json(json!({})))
}

async fn rename_machine(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<RenameMachineRequest>,
) -> Result<Json<Node>, AppError> {
    let key = state.api_key().await?;
    let node = state
        .api
        .rename_node(&key, body.machine_id, body.new_name.trim())
        .await?;
    info!(machine_id = body.machine_id, name = %node.given_name, "machine renamed");
    Ok(Json(node))
}

async fn move_user(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<MoveUserRequest>,
) -> Result<Json<Node>, AppError> {
    let key = state.api_key().await?;
    let node = state.api.move_node(&key, body.machine_id, &body.user).await?;
    info!(machine_id = body.machine_id, user = %body.user, "machine moved");
    Ok(Json(node))
}

/// Tags are trimmed and given the `tag:` prefix when it is missing.
fn normalize_tags(tags: &[String]) -> Result<Vec<String>, AppError> {
    tags.iter()
        .map(|t| {
            let t = t.trim();
            match t.strip_prefix("tag:").unwrap_or(t) {
                "" => Err(AppError::Validation("tags: empty tag".to_owned())),
                name => Ok(format!("tag:{name}")),
            }
        })
        .collect()
}

async fn set_machine_tags(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<SetTagsRequest>,
) -> Result<Json<Node>, AppError> {
    let tags = normalize_tags(&body.tags)?;
    let key = state.api_key().await?;
    let node = state.api.set_tags(&key, body.machine_id, &tags).await?;
    info!(machine_id = body.machine_id, tags = ?tags, "machine tags set");
    Ok(Json(node))
}

async fn register_machine(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<RegisterMachineRequest>,
) -> Result<Json<Node>, AppError> {
    let key = state.api_key().await?;
    let node = state
        .api
        .register_node(&key, &body.user, body.key.trim())
        .await?;
    info!(machine_id = node.id, user = %body.user, "machine registered");
    Ok(Json(node))
}

// ── Users ────────────────────────────────────────────────────────────

async fn rename_user(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<RenameUserRequest>,
) -> Result<Json<User>, AppError> {
    let key = state.api_key().await?;
    let user = state
        .api
        .rename_user(&key, &body.old_name, body.new_name.trim())
        .await?;
    info!(old = %body.old_name, new = %user.name, "user renamed");
    Ok(Json(user))
}

async fn add_user(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<UserNameRequest>,
) -> Result<Json<User>, AppError> {
    let key = state.api_key().await?;
    let user = state.api.create_user(&key, body.name.trim()).await?;
    info!(user = %user.name, "user added");
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<UserNameRequest>,
) -> Result<Json<Value>, AppError> {
    let key = state.api_key().await?;
    state.api.delete_user(&key, &body.name).await?;
    info!(user = %body.name, "user deleted");
    Ok(Json(json!({})))
}

async fn get_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, AppError> {
    let key = state.api_key().await?;
    Ok(Json(state.api.list_users(&key).await?))
}

// ── Pre-auth keys ────────────────────────────────────────────────────

async fn add_preauth_key(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<AddPreAuthKeyRequest>,
) -> Result<Json<PreAuthKey>, AppError> {
    let key = state.api_key().await?;
    let request = CreatePreAuthKey {
        user: body.user,
        reusable: body.reusable,
        ephemeral: body.ephemeral,
        expiration: body.expiration,
        acl_tags: normalize_tags(&body.acl_tags)?,
    };
    let created = state.api.create_preauth_key(&key, &request).await?;
    info!(user = %created.user, id = created.id, "pre-auth key added");
    Ok(Json(created))
}

async fn expire_preauth_key(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<ExpirePreAuthKeyRequest>,
) -> Result<Json<Value>, AppError> {
    let key = state.api_key().await?;
    state
        .api
        .expire_preauth_key(&key, &body.user, &body.key)
        .await?;
    info!(user = %body.user, prefix = key_prefix(&body.key), "pre-auth key expired");
    Ok(Json(json!({})))
}

async fn build_preauthkey_table(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<PreAuthTableRequest>,
) -> Result<Html<String>, AppError> {
    let key = state.api_key().await?;
    let keys = state.api.list_preauth_keys(&key, &body.user).await?;
    Ok(Html(cards::preauth_table(
        &body.user,
        &keys,
        &state.config.timezone,
        Utc::now(),
    )))
}

// ── Routes ───────────────────────────────────────────────────────────

async fn get_routes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Route>>, AppError> {
    let key = state.api_key().await?;
    Ok(Json(state.api.list_routes(&key).await?))
}

/// Disable the route if it is enabled now, enable it otherwise.
async fn flip_route(
    api: &dyn Headscale,
    key: &str,
    route_id: u64,
    current_state: bool,
) -> Result<(), ClientError> {
    if current_state {
        api.disable_route(key, route_id).await
    } else {
        api.enable_route(key, route_id).await
    }
}

async fn update_route(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<UpdateRouteRequest>,
) -> Result<Json<Value>, AppError> {
    let key = state.api_key().await?;
    flip_route(state.api.as_ref(), &key, body.route_id, body.current_state).await?;
    info!(route_id = body.route_id, enabled = !body.current_state, "route updated");
    Ok(Json(json!({ "route_id": body.route_id, "enabled": !body.current_state })))
}

/// Flip both exit routes of a machine.
///
/// Toggles are not rolled back: if one succeeds and the other fails the
/// caller gets a `partial_toggle_failure` naming both.
async fn toggle_exit(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<ToggleExitRequest>,
) -> Result<Json<Value>, AppError> {
    if body.route_ids.contains(&0) {
        return Err(AppError::Validation("route_ids: range".to_owned()));
    }
    let key = state.api_key().await?;

    let mut toggled = Vec::with_capacity(body.route_ids.len());
    let mut failed = Vec::new();
    for &route_id in &body.route_ids {
        match flip_route(state.api.as_ref(), &key, route_id, body.current_state).await {
            Ok(()) => toggled.push(route_id),
            Err(e) => {
                warn!(route_id, error = %e, "exit route toggle failed");
                failed.push((route_id, e));
            }
        }
    }

    match failed.into_iter().next() {
        None => {
            info!(route_ids = ?toggled, enabled = !body.current_state, "exit routes toggled");
            Ok(Json(json!({ "route_ids": toggled, "enabled": !body.current_state })))
        }
        Some((_, e)) if toggled.is_empty() => Err(e.into()),
        Some((route_id, e)) => Err(AppError::PartialToggleFailure(format!(
            "route {} was toggled but route {route_id} failed: {e}",
            toggled
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

// ── API key ──────────────────────────────────────────────────────────

/// Test a key, then renew the stored key if it is close to expiry.
async fn check_and_renew(state: &AppState, candidate: Option<&str>) -> Result<Json<ApiKey>, AppError> {
    let unauthenticated = || AppError::Unauthenticated("Unauthenticated".to_owned());

    if !state.lifecycle.test_key(candidate).await {
        return Err(unauthenticated());
    }

    match state.lifecycle.renew_if_needed().await {
        Ok(RenewalOutcome::NotNeeded(info) | RenewalOutcome::Renewed(info)) => Ok(Json(info)),
        Ok(RenewalOutcome::Failed) => Ok(Json(state.lifecycle.key_info().await?)),
        Err(e @ LifecycleError::Persist(_)) => Err(e.into()),
        Err(e) => {
            warn!(error = %e, "key check could not read the stored key");
            Err(unauthenticated())
        }
    }
}

async fn test_stored_key(State(state): State<Arc<AppState>>) -> Result<Json<ApiKey>, AppError> {
    check_and_renew(&state, None).await
}

async fn test_key(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<TestKeyRequest>,
) -> Result<Json<ApiKey>, AppError> {
    let candidate = body.api_key.as_deref().map(str::trim);
    check_and_renew(&state, candidate).await
}

async fn save_key(
    State(state): State<Arc<AppState>>,
    ValidJson(body): ValidJson<SaveKeyRequest>,
) -> Result<Response, AppError> {
    let key = body.api_key.trim();
    if key.is_empty() {
        return Err(AppError::Validation("api_key: length".to_owned()));
    }

    if !state.lifecycle.test_key(Some(key)).await {
        warn!(prefix = key_prefix(key), "submitted API key failed testing");
        return Ok((StatusCode::UNAUTHORIZED, "Key failed testing. Check your key.").into_response());
    }

    if let Err(e) = state.credentials.set_key(key).await {
        error!(error = %e, "failed to save API key");
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Key did not save properly. Check logs.",
        )
            .into_response());
    }
    info!(prefix = key_prefix(key), "API key saved");

    let message = match state.lifecycle.key_info().await {
        Ok(info) => {
            let expiration = info
                .expiration
                .map_or_else(|| "never".to_owned(), |exp| state.config.timezone.format(exp));
            format!(
                "Key saved and tested: Key: \"{}\", expiration: {expiration}",
                info.prefix
            )
        }
        Err(e) => {
            warn!(error = %e, "saved API key info lookup failed");
            "Key saved but error occurred on key info retrieval.".to_owned()
        }
    };
    Ok((StatusCode::OK, message).into_response())
}
