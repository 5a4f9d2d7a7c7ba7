//! OIDC login routes: `/oidc/login` and `/oidc_callback`.
//!
//! Authorization code flow with PKCE (S256). The provider is found through
//! its discovery document on first use. The code verifier never leaves the
//! server: it is kept in the session store under the CSRF `state` value.
//! On successful callback an in-memory session is created and its id set
//! as a cookie.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::auth::{AuthContext, session_cookie_header};
use crate::config::{AuthMode, OidcConfig};
use crate::error::AppError;
use crate::state::AppState;

/// Build the OIDC router (no login required; these are the login endpoints).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oidc/login", get(oidc_login))
        .route("/oidc_callback", get(oidc_callback))
}

// ── Types ────────────────────────────────────────────────────────────

/// The parts of the provider's discovery document the console uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Query parameters returned by the OIDC provider on callback.
#[derive(Debug, Deserialize)]
pub struct OidcCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Token endpoint response from the OIDC provider.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// UserInfo response from the OIDC provider.
#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    preferred_username: Option<String>,
}

// ── PKCE ─────────────────────────────────────────────────────────────

/// A PKCE code verifier (64 hex chars from two UUIDs).
#[must_use]
pub fn code_verifier() -> String {
    uuid::Uuid::new_v4().simple().to_string() + &uuid::Uuid::new_v4().simple().to_string()
}

/// S256 code challenge = BASE64URL(SHA256(code_verifier)).
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

// ── Provider ─────────────────────────────────────────────────────────

fn oidc_config(state: &AppState) -> Result<&OidcConfig, AppError> {
    match &state.config.auth {
        AuthMode::Oidc(cfg) => Ok(cfg),
        AuthMode::Basic(_) => Err(AppError::Validation(
            "OIDC authentication is not configured".to_owned(),
        )),
    }
}

/// Provider metadata, fetched from the discovery URL once per process.
async fn metadata(state: &AppState) -> Result<&ProviderMetadata, AppError> {
    let cfg = oidc_config(state)?;
    state
        .oidc_metadata
        .get_or_try_init(|| async {
            let resp = state
                .http
                .get(&cfg.auth_url)
                .send()
                .await
                .map_err(|e| AppError::UpstreamUnreachable(format!("OIDC discovery failed: {e}")))?;
            if !resp.status().is_success() {
                return Err(AppError::UpstreamUnreachable(format!(
                    "OIDC discovery returned {}",
                    resp.status()
                )));
            }
            let meta: ProviderMetadata = resp
                .json()
                .await
                .map_err(|e| AppError::Internal(format!("invalid OIDC discovery document: {e}")))?;
            info!(issuer = %meta.issuer, "OIDC provider discovered");
            Ok(meta)
        })
        .await
}

/// Where to send the browser after ending its session, if anywhere.
pub async fn logout_url(state: &AppState) -> Option<String> {
    let cfg = oidc_config(state).ok()?;
    let endpoint = metadata(state).await.ok()?.end_session_endpoint.clone()?;
    Some(match &cfg.logout_redirect_uri {
        Some(uri) => format!("{endpoint}?post_logout_redirect_uri={uri}"),
        None => endpoint,
    })
}

/// Authorization URL for a login with `csrf_state` and `challenge`.
#[must_use]
pub fn authorize_url(
    endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    csrf_state: &str,
    challenge: &str,
) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{endpoint}{separator}response_type=code\
         &client_id={}\
         &redirect_uri={}\
         &scope={}\
         &state={}\
         &code_challenge={}\
         &code_challenge_method=S256",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode("openid email profile"),
        urlencoding::encode(csrf_state),
        urlencoding::encode(challenge),
    )
}

// ── Handlers ─────────────────────────────────────────────────────────

/// `GET /oidc/login`: redirect to the provider's authorize endpoint.
async fn oidc_login(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let cfg = oidc_config(&state)?;
    let meta = metadata(&state).await?;

    let verifier = code_verifier();
    let challenge = code_challenge(&verifier);
    let csrf_state = state.sessions.begin_login(verifier).await;

    let url = authorize_url(
        &meta.authorization_endpoint,
        &cfg.client_id,
        &state.config.oidc_redirect_uri(),
        &csrf_state,
        &challenge,
    );
    Ok(Redirect::temporary(&url).into_response())
}

/// `GET /oidc_callback`: exchange the code, look up the user, start a session.
async fn oidc_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OidcCallbackQuery>,
) -> Result<Response, AppError> {
    if let Some(err) = &query.error {
        let desc = query.error_description.as_deref().unwrap_or("unknown error");
        warn!(error = %err, description = %desc, "OIDC provider returned error");
        return Err(AppError::Unauthenticated(format!("{err}: {desc}")));
    }

    let code = query
        .code
        .as_deref()
        .ok_or_else(|| AppError::Validation("missing authorization code".to_owned()))?;
    let csrf_state = query
        .state
        .as_deref()
        .ok_or_else(|| AppError::Validation("missing state parameter".to_owned()))?;
    let code_verifier = state
        .sessions
        .finish_login(csrf_state)
        .await
        .ok_or_else(|| AppError::Validation("unknown or expired login state".to_owned()))?;

    let cfg = oidc_config(&state)?;
    let meta = metadata(&state).await?;
    let redirect_uri = state.config.oidc_redirect_uri();

    let token_resp = state
        .http
        .post(&meta.token_endpoint)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
            ("code_verifier", code_verifier.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AppError::UpstreamUnreachable(format!("token exchange failed: {e}")))?;

    if !token_resp.status().is_success() {
        warn!(status = %token_resp.status(), "OIDC token exchange failed");
        return Err(AppError::Unauthenticated("Authentication failed".to_owned()));
    }

    let tokens: TokenResponse = token_resp
        .json()
        .await
        .map_err(|e| AppError::Internal(format!("failed to parse token response: {e}")))?;

    let userinfo = match &meta.userinfo_endpoint {
        Some(endpoint) => fetch_userinfo(&state, endpoint, &tokens.access_token).await?,
        None => UserInfoResponse {
            sub: "unknown".to_owned(),
            email: None,
            name: None,
            preferred_username: None,
        },
    };

    let username = userinfo
        .preferred_username
        .clone()
        .or_else(|| userinfo.email.clone())
        .unwrap_or_else(|| userinfo.sub.clone());

    let session_id = state
        .sessions
        .create(AuthContext {
            username,
            email: userinfo.email.clone(),
            name: userinfo.name.clone(),
            session_id: None,
        })
        .await;

    info!(sub = %userinfo.sub, email = ?userinfo.email, "OIDC login successful");

    Ok((
        [(header::SET_COOKIE, session_cookie_header(&state, Some(&session_id)))],
        Redirect::to(&state.config.url("/overview")),
    )
        .into_response())
}

async fn fetch_userinfo(
    state: &AppState,
    endpoint: &str,
    access_token: &str,
) -> Result<UserInfoResponse, AppError> {
    let resp = state
        .http
        .get(endpoint)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| AppError::UpstreamUnreachable(format!("userinfo request failed: {e}")))?;
    if !resp.status().is_success() {
        warn!(status = %resp.status(), "OIDC userinfo request failed");
        return Err(AppError::Unauthenticated("Authentication failed".to_owned()));
    }
    resp.json()
        .await
        .map_err(|e| AppError::Internal(format!("failed to parse userinfo: {e}")))
}
