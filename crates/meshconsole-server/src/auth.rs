//! Console login gating.
//!
//! Two middleware layers protect the console:
//!
//! - [`require_login`] authenticates the operator, either with HTTP basic
//!   auth or with an OIDC session cookie, and inserts an [`AuthContext`]
//! - [`require_key`] lets a request through only while the stored API key
//!   is accepted upstream, otherwise it redirects to the settings page

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use base64::Engine as _;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::config::{AuthMode, BasicAuthConfig};
use crate::error::AppError;
use crate::state::AppState;

/// Name of the OIDC session cookie.
pub const SESSION_COOKIE: &str = "meshconsole_session";

/// Lifetime of an OIDC session.
pub const SESSION_TTL: Duration = Duration::from_secs(8 * 3600);

/// Time allowed between redirecting to the provider and its callback.
const PENDING_LOGIN_TTL: Duration = Duration::from_secs(600);

/// The logged-in operator, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Basic auth username, or the OIDC preferred username / subject.
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// OIDC session id, used to end the session on logout.
    pub session_id: Option<String>,
}

// ── Sessions ─────────────────────────────────────────────────────────

struct Session {
    context: AuthContext,
    expires_at: Instant,
}

struct PendingLogin {
    code_verifier: String,
    expires_at: Instant,
}

/// In-memory OIDC session and pending-login store.
///
/// Sessions do not survive a restart; operators simply log in again.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    pending: RwLock<HashMap<String, PendingLogin>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session for `context`; returns the session id.
    pub async fn create(&self, mut context: AuthContext) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string()
            + &uuid::Uuid::new_v4().simple().to_string();
        context.session_id = Some(id.clone());

        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            id.clone(),
            Session {
                context,
                expires_at: now + SESSION_TTL,
            },
        );
        id
    }

    /// The operator of an unexpired session.
    pub async fn get(&self, id: &str) -> Option<AuthContext> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.context.clone())
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Remember a PKCE verifier; returns the CSRF state sent to the provider.
    pub async fn begin_login(&self, code_verifier: String) -> String {
        let csrf_state = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        pending.retain(|_, p| p.expires_at > now);
        pending.insert(
            csrf_state.clone(),
            PendingLogin {
                code_verifier,
                expires_at: now + PENDING_LOGIN_TTL,
            },
        );
        csrf_state
    }

    /// Take the verifier for `csrf_state`. Each state is usable once.
    pub async fn finish_login(&self, csrf_state: &str) -> Option<String> {
        self.pending
            .write()
            .await
            .remove(csrf_state)
            .filter(|p| p.expires_at > Instant::now())
            .map(|p| p.code_verifier)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Check an `Authorization: Basic ...` header against `config`.
///
/// Both username and password are compared in constant time.
#[must_use]
pub fn check_basic(header: Option<&str>, config: &BasicAuthConfig) -> Option<AuthContext> {
    let encoded = header?.strip_prefix("Basic ")?.trim();
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    let user_ok = username.as_bytes().ct_eq(config.username.as_bytes());
    let pass_ok = password.as_bytes().ct_eq(config.password.as_bytes());
    if bool::from(user_ok & pass_ok) {
        Some(AuthContext {
            username: username.to_owned(),
            email: None,
            name: None,
            session_id: None,
        })
    } else {
        None
    }
}

/// The session id from the request's cookies.
#[must_use]
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_owned())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value for a new session, or for clearing it when `id` is `None`.
#[must_use]
pub fn session_cookie_header(state: &AppState, id: Option<&str>) -> String {
    let path = if state.config.base_path.is_empty() {
        "/"
    } else {
        state.config.base_path.as_str()
    };
    let secure = if state.config.domain_name.starts_with("https://") {
        "; Secure"
    } else {
        ""
    };
    match id {
        Some(id) => format!(
            "{SESSION_COOKIE}={id}; Path={path}; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
            SESSION_TTL.as_secs()
        ),
        None => format!("{SESSION_COOKIE}=; Path={path}; HttpOnly; SameSite=Lax; Max-Age=0{secure}"),
    }
}

// ── Middleware ───────────────────────────────────────────────────────

/// Axum middleware that requires a logged-in operator.
///
/// Injects [`AuthContext`] into request extensions on success. With basic
/// auth a failed login is answered with a 401 challenge; with OIDC, pages
/// redirect to the provider and API calls get a 401.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] or [`AppError::Unauthenticated`] if
/// the operator is not logged in.
pub async fn require_login(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = match &state.config.auth {
        AuthMode::Basic(basic) => {
            let header = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            check_basic(header, basic)
                .ok_or_else(|| AppError::Unauthorized("login required".to_owned()))?
        }
        AuthMode::Oidc(_) => {
            let session = match session_cookie(req.headers()) {
                Some(id) => state.sessions.get(&id).await,
                None => None,
            };
            match session {
                Some(context) => context,
                None if is_api_request(&req) => {
                    return Err(AppError::Unauthenticated("login required".to_owned()));
                }
                None => return Ok(Redirect::to(&state.config.url("/oidc/login")).into_response()),
            }
        }
    };

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Axum middleware that requires a working stored API key.
///
/// # Errors
///
/// Returns [`AppError::Unconfigured`] when no key is saved and
/// [`AppError::InvalidKey`] when upstream does not accept it. Both redirect
/// to the settings page.
pub async fn require_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.credentials.is_configured().await? {
        return Err(AppError::Unconfigured);
    }
    if !state.lifecycle.test_key(None).await {
        tracing::warn!(path = %req.uri().path(), "stored API key failed testing");
        return Err(AppError::InvalidKey);
    }
    Ok(next.run(req).await)
}

fn is_api_request(req: &Request) -> bool {
    req.uri().path().split('/').any(|segment| segment == "api")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic() -> BasicAuthConfig {
        BasicAuthConfig {
            username: "admin".to_owned(),
            password: "hunter2".to_owned(),
        }
    }

    fn encode(user: &str, pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
        )
    }

    #[test]
    fn basic_accepts_matching_credentials() {
        let ctx = check_basic(Some(&encode("admin", "hunter2")), &basic()).unwrap();
        assert_eq!(ctx.username, "admin");
    }

    #[test]
    fn basic_rejects_wrong_or_malformed() {
        assert!(check_basic(Some(&encode("admin", "wrong")), &basic()).is_none());
        assert!(check_basic(Some(&encode("root", "hunter2")), &basic()).is_none());
        assert!(check_basic(Some("Basic not-base64!"), &basic()).is_none());
        assert!(check_basic(Some("Bearer abc"), &basic()).is_none());
        assert!(check_basic(None, &basic()).is_none());
    }

    #[test]
    fn password_may_contain_colons() {
        let config = BasicAuthConfig {
            username: "admin".to_owned(),
            password: "a:b".to_owned(),
        };
        assert!(check_basic(Some(&encode("admin", "a:b")), &config).is_some());
    }

    #[test]
    fn cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; meshconsole_session=abc123; other=1"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("meshconsole_session="));
        assert_eq!(session_cookie(&headers), None);
    }

    #[tokio::test]
    async fn sessions_round_trip_and_end() {
        let store = SessionStore::new();
        let id = store
            .create(AuthContext {
                username: "alice".to_owned(),
                email: Some("alice@example.com".to_owned()),
                name: None,
                session_id: None,
            })
            .await;

        let ctx = store.get(&id).await.unwrap();
        assert_eq!(ctx.username, "alice");
        assert_eq!(ctx.session_id.as_deref(), Some(id.as_str()));

        store.remove(&id).await;
        assert!(store.get(&id).await.is_none());
        assert!(store.get("unknown").await.is_none());
    }

    #[tokio::test]
    async fn pending_login_is_single_use() {
        let store = SessionStore::new();
        let state = store.begin_login("verifier".to_owned()).await;
        assert_eq!(store.finish_login(&state).await.as_deref(), Some("verifier"));
        assert!(store.finish_login(&state).await.is_none());
    }
}
