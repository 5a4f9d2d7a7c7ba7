//! Console pages.
//!
//! Each page fetches what it shows from Headscale with the stored key and
//! renders it server-side. A failure to list one user's pre-auth keys only
//! degrades that user's card.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Router};
use chrono::Utc;
use meshconsole_core::classify::{MachineRoutes, classify, count_routes};
use tracing::{info, warn};

use crate::auth::{AuthContext, session_cookie_header};
use crate::error::AppError;
use crate::render::cards::{self, OverviewStats};
use crate::render::{self, Page};
use crate::routes::oidc;
use crate::state::AppState;

/// Pages that need a working stored key.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(overview))
        .route("/overview", get(overview))
        .route("/machines", get(machines))
        .route("/users", get(users))
        .route("/routes", get(routes))
}

/// Pages that only need a login.
pub fn settings_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/settings", get(settings))
        .route("/logout", get(logout))
}

/// `/error` outside of diagnostics mode: nothing to show.
pub async fn error_redirect(State(state): State<Arc<AppState>>) -> Redirect {
    Redirect::to(&state.config.url("/overview"))
}

fn page(state: &AppState, user: &AuthContext, title: &str, active: &str, content: &str) -> Html<String> {
    let page = Page {
        config: &state.config,
        user: Some(user),
    };
    Html(render::shell(&page, title, active, content))
}

async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthContext>,
) -> Result<Html<String>, AppError> {
    let key = state.api_key().await?;
    let api = &state.api;
    let (nodes, users, routes) = tokio::try_join!(
        api.list_nodes(&key),
        api.list_users(&key),
        api.list_routes(&key)
    )?;

    let now = Utc::now();
    let mut usable_preauth_keys = 0;
    for u in &users {
        match api.list_preauth_keys(&key, &u.name).await {
            Ok(keys) => usable_preauth_keys += keys.iter().filter(|k| k.is_usable(now)).count(),
            Err(e) => warn!(user = %u.name, error = %e, "pre-auth key listing failed"),
        }
    }

    let stats = OverviewStats {
        machines: nodes.len(),
        users: users.len(),
        usable_preauth_keys,
        routes: count_routes(&routes),
    };
    let key_info = match state.lifecycle.key_info().await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "API key info lookup failed");
            None
        }
    };
    let content = cards::overview_content(&state.config, &stats, key_info.as_ref(), now);
    Ok(page(&state, &user, "Overview", "overview", &content))
}

async fn machines(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthContext>,
) -> Result<Html<String>, AppError> {
    let key = state.api_key().await?;
    let (nodes, routes) = tokio::try_join!(state.api.list_nodes(&key), state.api.list_routes(&key))?;
    let classification = classify(&routes);
    let now = Utc::now();

    let mut content = String::from(
        "<div class=\"card-action\"><button class=\"green\" onclick=\"registerMachine()\">Register Machine</button></div>",
    );
    if nodes.is_empty() {
        content.push_str("<p>There are no machines to display!</p>");
    }
    for node in &nodes {
        let machine_routes = MachineRoutes::for_machine(node.id, &routes, &classification);
        content.push_str(&cards::machine_card(
            node,
            &machine_routes,
            &state.config.timezone,
            now,
        ));
    }
    Ok(page(&state, &user, "Machines", "machines", &content))
}

async fn users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthContext>,
) -> Result<Html<String>, AppError> {
    let key = state.api_key().await?;
    let all = state.api.list_users(&key).await?;
    let now = Utc::now();
    let zone = &state.config.timezone;

    let mut content = String::from(
        "<div class=\"card-action\"><button class=\"green\" onclick=\"ask('add_user', 'New user name', 'name', {})\">Add User</button></div>",
    );
    if all.is_empty() {
        content.push_str("<p>There are no users to display!</p>");
    }
    for u in &all {
        let preauth = match state.api.list_preauth_keys(&key, &u.name).await {
            Ok(keys) => cards::preauth_table(&u.name, &keys, zone, now),
            Err(e) => {
                warn!(user = %u.name, error = %e, "pre-auth key listing failed");
                cards::preauth_unavailable(&format!("Could not load pre-auth keys: {e}"))
            }
        };
        content.push_str(&cards::user_card(u, &preauth, zone, now));
    }
    Ok(page(&state, &user, "Users", "users", &content))
}

async fn routes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthContext>,
) -> Result<Html<String>, AppError> {
    let key = state.api_key().await?;
    let all = state.api.list_routes(&key).await?;
    let content = cards::routes_content(&all, &classify(&all));
    Ok(page(&state, &user, "Routes", "routes", &content))
}

async fn settings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthContext>,
) -> Html<String> {
    let key_state = match state.lifecycle.state().await {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "API key state unavailable");
            None
        }
    };
    let content = cards::settings_content(&state.config, key_state.as_ref(), Utc::now());
    page(&state, &user, "Settings", "settings", &content)
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthContext>,
) -> Response {
    let overview = state.config.url("/overview");
    let Some(session_id) = &user.session_id else {
        return Redirect::to(&overview).into_response();
    };

    state.sessions.remove(session_id).await;
    info!(user = %user.username, "operator logged out");
    let target = oidc::logout_url(&state).await.unwrap_or(overview);
    (
        [(header::SET_COOKIE, session_cookie_header(&state, None))],
        Redirect::to(&target),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Duration;

    use crate::routes::tests::{body_text, harness, send};

    #[tokio::test]
    async fn overview_counts_usable_keys_and_routes() {
        let h = harness(&[], true).await;
        h.hs.add_user("alice").await;
        let node = h.hs.add_node("gw", "alice").await;
        h.hs.add_route(node.id, "0.0.0.0/0", true).await;
        h.hs.add_route(node.id, "10.0.0.0/24", false).await;
        h.hs.add_route(0, "10.9.0.0/24", true).await;
        let soon = chrono::Utc::now() + Duration::days(1);
        h.hs.add_preauth_key("alice", false, false, soon).await;
        h.hs.add_preauth_key("alice", false, true, soon).await;

        for path in ["/", "/overview"] {
            let resp = send(&h.state, "GET", path, None).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let html = body_text(resp).await;
            assert!(html.contains("Usable Preauth Keys<span class=\"secondary-content\">1</span>"));
            assert!(html.contains("Enabled/Total Routes<span class=\"secondary-content\">1/2</span>"));
            assert!(html.contains("Enabled/Total Exits<span class=\"secondary-content\">1/1</span>"));
        }
    }

    #[tokio::test]
    async fn machines_page_lists_cards() {
        let h = harness(&[], true).await;
        let node = h.hs.add_node("edge-router", "alice").await;
        h.hs.add_route(node.id, "192.168.0.0/24", true).await;

        let resp = send(&h.state, "GET", "/machines", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains("edge-router"));
        assert!(html.contains("192.168.0.0/24"));
    }

    #[tokio::test]
    async fn failed_key_listing_only_affects_that_user() {
        let h = harness(&[], true).await;
        h.hs.add_user("alice").await;
        h.hs.add_user("bob").await;
        h.hs.fail_preauth_listing("bob").await;

        let resp = send(&h.state, "GET", "/users", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains("No keys defined for this user"));
        assert!(html.contains("Pre-auth keys unavailable"));
        assert_eq!(html.matches("Pre-auth keys unavailable").count(), 1);
    }

    #[tokio::test]
    async fn routes_page_without_routes() {
        let h = harness(&[], true).await;
        let resp = send(&h.state, "GET", "/routes", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("There are no routes to display!"));
    }

    #[tokio::test]
    async fn settings_shows_valid_key_and_build_info() {
        let h = harness(&[("GIT_BRANCH", "main")], true).await;
        let resp = send(&h.state, "GET", "/settings", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains("API key valid"));
        assert!(html.contains("abcdefghij"));
        assert!(html.contains("<td>main</td>"));
    }

    #[tokio::test]
    async fn basic_logout_returns_to_overview() {
        let h = harness(&[], true).await;
        let resp = send(&h.state, "GET", "/logout", None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()["location"], "/overview");
    }
}
