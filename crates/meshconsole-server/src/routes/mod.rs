//! HTTP routes for the console.
//!
//! Layering, innermost first:
//!
//! - pages and API endpoints that need Headscale sit behind [`require_key`]
//! - those plus `/settings`, `/logout`, `/api/test_key` and `/api/save_key`
//!   sit behind [`require_login`]
//! - the OIDC endpoints and `/error` are public

pub mod api;
pub mod oidc;
pub mod pages;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::response::Response;
use axum::extract::State;
use axum::routing::get;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{require_key, require_login};
use crate::error::{SETTINGS_PATH, SettingsRedirect};
use crate::state::AppState;

/// Build the console router over `state`, mounted under the base path.
pub fn router(state: Arc<AppState>) -> Router {
    let key_gated = pages::router()
        .merge(api::router())
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_key,
        ));

    let logged_in = key_gated
        .merge(pages::settings_router())
        .merge(api::key_router())
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_login,
        ));

    let inner = logged_in
        .merge(oidc::router())
        .route("/error", get(pages::error_redirect))
        .layer(middleware::map_response_with_state(
            Arc::clone(&state),
            rebase_settings_redirect,
        ))
        .with_state(Arc::clone(&state));

    harden(with_base_path(&state.config.base_path, inner))
}

/// Mount `app` under `base` (a normalized `SCRIPT_NAME`), if any.
pub fn with_base_path(base: &str, app: Router) -> Router {
    if base.is_empty() {
        app
    } else {
        Router::new().nest(base, app)
    }
}

/// Request tracing and security headers.
pub fn harden(router: Router) -> Router {
    router
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

/// Point settings redirects raised by errors at the mounted settings page.
async fn rebase_settings_redirect(
    State(state): State<Arc<AppState>>,
    mut response: Response,
) -> Response {
    if response.extensions().get::<SettingsRedirect>().is_some() {
        if let Ok(location) = HeaderValue::from_str(&state.config.url(SETTINGS_PATH)) {
            response.headers_mut().insert(header::LOCATION, location);
        }
    }
    response
}
