//! Startup checks and diagnostics mode.
//!
//! Before serving, the console verifies its environment: configuration,
//! data directory access, the stored key file, the optional upstream config
//! file, and upstream reachability. Every failed check becomes an
//! [`InitCheck`]. If any check fails the server runs in diagnostics mode:
//! only `/error` is served and every other path redirects there.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::response::{Html, Redirect};
use axum::routing::get;
use meshconsole_client::Headscale;
use meshconsole_core::credential::KEY_BLOB;

use crate::config::ServerConfig;
use crate::{render, routes};

/// Name looked up inside the data directory to test traversal.
const TRAVERSE_MARKER: &str = ".meshconsole-traverse";

/// A failed startup check, shown on the error page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCheck {
    pub title: String,
    pub details: String,
}

impl InitCheck {
    #[must_use]
    pub fn new(title: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            details: details.into(),
        }
    }

    /// A missing or malformed environment variable.
    #[must_use]
    pub fn environment(var: &str, details: impl Into<String>) -> Self {
        Self::new(format!("Environment error for {var}"), details)
    }

    /// A failure no specific check anticipated.
    #[must_use]
    pub fn unexpected(kind: &str, error: &impl Display) -> Self {
        Self::new(
            format!("Unexpected error occurred: {kind}. Raise an issue on GitHub."),
            error.to_string(),
        )
    }
}

/// Run the filesystem checks for `config`.
#[must_use]
pub fn check_filesystem(config: &ServerConfig) -> Vec<InitCheck> {
    let mut checks = check_data_dir(&config.data_dir);
    checks.extend(check_key_file(&config.data_dir.join(KEY_BLOB)));
    checks
}

/// The data directory must exist and be readable, writable and traversable.
#[must_use]
pub fn check_data_dir(dir: &Path) -> Vec<InitCheck> {
    let shown = dir.display();
    match fs::metadata(dir) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return vec![InitCheck::new(
                format!("Data ({shown}) folder does not exist."),
                format!(
                    "\"{shown}\" does not exist. Please create it and grant UID/GID \
                     1000:1000 full access to it."
                ),
            )];
        }
        Ok(meta) if !meta.is_dir() => {
            return vec![InitCheck::new(
                format!("Data ({shown}) is not a folder."),
                format!("\"{shown}\" must be a directory."),
            )];
        }
        _ => {}
    }

    let mut checks = Vec::new();
    if fs::read_dir(dir).is_err() {
        checks.push(folder_issue(dir, "readable"));
    }
    if !can_create_file(dir) {
        checks.push(folder_issue(dir, "writable"));
    }
    if matches!(
        fs::metadata(dir.join(TRAVERSE_MARKER)),
        Err(e) if e.kind() == ErrorKind::PermissionDenied
    ) {
        checks.push(folder_issue(dir, "executable"));
    }
    checks
}

/// An existing key file must be readable and writable.
#[must_use]
pub fn check_key_file(path: &Path) -> Vec<InitCheck> {
    if !path.exists() {
        return Vec::new();
    }

    let mut checks = Vec::new();
    if fs::read(path).is_err() {
        checks.push(key_issue(path, "readable"));
    }
    if OpenOptions::new().append(true).open(path).is_err() {
        checks.push(key_issue(path, "writable"));
    }
    checks
}

/// Upstream must answer its health check.
pub async fn check_upstream(api: &dyn Headscale) -> Option<InitCheck> {
    match api.health().await {
        Ok(()) => None,
        Err(e) => Some(InitCheck::new(
            "Headscale server API is unreachable.",
            format!(
                "Your headscale server is either unreachable or not properly configured. \
                 Please ensure your configuration is correct. Error details: {e}"
            ),
        )),
    }
}

/// Build the diagnostics-mode router serving only the error page.
pub fn router(config: &ServerConfig, checks: &[InitCheck]) -> Router {
    tracing::error!(
        failed = checks.len(),
        "initialization checks failed, serving only the error page until restarted"
    );
    for check in checks {
        tracing::error!(title = %check.title, details = %check.details, "initialization check failed");
    }

    let page = Arc::new(render::error_page(config, checks));
    let target = config.url("/error");

    let inner = Router::new()
        .route(
            "/error",
            get(move || {
                let page = Arc::clone(&page);
                async move { Html(String::clone(&page)) }
            }),
        )
        .fallback(move || {
            let target = target.clone();
            async move { Redirect::to(&target) }
        });

    routes::harden(routes::with_base_path(&config.base_path, inner))
}

fn folder_issue(dir: &Path, what: &str) -> InitCheck {
    let shown = dir.display();
    InitCheck::new(
        format!("Data ({shown}) folder not {what}."),
        format!(
            "\"{shown}\" is not {what}. Please ensure your permissions are correct. Data \
             should be {what} by UID/GID 1000:1000."
        ),
    )
}

fn key_issue(path: &Path, what: &str) -> InitCheck {
    let shown = path.display();
    InitCheck::new(
        format!("Key file ({shown}) not {what}."),
        format!(
            "\"{shown}\" is not {what}. Please ensure your permissions are correct. It \
             should be {what} by UID/GID 1000:1000."
        ),
    )
}

fn can_create_file(dir: &Path) -> bool {
    let marker = dir.join(format!(".meshconsole-write-check-{}", uuid::Uuid::new_v4().simple()));
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => {
            let _ = fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use meshconsole_client::MemoryHeadscale;
    use tower::ServiceExt;

    #[test]
    fn missing_data_dir_is_one_issue() {
        let dir = tempfile::tempdir().unwrap();
        let checks = check_data_dir(&dir.path().join("absent"));
        assert_eq!(checks.len(), 1);
        assert!(checks[0].title.ends_with("folder does not exist."));
    }

    #[test]
    fn usable_data_dir_passes_and_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_data_dir(dir.path()).is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn data_dir_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        let checks = check_data_dir(&file);
        assert_eq!(checks.len(), 1);
        assert!(checks[0].title.contains("is not a folder"));
    }

    #[test]
    fn absent_key_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_key_file(&dir.path().join(KEY_BLOB)).is_empty());
    }

    #[test]
    fn unusable_key_file_reports_both_checks() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join(KEY_BLOB);
        fs::create_dir(&key).unwrap();
        let titles: Vec<String> = check_key_file(&key).into_iter().map(|c| c.title).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles[0].ends_with("not readable."));
        assert!(titles[1].ends_with("not writable."));
    }

    #[tokio::test]
    async fn unhealthy_upstream_is_reported() {
        let api = MemoryHeadscale::new();
        assert!(check_upstream(&api).await.is_none());
        api.set_healthy(false).await;
        let check = check_upstream(&api).await.unwrap();
        assert_eq!(check.title, "Headscale server API is unreachable.");
        assert!(check.details.contains("Error details:"));
    }

    fn config(base: &str) -> ServerConfig {
        let (config, _) = ServerConfig::from_lookup(|name| match name {
            "HS_SERVER" => Some("http://hs".to_owned()),
            "KEY" => Some("k".to_owned()),
            "SCRIPT_NAME" => Some(base.to_owned()),
            _ => None,
        });
        config
    }

    #[tokio::test]
    async fn diagnostics_mode_redirects_everything_to_error() {
        let checks = vec![InitCheck::environment("KEY", "Required variable KEY is not set or empty.")];
        let app = router(&config(""), &checks);

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/machines").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/error");

        let resp = app
            .oneshot(Request::builder().uri("/error").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Environment error for KEY"));
    }

    #[tokio::test]
    async fn diagnostics_mode_honours_base_path() {
        let checks = vec![InitCheck::new("t", "d")];
        let app = router(&config("/console"), &checks);
        let resp = app
            .oneshot(Request::builder().uri("/console/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::LOCATION], "/console/error");
    }
}
