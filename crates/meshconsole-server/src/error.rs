//! HTTP error types for the `MeshConsole` server.
//!
//! Maps domain errors from `meshconsole-core` and `meshconsole-client` into
//! HTTP responses. Most variants produce a JSON body with a machine-readable
//! `error` field and a human-readable `message`. A missing or rejected API
//! key instead redirects the browser to the settings page.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;

use meshconsole_client::ClientError;
use meshconsole_core::error::{CredentialError, LifecycleError};

/// Path of the settings page, relative to the base path.
pub const SETTINGS_PATH: &str = "/settings";

/// Marks a redirect to [`SETTINGS_PATH`] whose `Location` still lacks the
/// configured base path.
#[derive(Debug, Clone, Copy)]
pub struct SettingsRedirect;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// No API key has been saved yet.
    Unconfigured,
    /// The stored API key is unreadable or rejected upstream.
    InvalidKey,
    /// Console login required (basic auth challenge).
    Unauthorized(String),
    /// A key submitted for testing was rejected.
    Unauthenticated(String),
    /// Upstream answered with a non-success status.
    Upstream { status: u16, message: String },
    /// Upstream could not be reached or timed out.
    UpstreamUnreachable(String),
    /// The data directory or key file has wrong permissions.
    Permission(String),
    /// One half of an exit route pair toggled and the other did not.
    PartialToggleFailure(String),
    /// Client sent invalid input.
    Validation(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unconfigured | Self::InvalidKey => {
                let mut resp = Redirect::to(SETTINGS_PATH).into_response();
                resp.extensions_mut().insert(SettingsRedirect);
                return resp;
            }
            Self::Unauthorized(msg) => {
                let body = ErrorBody {
                    error: "unauthorized",
                    message: msg,
                };
                return (
                    StatusCode::UNAUTHORIZED,
                    [(
                        header::WWW_AUTHENTICATE,
                        HeaderValue::from_static("Basic realm=\"MeshConsole\""),
                    )],
                    axum::Json(body),
                )
                    .into_response();
            }
            Self::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg),
            Self::Upstream { status, message } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                "upstream_error",
                message,
            ),
            Self::UpstreamUnreachable(msg) => (StatusCode::BAD_GATEWAY, "upstream_unreachable", msg),
            Self::Permission(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "permission_error", msg),
            Self::PartialToggleFailure(msg) => {
                (StatusCode::BAD_GATEWAY, "partial_toggle_failure", msg)
            }
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unauthorized { .. } => Self::InvalidKey,
            ClientError::Api { status, message } => Self::Upstream { status, message },
            ClientError::Timeout | ClientError::Unreachable { .. } | ClientError::Network(_) => {
                Self::UpstreamUnreachable(err.to_string())
            }
            ClientError::Json(_) => Self::Upstream {
                status: err.status(),
                message: err.to_string(),
            },
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        if err.is_permission_denied() {
            return Self::Permission(err.to_string());
        }
        match err {
            CredentialError::NotConfigured => Self::Unconfigured,
            CredentialError::Decryption(_) | CredentialError::Encoding => Self::InvalidKey,
            CredentialError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Unconfigured => Self::Unconfigured,
            LifecycleError::KeyNotFound { .. } | LifecycleError::Unauthorized { .. } => {
                Self::InvalidKey
            }
            LifecycleError::Credential(inner) | LifecycleError::Persist(inner) => inner.into(),
            LifecycleError::Upstream(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use meshconsole_storage::StorageError;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upstream_status_is_forwarded_verbatim() {
        let err: AppError = ClientError::Api {
            status: 404,
            message: "node not found".to_owned(),
        }
        .into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "upstream_error");
        assert_eq!(body["message"], "node not found");
    }

    #[test]
    fn rejected_key_redirects_to_settings() {
        let err: AppError = ClientError::Unauthorized {
            message: "Unauthorized".to_owned(),
        }
        .into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], SETTINGS_PATH);
        assert!(resp.extensions().get::<SettingsRedirect>().is_some());
    }

    #[test]
    fn unreachable_upstream_is_bad_gateway() {
        let err: AppError = ClientError::Timeout.into();
        assert!(matches!(err, AppError::UpstreamUnreachable(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn lifecycle_errors_map_to_key_states() {
        assert!(matches!(
            AppError::from(LifecycleError::Unconfigured),
            AppError::Unconfigured
        ));
        assert!(matches!(
            AppError::from(LifecycleError::KeyNotFound {
                prefix: "abcdefghij".to_owned()
            }),
            AppError::InvalidKey
        ));
    }

    #[test]
    fn permission_denied_is_reported_as_such() {
        let err: AppError = LifecycleError::Persist(CredentialError::Storage(StorageError::Write {
            name: "key.txt".to_owned(),
            reason: "permission denied".to_owned(),
            kind: std::io::ErrorKind::PermissionDenied,
        }))
        .into();
        assert!(matches!(err, AppError::Permission(_)));
    }

    #[tokio::test]
    async fn validation_error_shape() {
        let resp = AppError::Validation("route_ids: length".to_owned()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "validation_error");
    }

    #[test]
    fn basic_challenge_header() {
        let resp = AppError::Unauthorized("login required".to_owned()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));

        let resp = AppError::Unauthenticated("Unauthenticated".to_owned()).into_response();
        assert!(!resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
