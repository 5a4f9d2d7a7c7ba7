//! Validated JSON extractor.
//!
//! `ValidJson<T>` works like `axum::Json<T>` but also runs
//! `validator::Validate::validate()` on the deserialized value. Malformed
//! JSON, missing fields and failed validation all become
//! [`AppError::Validation`] (400 `validation_error`), so a rejected request
//! never reaches a handler.

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// An extractor that deserializes JSON and validates it.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;

        value
            .validate()
            .map_err(|errors| AppError::Validation(describe(&errors)))?;

        Ok(Self(value))
    }
}

/// `field: code` pairs, sorted by field name.
fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let msg = e
                    .message
                    .as_ref()
                    .map_or_else(|| e.code.to_string(), ToString::to_string);
                format!("{field}: {msg}")
            })
        })
        .collect();
    fields.sort();

    if fields.is_empty() {
        "Validation failed".to_owned()
    } else {
        fields.join("; ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize, Validate)]
    struct RenameBody {
        #[validate(range(min = 1))]
        machine_id: u64,
        #[validate(length(min = 1))]
        new_name: String,
    }

    async fn handler(ValidJson(body): ValidJson<RenameBody>) -> String {
        format!("{}:{}", body.machine_id, body.new_name)
    }

    async fn send(json: &str) -> (StatusCode, String) {
        let app = Router::new().route("/rename", post(handler));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/rename")
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_owned()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn valid_body_reaches_handler() {
        let (status, body) = send(r#"{"machine_id": 3, "new_name": "gw"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "3:gw");
    }

    #[tokio::test]
    async fn malformed_json_is_validation_error() {
        let (status, body) = send("not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("validation_error"));
    }

    #[tokio::test]
    async fn missing_field_is_validation_error() {
        let (status, _) = send(r#"{"machine_id": 3}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_rules_name_the_fields() {
        let (status, body) = send(r#"{"machine_id": 0, "new_name": ""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("machine_id: range"));
        assert!(body.contains("new_name: length"));
    }
}
