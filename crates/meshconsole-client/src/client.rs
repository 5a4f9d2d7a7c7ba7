//! REST implementation of [`Headscale`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ClientError;
use crate::types::{
    ApiErrorBody, ApiKeysResponse, CreateApiKeyResponse, NodeResponse, NodesResponse,
    PreAuthKeyResponse, PreAuthKeysResponse, RoutesResponse, UserResponse, UsersResponse,
};
use crate::{ApiKey, CreatePreAuthKey, Headscale, Node, PreAuthKey, Route, User};

/// HTTP client for a Headscale server.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HeadscaleClient {
    base_url: String,
    client: reqwest::Client,
}

impl HeadscaleClient {
    /// Create a client for the server at `base_url`.
    ///
    /// Every request is bounded by `timeout`. There are no retries; a failed
    /// call is reported to the caller as is.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Network`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("meshconsole/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Network)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Base URL of the upstream server, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // --- Private ---

    async fn send(
        &self,
        method: Method,
        path: &str,
        key: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, path = %path, "headscale request");

        let mut req = self.client.request(method, &url);
        if let Some(key) = key {
            req = req.bearer_auth(key);
        }
        if let Some(ref b) = body {
            req = req.json(b);
        }

        let resp = req.send().await.map_err(map_send_error)?;
        let status = resp.status();

        if status.is_success() {
            return resp.text().await.map_err(map_send_error);
        }

        // Parse error body
        let error_text = resp.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<ApiErrorBody>(&error_text)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                let trimmed = error_text.trim();
                if trimmed.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    trimmed.to_owned()
                }
            });

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized { message: msg });
        }

        Err(ClientError::Api {
            status: status.as_u16(),
            message: msg,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        key: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ClientError> {
        let text = self.send(method, path, Some(key), body).await?;
        if text.trim().is_empty() {
            // Empty bodies on DELETE and friends.
            return serde_json::from_str("{}").map_err(ClientError::Json);
        }
        serde_json::from_str(&text).map_err(ClientError::Json)
    }
}

fn map_send_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else if e.is_connect() {
        ClientError::Unreachable {
            reason: e.to_string(),
        }
    } else {
        ClientError::Network(e)
    }
}

fn enc(segment: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(segment)
}

#[async_trait::async_trait]
impl Headscale for HeadscaleClient {
    async fn health(&self) -> Result<(), ClientError> {
        self.send(Method::GET, "/health", None, None).await?;
        Ok(())
    }

    async fn list_api_keys(&self, key: &str) -> Result<Vec<ApiKey>, ClientError> {
        let resp: ApiKeysResponse = self.request(Method::GET, "/api/v1/apikey", key, None).await?;
        Ok(resp.api_keys)
    }

    async fn create_api_key(
        &self,
        key: &str,
        expiration: DateTime<Utc>,
    ) -> Result<String, ClientError> {
        let body = serde_json::json!({ "expiration": expiration.to_rfc3339() });
        let resp: CreateApiKeyResponse = self
            .request(Method::POST, "/api/v1/apikey", key, Some(body))
            .await?;
        Ok(resp.api_key)
    }

    async fn expire_api_key(&self, key: &str, prefix: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({ "prefix": prefix });
        self.request::<serde_json::Value>(Method::POST, "/api/v1/apikey/expire", key, Some(body))
            .await?;
        Ok(())
    }

    async fn list_nodes(&self, key: &str) -> Result<Vec<Node>, ClientError> {
        let resp: NodesResponse = self.request(Method::GET, "/api/v1/node", key, None).await?;
        Ok(resp.nodes)
    }

    async fn get_node(&self, key: &str, node_id: u64) -> Result<Node, ClientError> {
        let path = format!("/api/v1/node/{node_id}");
        let resp: NodeResponse = self.request(Method::GET, &path, key, None).await?;
        Ok(resp.node)
    }

    async fn delete_node(&self, key: &str, node_id: u64) -> Result<(), ClientError> {
        let path = format!("/api/v1/node/{node_id}");
        self.request::<serde_json::Value>(Method::DELETE, &path, key, None)
            .await?;
        Ok(())
    }

    async fn rename_node(
        &self,
        key: &str,
        node_id: u64,
        new_name: &str,
    ) -> Result<Node, ClientError> {
        let path = format!("/api/v1/node/{node_id}/rename/{}", enc(new_name));
        let resp: NodeResponse = self.request(Method::POST, &path, key, None).await?;
        Ok(resp.node)
    }

    async fn move_node(&self, key: &str, node_id: u64, user: &str) -> Result<Node, ClientError> {
        let path = format!("/api/v1/node/{node_id}/user?user={}", enc(user));
        let resp: NodeResponse = self.request(Method::POST, &path, key, None).await?;
        Ok(resp.node)
    }

    async fn set_tags(
        &self,
        key: &str,
        node_id: u64,
        tags: &[String],
    ) -> Result<Node, ClientError> {
        let path = format!("/api/v1/node/{node_id}/tags");
        let body = serde_json::json!({ "tags": tags });
        let resp: NodeResponse = self.request(Method::POST, &path, key, Some(body)).await?;
        Ok(resp.node)
    }

    async fn register_node(
        &self,
        key: &str,
        user: &str,
        machine_key: &str,
    ) -> Result<Node, ClientError> {
        let path = format!(
            "/api/v1/node/register?user={}&key={}",
            enc(user),
            enc(machine_key)
        );
        let resp: NodeResponse = self.request(Method::POST, &path, key, None).await?;
        Ok(resp.node)
    }

    async fn node_routes(&self, key: &str, node_id: u64) -> Result<Vec<Route>, ClientError> {
        let path = format!("/api/v1/node/{node_id}/routes");
        let resp: RoutesResponse = self.request(Method::GET, &path, key, None).await?;
        Ok(resp.routes)
    }

    async fn list_routes(&self, key: &str) -> Result<Vec<Route>, ClientError> {
        let resp: RoutesResponse = self.request(Method::GET, "/api/v1/routes", key, None).await?;
        Ok(resp.routes)
    }

    async fn enable_route(&self, key: &str, route_id: u64) -> Result<(), ClientError> {
        let path = format!("/api/v1/routes/{route_id}/enable");
        self.request::<serde_json::Value>(Method::POST, &path, key, None)
            .await?;
        Ok(())
    }

    async fn disable_route(&self, key: &str, route_id: u64) -> Result<(), ClientError> {
        let path = format!("/api/v1/routes/{route_id}/disable");
        self.request::<serde_json::Value>(Method::POST, &path, key, None)
            .await?;
        Ok(())
    }

    async fn list_users(&self, key: &str) -> Result<Vec<User>, ClientError> {
        let resp: UsersResponse = self.request(Method::GET, "/api/v1/user", key, None).await?;
        Ok(resp.users)
    }

    async fn create_user(&self, key: &str, name: &str) -> Result<User, ClientError> {
        let body = serde_json::json!({ "name": name });
        let resp: UserResponse = self
            .request(Method::POST, "/api/v1/user", key, Some(body))
            .await?;
        Ok(resp.user)
    }

    async fn rename_user(
        &self,
        key: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<User, ClientError> {
        let path = format!("/api/v1/user/{}/rename/{}", enc(old_name), enc(new_name));
        let resp: UserResponse = self.request(Method::POST, &path, key, None).await?;
        Ok(resp.user)
    }

    async fn delete_user(&self, key: &str, name: &str) -> Result<(), ClientError> {
        let path = format!("/api/v1/user/{}", enc(name));
        self.request::<serde_json::Value>(Method::DELETE, &path, key, None)
            .await?;
        Ok(())
    }

    async fn list_preauth_keys(
        &self,
        key: &str,
        user: &str,
    ) -> Result<Vec<PreAuthKey>, ClientError> {
        let path = format!("/api/v1/preauthkey?user={}", enc(user));
        let resp: PreAuthKeysResponse = self.request(Method::GET, &path, key, None).await?;
        Ok(resp.pre_auth_keys)
    }

    async fn create_preauth_key(
        &self,
        key: &str,
        request: &CreatePreAuthKey,
    ) -> Result<PreAuthKey, ClientError> {
        let body = serde_json::to_value(request)?;
        let resp: PreAuthKeyResponse = self
            .request(Method::POST, "/api/v1/preauthkey", key, Some(body))
            .await?;
        Ok(resp.pre_auth_key)
    }

    async fn expire_preauth_key(
        &self,
        key: &str,
        user: &str,
        preauth_key: &str,
    ) -> Result<(), ClientError> {
        let body = serde_json::json!({ "user": user, "key": preauth_key });
        self.request::<serde_json::Value>(
            Method::POST,
            "/api/v1/preauthkey/expire",
            key,
            Some(body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    const GOOD_KEY: &str = "abcdefghij.secret";

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {GOOD_KEY}"))
    }

    async fn routes_handler(
        headers: HeaderMap,
    ) -> Result<Json<serde_json::Value>, (AxumStatus, &'static str)> {
        if !authorized(&headers) {
            return Err((AxumStatus::UNAUTHORIZED, "Unauthorized"));
        }
        Ok(Json(serde_json::json!({
            "routes": [
                {"id": "1", "node": {"id": "2", "name": "a", "givenName": "alpha"},
                 "prefix": "10.0.0.0/8", "advertised": true, "enabled": true, "isPrimary": true},
                {"id": "2", "node": {"id": "0", "name": ""},
                 "prefix": "::/0", "advertised": true, "enabled": false, "isPrimary": false}
            ]
        })))
    }

    async fn missing_node(Path(id): Path<u64>) -> (AxumStatus, Json<serde_json::Value>) {
        (
            AxumStatus::NOT_FOUND,
            Json(serde_json::json!({"code": 5, "message": format!("node {id} not found")})),
        )
    }

    fn app() -> Router {
        Router::new()
            .route("/health", get(|| async { Json(serde_json::json!({"status": "pass"})) }))
            .route("/api/v1/routes", get(routes_handler))
            .route("/api/v1/node/{id}", get(missing_node))
            .route(
                "/api/v1/routes/{id}/enable",
                post(|| async { Json(serde_json::json!({})) }),
            )
            .route(
                "/api/v1/node/{id}/routes",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(serde_json::json!({"routes": []}))
                }),
            )
    }

    #[tokio::test]
    async fn health_succeeds_without_key() {
        let base = serve(app()).await;
        let client = HeadscaleClient::new(&base, Duration::from_secs(5)).unwrap();
        client.health().await.unwrap();
    }

    #[tokio::test]
    async fn list_routes_sends_bearer_and_parses() {
        let base = serve(app()).await;
        let client = HeadscaleClient::new(&format!("{base}/"), Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), base);

        let routes = client.list_routes(GOOD_KEY).await.unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].machine_name, "alpha");
        assert_eq!(routes[1].machine_id, 0);
    }

    #[tokio::test]
    async fn rejected_key_maps_to_unauthorized() {
        let base = serve(app()).await;
        let client = HeadscaleClient::new(&base, Duration::from_secs(5)).unwrap();
        let err = client.list_routes("wrong").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn upstream_error_message_is_kept() {
        let base = serve(app()).await;
        let client = HeadscaleClient::new(&base, Duration::from_secs(5)).unwrap();
        let err = client.get_node(GOOD_KEY, 42).await.unwrap_err();
        assert!(
            matches!(&err, ClientError::Api { status: 404, message } if message == "node 42 not found"),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn empty_object_response_is_ok() {
        let base = serve(app()).await;
        let client = HeadscaleClient::new(&base, Duration::from_secs(5)).unwrap();
        client.enable_route(GOOD_KEY, 1).await.unwrap();
    }

    #[tokio::test]
    async fn slow_upstream_times_out_without_retry() {
        let base = serve(app()).await;
        let client = HeadscaleClient::new(&base, Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let err = client.node_routes(GOOD_KEY, 1).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert!(err.is_unreachable());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HeadscaleClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
