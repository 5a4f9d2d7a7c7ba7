//! Typed client for the Headscale management API.
//!
//! [`Headscale`] is the seam between the console and the coordination
//! server. Two implementations are provided:
//!
//! - [`HeadscaleClient`] talks REST to a real server with bearer-token auth,
//!   a bounded timeout, and no automatic retries
//! - [`MemoryHeadscale`] keeps users, machines, routes and keys in memory and
//!   is used by tests throughout the workspace
//!
//! Every call takes the API key explicitly, so callers can test a candidate
//! key without touching the stored one.
//!
//! # Quick start
//!
//! ```no_run
//! use meshconsole_client::{Headscale, HeadscaleClient};
//!
//! # async fn run() -> Result<(), meshconsole_client::ClientError> {
//! let client = HeadscaleClient::new("https://headscale.example.com", std::time::Duration::from_secs(10))?;
//! let users = client.list_users("my-api-key").await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod memory;
mod types;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use client::HeadscaleClient;
pub use error::ClientError;
pub use memory::MemoryHeadscale;
pub use types::{ApiKey, CreatePreAuthKey, Node, PreAuthKey, Route, User};

/// Default outbound request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of the API key prefix upstream reports in key listings.
pub const API_KEY_PREFIX_LEN: usize = 10;

/// The first [`API_KEY_PREFIX_LEN`] characters of a key.
#[must_use]
pub fn key_prefix(key: &str) -> &str {
    match key.char_indices().nth(API_KEY_PREFIX_LEN) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

/// Operations the console performs against the coordination server.
///
/// `key` is the bearer API key used for the call. Implementations map a
/// rejected key to [`ClientError::Unauthorized`] and never retry.
#[async_trait::async_trait]
pub trait Headscale: Send + Sync + 'static {
    /// Unauthenticated liveness check.
    async fn health(&self) -> Result<(), ClientError>;

    // ── API keys ─────────────────────────────────────────────────────

    /// List the API keys of the account owning `key`.
    async fn list_api_keys(&self, key: &str) -> Result<Vec<ApiKey>, ClientError>;

    /// Mint a new API key; returns the full secret.
    async fn create_api_key(
        &self,
        key: &str,
        expiration: DateTime<Utc>,
    ) -> Result<String, ClientError>;

    /// Expire the API key with the given prefix.
    async fn expire_api_key(&self, key: &str, prefix: &str) -> Result<(), ClientError>;

    // ── Machines ─────────────────────────────────────────────────────

    async fn list_nodes(&self, key: &str) -> Result<Vec<Node>, ClientError>;

    async fn get_node(&self, key: &str, node_id: u64) -> Result<Node, ClientError>;

    async fn delete_node(&self, key: &str, node_id: u64) -> Result<(), ClientError>;

    async fn rename_node(
        &self,
        key: &str,
        node_id: u64,
        new_name: &str,
    ) -> Result<Node, ClientError>;

    async fn move_node(&self, key: &str, node_id: u64, user: &str) -> Result<Node, ClientError>;

    async fn set_tags(
        &self,
        key: &str,
        node_id: u64,
        tags: &[String],
    ) -> Result<Node, ClientError>;

    /// Register a pending machine under `user` with its machine key.
    async fn register_node(
        &self,
        key: &str,
        user: &str,
        machine_key: &str,
    ) -> Result<Node, ClientError>;

    /// Routes advertised by a single machine.
    async fn node_routes(&self, key: &str, node_id: u64) -> Result<Vec<Route>, ClientError>;

    // ── Routes ───────────────────────────────────────────────────────

    async fn list_routes(&self, key: &str) -> Result<Vec<Route>, ClientError>;

    async fn enable_route(&self, key: &str, route_id: u64) -> Result<(), ClientError>;

    async fn disable_route(&self, key: &str, route_id: u64) -> Result<(), ClientError>;

    // ── Users ────────────────────────────────────────────────────────

    async fn list_users(&self, key: &str) -> Result<Vec<User>, ClientError>;

    async fn create_user(&self, key: &str, name: &str) -> Result<User, ClientError>;

    async fn rename_user(
        &self,
        key: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<User, ClientError>;

    async fn delete_user(&self, key: &str, name: &str) -> Result<(), ClientError>;

    // ── Pre-auth keys ────────────────────────────────────────────────

    async fn list_preauth_keys(
        &self,
        key: &str,
        user: &str,
    ) -> Result<Vec<PreAuthKey>, ClientError>;

    async fn create_preauth_key(
        &self,
        key: &str,
        request: &CreatePreAuthKey,
    ) -> Result<PreAuthKey, ClientError>;

    async fn expire_preauth_key(
        &self,
        key: &str,
        user: &str,
        preauth_key: &str,
    ) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_of_long_key() {
        assert_eq!(key_prefix("abcdefghijKLMNOP"), "abcdefghij");
    }

    #[test]
    fn prefix_of_short_key_is_whole_key() {
        assert_eq!(key_prefix("abc"), "abc");
        assert_eq!(key_prefix(""), "");
    }
}
