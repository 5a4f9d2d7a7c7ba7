//! In-memory Headscale for testing.
//!
//! Holds users, machines, routes, pre-auth keys and API keys behind a
//! `RwLock`. API keys are checked on every call the same way upstream does:
//! an unknown or expired key yields [`ClientError::Unauthorized`]. Counters
//! and failure knobs let tests assert exactly which calls were made.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    ApiKey, ClientError, CreatePreAuthKey, Headscale, Node, PreAuthKey, Route, User, key_prefix,
};

/// An in-memory coordination server.
///
/// Cloning shares state, so a test can keep a handle while the code under
/// test holds an `Arc<dyn Headscale>`.
///
/// # Examples
///
/// ```
/// # use meshconsole_client::{Headscale, MemoryHeadscale};
/// # #[tokio::main]
/// # async fn main() {
/// let hs = MemoryHeadscale::new();
/// hs.seed_api_key("abcdefghij.secret", chrono::Utc::now() + chrono::Duration::days(30)).await;
/// hs.add_user("alice").await;
/// let users = hs.list_users("abcdefghij.secret").await.unwrap();
/// assert_eq!(users.len(), 1);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryHeadscale {
    state: Arc<RwLock<State>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicUsize,
    mints: AtomicUsize,
    mutations: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    api_keys: Vec<StoredKey>,
    users: Vec<User>,
    nodes: Vec<Node>,
    routes: Vec<Route>,
    preauth_keys: Vec<PreAuthKey>,
    next_id: u64,
    unhealthy: bool,
    reject_minted: bool,
    failing_routes: BTreeSet<u64>,
    failing_preauth_users: BTreeSet<String>,
}

#[derive(Debug)]
struct StoredKey {
    secret: String,
    info: ApiKey,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }

    fn authorize(&self, key: &str) -> Result<(), ClientError> {
        let now = Utc::now();
        let valid = self
            .api_keys
            .iter()
            .any(|k| k.secret == key && k.info.expiration.is_none_or(|exp| exp > now));
        if valid {
            Ok(())
        } else {
            Err(ClientError::Unauthorized {
                message: "Unauthorized".to_owned(),
            })
        }
    }

    fn node_mut(&mut self, node_id: u64) -> Result<&mut Node, ClientError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| not_found(format!("node {node_id} not found")))
    }

    fn user(&self, name: &str) -> Result<User, ClientError> {
        self.users
            .iter()
            .find(|u| u.name == name)
            .cloned()
            .ok_or_else(|| not_found(format!("user '{name}' not found")))
    }
}

fn not_found(message: String) -> ClientError {
    ClientError::Api {
        status: 404,
        message,
    }
}

fn random_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

impl MemoryHeadscale {
    /// Create an empty, healthy server with no API keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ──────────────────────────────────────────────────────

    /// Register an API key directly, bypassing the mint endpoint.
    pub async fn seed_api_key(&self, secret: &str, expiration: DateTime<Utc>) -> ApiKey {
        let mut state = self.state.write().await;
        let info = ApiKey {
            id: state.next_id(),
            prefix: key_prefix(secret).to_owned(),
            expiration: Some(expiration),
            created_at: Some(Utc::now()),
            last_seen: None,
        };
        state.api_keys.push(StoredKey {
            secret: secret.to_owned(),
            info: info.clone(),
        });
        info
    }

    /// Add a user.
    pub async fn add_user(&self, name: &str) -> User {
        let mut state = self.state.write().await;
        let user = User {
            id: state.next_id(),
            name: name.to_owned(),
            created_at: Some(Utc::now()),
        };
        state.users.push(user.clone());
        user
    }

    /// Add a machine owned by `user` (which need not exist).
    pub async fn add_node(&self, name: &str, user: &str) -> Node {
        let mut state = self.state.write().await;
        let owner = state.user(user).ok().unwrap_or_else(|| User {
            id: 0,
            name: user.to_owned(),
            created_at: None,
        });
        let id = state.next_id();
        let now = Utc::now();
        let node = Node {
            id,
            name: name.to_owned(),
            given_name: name.to_owned(),
            user: Some(owner),
            ip_addresses: vec![format!("100.64.0.{}", id % 250)],
            last_seen: Some(now),
            last_successful_update: Some(now),
            expiry: None,
            created_at: Some(now),
            pre_auth_key: None,
            forced_tags: Vec::new(),
            valid_tags: Vec::new(),
            invalid_tags: Vec::new(),
            online: true,
        };
        state.nodes.push(node.clone());
        node
    }

    /// Add an advertised route. A `machine_id` of 0 creates an orphan route.
    pub async fn add_route(&self, machine_id: u64, prefix: &str, enabled: bool) -> Route {
        let mut state = self.state.write().await;
        let machine_name = state
            .nodes
            .iter()
            .find(|n| n.id == machine_id)
            .map(|n| n.display_name().to_owned())
            .unwrap_or_default();
        let route = Route {
            id: state.next_id(),
            prefix: prefix.to_owned(),
            advertised: true,
            enabled,
            is_primary: enabled,
            machine_id,
            machine_name,
        };
        state.routes.push(route.clone());
        route
    }

    /// Add a pre-auth key for `user`.
    pub async fn add_preauth_key(
        &self,
        user: &str,
        reusable: bool,
        used: bool,
        expiration: DateTime<Utc>,
    ) -> PreAuthKey {
        let mut state = self.state.write().await;
        let key = PreAuthKey {
            id: state.next_id(),
            user: user.to_owned(),
            key: random_secret(),
            reusable,
            ephemeral: false,
            used,
            expiration: Some(expiration),
            created_at: Some(Utc::now()),
            acl_tags: Vec::new(),
        };
        state.preauth_keys.push(key.clone());
        key
    }

    // ── Failure knobs ────────────────────────────────────────────────

    /// Make `/health` fail.
    pub async fn set_healthy(&self, healthy: bool) {
        self.state.write().await.unhealthy = !healthy;
    }

    /// Keep minting keys but never accept them afterwards.
    pub async fn reject_minted_keys(&self, reject: bool) {
        self.state.write().await.reject_minted = reject;
    }

    /// Make enable/disable calls for `route_id` fail with a 500.
    pub async fn fail_route(&self, route_id: u64) {
        self.state.write().await.failing_routes.insert(route_id);
    }

    /// Make pre-auth key listing for `user` fail with a 500.
    pub async fn fail_preauth_listing(&self, user: &str) {
        self.state
            .write()
            .await
            .failing_preauth_users
            .insert(user.to_owned());
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Number of calls received, of any kind.
    pub fn request_count(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Number of `create_api_key` calls that passed authorization.
    pub fn mint_count(&self) -> usize {
        self.counters.mints.load(Ordering::SeqCst)
    }

    /// Number of mutating calls that passed authorization.
    pub fn mutation_count(&self) -> usize {
        self.counters.mutations.load(Ordering::SeqCst)
    }

    /// Look up an API key by prefix.
    pub async fn api_key(&self, prefix: &str) -> Option<ApiKey> {
        let state = self.state.read().await;
        state
            .api_keys
            .iter()
            .find(|k| k.info.prefix == prefix)
            .map(|k| k.info.clone())
    }

    /// Current state of a route.
    pub async fn route(&self, route_id: u64) -> Option<Route> {
        let state = self.state.read().await;
        state.routes.iter().find(|r| r.id == route_id).cloned()
    }

    /// Current state of a machine.
    pub async fn node(&self, node_id: u64) -> Option<Node> {
        let state = self.state.read().await;
        state.nodes.iter().find(|n| n.id == node_id).cloned()
    }

    // --- Private ---

    async fn read_authorized(
        &self,
        key: &str,
    ) -> Result<tokio::sync::RwLockReadGuard<'_, State>, ClientError> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        state.authorize(key)?;
        Ok(state)
    }

    async fn write_authorized(
        &self,
        key: &str,
    ) -> Result<tokio::sync::RwLockWriteGuard<'_, State>, ClientError> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state.write().await;
        state.authorize(key)?;
        self.counters.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(state)
    }

    async fn toggle_route(&self, key: &str, route_id: u64, enabled: bool) -> Result<(), ClientError> {
        let mut state = self.write_authorized(key).await?;
        if state.failing_routes.contains(&route_id) {
            return Err(ClientError::Api {
                status: 500,
                message: format!("failed to update route {route_id}"),
            });
        }
        let route = state
            .routes
            .iter_mut()
            .find(|r| r.id == route_id)
            .ok_or_else(|| not_found(format!("route {route_id} not found")))?;
        route.enabled = enabled;
        route.is_primary = enabled;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Headscale for MemoryHeadscale {
    async fn health(&self) -> Result<(), ClientError> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        if self.state.read().await.unhealthy {
            return Err(ClientError::Unreachable {
                reason: "connection refused".to_owned(),
            });
        }
        Ok(())
    }

    async fn list_api_keys(&self, key: &str) -> Result<Vec<ApiKey>, ClientError> {
        let state = self.read_authorized(key).await?;
        Ok(state.api_keys.iter().map(|k| k.info.clone()).collect())
    }

    async fn create_api_key(
        &self,
        key: &str,
        expiration: DateTime<Utc>,
    ) -> Result<String, ClientError> {
        let mut state = self.write_authorized(key).await?;
        self.counters.mints.fetch_add(1, Ordering::SeqCst);
        let secret = random_secret();
        if !state.reject_minted {
            let info = ApiKey {
                id: state.next_id(),
                prefix: key_prefix(&secret).to_owned(),
                expiration: Some(expiration),
                created_at: Some(Utc::now()),
                last_seen: None,
            };
            state.api_keys.push(StoredKey {
                secret: secret.clone(),
                info,
            });
        }
        Ok(secret)
    }

    async fn expire_api_key(&self, key: &str, prefix: &str) -> Result<(), ClientError> {
        let mut state = self.write_authorized(key).await?;
        let stored = state
            .api_keys
            .iter_mut()
            .find(|k| k.info.prefix == prefix)
            .ok_or_else(|| not_found(format!("api key '{prefix}' not found")))?;
        stored.info.expiration = Some(Utc::now());
        Ok(())
    }

    async fn list_nodes(&self, key: &str) -> Result<Vec<Node>, ClientError> {
        let state = self.read_authorized(key).await?;
        Ok(state.nodes.clone())
    }

    async fn get_node(&self, key: &str, node_id: u64) -> Result<Node, ClientError> {
        let state = self.read_authorized(key).await?;
        state
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
            .ok_or_else(|| not_found(format!("node {node_id} not found")))
    }

    async fn delete_node(&self, key: &str, node_id: u64) -> Result<(), ClientError> {
        let mut state = self.write_authorized(key).await?;
        state.node_mut(node_id)?;
        state.nodes.retain(|n| n.id != node_id);
        state.routes.retain(|r| r.machine_id != node_id);
        Ok(())
    }

    async fn rename_node(
        &self,
        key: &str,
        node_id: u64,
        new_name: &str,
    ) -> Result<Node, ClientError> {
        let mut state = self.write_authorized(key).await?;
        let node = state.node_mut(node_id)?;
        new_name.clone_into(&mut node.given_name);
        let node = node.clone();
        for route in state.routes.iter_mut().filter(|r| r.machine_id == node_id) {
            new_name.clone_into(&mut route.machine_name);
        }
        Ok(node)
    }

    async fn move_node(&self, key: &str, node_id: u64, user: &str) -> Result<Node, ClientError> {
        let mut state = self.write_authorized(key).await?;
        let owner = state.user(user)?;
        let node = state.node_mut(node_id)?;
        node.user = Some(owner);
        Ok(node.clone())
    }

    async fn set_tags(
        &self,
        key: &str,
        node_id: u64,
        tags: &[String],
    ) -> Result<Node, ClientError> {
        let mut state = self.write_authorized(key).await?;
        if let Some(bad) = tags.iter().find(|t| !t.starts_with("tag:")) {
            return Err(ClientError::Api {
                status: 400,
                message: format!("invalid tag '{bad}': tags must start with 'tag:'"),
            });
        }
        let node = state.node_mut(node_id)?;
        node.forced_tags = tags.to_vec();
        Ok(node.clone())
    }

    async fn register_node(
        &self,
        key: &str,
        user: &str,
        machine_key: &str,
    ) -> Result<Node, ClientError> {
        let mut state = self.write_authorized(key).await?;
        let owner = state.user(user)?;
        if machine_key.is_empty() {
            return Err(ClientError::Api {
                status: 400,
                message: "machine key is required".to_owned(),
            });
        }
        let id = state.next_id();
        let name = format!("node-{id}");
        let now = Utc::now();
        let node = Node {
            id,
            name: name.clone(),
            given_name: name,
            user: Some(owner),
            ip_addresses: vec![format!("100.64.0.{}", id % 250)],
            last_seen: Some(now),
            last_successful_update: None,
            expiry: None,
            created_at: Some(now),
            pre_auth_key: None,
            forced_tags: Vec::new(),
            valid_tags: Vec::new(),
            invalid_tags: Vec::new(),
            online: false,
        };
        state.nodes.push(node.clone());
        Ok(node)
    }

    async fn node_routes(&self, key: &str, node_id: u64) -> Result<Vec<Route>, ClientError> {
        let state = self.read_authorized(key).await?;
        if !state.nodes.iter().any(|n| n.id == node_id) {
            return Err(not_found(format!("node {node_id} not found")));
        }
        Ok(state
            .routes
            .iter()
            .filter(|r| r.machine_id == node_id)
            .cloned()
            .collect())
    }

    async fn list_routes(&self, key: &str) -> Result<Vec<Route>, ClientError> {
        let state = self.read_authorized(key).await?;
        Ok(state.routes.clone())
    }

    async fn enable_route(&self, key: &str, route_id: u64) -> Result<(), ClientError> {
        self.toggle_route(key, route_id, true).await
    }

    async fn disable_route(&self, key: &str, route_id: u64) -> Result<(), ClientError> {
        self.toggle_route(key, route_id, false).await
    }

    async fn list_users(&self, key: &str) -> Result<Vec<User>, ClientError> {
        let state = self.read_authorized(key).await?;
        Ok(state.users.clone())
    }

    async fn create_user(&self, key: &str, name: &str) -> Result<User, ClientError> {
        let mut state = self.write_authorized(key).await?;
        if state.users.iter().any(|u| u.name == name) {
            return Err(ClientError::Api {
                status: 409,
                message: format!("user '{name}' already exists"),
            });
        }
        let user = User {
            id: state.next_id(),
            name: name.to_owned(),
            created_at: Some(Utc::now()),
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn rename_user(
        &self,
        key: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<User, ClientError> {
        let mut state = self.write_authorized(key).await?;
        state.user(old_name)?;
        if state.users.iter().any(|u| u.name == new_name) {
            return Err(ClientError::Api {
                status: 409,
                message: format!("user '{new_name}' already exists"),
            });
        }
        let mut renamed = None;
        for user in state.users.iter_mut().filter(|u| u.name == old_name) {
            new_name.clone_into(&mut user.name);
            renamed = Some(user.clone());
        }
        for owner in state.nodes.iter_mut().filter_map(|n| n.user.as_mut()) {
            if owner.name == old_name {
                new_name.clone_into(&mut owner.name);
            }
        }
        for pak in state.preauth_keys.iter_mut().filter(|k| k.user == old_name) {
            new_name.clone_into(&mut pak.user);
        }
        renamed.ok_or_else(|| not_found(format!("user '{old_name}' not found")))
    }

    async fn delete_user(&self, key: &str, name: &str) -> Result<(), ClientError> {
        let mut state = self.write_authorized(key).await?;
        state.user(name)?;
        let owns_nodes = state
            .nodes
            .iter()
            .any(|n| n.user.as_ref().is_some_and(|u| u.name == name));
        if owns_nodes {
            return Err(ClientError::Api {
                status: 400,
                message: format!("user '{name}' still owns machines"),
            });
        }
        state.users.retain(|u| u.name != name);
        state.preauth_keys.retain(|k| k.user != name);
        Ok(())
    }

    async fn list_preauth_keys(
        &self,
        key: &str,
        user: &str,
    ) -> Result<Vec<PreAuthKey>, ClientError> {
        let state = self.read_authorized(key).await?;
        if state.failing_preauth_users.contains(user) {
            return Err(ClientError::Api {
                status: 500,
                message: format!("failed to list pre-auth keys for '{user}'"),
            });
        }
        state.user(user)?;
        Ok(state
            .preauth_keys
            .iter()
            .filter(|k| k.user == user)
            .cloned()
            .collect())
    }

    async fn create_preauth_key(
        &self,
        key: &str,
        request: &CreatePreAuthKey,
    ) -> Result<PreAuthKey, ClientError> {
        let mut state = self.write_authorized(key).await?;
        state.user(&request.user)?;
        let now = Utc::now();
        let created = PreAuthKey {
            id: state.next_id(),
            user: request.user.clone(),
            key: random_secret(),
            reusable: request.reusable,
            ephemeral: request.ephemeral,
            used: false,
            expiration: Some(request.expiration.unwrap_or(now + chrono::Duration::hours(1))),
            created_at: Some(now),
            acl_tags: request.acl_tags.clone(),
        };
        state.preauth_keys.push(created.clone());
        Ok(created)
    }

    async fn expire_preauth_key(
        &self,
        key: &str,
        user: &str,
        preauth_key: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.write_authorized(key).await?;
        let found = state
            .preauth_keys
            .iter_mut()
            .find(|k| k.user == user && k.key == preauth_key)
            .ok_or_else(|| not_found("pre-auth key not found".to_owned()))?;
        found.expiration = Some(Utc::now());
        Ok(())
    }
}
