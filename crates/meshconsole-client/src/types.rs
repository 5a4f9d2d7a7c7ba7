//! Public types for the Headscale management API.
//!
//! Field names follow the upstream JSON (camelCase). Upstream encodes 64-bit
//! ids as JSON strings, older releases as numbers; both are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An API key as listed by `GET /api/v1/apikey`. The secret part is never
/// returned by upstream, only its prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    #[serde(default, deserialize_with = "id::deserialize")]
    pub id: u64,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// A user (formerly "namespace").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, deserialize_with = "id::deserialize")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A pre-authentication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAuthKey {
    #[serde(default, deserialize_with = "id::deserialize")]
    pub id: u64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub reusable: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub used: bool,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acl_tags: Vec<String>,
}

impl PreAuthKey {
    /// Whether the key has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| exp < now)
    }

    /// Whether a machine could still join with this key at `now`.
    ///
    /// Reusable keys stay usable until they expire; single-use keys also
    /// stop being usable once used.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && (self.reusable || !self.used)
    }
}

/// Request body for creating a pre-auth key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreAuthKey {
    pub user: String,
    #[serde(default)]
    pub reusable: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acl_tags: Vec<String>,
}

/// A machine registered with the coordination server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default, deserialize_with = "id::deserialize")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_successful_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pre_auth_key: Option<PreAuthKey>,
    #[serde(default)]
    pub forced_tags: Vec<String>,
    #[serde(default)]
    pub valid_tags: Vec<String>,
    #[serde(default)]
    pub invalid_tags: Vec<String>,
    #[serde(default)]
    pub online: bool,
}

impl Node {
    /// Name shown in the console: the given name, else the hostname.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.given_name.is_empty() {
            &self.name
        } else {
            &self.given_name
        }
    }

    /// Expiry, treating the zero timestamp (`0001-01-01`) as "never".
    #[must_use]
    pub fn effective_expiry(&self) -> Option<DateTime<Utc>> {
        use chrono::Datelike;
        self.expiry.filter(|e| e.year() > 1)
    }
}

/// A subnet or exit route advertised by a machine.
///
/// Upstream nests the owning machine under `node`; it is flattened here into
/// `machine_id` and `machine_name`. A `machine_id` of 0 means the route is
/// not attached to any machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RouteWire")]
pub struct Route {
    pub id: u64,
    pub prefix: String,
    pub advertised: bool,
    pub enabled: bool,
    pub is_primary: bool,
    pub machine_id: u64,
    pub machine_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteWire {
    #[serde(default, deserialize_with = "id::deserialize")]
    id: u64,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    advertised: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    is_primary: bool,
    #[serde(default, alias = "machine")]
    node: Option<RouteNodeWire>,
    // Already flattened form, as produced by `Serialize`.
    #[serde(default, deserialize_with = "id::deserialize")]
    machine_id: u64,
    #[serde(default)]
    machine_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteNodeWire {
    #[serde(default, deserialize_with = "id::deserialize")]
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    given_name: String,
}

impl From<RouteWire> for Route {
    fn from(w: RouteWire) -> Self {
        let (machine_id, machine_name) = match w.node {
            Some(node) => {
                let name = if node.given_name.is_empty() {
                    node.name
                } else {
                    node.given_name
                };
                (node.id, name)
            }
            None => (w.machine_id, w.machine_name),
        };
        Self {
            id: w.id,
            prefix: w.prefix,
            advertised: w.advertised,
            enabled: w.enabled,
            is_primary: w.is_primary,
            machine_id,
            machine_name,
        }
    }
}

// --- Internal API response envelopes ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiKeysResponse {
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateApiKeyResponse {
    pub api_key: String,
}

#[derive(Deserialize)]
pub(crate) struct NodesResponse {
    #[serde(default, alias = "machines")]
    pub nodes: Vec<Node>,
}

#[derive(Deserialize)]
pub(crate) struct NodeResponse {
    #[serde(alias = "machine")]
    pub node: Node,
}

#[derive(Deserialize)]
pub(crate) struct RoutesResponse {
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Deserialize)]
pub(crate) struct UsersResponse {
    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Deserialize)]
pub(crate) struct UserResponse {
    pub user: User,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreAuthKeysResponse {
    #[serde(default)]
    pub pre_auth_keys: Vec<PreAuthKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreAuthKeyResponse {
    pub pre_auth_key: PreAuthKey,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Accept ids encoded as JSON numbers or decimal strings.
mod id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) if s.is_empty() => Ok(0),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
