//! Server configuration for `MeshConsole`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Problems are collected rather than reported one at a time: every missing
//! or malformed variable becomes an [`InitCheck`] and the server starts in
//! diagnostics mode showing all of them.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset as _, Utc};
use chrono_tz::Tz;

use crate::diagnostics::InitCheck;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Base URL of the coordination server.
    pub hs_server: String,
    /// Operator secret the stored API key is encrypted with.
    pub secret: String,
    /// How operators log in to the console.
    pub auth: AuthMode,
    /// External URL of the console, used to build OIDC redirect URIs.
    pub domain_name: String,
    /// Path prefix the console is served under, empty or starting with `/`.
    pub base_path: String,
    /// Directory holding the encrypted API key.
    pub data_dir: PathBuf,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Zone timestamps are displayed in.
    pub timezone: DisplayZone,
    /// Accent colour name for the navigation bar and buttons.
    pub color: String,
    /// Headscale configuration file. When unset the default locations
    /// under `/etc/headscale` and `$HOME/.headscale` are searched.
    pub hs_config_path: Option<PathBuf>,
    /// Home directory for the default configuration search.
    pub home_dir: Option<PathBuf>,
    /// Timeout for every outbound call.
    pub request_timeout: Duration,
    /// Interval of the background key renewal job.
    pub renewal_interval: Duration,
    /// Version information shown on the settings page.
    pub build: BuildInfo,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("hs_server", &self.hs_server)
            .field("secret", &"[REDACTED]")
            .field("auth", &self.auth)
            .field("domain_name", &self.domain_name)
            .field("base_path", &self.base_path)
            .field("data_dir", &self.data_dir)
            .field("log_level", &self.log_level)
            .field("timezone", &self.timezone)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

/// Login method for console operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// HTTP basic authentication against a single configured account.
    Basic(BasicAuthConfig),
    /// OpenID Connect authorization code flow with PKCE.
    Oidc(OidcConfig),
}

impl AuthMode {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic(_) => "basic",
            Self::Oidc(_) => "oidc",
        }
    }
}

/// Credentials for basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for OIDC integration.
#[derive(Clone, PartialEq, Eq)]
pub struct OidcConfig {
    /// Discovery document URL (`.../.well-known/openid-configuration`).
    pub auth_url: String,
    /// OAuth client ID registered with the provider.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Where the provider sends the browser after logout.
    pub logout_redirect_uri: Option<String>,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("auth_url", &self.auth_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("logout_redirect_uri", &self.logout_redirect_uri)
            .finish()
    }
}

/// Build and version details shown on the settings page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub app_version: String,
    pub build_date: String,
    pub git_commit: String,
    pub git_branch: String,
    pub hs_version: String,
}

/// Zone timestamps are displayed in.
///
/// `UTC`, `Z` and `±HH:MM` give a fixed offset; anything else is looked up
/// as an IANA name (`Asia/Tokyo`), which follows daylight saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl DisplayZone {
    /// Coordinated universal time.
    #[must_use]
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }

    /// Parse `UTC`, `Z`, `+HH:MM`, `-HH:MM` or an IANA zone name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("utc") || value == "Z" {
            return Some(Self::utc());
        }

        let (sign, rest) = match value.as_bytes().first()? {
            b'+' => (1, &value[1..]),
            b'-' => (-1, &value[1..]),
            _ => return value.parse::<Tz>().ok().map(Self::Named),
        };
        let (hours, minutes) = rest.split_once(':')?;
        let hours: i32 = hours.parse().ok()?;
        let minutes: i32 = minutes.parse().ok()?;
        if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
            return None;
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Self::Fixed)
    }

    /// `UTC`, the fixed offset, or the IANA name.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Fixed(offset) if offset.local_minus_utc() == 0 => "UTC".to_owned(),
            Self::Fixed(offset) => offset.to_string(),
            Self::Named(tz) => tz.name().to_owned(),
        }
    }

    /// Format `at` in this zone.
    #[must_use]
    pub fn format(&self, at: DateTime<Utc>) -> String {
        const LAYOUT: &str = "%Y-%m-%d %H:%M:%S";
        match self {
            Self::Fixed(offset) => {
                format!("{} {}", at.with_timezone(offset).format(LAYOUT), self.label())
            }
            // Abbreviation of the offset in effect at `at`, e.g. CET or CEST.
            Self::Named(tz) => at.with_timezone(tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `HS_SERVER`: coordination server URL (required)
    /// - `KEY`: encryption secret for the stored API key (required)
    /// - `AUTH_TYPE`: `basic` or `oidc` (default: `basic`)
    /// - `BASIC_AUTH_USER` / `BASIC_AUTH_PASS`: basic credentials (default: `headscale`)
    /// - `OIDC_AUTH_URL`, `OIDC_CLIENT_ID`, `OIDC_CLIENT_SECRET`: required for `oidc`
    /// - `OIDC_LOGOUT_REDIRECT_URI`: post-logout redirect (optional)
    /// - `DOMAIN_NAME`: external URL (default: `http://localhost:5000`)
    /// - `SCRIPT_NAME`: base path (default: empty)
    /// - `APP_DATA_DIR`: data directory (default: `/data`)
    /// - `LOG_LEVEL`: log filter (default: `info`)
    /// - `TZ`: IANA zone name or fixed offset (default: `UTC`)
    /// - `COLOR`: accent colour (default: `red`)
    /// - `HS_CONFIG_PATH`: Headscale config file whose `server_url` overrides `HS_SERVER` (optional)
    /// - `BIND_ADDR` / `PORT`: listener (default: `0.0.0.0:5000`)
    /// - `REQUEST_TIMEOUT_SECS`: outbound timeout (default: `10`)
    /// - `KEY_RENEWAL_INTERVAL_SECS`: renewal interval (default: `3600`)
    #[must_use]
    pub fn from_env() -> (Self, Vec<InitCheck>) {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, returning every problem found.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<InitCheck>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut issues = Vec::new();
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().trim_matches('"').to_owned())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &str, issues: &mut Vec<InitCheck>| {
            var(name).unwrap_or_else(|| {
                issues.push(InitCheck::environment(
                    name,
                    format!("Required variable {name} is not set or empty."),
                ));
                String::new()
            })
        };

        // Priority: BIND_ADDR > PORT > default 0.0.0.0:5000
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 5000));
        let bind_addr = if let Some(addr) = var("BIND_ADDR") {
            addr.parse().unwrap_or_else(|_| {
                issues.push(InitCheck::environment(
                    "BIND_ADDR",
                    format!("Variable BIND_ADDR is not a socket address: \"{addr}\"."),
                ));
                default_addr
            })
        } else if let Some(port) = var("PORT") {
            let port: u16 = port.parse().unwrap_or(5000);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            default_addr
        };

        let hs_server = required("HS_SERVER", &mut issues)
            .trim_end_matches('/')
            .to_owned();
        let secret = required("KEY", &mut issues);

        let auth_type = var("AUTH_TYPE").unwrap_or_default().to_lowercase();
        let auth = match auth_type.as_str() {
            "" | "basic" => AuthMode::Basic(BasicAuthConfig {
                username: var("BASIC_AUTH_USER").unwrap_or_else(|| "headscale".to_owned()),
                password: var("BASIC_AUTH_PASS").unwrap_or_else(|| "headscale".to_owned()),
            }),
            "oidc" => AuthMode::Oidc(OidcConfig {
                auth_url: required("OIDC_AUTH_URL", &mut issues),
                client_id: required("OIDC_CLIENT_ID", &mut issues),
                client_secret: required("OIDC_CLIENT_SECRET", &mut issues),
                logout_redirect_uri: var("OIDC_LOGOUT_REDIRECT_URI"),
            }),
            other => {
                issues.push(InitCheck::environment(
                    "AUTH_TYPE",
                    format!("Variable AUTH_TYPE must be \"basic\" or \"oidc\", got \"{other}\"."),
                ));
                AuthMode::Basic(BasicAuthConfig {
                    username: "headscale".to_owned(),
                    password: "headscale".to_owned(),
                })
            }
        };

        let domain_name = var("DOMAIN_NAME")
            .unwrap_or_else(|| "http://localhost:5000".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let base_path = normalize_base_path(&var("SCRIPT_NAME").unwrap_or_default());

        let data_dir = PathBuf::from(var("APP_DATA_DIR").unwrap_or_else(|| "/data".to_owned()));

        let log_level = match var("LOG_LEVEL") {
            None => "info".to_owned(),
            Some(level) => normalize_log_level(&level).unwrap_or_else(|| {
                issues.push(InitCheck::environment(
                    "LOG_LEVEL",
                    format!("Variable LOG_LEVEL has an unknown level: \"{level}\"."),
                ));
                "info".to_owned()
            }),
        };

        let timezone = match var("TZ") {
            None => DisplayZone::utc(),
            Some(tz) => DisplayZone::parse(&tz).unwrap_or_else(|| {
                issues.push(InitCheck::environment(
                    "TZ",
                    format!(
                        "Variable TZ must be an IANA zone name, UTC or an offset like +02:00, got \"{tz}\"."
                    ),
                ));
                DisplayZone::utc()
            }),
        };

        let color = var("COLOR").unwrap_or_else(|| "red".to_owned()).to_lowercase();
        let hs_config_path = var("HS_CONFIG_PATH").map(PathBuf::from);
        let home_dir = var("HOME").map(PathBuf::from);

        let secs = |name: &str, default: u64, issues: &mut Vec<InitCheck>| match var(name) {
            None => Duration::from_secs(default),
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    issues.push(InitCheck::environment(
                        name,
                        format!("Variable {name} must be a positive number of seconds, got \"{raw}\"."),
                    ));
                    Duration::from_secs(default)
                }
            },
        };
        let request_timeout = secs("REQUEST_TIMEOUT_SECS", 10, &mut issues);
        let renewal_interval = secs("KEY_RENEWAL_INTERVAL_SECS", 3600, &mut issues);

        let unknown = |name: &str| var(name).unwrap_or_else(|| "UNKNOWN".to_owned());
        let build = BuildInfo {
            app_version: var("APP_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
            build_date: unknown("BUILD_DATE"),
            git_commit: unknown("GIT_COMMIT"),
            git_branch: unknown("GIT_BRANCH"),
            hs_version: unknown("HS_VERSION"),
        };

        let config = Self {
            bind_addr,
            hs_server,
            secret,
            auth,
            domain_name,
            base_path,
            data_dir,
            log_level,
            timezone,
            color,
            hs_config_path,
            home_dir,
            request_timeout,
            renewal_interval,
            build,
        };
        (config, issues)
    }

    /// Prefix `path` with the configured base path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_path)
    }

    /// Redirect URI registered with the OIDC provider.
    #[must_use]
    pub fn oidc_redirect_uri(&self) -> String {
        format!("{}{}/oidc_callback", self.domain_name, self.base_path)
    }
}

/// `/` and empty both mean "served at the root".
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

fn normalize_log_level(raw: &str) -> Option<String> {
    let level = match raw.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => return None,
    };
    Some(level.to_owned())
}
