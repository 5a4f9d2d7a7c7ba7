//! The Headscale server's own configuration file.
//!
//! Only `server_url` is read. When present it is the upstream base URL and
//! `HS_SERVER` is the fallback. The file is YAML (`config.yaml`/`config.yml`)
//! or JSON, which the YAML parser also accepts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::diagnostics::InitCheck;

/// Directories Headscale itself looks in, besides `$HOME/.headscale`.
const SYSTEM_DIR: &str = "/etc/headscale";

const FILE_NAMES: [&str; 3] = ["config.yml", "config.yaml", "config.json"];

/// The parts of the Headscale configuration the console uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HeadscaleConfig {
    #[serde(default)]
    pub server_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HsConfigError {
    #[error("\"{path}\" could not be read ({source})")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("\"{path}\" is not valid YAML or JSON ({source})")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl From<HsConfigError> for InitCheck {
    fn from(err: HsConfigError) -> Self {
        Self::new(
            "Headscale configuration read failed.",
            format!(
                "{err}. Please ensure HS_CONFIG_PATH points to a readable headscale \
                 config.yaml, or that one resides in /etc/headscale or ~/.headscale."
            ),
        )
    }
}

/// Default locations, in lookup order.
#[must_use]
pub fn default_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(SYSTEM_DIR)];
    dirs.extend(home.map(|h| h.join(".headscale")));
    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

/// The first candidate that is an existing file.
#[must_use]
pub fn locate(candidates: &[PathBuf]) -> Option<&Path> {
    candidates
        .iter()
        .map(PathBuf::as_path)
        .find(|p| p.is_file())
}

/// Read and parse the file at `path`.
///
/// # Errors
///
/// Returns [`HsConfigError`] if the file cannot be read or parsed.
pub fn load(path: &Path) -> Result<HeadscaleConfig, HsConfigError> {
    let shown = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| HsConfigError::Read {
        path: shown.clone(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| HsConfigError::Parse { path: shown, source })
}

/// Find and load the Headscale configuration for `config`.
///
/// An explicit `HS_CONFIG_PATH` must load. Without one, the default
/// locations are searched and finding nothing is not an error.
///
/// # Errors
///
/// Returns an [`InitCheck`] if the chosen file cannot be read or parsed.
pub fn discover(config: &ServerConfig) -> Result<Option<HeadscaleConfig>, InitCheck> {
    if let Some(path) = &config.hs_config_path {
        return load(path).map(Some).map_err(InitCheck::from);
    }

    let candidates = default_candidates(config.home_dir.as_deref());
    match locate(&candidates) {
        Some(path) => {
            info!(path = %path.display(), "using Headscale configuration");
            load(path).map(Some).map_err(InitCheck::from)
        }
        None => Ok(None),
    }
}

/// `server_url` from the Headscale configuration, or `fallback`.
#[must_use]
pub fn upstream_url(hs: Option<&HeadscaleConfig>, fallback: &str) -> String {
    match hs.and_then(|c| c.server_url.as_deref()).map(str::trim) {
        Some(url) if !url.is_empty() => url.trim_end_matches('/').to_owned(),
        _ => {
            if hs.is_some() {
                warn!(fallback, "no server_url in the Headscale configuration, using HS_SERVER");
            }
            fallback.to_owned()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let (config, _) = ServerConfig::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_owned())
        });
        config
    }

    #[test]
    fn server_url_overrides_hs_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server_url: https://hs.example.com/\nlisten_addr: 0.0.0.0:8080\ndns:\n  magic_dns: true\n",
        )
        .unwrap();
        let path = path.to_string_lossy().into_owned();
        let config = config_with(&[
            ("HS_SERVER", "http://fallback"),
            ("KEY", "k"),
            ("HS_CONFIG_PATH", path.as_str()),
        ]);

        let hs = discover(&config).unwrap();
        assert_eq!(
            upstream_url(hs.as_ref(), &config.hs_server),
            "https://hs.example.com"
        );
    }

    #[test]
    fn json_config_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"server_url": "https://json.example.com"}"#).unwrap();
        let hs = load(&path).unwrap();
        assert_eq!(hs.server_url.as_deref(), Some("https://json.example.com"));
    }

    #[test]
    fn missing_server_url_falls_back() {
        let hs = HeadscaleConfig::default();
        assert_eq!(upstream_url(Some(&hs), "http://fallback"), "http://fallback");
        assert_eq!(upstream_url(None, "http://fallback"), "http://fallback");
    }

    #[test]
    fn unreadable_explicit_path_is_a_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml").to_string_lossy().into_owned();
        let config = config_with(&[("HS_SERVER", "h"), ("KEY", "k"), ("HS_CONFIG_PATH", path.as_str())]);
        let check = discover(&config).unwrap_err();
        assert_eq!(check.title, "Headscale configuration read failed.");
        assert!(check.details.contains("could not be read"));
    }

    #[test]
    fn malformed_file_is_a_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "server_url: [unclosed\n").unwrap();
        let check = InitCheck::from(load(&path).unwrap_err());
        assert_eq!(check.title, "Headscale configuration read failed.");
        assert!(check.details.contains("not valid YAML or JSON"));
    }

    #[test]
    fn default_search_order() {
        let candidates = default_candidates(Some(Path::new("/home/op")));
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0], PathBuf::from("/etc/headscale/config.yml"));
        assert_eq!(candidates[5], PathBuf::from("/home/op/.headscale/config.json"));
        assert_eq!(default_candidates(None).len(), 3);
    }

    #[test]
    fn locate_takes_first_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path();
        fs::create_dir(home.join(".headscale")).unwrap();
        fs::write(home.join(".headscale/config.json"), "{}").unwrap();
        fs::write(home.join(".headscale/config.yaml"), "server_url: x").unwrap();

        let candidates: Vec<PathBuf> = FILE_NAMES
            .iter()
            .map(|name| home.join(".headscale").join(name))
            .collect();
        assert_eq!(locate(&candidates), Some(home.join(".headscale/config.yaml").as_path()));
        assert_eq!(locate(&candidates[..1]), None);
    }
}
