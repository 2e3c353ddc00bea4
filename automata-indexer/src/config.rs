//! Indexer configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3001
//! module_id = "0x1::automata"
//! network = "testnet"
//! node_url = "$APTOS_NODE_URL"
//! sync_interval_secs = 30
//! request_timeout_secs = 10
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - `AUTOMATA_MODULE_ID` - Override the protocol module
//! - `APTOS_NETWORK` - Override the network
//! - `APTOS_NODE_URL` - Override the fullnode URL

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use automata::module::ModuleId;
use automata_aptos::AptosNetwork;
use serde::{Deserialize, Serialize};

/// Default indexer port.
pub const DEFAULT_PORT: u16 = 3001;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`IndexerConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// An environment override has an invalid value.
    #[error("invalid {var}: {reason}")]
    InvalidOverride {
        /// Variable name.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Top-level indexer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `3001`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Protocol module whose registry is indexed (default: `0x1::automata`).
    #[serde(default = "default_module_id")]
    pub module_id: ModuleId,

    /// Aptos network (default: `testnet`).
    #[serde(default)]
    pub network: AptosNetwork,

    /// Fullnode REST URL; the network's public fullnode when unset.
    #[serde(default)]
    pub node_url: Option<String>,

    /// Seconds between background syncs (default: `30`).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Per-request ledger timeout in seconds (default: `10`).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_module_id() -> ModuleId {
    ModuleId::new("0x1", "automata")
}

const fn default_sync_interval_secs() -> u64 {
    30
}

const fn default_request_timeout_secs() -> u64 {
    automata::ledger::DEFAULT_TIMEOUT.as_secs()
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            module_id: default_module_id(),
            network: AptosNetwork::default(),
            node_url: None,
            sync_interval_secs: default_sync_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl IndexerConfig {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// After loading, `$VAR` / `${VAR}` references are expanded from the
    /// process environment and the override variables listed in the module
    /// docs are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// override is invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with(path.as_ref(), |name| std::env::var(name).ok())
    }

    /// Like [`IndexerConfig::load_from`], reading variables through `env`.
    ///
    /// # Errors
    ///
    /// See [`IndexerConfig::load_from`].
    pub fn load_with<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?
        } else {
            String::new()
        };
        Self::parse_with(&content, env)
    }

    /// Parses TOML `content`, then expands variables and applies overrides.
    ///
    /// # Errors
    ///
    /// See [`IndexerConfig::load_from`].
    pub fn parse_with<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_env_vars(content, &env);
        let mut config: Self = toml::from_str(&expanded)?;
        config.apply_overrides(&env)?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = env("HOST") {
            self.host = parse_override("HOST", &host)?;
        }
        if let Some(port) = env("PORT") {
            self.port = parse_override("PORT", &port)?;
        }
        if let Some(module_id) = env("AUTOMATA_MODULE_ID") {
            self.module_id = parse_override("AUTOMATA_MODULE_ID", &module_id)?;
        }
        if let Some(network) = env("APTOS_NETWORK") {
            self.network = parse_override("APTOS_NETWORK", &network)?;
        }
        if let Some(node_url) = env("APTOS_NODE_URL").filter(|u| !u.trim().is_empty()) {
            self.node_url = Some(node_url);
        }
        Ok(())
    }

    /// The fullnode REST URL to read from.
    #[must_use]
    pub fn node_url(&self) -> &str {
        self.node_url
            .as_deref()
            .unwrap_or_else(|| self.network.fullnode_url())
    }

    /// Interval between background syncs.
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Per-request ledger timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_override<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidOverride {
            var,
            reason: e.to_string(),
        })
}

/// Expands `$VAR` and `${VAR}` patterns in a string through `env`.
///
/// Unresolved variables are left as-is.
fn expand_env_vars<F>(input: &str, env: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();

        let mut var_name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        match env(&var_name).filter(|_| !var_name.is_empty()) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = IndexerConfig::parse_with("", env(&[])).unwrap();
        assert_eq!(config, IndexerConfig::default());
        assert_eq!(config.port, 3001);
        assert_eq!(config.module_id.to_string(), "0x1::automata");
        assert_eq!(config.node_url(), AptosNetwork::Testnet.fullnode_url());
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_variable_expansion() {
        let toml = r#"
            node_url = "${NODE}/v1"
            module_id = "$ADDR::automata"
            network = "$UNSET"
        "#;
        let err = IndexerConfig::parse_with(toml, env(&[("NODE", "http://n"), ("ADDR", "0xabc")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let toml = r#"
            node_url = "${NODE}/v1"
            module_id = "$ADDR::automata"
        "#;
        let config =
            IndexerConfig::parse_with(toml, env(&[("NODE", "http://n"), ("ADDR", "0xabc")]))
                .unwrap();
        assert_eq!(config.node_url(), "http://n/v1");
        assert_eq!(config.module_id.address(), "0xabc");
    }

    #[test]
    fn test_unresolved_variables_are_kept() {
        let expanded = expand_env_vars("a=$MISSING b=${ALSO} c=$", &env(&[]));
        assert_eq!(expanded, "a=$MISSING b=${ALSO} c=$");
    }

    #[test]
    fn test_env_overrides_file() {
        let toml = r#"
            port = 8000
            network = "mainnet"
        "#;
        let config = IndexerConfig::parse_with(
            toml,
            env(&[
                ("PORT", "9000"),
                ("HOST", "127.0.0.1"),
                ("APTOS_NETWORK", "devnet"),
                ("AUTOMATA_MODULE_ID", "0xbeef::market"),
            ]),
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.network, AptosNetwork::Devnet);
        assert_eq!(config.module_id.name(), "market");
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let err = IndexerConfig::parse_with("", env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { var: "PORT", .. }));
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let config =
            IndexerConfig::load_with(Path::new("/nonexistent/indexer.toml"), env(&[])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
