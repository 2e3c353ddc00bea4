//! Known Aptos networks and their public fullnode endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Aptos mainnet fullnode REST endpoint.
pub const MAINNET_FULLNODE: &str = "https://fullnode.mainnet.aptoslabs.com/v1";

/// Aptos testnet fullnode REST endpoint.
pub const TESTNET_FULLNODE: &str = "https://fullnode.testnet.aptoslabs.com/v1";

/// Aptos devnet fullnode REST endpoint.
pub const DEVNET_FULLNODE: &str = "https://fullnode.devnet.aptoslabs.com/v1";

/// Fullnode started by `aptos node run-local-testnet`.
pub const LOCAL_FULLNODE: &str = "http://127.0.0.1:8080/v1";

/// An Aptos network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AptosNetwork {
    /// Production network.
    Mainnet,
    /// Public test network.
    #[default]
    Testnet,
    /// Developer network, reset frequently.
    Devnet,
    /// A local testnet.
    Local,
}

impl AptosNetwork {
    /// All known networks.
    pub const ALL: [Self; 4] = [Self::Mainnet, Self::Testnet, Self::Devnet, Self::Local];

    /// The network's public fullnode REST endpoint.
    #[must_use]
    pub const fn fullnode_url(self) -> &'static str {
        match self {
            Self::Mainnet => MAINNET_FULLNODE,
            Self::Testnet => TESTNET_FULLNODE,
            Self::Devnet => DEVNET_FULLNODE,
            Self::Local => LOCAL_FULLNODE,
        }
    }

    /// Lowercase network name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for AptosNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown network name.
#[derive(Debug, thiserror::Error)]
#[error("unknown Aptos network {0:?}, expected mainnet, testnet, devnet or local")]
pub struct UnknownNetwork(String);

impl FromStr for AptosNetwork {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == lower || (lower == "localnet" && *n == Self::Local))
            .ok_or_else(|| UnknownNetwork(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network_names() {
        assert_eq!("Mainnet".parse::<AptosNetwork>().unwrap(), AptosNetwork::Mainnet);
        assert_eq!(" testnet ".parse::<AptosNetwork>().unwrap(), AptosNetwork::Testnet);
        assert_eq!("localnet".parse::<AptosNetwork>().unwrap(), AptosNetwork::Local);
        assert!("moonnet".parse::<AptosNetwork>().is_err());
    }

    #[test]
    fn test_fullnode_urls() {
        assert_eq!(AptosNetwork::default().fullnode_url(), TESTNET_FULLNODE);
        assert!(AptosNetwork::Local.fullnode_url().starts_with("http://127.0.0.1"));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&AptosNetwork::Devnet).unwrap();
        assert_eq!(json, "\"devnet\"");
    }
}
