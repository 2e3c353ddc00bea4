//! On-chain module identifiers.
//!
//! The marketplace contract is deployed as a named module under an account
//! address, written `<address>::<name>` (e.g. `0x123::automata`). Every
//! function and resource the core touches is addressed relative to it:
//!
//! - `<module>::usage_wallet::pay` - the payment entry function
//! - `<module>::usage_wallet::UsageWallet` - a payer's pre-funded balance
//! - `<module>::market::GlobalRegistry` - published service listings
//! - `<module>::market::publish_service` - adds a listing to the registry
//! - `<module>::reputation::ReputationScore` - per-provider reputation
//! - `<module>::identity::AgentIdentity` - an agent's registered name and URL

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// A `<address>::<name>` module identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    address: String,
    name: String,
}

impl ModuleId {
    /// Creates a module identifier from its components.
    pub fn new<A: Into<String>, N: Into<String>>(address: A, name: N) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Account address the module is published under.
    ///
    /// The global service registry lives in this account.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully-qualified identifier of the payment entry function.
    #[must_use]
    pub fn pay_function(&self) -> String {
        format!("{self}::usage_wallet::pay")
    }

    /// Fully-qualified identifier of the wallet creation entry function.
    #[must_use]
    pub fn create_wallet_function(&self) -> String {
        format!("{self}::usage_wallet::create_wallet")
    }

    /// Fully-qualified identifier of the spender authorization entry function.
    #[must_use]
    pub fn authorize_spender_function(&self) -> String {
        format!("{self}::usage_wallet::authorize_spender")
    }

    /// Fully-qualified identifier of the service publication entry function.
    #[must_use]
    pub fn publish_service_function(&self) -> String {
        format!("{self}::market::publish_service")
    }

    /// Fully-qualified identifier of the agent registration entry function.
    #[must_use]
    pub fn register_agent_function(&self) -> String {
        format!("{self}::identity::register_agent")
    }

    /// Fully-qualified identifier of the reputation initialization entry function.
    #[must_use]
    pub fn initialize_reputation_function(&self) -> String {
        format!("{self}::reputation::initialize")
    }

    /// Resource type of a payer's usage wallet.
    #[must_use]
    pub fn usage_wallet_resource(&self) -> String {
        format!("{self}::usage_wallet::UsageWallet")
    }

    /// Resource type of the global service registry.
    #[must_use]
    pub fn registry_resource(&self) -> String {
        format!("{self}::market::GlobalRegistry")
    }

    /// Resource type of a provider's reputation record.
    #[must_use]
    pub fn reputation_resource(&self) -> String {
        format!("{self}::reputation::ReputationScore")
    }

    /// Resource type of an agent's identity record.
    #[must_use]
    pub fn agent_identity_resource(&self) -> String {
        format!("{self}::identity::AgentIdentity")
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.address, self.name)
    }
}

/// Error returned when parsing an invalid module identifier.
#[derive(Debug, thiserror::Error)]
#[error("Invalid module id format {0}, expected <address>::<name>")]
pub struct ModuleIdFormatError(String);

impl FromStr for ModuleId {
    type Err = ModuleIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, name) = s
            .trim()
            .split_once("::")
            .ok_or_else(|| ModuleIdFormatError(s.into()))?;
        if address.is_empty() || name.is_empty() || name.contains("::") {
            return Err(ModuleIdFormatError(s.into()));
        }
        Ok(Self::new(address, name))
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}
