use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::registry::DEFAULT_PREFERENCE_KEY;
use crate::token::Address;

fn default_preference_key() -> String {
    DEFAULT_PREFERENCE_KEY.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Dashboard settings, usually loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    /// Active account whose balances and allowances are shown.
    pub viewer_address: Address,

    /// Spender passed to the info calls; allowances are measured towards it.
    pub factory_address: Address,

    /// Factory contract enumerating the known test tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_token_factory_address: Option<Address>,

    /// Helper contract serving the batched token info calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_tools_address: Option<Address>,

    /// Store key of the persisted preference map.
    #[serde(default = "default_preference_key")]
    pub preference_key: String,

    /// JSON-RPC endpoint of the node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl DashboardConfig {
    pub fn new(viewer_address: Address, factory_address: Address) -> Self {
        Self {
            viewer_address,
            factory_address,
            test_token_factory_address: None,
            token_tools_address: None,
            preference_key: default_preference_key(),
            rpc_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Parse and validate a config from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.preference_key.trim().is_empty() {
            return Err(Error::Config("preferenceKey must not be empty".to_string()));
        }
        if self.rpc_url.is_some() {
            if self.test_token_factory_address.is_none() {
                return Err(Error::Config(
                    "rpcUrl requires testTokenFactoryAddress".to_string(),
                ));
            }
            if self.token_tools_address.is_none() {
                return Err(Error::Config("rpcUrl requires tokenToolsAddress".to_string()));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("requestTimeoutSecs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = DashboardConfig::from_json(
            r#"{ "viewerAddress": "0xAAA", "factoryAddress": "0xbbb" }"#,
        )
        .unwrap();
        assert_eq!(config.viewer_address.as_str(), "0xaaa");
        assert_eq!(config.preference_key, "tokenAddressData");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.rpc_url.is_none());
    }

    #[test]
    fn test_rpc_requires_contract_addresses() {
        let result = DashboardConfig::from_json(
            r#"{
                "viewerAddress": "0xaaa",
                "factoryAddress": "0xbbb",
                "rpcUrl": "http://localhost:8545"
            }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_address_rejected() {
        let result =
            DashboardConfig::from_json(r#"{ "viewerAddress": "", "factoryAddress": "0xbbb" }"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
