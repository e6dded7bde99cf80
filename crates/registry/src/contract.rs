//! Low-level contract connection management.
//!
//! Holds the parsed registry address and builds providers on demand. A new
//! provider is created for each operation rather than cached; the client
//! stays valid across RPC outages that way.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;

/// Contract client that manages the registry connection details.
pub struct ContractClient {
    registry_address: Address,
    config: RegistryConfig,
}

impl ContractClient {
    /// Create a new contract client from configuration.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config
            .validate()
            .map_err(RegistryError::Configuration)?;

        let registry_address = Address::from_str(&config.registry_address).map_err(|e| {
            RegistryError::Configuration(format!(
                "Invalid registry address '{}': {}",
                config.registry_address, e
            ))
        })?;

        if let Some(ref private_key) = config.private_key {
            if !private_key.is_empty() {
                let _ = private_key.parse::<PrivateKeySigner>().map_err(|e| {
                    RegistryError::Configuration(format!("Invalid private key: {}", e))
                })?;
            }
        }

        Ok(Self {
            registry_address,
            config,
        })
    }

    /// Returns the registry contract address.
    pub fn registry_address(&self) -> &Address {
        &self.registry_address
    }

    /// Returns the configured receipt timeout in seconds.
    pub fn tx_timeout_secs(&self) -> u64 {
        self.config.tx_timeout_secs
    }

    /// Checks if the client has a wallet for signing transactions.
    pub fn has_wallet(&self) -> bool {
        self.config.can_write()
    }

    /// Create a read-only provider for contract calls.
    pub fn create_provider(&self) -> Result<impl Provider> {
        let rpc_url = self
            .config
            .rpc_url
            .parse()
            .map_err(|e| RegistryError::ProviderError(format!("Invalid RPC URL: {}", e)))?;

        Ok(ProviderBuilder::new().connect_http(rpc_url))
    }

    /// Create a provider with wallet for sending transactions.
    pub fn create_provider_with_signer(&self) -> Result<impl Provider> {
        let private_key = self
            .config
            .private_key
            .as_ref()
            .filter(|pk| !pk.is_empty())
            .ok_or(RegistryError::NoPrivateKey)?;

        let signer = private_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| RegistryError::Configuration(format!("Invalid private key: {}", e)))?;

        let wallet = EthereumWallet::from(signer);

        let rpc_url = self
            .config
            .rpc_url
            .parse()
            .map_err(|e| RegistryError::ProviderError(format!("Invalid RPC URL: {}", e)))?;

        Ok(ProviderBuilder::new().wallet(wallet).connect_http(rpc_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            rpc_url: "http://localhost:8545".to_string(),
            registry_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            private_key: None,
            tx_timeout_secs: 120,
        }
    }

    #[test]
    fn test_contract_client_creation() {
        let client = ContractClient::new(test_config());
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_registry_address() {
        let mut config = test_config();
        config.registry_address = "invalid".to_string();
        assert!(ContractClient::new(config).is_err());
    }

    #[test]
    fn test_signer_requires_private_key() {
        let client = ContractClient::new(test_config()).unwrap();
        assert!(!client.has_wallet());
        assert!(matches!(
            client.create_provider_with_signer().err(),
            Some(RegistryError::NoPrivateKey)
        ));
    }

    #[test]
    fn test_wallet_detected() {
        let mut config = test_config();
        config.private_key = Some(format!("0x{}", "1".repeat(64)));
        let client = ContractClient::new(config).unwrap();
        assert!(client.has_wallet());
    }
}
