//! Configuration for the registry client.

use serde::{Deserialize, Serialize};

/// Configuration for the on-chain registry client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// RPC URL for the EVM node.
    /// Example: "https://rpc-amoy.polygon.technology"
    pub rpc_url: String,

    /// Deployed AgentRegistry factory contract address.
    /// Must be a valid Ethereum address (0x-prefixed, 42 characters).
    pub registry_address: String,

    /// Private key for signing registration transactions (optional for
    /// read-only operation).
    /// Format: 0x-prefixed hex string (66 characters).
    pub private_key: Option<String>,

    /// How long to wait for a registration receipt before re-reading the
    /// registry (seconds).
    pub tx_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            registry_address: String::new(),
            private_key: None,
            tx_timeout_secs: 120,
        }
    }
}

impl RegistryConfig {
    /// Assemble the configuration from environment variables.
    ///
    /// Returns `None` when `RPC_URL` or `REGISTRY_ADDRESS` is missing so a
    /// controller booting without chain access can still serve HTTP;
    /// chain-dependent operations will then fail with
    /// [`crate::RegistryError::Unavailable`].
    pub fn from_env() -> Option<Self> {
        let rpc_url = std::env::var("RPC_URL").ok().filter(|v| !v.is_empty())?;
        let registry_address = std::env::var("REGISTRY_ADDRESS")
            .ok()
            .filter(|v| !v.is_empty())?;
        let private_key = std::env::var("PRIVATE_KEY").ok().filter(|v| !v.is_empty());
        let tx_timeout_secs = std::env::var("TX_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Some(Self {
            rpc_url,
            registry_address,
            private_key,
            tx_timeout_secs,
        })
    }

    /// Validate configuration, returning an error message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_url.is_empty() {
            return Err("rpc_url cannot be empty".to_string());
        }

        if !self.rpc_url.starts_with("http://") && !self.rpc_url.starts_with("https://") {
            return Err("rpc_url must start with http:// or https://".to_string());
        }

        if self.registry_address.is_empty() {
            return Err("registry_address cannot be empty".to_string());
        }

        if !self.registry_address.starts_with("0x") {
            return Err("registry_address must start with 0x".to_string());
        }

        if self.registry_address.len() != 42 {
            return Err(format!(
                "registry_address must be 42 characters (0x + 40 hex), got {}",
                self.registry_address.len()
            ));
        }

        if !self.registry_address[2..]
            .chars()
            .all(|c| c.is_ascii_hexdigit())
        {
            return Err("registry_address must contain only hex characters after 0x".to_string());
        }

        if let Some(ref pk) = self.private_key {
            if !pk.is_empty() {
                if !pk.starts_with("0x") {
                    return Err("private_key must start with 0x".to_string());
                }

                if pk.len() != 66 {
                    return Err(format!(
                        "private_key must be 66 characters (0x + 64 hex), got {}",
                        pk.len()
                    ));
                }

                if !pk[2..].chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err("private_key must contain only hex characters after 0x".to_string());
                }
            }
        }

        if self.tx_timeout_secs == 0 {
            return Err("tx_timeout_secs must be > 0".to_string());
        }

        Ok(())
    }

    /// Check if configuration supports write operations (has private key).
    pub fn can_write(&self) -> bool {
        self.private_key.as_ref().is_some_and(|pk| !pk.is_empty())
    }
}
