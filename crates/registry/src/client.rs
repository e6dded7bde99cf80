//! High-level registry operations: lookup and idempotent registration.

use crate::abi::IAgentRegistry;
use crate::config::RegistryConfig;
use crate::contract::ContractClient;
use crate::error::{
    classify_call_error, classify_send_error, is_already_registered, Result, RegistryError,
};
use alloy::primitives::{Address, B256};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Client for the on-chain agent registry.
///
/// Holds no chain state of its own; every operation creates a fresh
/// provider from the configuration.
pub struct RegistryClient {
    contract: ContractClient,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let contract = ContractClient::new(config)?;
        Ok(Self { contract })
    }

    /// Look up the agent contract registered for a branch hash.
    ///
    /// Returns `None` when the registry holds the zero address.
    pub async fn lookup(&self, branch_hash: B256) -> Result<Option<Address>> {
        debug!("Registry lookup for branch hash {}", branch_hash);

        let provider = self.contract.create_provider()?;
        let registry = IAgentRegistry::new(*self.contract.registry_address(), &provider);

        let address = registry
            .agentForBranch(branch_hash)
            .call()
            .await
            .map_err(|e| classify_call_error(e.to_string()))?;

        if address == Address::ZERO {
            debug!("Branch hash {} is unregistered", branch_hash);
            Ok(None)
        } else {
            debug!("Branch hash {} resolves to agent {}", branch_hash, address);
            Ok(Some(address))
        }
    }

    /// Register an agent contract for a branch hash.
    ///
    /// Sends the transaction, waits for the receipt (bounded by the
    /// configured timeout), then re-reads the registry for the resulting
    /// address. A revert carrying the "already registered" signal resolves
    /// by re-read instead of failing; the registration race between two
    /// concurrent pushes converges that way. On receipt timeout the
    /// registry is re-read before the timeout surfaces, so a confirmed but
    /// slow transaction is still treated as success.
    pub async fn register(&self, branch_hash: B256) -> Result<Address> {
        info!("Registering agent for branch hash {}", branch_hash);

        let provider = self.contract.create_provider_with_signer()?;
        let registry = IAgentRegistry::new(*self.contract.registry_address(), &provider);

        let pending = match registry.registerAgent(branch_hash).send().await {
            Ok(pending) => pending,
            Err(e) => {
                let message = e.to_string();
                if is_already_registered(&message) {
                    info!(
                        "Branch hash {} already registered, resolving by lookup",
                        branch_hash
                    );
                    return self.require_lookup(branch_hash).await;
                }
                return Err(classify_send_error(message));
            }
        };

        let tx_timeout = Duration::from_secs(self.contract.tx_timeout_secs());
        let receipt = match timeout(tx_timeout, pending.get_receipt()).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                let message = e.to_string();
                if is_already_registered(&message) {
                    return self.require_lookup(branch_hash).await;
                }
                return Err(classify_send_error(message));
            }
            Err(_) => {
                // Receipt did not arrive in time. The transaction may still
                // have landed, so re-read before surfacing the timeout to
                // avoid a duplicate-registration flow on retry.
                warn!(
                    "Timed out waiting {}s for registration receipt, re-reading registry",
                    self.contract.tx_timeout_secs()
                );
                if let Some(address) = self.lookup(branch_hash).await? {
                    return Ok(address);
                }
                return Err(RegistryError::TransactionTimeout(
                    self.contract.tx_timeout_secs(),
                ));
            }
        };

        if !receipt.status() {
            // Reverted on-chain. Re-read to distinguish the lost
            // registration race from a genuine failure.
            if let Some(address) = self.lookup(branch_hash).await? {
                info!(
                    "Registration for {} reverted but registry is populated (lost race)",
                    branch_hash
                );
                return Ok(address);
            }
            return Err(RegistryError::Revert(format!(
                "registerAgent reverted in tx {:#x}",
                receipt.transaction_hash
            )));
        }

        info!(
            "Registration for {} confirmed in tx {:#x}",
            branch_hash, receipt.transaction_hash
        );
        self.require_lookup(branch_hash).await
    }

    /// Resolve the agent address for a branch hash: lookup, register when
    /// absent. The idempotent entrypoint used by the push pipeline.
    pub async fn resolve(&self, branch_hash: B256) -> Result<Address> {
        if let Some(address) = self.lookup(branch_hash).await? {
            return Ok(address);
        }
        self.register(branch_hash).await
    }

    async fn require_lookup(&self, branch_hash: B256) -> Result<Address> {
        self.lookup(branch_hash)
            .await?
            .ok_or(RegistryError::ZeroAddress)
    }
}

/// Build a client from optional configuration.
///
/// `None` config means the controller booted without chain access; the
/// operation fails with [`RegistryError::Unavailable`] rather than
/// panicking or blocking startup.
pub fn client_from(config: Option<&RegistryConfig>) -> Result<RegistryClient> {
    let config = config.ok_or_else(|| {
        RegistryError::Unavailable(
            "RPC_URL and REGISTRY_ADDRESS are not configured".to_string(),
        )
    })?;
    RegistryClient::new(config.clone())
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
    fn test_client_creation() {
        assert!(RegistryClient::new(test_config()).is_ok());
    }

    #[test]
    fn test_client_from_missing_config() {
        let err = client_from(None).err().unwrap();
        assert!(matches!(err, RegistryError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_from_config() {
        let config = test_config();
        assert!(client_from(Some(&config)).is_ok());
    }
}
