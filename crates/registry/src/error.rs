//! Error types for the registry client.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur talking to the on-chain registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Chain access is not configured (missing RPC URL or registry
    /// address). The HTTP surface keeps running; only chain-dependent
    /// operations fail with this.
    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    /// Transport-level failure (DNS, timeout, connection, 5xx). Retryable
    /// by the caller; must never mark an agent as failed.
    #[error("Transient RPC error: {0}")]
    Transient(String),

    /// Contract call (read operation) failed.
    #[error("Contract call failed: {0}")]
    ContractCall(String),

    /// Transaction (write operation) failed.
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Transaction reverted for a reason other than "already registered".
    #[error("Transaction reverted: {0}")]
    Revert(String),

    /// Timed out waiting for a registration receipt. The registry has
    /// already been re-read before this surfaces.
    #[error("Transaction timeout after {0} seconds")]
    TransactionTimeout(u64),

    /// Registration confirmed but the registry still reports the zero
    /// address for the branch hash.
    #[error("Registry returned zero address after confirmed registration")]
    ZeroAddress,

    /// No private key configured for write operations.
    #[error("No private key configured - registration requires PRIVATE_KEY")]
    NoPrivateKey,

    /// Provider creation or connection error.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Invalid branch hash string.
    #[error("Invalid branch hash: {0}")]
    InvalidBranchHash(String),
}

impl RegistryError {
    /// Check if this error is transient.
    ///
    /// Transient errors leave no durable state behind; the next push or
    /// reconciliation pass retries them. Everything else is an
    /// application-level failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::TransactionTimeout(_) | Self::Unavailable(_)
        )
    }
}

/// Substrings that mark a transport-level failure in a stringified RPC
/// error. The underlying transport does not expose a structured kind for
/// these, so classification is by message.
const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "dns",
    "connection refused",
    "connection reset",
    "connection closed",
    "error sending request",
    "network is unreachable",
    "temporarily unavailable",
    "502",
    "503",
    "504",
];

/// Check whether a stringified RPC error looks like a transport failure.
pub(crate) fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Check whether a revert message carries the "already registered" domain
/// signal. Both the require-string and a custom error name are matched.
pub(crate) fn is_already_registered(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already registered") || lower.contains("alreadyregistered")
}

/// Classify a read-path error message.
pub(crate) fn classify_call_error(message: String) -> RegistryError {
    if is_transient_message(&message) {
        RegistryError::Transient(message)
    } else {
        RegistryError::ContractCall(message)
    }
}

/// Classify a write-path error message.
pub(crate) fn classify_send_error(message: String) -> RegistryError {
    if is_transient_message(&message) {
        RegistryError::Transient(message)
    } else {
        RegistryError::Transaction(message)
    }
}
