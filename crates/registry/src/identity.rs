//! Branch identity derivation.
//!
//! The branch hash is the globally unique identity of a tracked
//! (repository, branch) pair: keccak256 of `repo_url + "/" + branch_name`.
//! It survives database loss and identifies the workspace directory, the
//! on-chain registry entry, and the supervised worker process.

use crate::error::{RegistryError, Result};
use alloy::primitives::{keccak256, B256};

/// Number of hex characters of the branch hash used as the supervisor
/// process name.
const SUPERVISOR_NAME_LEN: usize = 16;

/// Compute the branch hash for a (repository, branch) pair.
pub fn branch_hash(repo_url: &str, branch_name: &str) -> B256 {
    keccak256(format!("{}/{}", repo_url, branch_name).as_bytes())
}

/// Render a branch hash as 64 lowercase hex characters (no 0x prefix).
/// This is the form used for workspace directory names and DB keys.
pub fn branch_hash_hex(hash: &B256) -> String {
    hex::encode(hash.as_slice())
}

/// Parse a branch hash from hex, with or without a 0x prefix.
pub fn parse_branch_hash(input: &str) -> Result<B256> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != 64 {
        return Err(RegistryError::InvalidBranchHash(format!(
            "expected 64 hex characters, got {}",
            stripped.len()
        )));
    }

    let bytes = hex::decode(stripped)
        .map_err(|e| RegistryError::InvalidBranchHash(e.to_string()))?;

    Ok(B256::from_slice(&bytes))
}

/// Derive the supervisor process name: the first 16 hex characters of the
/// branch hash.
pub fn supervisor_name(hash: &B256) -> String {
    branch_hash_hex(hash)[..SUPERVISOR_NAME_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_hash_is_keccak_of_joined_pair() {
        let hash = branch_hash("https://github.com/acme/trader.git", "main");
        let expected = keccak256("https://github.com/acme/trader.git/main".as_bytes());
        assert_eq!(hash, expected);
    }

    #[test]
    fn test_branch_hash_is_pure() {
        let a = branch_hash("https://github.com/acme/trader.git", "main");
        let b = branch_hash("https://github.com/acme/trader.git", "main");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_branches_distinct_hashes() {
        let main = branch_hash("https://github.com/acme/trader.git", "main");
        let dev = branch_hash("https://github.com/acme/trader.git", "dev");
        assert_ne!(main, dev);
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = branch_hash("https://github.com/acme/trader.git", "main");
        let hex = branch_hash_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert_eq!(parse_branch_hash(&hex).unwrap(), hash);
        assert_eq!(parse_branch_hash(&format!("0x{}", hex)).unwrap(), hash);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_branch_hash("abc").is_err());
        assert!(parse_branch_hash(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_supervisor_name_is_hash_prefix() {
        let hash = branch_hash("https://github.com/acme/trader.git", "main");
        let name = supervisor_name(&hash);
        assert_eq!(name.len(), 16);
        assert!(branch_hash_hex(&hash).starts_with(&name));
    }
}
