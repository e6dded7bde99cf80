//! Worker environment construction.
//!
//! The required variables are struct fields so a worker can never be
//! spawned without them; user secrets ride along in a map. The flat OS
//! env map is built only at the moment of spawning, and secret values are
//! never logged — diagnostics report key names only.

use std::collections::HashMap;

/// Environment handed to a worker process.
#[derive(Debug, Clone)]
pub struct Environment {
    pub agent_contract_address: String,
    pub repo_url: String,
    pub branch_name: String,
    pub backend_url: String,
    pub rpc_url: String,
    /// Decrypted user secrets for this branch.
    pub secrets: HashMap<String, String>,
}

impl Environment {
    /// Validate the non-negotiable post-conditions before spawning.
    pub fn validate(&self) -> Result<(), String> {
        if self.repo_url.trim().is_empty() {
            return Err("REPO_URL must be present and non-empty".to_string());
        }
        if self.branch_name.trim().is_empty() {
            return Err("BRANCH_NAME must be present and non-empty".to_string());
        }
        Ok(())
    }

    /// Build the flat OS env map. Secrets are merged first so a
    /// user-defined key can never clobber a required variable.
    pub fn into_env_map(self) -> HashMap<String, String> {
        let mut env = self.secrets;
        env.insert(
            "AGENT_CONTRACT_ADDRESS".to_string(),
            self.agent_contract_address,
        );
        env.insert("REPO_URL".to_string(), self.repo_url);
        env.insert("BRANCH_NAME".to_string(), self.branch_name);
        env.insert("BACKEND_URL".to_string(), self.backend_url);
        env.insert("RPC_URL".to_string(), self.rpc_url);
        env
    }

    /// Secret key names, for value-free diagnostics.
    pub fn secret_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.secrets.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Environment {
        Environment {
            agent_contract_address: "0x1111111111111111111111111111111111111111".to_string(),
            repo_url: "https://github.com/acme/trader.git".to_string(),
            branch_name: "main".to_string(),
            backend_url: "http://localhost:3000".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            secrets: HashMap::new(),
        }
    }

    #[test]
    fn test_env_map_contains_required_vars() {
        let env = sample().into_env_map();
        for var in [
            "AGENT_CONTRACT_ADDRESS",
            "REPO_URL",
            "BRANCH_NAME",
            "BACKEND_URL",
            "RPC_URL",
        ] {
            assert!(env.contains_key(var), "missing {}", var);
        }
    }

    #[test]
    fn test_secrets_merged_but_cannot_clobber_required() {
        let mut environment = sample();
        environment
            .secrets
            .insert("OPENAI_API_KEY".to_string(), "sk-123".to_string());
        environment
            .secrets
            .insert("REPO_URL".to_string(), "https://evil.example".to_string());

        let env = environment.into_env_map();
        assert_eq!(env.get("OPENAI_API_KEY").map(String::as_str), Some("sk-123"));
        assert_eq!(
            env.get("REPO_URL").map(String::as_str),
            Some("https://github.com/acme/trader.git")
        );
    }

    #[test]
    fn test_validation_rejects_empty_required_fields() {
        let mut environment = sample();
        environment.branch_name = "  ".to_string();
        assert!(environment.validate().is_err());

        let mut environment = sample();
        environment.repo_url = String::new();
        assert!(environment.validate().is_err());

        assert!(sample().validate().is_ok());
    }
}
