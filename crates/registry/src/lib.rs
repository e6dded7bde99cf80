//! On-chain agent registry client.
//!
//! Every tracked (repository, branch) pair is identified by its branch hash,
//! and the registry contract maps that hash to the address of the agent
//! contract deployed for it. This crate provides the read/write client for
//! that mapping plus the branch identity helpers shared by the rest of the
//! system.
//!
//! Providers are stateless: a new one is created for each operation. Write
//! operations require a private key in the configuration; read operations
//! do not.

pub mod abi;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod identity;

pub use client::{client_from, RegistryClient};
pub use config::RegistryConfig;
pub use contract::ContractClient;
pub use error::{RegistryError, Result};
pub use identity::{branch_hash, branch_hash_hex, parse_branch_hash, supervisor_name};

pub use alloy::primitives::{Address, B256};
