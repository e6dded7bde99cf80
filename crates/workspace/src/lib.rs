//! Branch-keyed git working directories.
//!
//! Each tracked branch owns one directory under the workspace root, named
//! by its branch hash. The directory is a plain git clone of the branch;
//! it is never authoritative — `sync` hard-resets local changes before
//! pulling so the remote tip always wins.

pub mod error;
pub mod manager;

pub use error::{Result, SyncStep, WorkspaceError};
pub use manager::{Entrypoint, WorkspaceManager};
