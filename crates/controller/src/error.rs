use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] db::StoreError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] workspace::WorkspaceError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] supervisor::SupervisorError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ControllerError {
    /// Transient chain failures leave no durable trace: the agent is not
    /// marked failed and the next push retries naturally.
    pub fn is_transient_chain(&self) -> bool {
        matches!(self, ControllerError::Registry(e) if e.is_transient())
    }

    /// Supervisor transport failures are logged and swallowed; they must
    /// never terminate the controller.
    pub fn is_supervisor_ipc(&self) -> bool {
        matches!(self, ControllerError::Supervisor(e) if e.is_ipc_error())
    }
}
