use thiserror::Error;

/// Rejection reported by a group crypto engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid external sender package: {0}")]
    ExternalSender(String),

    #[error("invalid proposals: {0}")]
    Proposals(String),

    #[error("key package unavailable: {0}")]
    KeyPackage(String),

    #[error("group not initialized")]
    NotInitialized,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("group engine error: {0}")]
    Engine(#[from] EngineError),
}
