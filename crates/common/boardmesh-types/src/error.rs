use thiserror::Error;

/// Error kinds shared across every boardmesh crate.
///
/// Kinds mirror the propagation rules in the error-handling design: callers
/// at the HTTP edge map these to status codes, core code never does.
#[derive(Error, Debug, Clone)]
pub enum BoardError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("invalid key bytes: {0}")]
    InvalidKeyBytes(String),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, BoardError>;
