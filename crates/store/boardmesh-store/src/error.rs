use thiserror::Error;

/// Error taxonomy for the content-store adapter, per the data model's
/// "Transport error, backend error with message, JSON parse error" contract.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend reports zero peers")]
    NoPeers,

    #[error("json parse error: {0}")]
    Json(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for boardmesh_types::BoardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => boardmesh_types::BoardError::NotFound(m),
            other => boardmesh_types::BoardError::Upstream(other.to_string()),
        }
    }
}
