use thiserror::Error;

#[derive(Error, Debug)]
pub enum KindredError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identifier: {0} (must be a positive integer)")]
    InvalidIdentifier(i64),
}
