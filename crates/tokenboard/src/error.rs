use thiserror::Error;

/// Unified error type for the dashboard core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("chain call failed: {0}")]
    ChainCall(#[from] ChainError),

    #[error("token not found in registry: {0}")]
    NotFound(String),

    #[error("refresh guard violated: {0}")]
    GuardViolation(String),

    #[error("preference store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Failures of an individual contract read.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors reading or writing persisted preferences.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors during ABI encoding and decoding of contract calls.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("return data too short: expected at least {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },

    #[error("invalid ABI encoding: {0}")]
    InvalidEncoding(String),
}

impl From<AbiError> for ChainError {
    fn from(err: AbiError) -> Self {
        ChainError::Malformed(err.to_string())
    }
}
