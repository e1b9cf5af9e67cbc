//! Domain error type shared by services and handlers.

use thiserror::Error;

use crate::driver::DriverError;

pub type BayResult<T> = Result<T, BayError>;

/// Errors surfaced by Bay services. The HTTP mapping lives in `api::error`.
#[derive(Debug, Error)]
pub enum BayError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// Upload body exceeds the configured ceiling.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Global ship cap reached under the `reject` policy.
    #[error("{0}")]
    CapacityExhausted(String),

    /// Global ship cap reached and the `wait` deadline passed.
    #[error("{0}")]
    WaitTimeout(String),

    /// Ship exists but is not (yet) able to serve requests.
    #[error("{0}")]
    ShipUnready(String),

    /// A forwarded driver or ship call exceeded its timeout.
    #[error("{0}")]
    BackendTimeout(String),

    /// The container backend rejected or failed the operation.
    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BayError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn unready(msg: impl Into<String>) -> Self {
        Self::ShipUnready(msg.into())
    }
}

impl From<DriverError> for BayError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotFound(msg) => BayError::NotFound(msg),
            DriverError::InvalidSpec(msg) => BayError::InvalidRequest(msg),
            DriverError::Timeout(msg) => BayError::BackendTimeout(msg),
            other => BayError::Backend(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BayError {
    fn from(err: sqlx::Error) -> Self {
        BayError::Internal(anyhow::Error::new(err).context("database error"))
    }
}
