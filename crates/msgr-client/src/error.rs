use msgr_core::DomainError;
use thiserror::Error;

/// How a client request ended when it did not succeed.
///
/// Transport problems never surface here in detail: they are logged and
/// reported as [`RequestError::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("rejected: {0}")]
    Rejected(DomainError),

    #[error("request failed")]
    Failed,

    #[error("not implemented")]
    Unimplemented,
}

impl From<DomainError> for RequestError {
    fn from(err: DomainError) -> Self {
        RequestError::Rejected(err)
    }
}

pub type RequestResult<T> = Result<T, RequestError>;
