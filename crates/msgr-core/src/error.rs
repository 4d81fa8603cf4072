use thiserror::Error;

/// Outcomes the server reports through a domain status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DomainError {
    #[error("alias already in use")]
    AliasInUse,

    #[error("alias not found")]
    AliasNotFound,

    #[error("alias already connected")]
    AlreadyConnected,

    #[error("alias not connected")]
    NotConnected,
}

/// Errors produced by the msgr protocol layer.
#[derive(Debug, Error)]
pub enum MsgrError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("timeout")]
    Timeout,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl MsgrError {
    /// Socket-level failure (connect, read, write, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, MsgrError::Transport(_) | MsgrError::Io(_) | MsgrError::Timeout)
    }
}

impl From<tokio::time::error::Elapsed> for MsgrError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MsgrError::Timeout
    }
}

pub type MsgrResult<T> = Result<T, MsgrError>;
