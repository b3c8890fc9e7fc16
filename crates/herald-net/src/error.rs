use herald_shared::HeraldError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Linking code request failed: {0}")]
    LinkingCode(String),

    #[error("Operation not supported by this transport: {0}")]
    Unsupported(&'static str),
}

impl From<TransportError> for HeraldError {
    fn from(err: TransportError) -> Self {
        HeraldError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
