use std::path::PathBuf;

use herald_net::TransportError;
use herald_shared::{ConfigError, HeraldError};
use herald_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unreadable credential file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Write failed: {0}")]
    Write(#[from] StoreError),
}

impl From<VaultError> for HeraldError {
    fn from(err: VaultError) -> Self {
        HeraldError::StoreIo(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum PairingError {
    #[error(transparent)]
    InvalidNumber(#[from] ConfigError),

    #[error("Linking code request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Transport returned an empty linking code")]
    EmptyCode,
}

impl From<PairingError> for HeraldError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::InvalidNumber(e) => HeraldError::Config(e),
            PairingError::Transport(e) => e.into(),
            PairingError::EmptyCode => {
                HeraldError::Connection("empty linking code".to_string())
            }
        }
    }
}
