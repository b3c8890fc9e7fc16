use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeraldError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session logged out (status {status})")]
    AuthRevoked { status: u16 },

    #[error("Handler `{handler}` failed: {reason}")]
    Handler { handler: String, reason: String },

    #[error("Resident memory {used_mb} MiB exceeds limit of {limit_mb} MiB")]
    ResourceExhausted { used_mb: u64, limit_mb: u64 },

    #[error("Store I/O error: {0}")]
    StoreIo(String),

    #[error("Invalid address: {0}")]
    Jid(#[from] JidError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid phone number `{input}`: {reason}")]
    InvalidPhoneNumber { input: String, reason: String },

    #[error("Incompatible options: {0}")]
    IncompatibleFlags(String),

    #[error("Pairing-code mode needs an owner phone number")]
    MissingPhoneNumber,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    #[error("empty address")]
    Empty,

    #[error("missing `@server` part in `{0}`")]
    MissingServer(String),

    #[error("invalid device suffix in `{0}`")]
    InvalidDevice(String),
}

/// Recovery class of an error. Every failure the session layer sees is
/// mapped onto exactly one of these before anything acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Log and exit.
    FatalConfig,
    /// Recovered by a scheduled reconnect.
    TransientConnection,
    /// Credentials wiped, pairing restarts.
    AuthRevoked,
    /// Logged at the routing boundary.
    HandlerFailure,
    /// Immediate process exit, restart left to the process manager.
    ResourceExhaustion,
    /// Logged; store keeps working in memory.
    StoreIo,
}

impl HeraldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::Config(_) | HeraldError::Jid(_) => ErrorKind::FatalConfig,
            HeraldError::Connection(_) => ErrorKind::TransientConnection,
            HeraldError::AuthRevoked { .. } => ErrorKind::AuthRevoked,
            HeraldError::Handler { .. } => ErrorKind::HandlerFailure,
            HeraldError::ResourceExhausted { .. } => ErrorKind::ResourceExhaustion,
            HeraldError::StoreIo(_) | HeraldError::Io(_) => ErrorKind::StoreIo,
        }
    }

    /// Process exit code for errors that end the process, `None` for the
    /// recoverable ones.
    pub fn exit_code(&self) -> Option<i32> {
        use crate::constants::{EXIT_FATAL_CONFIG, EXIT_MEMORY_LIMIT};

        match self.kind() {
            ErrorKind::FatalConfig => Some(EXIT_FATAL_CONFIG),
            ErrorKind::ResourceExhaustion => Some(EXIT_MEMORY_LIMIT),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HeraldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds_have_exit_codes() {
        let err = HeraldError::from(ConfigError::MissingPhoneNumber);
        assert_eq!(err.kind(), ErrorKind::FatalConfig);
        assert_eq!(err.exit_code(), Some(1));

        let err = HeraldError::ResourceExhausted {
            used_mb: 420,
            limit_mb: 400,
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(err.exit_code(), Some(2));
    }

    #[test]
    fn test_recoverable_kinds_do_not_exit() {
        assert_eq!(HeraldError::Connection("reset".into()).exit_code(), None);
        assert_eq!(HeraldError::StoreIo("disk full".into()).exit_code(), None);
        assert_eq!(
            HeraldError::AuthRevoked { status: 401 }.kind(),
            ErrorKind::AuthRevoked
        );
    }
}
