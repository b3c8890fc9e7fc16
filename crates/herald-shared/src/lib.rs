//! Identifiers, constants and the error taxonomy shared by every Herald crate.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{ConfigError, ErrorKind, HeraldError, JidError, Result};
pub use types::{Jid, MessageKey};
