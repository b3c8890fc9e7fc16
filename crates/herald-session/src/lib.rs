//! # herald-session
//!
//! Everything between the transport SDK and the business handlers: the
//! connection supervisor and the pieces it coordinates (credential vault,
//! pairing negotiator, call guard, memory watchdog, event routing and the
//! store binding).

pub mod call_guard;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod pairing;
pub mod router;
pub mod supervisor;
pub mod vault;
pub mod watchdog;

pub use call_guard::CallGuard;
pub use config::{CliOverrides, SessionConfig};
pub use context::AppContext;
pub use error::{PairingError, VaultError};
pub use handlers::{ChannelHandler, Envelope, Handler, MessageEvent, StatusEvent};
pub use ingest::StoreLookup;
pub use pairing::{format_linking_code, PairingNegotiator, PhoneNumber};
pub use router::Router;
pub use supervisor::{
    Action, Backoff, ConnectionMachine, ConnectionState, DisconnectReason, Supervisor,
};
pub use vault::CredentialVault;
pub use watchdog::{MemoryProbe, MemoryWatchdog, ProcStatusProbe};
