//! The transport seam.
//!
//! A [`Transport`] opens sessions. Each session is a [`Connection`]: a shared
//! [`TransportHandle`] for issuing commands plus the receiver its events
//! arrive on, the same command/notification split the swarm task uses.

use std::sync::Arc;

use async_trait::async_trait;
use herald_shared::{Jid, MessageKey};
use tokio::sync::mpsc;

use crate::credentials::Credentials;
use crate::error::Result;
use crate::events::TransportEvent;
use crate::message::OutboundMessage;

/// Receiver half of a connection's event stream.
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Historical message lookup the SDK calls when it must resend or
/// re-decrypt a message it no longer buffers.
#[async_trait]
pub trait MessageLookup: Send + Sync {
    async fn load_message(&self, key: &MessageKey) -> Option<serde_json::Value>;
}

/// Options fixed for the lifetime of one connect attempt.
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Emit QR payloads for display instead of expecting a linking code.
    pub print_qr: bool,
    /// Use the mobile connection style.
    pub mobile: bool,
    /// Device label shown in the linked-devices list.
    pub browser: Option<String>,
    /// Mark the account online as soon as the link opens.
    pub mark_online: bool,
    pub message_lookup: Option<Arc<dyn MessageLookup>>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("print_qr", &self.print_qr)
            .field("mobile", &self.mobile)
            .field("browser", &self.browser)
            .field("mark_online", &self.mark_online)
            .field("message_lookup", &self.message_lookup.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    Block,
    Unblock,
}

/// Commands available on an established session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Our own address, known once the link is open.
    fn own_jid(&self) -> Option<Jid>;

    /// Whether the credentials used for this session are paired.
    fn is_registered(&self) -> bool;

    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<MessageKey>;

    /// Ask for a linking code for `phone` (international digits only).
    async fn request_linking_code(&self, phone: &str) -> Result<String>;

    async fn reject_call(&self, call_id: &str, from: &Jid) -> Result<()>;

    async fn update_block_status(&self, jid: &Jid, action: BlockAction) -> Result<()>;

    /// Forget per-message retry counters.
    fn clear_retry_cache(&self);

    /// Tear the session down. The event stream ends afterwards.
    async fn close(&self);
}

/// An opened session.
pub struct Connection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: EventReceiver,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credentials: &Credentials, options: &ConnectOptions)
        -> Result<Connection>;
}
