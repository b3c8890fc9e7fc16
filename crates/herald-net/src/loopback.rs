//! In-process transport.
//!
//! [`LoopbackTransport`] never touches the network. Every connect opens a
//! fresh event channel that a [`LoopbackController`] can push events into,
//! and every command issued through the session handle is recorded so it
//! can be inspected afterwards.
//!
//! ```ignore
//! let (transport, controller) = LoopbackTransport::new(own_jid);
//! let conn = transport.connect(&Credentials::empty(), &ConnectOptions::default()).await?;
//!
//! controller.open().await;
//! conn.handle.send_message(&peer, OutboundMessage::text("hi")).await?;
//! assert_eq!(controller.take_sent().len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use herald_shared::constants::{RECEIPT_ID_LEN, RECEIPT_ID_PREFIX};
use herald_shared::{Jid, MessageKey};
use tokio::sync::mpsc;
use tracing::debug;

use crate::credentials::{Credentials, CredsUpdate};
use crate::error::{Result, TransportError};
use crate::events::{ConnectionUpdate, DisconnectInfo, TransportEvent};
use crate::message::{InboundMessage, MessageContent, MessagesUpsert, OutboundMessage, UpsertKind};
use crate::transport::{BlockAction, ConnectOptions, Connection, Transport, TransportHandle};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_LINKING_CODE: &str = "ABCD1234";

/// One message handed to [`TransportHandle::send_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: Jid,
    pub message: OutboundMessage,
    pub key: MessageKey,
}

struct Session {
    id: u64,
    events: mpsc::Sender<TransportEvent>,
    options: ConnectOptions,
}

struct LoopbackState {
    own_jid: Jid,
    linking_code: String,
    auto_open: bool,
    echo_sent: bool,
    connect_failures: VecDeque<TransportError>,
    connect_stalls: usize,
    connects: Vec<Credentials>,
    next_session: u64,
    current: Option<Session>,
    sent: Vec<SentMessage>,
    rejected_calls: Vec<(String, Jid)>,
    block_updates: Vec<(Jid, BlockAction)>,
    linking_requests: Vec<String>,
    retry_cache_clears: usize,
}

type Shared = Arc<Mutex<LoopbackState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, LoopbackState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn receipt_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    let tail = RECEIPT_ID_LEN - RECEIPT_ID_PREFIX.len();
    format!("{}{}", RECEIPT_ID_PREFIX, &hex[..tail])
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct LoopbackTransport {
    shared: Shared,
}

impl LoopbackTransport {
    /// Create a transport whose sessions belong to `own_jid`, plus the
    /// controller driving it.
    pub fn new(own_jid: Jid) -> (Self, LoopbackController) {
        let shared = Arc::new(Mutex::new(LoopbackState {
            own_jid,
            linking_code: DEFAULT_LINKING_CODE.to_string(),
            auto_open: false,
            echo_sent: false,
            connect_failures: VecDeque::new(),
            connect_stalls: 0,
            connects: Vec::new(),
            next_session: 0,
            current: None,
            sent: Vec::new(),
            rejected_calls: Vec::new(),
            block_updates: Vec::new(),
            linking_requests: Vec::new(),
            retry_cache_clears: 0,
        }));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackController { shared },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<Connection> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stall = {
            let mut state = lock(&self.shared);
            state.connects.push(credentials.clone());
            if let Some(err) = state.connect_failures.pop_front() {
                debug!(error = %err, "loopback connect failing as scripted");
                return Err(err);
            }
            let stall = state.connect_stalls > 0;
            state.connect_stalls = state.connect_stalls.saturating_sub(1);
            stall
        };
        if stall {
            debug!("loopback connect stalling as scripted");
            std::future::pending::<()>().await;
        }

        let (session_id, auto_open) = {
            let mut state = lock(&self.shared);
            state.next_session += 1;
            let id = state.next_session;
            state.current = Some(Session {
                id,
                events: tx.clone(),
                options: options.clone(),
            });
            (id, state.auto_open)
        };
        debug!(session = session_id, registered = credentials.registered, "loopback session started");

        if auto_open {
            let _ = tx
                .send(TransportEvent::ConnectionUpdate(ConnectionUpdate::open()))
                .await;
        }

        let handle = LoopbackHandle {
            shared: Arc::clone(&self.shared),
            session_id,
            registered: credentials.registered,
        };
        Ok(Connection {
            handle: Arc::new(handle),
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

struct LoopbackHandle {
    shared: Shared,
    session_id: u64,
    registered: bool,
}

impl LoopbackHandle {
    fn live_sender(&self) -> Result<mpsc::Sender<TransportEvent>> {
        let state = lock(&self.shared);
        match state.current {
            Some(ref session) if session.id == self.session_id => Ok(session.events.clone()),
            _ => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl TransportHandle for LoopbackHandle {
    fn own_jid(&self) -> Option<Jid> {
        Some(lock(&self.shared).own_jid.clone())
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<MessageKey> {
        let events = self.live_sender()?;
        let key = MessageKey {
            remote_jid: to.clone(),
            id: receipt_id(),
            from_me: true,
            participant: None,
        };
        let echo = {
            let mut state = lock(&self.shared);
            state.sent.push(SentMessage {
                to: to.clone(),
                message: message.clone(),
                key: key.clone(),
            });
            state.echo_sent
        };

        if echo {
            let upsert = MessagesUpsert {
                messages: vec![InboundMessage {
                    key: key.clone(),
                    push_name: None,
                    timestamp: Utc::now(),
                    content: Some(MessageContent::Text { text: message.text }),
                }],
                kind: UpsertKind::Notify,
            };
            let _ = events.send(TransportEvent::MessagesUpsert(upsert)).await;
        }
        Ok(key)
    }

    async fn request_linking_code(&self, phone: &str) -> Result<String> {
        self.live_sender()?;
        let mut state = lock(&self.shared);
        state.linking_requests.push(phone.to_string());
        Ok(state.linking_code.clone())
    }

    async fn reject_call(&self, call_id: &str, from: &Jid) -> Result<()> {
        self.live_sender()?;
        lock(&self.shared)
            .rejected_calls
            .push((call_id.to_string(), from.clone()));
        Ok(())
    }

    async fn update_block_status(&self, jid: &Jid, action: BlockAction) -> Result<()> {
        self.live_sender()?;
        lock(&self.shared).block_updates.push((jid.clone(), action));
        Ok(())
    }

    fn clear_retry_cache(&self) {
        lock(&self.shared).retry_cache_clears += 1;
    }

    async fn close(&self) {
        let mut state = lock(&self.shared);
        if state.current.as_ref().map(|s| s.id) == Some(self.session_id) {
            state.current = None;
            debug!(session = self.session_id, "loopback session closed by handle");
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives a [`LoopbackTransport`] and inspects what was sent through it.
#[derive(Clone)]
pub struct LoopbackController {
    shared: Shared,
}

impl LoopbackController {
    /// Send `Open` on every new session as soon as it connects.
    pub fn set_auto_open(&self, enabled: bool) {
        lock(&self.shared).auto_open = enabled;
    }

    /// Deliver every sent message back as a `messages.upsert` event.
    pub fn set_echo_sent(&self, enabled: bool) {
        lock(&self.shared).echo_sent = enabled;
    }

    pub fn set_linking_code(&self, code: impl Into<String>) {
        lock(&self.shared).linking_code = code.into();
    }

    /// Make the next connect attempt fail with `err`. Failures queue up.
    pub fn fail_next_connect(&self, err: TransportError) {
        lock(&self.shared).connect_failures.push_back(err);
    }

    /// Make the next connect attempt hang forever. Stalls queue up and are
    /// consumed after scripted failures.
    pub fn stall_next_connect(&self) {
        lock(&self.shared).connect_stalls += 1;
    }

    /// Push an event into the current session. Returns `false` when no
    /// session is live or its receiver is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = lock(&self.shared).current.as_ref().map(|s| s.events.clone());
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn open(&self) -> bool {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::open()))
            .await
    }

    /// Report a close with `status_code` and end the current session.
    pub async fn close(&self, status_code: Option<u16>) -> bool {
        let info = DisconnectInfo::new(status_code, "connection closed");
        let delivered = self
            .emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::closed(info)))
            .await;
        lock(&self.shared).current = None;
        delivered
    }

    pub async fn creds(&self, update: CredsUpdate) -> bool {
        self.emit(TransportEvent::CredsUpdate(update)).await
    }

    pub async fn qr(&self, payload: &str) -> bool {
        self.emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::qr(payload)))
            .await
    }

    /// End the current session without reporting why.
    pub fn drop_session(&self) {
        lock(&self.shared).current = None;
    }

    pub fn has_live_session(&self) -> bool {
        lock(&self.shared).current.is_some()
    }

    /// Ask the current session's message lookup for `key`.
    pub async fn lookup(&self, key: &MessageKey) -> Option<serde_json::Value> {
        let lookup = lock(&self.shared)
            .current
            .as_ref()
            .and_then(|s| s.options.message_lookup.clone())?;
        lookup.load_message(key).await
    }

    pub fn current_options(&self) -> Option<ConnectOptions> {
        lock(&self.shared).current.as_ref().map(|s| s.options.clone())
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.shared).connects.len()
    }

    /// Credentials passed to each connect attempt, oldest first.
    pub fn connect_credentials(&self) -> Vec<Credentials> {
        lock(&self.shared).connects.clone()
    }

    /// Take all sent messages, clearing the buffer.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut lock(&self.shared).sent)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.shared).sent.clone()
    }

    pub fn rejected_calls(&self) -> Vec<(String, Jid)> {
        lock(&self.shared).rejected_calls.clone()
    }

    pub fn block_updates(&self) -> Vec<(Jid, BlockAction)> {
        lock(&self.shared).block_updates.clone()
    }

    pub fn linking_requests(&self) -> Vec<String> {
        lock(&self.shared).linking_requests.clone()
    }

    pub fn retry_cache_clears(&self) -> usize {
        lock(&self.shared).retry_cache_clears
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LinkState;

    fn me() -> Jid {
        "100@s.whatsapp.net".parse().unwrap()
    }

    fn peer() -> Jid {
        "200@s.whatsapp.net".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_capture_and_receipt_ids() {
        let (transport, controller) = LoopbackTransport::new(me());
        let conn = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();

        let key = conn
            .handle
            .send_message(&peer(), OutboundMessage::text("hello"))
            .await
            .unwrap();
        assert!(key.from_me);
        assert!(key.is_self_receipt());

        let sent = controller.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, peer());
        assert_eq!(sent[0].message.text, "hello");
        assert!(controller.take_sent().is_empty());
    }

    #[tokio::test]
    async fn test_emit_reaches_current_session_only() {
        let (transport, controller) = LoopbackTransport::new(me());
        let mut first = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();

        assert!(controller.close(Some(428)).await);
        match first.events.recv().await {
            Some(TransportEvent::ConnectionUpdate(update)) => {
                assert_eq!(update.state, Some(LinkState::Close));
                assert_eq!(update.last_disconnect.unwrap().status_code, Some(428));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The old handle is dead once its session ended.
        let err = first
            .handle
            .send_message(&peer(), OutboundMessage::text("late"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);

        let mut second = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();
        assert!(controller.open().await);
        assert!(matches!(
            second.events.recv().await,
            Some(TransportEvent::ConnectionUpdate(_))
        ));
        assert_eq!(controller.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_connect_failure() {
        let (transport, controller) = LoopbackTransport::new(me());
        controller.fail_next_connect(TransportError::ConnectFailed("refused".into()));

        let result = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert!(!controller.has_live_session());

        assert!(transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .is_ok());
        assert_eq!(controller.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_connect_stall() {
        let (transport, controller) = LoopbackTransport::new(me());
        controller.stall_next_connect();

        let stalled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            transport.connect(&Credentials::empty(), &ConnectOptions::default()),
        )
        .await;
        assert!(stalled.is_err());
        assert!(!controller.has_live_session());

        assert!(transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .is_ok());
        assert_eq!(controller.connect_count(), 2);
        assert!(controller.has_live_session());
    }

    #[tokio::test]
    async fn test_echo_sent_delivers_self_receipt() {
        let (transport, controller) = LoopbackTransport::new(me());
        controller.set_echo_sent(true);
        let mut conn = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();

        conn.handle
            .send_message(&peer(), OutboundMessage::text("ping"))
            .await
            .unwrap();

        match conn.events.recv().await {
            Some(TransportEvent::MessagesUpsert(upsert)) => {
                assert!(upsert.messages[0].key.is_self_receipt());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commands_are_recorded() {
        let (transport, controller) = LoopbackTransport::new(me());
        controller.set_linking_code("WXYZ9876");
        let conn = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();

        let code = conn.handle.request_linking_code("15551234567").await.unwrap();
        assert_eq!(code, "WXYZ9876");
        conn.handle.reject_call("call-1", &peer()).await.unwrap();
        conn.handle
            .update_block_status(&peer(), BlockAction::Block)
            .await
            .unwrap();
        conn.handle.clear_retry_cache();

        assert_eq!(controller.linking_requests(), vec!["15551234567".to_string()]);
        assert_eq!(controller.rejected_calls(), vec![("call-1".to_string(), peer())]);
        assert_eq!(controller.block_updates(), vec![(peer(), BlockAction::Block)]);
        assert_eq!(controller.retry_cache_clears(), 1);

        conn.handle.close().await;
        assert!(!controller.has_live_session());
    }
}
