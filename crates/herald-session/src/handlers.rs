//! Business-handler boundary.
//!
//! Each event kind has its own payload type and its own handler slot on the
//! [`Router`](crate::router::Router). A handler receives the live transport
//! handle with the normalized event; what it returns is only logged.
//! [`ChannelHandler`] turns a slot into a typed channel for consumers that
//! prefer to pull events.

use std::sync::Arc;

use async_trait::async_trait;
use herald_net::{
    ContactUpdate, GroupMetadata, GroupParticipantsUpdate, InboundMessage, ReactionEvent,
    StatusUpdate, TransportHandle, UpsertKind,
};
use herald_shared::{HeraldError, Jid};
use tokio::sync::mpsc;

/// A message ready for business logic: ephemeral wrappers removed, receipts
/// and filtered traffic already dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub message: InboundMessage,
    pub kind: UpsertKind,
}

impl MessageEvent {
    pub fn conversation(&self) -> &Jid {
        &self.message.key.remote_jid
    }

    pub fn text(&self) -> Option<&str> {
        self.message.content.as_ref().and_then(|c| c.text())
    }
}

/// Traffic for the status path.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A post on the status broadcast conversation.
    Post(InboundMessage),
    Update(StatusUpdate),
    Reaction(ReactionEvent),
}

#[async_trait]
pub trait Handler<E>: Send + Sync
where
    E: Send + 'static,
{
    async fn handle(&self, handle: Arc<dyn TransportHandle>, event: E) -> Result<(), HeraldError>;
}

/// Delivered to a [`ChannelHandler`] receiver.
pub struct Envelope<E> {
    pub handle: Arc<dyn TransportHandle>,
    pub event: E,
}

/// Forwards every event into an mpsc channel.
pub struct ChannelHandler<E> {
    tx: mpsc::Sender<Envelope<E>>,
}

impl<E> ChannelHandler<E> {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope<E>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<E> Handler<E> for ChannelHandler<E>
where
    E: Send + 'static,
{
    async fn handle(&self, handle: Arc<dyn TransportHandle>, event: E) -> Result<(), HeraldError> {
        self.tx
            .send(Envelope { handle, event })
            .await
            .map_err(|_| HeraldError::Handler {
                handler: "channel".to_string(),
                reason: "receiver dropped".to_string(),
            })
    }
}

pub type MessageHandler = Arc<dyn Handler<MessageEvent>>;
pub type StatusHandler = Arc<dyn Handler<StatusEvent>>;
pub type ContactsHandler = Arc<dyn Handler<Vec<ContactUpdate>>>;
pub type GroupParticipantsHandler = Arc<dyn Handler<GroupParticipantsUpdate>>;
pub type GroupMetadataHandler = Arc<dyn Handler<GroupMetadata>>;
