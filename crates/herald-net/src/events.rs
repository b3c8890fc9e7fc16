//! Events emitted by a transport connection.
//!
//! Each [`Connection`](crate::transport::Connection) carries one receiver of
//! [`TransportEvent`]s, delivered in the order the SDK produced them.

use chrono::{DateTime, Utc};
use herald_shared::constants::LOGGED_OUT_STATUS;
use herald_shared::{Jid, MessageKey};
use serde::{Deserialize, Serialize};

use crate::credentials::CredsUpdate;
use crate::message::MessagesUpsert;

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

/// Everything a connection can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// New or synced messages.
    MessagesUpsert(MessagesUpsert),
    /// Contact names changed.
    ContactsUpdate(Vec<ContactUpdate>),
    /// Members joined, left, were promoted or demoted.
    GroupParticipantsUpdate(GroupParticipantsUpdate),
    /// Group subject or settings changed.
    GroupMetadataUpdate(GroupMetadata),
    /// Status (about text / story) update from a contact.
    StatusUpdate(StatusUpdate),
    /// Reaction added to or removed from a message.
    Reaction(ReactionEvent),
    /// Call signalling.
    Call(Vec<CallEvent>),
    /// Credential rotation; must be persisted before the next connect.
    CredsUpdate(CredsUpdate),
    /// Link state change, disconnect cause, or a QR payload to display.
    ConnectionUpdate(ConnectionUpdate),
}

impl TransportEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::MessagesUpsert(_) => "messages.upsert",
            TransportEvent::ContactsUpdate(_) => "contacts.update",
            TransportEvent::GroupParticipantsUpdate(_) => "group-participants.update",
            TransportEvent::GroupMetadataUpdate(_) => "groups.update",
            TransportEvent::StatusUpdate(_) => "status.update",
            TransportEvent::Reaction(_) => "messages.reaction",
            TransportEvent::Call(_) => "call",
            TransportEvent::CredsUpdate(_) => "creds.update",
            TransportEvent::ConnectionUpdate(_) => "connection.update",
        }
    }
}

// ---------------------------------------------------------------------------
// Contacts and groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub id: Jid,
    /// Name saved in the address book.
    pub name: Option<String>,
    /// Name the contact advertises.
    pub notify: Option<String>,
}

impl ContactUpdate {
    /// Preferred display name: address book first, then advertised name.
    pub fn best_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.notify.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParticipantsUpdate {
    pub group: Jid,
    pub participants: Vec<Jid>,
    pub action: ParticipantAction,
    pub author: Option<Jid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: Jid,
    pub subject: Option<String>,
}

// ---------------------------------------------------------------------------
// Status and reactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub from: Jid,
    pub status: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    /// Message reacted to.
    pub key: MessageKey,
    pub from: Jid,
    /// `None` removes a previous reaction.
    pub emoji: Option<String>,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Offer,
    Ringing,
    Timeout,
    Reject,
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: String,
    pub from: Jid,
    pub status: CallStatus,
    pub is_video: bool,
    pub is_group: bool,
}

impl CallEvent {
    /// A newly received call, as opposed to a later state change of one.
    pub fn is_incoming_offer(&self) -> bool {
        self.status == CallStatus::Offer
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectInfo {
    /// Status code of the close, when the SDK reports one.
    pub status_code: Option<u16>,
    pub message: String,
}

impl DisconnectInfo {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn logged_out() -> Self {
        Self::new(Some(LOGGED_OUT_STATUS), "logged out")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    pub state: Option<LinkState>,
    pub last_disconnect: Option<DisconnectInfo>,
    /// QR payload to show when pairing by QR.
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            state: Some(LinkState::Open),
            ..Default::default()
        }
    }

    pub fn closed(info: DisconnectInfo) -> Self {
        Self {
            state: Some(LinkState::Close),
            last_disconnect: Some(info),
            qr: None,
        }
    }

    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            qr: Some(payload.into()),
            ..Default::default()
        }
    }
}
