// Boundary to the messaging transport SDK: connection traits, the event and
// message model it emits, and an in-process loopback implementation.

pub mod credentials;
pub mod error;
pub mod events;
pub mod loopback;
pub mod message;
pub mod transport;

pub use credentials::{CredentialItem, Credentials, CredsUpdate};
pub use error::{Result, TransportError};
pub use events::{
    CallEvent, CallStatus, ConnectionUpdate, ContactUpdate, DisconnectInfo, GroupMetadata,
    GroupParticipantsUpdate, LinkState, ParticipantAction, ReactionEvent, StatusUpdate,
    TransportEvent,
};
pub use loopback::{LoopbackController, LoopbackTransport, SentMessage};
pub use message::{InboundMessage, MessageContent, MessagesUpsert, OutboundMessage, UpsertKind};
pub use transport::{
    BlockAction, ConnectOptions, Connection, EventReceiver, MessageLookup, Transport,
    TransportHandle,
};
