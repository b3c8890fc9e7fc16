//! Records held by the store and written into snapshots.

use chrono::{DateTime, Utc};
use herald_shared::Jid;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StoreRecord
// ---------------------------------------------------------------------------

/// Last observed state of one message, keyed by `(conversation, item_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreRecord {
    /// Conversation the message belongs to, always in normalized form.
    pub conversation: Jid,
    /// Message id inside the conversation.
    pub item_id: String,
    /// Opaque message body as delivered by the transport.
    pub payload: serde_json::Value,
    /// When the record was last written locally.
    pub last_seen: DateTime<Utc>,
}

impl StoreRecord {
    pub fn new(conversation: Jid, item_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            conversation: conversation.normalized(),
            item_id: item_id.into(),
            payload,
            last_seen: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContactRecord
// ---------------------------------------------------------------------------

/// Display identity of a participant or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactRecord {
    /// Canonical (normalized) address.
    pub id: Jid,
    /// Name to show, when one is known.
    pub display_name: Option<String>,
    /// Whether the address is a group conversation.
    pub is_group: bool,
    /// When the contact was last updated locally.
    pub updated_at: DateTime<Utc>,
}

impl ContactRecord {
    pub fn new(id: &Jid, display_name: Option<String>) -> Self {
        let id = id.normalized();
        Self {
            is_group: id.is_group(),
            id,
            display_name,
            updated_at: Utc::now(),
        }
    }

    /// Display name, or the formatted address when none is known.
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.formatted())
    }
}

// ---------------------------------------------------------------------------
// Flush summary
// ---------------------------------------------------------------------------

/// Result of one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub messages: usize,
    pub contacts: usize,
    pub bytes: usize,
}
