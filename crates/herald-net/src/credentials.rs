//! Authentication material handed to [`Transport::connect`].
//!
//! The contents are opaque to the session layer: the SDK produces them and
//! later consumes them again. Only the `registered` flag is interpreted.
//!
//! [`Transport::connect`]: crate::transport::Transport::connect

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One opaque key item (pre-keys, session records, sync keys...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialItem(pub Vec<u8>);

impl Serialize for CredentialItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for CredentialItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(CredentialItem)
            .map_err(serde::de::Error::custom)
    }
}

/// Complete credential state of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Main credentials blob.
    pub creds: serde_json::Value,
    /// Whether this device has completed pairing.
    pub registered: bool,
    /// Key items by name.
    pub items: BTreeMap<String, CredentialItem>,
}

impl Credentials {
    /// Fresh state: connecting with it starts a new pairing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.creds.is_null() && !self.registered && self.items.is_empty()
    }

    /// Merge a rotation event into this state.
    pub fn apply(&mut self, update: &CredsUpdate) {
        if let Some(ref creds) = update.creds {
            self.creds = creds.clone();
        }
        if let Some(registered) = update.registered {
            self.registered = registered;
        }
        for (name, item) in &update.items {
            match item {
                Some(item) => {
                    self.items.insert(name.clone(), item.clone());
                }
                None => {
                    self.items.remove(name);
                }
            }
        }
    }
}

/// Partial credential change emitted by the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredsUpdate {
    /// Replacement for the main blob, if it changed.
    pub creds: Option<serde_json::Value>,
    /// New registration flag, if it changed.
    pub registered: Option<bool>,
    /// Changed items; `None` deletes the item.
    pub items: BTreeMap<String, Option<CredentialItem>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_merges_and_deletes() {
        let mut creds = Credentials::empty();
        assert!(creds.is_empty());

        let mut update = CredsUpdate {
            creds: Some(json!({"me": "111@s.whatsapp.net"})),
            registered: Some(true),
            ..Default::default()
        };
        update
            .items
            .insert("pre-key-1".into(), Some(CredentialItem(vec![1, 2, 3])));
        update
            .items
            .insert("session-a".into(), Some(CredentialItem(vec![9])));
        creds.apply(&update);

        assert!(creds.registered);
        assert_eq!(creds.items.len(), 2);

        let mut removal = CredsUpdate::default();
        removal.items.insert("pre-key-1".into(), None);
        creds.apply(&removal);

        assert_eq!(creds.items.len(), 1);
        assert!(creds.registered, "unchanged fields are kept");
        assert_eq!(creds.creds, json!({"me": "111@s.whatsapp.net"}));
    }

    #[test]
    fn test_item_serializes_as_base64() {
        let item = CredentialItem(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, "\"3q2+7w==\"");
        let back: CredentialItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
