use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    GROUP_SERVER, RECEIPT_ID_LEN, RECEIPT_ID_PREFIX, STATUS_BROADCAST, USER_SERVER,
};
use crate::error::JidError;

/// Address of a user, group or broadcast list: `user[:device]@server`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    user: String,
    device: Option<u16>,
    server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    /// Address of an individual account given its international number.
    pub fn from_phone(digits: &str) -> Self {
        Self::new(digits, USER_SERVER)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn device(&self) -> Option<u16> {
        self.device
    }

    /// Canonical form: the same address without the device suffix.
    pub fn normalized(&self) -> Self {
        Self {
            user: self.user.clone(),
            device: None,
            server: self.server.clone(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.device.is_none() && self.to_string() == STATUS_BROADCAST
    }

    /// Human-readable fallback when no display name is known.
    pub fn formatted(&self) -> String {
        if self.server == USER_SERVER {
            format!("+{}", self.user)
        } else {
            self.user.clone()
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}:{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(JidError::Empty);
        }

        let (local, server) = s
            .rsplit_once('@')
            .ok_or_else(|| JidError::MissingServer(s.to_string()))?;
        if local.is_empty() || server.is_empty() {
            return Err(JidError::MissingServer(s.to_string()));
        }

        let (user, device) = match local.split_once(':') {
            Some((user, device)) => {
                let device = device
                    .parse::<u16>()
                    .map_err(|_| JidError::InvalidDevice(s.to_string()))?;
                (user, Some(device))
            }
            None => (local, None),
        };

        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

/// Identity of one message inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub id: String,
    pub from_me: bool,
    /// Sender inside a group conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

impl MessageKey {
    /// Receipts the bot emits for its own deliveries come back through the
    /// event stream with a recognisable id shape.
    pub fn is_self_receipt(&self) -> bool {
        self.id.starts_with(RECEIPT_ID_PREFIX) && self.id.len() == RECEIPT_ID_LEN
    }

    /// Who sent the message: the participant in groups, the remote side
    /// otherwise.
    pub fn sender(&self) -> &Jid {
        self.participant.as_ref().unwrap_or(&self.remote_jid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_device() {
        let jid: Jid = "911234567890:12@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user(), "911234567890");
        assert_eq!(jid.device(), Some(12));
        assert_eq!(jid.server(), USER_SERVER);
        assert_eq!(jid.normalized().to_string(), "911234567890@s.whatsapp.net");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<Jid>(), Err(JidError::Empty));
        assert!(matches!(
            "nobody".parse::<Jid>(),
            Err(JidError::MissingServer(_))
        ));
        assert!(matches!(
            "123:x@s.whatsapp.net".parse::<Jid>(),
            Err(JidError::InvalidDevice(_))
        ));
    }

    #[test]
    fn test_status_broadcast_and_group() {
        let status: Jid = STATUS_BROADCAST.parse().unwrap();
        assert!(status.is_status_broadcast());

        let group: Jid = "120363041234567890@g.us".parse().unwrap();
        assert!(group.is_group());
        assert!(!group.is_status_broadcast());
        assert_eq!(group.formatted(), "120363041234567890");
    }

    #[test]
    fn test_string_round_trip() {
        let jid = Jid::from_phone("4915112345678");
        let s = String::from(jid.clone());
        assert_eq!(s, "4915112345678@s.whatsapp.net");
        assert_eq!(Jid::try_from(s).unwrap(), jid);
        assert_eq!(jid.formatted(), "+4915112345678");
    }

    #[test]
    fn test_self_receipt_shape() {
        let key = MessageKey {
            remote_jid: Jid::from_phone("4915112345678"),
            id: "BAE5F00DCAFE1234".into(),
            from_me: true,
            participant: None,
        };
        assert!(key.is_self_receipt());

        let longer = MessageKey {
            id: "BAE5F00DCAFE12345".into(),
            ..key.clone()
        };
        assert!(!longer.is_self_receipt());

        let other = MessageKey {
            id: "3EB0F00DCAFE1234".into(),
            ..key
        };
        assert!(!other.is_self_receipt());
    }
}
