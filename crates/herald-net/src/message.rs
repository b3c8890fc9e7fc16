//! Message bodies as delivered by the transport, already decrypted.

use chrono::{DateTime, Utc};
use herald_shared::MessageKey;
use serde::{Deserialize, Serialize};

/// Decrypted message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        caption: Option<String>,
        mime_type: Option<String>,
    },
    Video {
        caption: Option<String>,
        mime_type: Option<String>,
    },
    Sticker {
        mime_type: Option<String>,
    },
    /// Disappearing-message wrapper around the real body.
    Ephemeral {
        message: Box<MessageContent>,
    },
    /// Protocol-level message (revokes, key distribution...).
    Protocol {
        kind: String,
    },
    /// Anything the model does not describe, kept verbatim.
    Raw {
        value: serde_json::Value,
    },
}

impl MessageContent {
    /// Strip ephemeral wrappers down to the inner payload.
    pub fn unwrap_ephemeral(self) -> Self {
        let mut content = self;
        while let MessageContent::Ephemeral { message } = content {
            content = *message;
        }
        content
    }

    /// Text or caption, if the body carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            MessageContent::Image { caption, .. } | MessageContent::Video { caption, .. } => {
                caption.as_deref()
            }
            MessageContent::Ephemeral { message } => message.text(),
            _ => None,
        }
    }
}

/// One message from a messages-upsert event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: MessageKey,
    /// Name the sender advertises.
    #[serde(default)]
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// `None` for stubs whose body could not be decrypted.
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Why a batch of messages was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    /// New, real-time messages.
    Notify,
    /// History sync or catch-up.
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesUpsert {
    pub messages: Vec<InboundMessage>,
    pub kind: UpsertKind,
}

/// Message sent through [`TransportHandle::send_message`].
///
/// [`TransportHandle::send_message`]: crate::transport::TransportHandle::send_message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Message being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<MessageKey>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: None,
        }
    }

    pub fn reply_to(mut self, key: MessageKey) -> Self {
        self.quoted = Some(key);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_nested_ephemeral() {
        let wrapped = MessageContent::Ephemeral {
            message: Box::new(MessageContent::Ephemeral {
                message: Box::new(MessageContent::Text {
                    text: "inner".into(),
                }),
            }),
        };
        assert_eq!(wrapped.text(), Some("inner"));
        assert_eq!(
            wrapped.unwrap_ephemeral(),
            MessageContent::Text {
                text: "inner".into()
            }
        );
    }

    #[test]
    fn test_unwrap_is_identity_for_plain_bodies() {
        let plain = MessageContent::Image {
            caption: Some("cat".into()),
            mime_type: Some("image/jpeg".into()),
        };
        assert_eq!(plain.clone().unwrap_ephemeral(), plain);
    }

    #[test]
    fn test_tagged_json_shape() {
        let body: MessageContent =
            serde_json::from_str(r#"{"type":"ephemeral","message":{"type":"text","text":"hi"}}"#)
                .unwrap();
        assert_eq!(body.text(), Some("hi"));
    }
}
