use crate::envelope::{Contact, PhoneMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Dispatch category of an inbound message.
///
/// Interactive replies are folded into `RadioButton` (list replies) and
/// `SimpleButton` (button replies); `unsupported` becomes `UnknownMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Button,
    RadioButton,
    SimpleButton,
    Interactive,
    UnknownMessage,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
            Self::Button => "button",
            Self::RadioButton => "radio_button",
            Self::SimpleButton => "simple_button",
            Self::Interactive => "interactive",
            Self::UnknownMessage => "unknown_message",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Profile name; only user messages carry one.
    pub name: Option<String>,
    pub phone: String,
}

/// The message a user quoted when replying. The quoted sender's display name
/// is not part of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub phone: String,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPayload {
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveReply {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_data: Option<ErrorData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub details: Option<String>,
}

/// Kind specific payload. Serialized flat into [`UserMessage`], so a list
/// reply shows up as a top-level `list_reply` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Text(TextBody),
    Image(MediaPayload),
    Document(MediaPayload),
    Button(ButtonPayload),
    ListReply(InteractiveReply),
    ButtonReply(InteractiveReply),
    Unsupported { errors: Vec<ProviderError> },
    #[serde(rename = "payload")]
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    pub kind: MessageKind,
    pub message_id: Option<String>,
    pub sender: Sender,
    pub received_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub body: MessageBody,
    pub thread: Option<ThreadRef>,
}

impl UserMessage {
    /// Secondary dispatch key. Empty values count as absent.
    pub fn identity(&self) -> Option<&str> {
        let identity = match (&self.kind, &self.body) {
            (MessageKind::Text, MessageBody::Text(text)) => text.body.as_str(),
            (MessageKind::Button, MessageBody::Button(button)) => button.payload.as_str(),
            (MessageKind::RadioButton, MessageBody::ListReply(reply)) => reply.id.as_str(),
            (MessageKind::SimpleButton, MessageBody::ButtonReply(reply)) => reply.id.as_str(),
            _ => return None,
        };
        (!identity.is_empty()).then_some(identity)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text.body.as_str()),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaPayload> {
        match &self.body {
            MessageBody::Image(media) | MessageBody::Document(media) => Some(media),
            _ => None,
        }
    }

    pub fn list_reply(&self) -> Option<&InteractiveReply> {
        match &self.body {
            MessageBody::ListReply(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn button_reply(&self) -> Option<&InteractiveReply> {
        match &self.body {
            MessageBody::ButtonReply(reply) => Some(reply),
            _ => None,
        }
    }
}

/// Delivery status update (`sent`, `delivered`, `read`, `failed`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusNotification {
    pub status: String,
    pub message_id: Option<String>,
    pub sender: Sender,
    pub received_at: Option<DateTime<Utc>>,
    pub errors: Vec<ProviderError>,
}

/// An `unsupported` message that arrived with provider errors attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedMessage {
    pub kind: MessageKind,
    pub message_id: Option<String>,
    pub sender: Sender,
    pub received_at: Option<DateTime<Utc>>,
    pub errors: Vec<ProviderError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum CanonicalMessage {
    User(UserMessage),
    Status(StatusNotification),
    Degraded(DegradedMessage),
}

impl CanonicalMessage {
    pub fn is_message(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn is_notification(&self) -> bool {
        !self.is_message()
    }

    pub fn sender(&self) -> &Sender {
        match self {
            Self::User(message) => &message.sender,
            Self::Status(status) => &status.sender,
            Self::Degraded(degraded) => &degraded.sender,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::User(message) => message.message_id.as_deref(),
            Self::Status(status) => status.message_id.as_deref(),
            Self::Degraded(degraded) => degraded.message_id.as_deref(),
        }
    }

    pub fn as_user(&self) -> Option<&UserMessage> {
        match self {
            Self::User(message) => Some(message),
            _ => None,
        }
    }
}

/// Result of normalizing one webhook delivery.
///
/// `metadata` and `contact` describe the receiving business number and the
/// conversation partner; they are attached whenever present, whatever the
/// message branch. `message` is `None` for deliveries that carry neither a
/// message nor a status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedWebhook {
    pub tenant_id: String,
    pub metadata: Option<PhoneMetadata>,
    pub contact: Option<Contact>,
    pub message: Option<CanonicalMessage>,
}
