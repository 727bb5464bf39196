//! Inbound side of the WhatsApp bot.
//!
//! Webhook deliveries are normalized into a [`CanonicalMessage`] and then
//! dispatched to registered handlers by a frozen [`Router`]. Nothing in this
//! crate performs I/O; handlers own every outbound call.

mod envelope;
mod error;
mod normalize;
mod router;
mod types;

pub use envelope::{
    ChangeValue, Contact, ContactProfile, PhoneMetadata, RawContext, RawInteractive, RawMessage,
    RawStatus, WHATSAPP_BUSINESS_ACCOUNT_OBJECT, WebhookChange, WebhookEntry, WebhookEnvelope,
};
pub use error::{BotError, ConfigurationError, Result, ValidationError};
pub use normalize::{normalize, normalize_json};
pub use router::{Handler, HandlerInput, RouteOutcome, Router, RouterBuilder};
pub use types::{
    ButtonPayload, CanonicalMessage, DegradedMessage, ErrorData, InteractiveReply, MediaPayload,
    MessageBody, MessageKind, NormalizedWebhook, ProviderError, Sender, StatusNotification,
    TextBody, ThreadRef, UserMessage,
};
