use crate::envelope::{
    Contact, RawMessage, RawStatus, WHATSAPP_BUSINESS_ACCOUNT_OBJECT, WebhookEnvelope,
};
use crate::error::{Result, ValidationError};
use crate::types::{
    CanonicalMessage, DegradedMessage, MessageBody, MessageKind, NormalizedWebhook, Sender,
    StatusNotification, ThreadRef, UserMessage,
};
use chrono::{DateTime, Utc};

/// Validate a webhook envelope and extract its single message or status.
///
/// Only `entry[0]` / `changes[0]` and the first record of each list are
/// read. The envelope is borrowed and never modified; normalizing the same
/// envelope twice yields equal values.
pub fn normalize(
    envelope: Option<&WebhookEnvelope>,
    expected_tenant: &str,
) -> Result<NormalizedWebhook> {
    let envelope = envelope.ok_or(ValidationError::MissingPayload)?;
    let entry = envelope.entry.first().ok_or(ValidationError::MissingEntry)?;

    if entry.id != expected_tenant {
        return Err(ValidationError::TenantMismatch {
            expected: expected_tenant.to_string(),
            actual: entry.id.clone(),
        }
        .into());
    }

    if envelope.object.as_deref() != Some(WHATSAPP_BUSINESS_ACCOUNT_OBJECT) {
        return Err(
            ValidationError::UnexpectedObject(envelope.object.clone().unwrap_or_default()).into(),
        );
    }

    let change = entry.changes.first().ok_or(ValidationError::MissingChanges)?;
    let value = &change.value;
    let contact = value.contacts.first().cloned();

    let message = if let Some(status) = value.statuses.first() {
        Some(CanonicalMessage::Status(status_notification(status)))
    } else if let Some(message) = value.messages.first() {
        Some(user_message(message, contact.as_ref()))
    } else {
        tracing::warn!(
            tenant_id = %entry.id,
            field = ?change.field,
            "webhook change carries neither a message nor a status"
        );
        None
    };

    Ok(NormalizedWebhook {
        tenant_id: entry.id.clone(),
        metadata: value.metadata.clone(),
        contact,
        message,
    })
}

/// Like [`normalize`], starting from an already parsed JSON body.
pub fn normalize_json(
    payload: &serde_json::Value,
    expected_tenant: &str,
) -> Result<NormalizedWebhook> {
    if payload.is_null() {
        return Err(ValidationError::MissingPayload.into());
    }
    let envelope: WebhookEnvelope = serde_json::from_value(payload.clone())
        .map_err(|e| ValidationError::MalformedEnvelope(e.to_string()))?;
    normalize(Some(&envelope), expected_tenant)
}

fn status_notification(status: &RawStatus) -> StatusNotification {
    StatusNotification {
        status: status.status.clone(),
        message_id: non_empty(status.id.as_deref()),
        sender: Sender {
            name: None,
            phone: status.recipient_id.clone(),
        },
        received_at: parse_timestamp(status.timestamp.as_deref()),
        errors: status.errors.clone(),
    }
}

fn user_message(message: &RawMessage, contact: Option<&Contact>) -> CanonicalMessage {
    let (kind, body) = fold_kind(message);
    let sender = Sender {
        name: contact
            .and_then(|contact| contact.profile.as_ref())
            .and_then(|profile| non_empty(profile.name.as_deref())),
        phone: message.from.clone(),
    };
    let message_id = non_empty(message.id.as_deref());
    let received_at = parse_timestamp(message.timestamp.as_deref());

    if kind == MessageKind::UnknownMessage && !message.errors.is_empty() {
        return CanonicalMessage::Degraded(DegradedMessage {
            kind,
            message_id,
            sender,
            received_at,
            errors: message.errors.clone(),
        });
    }

    let thread = message.context.as_ref().map(|context| ThreadRef {
        phone: context.from.clone().unwrap_or_default(),
        message_id: non_empty(context.id.as_deref()),
    });

    CanonicalMessage::User(UserMessage {
        kind,
        message_id,
        sender,
        received_at,
        body,
        thread,
    })
}

fn fold_kind(message: &RawMessage) -> (MessageKind, MessageBody) {
    match message.message_type.as_str() {
        "text" => (
            MessageKind::Text,
            MessageBody::Text(message.text.clone().unwrap_or_default()),
        ),
        "image" => (
            MessageKind::Image,
            MessageBody::Image(message.image.clone().unwrap_or_default()),
        ),
        "document" => (
            MessageKind::Document,
            MessageBody::Document(message.document.clone().unwrap_or_default()),
        ),
        "button" => (
            MessageKind::Button,
            MessageBody::Button(message.button.clone().unwrap_or_default()),
        ),
        "interactive" => {
            let Some(interactive) = message.interactive.as_ref() else {
                return (
                    MessageKind::Interactive,
                    MessageBody::Other(serde_json::Value::Null),
                );
            };
            match interactive.interactive_type.as_str() {
                "list_reply" => (
                    MessageKind::RadioButton,
                    MessageBody::ListReply(interactive.list_reply.clone().unwrap_or_default()),
                ),
                "button_reply" => (
                    MessageKind::SimpleButton,
                    MessageBody::ButtonReply(interactive.button_reply.clone().unwrap_or_default()),
                ),
                _ => (
                    MessageKind::Interactive,
                    MessageBody::Other(serde_json::to_value(interactive).unwrap_or_default()),
                ),
            }
        }
        "unsupported" => (
            MessageKind::UnknownMessage,
            MessageBody::Unsupported {
                errors: message.errors.clone(),
            },
        ),
        other => (
            MessageKind::Other(other.to_string()),
            MessageBody::Other(message.extra.get(other).cloned().unwrap_or_default()),
        ),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let seconds = raw?.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(seconds, 0)
}
