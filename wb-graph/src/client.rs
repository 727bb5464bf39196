use crate::error::{GraphError, Result};
use crate::media::lookup_media;
use crate::transport::{ApiRequest, HttpTransport, MediaUpload, RequestBody, Transport};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

const ALREADY_READ_MARKER: &str = "last-seen message in this conversation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMessage {
    pub body: String,
    pub preview_url: bool,
}

impl TextMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            preview_url: false,
        }
    }
}

/// Document or sticker reference: either an uploaded media `id` or a public
/// `link`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
    pub wa_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadReceipt {
    Marked,
    /// No message id to mark.
    Skipped,
    /// The provider refused because a later message was already read.
    AlreadyRead { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedMedia {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaUrl {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    contacts: Vec<SendContact>,
    #[serde(default)]
    messages: Vec<SendMessageId>,
}

#[derive(Deserialize)]
struct SendContact {
    #[serde(default)]
    wa_id: Option<String>,
}

#[derive(Deserialize)]
struct SendMessageId {
    id: String,
}

/// Builds the common envelope of every outbound message.
pub fn message_body(to: &str, message_type: &str, content: Value) -> Value {
    let mut body = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": message_type,
    });
    body[message_type] = content;
    body
}

#[derive(Clone)]
pub struct WhatsAppClient {
    transport: Arc<dyn Transport>,
    phone_number_id: String,
    business_account_id: String,
}

impl std::fmt::Debug for WhatsAppClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppClient")
            .field("phone_number_id", &self.phone_number_id)
            .field("business_account_id", &self.business_account_id)
            .finish_non_exhaustive()
    }
}

impl WhatsAppClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        phone_number_id: &str,
        business_account_id: &str,
    ) -> Result<Self> {
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(GraphError::InvalidInput(
                "whatsapp phone number id is required".to_string(),
            ));
        }
        let business_account_id = business_account_id.trim();
        if business_account_id.is_empty() {
            return Err(GraphError::InvalidInput(
                "whatsapp business account id is required".to_string(),
            ));
        }
        Ok(Self {
            transport,
            phone_number_id: phone_number_id.to_string(),
            business_account_id: business_account_id.to_string(),
        })
    }

    /// Client backed by the reqwest transport.
    pub fn http(
        base_url: &str,
        api_version: &str,
        access_token: &str,
        phone_number_id: &str,
        business_account_id: &str,
    ) -> Result<Self> {
        let transport = HttpTransport::new(base_url, api_version, access_token)?;
        Self::new(Arc::new(transport), phone_number_id, business_account_id)
    }

    pub fn phone_number_id(&self) -> &str {
        &self.phone_number_id
    }

    pub fn business_account_id(&self) -> &str {
        &self.business_account_id
    }

    pub(crate) async fn call(
        &self,
        method: Method,
        path: &str,
        request: ApiRequest,
    ) -> Result<Value> {
        self.transport.request(method, path, request).await
    }

    fn messages_path(&self) -> String {
        format!("/{}/messages", self.phone_number_id)
    }

    async fn send(&self, to: &str, message_type: &str, content: Value) -> Result<SentMessage> {
        let to = to.trim();
        if to.is_empty() {
            return Err(GraphError::InvalidInput(
                "recipient (E.164 phone number) is required".to_string(),
            ));
        }
        let body = message_body(to, message_type, content);
        let response = self
            .call(Method::POST, &self.messages_path(), ApiRequest::json(body))
            .await?;
        let parsed: SendResponse = serde_json::from_value(response)?;
        let id = parsed
            .messages
            .into_iter()
            .next()
            .map(|message| message.id)
            .ok_or_else(|| GraphError::ResponseFormat("send response has no message id".into()))?;
        tracing::debug!(message_id = %id, message_type, "whatsapp message sent");
        Ok(SentMessage {
            id,
            wa_id: parsed.contacts.into_iter().find_map(|contact| contact.wa_id),
        })
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn send_text(&self, to: &str, message: TextMessage) -> Result<SentMessage> {
        if message.body.trim().is_empty() {
            return Err(GraphError::InvalidInput("message body is empty".to_string()));
        }
        self.send(to, "text", serde_json::to_value(&message)?).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(sticker = sticker))]
    pub async fn send_document(
        &self,
        to: &str,
        message: MediaMessage,
        sticker: bool,
    ) -> Result<SentMessage> {
        if message.id.is_none() && message.link.is_none() {
            return Err(GraphError::InvalidInput(
                "media message needs an id or a link".to_string(),
            ));
        }
        let message_type = if sticker { "sticker" } else { "document" };
        self.send(to, message_type, serde_json::to_value(&message)?)
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, components))]
    pub async fn send_template(
        &self,
        to: &str,
        name: &str,
        language_code: &str,
        components: Option<Value>,
    ) -> Result<SentMessage> {
        let mut content = json!({
            "name": name,
            "language": { "code": language_code },
        });
        if let Some(components) = components {
            content["components"] = components;
        }
        self.send(to, "template", content).await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn send_interactive(&self, to: &str, interactive: Value) -> Result<SentMessage> {
        self.send(to, "interactive", interactive).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mark_as_read(&self, message_id: &str) -> Result<ReadReceipt> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Ok(ReadReceipt::Skipped);
        }
        let body = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        });
        match self
            .call(Method::POST, &self.messages_path(), ApiRequest::json(body))
            .await
        {
            Ok(_) => Ok(ReadReceipt::Marked),
            Err(GraphError::Api { body, .. }) if body.contains(ALREADY_READ_MARKER) => {
                Ok(ReadReceipt::AlreadyRead {
                    details: error_details(&body).unwrap_or(body),
                })
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn upload_media(
        &self,
        path: impl AsRef<Path>,
        webp_animated: bool,
    ) -> Result<UploadedMedia> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "uploading media");
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| GraphError::UnsupportedMedia(path.display().to_string()))?;
        let media = lookup_media(extension)?;
        let size = tokio::fs::metadata(path).await?.len();
        media.check_size(size, webp_animated)?;

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(media.extension)
            .to_string();
        let request = ApiRequest {
            query: Vec::new(),
            body: RequestBody::Multipart(MediaUpload {
                file_name,
                mime_type: media.mime_type.to_string(),
                bytes,
            }),
        };
        let response = self
            .call(
                Method::POST,
                &format!("/{}/media", self.phone_number_id),
                request,
            )
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn fetch_media_url(&self, media_id: &str) -> Result<MediaUrl> {
        let media_id = media_id.trim();
        if media_id.is_empty() {
            return Err(GraphError::InvalidInput("media id is required".to_string()));
        }
        let response = self
            .call(Method::GET, &format!("/{media_id}"), ApiRequest::default())
            .await?;
        Ok(serde_json::from_value(response)?)
    }
}

fn error_details(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/error_data/details")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, api_error};
    use std::io::Write;

    fn client(transport: &Arc<RecordingTransport>) -> WhatsAppClient {
        WhatsAppClient::new(transport.clone(), "1234", "waba-1").expect("client")
    }

    fn sent(id: &str) -> Result<Value> {
        Ok(json!({
            "messaging_product": "whatsapp",
            "contacts": [{ "input": "15551234567", "wa_id": "15551234567" }],
            "messages": [{ "id": id }]
        }))
    }

    #[test]
    fn message_body_nests_content_under_type() {
        let body = message_body("15551234567", "text", json!({ "body": "hi" }));
        assert_eq!(
            body,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "15551234567",
                "type": "text",
                "text": { "body": "hi" }
            })
        );
    }

    #[test]
    fn new_requires_ids() {
        let transport = Arc::new(RecordingTransport::default());
        assert!(WhatsAppClient::new(transport.clone(), " ", "waba").is_err());
        assert!(WhatsAppClient::new(transport, "1234", "").is_err());
    }

    #[tokio::test]
    async fn send_text_posts_to_messages_endpoint() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(sent("wamid.out"));
        let sent = client(&transport)
            .send_text(" 15551234567 ", TextMessage::new("hello"))
            .await
            .expect("sent");
        assert_eq!(sent.id, "wamid.out");
        assert_eq!(sent.wa_id.as_deref(), Some("15551234567"));

        let call = transport.last();
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.path, "/1234/messages");
        assert_eq!(
            call.request.body,
            RequestBody::Json(json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "15551234567",
                "type": "text",
                "text": { "body": "hello", "preview_url": false }
            }))
        );
    }

    #[tokio::test]
    async fn send_text_rejects_empty_recipient_and_body() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&transport);
        assert!(matches!(
            client.send_text("", TextMessage::new("hi")).await,
            Err(GraphError::InvalidInput(_))
        ));
        assert!(matches!(
            client.send_text("1555", TextMessage::new("  ")).await,
            Err(GraphError::InvalidInput(_))
        ));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn send_document_as_sticker_changes_type() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(sent("wamid.sticker"));
        let message = MediaMessage {
            id: Some("media-9".into()),
            ..MediaMessage::default()
        };
        client(&transport)
            .send_document("1555", message, true)
            .await
            .expect("sent");
        let RequestBody::Json(body) = transport.last().request.body else {
            panic!("expected json body");
        };
        assert_eq!(body["type"], "sticker");
        assert_eq!(body["sticker"], json!({ "id": "media-9" }));
    }

    #[tokio::test]
    async fn send_template_includes_language_and_components() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(sent("wamid.tpl"));
        let components = json!([{
            "type": "body",
            "parameters": [{ "type": "text", "text": "Ada" }]
        }]);
        client(&transport)
            .send_template("1555", "order_update", "en_US", Some(components.clone()))
            .await
            .expect("sent");
        let RequestBody::Json(body) = transport.last().request.body else {
            panic!("expected json body");
        };
        assert_eq!(body["type"], "template");
        assert_eq!(body["template"]["name"], "order_update");
        assert_eq!(body["template"]["language"]["code"], "en_US");
        assert_eq!(body["template"]["components"], components);
    }

    #[tokio::test]
    async fn send_without_message_id_is_a_format_error() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(Ok(json!({ "messages": [] })));
        let result = client(&transport)
            .send_interactive("1555", json!({ "type": "button" }))
            .await;
        assert!(matches!(result, Err(GraphError::ResponseFormat(_))));
    }

    #[tokio::test]
    async fn mark_as_read_skips_empty_ids() {
        let transport = Arc::new(RecordingTransport::default());
        let receipt = client(&transport).mark_as_read("").await.expect("receipt");
        assert_eq!(receipt, ReadReceipt::Skipped);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn mark_as_read_posts_read_status() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(Ok(json!({ "success": true })));
        let receipt = client(&transport)
            .mark_as_read("wamid.in")
            .await
            .expect("receipt");
        assert_eq!(receipt, ReadReceipt::Marked);
        assert_eq!(
            transport.last().request.body,
            RequestBody::Json(json!({
                "messaging_product": "whatsapp",
                "status": "read",
                "message_id": "wamid.in"
            }))
        );
    }

    #[tokio::test]
    async fn mark_as_read_tolerates_already_read_conversations() {
        let transport = Arc::new(RecordingTransport::default());
        let details = "Message is older than the last-seen message in this conversation";
        transport.respond(Err(api_error(
            400,
            json!({ "error": { "code": 100, "error_data": { "details": details } } }),
        )));
        let receipt = client(&transport)
            .mark_as_read("wamid.old")
            .await
            .expect("receipt");
        assert_eq!(
            receipt,
            ReadReceipt::AlreadyRead {
                details: details.to_string()
            }
        );
    }

    #[tokio::test]
    async fn mark_as_read_propagates_other_errors() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(Err(api_error(401, json!({ "error": { "code": 190 } }))));
        let result = client(&transport).mark_as_read("wamid.in").await;
        assert!(matches!(result, Err(GraphError::Api { status: 401, .. })));
    }

    #[tokio::test]
    async fn upload_media_sends_multipart_with_mime_type() {
        let mut file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .expect("tempfile");
        file.write_all(b"\x89PNG fake").expect("write");

        let transport = Arc::new(RecordingTransport::default());
        transport.respond(Ok(json!({ "id": "media-42" })));
        let uploaded = client(&transport)
            .upload_media(file.path(), false)
            .await
            .expect("uploaded");
        assert_eq!(uploaded.id, "media-42");

        let call = transport.last();
        assert_eq!(call.path, "/1234/media");
        let RequestBody::Multipart(upload) = call.request.body else {
            panic!("expected multipart body");
        };
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(upload.bytes, b"\x89PNG fake".to_vec());
        assert!(upload.file_name.ends_with(".png"));
    }

    #[tokio::test]
    async fn upload_media_rejects_oversized_still_webp() {
        let mut file = tempfile::Builder::new()
            .suffix(".webp")
            .tempfile()
            .expect("tempfile");
        file.write_all(&vec![0u8; 150 * 1024]).expect("write");

        let transport = Arc::new(RecordingTransport::default());
        let client = client(&transport);
        assert!(matches!(
            client.upload_media(file.path(), false).await,
            Err(GraphError::MediaTooLarge { .. })
        ));
        assert!(transport.calls().is_empty());

        transport.respond(Ok(json!({ "id": "sticker-1" })));
        let uploaded = client
            .upload_media(file.path(), true)
            .await
            .expect("animated webp fits");
        assert_eq!(uploaded.id, "sticker-1");
    }

    #[tokio::test]
    async fn upload_media_rejects_unknown_extension() {
        let file = tempfile::Builder::new()
            .suffix(".exe")
            .tempfile()
            .expect("tempfile");
        let transport = Arc::new(RecordingTransport::default());
        assert!(matches!(
            client(&transport).upload_media(file.path(), false).await,
            Err(GraphError::UnsupportedMedia(_))
        ));
    }

    #[tokio::test]
    async fn fetch_media_url_reads_media_object() {
        let transport = Arc::new(RecordingTransport::default());
        transport.respond(Ok(json!({
            "messaging_product": "whatsapp",
            "id": "media-1",
            "url": "https://lookaside.example/media-1",
            "mime_type": "image/jpeg",
            "file_size": 2048
        })));
        let media = client(&transport)
            .fetch_media_url("media-1")
            .await
            .expect("media url");
        assert_eq!(media.url, "https://lookaside.example/media-1");
        assert_eq!(media.file_size, Some(2048));
        let call = transport.last();
        assert_eq!(call.method, Method::GET);
        assert_eq!(call.path, "/media-1");
    }
}
