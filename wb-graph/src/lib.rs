//! Outbound side of the WhatsApp bot: a thin client over the Graph API.
//!
//! Every call goes through a [`Transport`]; [`HttpTransport`] is the reqwest
//! implementation.

mod client;
mod error;
mod media;
mod templates;
#[cfg(test)]
mod testing;
mod transport;

pub use client::{
    MediaMessage, MediaUrl, ReadReceipt, SentMessage, TextMessage, UploadedMedia, WhatsAppClient,
    message_body,
};
pub use error::{GraphError, Result};
pub use media::{SizeLimit, SupportedMedia, lookup_media};
pub use templates::{
    ButtonType, Category, ComponentExample, ComponentType, DEFAULT_TEMPLATE_PAGE_SIZE,
    HeaderFormat, Paging, PagingDirection, SuccessResponse, Template, TemplateButton,
    TemplateComponent, TemplateCreated, TemplateCursors, TemplateEdit, TemplateFilter,
    TemplatePage, TemplatePaging, TemplateStatus, validate_components, validate_template,
    validate_template_name,
};
pub use transport::{ApiRequest, HttpTransport, MediaUpload, RequestBody, Transport};

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v16.0";
