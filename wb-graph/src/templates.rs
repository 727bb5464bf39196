//! Message template management for a WhatsApp Business Account.
//!
//! Templates are validated locally before any request is made.

use crate::client::WhatsAppClient;
use crate::error::{GraphError, Result};
use crate::transport::ApiRequest;
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPLATE_PAGE_SIZE: u32 = 25;

const MAX_NAME_CHARS: usize = 512;
const MAX_HEADER_CHARS: usize = 60;
const MAX_BODY_CHARS: usize = 1024;
const MAX_FOOTER_CHARS: usize = 60;
const MAX_BUTTONS: usize = 10;
const MAX_BUTTON_TEXT_CHARS: usize = 25;
const MAX_PHONE_NUMBER_CHARS: usize = 20;

const NAME_PATTERN: &str = r"^[a-z_]+$";
const TEXT_PLACEHOLDER: &str = r"\{\{[A-Za-z0-9_]+\}\}";
const URL_PLACEHOLDER: &str = r"\{\{\d+\}\}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Authentication,
    Marketing,
    Utility,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION",
            Self::Marketing => "MARKETING",
            Self::Utility => "UTILITY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    Approved,
    InAppeal,
    Pending,
    Rejected,
    PendingDeletion,
    Deleted,
    Disabled,
    Paused,
    LimitExceeded,
    #[serde(other)]
    Unknown,
}

impl TemplateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::InAppeal => "IN_APPEAL",
            Self::Pending => "PENDING",
            Self::Rejected => "REJECTED",
            Self::PendingDeletion => "PENDING_DELETION",
            Self::Deleted => "DELETED",
            Self::Disabled => "DISABLED",
            Self::Paused => "PAUSED",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentType {
    Header,
    Body,
    Footer,
    Buttons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderFormat {
    Text,
    Image,
    Video,
    Document,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ButtonType {
    PhoneNumber,
    Url,
    QuickReply,
    CopyCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateButton {
    #[serde(rename = "type")]
    pub button_type: ButtonType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Sample values for the variables in `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentExample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_text: Option<Vec<String>>,
    /// Asset handles from the resumable upload API, for media headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_handle: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<HeaderFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<TemplateButton>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<ComponentExample>,
}

impl TemplateComponent {
    pub fn text(component_type: ComponentType, text: impl Into<String>) -> Self {
        Self {
            component_type,
            format: (component_type == ComponentType::Header).then_some(HeaderFormat::Text),
            text: Some(text.into()),
            buttons: Vec::new(),
            example: None,
        }
    }

    pub fn buttons(buttons: Vec<TemplateButton>) -> Self {
        Self {
            component_type: ComponentType::Buttons,
            format: None,
            text: None,
            buttons,
            example: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_category_change: Option<bool>,
    pub language: String,
    #[serde(default)]
    pub components: Vec<TemplateComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TemplateStatus>,
}

/// Fields an existing template may change. The name is fixed once created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<TemplateComponent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFilter {
    pub name: Option<String>,
    pub language: Option<String>,
    pub category: Option<Category>,
    pub status: Option<TemplateStatus>,
    pub rejected_reason: Option<String>,
    pub name_or_content: Option<String>,
    pub content: Option<String>,
}

impl TemplateFilter {
    fn query_pairs(&self) -> Vec<(String, String)> {
        let fields: [(&str, Option<&str>); 7] = [
            ("name", self.name.as_deref()),
            ("language", self.language.as_deref()),
            ("category", self.category.map(Category::as_str)),
            ("status", self.status.map(TemplateStatus::as_str)),
            ("rejected_reason", self.rejected_reason.as_deref()),
            ("name_or_content", self.name_or_content.as_deref()),
            ("content", self.content.as_deref()),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key.to_string(), value.to_string())))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingDirection {
    Before,
    After,
}

impl PagingDirection {
    fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
    pub direction: PagingDirection,
    pub cursor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateCursors {
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplatePaging {
    #[serde(default)]
    pub cursors: TemplateCursors,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplatePage {
    #[serde(default)]
    pub data: Vec<Template>,
    #[serde(default)]
    pub paging: Option<TemplatePaging>,
}

impl TemplatePage {
    /// Cursor for the next page, if the API announced one.
    pub fn next_page(&self) -> Option<Paging> {
        let paging = self.paging.as_ref()?;
        paging.next.as_ref()?;
        paging.cursors.after.clone().map(|cursor| Paging {
            direction: PagingDirection::After,
            cursor,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateCreated {
    pub id: String,
    #[serde(default)]
    pub status: Option<TemplateStatus>,
    #[serde(default)]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

fn placeholders<'a>(pattern: &str, text: &'a str) -> Result<Vec<&'a str>> {
    let regex = Regex::new(pattern)
        .map_err(|e| GraphError::Template(format!("invalid placeholder pattern: {e}")))?;
    Ok(regex.find_iter(text).map(|m| m.as_str()).collect())
}

fn check_length(what: &str, text: &str, max: usize) -> Result<()> {
    if text.chars().count() > max {
        return Err(GraphError::Template(format!(
            "{what} cannot exceed {max} characters"
        )));
    }
    Ok(())
}

fn check_example_count(what: &str, expected: usize, example: Option<usize>) -> Result<()> {
    match example {
        Some(given) if expected > 0 && given != expected => Err(GraphError::Template(format!(
            "{what} example must supply {expected} values, got {given}"
        ))),
        _ => Ok(()),
    }
}

pub fn validate_template_name(name: &str) -> Result<()> {
    check_length("template name", name, MAX_NAME_CHARS)?;
    let regex = Regex::new(NAME_PATTERN)
        .map_err(|e| GraphError::Template(format!("invalid name pattern: {e}")))?;
    if !regex.is_match(name) {
        return Err(GraphError::Template(
            "template name may only contain lowercase letters and underscores".to_string(),
        ));
    }
    Ok(())
}

fn validate_button(button: &TemplateButton) -> Result<()> {
    check_length("button text", &button.text, MAX_BUTTON_TEXT_CHARS)?;
    match button.button_type {
        ButtonType::PhoneNumber => {
            let number = button.phone_number.as_deref().ok_or_else(|| {
                GraphError::Template("PHONE_NUMBER button requires phone_number".to_string())
            })?;
            check_length("button phone number", number, MAX_PHONE_NUMBER_CHARS)
        }
        ButtonType::Url => {
            let url = button
                .url
                .as_deref()
                .ok_or_else(|| GraphError::Template("URL button requires url".to_string()))?;
            let variables = placeholders(URL_PLACEHOLDER, url)?;
            match variables.as_slice() {
                [] => {}
                [variable] if url.trim_end().ends_with(variable) => {}
                [_] => {
                    return Err(GraphError::Template(
                        "URL button variable must be appended to the end of the URL".to_string(),
                    ));
                }
                _ => {
                    return Err(GraphError::Template(
                        "URL button supports only 1 variable".to_string(),
                    ));
                }
            }
            check_example_count(
                "URL button",
                variables.len(),
                button.example.as_ref().map(Vec::len),
            )
        }
        ButtonType::QuickReply | ButtonType::CopyCode => Ok(()),
    }
}

pub fn validate_components(components: &[TemplateComponent]) -> Result<()> {
    for component in components {
        let text = component.text.as_deref().unwrap_or_default();
        let example = component.example.as_ref();
        match component.component_type {
            ComponentType::Header => {
                check_length("header text", text, MAX_HEADER_CHARS)?;
                let given = example
                    .and_then(|example| example.header_text.as_ref())
                    .map(Vec::len);
                check_example_count("header", placeholders(TEXT_PLACEHOLDER, text)?.len(), given)?;
            }
            ComponentType::Body => {
                check_length("body text", text, MAX_BODY_CHARS)?;
                let given = example
                    .and_then(|example| example.body_text.as_ref())
                    .and_then(|rows| rows.first())
                    .map(Vec::len);
                check_example_count("body", placeholders(TEXT_PLACEHOLDER, text)?.len(), given)?;
            }
            ComponentType::Footer => check_length("footer text", text, MAX_FOOTER_CHARS)?,
            ComponentType::Buttons => {
                if component.buttons.len() > MAX_BUTTONS {
                    return Err(GraphError::Template(format!(
                        "a template cannot have more than {MAX_BUTTONS} buttons"
                    )));
                }
                for button in &component.buttons {
                    validate_button(button)?;
                }
            }
        }
    }
    Ok(())
}

/// Checks a template before it is sent. `name` is only given on creation.
pub fn validate_template(components: &[TemplateComponent], name: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        validate_template_name(name)?;
    }
    validate_components(components)
}

impl WhatsAppClient {
    fn templates_path(&self) -> String {
        format!("/{}/message_templates", self.business_account_id())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(name = %template.name))]
    pub async fn create_template(&self, template: &Template) -> Result<TemplateCreated> {
        validate_template(&template.components, Some(&template.name))?;
        let response = self
            .call(
                Method::POST,
                &self.templates_path(),
                ApiRequest::json(serde_json::to_value(template)?),
            )
            .await?;
        let created: TemplateCreated = serde_json::from_value(response)?;
        tracing::info!(template_id = %created.id, "template created");
        Ok(created)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn fetch_templates(
        &self,
        filter: &TemplateFilter,
        page_size: Option<u32>,
        paging: Option<Paging>,
    ) -> Result<TemplatePage> {
        let mut query = filter.query_pairs();
        query.push((
            "limit".to_string(),
            page_size.unwrap_or(DEFAULT_TEMPLATE_PAGE_SIZE).to_string(),
        ));
        if let Some(paging) = paging {
            query.push((paging.direction.as_str().to_string(), paging.cursor));
        }
        let response = self
            .call(Method::GET, &self.templates_path(), ApiRequest::query(query))
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    #[tracing::instrument(level = "debug", skip(self, edit))]
    pub async fn edit_template(
        &self,
        template_id: &str,
        edit: &TemplateEdit,
    ) -> Result<SuccessResponse> {
        let template_id = template_id.trim();
        if template_id.is_empty() {
            return Err(GraphError::InvalidInput("template id is required".to_string()));
        }
        if let Some(components) = &edit.components {
            validate_template(components, None)?;
        }
        let response = self
            .call(
                Method::POST,
                &format!("/{template_id}"),
                ApiRequest::json(serde_json::to_value(edit)?),
            )
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_template(&self, template_id: &str, name: &str) -> Result<SuccessResponse> {
        let query = vec![
            ("hsm_id".to_string(), template_id.trim().to_string()),
            ("name".to_string(), name.trim().to_string()),
        ];
        let response = self
            .call(Method::DELETE, &self.templates_path(), ApiRequest::query(query))
            .await?;
        Ok(serde_json::from_value(response)?)
    }
}
