use crate::error::{GraphError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Url};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(MediaUpload),
}

/// A file to upload to `/{phone_number_id}/media`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiRequest {
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn query(query: Vec<(String, String)>) -> Self {
        Self {
            query,
            body: RequestBody::Empty,
        }
    }
}

/// Boundary between bot code and the Graph API.
///
/// `path` is relative to the versioned API root, e.g. `/{phone_number_id}/messages`.
/// Non-2xx responses are reported as [`GraphError::Api`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        request: ApiRequest,
    ) -> Result<serde_json::Value>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    api_root: Url,
    access_token: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_version: &str, access_token: &str) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(GraphError::InvalidInput(
                "whatsapp access token is required".to_string(),
            ));
        }
        let api_version = api_version.trim().trim_matches('/');
        if api_version.is_empty() {
            return Err(GraphError::InvalidInput(
                "graph api version is required".to_string(),
            ));
        }
        let api_root = Url::parse(&format!(
            "{}/{}/",
            base_url.trim().trim_end_matches('/'),
            api_version
        ))
        .map_err(|e| GraphError::InvalidInput(format!("invalid graph API URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            api_root,
            access_token: access_token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.api_root
            .join(path.trim_start_matches('/'))
            .map_err(|e| GraphError::InvalidInput(format!("invalid graph API path {path:?}: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(level = "debug", skip(self, request), fields(%method))]
    async fn request(
        &self,
        method: Method,
        path: &str,
        request: ApiRequest,
    ) -> Result<serde_json::Value> {
        let url = self.url(path)?;
        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(&self.access_token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(upload) => {
                let part = Part::bytes(upload.bytes)
                    .file_name(upload.file_name)
                    .mime_str(&upload.mime_type)?;
                let form = Form::new()
                    .text("messaging_product", "whatsapp")
                    .text("type", upload.mime_type)
                    .part("file", part);
                builder.multipart(form)
            }
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(%status, %body, "graph api request failed");
            return Err(GraphError::Api {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
