use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("graph api request failed: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("{mime_type} files cannot exceed {limit} bytes (got {size})")]
    MediaTooLarge {
        mime_type: String,
        limit: u64,
        size: u64,
    },

    #[error("invalid template: {0}")]
    Template(String),
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

impl From<std::io::Error> for GraphError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
