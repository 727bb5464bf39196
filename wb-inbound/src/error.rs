use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid webhook payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid handler configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("dispatch failed: {0:#}")]
    Dispatch(anyhow::Error),
}

/// Rejections raised while normalizing a webhook envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload is required")]
    MissingPayload,

    #[error("payload is not an envelope: {0}")]
    MalformedEnvelope(String),

    #[error("payload has no entry; check the \"entry\" property")]
    MissingEntry,

    #[error("business account {actual:?} does not match the configured account {expected:?}")]
    TenantMismatch { expected: String, actual: String },

    #[error("unexpected object {0:?}; check the \"object\" property")]
    UnexpectedObject(String),

    #[error("entry has no changes; check the \"changes\" property")]
    MissingChanges,
}

/// Registration mistakes. These surface while the router is being built,
/// never while it is serving traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{kind} handler for {identity:?} already exists")]
    DuplicateHandler {
        kind: String,
        identity: Option<String>,
    },

    #[error("{kind} handler identity must not be empty")]
    EmptyIdentity { kind: String },

    #[error("default handler is required")]
    MissingDefault,

    #[error("error handler is required")]
    MissingErrorHandler,
}
