use crate::error::{BotError, ConfigurationError, Result};
use crate::types::{CanonicalMessage, MessageKind, UserMessage};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a handler receives. `message` is only set for matched handlers; the
/// default and error handlers get the sender alone.
/// `sender` is `None` when the provider left the phone empty.
#[derive(Debug, Clone, Default)]
pub struct HandlerInput {
    pub sender: Option<String>,
    pub message: Option<UserMessage>,
}

impl HandlerInput {
    fn sender_only(sender: Option<String>) -> Self {
        Self {
            sender,
            message: None,
        }
    }

    fn with_message(message: &UserMessage) -> Self {
        Self {
            sender: known_sender(&message.sender.phone),
            message: Some(message.clone()),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, input: HandlerInput) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(HandlerInput) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, input: HandlerInput) -> anyhow::Result<()> {
        (self)(input).await
    }
}

enum Route {
    CatchAll(Arc<dyn Handler>),
    ByIdentity(HashMap<String, Arc<dyn Handler>>),
}

/// Which handler `Router::route` ended up invoking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Status notifications and degraded messages are never dispatched.
    Skipped,
    CatchAll(MessageKind),
    Identity { kind: MessageKind, identity: String },
    Default,
}

/// Collects handler registrations. [`RouterBuilder::finish`] consumes it, so
/// nothing can be registered once dispatch has started.
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<MessageKind, Route>,
    default: Option<Arc<dyn Handler>>,
    error: Option<Arc<dyn Handler>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle text messages whose body is exactly `body`.
    pub fn text(
        &mut self,
        body: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self> {
        self.register_identity(MessageKind::Text, body.into(), Arc::new(handler))
    }

    /// Handle quick-reply template buttons by payload.
    pub fn button(
        &mut self,
        payload: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self> {
        self.register_identity(MessageKind::Button, payload.into(), Arc::new(handler))
    }

    /// Handle interactive list replies by row id.
    pub fn radio_button(
        &mut self,
        id: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self> {
        self.register_identity(MessageKind::RadioButton, id.into(), Arc::new(handler))
    }

    /// Handle interactive reply buttons by button id.
    pub fn simple_button(
        &mut self,
        id: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self> {
        self.register_identity(MessageKind::SimpleButton, id.into(), Arc::new(handler))
    }

    pub fn image(&mut self, handler: impl Handler + 'static) -> Result<&mut Self> {
        self.register_catch_all(MessageKind::Image, Arc::new(handler))
    }

    pub fn document(&mut self, handler: impl Handler + 'static) -> Result<&mut Self> {
        self.register_catch_all(MessageKind::Document, Arc::new(handler))
    }

    /// Mandatory. Invoked when no registered handler matches.
    pub fn default_handler(&mut self, handler: impl Handler + 'static) -> Result<&mut Self> {
        if self.default.is_some() {
            return Err(duplicate("DEFAULT", None));
        }
        self.default = Some(Arc::new(handler));
        Ok(self)
    }

    /// Mandatory. Invoked when dispatch fails, before the failure is returned.
    pub fn error_handler(&mut self, handler: impl Handler + 'static) -> Result<&mut Self> {
        if self.error.is_some() {
            return Err(duplicate("ERROR", None));
        }
        self.error = Some(Arc::new(handler));
        Ok(self)
    }

    pub fn finish(self) -> Result<Router> {
        let default = self.default.ok_or(ConfigurationError::MissingDefault)?;
        let error = self.error.ok_or(ConfigurationError::MissingErrorHandler)?;
        Ok(Router {
            routes: self.routes,
            default,
            error,
        })
    }

    fn register_identity(
        &mut self,
        kind: MessageKind,
        identity: String,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self> {
        if identity.is_empty() {
            return Err(ConfigurationError::EmptyIdentity {
                kind: kind.to_string(),
            }
            .into());
        }
        let label = kind.to_string();
        let route = self
            .routes
            .entry(kind)
            .or_insert_with(|| Route::ByIdentity(HashMap::new()));
        let Route::ByIdentity(handlers) = route else {
            return Err(duplicate(&label, Some(identity)));
        };
        if handlers.contains_key(&identity) {
            return Err(duplicate(&label, Some(identity)));
        }
        handlers.insert(identity, handler);
        Ok(self)
    }

    fn register_catch_all(
        &mut self,
        kind: MessageKind,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self> {
        if self.routes.contains_key(&kind) {
            return Err(duplicate(kind.as_str(), None));
        }
        self.routes.insert(kind, Route::CatchAll(handler));
        Ok(self)
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("routes", &describe_routes(&self.routes))
            .field("default", &self.default.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

fn known_sender(phone: &str) -> Option<String> {
    Some(phone.to_string()).filter(|phone| !phone.is_empty())
}

fn duplicate(kind: &str, identity: Option<String>) -> BotError {
    ConfigurationError::DuplicateHandler {
        kind: kind.to_string(),
        identity,
    }
    .into()
}

/// Immutable dispatch table. Share it behind an `Arc`; routing needs `&self`
/// only, so concurrent deliveries never contend.
pub struct Router {
    routes: HashMap<MessageKind, Route>,
    default: Arc<dyn Handler>,
    error: Arc<dyn Handler>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Invoke exactly one handler for `message`.
    ///
    /// On failure the error handler is called with the sender and the
    /// original failure is returned as [`BotError::Dispatch`].
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(message_id = ?message.message_id(), sender = %message.sender().phone)
    )]
    pub async fn route(&self, message: &CanonicalMessage) -> Result<RouteOutcome> {
        match self.dispatch(message).await {
            Ok(outcome) => {
                tracing::debug!(?outcome, "message dispatched");
                Ok(outcome)
            }
            Err(error) => {
                tracing::warn!(
                    error = %format!("{error:#}"),
                    "dispatch failed; invoking error handler"
                );
                let input = HandlerInput::sender_only(known_sender(&message.sender().phone));
                if let Err(handler_error) = self.error.handle(input).await {
                    tracing::error!(
                        error = %format!("{handler_error:#}"),
                        "error handler failed"
                    );
                }
                Err(BotError::Dispatch(error))
            }
        }
    }

    async fn dispatch(&self, message: &CanonicalMessage) -> anyhow::Result<RouteOutcome> {
        let message = match message {
            CanonicalMessage::User(message) => message,
            CanonicalMessage::Status(status) => {
                tracing::debug!(status = %status.status, "status notification acknowledged");
                return Ok(RouteOutcome::Skipped);
            }
            CanonicalMessage::Degraded(degraded) => {
                tracing::warn!(
                    errors = ?degraded.errors,
                    "provider could not deliver message content"
                );
                return Ok(RouteOutcome::Skipped);
            }
        };

        if matches!(message.kind, MessageKind::Image | MessageKind::Document) {
            if let Some(Route::CatchAll(handler)) = self.routes.get(&message.kind) {
                handler
                    .handle(HandlerInput::with_message(message))
                    .await
                    .with_context(|| format!("{} handler failed", message.kind))?;
                return Ok(RouteOutcome::CatchAll(message.kind.clone()));
            }
        }

        if let Some(identity) = message.identity() {
            if let Some(Route::ByIdentity(handlers)) = self.routes.get(&message.kind) {
                if let Some(handler) = handlers.get(identity) {
                    handler
                        .handle(HandlerInput::with_message(message))
                        .await
                        .with_context(|| {
                            format!("{} handler for {identity:?} failed", message.kind)
                        })?;
                    return Ok(RouteOutcome::Identity {
                        kind: message.kind.clone(),
                        identity: identity.to_string(),
                    });
                }
            }
        }

        self.default
            .handle(HandlerInput::sender_only(known_sender(&message.sender.phone)))
            .await
            .context("default handler failed")?;
        Ok(RouteOutcome::Default)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &describe_routes(&self.routes))
            .finish_non_exhaustive()
    }
}

fn describe_routes(routes: &HashMap<MessageKind, Route>) -> Vec<String> {
    let mut described: Vec<String> = routes
        .iter()
        .map(|(kind, route)| match route {
            Route::CatchAll(_) => kind.to_string(),
            Route::ByIdentity(handlers) => format!("{kind}[{}]", handlers.len()),
        })
        .collect();
    described.sort();
    described
}
