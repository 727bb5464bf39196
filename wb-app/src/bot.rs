//! Conversation flow served by `wabot`.
//!
//! "hi" opens a two-button menu; "products" answers with a plan list and the
//! chosen plan is confirmed. Template quick replies with the `STOP` payload
//! unsubscribe. Images and documents are acknowledged. Anything else gets
//! the configured default reply.

use crate::config::BotConfig;
use anyhow::anyhow;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use wb_graph::{TextMessage, WhatsAppClient};
use wb_inbound::{Handler, HandlerInput, Router};

pub const GREETINGS: [&str; 3] = ["hi", "hello", "menu"];
pub const PRODUCTS_BUTTON: &str = "products";
pub const SUPPORT_BUTTON: &str = "support";
pub const PLANS: [(&str, &str); 2] = [("plan_basic", "Basic"), ("plan_pro", "Pro")];
pub const STOP_PAYLOAD: &str = "STOP";

pub struct Bot {
    client: WhatsAppClient,
    replies: BotConfig,
}

impl Bot {
    pub fn new(client: WhatsAppClient, replies: BotConfig) -> Arc<Self> {
        Arc::new(Self { client, replies })
    }

    async fn reply(&self, input: &HandlerInput, text: &str) -> anyhow::Result<()> {
        let to = recipient(input)?;
        let sent = self.client.send_text(to, TextMessage::new(text)).await?;
        tracing::debug!(message_id = %sent.id, "reply sent");
        Ok(())
    }
}

fn recipient(input: &HandlerInput) -> anyhow::Result<&str> {
    input
        .sender
        .as_deref()
        .filter(|sender| !sender.is_empty())
        .ok_or_else(|| anyhow!("handler input has no sender"))
}

fn bind<F, Fut>(bot: &Arc<Bot>, handler: F) -> impl Handler + 'static
where
    F: Fn(Arc<Bot>, HandlerInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let bot = bot.clone();
    move |input: HandlerInput| handler(bot.clone(), input)
}

/// Registers the whole flow and freezes the registry.
pub fn build_router(bot: &Arc<Bot>) -> wb_inbound::Result<Router> {
    let mut builder = Router::builder();
    for greeting in GREETINGS {
        builder.text(greeting, bind(bot, greet))?;
    }
    builder
        .simple_button(PRODUCTS_BUTTON, bind(bot, show_plans))?
        .simple_button(SUPPORT_BUTTON, bind(bot, support))?;
    for (id, _) in PLANS {
        builder.radio_button(id, bind(bot, confirm_plan))?;
    }
    builder
        .button(STOP_PAYLOAD, bind(bot, unsubscribe))?
        .image(bind(bot, acknowledge_image))?
        .document(bind(bot, acknowledge_document))?
        .default_handler(bind(bot, fallback))?
        .error_handler(bind(bot, apologize))?;
    builder.finish()
}

async fn greet(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let to = recipient(&input)?;
    let menu = json!({
        "type": "button",
        "body": { "text": bot.replies.greeting },
        "action": {
            "buttons": [
                { "type": "reply", "reply": { "id": PRODUCTS_BUTTON, "title": "Products" } },
                { "type": "reply", "reply": { "id": SUPPORT_BUTTON, "title": "Talk to us" } }
            ]
        }
    });
    bot.client.send_interactive(to, menu).await?;
    Ok(())
}

async fn show_plans(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let to = recipient(&input)?;
    let rows: Vec<_> = PLANS
        .iter()
        .map(|(id, title)| json!({ "id": id, "title": title }))
        .collect();
    let list = json!({
        "type": "list",
        "body": { "text": "Pick a plan to learn more." },
        "action": {
            "button": "Plans",
            "sections": [{ "title": "Plans", "rows": rows }]
        }
    });
    bot.client.send_interactive(to, list).await?;
    Ok(())
}

async fn confirm_plan(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let title = input
        .message
        .as_ref()
        .and_then(|message| message.list_reply())
        .map(|reply| reply.title.clone())
        .ok_or_else(|| anyhow!("plan selection without a list reply"))?;
    bot.reply(&input, &format!("You picked the {title} plan. We'll be in touch!"))
        .await
}

async fn support(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    bot.reply(&input, "An agent will reach out to you shortly.").await
}

async fn unsubscribe(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    bot.reply(&input, "You have been unsubscribed.").await
}

async fn acknowledge_image(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let caption = input
        .message
        .as_ref()
        .and_then(|message| message.media())
        .and_then(|media| media.caption.as_deref())
        .filter(|caption| !caption.is_empty());
    let text = match caption {
        Some(caption) => format!("Thanks for the picture: \"{caption}\"."),
        None => "Thanks for the picture.".to_string(),
    };
    bot.reply(&input, &text).await
}

async fn acknowledge_document(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let media = input
        .message
        .as_ref()
        .and_then(|message| message.media())
        .cloned()
        .unwrap_or_default();
    if let Some(media_id) = media.id.as_deref() {
        let location = bot.client.fetch_media_url(media_id).await?;
        tracing::info!(
            media_id,
            mime_type = ?location.mime_type,
            file_size = ?location.file_size,
            "document received"
        );
    }
    let name = media.filename.as_deref().unwrap_or("your document");
    bot.reply(&input, &format!("We received {name}.")).await
}

async fn fallback(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let text = bot.replies.default_reply.clone();
    bot.reply(&input, &text).await
}

async fn apologize(bot: Arc<Bot>, input: HandlerInput) -> anyhow::Result<()> {
    let text = bot.replies.error_reply.clone();
    bot.reply(&input, &text).await
}
