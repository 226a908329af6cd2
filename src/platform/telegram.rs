use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::platform::IncomingMessage;
use crate::relay::{Inbound, Relay};

/// Telegram rejects messages longer than 4096 characters.
const MAX_CHUNK_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Ask Telegram who we are so `/start@OtherBot` in groups is left alone.
async fn identify(bot: &Bot, relay: Relay) -> Result<Relay> {
    let me = bot
        .get_me()
        .await
        .context("Failed to fetch bot identity from Telegram")?;

    match me.user.username.clone() {
        Some(username) => {
            info!("Logged in as @{}", username);
            Ok(relay.with_bot_username(username))
        }
        None => {
            warn!("Bot account has no username; addressed commands will be ignored");
            Ok(relay)
        }
    }
}

/// Run the Telegram platform until Ctrl-C
pub async fn run(bot: Bot, relay: Relay) -> Result<()> {
    info!("Starting Telegram platform...");

    let relay = Arc::new(identify(&bot, relay).await?);

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    let incoming = IncomingMessage {
        platform: "telegram",
        chat_id: msg.chat.id.0.to_string(),
        user_id: msg
            .from
            .as_ref()
            .map(|user| user.id.0.to_string())
            .unwrap_or_default(),
        user_name: msg
            .from
            .as_ref()
            .map(|user| user.first_name.clone())
            .unwrap_or_default(),
        text: msg.text().map(str::to_string),
    };

    // Only plain text goes to Gemini, so only plain text gets the indicator.
    if let Some(Inbound::Text(_)) = incoming.text.as_deref().map(|t| relay.classify(t)) {
        bot.send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
            .await
            .ok();
    }

    let Some(reply) = relay.handle(&incoming).await else {
        return Ok(());
    };

    for chunk in split_message(&reply, MAX_CHUNK_LEN) {
        bot.send_message(msg.chat.id, chunk).await?;
    }

    Ok(())
}
