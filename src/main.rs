mod config;
mod liveness;
mod llm;
mod platform;
mod relay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ENV_GEMINI_MODEL};
use crate::liveness::LivenessServer;
use crate::llm::GeminiClient;
use crate::relay::{ErrorReplyPolicy, Relay};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gemini_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; an optional TOML file may sit under the environment
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    if let Some(path) = &config_path {
        info!("Loading configuration from: {}", path.display());
    }
    let config = Config::from_env(config_path.as_deref()).context("Invalid configuration")?;

    info!("Configuration loaded successfully");
    info!(
        "  Model: {} (set {} to change it)",
        config.gemini.model, ENV_GEMINI_MODEL
    );
    info!("  Gemini endpoint: {}", config.gemini.base_url);
    info!(
        "  Liveness port: {} (ephemeral fallback: {})",
        config.liveness.port, config.liveness.port_fallback
    );
    if config.relay.error_detail {
        warn!("Error details will be sent to chat users; do not use this in production");
    }

    let gemini = GeminiClient::new(config.gemini.clone())?;
    let relay = Relay::new(
        Arc::new(gemini),
        ErrorReplyPolicy::from_flag(config.relay.error_detail),
    );

    let liveness = LivenessServer::spawn(&config.liveness);

    // Run the Telegram bot
    info!("Bot is starting...");
    let bot = Bot::new(&config.telegram.bot_token);
    let result = platform::telegram::run(bot, relay).await;

    liveness.shutdown().await;
    result
}
