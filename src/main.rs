mod config;
mod context;
mod llm;
mod notify;
mod platform;
mod relay;
mod translator;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::context::ContextStore;
use crate::llm::LlmClient;
use crate::platform::discord::{self, DiscordPlatform};
use crate::relay::Relay;
use crate::translator::Translator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Model: {} ({})", config.llm.model, config.llm.provider);
    info!("  Endpoint: {}", config.llm.effective_base_url());
    info!(
        "  Context: {} entries, {:?} scope",
        config.context.capacity, config.context.scope
    );
    for channel in config.channels.entries() {
        info!("  Channel: {} => {}", channel.name, channel.language);
    }

    let backend = Arc::new(LlmClient::new(config.llm.clone()).context("Failed to build LLM client")?);
    let context = Arc::new(ContextStore::new(&config.context));
    let translator = Translator::new(backend, context, config.llm.system_prompt.clone());

    let platform = Arc::new(
        DiscordPlatform::connect(&config.discord.bot_token)
            .await
            .context("Failed to connect to Discord")?,
    );

    let relay = Arc::new(Relay::new(
        config.channels.clone(),
        translator,
        platform.clone(),
        config.relay.clone(),
    ));

    info!("Relay is starting...");
    tokio::select! {
        result = discord::run(platform, relay) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
