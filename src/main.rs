//! Channel relay CLI entry point.
//!
//! Provides `start` for running the relay and `check` for validating a
//! configuration without connecting to anything.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tokio::sync::mpsc;
use tracing::{info, warn};

use channel_relay::config::{self, Config};
use channel_relay::logging;
use channel_relay::providers::openai::OpenAiRuleEvaluator;
use channel_relay::routing::album::AlbumAggregator;
use channel_relay::routing::filter::FilterPipeline;
use channel_relay::routing::pipeline::ForwardingPipeline;
use channel_relay::service::Service;
use channel_relay::telegram::{self, ChannelFilter, TelegramFeed};
use channel_relay::whatsapp::WhatsAppClient;

/// Capacity of the feed-to-service channel.
const INBOUND_BUFFER: usize = 256;

/// Channel relay: Telegram channels to WhatsApp.
#[derive(Parser)]
#[command(name = "channel-relay", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the relay until Ctrl+C.
    Start {
        /// Config file (default: $CHANNEL_RELAY_CONFIG or ~/.channel-relay/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for rotated JSON logs (default: ~/.channel-relay/logs).
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Validate the config and print a summary.
    Check {
        /// Config file (default: $CHANNEL_RELAY_CONFIG or ~/.channel-relay/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config, logs_dir } => handle_start(config.as_deref(), logs_dir).await,
        Command::Check { config } => handle_check(config.as_deref()),
    }
}

/// Load `.env`, resolve the config path, load and validate.
fn load_validated(explicit: Option<&Path>) -> anyhow::Result<(PathBuf, Config)> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env file");
        }
    }
    let path = config::resolve_config_path(explicit)?;
    let config = config::load_config(&path)?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok((path, config))
}

/// Run the relay.
async fn handle_start(explicit: Option<&Path>, logs_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let logs_dir = match logs_dir {
        Some(dir) => dir,
        None => logging::default_logs_dir()?,
    };
    let _logging_guard = logging::init_production(&logs_dir)?;

    let (path, config) = load_validated(explicit)?;
    info!(config = %path.display(), "configuration loaded");

    let bot_token = config::secret_from_env(&config.telegram.bot_token_env)?;
    let whatsapp_token = config::secret_from_env(&config.whatsapp.token_env)?;

    let bot = Bot::new(bot_token);
    let feed = TelegramFeed::new(bot.clone(), config.forwarding.link_base_url.clone());
    let sink = WhatsAppClient::new(
        &config.whatsapp.api_base,
        &config.whatsapp.phone_number_id,
        config.whatsapp.recipient.clone(),
        whatsapp_token,
        config.whatsapp.request_timeout(),
    );

    let filter = build_filter(&config)?;
    let (aggregator, albums) = AlbumAggregator::with_tokio(config.forwarding.album_debounce());
    let pipeline = ForwardingPipeline::new(Arc::new(feed), Arc::new(sink), aggregator)
        .with_filter(filter)
        .with_limits(config.forwarding.limits())
        .with_supported_mimes(config.forwarding.supported_mimes());

    let channels = ChannelFilter::parse(&config.telegram.channels);
    info!(
        channels = channels.len(),
        recipient = %config.whatsapp.recipient,
        filtering = config.filtering_enabled(),
        "relay starting"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let listener = telegram::spawn_listener(bot, channels, inbound_tx);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    let stats = Service::new(pipeline, albums)
        .with_shutdown_timeout(config.forwarding.shutdown_timeout())
        .run(inbound_rx, shutdown)
        .await;

    listener.stop().await;
    info!(
        completed = stats.completed,
        failed = stats.failed,
        abandoned = stats.abandoned,
        "channel relay stopped"
    );
    Ok(())
}

/// Build the filter pipeline when both rules and an LLM backend exist.
fn build_filter(config: &Config) -> anyhow::Result<Option<FilterPipeline>> {
    let Some(llm) = config.llm.as_ref() else {
        return Ok(None);
    };
    if config.filters.is_empty() {
        return Ok(None);
    }
    let api_key = config::secret_from_env(&llm.api_key_env)?;
    let evaluator = OpenAiRuleEvaluator::new(&llm.base_url, api_key, llm.model.clone());
    info!(
        endpoint = evaluator.endpoint(),
        model = %llm.model,
        rules = config.filters.len(),
        "content filtering enabled"
    );
    Ok(Some(FilterPipeline::new(
        config.filters.clone(),
        Arc::new(evaluator),
    )))
}

/// Validate the config and print a summary.
fn handle_check(explicit: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli();
    let (path, config) = load_validated(explicit)?;

    println!("Config: {}", path.display());
    println!("Channels: {}", config.telegram.channels.join(", "));
    println!("Recipient: {}", config.whatsapp.recipient);
    println!(
        "Limits: text {} chars, caption {} chars, album debounce {} ms",
        config.forwarding.max_text_len,
        config.forwarding.max_caption_len,
        config.forwarding.album_debounce_ms
    );
    if config.filters.is_empty() {
        println!("Filters: none");
    } else {
        let names: Vec<&str> = config.filters.iter().map(|r| r.name.as_str()).collect();
        println!("Filters: {}", names.join(", "));
    }
    println!(
        "Filtering: {}",
        if config.filtering_enabled() {
            "active"
        } else {
            "inactive"
        }
    );
    println!("OK");
    Ok(())
}
