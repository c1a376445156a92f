//! Concordia Chat - terminal client for course chat bots
//!
//! A conversation state machine driving a streaming chat against the
//! course bot backend.

mod api;
mod config;
mod decoder;
mod history;
mod runtime;
mod state_machine;
mod tui;
mod view;

use api::CourseBotClient;
use config::ChatConfig;
use runtime::{ChatRegistry, MountConfig, MountId, RuntimeSettings};
use state_machine::BotInfo;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tui::TerminalViewport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ChatConfig::from_env()?;

    // Log to a file; the terminal belongs to the UI
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concordia_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();

    tracing::info!(
        base_url = %config.base_url,
        bot_id = %config.bot_id,
        decode_mode = ?config.decode_mode,
        "Starting chat"
    );

    let client = CourseBotClient::new(
        &config.base_url,
        config.session_id.clone(),
        config.request_timeout,
    )?;
    let registry = ChatRegistry::new(
        client,
        RuntimeSettings {
            decode_mode: config.decode_mode,
            scroll_poll_interval: config.scroll_poll_interval,
        },
    );

    let viewport = Arc::new(TerminalViewport::new());
    let handle = registry
        .mount(
            MountConfig {
                mount_id: MountId::new("main"),
                bot: BotInfo::new(config.bot_id, &config.bot_name),
                csrf_token: config.csrf_token.clone(),
            },
            viewport.clone(),
        )
        .await;

    let result = tui::run(handle, viewport).await;

    registry.shutdown().await;
    tracing::info!("Chat closed");

    result?;
    Ok(())
}
