mod album;
mod config;
mod dispatch;
mod platform;
mod publish;
mod relay;
mod shutdown;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::platform::telegram::{self, TelegramSource};
use crate::publish::{BalePublisher, EitaaPublisher};

/// How long in-flight dispatches may keep running after a stop request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,teleport=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let base_dir = executable_dir()?;

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| base_dir.join(DEFAULT_CONFIG_FILE));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let token = config.telegram_token()?.to_string();

    info!("Configuration loaded successfully");
    info!("  Admins: {:?}", config.admins);
    info!(
        "  Eitaa channel: {}",
        config
            .eitaa_channel_identifier
            .as_deref()
            .unwrap_or("<unset>")
    );
    info!(
        "  Bale channel: {}",
        config
            .bale_destination_channel_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<unset>".to_string())
    );
    if config.eitaa_api_token.is_none() {
        warn!("eitaaapitoken is not set; every Eitaa publish will fail");
    }
    if config.bale_bot_token.is_none() {
        warn!("balebottoken is not set; every Bale publish will fail");
    }

    let scratch_dir = config.scratch_dir_in(&base_dir);
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create scratch directory: {}",
                scratch_dir.display()
            )
        })?;
    info!("  Scratch directory: {}", scratch_dir.display());

    let bot = Bot::new(token);
    let me = bot
        .get_me()
        .await
        .context("Failed to reach Telegram with the configured bot token")?;
    info!("Start listening for @{}", me.username());

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let config = Arc::new(config);
    let dispatcher = Arc::new(dispatch::Dispatcher::new(
        Arc::clone(&config),
        Arc::new(TelegramSource::new(bot.clone())),
        Arc::new(EitaaPublisher::from_config(http.clone(), &config)),
        Arc::new(BalePublisher::from_config(http, &config)),
        scratch_dir,
    ));

    let tracker = TaskTracker::new();
    let stop = CancellationToken::new();
    let console = shutdown::spawn_console_reader(std::io::BufReader::new(std::io::stdin()));
    tokio::spawn(shutdown::wait_for_stop(stop.clone(), console));
    info!("Press Enter or Ctrl-C to stop the bot...");

    telegram::run(bot, dispatcher, tracker.clone(), stop).await?;

    tracker.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            "Abandoning {} in-flight dispatch(es) after {:?}",
            tracker.len(),
            SHUTDOWN_GRACE
        );
    }

    info!("Bot stopped");
    Ok(())
}

fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}
