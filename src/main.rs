use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod i18n;
mod sources;
mod storage;

use crate::audio::player::{PlaybackHandle, PlaybackService};
use crate::audio::voice::{SerenityDirectory, SongbirdTransport};
use crate::bot::JukeboxBot;
use crate::config::Config;
use crate::i18n::Catalog;
use crate::sources::YtDlpSource;
use crate::storage::LanguageStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting jukebox v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let catalog = Arc::new(Catalog::embedded()?);
    info!("🌐 Locales: {}", catalog.available_locales().join(", "));

    let languages = Arc::new(LanguageStore::new(config.data_dir.clone()).await?);
    let source = Arc::new(
        YtDlpSource::new(config.ytdlp_path.clone(), config.youtube_cookies.clone())
            .with_timeout(config.fetch_timeout()),
    );

    // the handle exists before the service so the event handler can own a copy
    let (player, inbox) = PlaybackHandle::channel();
    let handler = JukeboxBot::new(config.clone(), player.clone(), source, catalog, languages);

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let manager = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager.clone())
        .await?;

    let transport = Arc::new(SongbirdTransport::new(manager, reqwest::Client::new()));
    let directory = Arc::new(SerenityDirectory::new(client.cache.clone()));
    PlaybackService::new(player, inbox, transport, directory, config.playback_settings()).spawn();

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Shutdown signal received, closing...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("❌ Could not listen for Ctrl+C: {:?}", e),
        }
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("❌ Client error: {:?}", why);
    }

    Ok(())
}

/// Exits successfully when yt-dlp can be executed.
async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("{} --version failed", config.ytdlp_path);
    }
}
