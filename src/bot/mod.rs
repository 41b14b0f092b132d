//! # Bot Module
//!
//! Discord glue for the jukebox: slash command registration, command
//! handling and forwarding of voice state changes to the playback service.
//!
//! The bot never touches voice connections directly. Everything that
//! changes playback goes through the [`PlaybackHandle`], which serializes
//! work per guild.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::player::PlaybackHandle, config::Config, i18n::Catalog, sources::AudioSource, storage::LanguageStore};

/// Serenity event handler holding everything a command needs.
pub struct JukeboxBot {
    pub(crate) config: Arc<Config>,
    pub(crate) player: PlaybackHandle,
    pub(crate) source: Arc<dyn AudioSource>,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) languages: Arc<LanguageStore>,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        player: PlaybackHandle,
        source: Arc<dyn AudioSource>,
        catalog: Arc<Catalog>,
        languages: Arc<LanguageStore>,
    ) -> Self {
        Self {
            config,
            player,
            source,
            catalog,
            languages,
        }
    }

    /// Registers slash commands in the dev guild when `GUILD_ID` is set,
    /// globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ Bot is not in the configured guild {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id, &self.catalog).await?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx, &self.catalog).await?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Failed to register commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let name = command.data.name.clone();
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("❌ Error handling /{}: {:?}", name, e);
            }
        }
    }

    /// Forwards connection loss of the bot itself and roster changes of
    /// everyone else. The playback service decides what they mean.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        if new.user_id == ctx.cache.current_user().id {
            if new.channel_id.is_none() {
                info!("🔌 Bot left voice in guild {}", guild_id);
                self.player.handle_involuntary_disconnect(guild_id);
            }
            return;
        }

        let old_channel = old.and_then(|state| state.channel_id);
        if old_channel == new.channel_id {
            return;
        }

        debug!(
            "Member {} moved {:?} -> {:?} in guild {}",
            new.user_id, old_channel, new.channel_id, guild_id
        );
        for channel_id in [old_channel, new.channel_id].into_iter().flatten() {
            self.player.handle_membership_change(guild_id, channel_id);
        }
    }
}
