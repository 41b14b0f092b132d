use anyhow::{anyhow, Result};
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::{CommandDataOptionValue, CommandInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::fmt::Display;
use tracing::{info, warn};

use crate::{
    audio::{player::PlayOutcome, state::QueueSnapshot, track::Track},
    bot::JukeboxBot,
    error::{PlaybackError, QueueError},
    i18n::Catalog,
    storage::LanguageScope,
};

const HISTORY_LIMIT: usize = 10;

/// One slash command invocation, with the caller's language resolved.
struct Invocation<'a> {
    ctx: &'a Context,
    command: &'a CommandInteraction,
    bot: &'a JukeboxBot,
    locale: String,
}

impl Invocation<'_> {
    fn t(&self, key: &str, args: &[(&str, &(dyn Display + Sync))]) -> String {
        self.bot.catalog.format(&self.locale, key, args)
    }

    async fn respond(&self, content: String, ephemeral: bool) -> Result<()> {
        self.command
            .create_response(
                &self.ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(content)
                        .ephemeral(ephemeral),
                ),
            )
            .await?;
        Ok(())
    }

    async fn say(&self, key: &str, args: &[(&str, &(dyn Display + Sync))]) -> Result<()> {
        self.respond(self.t(key, args), false).await
    }

    async fn whisper(&self, key: &str, args: &[(&str, &(dyn Display + Sync))]) -> Result<()> {
        self.respond(self.t(key, args), true).await
    }

    async fn defer(&self) -> Result<()> {
        self.command
            .create_response(
                &self.ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;
        Ok(())
    }

    /// Replaces a deferred response.
    async fn follow_up(&self, key: &str, args: &[(&str, &(dyn Display + Sync))]) -> Result<()> {
        self.command
            .edit_response(&self.ctx.http, EditInteractionResponse::new().content(self.t(key, args)))
            .await?;
        Ok(())
    }

    fn option(&self, name: &str) -> Option<&CommandDataOptionValue> {
        self.command
            .data
            .options
            .iter()
            .find(|opt| opt.name == name)
            .map(|opt| &opt.value)
    }

    fn str_option(&self, name: &str) -> Result<&str> {
        self.option(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing option `{}`", name))
    }

    fn int_option(&self, name: &str) -> Option<i64> {
        self.option(name).and_then(|v| v.as_i64())
    }

    fn requester(&self) -> String {
        self.command
            .member
            .as_ref()
            .map(|m| m.display_name().to_string())
            .unwrap_or_else(|| self.command.user.display_name().to_string())
    }
}

/// Handles slash commands
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let locale = bot
        .languages
        .effective_language(command.user.id.get(), command.guild_id.map(|g| g.get()));
    let inv = Invocation {
        ctx,
        command: &command,
        bot,
        locale,
    };

    // language works in DMs for personal preferences
    if command.data.name == "language" {
        return handle_language(&inv).await;
    }

    let Some(guild_id) = command.guild_id else {
        return inv.whisper("error.server_only_command", &[]).await;
    };

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    let result = match command.data.name.as_str() {
        "play" => handle_play(&inv, guild_id, false).await,
        "playnext" => handle_play(&inv, guild_id, true).await,
        "skip" => handle_skip(&inv, guild_id).await,
        "queue" => handle_queue(&inv, guild_id).await,
        "clear" => handle_clear(&inv, guild_id).await,
        "stop" => handle_stop(&inv, guild_id).await,
        "pause" => handle_pause(&inv, guild_id).await,
        "resume" => handle_resume(&inv, guild_id).await,
        "nowplaying" => handle_nowplaying(&inv, guild_id).await,
        "shuffle" => handle_shuffle(&inv, guild_id).await,
        "remove" => handle_remove(&inv, guild_id).await,
        "move" => handle_move(&inv, guild_id).await,
        "history" => handle_history(&inv, guild_id).await,
        other => Err(anyhow!("unknown command /{}", other)),
    };

    match result {
        Err(e) if matches!(e.downcast_ref::<PlaybackError>(), Some(PlaybackError::ServiceClosed)) => {
            inv.whisper("error.unavailable", &[]).await
        }
        other => other,
    }
}

async fn handle_play(inv: &Invocation<'_>, guild_id: GuildId, next: bool) -> Result<()> {
    let url = inv.str_option("url")?;

    let Some(channel_id) = user_voice_channel(inv.ctx, guild_id, inv.command.user.id) else {
        return inv.whisper("error.need_voice_channel", &[]).await;
    };

    // fetching and joining can both outlast the 3s response window
    inv.defer().await?;

    if let Err(e) = inv.bot.player.join(guild_id, channel_id).await {
        warn!("⚠️ Join failed in guild {}: {}", guild_id, e);
        return inv.follow_up("error.join_failed", &[("error", &e)]).await;
    }

    let track = match inv.bot.source.fetch_track(url, &inv.requester()).await {
        Ok(track) => track,
        Err(e) => {
            warn!("⚠️ Could not fetch {}: {}", url, e);
            return inv.follow_up("error.fetch_track", &[("error", &e)]).await;
        }
    };

    let outcome = if next {
        inv.bot.player.play_next_up(guild_id, track.clone()).await
    } else {
        inv.bot.player.play(guild_id, track.clone()).await
    };

    let duration = track.format_duration();
    match outcome {
        Ok(PlayOutcome::Started(started)) => {
            let duration = started.format_duration();
            inv.follow_up("response.now_playing", &[("title", &started.title), ("duration", &duration)])
                .await
        }
        Ok(PlayOutcome::Queued { .. }) if next => {
            inv.follow_up("response.added_next", &[("title", &track.title), ("duration", &duration)])
                .await
        }
        Ok(PlayOutcome::Queued { position }) => {
            inv.follow_up(
                "response.added_to_queue",
                &[("position", &(position + 1)), ("title", &track.title), ("duration", &duration)],
            )
            .await
        }
        Err(PlaybackError::Queue(QueueError::Full { max })) => {
            inv.follow_up("error.queue_full", &[("max", &max)]).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_skip(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    match inv.bot.player.skip(guild_id).await {
        Ok(Some(track)) => inv.say("response.skipped_with_title", &[("title", &track.title)]).await,
        Ok(None) => inv.say("response.skipped", &[]).await,
        Err(PlaybackError::NothingPlaying) => inv.whisper("response.nothing_playing", &[]).await,
        Err(e) => Err(e.into()),
    }
}

async fn handle_queue(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    let snapshot = inv.bot.player.snapshot(guild_id).await?;
    let page = inv.int_option("page").unwrap_or(1).max(1) as usize;
    let text = render_queue(
        &inv.bot.catalog,
        &inv.locale,
        &snapshot,
        page,
        inv.bot.config.queue_page_size,
    );
    inv.respond(text, false).await
}

async fn handle_clear(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    let count = inv.bot.player.clear(guild_id).await?;
    inv.say("response.cleared_tracks", &[("count", &count)]).await
}

async fn handle_stop(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    match inv.bot.player.stop(guild_id).await {
        Ok(()) => inv.say("response.stopped_disconnected", &[]).await,
        Err(PlaybackError::NotConnected) => inv.say("response.not_connected", &[]).await,
        Err(e) => Err(e.into()),
    }
}

async fn handle_pause(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    match inv.bot.player.pause(guild_id).await {
        Ok(()) => inv.say("response.paused", &[]).await,
        Err(PlaybackError::NothingPlaying) => inv.whisper("response.nothing_playing", &[]).await,
        Err(e) => Err(e.into()),
    }
}

async fn handle_resume(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    match inv.bot.player.resume(guild_id).await {
        Ok(()) => inv.say("response.resumed", &[]).await,
        Err(PlaybackError::NothingPaused) => inv.whisper("response.nothing_paused", &[]).await,
        Err(e) => Err(e.into()),
    }
}

async fn handle_nowplaying(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    let snapshot = inv.bot.player.snapshot(guild_id).await?;
    match snapshot.current {
        Some(track) => {
            let duration = track.format_duration();
            inv.say(
                "response.nowplaying_detail",
                &[("title", &track.title), ("duration", &duration), ("requester", &track.requester)],
            )
            .await
        }
        None => inv.say("response.nothing_playing", &[]).await,
    }
}

async fn handle_shuffle(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    if inv.bot.player.shuffle(guild_id).await? {
        inv.say("response.queue_shuffled", &[]).await
    } else {
        inv.whisper("response.not_enough_tracks_shuffle", &[]).await
    }
}

async fn handle_remove(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    let position = inv.int_option("position").unwrap_or(0);
    let Some(index) = to_index(position) else {
        return invalid_position(inv, guild_id).await;
    };

    match inv.bot.player.remove(guild_id, index).await {
        Ok(track) => {
            inv.say("response.removed_track", &[("title", &track.title), ("position", &position)])
                .await
        }
        Err(PlaybackError::Queue(QueueError::IndexOutOfRange { .. })) => invalid_position(inv, guild_id).await,
        Err(e) => Err(e.into()),
    }
}

async fn handle_move(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    let from = inv.int_option("from").unwrap_or(0);
    let to = inv.int_option("to").unwrap_or(0);
    let (Some(source), Some(target)) = (to_index(from), to_index(to)) else {
        return invalid_position(inv, guild_id).await;
    };

    match inv.bot.player.move_track(guild_id, source, target).await {
        Ok(()) => {
            let snapshot = inv.bot.player.snapshot(guild_id).await?;
            let title = snapshot
                .queue
                .get(target)
                .map(|t| t.title.clone())
                .unwrap_or_default();
            inv.say("response.moved_track", &[("title", &title), ("from", &from), ("to", &to)])
                .await
        }
        Err(PlaybackError::Queue(QueueError::IndexOutOfRange { .. })) => invalid_position(inv, guild_id).await,
        Err(e) => Err(e.into()),
    }
}

async fn handle_history(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    if inv.option("clear").and_then(|v| v.as_bool()).unwrap_or(false) {
        inv.bot.player.clear_history(guild_id).await?;
        return inv.say("response.history_cleared", &[]).await;
    }

    let snapshot = inv.bot.player.snapshot(guild_id).await?;
    let text = render_history(&inv.bot.catalog, &inv.locale, &snapshot.history, HISTORY_LIMIT);
    inv.respond(text, false).await
}

async fn handle_language(inv: &Invocation<'_>) -> Result<()> {
    let language = inv.str_option("language")?;
    let personal = inv
        .option("personal")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let catalog = &inv.bot.catalog;
    if !catalog.is_valid_locale(language) {
        let available = catalog.available_locales().join(", ");
        return inv.whisper("response.invalid_language", &[("languages", &available)]).await;
    }

    let user_id = inv.command.user.id.get();
    let guild_id = inv.command.guild_id.map(|g| g.get());

    if personal {
        inv.bot
            .languages
            .set_language(LanguageScope::User, user_id, language)
            .await?;
    } else {
        let Some(guild) = guild_id else {
            return inv.whisper("error.server_only_command", &[]).await;
        };

        let can_manage = inv
            .command
            .member
            .as_ref()
            .and_then(|m| m.permissions)
            .is_some_and(|p| p.manage_guild());
        if !can_manage {
            return inv.whisper("response.need_manage_guild", &[]).await;
        }

        inv.bot
            .languages
            .set_language(LanguageScope::Guild, guild, language)
            .await?;
    }

    // answer in the language that now applies to the caller
    let locale = inv.bot.languages.effective_language(user_id, guild_id);
    let (key, ephemeral) = if personal {
        ("response.language_set_personal", true)
    } else {
        ("response.language_set_guild", false)
    };
    let text = catalog.format(&locale, key, &[("language", &language)]);
    inv.respond(text, ephemeral).await
}

async fn invalid_position(inv: &Invocation<'_>, guild_id: GuildId) -> Result<()> {
    let count = inv.bot.player.snapshot(guild_id).await?.queue.len();
    inv.whisper("response.invalid_position", &[("count", &count)]).await
}

// Helpers

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// 1-based user position to 0-based queue index.
fn to_index(position: i64) -> Option<usize> {
    usize::try_from(position).ok()?.checked_sub(1)
}

/// Renders one page of the queue. `page` is 1-based and clamped.
fn render_queue(catalog: &Catalog, locale: &str, snapshot: &QueueSnapshot, page: usize, page_size: usize) -> String {
    if snapshot.is_empty() {
        return catalog.get(locale, "response.queue_empty");
    }

    let mut lines = Vec::new();
    if let Some(current) = &snapshot.current {
        lines.push(track_line(catalog, locale, "response.queue_now_playing", None, current));
    }

    let queue = &snapshot.queue;
    if !queue.is_empty() {
        let page_size = page_size.max(1);
        let pages = queue.len().div_ceil(page_size);
        let page = page.clamp(1, pages);
        let start = (page - 1) * page_size;
        let end = (start + page_size).min(queue.len());

        lines.push(String::new());
        lines.push(catalog.get(locale, "response.queue_up_next"));
        for (index, track) in queue.iter().enumerate().take(end).skip(start) {
            lines.push(track_line(catalog, locale, "response.queue_track_item", Some(index + 1), track));
        }

        let remaining = queue.len() - end;
        if remaining > 0 {
            lines.push(catalog.format(locale, "response.queue_more_tracks", &[("count", &remaining)]));
        }
        if pages > 1 {
            lines.push(catalog.format(locale, "response.queue_page", &[("page", &page), ("pages", &pages)]));
        }

        let total = snapshot.total_duration;
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        lines.push(String::new());
        lines.push(if hours > 0 {
            catalog.format(
                locale,
                "response.queue_total_time_hours",
                &[("hours", &hours), ("minutes", &minutes)],
            )
        } else {
            catalog.format(
                locale,
                "response.queue_total_time_minutes",
                &[("minutes", &minutes), ("seconds", &seconds)],
            )
        });
    }

    lines.join("\n")
}

/// Most recent first.
fn render_history(catalog: &Catalog, locale: &str, history: &[Track], limit: usize) -> String {
    if history.is_empty() {
        return catalog.get(locale, "response.history_empty");
    }

    let mut lines = vec![catalog.get(locale, "response.history_header")];
    lines.extend(
        history
            .iter()
            .rev()
            .take(limit)
            .enumerate()
            .map(|(i, track)| track_line(catalog, locale, "response.history_item", Some(i + 1), track)),
    );
    lines.join("\n")
}

fn track_line(catalog: &Catalog, locale: &str, key: &str, position: Option<usize>, track: &Track) -> String {
    let duration = track.format_duration();
    match position {
        Some(position) => catalog.format(
            locale,
            key,
            &[("position", &position), ("title", &track.title), ("duration", &duration)],
        ),
        None => catalog.format(locale, key, &[("title", &track.title), ("duration", &duration)]),
    }
}
