//! Boundary between the playback core and the voice stack.
//!
//! The core only talks to these traits; `audio::voice` provides the
//! songbird/serenity implementations and tests provide scripted fakes.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;

use crate::{audio::player::PlaybackHandle, error::ConnectError};

/// Opens voice sessions.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError>;
}

/// One live voice connection for a guild.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Starts streaming `stream_url`, replacing whatever was playing.
    /// `on_complete` fires once the track ends, errors out or is stopped.
    async fn play(&self, stream_url: &str, on_complete: TrackCompletion) -> Result<()>;

    async fn stop(&self);

    async fn pause(&self);

    async fn resume(&self);

    async fn is_connected(&self) -> bool;

    async fn is_playing(&self) -> bool;

    async fn is_paused(&self) -> bool;

    async fn current_channel(&self) -> Option<ChannelId>;

    async fn move_to(&self, channel_id: ChannelId) -> Result<(), ConnectError>;

    async fn disconnect(&self);
}

/// A voice channel as seen through the guild directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelInfo {
    pub id: ChannelId,
    pub name: String,
    /// Users currently connected to the channel, the bot included
    pub members: Vec<UserId>,
}

/// Read-only view of guild channels and voice rosters.
#[cfg_attr(test, mockall::automock)]
pub trait GuildDirectory: Send + Sync {
    /// The bot's own user id, once known.
    fn current_user(&self) -> Option<UserId>;

    fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<VoiceChannelInfo>;
}

/// Thread-safe completion callback handed to the transport with each track.
///
/// Transport callbacks run outside the playback loop; calling
/// [`notify`](Self::notify) only enqueues a message for that loop.
#[derive(Debug, Clone)]
pub struct TrackCompletion {
    handle: PlaybackHandle,
    guild_id: GuildId,
    generation: u64,
}

impl TrackCompletion {
    pub(crate) fn new(handle: PlaybackHandle, guild_id: GuildId, generation: u64) -> Self {
        Self {
            handle,
            guild_id,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify(&self) {
        self.handle
            .handle_track_completion(self.guild_id, self.generation);
    }
}
