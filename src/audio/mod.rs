//! # Audio Module
//!
//! Queueing, playback and voice connection handling for the jukebox.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Engine
//! - Current track, FIFO pending queue and play history per guild
//! - Positional edits (remove, move, play next) and shuffling
//!
//! ### [`player`] - Playback Session
//! - One loop owns every guild's [`state::GuildPlayback`]
//! - Cloneable [`player::PlaybackHandle`] for commands and transport callbacks
//! - Track completions carry a generation so stale ones are dropped
//!
//! ### [`reconnect`] - Reconnection Supervisor
//! - At most one retry loop per guild, with a shared attempt cap
//! - Never resurrects a connection the users asked to drop
//!
//! ### [`transport`] / [`voice`] - Voice Boundary
//! - Traits the core is written against
//! - Songbird and serenity cache implementations
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::audio::{player::PlaybackHandle, track::Track};
//! use serenity::all::{ChannelId, GuildId};
//!
//! # async fn example(handle: PlaybackHandle) -> anyhow::Result<()> {
//! let guild_id = GuildId::new(123456789);
//! handle.join(guild_id, ChannelId::new(987654321)).await?;
//!
//! let track = Track::new("https://example.com/song", "Song", 215, "someone")
//!     .with_stream_url("https://cdn.example.com/song.webm");
//! handle.play(guild_id, track).await?;
//! handle.pause(guild_id).await?;
//! handle.resume(guild_id).await?;
//! handle.skip(guild_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod queue;
pub mod reconnect;
pub mod state;
pub mod track;
pub mod transport;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;
