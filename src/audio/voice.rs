//! Songbird and serenity backed implementations of the voice boundary.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serenity::{
    cache::Cache,
    model::{
        channel::ChannelType,
        id::{ChannelId, GuildId, UserId},
    },
};
use songbird::{
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::{
    audio::transport::{GuildDirectory, TrackCompletion, VoiceChannelInfo, VoiceSession, VoiceTransport},
    error::ConnectError,
};

/// Opens voice connections through the shared songbird manager.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { manager, http }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| ConnectError::Join(e.to_string()))?;

        debug!("Voice handshake finished for guild {}", guild_id);
        Ok(Arc::new(SongbirdSession {
            guild_id,
            manager: self.manager.clone(),
            call,
            http: self.http.clone(),
            track: parking_lot::Mutex::new(None),
        }))
    }
}

/// One songbird call plus the handle of the track it is playing.
pub struct SongbirdSession {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    track: parking_lot::Mutex<Option<TrackHandle>>,
}

impl SongbirdSession {
    fn track(&self) -> Option<TrackHandle> {
        self.track.lock().clone()
    }

    async fn play_mode(&self) -> Option<PlayMode> {
        let track = self.track()?;
        track.get_info().await.ok().map(|info| info.playing)
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn play(&self, stream_url: &str, on_complete: TrackCompletion) -> Result<()> {
        let input = HttpRequest::new(self.http.clone(), stream_url.to_string());
        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input.into())
        };

        // End and Error may both fire for one track
        let fired = Arc::new(AtomicBool::new(false));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    CompletionNotifier {
                        completion: on_complete.clone(),
                        fired: fired.clone(),
                    },
                )
                .map_err(|e| anyhow!("could not attach track events: {}", e))?;
        }

        *self.track.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(track) = self.track.lock().take() {
            let _ = track.stop();
        }
    }

    async fn pause(&self) {
        if let Some(track) = self.track() {
            let _ = track.pause();
        }
    }

    async fn resume(&self) {
        if let Some(track) = self.track() {
            let _ = track.play();
        }
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn is_playing(&self) -> bool {
        self.play_mode().await == Some(PlayMode::Play)
    }

    async fn is_paused(&self) -> bool {
        self.play_mode().await == Some(PlayMode::Pause)
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        let call = self.call.lock().await;
        call.current_channel().map(|c| ChannelId::from(c.0))
    }

    async fn move_to(&self, channel_id: ChannelId) -> Result<(), ConnectError> {
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map(|_| ())
            .map_err(|e| ConnectError::Join(e.to_string()))
    }

    async fn disconnect(&self) {
        self.track.lock().take();
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Leaving voice in guild {} reported: {:?}", self.guild_id, e);
        }
    }
}

/// Forwards the first end or error event of a track to the playback loop.
struct CompletionNotifier {
    completion: TrackCompletion,
    fired: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                if let PlayMode::Errored(e) = &state.playing {
                    error!("❌ Track {} failed: {:?}", self.completion.generation(), e);
                }
            }
        }

        if !self.fired.swap(true, Ordering::SeqCst) {
            self.completion.notify();
        }
        None
    }
}

/// Guild directory backed by the gateway cache.
pub struct SerenityDirectory {
    cache: Arc<Cache>,
}

impl SerenityDirectory {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

impl GuildDirectory for SerenityDirectory {
    fn current_user(&self) -> Option<UserId> {
        Some(self.cache.current_user().id)
    }

    fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<VoiceChannelInfo> {
        let guild = self.cache.guild(guild_id)?;
        let channel = guild.channels.get(&channel_id)?;
        if !matches!(channel.kind, ChannelType::Voice | ChannelType::Stage) {
            return None;
        }

        let members = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .map(|state| state.user_id)
            .collect();

        Some(VoiceChannelInfo {
            id: channel_id,
            name: channel.name.clone(),
            members,
        })
    }
}
