use serenity::model::id::ChannelId;
use std::{fmt, sync::Arc};

use crate::audio::{
    queue::TrackQueue,
    reconnect::{LinkPhase, SupervisorState},
    track::Track,
    transport::VoiceSession,
};

/// Playback state of one guild.
///
/// Created lazily on the first voice interaction and owned exclusively by
/// the playback loop, so it carries no lock of its own.
pub struct GuildPlayback {
    pub(crate) queue: TrackQueue,
    pub(crate) session: Option<Arc<dyn VoiceSession>>,
    pub(crate) is_playing: bool,
    pub(crate) intentional_disconnect: bool,
    pub(crate) target_channel_id: Option<ChannelId>,
    pub(crate) reconnect_attempts: u32,
    pub(crate) link: LinkPhase,
    /// Bumped on every stream submission; completions carry the value they were issued with.
    pub(crate) generation: u64,
}

impl GuildPlayback {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: TrackQueue::with_max_size(max_queue_size),
            session: None,
            is_playing: false,
            intentional_disconnect: false,
            target_channel_id: None,
            reconnect_attempts: 0,
            link: LinkPhase::Connected,
            generation: 0,
        }
    }

    /// Records an explicit join: the target channel becomes `channel_id`
    /// and any earlier stop or exhausted retry budget is forgotten.
    pub(crate) fn record_join(&mut self, channel_id: ChannelId) {
        self.target_channel_id = Some(channel_id);
        self.intentional_disconnect = false;
        self.reconnect_attempts = 0;
        self.link = LinkPhase::Connected;
    }

    /// Marks the connection as deliberately released and hands back the
    /// session so the caller can close it.
    pub(crate) fn release(&mut self) -> Option<Arc<dyn VoiceSession>> {
        self.intentional_disconnect = true;
        self.target_channel_id = None;
        self.is_playing = false;
        self.link = LinkPhase::Intentional;
        self.queue.stop();
        self.session.take()
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.queue.current().cloned(),
            queue: self.queue.queue(),
            history: self.queue.history().to_vec(),
            total_duration: self.queue.total_duration(),
            is_playing: self.is_playing,
            intentional_disconnect: self.intentional_disconnect,
            target_channel_id: self.target_channel_id,
            reconnect_attempts: self.reconnect_attempts,
            supervisor: self.supervisor_state(),
        }
    }
}

#[cfg(test)]
impl GuildPlayback {
    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn intentional_disconnect(&self) -> bool {
        self.intentional_disconnect
    }

    pub fn target_channel_id(&self) -> Option<ChannelId> {
        self.target_channel_id
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }
}

impl fmt::Debug for GuildPlayback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildPlayback")
            .field("queue", &self.queue)
            .field("has_session", &self.session.is_some())
            .field("is_playing", &self.is_playing)
            .field("intentional_disconnect", &self.intentional_disconnect)
            .field("target_channel_id", &self.target_channel_id)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("link", &self.link)
            .finish()
    }
}

/// Point-in-time copy of a guild's playback state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub history: Vec<Track>,
    /// Seconds of pending audio, the current track excluded
    pub total_duration: u64,
    pub is_playing: bool,
    pub intentional_disconnect: bool,
    pub target_channel_id: Option<ChannelId>,
    pub reconnect_attempts: u32,
    pub supervisor: SupervisorState,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }
}
