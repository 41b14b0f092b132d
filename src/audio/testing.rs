//! Scripted voice fakes shared by the audio tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{collections::VecDeque, sync::Arc};

use crate::{
    audio::transport::{TrackCompletion, VoiceSession, VoiceTransport},
    error::ConnectError,
};

#[derive(Default)]
struct SessionState {
    connected: bool,
    channel: Option<ChannelId>,
    played: Vec<String>,
    completion: Option<TrackCompletion>,
    playing: bool,
    paused: bool,
    disconnects: usize,
    fail_play: bool,
}

/// In-memory voice session. `stop` behaves like the real driver and fires
/// the completion of the current track.
#[derive(Default)]
pub struct FakeSession {
    state: Mutex<SessionState>,
}

impl FakeSession {
    pub fn connected(channel_id: ChannelId) -> Arc<Self> {
        let session = Self::default();
        {
            let mut state = session.state.lock();
            state.connected = true;
            state.channel = Some(channel_id);
        }
        Arc::new(session)
    }

    pub fn played(&self) -> Vec<String> {
        self.state.lock().played.clone()
    }

    pub fn completion(&self) -> Option<TrackCompletion> {
        self.state.lock().completion.clone()
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.state.lock().channel
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn fail_play(&self) {
        self.state.lock().fail_play = true;
    }

    /// The current track reaches its natural end.
    pub fn finish_track(&self) {
        let completion = {
            let mut state = self.state.lock();
            state.playing = false;
            state.paused = false;
            state.completion.take()
        };
        if let Some(completion) = completion {
            completion.notify();
        }
    }

    /// The gateway connection goes away without the session being told.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.channel = None;
    }
}

#[async_trait]
impl VoiceSession for FakeSession {
    async fn play(&self, stream_url: &str, on_complete: TrackCompletion) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_play {
            bail!("stream rejected: {}", stream_url);
        }
        state.played.push(stream_url.to_string());
        state.completion = Some(on_complete);
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    async fn stop(&self) {
        self.finish_track();
    }

    async fn pause(&self) {
        let mut state = self.state.lock();
        if state.playing {
            state.playing = false;
            state.paused = true;
        }
    }

    async fn resume(&self) {
        let mut state = self.state.lock();
        if state.paused {
            state.playing = true;
            state.paused = false;
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    async fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        self.state.lock().channel
    }

    async fn move_to(&self, channel_id: ChannelId) -> Result<(), ConnectError> {
        self.state.lock().channel = Some(channel_id);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.channel = None;
        state.playing = false;
        state.paused = false;
        state.disconnects += 1;
    }
}

/// Transport whose connect outcomes can be scripted ahead of time.
/// Unscripted calls succeed.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<(), ConnectError>>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    calls: Mutex<usize>,
}

impl FakeTransport {
    pub fn fail_next(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(Err(ConnectError::Join("gateway timed out".to_string())));
        }
    }

    pub fn connect_calls(&self) -> usize {
        *self.calls.lock()
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().last().cloned()
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        *self.calls.lock() += 1;
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        outcome?;

        let session = FakeSession::connected(channel_id);
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}
