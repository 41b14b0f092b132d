//! Playback session: binds each guild's queue to its voice connection.
//!
//! All guild state lives inside one [`PlaybackService`] task. Commands from
//! slash handlers, transport callbacks and reconnect loops reach it through a
//! [`PlaybackHandle`], which is a thin wrapper over an unbounded channel and
//! can be used from any thread. Work that may take a while (joining a
//! channel, reconnect delays) runs in spawned tasks that post their results
//! back, so one slow guild never holds up the others.

use serenity::model::id::{ChannelId, GuildId};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        reconnect::{self, AbortReason, AttemptDecision, Reattached, ReconnectPolicy, ReconnectTrigger},
        state::{GuildPlayback, QueueSnapshot},
        track::Track,
        transport::{GuildDirectory, TrackCompletion, VoiceSession, VoiceTransport},
    },
    error::{ConnectError, PlaybackError},
};

type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

/// What happened to a track submitted through [`PlaybackHandle::play`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Playback was idle and this track is now playing
    Started(Track),
    /// The track waits in the queue at this 0-based position
    Queued { position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    pub reconnect: ReconnectPolicy,
    pub max_queue_size: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            max_queue_size: 1000,
        }
    }
}

pub(crate) enum Command {
    Join {
        guild_id: GuildId,
        channel_id: ChannelId,
        reply: Reply<()>,
    },
    JoinCompleted {
        guild_id: GuildId,
        channel_id: ChannelId,
        /// `Some` when a new session was opened, `None` after a move
        result: Result<Option<Arc<dyn VoiceSession>>, ConnectError>,
        reply: Reply<()>,
    },
    Play {
        guild_id: GuildId,
        track: Track,
        next: bool,
        reply: Reply<PlayOutcome>,
    },
    Skip {
        guild_id: GuildId,
        reply: Reply<Option<Track>>,
    },
    Stop {
        guild_id: GuildId,
        reply: Reply<()>,
    },
    Pause {
        guild_id: GuildId,
        reply: Reply<()>,
    },
    Resume {
        guild_id: GuildId,
        reply: Reply<()>,
    },
    Remove {
        guild_id: GuildId,
        index: usize,
        reply: Reply<Track>,
    },
    Move {
        guild_id: GuildId,
        from: usize,
        to: usize,
        reply: Reply<()>,
    },
    Clear {
        guild_id: GuildId,
        reply: Reply<usize>,
    },
    Shuffle {
        guild_id: GuildId,
        reply: Reply<bool>,
    },
    ClearHistory {
        guild_id: GuildId,
        reply: Reply<()>,
    },
    Snapshot {
        guild_id: GuildId,
        reply: Reply<QueueSnapshot>,
    },
    TrackCompleted {
        guild_id: GuildId,
        generation: u64,
    },
    InvoluntaryDisconnect {
        guild_id: GuildId,
    },
    MembershipChanged {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    BeginReconnectAttempt {
        guild_id: GuildId,
        reply: Reply<AttemptDecision>,
    },
    ReconnectSucceeded {
        guild_id: GuildId,
        session: Arc<dyn VoiceSession>,
    },
    ReconnectFailed {
        guild_id: GuildId,
        error: ConnectError,
    },
}

/// Cloneable, thread-safe entry point into the playback loop.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// Receiving half handed to [`PlaybackService::new`].
pub struct PlaybackInbox {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl PlaybackHandle {
    /// Creates the handle before the service exists, so it can be given to
    /// the event handler while the voice stack is still being built.
    pub fn channel() -> (Self, PlaybackInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, PlaybackInbox { rx })
    }

    fn post(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Playback service is gone, dropping command");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, PlaybackError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| PlaybackError::ServiceClosed)?;
        rx.await.map_err(|_| PlaybackError::ServiceClosed)?
    }

    /// Joins `channel_id`, moving if already connected elsewhere. Always
    /// resets the target channel and the reconnect bookkeeping.
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Join {
            guild_id,
            channel_id,
            reply,
        })
        .await
    }

    pub async fn play(&self, guild_id: GuildId, track: Track) -> Result<PlayOutcome, PlaybackError> {
        self.request(|reply| Command::Play {
            guild_id,
            track,
            next: false,
            reply,
        })
        .await
    }

    /// Like [`play`](Self::play) but puts the track at the head of the queue.
    pub async fn play_next_up(&self, guild_id: GuildId, track: Track) -> Result<PlayOutcome, PlaybackError> {
        self.request(|reply| Command::Play {
            guild_id,
            track,
            next: true,
            reply,
        })
        .await
    }

    /// Ends the current track; its completion pulls the next one.
    pub async fn skip(&self, guild_id: GuildId) -> Result<Option<Track>, PlaybackError> {
        self.request(|reply| Command::Skip { guild_id, reply }).await
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Stop { guild_id, reply }).await
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Pause { guild_id, reply }).await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Resume { guild_id, reply }).await
    }

    pub async fn remove(&self, guild_id: GuildId, index: usize) -> Result<Track, PlaybackError> {
        self.request(|reply| Command::Remove {
            guild_id,
            index,
            reply,
        })
        .await
    }

    pub async fn move_track(&self, guild_id: GuildId, from: usize, to: usize) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Move {
            guild_id,
            from,
            to,
            reply,
        })
        .await
    }

    pub async fn clear(&self, guild_id: GuildId) -> Result<usize, PlaybackError> {
        self.request(|reply| Command::Clear { guild_id, reply }).await
    }

    /// Returns `false` without touching the queue when it holds fewer than two tracks.
    pub async fn shuffle(&self, guild_id: GuildId) -> Result<bool, PlaybackError> {
        self.request(|reply| Command::Shuffle { guild_id, reply }).await
    }

    pub async fn clear_history(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(|reply| Command::ClearHistory { guild_id, reply })
            .await
    }

    pub async fn snapshot(&self, guild_id: GuildId) -> Result<QueueSnapshot, PlaybackError> {
        self.request(|reply| Command::Snapshot { guild_id, reply })
            .await
    }

    /// Called by the transport when the track issued with `generation` ends.
    pub fn handle_track_completion(&self, guild_id: GuildId, generation: u64) {
        self.post(Command::TrackCompleted {
            guild_id,
            generation,
        });
    }

    /// Called when the bot's own voice connection drops without a user action.
    pub fn handle_involuntary_disconnect(&self, guild_id: GuildId) {
        self.post(Command::InvoluntaryDisconnect { guild_id });
    }

    /// Called when the roster of `channel_id` changes.
    pub fn handle_membership_change(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.post(Command::MembershipChanged {
            guild_id,
            channel_id,
        });
    }

    pub(crate) async fn begin_reconnect_attempt(&self, guild_id: GuildId) -> Result<AttemptDecision, PlaybackError> {
        self.request(|reply| Command::BeginReconnectAttempt { guild_id, reply })
            .await
    }

    pub(crate) fn reconnect_succeeded(&self, guild_id: GuildId, session: Arc<dyn VoiceSession>) {
        self.post(Command::ReconnectSucceeded { guild_id, session });
    }

    pub(crate) fn reconnect_failed(&self, guild_id: GuildId, error: ConnectError) {
        self.post(Command::ReconnectFailed { guild_id, error });
    }
}

/// Everything the loop needs besides the guild map.
struct ServiceContext {
    handle: PlaybackHandle,
    transport: Arc<dyn VoiceTransport>,
    directory: Arc<dyn GuildDirectory>,
    settings: PlaybackSettings,
}

/// The single loop that owns every guild's [`GuildPlayback`].
pub struct PlaybackService {
    inbox: PlaybackInbox,
    guilds: HashMap<GuildId, GuildPlayback>,
    ctx: ServiceContext,
}

impl PlaybackService {
    pub fn new(
        handle: PlaybackHandle,
        inbox: PlaybackInbox,
        transport: Arc<dyn VoiceTransport>,
        directory: Arc<dyn GuildDirectory>,
        settings: PlaybackSettings,
    ) -> Self {
        Self {
            inbox,
            guilds: HashMap::new(),
            ctx: ServiceContext {
                handle,
                transport,
                directory,
                settings,
            },
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("🎛️ Playback service started");
        while let Some(command) = self.inbox.rx.recv().await {
            self.dispatch(command).await;
        }
        info!("🎛️ Playback service stopped");
    }

    async fn dispatch(&mut self, command: Command) {
        let Self { guilds, ctx, .. } = self;
        let max = ctx.settings.max_queue_size;

        match command {
            Command::Join {
                guild_id,
                channel_id,
                reply,
            } => {
                let state = guild_state(guilds, guild_id, max);
                ctx.join(state, guild_id, channel_id, reply).await;
            }
            Command::JoinCompleted {
                guild_id,
                channel_id,
                result,
                reply,
            } => {
                let state = guild_state(guilds, guild_id, max);
                ctx.join_completed(state, guild_id, channel_id, result, reply).await;
            }
            Command::Play {
                guild_id,
                track,
                next,
                reply,
            } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(ctx.play(state, guild_id, track, next).await);
            }
            Command::Skip { guild_id, reply } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(ctx.skip(state).await);
            }
            Command::Stop { guild_id, reply } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(ctx.stop(state, guild_id).await);
            }
            Command::Pause { guild_id, reply } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(ctx.pause(state).await);
            }
            Command::Resume { guild_id, reply } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(ctx.resume(state).await);
            }
            Command::Remove {
                guild_id,
                index,
                reply,
            } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(state.queue.remove(index).map_err(Into::into));
            }
            Command::Move {
                guild_id,
                from,
                to,
                reply,
            } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(state.queue.move_track(from, to).map_err(Into::into));
            }
            Command::Clear { guild_id, reply } => {
                let state = guild_state(guilds, guild_id, max);
                let _ = reply.send(Ok(state.queue.clear()));
            }
            Command::Shuffle { guild_id, reply } => {
                let state = guild_state(guilds, guild_id, max);
                let shuffled = state.queue.len() >= 2;
                if shuffled {
                    state.queue.shuffle();
                }
                let _ = reply.send(Ok(shuffled));
            }
            Command::ClearHistory { guild_id, reply } => {
                guild_state(guilds, guild_id, max).queue.clear_history();
                let _ = reply.send(Ok(()));
            }
            Command::Snapshot { guild_id, reply } => {
                let _ = reply.send(Ok(guild_state(guilds, guild_id, max).snapshot()));
            }
            Command::TrackCompleted {
                guild_id,
                generation,
            } => {
                if let Some(state) = guilds.get_mut(&guild_id) {
                    if generation == state.generation {
                        ctx.play_next(state, guild_id).await;
                    } else {
                        debug!(
                            "Ignoring stale completion {} (current {}) in guild {}",
                            generation, state.generation, guild_id
                        );
                    }
                }
            }
            Command::InvoluntaryDisconnect { guild_id } => {
                if let Some(state) = guilds.get_mut(&guild_id) {
                    ctx.involuntary_disconnect(state, guild_id);
                }
            }
            Command::MembershipChanged {
                guild_id,
                channel_id,
            } => {
                if let Some(state) = guilds.get_mut(&guild_id) {
                    ctx.membership_changed(state, guild_id, channel_id).await;
                }
            }
            Command::BeginReconnectAttempt { guild_id, reply } => {
                let decision = match guilds.get_mut(&guild_id) {
                    Some(state) => ctx.begin_reconnect_attempt(state, guild_id),
                    None => AttemptDecision::Abort(AbortReason::Superseded),
                };
                let _ = reply.send(Ok(decision));
            }
            Command::ReconnectSucceeded { guild_id, session } => {
                if let Some(state) = guilds.get_mut(&guild_id) {
                    ctx.reconnect_succeeded(state, guild_id, session).await;
                }
            }
            Command::ReconnectFailed { guild_id, error } => {
                debug!("Reconnect attempt failed in guild {}: {}", guild_id, error);
            }
        }
    }
}

fn guild_state(
    guilds: &mut HashMap<GuildId, GuildPlayback>,
    guild_id: GuildId,
    max_queue_size: usize,
) -> &mut GuildPlayback {
    guilds.entry(guild_id).or_insert_with(|| {
        let mut state = GuildPlayback::new(max_queue_size);
        state.queue.on_track_change(move |track| match track {
            Some(track) => debug!("Now current in guild {}: {}", guild_id, track.title),
            None => debug!("Nothing current in guild {}", guild_id),
        });
        state
    })
}

/// The session, if it still has a live connection.
async fn live_session(session: Option<Arc<dyn VoiceSession>>) -> Option<Arc<dyn VoiceSession>> {
    let session = session?;
    session.is_connected().await.then_some(session)
}

impl ServiceContext {
    async fn join(
        &self,
        state: &mut GuildPlayback,
        guild_id: GuildId,
        channel_id: ChannelId,
        reply: Reply<()>,
    ) {
        let live = live_session(state.session.clone()).await;
        let current_channel = match &live {
            Some(session) => session.current_channel().await,
            None => None,
        };

        let handle = self.handle.clone();
        match live {
            Some(_) if current_channel == Some(channel_id) => {
                state.record_join(channel_id);
                let _ = reply.send(Ok(()));
            }
            Some(session) => {
                info!("🔀 Moving to channel {} in guild {}", channel_id, guild_id);
                tokio::spawn(async move {
                    let result = session.move_to(channel_id).await.map(|_| None);
                    handle.post(Command::JoinCompleted {
                        guild_id,
                        channel_id,
                        result,
                        reply,
                    });
                });
            }
            None => {
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    let result = transport.connect(guild_id, channel_id).await.map(Some);
                    handle.post(Command::JoinCompleted {
                        guild_id,
                        channel_id,
                        result,
                        reply,
                    });
                });
            }
        }
    }

    async fn join_completed(
        &self,
        state: &mut GuildPlayback,
        guild_id: GuildId,
        channel_id: ChannelId,
        result: Result<Option<Arc<dyn VoiceSession>>, ConnectError>,
        reply: Reply<()>,
    ) {
        match result {
            Ok(opened) => {
                let reopened = opened.is_some();
                if let Some(session) = opened {
                    state.session = Some(session);
                }
                state.record_join(channel_id);
                info!("🔊 Joined channel {} in guild {}", channel_id, guild_id);
                let _ = reply.send(Ok(()));

                // a fresh session has no track yet; pick up where the lost one stopped
                if reopened && state.is_playing {
                    self.resume_playback(state, guild_id).await;
                }
            }
            Err(e) => {
                error!("❌ Could not join channel {} in guild {}: {}", channel_id, guild_id, e);
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    /// Replays the current track on the installed session, or pulls the
    /// next one when nothing was playing.
    async fn resume_playback(&self, state: &mut GuildPlayback, guild_id: GuildId) {
        let Some(session) = state.session.clone() else {
            return;
        };

        match state.queue.start().cloned() {
            Some(track) => {
                info!("▶️ Resuming {} in guild {}", track.title, guild_id);
                self.submit(state, guild_id, session.as_ref(), track).await;
            }
            None => {
                if let Some(session) = state.release() {
                    session.disconnect().await;
                }
            }
        }
    }

    async fn play(
        &self,
        state: &mut GuildPlayback,
        guild_id: GuildId,
        track: Track,
        next: bool,
    ) -> Result<PlayOutcome, PlaybackError> {
        let position = if next {
            state.queue.add_next(track)?;
            0
        } else {
            state.queue.add(track)?
        };

        if state.is_playing {
            return Ok(PlayOutcome::Queued { position });
        }

        self.play_next(state, guild_id).await;
        match state.queue.current() {
            Some(current) if state.is_playing => Ok(PlayOutcome::Started(current.clone())),
            _ => Ok(PlayOutcome::Queued { position }),
        }
    }

    /// Pulls the next track, or hands off to the reconnect supervisor when
    /// the connection is gone.
    async fn play_next(&self, state: &mut GuildPlayback, guild_id: GuildId) {
        let Some(session) = live_session(state.session.clone()).await else {
            if state.is_playing && !state.intentional_disconnect {
                self.trigger_reconnect(state, guild_id);
            } else {
                state.is_playing = false;
            }
            return;
        };

        match state.queue.advance().cloned() {
            Some(track) => self.submit(state, guild_id, session.as_ref(), track).await,
            None => {
                info!("📭 Queue finished in guild {}, leaving voice", guild_id);
                if let Some(session) = state.release() {
                    session.disconnect().await;
                }
            }
        }
    }

    async fn submit(&self, state: &mut GuildPlayback, guild_id: GuildId, session: &dyn VoiceSession, track: Track) {
        let generation = state.next_generation();
        let completion = TrackCompletion::new(self.handle.clone(), guild_id, generation);

        state.is_playing = true;
        match session.play(&track.stream_url, completion.clone()).await {
            Ok(()) => info!("🎵 Playing {} in guild {}", track.title, guild_id),
            Err(e) => {
                error!("❌ Could not play {} in guild {}: {:?}", track.title, guild_id, e);
                completion.notify();
            }
        }
    }

    async fn skip(&self, state: &mut GuildPlayback) -> Result<Option<Track>, PlaybackError> {
        let session = match state.session.clone() {
            Some(session) if state.is_playing => session,
            _ => return Err(PlaybackError::NothingPlaying),
        };

        let skipped = state.queue.current().cloned();
        session.stop().await;
        Ok(skipped)
    }

    async fn stop(&self, state: &mut GuildPlayback, guild_id: GuildId) -> Result<(), PlaybackError> {
        let reconnecting = matches!(
            state.supervisor_state(),
            reconnect::SupervisorState::AwaitingReconnect(_)
        );
        // an exhausted guild has no session but may still hold tracks
        if state.session.is_none() && !reconnecting && state.queue.is_empty() {
            return Err(PlaybackError::NotConnected);
        }

        state.queue.clear();
        if let Some(session) = state.release() {
            session.stop().await;
            session.disconnect().await;
        }
        info!("⏹️ Stopped playback in guild {}", guild_id);
        Ok(())
    }

    async fn pause(&self, state: &mut GuildPlayback) -> Result<(), PlaybackError> {
        let session = state.session.clone().ok_or(PlaybackError::NothingPlaying)?;
        if !session.is_playing().await {
            return Err(PlaybackError::NothingPlaying);
        }
        session.pause().await;
        Ok(())
    }

    async fn resume(&self, state: &mut GuildPlayback) -> Result<(), PlaybackError> {
        let session = state.session.clone().ok_or(PlaybackError::NothingPaused)?;
        if !session.is_paused().await {
            return Err(PlaybackError::NothingPaused);
        }
        session.resume().await;
        Ok(())
    }

    fn involuntary_disconnect(&self, state: &mut GuildPlayback, guild_id: GuildId) {
        if state.intentional_disconnect {
            debug!("Disconnect in guild {} was requested, ignoring", guild_id);
            return;
        }

        state.session = None;
        if state.is_playing {
            warn!("🔌 Unexpected voice disconnect in guild {}", guild_id);
            self.trigger_reconnect(state, guild_id);
        }
    }

    fn trigger_reconnect(&self, state: &mut GuildPlayback, guild_id: GuildId) {
        match state.request_reconnect() {
            ReconnectTrigger::Started => {
                tokio::spawn(reconnect::supervise(
                    guild_id,
                    self.handle.clone(),
                    self.transport.clone(),
                    self.directory.clone(),
                    self.settings.reconnect,
                ));
            }
            ReconnectTrigger::AlreadyRunning => {
                debug!("Reconnect already running in guild {}", guild_id);
            }
            ReconnectTrigger::Refused(reason) => {
                debug!("Reconnect refused in guild {}: {:?}", guild_id, reason);
                state.is_playing = false;
            }
        }
    }

    fn begin_reconnect_attempt(&self, state: &mut GuildPlayback, guild_id: GuildId) -> AttemptDecision {
        let decision = state.begin_reconnect_attempt(&self.settings.reconnect);
        if decision == AttemptDecision::Abort(AbortReason::Exhausted) {
            warn!(
                "❌ Giving up on voice in guild {} after {} attempts",
                guild_id, state.reconnect_attempts
            );
        }
        decision
    }

    async fn reconnect_succeeded(
        &self,
        state: &mut GuildPlayback,
        guild_id: GuildId,
        session: Arc<dyn VoiceSession>,
    ) {
        match state.reconnect_succeeded(session.clone()) {
            Reattached::Resume(Some(track)) => {
                info!("▶️ Reconnected in guild {}, resuming {}", guild_id, track.title);
                self.submit(state, guild_id, session.as_ref(), track).await;
            }
            Reattached::Resume(None) => {
                info!("✅ Reconnected in guild {}", guild_id);
                self.play_next(state, guild_id).await;
            }
            Reattached::Orphaned(orphan) => {
                debug!("Stop arrived while reconnecting in guild {}, leaving again", guild_id);
                orphan.disconnect().await;
            }
            Reattached::Superseded => {
                debug!("Guild {} was rejoined while reconnecting", guild_id);
            }
        }
    }

    async fn membership_changed(&self, state: &mut GuildPlayback, guild_id: GuildId, channel_id: ChannelId) {
        let Some(session) = state.session.clone() else {
            return;
        };
        if !session.is_connected().await || session.current_channel().await != Some(channel_id) {
            return;
        }

        let (Some(bot), Some(channel)) = (
            self.directory.current_user(),
            self.directory.channel(guild_id, channel_id),
        ) else {
            return;
        };

        if channel.members.as_slice() == [bot] {
            info!("🚪 Alone in {} (guild {}), leaving", channel.name, guild_id);
            if let Some(session) = state.release() {
                session.disconnect().await;
            }
        }
    }
}
