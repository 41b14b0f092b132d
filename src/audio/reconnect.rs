//! Reconnection supervisor.
//!
//! When a guild loses its voice connection while playing, a single retry loop
//! is spawned for it. Each cycle asks the playback loop to begin an attempt
//! (where the shared attempt counter and the exit conditions live), waits the
//! fixed delay, re-resolves the target channel and tries to connect. Outcomes
//! are posted back to the playback loop; the supervisor never touches guild
//! state directly.

use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        player::PlaybackHandle,
        state::GuildPlayback,
        track::Track,
        transport::{GuildDirectory, VoiceSession, VoiceTransport},
    },
    error::ConnectError,
};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Fixed wait before every connect attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            delay: RECONNECT_DELAY,
        }
    }
}

/// Connection phase stored per guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Connected,
    Reconnecting,
    Exhausted,
    Intentional,
}

/// Externally visible supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connected,
    /// Carries the number of attempts started so far
    AwaitingReconnect(u32),
    Exhausted,
    Intentional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    Intentional,
    NoTarget,
}

/// Result of asking for a reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// A new retry loop must be spawned
    Started,
    /// A loop is already running; the request was coalesced
    AlreadyRunning,
    Refused(RefusalReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// An explicit join took over the connection
    Superseded,
    Intentional,
    NoTarget,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    Proceed { attempt: u32, channel_id: ChannelId },
    Abort(AbortReason),
}

/// What to do with a session obtained by a successful reconnect.
pub(crate) enum Reattached {
    /// Session installed; resubmit this track, or pull the next one if `None`
    Resume(Option<Track>),
    /// A stop landed while connecting; the new session must be closed
    Orphaned(Arc<dyn VoiceSession>),
    /// A join already re-established the connection
    Superseded,
}

impl GuildPlayback {
    pub fn supervisor_state(&self) -> SupervisorState {
        match self.link {
            LinkPhase::Connected => SupervisorState::Connected,
            LinkPhase::Reconnecting => SupervisorState::AwaitingReconnect(self.reconnect_attempts),
            LinkPhase::Exhausted => SupervisorState::Exhausted,
            LinkPhase::Intentional => SupervisorState::Intentional,
        }
    }

    pub(crate) fn request_reconnect(&mut self) -> ReconnectTrigger {
        if self.intentional_disconnect {
            return ReconnectTrigger::Refused(RefusalReason::Intentional);
        }
        if self.target_channel_id.is_none() {
            return ReconnectTrigger::Refused(RefusalReason::NoTarget);
        }
        if self.link == LinkPhase::Reconnecting {
            return ReconnectTrigger::AlreadyRunning;
        }

        self.link = LinkPhase::Reconnecting;
        ReconnectTrigger::Started
    }

    /// Checks the exit conditions and, if the loop may continue, counts the
    /// attempt before the connect call is made.
    pub(crate) fn begin_reconnect_attempt(&mut self, policy: &ReconnectPolicy) -> AttemptDecision {
        if self.intentional_disconnect {
            self.link = LinkPhase::Intentional;
            return AttemptDecision::Abort(AbortReason::Intentional);
        }

        if self.link != LinkPhase::Reconnecting {
            return AttemptDecision::Abort(AbortReason::Superseded);
        }

        let Some(channel_id) = self.target_channel_id else {
            self.link = LinkPhase::Exhausted;
            self.is_playing = false;
            return AttemptDecision::Abort(AbortReason::NoTarget);
        };

        if self.reconnect_attempts >= policy.max_attempts {
            self.link = LinkPhase::Exhausted;
            self.is_playing = false;
            return AttemptDecision::Abort(AbortReason::Exhausted);
        }

        self.reconnect_attempts += 1;
        AttemptDecision::Proceed {
            attempt: self.reconnect_attempts,
            channel_id,
        }
    }

    pub(crate) fn reconnect_succeeded(&mut self, session: Arc<dyn VoiceSession>) -> Reattached {
        match self.link {
            LinkPhase::Reconnecting => {
                self.session = Some(session);
                self.reconnect_attempts = 0;
                self.link = LinkPhase::Connected;
                Reattached::Resume(self.queue.current().cloned())
            }
            LinkPhase::Intentional => Reattached::Orphaned(session),
            LinkPhase::Connected | LinkPhase::Exhausted => Reattached::Superseded,
        }
    }
}

/// Retry loop for one guild. Returns once the guild is reconnected or the
/// loop has been told to stop.
pub async fn supervise(
    guild_id: GuildId,
    handle: PlaybackHandle,
    transport: Arc<dyn VoiceTransport>,
    directory: Arc<dyn GuildDirectory>,
    policy: ReconnectPolicy,
) {
    loop {
        let (attempt, channel_id) = match handle.begin_reconnect_attempt(guild_id).await {
            Ok(AttemptDecision::Proceed {
                attempt,
                channel_id,
            }) => (attempt, channel_id),
            Ok(AttemptDecision::Abort(reason)) => {
                debug!("🔚 Reconnect loop for guild {} ended: {:?}", guild_id, reason);
                return;
            }
            Err(_) => return,
        };

        info!(
            "🔄 Reconnecting to voice in guild {} (attempt {}/{})",
            guild_id, attempt, policy.max_attempts
        );
        tokio::time::sleep(policy.delay).await;

        let result = match directory.channel(guild_id, channel_id) {
            Some(channel) => transport.connect(guild_id, channel.id).await,
            None => Err(ConnectError::ChannelNotFound(channel_id.get())),
        };

        match result {
            Ok(session) => {
                handle.reconnect_succeeded(guild_id, session);
                return;
            }
            Err(e) => {
                warn!(
                    "⚠️ Reconnect attempt {} failed in guild {}: {}",
                    attempt, guild_id, e
                );
                handle.reconnect_failed(guild_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeSession;

    fn playing_state() -> GuildPlayback {
        let mut state = GuildPlayback::new(100);
        state.record_join(ChannelId::new(7));
        state
            .queue
            .add(Track::new("u", "song", 60, "tester").with_stream_url("s://song"))
            .unwrap();
        state.queue.advance();
        state.is_playing = true;
        state
    }

    #[test]
    fn intentional_disconnect_refuses_without_counting() {
        let mut state = playing_state();
        state.intentional_disconnect = true;

        assert_eq!(
            state.request_reconnect(),
            ReconnectTrigger::Refused(RefusalReason::Intentional)
        );
        assert_eq!(state.reconnect_attempts(), 0);
        assert_eq!(state.supervisor_state(), SupervisorState::Connected);
    }

    #[test]
    fn missing_target_refuses() {
        let mut state = playing_state();
        state.target_channel_id = None;
        assert_eq!(
            state.request_reconnect(),
            ReconnectTrigger::Refused(RefusalReason::NoTarget)
        );
    }

    #[test]
    fn second_trigger_is_coalesced() {
        let mut state = playing_state();
        assert_eq!(state.request_reconnect(), ReconnectTrigger::Started);
        assert_eq!(state.request_reconnect(), ReconnectTrigger::AlreadyRunning);
        assert_eq!(
            state.supervisor_state(),
            SupervisorState::AwaitingReconnect(0)
        );
    }

    #[test]
    fn attempts_are_counted_before_connecting_and_capped() {
        let policy = ReconnectPolicy::default();
        let mut state = playing_state();
        state.request_reconnect();

        for expected in 1..=3 {
            assert_eq!(
                state.begin_reconnect_attempt(&policy),
                AttemptDecision::Proceed {
                    attempt: expected,
                    channel_id: ChannelId::new(7)
                }
            );
            assert_eq!(
                state.supervisor_state(),
                SupervisorState::AwaitingReconnect(expected)
            );
        }

        assert_eq!(
            state.begin_reconnect_attempt(&policy),
            AttemptDecision::Abort(AbortReason::Exhausted)
        );
        assert_eq!(state.supervisor_state(), SupervisorState::Exhausted);
        assert_eq!(state.reconnect_attempts(), 3);
        assert!(!state.is_playing());
    }

    #[test]
    fn stop_during_the_loop_is_seen_at_the_next_check() {
        let policy = ReconnectPolicy::default();
        let mut state = playing_state();
        state.request_reconnect();
        state.begin_reconnect_attempt(&policy);

        let _ = state.release();

        assert_eq!(
            state.begin_reconnect_attempt(&policy),
            AttemptDecision::Abort(AbortReason::Intentional)
        );
        assert_eq!(state.supervisor_state(), SupervisorState::Intentional);
    }

    #[test]
    fn join_supersedes_a_running_loop() {
        let policy = ReconnectPolicy::default();
        let mut state = playing_state();
        state.request_reconnect();
        state.begin_reconnect_attempt(&policy);

        state.record_join(ChannelId::new(8));

        assert_eq!(
            state.begin_reconnect_attempt(&policy),
            AttemptDecision::Abort(AbortReason::Superseded)
        );
        assert!(matches!(
            state.reconnect_succeeded(FakeSession::connected(ChannelId::new(7))),
            Reattached::Superseded
        ));
    }

    #[test]
    fn exhausted_only_leaves_through_join() {
        let policy = ReconnectPolicy {
            max_attempts: 1,
            delay: Duration::ZERO,
        };
        let mut state = playing_state();
        state.request_reconnect();
        state.begin_reconnect_attempt(&policy);
        state.begin_reconnect_attempt(&policy);
        assert_eq!(state.supervisor_state(), SupervisorState::Exhausted);

        // a later trigger runs straight into the cap again
        assert_eq!(state.request_reconnect(), ReconnectTrigger::Started);
        assert_eq!(
            state.begin_reconnect_attempt(&policy),
            AttemptDecision::Abort(AbortReason::Exhausted)
        );

        state.record_join(ChannelId::new(7));
        assert_eq!(state.supervisor_state(), SupervisorState::Connected);
        assert_eq!(state.reconnect_attempts(), 0);
    }

    #[test]
    fn success_resets_attempts_and_resumes_current() {
        let policy = ReconnectPolicy::default();
        let mut state = playing_state();
        state.request_reconnect();
        state.begin_reconnect_attempt(&policy);
        state.begin_reconnect_attempt(&policy);

        let session = FakeSession::connected(ChannelId::new(7));
        match state.reconnect_succeeded(session) {
            Reattached::Resume(Some(track)) => assert_eq!(track.stream_url, "s://song"),
            _ => panic!("expected the current track to be resumed"),
        }
        assert_eq!(state.reconnect_attempts(), 0);
        assert_eq!(state.supervisor_state(), SupervisorState::Connected);
        assert!(state.session.is_some());
    }

    #[test]
    fn success_after_stop_orphans_the_session() {
        let policy = ReconnectPolicy::default();
        let mut state = playing_state();
        state.request_reconnect();
        state.begin_reconnect_attempt(&policy);
        let _ = state.release();

        assert!(matches!(
            state.reconnect_succeeded(FakeSession::connected(ChannelId::new(7))),
            Reattached::Orphaned(_)
        ));
        assert!(state.session.is_none());
    }
}
