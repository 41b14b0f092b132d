//! Error types shared by the queue engine, the playback session and the
//! collaborators at its boundary.

use thiserror::Error;

/// Failures of positional queue mutations. The queue is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("index {index} is out of range for a queue of {len} tracks")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("the queue is full (max {max} tracks)")]
    Full { max: usize },
}

/// Failures while resolving a URL into a playable [`Track`](crate::audio::track::Track).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url `{0}`")]
    InvalidUrl(String),

    #[error("extractor failed: {0}")]
    Extractor(String),

    #[error("could not parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no playable audio stream for `{0}`")]
    Unavailable(String),

    #[error("extractor gave no answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures while joining a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("voice join failed: {0}")]
    Join(String),

    #[error("voice channel {0} no longer exists")]
    ChannelNotFound(u64),
}

/// Errors reported to callers of the playback handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("nothing is paused")]
    NothingPaused,

    #[error("the playback service has shut down")]
    ServiceClosed,
}
