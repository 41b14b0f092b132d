pub mod ytdlp;

use async_trait::async_trait;

use crate::{audio::track::Track, error::FetchError};

pub use ytdlp::YtDlpSource;

/// Resolves a user supplied URL into a playable track.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Fetches metadata and a direct stream URL for `url`.
    async fn fetch_track(&self, url: &str, requester: &str) -> Result<Track, FetchError>;
}
