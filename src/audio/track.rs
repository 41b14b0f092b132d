use serde::{Deserialize, Serialize};

/// A playable audio item with its resolved stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub url: String,
    pub title: String,
    pub duration_secs: u64,
    /// Display name of the member who requested the track
    pub requester: String,
    /// Direct audio stream, empty until an `AudioSource` resolves it
    #[serde(default)]
    pub stream_url: String,
}

impl Track {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        duration_secs: u64,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            duration_secs,
            requester: requester.into(),
            stream_url: String::new(),
        }
    }

    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = stream_url.into();
        self
    }

    /// Formats the duration as `M:SS`, or `H:MM:SS` from one hour up.
    pub fn format_duration(&self) -> String {
        format_duration(self.duration_secs)
    }
}

pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
