use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::AudioSource;
use crate::{audio::track::Track, error::FetchError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(25);

/// Resolves tracks by shelling out to yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    binary: String,
    /// Raw `YOUTUBE_COOKIES` value: a cookie file path or a `Cookie` header
    youtube_cookies: Option<String>,
    timeout: Duration,
}

/// Subset of yt-dlp's `--dump-json` output.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    #[serde(default)]
    formats: Vec<Format>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
}

impl YtDlpSource {
    pub fn new(binary: impl Into<String>, youtube_cookies: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            youtube_cookies: youtube_cookies.filter(|c| !c.trim().is_empty()),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Upper bound for one yt-dlp run; the process is killed when it passes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(&self, url: &Url) -> Vec<String> {
        let mut args: Vec<String> = ["-j", "-f", "bestaudio/best", "--no-playlist", "--no-warnings"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(cookie_args(url, self.youtube_cookies.as_deref()));
        args.push(url.to_string());
        args
    }
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self::new("yt-dlp", None)
    }
}

#[async_trait]
impl AudioSource for YtDlpSource {
    async fn fetch_track(&self, url: &str, requester: &str) -> Result<Track, FetchError> {
        let parsed = parse_url(url)?;

        debug!("📊 Fetching info for {}", parsed);
        let run = Command::new(&self.binary)
            .args(self.args(&parsed))
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("⏰ yt-dlp timed out after {:?} for {}", self.timeout, parsed);
                return Err(FetchError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Extractor(stderr.trim().to_string()));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)?;
        let track = info.into_track(url, requester)?;
        info!("🎵 Resolved {} ({})", track.title, track.format_duration());
        Ok(track)
    }
}

impl YtDlpInfo {
    fn into_track(self, requested_url: &str, requester: &str) -> Result<Track, FetchError> {
        let stream_url = self
            .url
            .filter(|u| !u.is_empty())
            .or_else(|| {
                self.formats
                    .into_iter()
                    .rev()
                    .filter(|f| f.acodec.as_deref() != Some("none"))
                    .find_map(|f| f.url)
            })
            .ok_or_else(|| FetchError::Unavailable(requested_url.to_string()))?;

        let duration = self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0);
        Ok(Track::new(
            self.webpage_url.unwrap_or_else(|| requested_url.to_string()),
            self.title.unwrap_or_else(|| "Unknown".to_string()),
            duration as u64,
            requester,
        )
        .with_stream_url(stream_url))
    }
}

fn parse_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|_| FetchError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(FetchError::InvalidUrl(raw.to_string())),
    }
}

fn is_youtube(url: &Url) -> bool {
    match url.host_str() {
        Some(host) => {
            let host = host.trim_start_matches("www.");
            host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
        }
        None => false,
    }
}

/// Extra yt-dlp arguments carrying the configured YouTube cookies.
///
/// A value naming an existing file is passed with `--cookies`; anything else
/// is sent verbatim as a `Cookie` header. Only YouTube URLs get cookies.
pub fn cookie_args(url: &Url, cookies: Option<&str>) -> Vec<String> {
    let Some(cookies) = cookies.map(str::trim).filter(|c| !c.is_empty()) else {
        return Vec::new();
    };
    if !is_youtube(url) {
        return Vec::new();
    }

    if Path::new(cookies).is_file() {
        vec!["--cookies".to_string(), cookies.to_string()]
    } else {
        vec!["--add-header".to_string(), format!("Cookie: {}", cookies)]
    }
}
