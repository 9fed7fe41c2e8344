use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TimefreeError};
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP client settings shared by every request of a run.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Overall timeout for a single request, body included.
    /// A stalled upstream response fails after this instead of blocking its session.
    pub timeout: Duration,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            // one accelerator batch opens up to `download_rate` playlist sessions at once
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Fixed protocol parameters of the streaming service.
///
/// These are part of the service contract rather than tunables; requests
/// built from altered values are rejected upstream.
#[derive(Debug, Clone)]
pub struct ServiceContract {
    /// Shared secret the partial key is sliced from.
    pub auth_key: String,
    pub auth1_url: String,
    pub auth2_url: String,
    pub app: String,
    pub app_version: String,
    pub user: String,
    pub device: String,
    /// Schedule document URL with `{date}` and `{area}` placeholders.
    pub schedule_url_template: String,
    pub playlist_url: String,
    /// Constant query parameters appended to every master playlist request.
    pub playlist_params: Vec<(String, String)>,
}

impl Default for ServiceContract {
    fn default() -> Self {
        Self {
            auth_key: "bcd151073c03b352e1ef2fd66c32209da9ca0afa".to_owned(),
            auth1_url: "https://radiko.jp/v2/api/auth1".to_owned(),
            auth2_url: "https://radiko.jp/v2/api/auth2".to_owned(),
            app: "pc_html5".to_owned(),
            app_version: "0.0.1".to_owned(),
            user: "user".to_owned(),
            device: "pc".to_owned(),
            schedule_url_template: "https://radiko.jp/v3/program/date/{date}/{area}.xml"
                .to_owned(),
            playlist_url: "https://radiko.jp/v2/api/ts/playlist.m3u8".to_owned(),
            playlist_params: vec![
                ("l".to_owned(), "15".to_owned()),
                ("type".to_owned(), "b".to_owned()),
            ],
        }
    }
}

impl ServiceContract {
    pub fn schedule_url(&self, date: &str, area_id: &str) -> String {
        self.schedule_url_template
            .replace("{date}", date)
            .replace("{area}", area_id)
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Duration of one media segment; the live window rotates at this granularity.
    pub segment_duration: Duration,
    /// Sleep between two media playlist refreshes. Never above `segment_duration`.
    pub poll_interval: Duration,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            segment_duration: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl PlaylistConfig {
    pub fn validate(&self) -> Result<()> {
        if self.segment_duration.is_zero() {
            return Err(TimefreeError::config("segment duration must be non-zero"));
        }
        if self.poll_interval > self.segment_duration {
            return Err(TimefreeError::config(format!(
                "poll interval {:?} exceeds segment duration {:?}; segments would rotate out unseen",
                self.poll_interval, self.segment_duration
            )));
        }
        Ok(())
    }

    /// Number of playlist refreshes needed to walk `span` of program time.
    pub fn polls_for(&self, span: Duration) -> u32 {
        let segment = self.segment_duration.as_millis().max(1);
        let polls = span.as_millis().div_ceil(segment);
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct AcceleratorConfig {
    /// Run several seeked sessions instead of one real-time session.
    pub enabled: bool,
    /// Sessions per batch; batches run one after another.
    pub download_rate: usize,
    /// Program time between two seek checkpoints; each session covers one slice.
    pub checkpoint_interval: Duration,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            download_rate: 16,
            checkpoint_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConcatMode {
    /// Lossless stream copy through the ffmpeg concat demuxer
    #[default]
    Ffmpeg,
    /// Plain byte concatenation, valid for self-framing ADTS AAC segments
    Binary,
}

#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub mode: ConcatMode,
    pub ffmpeg_path: PathBuf,
    pub keep_segments: bool,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            mode: ConcatMode::Ffmpeg,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            keep_segments: false,
        }
    }
}

impl AssembleConfig {
    pub fn output_extension(&self) -> &'static str {
        match self.mode {
            ConcatMode::Ffmpeg => "m4a",
            ConcatMode::Binary => "aac",
        }
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct TimefreeConfig {
    pub http: HttpConfig,
    pub service: ServiceContract,
    pub playlist: PlaylistConfig,
    pub accelerator: AcceleratorConfig,
    pub retry: RetryPolicy,
    pub assemble: AssembleConfig,
}

impl TimefreeConfig {
    pub fn validate(&self) -> Result<()> {
        self.playlist.validate()?;
        if self.accelerator.download_rate == 0 {
            return Err(TimefreeError::config("download rate must be at least 1"));
        }
        if self.accelerator.checkpoint_interval < self.playlist.segment_duration {
            return Err(TimefreeError::config(
                "checkpoint interval must cover at least one segment",
            ));
        }
        if self.service.auth_key.is_empty() {
            return Err(TimefreeError::config("service auth key is empty"));
        }
        Ok(())
    }
}
