// Playlist chain: master playlist -> first media playlist -> repeated refreshes
// of the rotating media window, fetching every newly visible segment.
//
// The media window only keeps a segment visible for a fixed lifetime and there
// is no backfill, so refreshes must never be spaced wider than one segment.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use m3u8_rs::{Playlist, parse_playlist_res};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::auth::AuthContext;
use crate::config::{PlaylistConfig, ServiceContract};
use crate::error::{Result, TimefreeError};
use crate::fetcher::SegmentFetcher;
use crate::retry::{RetryPolicy, retry_transient};
use crate::schedule::ProgramMetadata;
use crate::timestamp::Timestamp;
use crate::transport::Transport;

/// One simulated playback session against a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub station_id: String,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Playback offset; `None` starts at the natural program start.
    pub seek: Option<Timestamp>,
    /// Explicit refresh bound. `None` walks the whole program.
    pub max_polls: Option<u32>,
}

impl StreamSession {
    /// A single real-time session covering the whole program.
    pub fn full(program: &ProgramMetadata) -> Self {
        Self {
            station_id: program.station_id.clone(),
            start: program.start,
            end: program.end,
            seek: None,
            max_polls: None,
        }
    }

    /// A session anchored at `seek` that only walks one checkpoint slice.
    pub fn seeked(program: &ProgramMetadata, seek: Option<Timestamp>, max_polls: u32) -> Self {
        Self {
            seek,
            max_polls: Some(max_polls),
            ..Self::full(program)
        }
    }

    pub fn master_url(&self, service: &ServiceContract) -> Result<Url> {
        let mut url = Url::parse(&service.playlist_url).map_err(|e| {
            TimefreeError::config(format!("invalid playlist URL {}: {e}", service.playlist_url))
        })?;
        {
            let start = self.start.to_string();
            let end = self.end.to_string();
            let mut query = url.query_pairs_mut();
            query
                .append_pair("station_id", &self.station_id)
                .append_pair("start_at", &start)
                .append_pair("ft", &start)
                .append_pair("end_at", &end)
                .append_pair("to", &end);
            if let Some(seek) = &self.seek {
                query.append_pair("seek", &seek.to_string());
            }
            for (key, value) in &service.playlist_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub fn seek_label(&self) -> String {
        self.seek
            .map(|seek| seek.to_string())
            .unwrap_or_else(|| "start".to_owned())
    }

    pub fn poll_bound(&self, config: &PlaylistConfig) -> u32 {
        self.max_polls
            .unwrap_or_else(|| config.polls_for(self.end.duration_since(&self.start)))
    }
}

/// A fetchable segment plus the stable key it is stored, deduplicated and ordered by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentRef {
    pub uri: Url,
    pub key: String,
}

impl SegmentRef {
    /// Key is the last path component of the URI.
    pub fn from_uri(uri: Url) -> Result<Self> {
        let key = uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .map(str::to_owned)
            .ok_or_else(|| {
                TimefreeError::parse("media playlist", format!("segment URI {uri} has no file name"))
            })?;
        Ok(Self { uri, key })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    Init,
    Resolved { media_url: Url },
    Polling { media_url: Url, polls: u32 },
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub polls: u32,
    pub segments_seen: usize,
}

pub struct PlaylistChain {
    session: StreamSession,
    transport: Arc<dyn Transport>,
    auth: Arc<AuthContext>,
    service: ServiceContract,
    config: PlaylistConfig,
    retry: RetryPolicy,
    token: CancellationToken,
    state: ChainState,
    bound: u32,
    seen: HashSet<String>,
}

impl PlaylistChain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: StreamSession,
        transport: Arc<dyn Transport>,
        auth: Arc<AuthContext>,
        service: ServiceContract,
        config: PlaylistConfig,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        let bound = session.poll_bound(&config);
        Self {
            session,
            transport,
            auth,
            service,
            config,
            retry,
            token,
            state: ChainState::Init,
            bound,
            seen: HashSet::new(),
        }
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn poll_bound(&self) -> u32 {
        self.bound
    }

    /// `Init -> Resolved`: pick the first media playlist listed by the master.
    pub async fn resolve(&mut self) -> Result<()> {
        if self.state != ChainState::Init {
            return Err(TimefreeError::config("playlist chain already resolved"));
        }
        match self.fetch_media_url().await {
            Ok(media_url) => {
                debug!(%media_url, "Resolved media playlist");
                self.state = ChainState::Resolved { media_url };
                Ok(())
            }
            Err(e) => {
                self.state = ChainState::Failed;
                Err(e)
            }
        }
    }

    async fn fetch_media_url(&self) -> Result<Url> {
        let master_url = self.session.master_url(&self.service)?;
        let body = retry_transient(&self.retry, &self.token, "master playlist", || {
            self.transport
                .get(&master_url, &self.auth.headers, "master playlist fetch")
        })
        .await?
        .body;

        match parse_playlist_res(&body) {
            Ok(Playlist::MasterPlaylist(master)) => {
                let first = master.variants.first().ok_or_else(|| {
                    TimefreeError::parse("master playlist", "no media playlist listed")
                })?;
                master_url.join(&first.uri).map_err(|e| {
                    TimefreeError::parse("master playlist", format!("bad variant URI: {e}"))
                })
            }
            // Some endpoints answer with the media playlist directly.
            Ok(Playlist::MediaPlaylist(_)) => Ok(master_url),
            Err(e) => Err(TimefreeError::parse("master playlist", e.to_string())),
        }
    }

    /// One refresh of the media window. Returns segments this session has not
    /// seen before and moves to `Done` once the bound is reached.
    pub async fn poll(&mut self) -> Result<Vec<SegmentRef>> {
        let (media_url, polls) = match &self.state {
            ChainState::Resolved { media_url } => (media_url.clone(), 0),
            ChainState::Polling { media_url, polls } => (media_url.clone(), *polls),
            state => {
                return Err(TimefreeError::config(format!(
                    "cannot poll a playlist chain in state {state:?}"
                )));
            }
        };

        let fresh = match self.fetch_segments(&media_url).await {
            Ok(segments) => segments
                .into_iter()
                .filter(|segment| self.seen.insert(segment.key.clone()))
                .collect::<Vec<_>>(),
            Err(e) => {
                self.state = ChainState::Failed;
                return Err(e);
            }
        };

        let polls = polls + 1;
        trace!(polls, bound = self.bound, fresh = fresh.len(), "Polled media playlist");
        self.state = if polls >= self.bound {
            ChainState::Done
        } else {
            ChainState::Polling { media_url, polls }
        };
        Ok(fresh)
    }

    async fn fetch_segments(&self, media_url: &Url) -> Result<Vec<SegmentRef>> {
        let mut url = media_url.clone();
        // defeats intermediate caches so every refresh sees the current window
        url.query_pairs_mut()
            .append_pair("_", &chrono::Utc::now().timestamp_millis().to_string());

        let body = retry_transient(&self.retry, &self.token, "media playlist", || {
            self.transport.get(&url, &self.auth.headers, "media playlist fetch")
        })
        .await?
        .body;

        let playlist = match parse_playlist_res(&body) {
            Ok(Playlist::MediaPlaylist(playlist)) => playlist,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(TimefreeError::parse(
                    "media playlist",
                    "expected a segment index, got a master playlist",
                ));
            }
            Err(e) => return Err(TimefreeError::parse("media playlist", e.to_string())),
        };

        playlist
            .segments
            .iter()
            .map(|segment| {
                let uri = media_url.join(&segment.uri).map_err(|e| {
                    TimefreeError::parse("media playlist", format!("bad segment URI: {e}"))
                })?;
                SegmentRef::from_uri(uri)
            })
            .collect()
    }

    /// Drive the chain to completion, handing every new segment to `fetcher`.
    ///
    /// Refreshes are paced from their own start time and downloads run
    /// beside the poll loop, so slow or retried segment fetches never widen
    /// the gap between two refreshes. Segment failures are recorded by the
    /// fetcher and do not stop the chain.
    #[instrument(
        name = "session",
        skip_all,
        fields(
            station = %self.session.station_id,
            seek = %self.session.seek_label(),
        )
    )]
    pub async fn run(mut self, fetcher: &SegmentFetcher, dest_dir: &Path) -> Result<ChainReport> {
        self.resolve().await?;

        let auth = self.auth.clone();
        let headers = &auth.headers;
        let mut downloads = FuturesUnordered::new();
        let mut report = ChainReport::default();

        loop {
            let deadline = Instant::now() + self.config.poll_interval;
            let fresh = self.poll().await?;
            report.polls += 1;
            report.segments_seen += fresh.len();
            for segment in fresh {
                downloads.push(async move { fetcher.fetch(&segment, headers, dest_dir).await });
            }

            if self.state == ChainState::Done {
                break;
            }

            // keep downloads moving until the next refresh is due
            loop {
                tokio::select! {
                    _ = self.token.cancelled() => {
                        warn!("Session cancelled");
                        self.state = ChainState::Failed;
                        return Err(TimefreeError::Cancelled);
                    }
                    _ = sleep_until(deadline) => break,
                    Some(result) = downloads.next(), if !downloads.is_empty() => {
                        // other failures are already logged and counted by the fetcher
                        if matches!(result, Err(TimefreeError::Cancelled)) {
                            self.state = ChainState::Failed;
                            return Err(TimefreeError::Cancelled);
                        }
                    }
                }
            }
        }

        while let Some(result) = downloads.next().await {
            if matches!(result, Err(TimefreeError::Cancelled)) {
                self.state = ChainState::Failed;
                return Err(TimefreeError::Cancelled);
            }
        }

        debug!(polls = report.polls, segments = report.segments_seen, "Session finished");
        Ok(report)
    }
}
