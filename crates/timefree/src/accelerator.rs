// Parallel acceleration: many seeked playback sessions against the same program,
// run in bounded batches, so more program time is harvested per wall-clock
// minute than a single real-time session allows.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indicatif::ProgressStyle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::auth::AuthContext;
use crate::config::TimefreeConfig;
use crate::error::{Result, TimefreeError};
use crate::fetcher::{FetchSummary, SegmentFetcher};
use crate::playlist::{ChainReport, PlaylistChain, StreamSession};
use crate::schedule::ProgramMetadata;
use crate::timestamp::Timestamp;
use crate::transport::Transport;

/// Seek checkpoints for a program: the unseeked start, then one checkpoint per
/// `interval` strictly inside `(start, end)`, then `end` itself.
pub fn checkpoints(
    start: Timestamp,
    end: Timestamp,
    interval: Duration,
) -> Result<Vec<Option<Timestamp>>> {
    if interval.is_zero() {
        return Err(TimefreeError::config("checkpoint interval must be non-zero"));
    }

    let mut points = vec![None];
    let mut offset = interval;
    while let Some(point) = start.checked_add(offset) {
        if point >= end {
            break;
        }
        points.push(Some(point));
        offset += interval;
    }
    points.push(Some(end));
    Ok(points)
}

/// Split checkpoints into batches of at most `download_rate` sessions.
pub fn batches<T>(items: &[T], download_rate: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(download_rate.max(1))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccelerationReport {
    pub batches: usize,
    pub sessions: usize,
    pub failed_sessions: usize,
    pub fetch: FetchSummary,
}

pub struct ParallelAccelerator {
    transport: Arc<dyn Transport>,
    auth: Arc<AuthContext>,
    config: Arc<TimefreeConfig>,
    fetcher: SegmentFetcher,
    token: CancellationToken,
}

impl ParallelAccelerator {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<AuthContext>,
        config: Arc<TimefreeConfig>,
        token: CancellationToken,
    ) -> Self {
        let fetcher = SegmentFetcher::new(transport.clone(), config.retry.clone(), token.clone());
        Self {
            transport,
            auth,
            config,
            fetcher,
            token,
        }
    }

    /// Download every segment of `program` into `dest_dir`, accelerated or as a
    /// single real-time session depending on configuration.
    pub async fn download(&self, program: &ProgramMetadata, dest_dir: &Path) -> Result<AccelerationReport> {
        self.config.validate()?;
        tokio::fs::create_dir_all(dest_dir).await?;

        if self.config.accelerator.enabled {
            self.run(program, dest_dir).await
        } else {
            self.run_single(program, dest_dir).await
        }
    }

    /// Batched, seeked sessions. Batches run strictly one after another;
    /// sessions inside a batch run concurrently.
    pub async fn run(&self, program: &ProgramMetadata, dest_dir: &Path) -> Result<AccelerationReport> {
        let interval = self.config.accelerator.checkpoint_interval;
        let rate = self.config.accelerator.download_rate;
        let points = checkpoints(program.start, program.end, interval)?;
        let polls = self.config.playlist.polls_for(interval);

        let span = info_span!("accelerate", station = %program.station_id, start = %program.start);
        if let Ok(style) = ProgressStyle::with_template(
            "{span_child_prefix}{spinner:.green} [{bar:30.green/white}] {pos}/{len} sessions {msg}",
        ) {
            span.pb_set_style(&style.progress_chars("=> "));
        }
        span.pb_set_length(points.len() as u64);
        span.pb_set_message(&program.title);

        info!(
            checkpoints = points.len(),
            download_rate = rate,
            polls_per_session = polls,
            "Starting accelerated download"
        );

        let mut report = AccelerationReport::default();
        async {
            for (index, batch) in batches(&points, rate).enumerate() {
                if self.token.is_cancelled() {
                    return Err(TimefreeError::Cancelled);
                }

                let sessions = batch
                    .iter()
                    .map(|seek| StreamSession::seeked(program, *seek, polls));
                let results = join_all(sessions.map(|session| self.run_session(session, dest_dir))).await;

                let mut failed = 0;
                for result in results {
                    match result {
                        Ok(_) => {}
                        Err(TimefreeError::Cancelled) => return Err(TimefreeError::Cancelled),
                        Err(e) => {
                            warn!(error = %e, "Session failed");
                            failed += 1;
                        }
                    }
                    Span::current().pb_inc(1);
                }

                report.batches += 1;
                report.sessions += batch.len();
                report.failed_sessions += failed;
                info!(
                    batch = index + 1,
                    sessions = batch.len(),
                    failed,
                    "Batch finished"
                );
            }
            Ok(())
        }
        .instrument(span)
        .await?;

        report.fetch = self.fetcher.stats().summary();
        Ok(report)
    }

    /// One unseeked session walking the whole program in real time.
    pub async fn run_single(&self, program: &ProgramMetadata, dest_dir: &Path) -> Result<AccelerationReport> {
        info!(duration_secs = program.duration().as_secs(), "Starting real-time download");
        self.run_session(StreamSession::full(program), dest_dir).await?;
        Ok(AccelerationReport {
            batches: 1,
            sessions: 1,
            failed_sessions: 0,
            fetch: self.fetcher.stats().summary(),
        })
    }

    async fn run_session(&self, session: StreamSession, dest_dir: &Path) -> Result<ChainReport> {
        PlaylistChain::new(
            session,
            self.transport.clone(),
            self.auth.clone(),
            self.config.service.clone(),
            self.config.playlist.clone(),
            self.config.retry.clone(),
            self.token.clone(),
        )
        .run(&self.fetcher, dest_dir)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaylistConfig;
    use crate::retry::RetryPolicy;
    use crate::test_support::{ScriptedTransport, ok, query_value};
    use reqwest::header::HeaderMap;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn fifteen_minute_program_in_one_minute_steps() {
        let start = ts("20240101120000");
        let end = ts("20240101121500");
        let points = checkpoints(start, end, Duration::from_secs(60)).unwrap();

        assert_eq!(points.len(), 16);
        assert_eq!(points[0], None);
        assert_eq!(points[1], Some(ts("20240101120100")));
        assert_eq!(points[14], Some(ts("20240101121400")));
        assert_eq!(points[15], Some(end));

        let sizes: Vec<_> = batches(&points, 10).map(<[_]>::len).collect();
        assert_eq!(sizes, [10, 6]);
    }

    #[test]
    fn long_program_in_ten_minute_steps() {
        let start = ts("20240101120000");
        let end = ts("20240101143000");
        let points = checkpoints(start, end, Duration::from_secs(600)).unwrap();
        assert_eq!(points.len(), 16);
        let sizes: Vec<_> = batches(&points, 10).map(<[_]>::len).collect();
        assert_eq!(sizes, [10, 6]);
    }

    #[test]
    fn checkpoints_never_repeat_the_end() {
        let start = ts("20240101120000");
        let end = ts("20240101120300");
        let points = checkpoints(start, end, Duration::from_secs(60)).unwrap();
        assert_eq!(
            points,
            vec![
                None,
                Some(ts("20240101120100")),
                Some(ts("20240101120200")),
                Some(end)
            ]
        );
        assert!(checkpoints(start, end, Duration::ZERO).is_err());
    }

    fn program() -> ProgramMetadata {
        ProgramMetadata {
            station_id: "TBS".into(),
            start: ts("20240101120000"),
            end: ts("20240101120300"),
            title: "Three minutes".into(),
        }
    }

    fn auth() -> Arc<AuthContext> {
        Arc::new(AuthContext {
            headers: HeaderMap::new(),
            area_id: "JP13".into(),
        })
    }

    fn config(download_rate: usize, enabled: bool) -> Arc<TimefreeConfig> {
        let mut config = TimefreeConfig::default();
        config.accelerator.download_rate = download_rate;
        config.accelerator.enabled = enabled;
        config.playlist = PlaylistConfig {
            segment_duration: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
        };
        config.retry = RetryPolicy::none();
        Arc::new(config)
    }

    const WINDOW: u64 = 14;

    /// Serves a window of fourteen five-second segments starting at the seek
    /// offset (or the program start), named by their offset in seconds.
    /// Neighbouring one-minute checkpoints therefore overlap by two segments.
    fn respond(url: &url::Url) -> crate::error::Result<crate::transport::HttpResponse> {
        let path = url.path();
        if path.ends_with("playlist.m3u8") {
            let seek = query_value(url, "seek").unwrap_or_else(|| "20240101120000".into());
            return ok(format!(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=48000\nhttps://media.example.invalid/chunks/{seek}.m3u8\n"
            ));
        }
        if let Some(seek) = path.strip_prefix("/chunks/").and_then(|p| p.strip_suffix(".m3u8")) {
            let first = ts(seek).duration_since(&ts("20240101120000")).as_secs();
            let mut body = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:5\n");
            for n in 0..WINDOW {
                body.push_str(&format!("#EXTINF:5,\n/seg/{:04}.aac\n", first + n * 5));
            }
            return ok(body);
        }
        ok(path.to_owned())
    }

    fn service() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(|url, _| respond(url)))
    }

    #[tokio::test]
    async fn overlapping_sessions_store_each_segment_once() {
        let transport = service();
        let dir = tempfile::tempdir().unwrap();
        let accelerator =
            ParallelAccelerator::new(transport.clone(), auth(), config(2, true), CancellationToken::new());

        let report = accelerator.download(&program(), dir.path()).await.unwrap();

        // unseeked + 12:01 + 12:02 + end, in batches of two
        assert_eq!(report.sessions, 4);
        assert_eq!(report.batches, 2);
        assert_eq!(report.failed_sessions, 0);
        assert!(report.fetch.failed.is_empty());

        // the end checkpoint reaches 12:03 + 65s
        let expected: Vec<u64> = (0..=245).step_by(5).collect();
        for offset in &expected {
            assert!(dir.path().join(format!("{offset:04}.aac")).exists(), "{offset}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), expected.len());
        assert_eq!(transport.count_path_suffix(".aac"), expected.len());
        assert_eq!(report.fetch.downloaded, expected.len() as u64);
    }

    #[tokio::test]
    async fn batches_do_not_overlap_in_time() {
        let transport = service();
        let dir = tempfile::tempdir().unwrap();
        let accelerator =
            ParallelAccelerator::new(transport.clone(), auth(), config(2, true), CancellationToken::new());
        accelerator.download(&program(), dir.path()).await.unwrap();

        // every master request of batch two comes after every media request of batch one
        let requests = transport.requests();
        let seek_of = |url: &url::Url| query_value(url, "seek");
        let first_batch_last_media = requests
            .iter()
            .rposition(|(url, _)| {
                url.path() == "/chunks/20240101120000.m3u8" || url.path() == "/chunks/20240101120100.m3u8"
            })
            .unwrap();
        let second_batch_first_master = requests
            .iter()
            .position(|(url, _)| {
                url.path().ends_with("playlist.m3u8")
                    && matches!(seek_of(url).as_deref(), Some("20240101120200") | Some("20240101120300"))
            })
            .unwrap();
        assert!(first_batch_last_media < second_batch_first_master);
    }

    #[tokio::test]
    async fn failing_session_does_not_abort_the_run() {
        let transport = Arc::new(ScriptedTransport::new(|url, _| {
            if query_value(url, "seek").as_deref() == Some("20240101120100") {
                return Err(TimefreeError::http_status(
                    reqwest::StatusCode::FORBIDDEN,
                    url.as_str(),
                    "master playlist fetch",
                ));
            }
            respond(url)
        }));
        let dir = tempfile::tempdir().unwrap();
        let accelerator =
            ParallelAccelerator::new(transport, auth(), config(4, true), CancellationToken::new());

        let report = accelerator.download(&program(), dir.path()).await.unwrap();
        assert_eq!(report.sessions, 4);
        assert_eq!(report.failed_sessions, 1);
        // covered by the unseeked and 12:02 sessions
        assert!(dir.path().join("0065.aac").exists());
        assert!(dir.path().join("0120.aac").exists());
        // only the failed 12:01 session would have reached these
        assert!(!dir.path().join("0070.aac").exists());
        assert!(!dir.path().join("0115.aac").exists());
    }

    #[tokio::test]
    async fn single_session_mode_walks_the_whole_program() {
        let transport = service();
        let dir = tempfile::tempdir().unwrap();
        let accelerator =
            ParallelAccelerator::new(transport.clone(), auth(), config(4, false), CancellationToken::new());

        let report = accelerator.download(&program(), dir.path()).await.unwrap();
        assert_eq!(report.sessions, 1);
        // three minutes of five second segments
        assert_eq!(transport.count_path_suffix("20240101120000.m3u8"), 36);
        assert_eq!(report.fetch.downloaded, WINDOW);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_batch() {
        let transport = service();
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let accelerator = ParallelAccelerator::new(transport.clone(), auth(), config(2, true), token);

        let err = accelerator.download(&program(), dir.path()).await.unwrap_err();
        assert!(matches!(err, TimefreeError::Cancelled));
        assert!(transport.requests().is_empty());
    }
}
