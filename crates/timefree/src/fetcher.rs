// Segment fetcher: downloads one segment into the destination directory.
//
// The file named by the segment key is the dedup record. Overlapping seek
// windows see the same segment many times; only the first one hits the network.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Result, TimefreeError};
use crate::playlist::SegmentRef;
use crate::retry::{RetryPolicy, retry_transient};
use crate::transport::Transport;

/// Suffix of in-progress writes; never a complete segment.
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: usize },
    /// A file with this key already exists; no request was made.
    AlreadyPresent,
    /// Another session is fetching this key right now.
    InFlight,
}

/// Accounting of fetch results across every session of a run.
#[derive(Debug, Default)]
pub struct FetchStats {
    downloaded: AtomicU64,
    already_present: AtomicU64,
    bytes: AtomicU64,
    failed: Mutex<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: u64,
    pub already_present: u64,
    pub bytes: u64,
    /// Keys that failed and were never fetched successfully afterwards.
    pub failed: Vec<String>,
}

impl FetchStats {
    fn record_download(&self, key: &str, bytes: usize) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.failed.lock().remove(key);
    }

    fn record_present(&self) {
        self.already_present.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, key: &str) {
        self.failed.lock().insert(key.to_owned());
    }

    pub fn summary(&self) -> FetchSummary {
        FetchSummary {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            failed: self.failed.lock().iter().cloned().collect(),
        }
    }
}

pub struct SegmentFetcher {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    token: CancellationToken,
    /// Keys currently being fetched or already written by this process.
    claims: Mutex<HashSet<String>>,
    stats: FetchStats,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, token: CancellationToken) -> Self {
        Self {
            transport,
            retry,
            token,
            claims: Mutex::new(HashSet::new()),
            stats: FetchStats::default(),
        }
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Fetch `segment` into `dest_dir` unless a file with its key already exists.
    ///
    /// Failures are logged and counted, then returned; they never affect
    /// sibling fetches.
    #[instrument(skip_all, fields(key = %segment.key))]
    pub async fn fetch(
        &self,
        segment: &SegmentRef,
        headers: &HeaderMap,
        dest_dir: &Path,
    ) -> Result<FetchOutcome> {
        let path = dest_dir.join(&segment.key);
        let present = match tokio::fs::try_exists(&path).await {
            Ok(present) => present,
            Err(e) => return Err(self.fail(segment, e.into())),
        };
        if present {
            self.stats.record_present();
            return Ok(FetchOutcome::AlreadyPresent);
        }
        if !self.claims.lock().insert(segment.key.clone()) {
            return Ok(FetchOutcome::InFlight);
        }

        match self.download(segment, headers, &path).await {
            Ok(bytes) => {
                debug!(bytes, "Downloaded segment");
                self.stats.record_download(&segment.key, bytes);
                Ok(FetchOutcome::Downloaded { bytes })
            }
            Err(TimefreeError::Cancelled) => {
                self.claims.lock().remove(&segment.key);
                Err(TimefreeError::Cancelled)
            }
            Err(e) => {
                // released so a later session may try again
                self.claims.lock().remove(&segment.key);
                Err(self.fail(segment, e))
            }
        }
    }

    /// Log and account a failure for `segment`, so no gap goes unreported.
    fn fail(&self, segment: &SegmentRef, error: TimefreeError) -> TimefreeError {
        self.stats.record_failure(&segment.key);
        warn!(uri = %segment.uri, error = %error, "Segment download failed");
        TimefreeError::SegmentDownload {
            key: segment.key.clone(),
            reason: error.to_string(),
        }
    }

    async fn download(&self, segment: &SegmentRef, headers: &HeaderMap, path: &Path) -> Result<usize> {
        let response = retry_transient(&self.retry, &self.token, "segment", || {
            self.transport.get(&segment.uri, headers, "segment fetch")
        })
        .await?;

        write_atomically(path, &response.body).await?;
        Ok(response.body.len())
    }
}

/// Write to a sibling `.part` file and rename it into place, so an existence
/// check never observes a half-written segment.
async fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        tokio::fs::rename(&partial, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, ok};
    use url::Url;

    fn segment(name: &str) -> SegmentRef {
        SegmentRef::from_uri(Url::parse(&format!("https://cdn.example.invalid/seg/{name}")).unwrap())
            .unwrap()
    }

    fn echo_transport() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(|url, _| ok(url.path().to_owned())))
    }

    #[tokio::test]
    async fn same_segment_is_fetched_once() {
        let transport = echo_transport();
        let fetcher = SegmentFetcher::new(transport.clone(), RetryPolicy::none(), CancellationToken::new());
        let dir = tempfile::tempdir().unwrap();
        let headers = HeaderMap::new();

        let first = fetcher.fetch(&segment("seg_001.aac"), &headers, dir.path()).await.unwrap();
        let second = fetcher.fetch(&segment("seg_001.aac"), &headers, dir.path()).await.unwrap();

        assert_eq!(first, FetchOutcome::Downloaded { bytes: "/seg/seg_001.aac".len() });
        assert_eq!(second, FetchOutcome::AlreadyPresent);
        assert_eq!(transport.requests().len(), 1);
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("seg_001.aac")).unwrap(),
            "/seg/seg_001.aac"
        );
    }

    #[tokio::test]
    async fn concurrent_duplicates_hit_the_network_once() {
        let transport = echo_transport();
        let fetcher = SegmentFetcher::new(transport.clone(), RetryPolicy::none(), CancellationToken::new());
        let dir = tempfile::tempdir().unwrap();
        let headers = HeaderMap::new();
        let seg = segment("seg_007.aac");

        let results = futures::future::join_all(
            (0..8).map(|_| fetcher.fetch(&seg, &headers, dir.path())),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(fetcher.stats().summary().downloaded, 1);
    }

    #[tokio::test]
    async fn existing_file_skips_the_network() {
        let transport = echo_transport();
        let fetcher = SegmentFetcher::new(transport.clone(), RetryPolicy::none(), CancellationToken::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seg_002.aac"), b"earlier run").unwrap();

        let outcome = fetcher
            .fetch(&segment("seg_002.aac"), &HeaderMap::new(), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::AlreadyPresent);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failure_is_isolated_and_accounted() {
        let transport = Arc::new(ScriptedTransport::new(|url, _| {
            if url.path().ends_with("bad.aac") {
                Err(TimefreeError::http_status(
                    reqwest::StatusCode::NOT_FOUND,
                    url.as_str(),
                    "segment fetch",
                ))
            } else {
                ok("audio")
            }
        }));
        let fetcher = SegmentFetcher::new(transport, RetryPolicy::none(), CancellationToken::new());
        let dir = tempfile::tempdir().unwrap();
        let headers = HeaderMap::new();

        let bad_seg = segment("bad.aac");
        let good_seg = segment("good.aac");
        let (bad, good) = tokio::join!(
            fetcher.fetch(&bad_seg, &headers, dir.path()),
            fetcher.fetch(&good_seg, &headers, dir.path()),
        );
        assert!(matches!(bad, Err(TimefreeError::SegmentDownload { ref key, .. }) if key == "bad.aac"));
        assert!(good.is_ok());

        let summary = fetcher.stats().summary();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, vec!["bad.aac".to_owned()]);
        // no partial file is left behind
        assert!(!dir.path().join("bad.aac").exists());
        assert!(!dir.path().join("bad.aac.part").exists());
    }

    #[tokio::test]
    async fn unreadable_destination_is_accounted() {
        let transport = echo_transport();
        let fetcher = SegmentFetcher::new(transport.clone(), RetryPolicy::none(), CancellationToken::new());
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the segment directory should be
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = fetcher
            .fetch(&segment("seg_009.aac"), &HeaderMap::new(), &blocker)
            .await
            .unwrap_err();

        assert!(matches!(err, TimefreeError::SegmentDownload { ref key, .. } if key == "seg_009.aac"));
        assert_eq!(fetcher.stats().summary().failed, vec!["seg_009.aac".to_owned()]);
        assert!(transport.requests().is_empty());
    }
}
