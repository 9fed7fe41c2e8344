//! Reassembly of downloaded segments into one output file.
//!
//! Directory enumeration order is arbitrary, so segments are ordered by the
//! sequence parsed from their names before anything is concatenated.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{AssembleConfig, ConcatMode};
use crate::error::{Result, TimefreeError};
use crate::fetcher::PARTIAL_SUFFIX;

const MANIFEST_NAME: &str = "concat.ffconcat";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    /// Digit run with leading zeros stripped.
    Number(String),
    Text(String),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Number(a), Chunk::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Chronological sort key of a segment name: digit runs compare numerically,
/// so `seg_10` sorts after `seg_9` and timestamped names sort by time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceKey(Vec<Chunk>);

impl SequenceKey {
    pub fn parse(name: &str) -> Self {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut in_digits = false;

        for c in name.chars() {
            let digit = c.is_ascii_digit();
            if !current.is_empty() && digit != in_digits {
                chunks.push(Self::chunk(std::mem::take(&mut current), in_digits));
            }
            in_digits = digit;
            current.push(c);
        }
        if !current.is_empty() {
            chunks.push(Self::chunk(current, in_digits));
        }
        Self(chunks)
    }

    fn chunk(run: String, digits: bool) -> Chunk {
        if digits {
            let trimmed = run.trim_start_matches('0');
            Chunk::Number(if trimmed.is_empty() { "0".to_owned() } else { trimmed.to_owned() })
        } else {
            Chunk::Text(run)
        }
    }
}

/// Downloaded segment files in `dir`, in chronological order.
pub async fn collect_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut named = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) || name == MANIFEST_NAME {
            continue;
        }
        named.push((SequenceKey::parse(&name), name));
    }
    named.sort();
    Ok(named.into_iter().map(|(_, name)| dir.join(name)).collect())
}

/// ffconcat manifest listing `segments` in the given order.
pub fn concat_manifest(segments: &[PathBuf]) -> String {
    let mut manifest = String::from("ffconcat version 1.0\n");
    for path in segments {
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        manifest.push_str(&format!("file '{escaped}'\n"));
    }
    manifest
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleReport {
    pub segments: usize,
    pub output: PathBuf,
}

pub struct Assembler {
    config: AssembleConfig,
    token: CancellationToken,
}

impl Assembler {
    pub fn new(config: AssembleConfig, token: CancellationToken) -> Self {
        Self { config, token }
    }

    #[instrument(skip(self), fields(mode = ?self.config.mode))]
    pub async fn assemble(&self, dest_dir: &Path, output: &Path) -> Result<AssembleReport> {
        let segments = collect_segments(dest_dir).await?;
        if segments.is_empty() {
            return Err(TimefreeError::assemble(format!(
                "no segments found in {}",
                dest_dir.display()
            )));
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(segments = segments.len(), output = %output.display(), "Assembling");

        match self.config.mode {
            ConcatMode::Ffmpeg => self.concat_ffmpeg(dest_dir, &segments, output).await?,
            ConcatMode::Binary => concat_binary(&segments, output).await?,
        }

        info!(segments = segments.len(), output = %output.display(), "Assembled program");
        if !self.config.keep_segments {
            remove_segments(&segments).await?;
        }
        Ok(AssembleReport {
            segments: segments.len(),
            output: output.to_path_buf(),
        })
    }

    async fn concat_ffmpeg(&self, dest_dir: &Path, segments: &[PathBuf], output: &Path) -> Result<()> {
        let manifest_path = dest_dir.join(MANIFEST_NAME);
        tokio::fs::write(&manifest_path, concat_manifest(segments)).await?;

        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&manifest_path)
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            TimefreeError::assemble(format!(
                "failed to spawn {}: {e}",
                self.config.ffmpeg_path.display()
            ))
        })?;

        let result = tokio::select! {
            _ = self.token.cancelled() => Err(TimefreeError::Cancelled),
            output = child.wait_with_output() => Ok(output?),
        };
        let _ = tokio::fs::remove_file(&manifest_path).await;

        let finished = result?;
        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            return Err(TimefreeError::assemble(format!(
                "ffmpeg exited with {}: {}",
                finished.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

async fn concat_binary(segments: &[PathBuf], output: &Path) -> Result<()> {
    let mut partial = output.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let mut file = tokio::fs::File::create(&partial).await?;
    for segment in segments {
        let mut input = tokio::fs::File::open(segment).await?;
        tokio::io::copy(&mut input, &mut file).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&partial, output).await?;
    Ok(())
}

async fn remove_segments(segments: &[PathBuf]) -> Result<()> {
    for segment in segments {
        tokio::fs::remove_file(segment).await?;
    }
    Ok(())
}
