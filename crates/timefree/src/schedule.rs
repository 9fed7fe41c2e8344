// Program resolution against the per-day, per-region schedule document.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ServiceContract;
use crate::error::{Result, TimefreeError};
use crate::retry::{RetryPolicy, retry_transient};
use crate::timestamp::Timestamp;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMetadata {
    pub station_id: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub title: String,
}

impl ProgramMetadata {
    pub fn duration(&self) -> Duration {
        self.end.duration_since(&self.start)
    }
}

/// Outcome of a schedule lookup. `NotFound` is terminal and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramLookup {
    Found(ProgramMetadata),
    NotFound,
}

#[derive(Debug, Deserialize)]
struct ScheduleDocument {
    stations: StationList,
}

#[derive(Debug, Deserialize)]
struct StationList {
    #[serde(rename = "station", default)]
    entries: Vec<StationEntry>,
}

#[derive(Debug, Deserialize)]
struct StationEntry {
    #[serde(rename = "@id")]
    id: String,
    progs: Option<ProgramList>,
}

#[derive(Debug, Deserialize)]
struct ProgramList {
    #[serde(rename = "prog", default)]
    entries: Vec<ProgramEntry>,
}

#[derive(Debug, Deserialize)]
struct ProgramEntry {
    #[serde(rename = "@ft")]
    ft: String,
    #[serde(rename = "@to")]
    to: String,
    #[serde(default)]
    title: String,
}

/// Look up `station_id` and the program starting exactly at `start_at` in a
/// schedule document. The start time comparison is string exact.
pub fn find_program(document: &str, station_id: &str, start_at: &Timestamp) -> Result<ProgramLookup> {
    let schedule: ScheduleDocument = quick_xml::de::from_str(document)
        .map_err(|e| TimefreeError::parse("schedule document", e.to_string()))?;

    let Some(station) = schedule
        .stations
        .entries
        .into_iter()
        .find(|s| s.id == station_id)
    else {
        debug!(station_id, "Station absent from schedule");
        return Ok(ProgramLookup::NotFound);
    };

    let wanted = start_at.to_string();
    let Some(program) = station
        .progs
        .into_iter()
        .flat_map(|list| list.entries)
        .find(|p| p.ft == wanted)
    else {
        debug!(station_id, start_at = %wanted, "No program starts at the requested time");
        return Ok(ProgramLookup::NotFound);
    };

    let start = Timestamp::parse(&program.ft)
        .map_err(|e| TimefreeError::parse("schedule document", e.to_string()))?;
    let end = Timestamp::parse(&program.to)
        .map_err(|e| TimefreeError::parse("schedule document", e.to_string()))?;
    if end <= start {
        return Err(TimefreeError::parse(
            "schedule document",
            format!("program `{}` ends ({end}) before it starts ({start})", program.title),
        ));
    }

    Ok(ProgramLookup::Found(ProgramMetadata {
        station_id: station_id.to_owned(),
        start,
        end,
        title: program.title.trim().to_owned(),
    }))
}

pub struct ProgramResolver {
    transport: Arc<dyn Transport>,
    service: ServiceContract,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl ProgramResolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        service: ServiceContract,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            service,
            retry,
            token,
        }
    }

    #[instrument(skip(self), fields(start_at = %start_at))]
    pub async fn resolve(
        &self,
        station_id: &str,
        start_at: &Timestamp,
        area_id: &str,
    ) -> Result<ProgramLookup> {
        let date = start_at.schedule_date();
        let raw = self.service.schedule_url(&date, area_id);
        let url = Url::parse(&raw)
            .map_err(|e| TimefreeError::config(format!("invalid schedule URL {raw}: {e}")))?;
        debug!(%url, date, "Fetching schedule");

        let headers = HeaderMap::new();
        let response = retry_transient(&self.retry, &self.token, "schedule", || {
            self.transport.get(&url, &headers, "schedule fetch")
        })
        .await?;

        find_program(response.text()?, station_id, start_at)
    }
}
