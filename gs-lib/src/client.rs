//! HTTP client for the chunk-store gateway.
//!
//! Two access paths are supported (the gateway serves both):
//! path-by-path GETs of manifests and chunk bodies, and an aggregated
//! "progressive view" that returns a server-computed fetch plan for a
//! window. Transient failures (5xx, connect errors, timeouts) retry with
//! exponential backoff; 404s fail fast so the caller can degrade to
//! silence.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::{debug, warn};
use serde::Deserialize;

use crate::cache::DiskCache;
use crate::error::StoreError;
use crate::manifest::parse_manifest;
use crate::paths::{chunk_key_variants, manifest_key};
use crate::types::{ChunkMeta, DayManifest, FetchPlan, Granularity, PlanSource, PlannedChunk};

/// Abstraction over chunk retrieval so the engine can be driven by a mock
/// in tests. The production implementation is [`StoreClient`].
pub trait ChunkFetcher: Send + Sync {
    fn fetch_chunk(
        &self,
        station: &str,
        chunk: &ChunkMeta,
    ) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, the first included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Default per-chunk wall-clock limit.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    cache: Option<DiskCache>,
}

impl StoreClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryPolicy::default(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }

    /// GET with retry on transient failures. Returns the response body.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .http
                .get(url)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(StoreError::from);

            let err = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes().await?.to_vec());
                    }
                    StoreError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    }
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                if err.is_transient() {
                    warn!("giving up on {url} after {attempt} attempts: {err}");
                    return Err(StoreError::RetriesExhausted {
                        url: url.to_string(),
                    });
                }
                return Err(err);
            }
            let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
            debug!("transient failure on {url} (attempt {attempt}): {err}; retrying in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    /// Does the key exist in the store?
    pub async fn head(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.url_for(key);
        let resp = self
            .http
            .head(&url)
            .timeout(self.timeout)
            .send()
            .await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(StoreError::Status { status, url }),
        }
    }

    /// Fetch and parse the day manifest, consulting the disk cache first.
    pub async fn load_manifest(
        &self,
        station: &str,
        date: NaiveDate,
    ) -> Result<DayManifest, StoreError> {
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.load_manifest_bytes(station, date) {
                debug!("manifest cache hit for {station} {date}");
                return parse_manifest(station, &bytes);
            }
        }

        let url = self.url_for(&manifest_key(station, date));
        let bytes = match self.get_bytes(&url).await {
            Ok(b) => b,
            Err(StoreError::Status { status: 404, .. }) => {
                return Err(StoreError::ManifestNotFound {
                    station: station.to_string(),
                    date,
                });
            }
            Err(e) => return Err(e),
        };

        let manifest = parse_manifest(station, &bytes)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_manifest_bytes(station, date, &bytes) {
                warn!("failed to cache manifest for {station} {date}: {e}");
            }
        }
        Ok(manifest)
    }

    /// Fetch compressed chunk bytes, trying each key variant in order
    /// (midnight-crossing chunks may be filed under their end date).
    pub async fn get_chunk(
        &self,
        station: &str,
        chunk: &ChunkMeta,
    ) -> Result<Vec<u8>, StoreError> {
        let variants = chunk_key_variants(station, chunk);

        if let Some(cache) = &self.cache {
            for key in &variants {
                if let Some(bytes) = cache.load_chunk(key) {
                    debug!("chunk cache hit for {key}");
                    return Ok(bytes);
                }
            }
        }

        for (i, key) in variants.iter().enumerate() {
            let url = self.url_for(key);
            match self.get_bytes(&url).await {
                Ok(bytes) => {
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.save_chunk(key, &bytes) {
                            warn!("failed to cache chunk {key}: {e}");
                        }
                    }
                    return Ok(bytes);
                }
                // Try the next spelling on 404; anything else is final.
                Err(StoreError::Status { status: 404, .. }) if i + 1 < variants.len() => {}
                Err(StoreError::Status { status: 404, .. }) => {
                    return Err(StoreError::ChunkNotFound {
                        key: variants[0].clone(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::ChunkNotFound {
            key: variants[0].clone(),
        })
    }

    /// Fetch the server-computed plan for a window (the aggregated
    /// metadata path). Interchangeable with a locally-computed plan.
    pub async fn fetch_progressive_view(
        &self,
        station: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<FetchPlan, StoreError> {
        let url = format!(
            "{}/view/{station}?start={}&end={}",
            self.base_url,
            start.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        let bytes = self.get_bytes(&url).await?;
        parse_progressive_view(&bytes)
    }
}

impl ChunkFetcher for StoreClient {
    fn fetch_chunk(
        &self,
        station: &str,
        chunk: &ChunkMeta,
    ) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send {
        self.get_chunk(station, chunk)
    }
}

#[derive(Deserialize)]
struct ViewJson {
    station: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    sample_rate: u32,
    normalization: ViewNormJson,
    entries: Vec<ViewEntryJson>,
}

#[derive(Deserialize)]
struct ViewNormJson {
    min: i32,
    max: i32,
}

#[derive(Deserialize)]
struct ViewEntryJson {
    granularity: String,
    date: NaiveDate,
    start: String,
    end: String,
    #[serde(default)]
    samples: u64,
    #[serde(default)]
    min: i32,
    #[serde(default)]
    max: i32,
    #[serde(default)]
    gap: bool,
}

/// Parse the aggregated view into the same [`FetchPlan`] the local planner
/// produces.
pub fn parse_progressive_view(bytes: &[u8]) -> Result<FetchPlan, StoreError> {
    let raw: ViewJson = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::ViewMalformed(format!("invalid JSON: {e}")))?;

    let mut entries = Vec::with_capacity(raw.entries.len());
    for (index, e) in raw.entries.iter().enumerate() {
        let granularity = Granularity::from_label(&e.granularity)
            .ok_or_else(|| StoreError::ViewMalformed(format!("unknown granularity {:?}", e.granularity)))?;
        let start_time = parse_time(&e.start)?;
        let end_time = parse_time(&e.end)?;
        let start = e.date.and_time(start_time).and_utc();
        let end_date = if end_time <= start_time {
            e.date.succ_opt().unwrap_or(e.date)
        } else {
            e.date
        };
        let end = end_date.and_time(end_time).and_utc();

        let source = if e.gap {
            PlanSource::Gap
        } else {
            PlanSource::Stored(ChunkMeta {
                granularity,
                date: e.date,
                start: start_time,
                end: end_time,
                samples: e.samples,
                min: e.min,
                max: e.max,
            })
        };
        let samples = if e.gap {
            granularity.seconds() * raw.sample_rate as u64
        } else {
            e.samples
        };
        entries.push(PlannedChunk {
            index,
            granularity,
            start,
            end,
            samples,
            source,
        });
    }

    Ok(FetchPlan {
        station: raw.station,
        window_start: raw.window_start,
        window_end: raw.window_end,
        sample_rate: raw.sample_rate,
        entries,
        normalization_min: raw.normalization.min,
        normalization_max: raw.normalization.max,
    })
}

fn parse_time(s: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|e| StoreError::ViewMalformed(format!("bad time {s:?}: {e}")))
}
