//! Plan execution: sequential batches, concurrent fetches, silence on
//! failure.
//!
//! Batches are dispatched in schedule order; fetches inside one batch run
//! concurrently and their decoded segments go straight into the
//! assembler, which reorders them for the sink. Because each batch is
//! fully absorbed before the next is dispatched, the first chunk has the
//! network to itself until playback starts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gs_lib::batch::schedule;
use gs_lib::{ChunkFetcher, FetchPlan, PlanSource};
use log::{debug, info, warn};
use seistream_core::{decode_segment, silent_segment, AudioStream, CancelToken, Resampler};
use tokio::task::JoinSet;

use crate::assembler::StreamAssembler;
use crate::error::{EngineError, Result};
use crate::sink::AudioSink;

/// Progress notifications emitted while a plan streams in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The sink received its first frame (TTFA point).
    AudioStarted,
    SegmentReady { plan_index: usize },
    /// A chunk failed permanently and its interval became silence.
    ChunkFailed { plan_index: usize, error: String },
    Complete { total_samples: u64 },
}

/// Stream a plan into `sink`, returning the published final buffer.
///
/// Fetch and decode failures degrade to silence and are reported through
/// `on_event`; only cancellation and systemic errors abort the stream.
pub async fn stream_plan<F, S>(
    fetcher: Arc<F>,
    plan: Arc<FetchPlan>,
    playback_rate: u32,
    fetch_timeout: Duration,
    cancel: CancelToken,
    sink: &mut S,
    mut on_event: impl FnMut(StreamEvent),
) -> Result<AudioStream>
where
    F: ChunkFetcher + 'static,
    S: AudioSink,
{
    let resampler = Resampler::new(plan.sample_rate, playback_rate);
    let offsets = source_offsets(&plan);
    let total_segments = plan.entries.len();
    let mut assembler = StreamAssembler::new(total_segments, playback_rate);
    let mut reported_failures: HashSet<usize> = HashSet::new();
    let mut started = false;

    // Gap intervals have nothing to fetch; their silence is known up
    // front.
    for entry in &plan.entries {
        if entry.source.is_gap() {
            let seg = silent_segment(entry.index, entry.samples, &resampler, offsets[entry.index]);
            accept(&mut assembler, seg, sink, &mut started, &mut on_event);
        }
    }

    let batches = schedule(&plan);
    debug!(
        "streaming {} entries in {} batches for {}",
        total_segments,
        batches.len(),
        plan.station,
    );

    for batch in batches {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut inflight: JoinSet<(usize, std::result::Result<Vec<u8>, String>)> = JoinSet::new();
        for &index in &batch.entries {
            let entry = &plan.entries[index];
            let Some(chunk) = entry.source.chunk().cloned() else {
                continue;
            };
            let fetcher = fetcher.clone();
            let station = plan.station.clone();
            inflight.spawn(async move {
                let fetched =
                    tokio::time::timeout(fetch_timeout, fetcher.fetch_chunk(&station, &chunk))
                        .await;
                let body = match fetched {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {fetch_timeout:?}")),
                };
                (index, body)
            });
        }

        while let Some(joined) = inflight.join_next().await {
            if cancel.is_cancelled() {
                inflight.abort_all();
                return Err(EngineError::Cancelled);
            }
            let (index, body) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("fetch task failed: {e}");
                    continue;
                }
            };
            let entry = &plan.entries[index];
            let seg = match body.and_then(|bytes| {
                decode_segment(
                    &bytes,
                    plan.normalization_min,
                    plan.normalization_max,
                    index,
                    entry.samples,
                    &resampler,
                    offsets[index],
                )
                .map_err(|e| e.to_string())
            }) {
                Ok(seg) => seg,
                Err(error) => {
                    if reported_failures.insert(index) {
                        warn!("chunk {index} of {} unusable: {error}; playing silence", plan.station);
                        on_event(StreamEvent::ChunkFailed {
                            plan_index: index,
                            error,
                        });
                    }
                    silent_segment(index, entry.samples, &resampler, offsets[index])
                }
            };
            accept(&mut assembler, seg, sink, &mut started, &mut on_event);
        }
    }

    // A panicked fetch task could leave holes; they become silence so the
    // stream always reaches its nominal length.
    while !assembler.is_complete() {
        let index = assembler.next_to_emit();
        warn!("segment {index} never arrived; filling silence");
        let entry = &plan.entries[index];
        let seg = silent_segment(index, entry.samples, &resampler, offsets[index]);
        accept(&mut assembler, seg, sink, &mut started, &mut on_event);
    }

    let stream = assembler.finalize(sink).await;
    info!(
        "stream for {} complete: {} samples at {} Hz",
        plan.station,
        stream.len(),
        playback_rate,
    );
    on_event(StreamEvent::Complete {
        total_samples: stream.len() as u64,
    });
    Ok(stream)
}

fn accept(
    assembler: &mut StreamAssembler,
    seg: seistream_core::DecodedSegment,
    sink: &mut impl AudioSink,
    started: &mut bool,
    on_event: &mut impl FnMut(StreamEvent),
) {
    let plan_index = seg.plan_index;
    let emitted = assembler.accept(seg, sink);
    on_event(StreamEvent::SegmentReady { plan_index });
    if !*started && emitted > 0 {
        *started = true;
        on_event(StreamEvent::AudioStarted);
    }
}

/// Cumulative source-sample offset of each plan entry.
fn source_offsets(plan: &FetchPlan) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(plan.entries.len());
    let mut acc = 0u64;
    for entry in &plan.entries {
        offsets.push(acc);
        acc += entry.samples;
    }
    offsets
}
