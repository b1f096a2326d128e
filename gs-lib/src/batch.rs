//! Batch scheduling policy: startup latency vs steady-state throughput.
//!
//! Batches are dispatched sequentially; fetches inside one batch run
//! concurrently. Small early batches get the first audible sample out
//! fast, ramping sizes amortize per-batch latency once playback is
//! underway.

use crate::types::{Batch, FetchPlan, Granularity};

/// Practical concurrency ceiling for 6-hour chunk fetches.
const SIX_HOUR_CAP: usize = 4;

/// Number of leading 10-minute chunks in a run that are fetched alone.
const SOLO_LEAD: usize = 3;

/// Group a plan's fetchable entries into dispatch batches.
///
/// Gap entries never appear in a batch (there is nothing to fetch; the
/// assembler synthesizes their silence directly). A granularity transition
/// flushes the pending batch and restarts the size ramp.
pub fn schedule(plan: &FetchPlan) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut run_granularity: Option<Granularity> = None;
    let mut emitted_in_run = 0usize;
    let mut pending: Vec<usize> = Vec::new();
    let mut pending_target = 0usize;

    let flush = |batches: &mut Vec<Batch>, pending: &mut Vec<usize>, g: Granularity| {
        if !pending.is_empty() {
            batches.push(Batch {
                granularity: g,
                entries: std::mem::take(pending),
            });
        }
    };

    for entry in plan.entries.iter().filter(|e| !e.source.is_gap()) {
        if run_granularity != Some(entry.granularity) {
            if let Some(g) = run_granularity {
                flush(&mut batches, &mut pending, g);
            }
            run_granularity = Some(entry.granularity);
            emitted_in_run = 0;
            pending_target = batch_size(entry.granularity, 1);
        }

        pending.push(entry.index);
        if pending.len() >= pending_target {
            flush(&mut batches, &mut pending, entry.granularity);
            emitted_in_run += 1;
            pending_target = batch_size(entry.granularity, emitted_in_run + 1);
        }
    }
    if let Some(g) = run_granularity {
        flush(&mut batches, &mut pending, g);
    }
    batches
}

/// Size of the `ordinal`-th batch (1-based) within a granularity run.
fn batch_size(granularity: Granularity, ordinal: usize) -> usize {
    match granularity {
        // First three chunks alone (time-to-first-sample), then ramp 2, 3, …
        Granularity::TenMin => {
            if ordinal <= SOLO_LEAD {
                1
            } else {
                ordinal - (SOLO_LEAD - 1)
            }
        }
        Granularity::OneHour => ordinal,
        Granularity::SixHour => ordinal.min(SIX_HOUR_CAP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Catalog;
    use crate::plan::plan_window;
    use crate::types::{ChunkMeta, DayManifest, PlanSource, PlannedChunk};
    use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

    fn synthetic_plan(granularities: &[Granularity]) -> FetchPlan {
        let date = NaiveDate::from_ymd_opt(2025, 11, 6).unwrap();
        let mut at = date.and_time(NaiveTime::MIN).and_utc();
        let entries = granularities
            .iter()
            .enumerate()
            .map(|(index, &g)| {
                let start = at;
                at += Duration::minutes(g.minutes() as i64);
                PlannedChunk {
                    index,
                    granularity: g,
                    start,
                    end: at,
                    samples: g.seconds() * 100,
                    source: PlanSource::Stored(ChunkMeta {
                        granularity: g,
                        date,
                        start: start.time(),
                        end: at.time(),
                        samples: g.seconds() * 100,
                        min: -1,
                        max: 1,
                    }),
                }
            })
            .collect::<Vec<_>>();
        let window_end = at;
        FetchPlan {
            station: "ANMO".into(),
            window_start: date.and_time(NaiveTime::MIN).and_utc(),
            window_end,
            sample_rate: 100,
            entries,
            normalization_min: -1,
            normalization_max: 1,
        }
    }

    fn sizes(batches: &[Batch]) -> Vec<usize> {
        batches.iter().map(|b| b.entries.len()).collect()
    }

    #[test]
    fn twenty_chunk_ten_minute_plan() {
        let plan = synthetic_plan(&[Granularity::TenMin; 20]);
        let batches = schedule(&plan);

        assert_eq!(sizes(&batches), vec![1, 1, 1, 2, 3, 4, 5, 3]);
        // The tenth chunk (plan index 9) lands in batch 5.
        let holder = batches.iter().position(|b| b.entries.contains(&9)).unwrap();
        assert_eq!(holder, 5);
    }

    #[test]
    fn six_hour_cap_holds() {
        let plan = synthetic_plan(&[Granularity::SixHour; 20]);
        let batches = schedule(&plan);
        assert_eq!(sizes(&batches), vec![1, 2, 3, 4, 4, 4, 2]);
        assert!(batches.iter().all(|b| b.entries.len() <= SIX_HOUR_CAP));
    }

    #[test]
    fn transition_flushes_and_resets_ramp() {
        let mut gs = vec![Granularity::TenMin; 6];
        gs.extend([Granularity::OneHour; 4]);
        gs.extend([Granularity::TenMin; 4]);
        let plan = synthetic_plan(&gs);
        let batches = schedule(&plan);

        // 10m run of 6: 1,1,1,2,1(flush); 1h run of 4: 1,2,1(flush);
        // 10m run of 4: 1,1,1,1.
        assert_eq!(sizes(&batches), vec![1, 1, 1, 2, 1, 1, 2, 1, 1, 1, 1, 1]);
        // Every batch is single-granularity.
        for b in &batches {
            for &i in &b.entries {
                assert_eq!(plan.entries[i].granularity, b.granularity);
            }
        }
    }

    #[test]
    fn batches_cover_plan_in_order() {
        let plan = synthetic_plan(&[Granularity::TenMin; 13]);
        let batches = schedule(&plan);
        let flat: Vec<usize> = batches.iter().flat_map(|b| b.entries.clone()).collect();
        assert_eq!(flat, (0..13).collect::<Vec<_>>());
    }

    #[test]
    fn gaps_are_not_batched() {
        // Build a real plan with a hole and check the gap index is skipped.
        let date = NaiveDate::from_ymd_opt(2025, 11, 6).unwrap();
        let mk = |h: u32, m: u32| {
            let start = NaiveTime::from_hms_opt(h, m, 0).unwrap();
            let end_min = (h * 60 + m + 10) % (24 * 60);
            ChunkMeta {
                granularity: Granularity::TenMin,
                date,
                start,
                end: NaiveTime::from_hms_opt(end_min / 60, end_min % 60, 0).unwrap(),
                samples: 60_000,
                min: -1,
                max: 1,
            }
        };
        let mut catalog = Catalog::new();
        catalog.insert(DayManifest {
            station: "ANMO".into(),
            date,
            sample_rate: 100,
            ten_min: vec![mk(0, 0), mk(0, 20)], // 00:10 missing
            one_hour: vec![],
            six_hour: vec![],
        });
        let start: DateTime<Utc> = date.and_time(NaiveTime::MIN).and_utc();
        let plan = plan_window(&catalog, "ANMO", start, start + Duration::minutes(30)).unwrap();

        let batches = schedule(&plan);
        let flat: Vec<usize> = batches.iter().flat_map(|b| b.entries.clone()).collect();
        assert_eq!(flat, vec![0, 2]);
    }
}
