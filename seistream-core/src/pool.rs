//! FFT worker pool.
//!
//! A fixed set of threads pulls batches from a shared injector queue, so
//! whichever worker is idle takes the next batch. Results funnel back over
//! a reply channel in completion order (unordered across batches); each
//! batch writes a disjoint column range, so callers can apply results as
//! they arrive.
//!
//! Cancellation is cooperative: workers check tokens between batches, and
//! cancelled batches resolve with a sentinel result instead of columns.
//! `terminate` bumps a pool generation counter; every batch submitted
//! before the bump resolves as cancelled. A panicking batch gets one
//! re-dispatch on a fresh STFT state before it is reported failed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, warn};

use crate::stft::{Stft, Window};

/// Cooperative cancellation flag shared between a requester and workers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One unit of STFT work: a run of FFT frames over a shared audio buffer.
#[derive(Clone)]
pub struct FftBatch {
    /// Caller-defined id (tile index, region id, …) echoed in the result.
    pub id: usize,
    pub audio: Arc<Vec<f32>>,
    /// Sample index where column 0's frame starts.
    pub start_sample: usize,
    pub fft_size: usize,
    pub hop: usize,
    pub col_count: usize,
    pub window: Window,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Done,
    /// Resolved by cancellation; `columns` is empty and must be ignored.
    Cancelled,
    /// Worker panicked twice on this batch.
    Failed,
}

pub struct BatchResult {
    pub id: usize,
    pub columns: Vec<Vec<u8>>,
    pub status: BatchStatus,
}

struct Job {
    batch: FftBatch,
    token: CancelToken,
    generation: u64,
    attempt: u8,
    reply: Sender<BatchResult>,
}

enum Msg {
    Work(Job),
    Shutdown,
}

pub struct FftPool {
    injector: Sender<Msg>,
    /// Bumped by `terminate`; jobs from older generations resolve
    /// cancelled (the stale-stream check the playback engine also uses).
    generation: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl FftPool {
    /// Pool with `max(1, cpu_count − 1)` workers.
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get().saturating_sub(1).max(1))
    }

    pub fn with_workers(count: usize) -> Self {
        let count = count.max(1);
        let (injector, queue) = unbounded::<Msg>();
        let generation = Arc::new(AtomicU64::new(0));
        let workers = (0..count)
            .map(|i| {
                let queue = queue.clone();
                let resend = injector.clone();
                let generation = generation.clone();
                std::thread::Builder::new()
                    .name(format!("fft-worker-{i}"))
                    .spawn(move || worker_loop(queue, resend, generation))
                    .expect("spawn fft worker")
            })
            .collect();
        Self {
            injector,
            generation,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run a set of batches to completion.
    ///
    /// `on_batch` fires once per batch as results arrive (unordered). The
    /// returned vec holds every result, including cancellation sentinels.
    pub fn process_batches(
        &self,
        batches: Vec<FftBatch>,
        token: &CancelToken,
        mut on_batch: impl FnMut(&BatchResult),
    ) -> Vec<BatchResult> {
        let n = batches.len();
        let generation = self.generation.load(Ordering::SeqCst);
        let (reply_tx, reply_rx) = unbounded::<BatchResult>();
        for batch in batches {
            let job = Job {
                batch,
                token: token.clone(),
                generation,
                attempt: 0,
                reply: reply_tx.clone(),
            };
            if self.injector.send(Msg::Work(job)).is_err() {
                break;
            }
        }
        drop(reply_tx);

        let mut results = Vec::with_capacity(n);
        while results.len() < n {
            match reply_rx.recv() {
                Ok(result) => {
                    on_batch(&result);
                    results.push(result);
                }
                Err(_) => break,
            }
        }
        results
    }

    /// Abandon all in-flight and queued work. Batches submitted before the
    /// call resolve with the cancellation sentinel; the pool stays usable
    /// for new submissions.
    pub fn terminate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for FftPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FftPool {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for _ in &self.workers {
            let _ = self.injector.send(Msg::Shutdown);
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queue: Receiver<Msg>, resend: Sender<Msg>, generation: Arc<AtomicU64>) {
    let mut stft = Stft::new();
    while let Ok(msg) = queue.recv() {
        let job = match msg {
            Msg::Shutdown => break,
            Msg::Work(job) => job,
        };

        let stale = generation.load(Ordering::SeqCst) != job.generation;
        if stale || job.token.is_cancelled() {
            let _ = job.reply.send(BatchResult {
                id: job.batch.id,
                columns: Vec::new(),
                status: BatchStatus::Cancelled,
            });
            continue;
        }

        let batch = &job.batch;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            stft.columns(
                &batch.audio,
                batch.start_sample,
                batch.fft_size,
                batch.hop,
                batch.window,
                batch.col_count,
            )
        }));

        match outcome {
            Ok(columns) => {
                let _ = job.reply.send(BatchResult {
                    id: job.batch.id,
                    columns,
                    status: BatchStatus::Done,
                });
            }
            Err(_) => {
                // STFT state may be inconsistent after a panic; rebuild it
                // (the moral equivalent of respawning the worker).
                stft = Stft::new();
                if job.attempt == 0 {
                    warn!("fft batch {} panicked; re-dispatching once", job.batch.id);
                    let retry = Job { attempt: 1, ..job };
                    let _ = resend.send(Msg::Work(retry));
                } else {
                    error!("fft batch {} failed twice; abandoning", job.batch.id);
                    let _ = job.reply.send(BatchResult {
                        id: job.batch.id,
                        columns: Vec::new(),
                        status: BatchStatus::Failed,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn sine(len: usize) -> Arc<Vec<f32>> {
        Arc::new(
            (0..len)
                .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
                .collect(),
        )
    }

    fn batch(id: usize, audio: &Arc<Vec<f32>>, start: usize) -> FftBatch {
        FftBatch {
            id,
            audio: audio.clone(),
            start_sample: start,
            fft_size: 512,
            hop: 256,
            col_count: 8,
            window: Window::Hann,
        }
    }

    #[test]
    fn all_batches_complete_with_callback() {
        let pool = FftPool::with_workers(3);
        let audio = sine(16_384);
        let batches: Vec<FftBatch> = (0..6).map(|i| batch(i, &audio, i * 2048)).collect();

        let seen = Mutex::new(HashSet::new());
        let results = pool.process_batches(batches, &CancelToken::new(), |r| {
            assert_eq!(r.status, BatchStatus::Done);
            seen.lock().unwrap().insert(r.id);
        });

        assert_eq!(results.len(), 6);
        assert_eq!(seen.lock().unwrap().len(), 6);
        for r in &results {
            assert_eq!(r.columns.len(), 8);
            assert_eq!(r.columns[0].len(), 257);
        }
    }

    #[test]
    fn cancelled_token_yields_sentinels() {
        let pool = FftPool::with_workers(2);
        let audio = sine(8192);
        let token = CancelToken::new();
        token.cancel();

        let results =
            pool.process_batches(vec![batch(0, &audio, 0), batch(1, &audio, 0)], &token, |_| {});
        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.status, BatchStatus::Cancelled);
            assert!(r.columns.is_empty());
        }
    }

    #[test]
    fn terminate_sheds_prior_generation() {
        let pool = FftPool::with_workers(1);
        let audio = sine(8192);

        // Submissions race the bump here, so snapshot-then-bump by hand:
        // jobs carry the generation at submit time and terminate() bumps
        // it, which is what a mid-flight cancel looks like.
        pool.terminate();
        let pre_bump = pool.generation.load(Ordering::SeqCst) - 1;
        let (tx, rx) = unbounded();
        pool.injector
            .send(Msg::Work(Job {
                batch: batch(0, &audio, 0),
                token: CancelToken::new(),
                generation: pre_bump,
                attempt: 0,
                reply: tx,
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap().status, BatchStatus::Cancelled);

        // New work after the bump still runs.
        let results = pool.process_batches(vec![batch(1, &audio, 0)], &CancelToken::new(), |_| {});
        assert_eq!(results[0].status, BatchStatus::Done);
    }

    #[test]
    fn default_pool_size_leaves_one_core() {
        let pool = FftPool::new();
        assert_eq!(
            pool.worker_count(),
            num_cpus::get().saturating_sub(1).max(1),
        );
    }

    #[test]
    fn disjoint_batches_cover_contiguous_columns() {
        // Two batches over adjacent column ranges equal one big batch.
        let pool = FftPool::with_workers(2);
        let audio = sine(32_768);

        let mut whole = Stft::new();
        let reference = whole.columns(&audio, 0, 512, 256, Window::Hann, 16);

        let a = FftBatch { col_count: 8, ..batch(0, &audio, 0) };
        let b = FftBatch { col_count: 8, ..batch(1, &audio, 8 * 256) };
        let results = pool.process_batches(vec![a, b], &CancelToken::new(), |_| {});

        let mut by_id: Vec<&BatchResult> = results.iter().collect();
        by_id.sort_by_key(|r| r.id);
        let combined: Vec<&Vec<u8>> = by_id.iter().flat_map(|r| r.columns.iter()).collect();
        assert_eq!(combined.len(), reference.len());
        for (got, want) in combined.iter().zip(reference.iter()) {
            assert_eq!(*got, want);
        }
    }
}
