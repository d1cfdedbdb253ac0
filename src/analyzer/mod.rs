//! Parallel analysis driver.
//!
//! A single dispatcher thread owns the batch: it hands file jobs to a pool
//! of worker threads, enforces per-job wall-clock deadlines, emits every
//! progress event, and re-sorts results into enumeration order. Workers run
//! one synchronous CPU-bound job at a time and share nothing but the
//! cross-process cache.

pub mod decode;
pub mod energy;
pub mod features;
pub mod key;
pub mod structure;
pub mod tempo;

use crate::cache::{Fingerprint, TrackCache};
use crate::model::TrackFeatures;
use crate::scanner;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("cannot access folder {path}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a file produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Missing at analysis time, or the walker/decoder refused it.
    Unreadable,
    /// PCM obtained but invalid.
    Decode,
    /// Tempo or key could not be estimated with confidence.
    Feature,
    /// Per-file deadline elapsed; the worker was abandoned.
    Timeout,
    /// The worker panicked; its slot was replenished.
    WorkerCrash,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreadable => "unreadable",
            Self::Decode => "decode",
            Self::Feature => "feature",
            Self::Timeout => "timeout",
            Self::WorkerCrash => "worker-crash",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzeFailure {
    pub path: PathBuf,
    pub reason: FailureReason,
    pub message: String,
}

/// Everything the batch produced. `records` follows the enumeration order of
/// the discovered files regardless of completion order.
#[derive(Debug, Default)]
pub struct AnalyzeOutcome {
    pub records: Vec<TrackFeatures>,
    pub failures: Vec<AnalyzeFailure>,
}

/// Per-job progress state, reported by the dispatcher only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Cached,
    Analyzed,
    Failed,
    TimedOut,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        }
    }
}

/// Receives `(done, total, current_file, status)` updates from the
/// dispatcher, in job completion order.
pub trait ProgressSink {
    fn update(&self, done: usize, total: usize, current: &Path, status: ProgressStatus);
}

/// Sink that swallows everything.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn update(&self, _done: usize, _total: usize, _current: &Path, _status: ProgressStatus) {}
}

/// Cooperative batch cancellation handle.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzeConfig {
    /// Worker override; `None` applies the CPU/file-count policy.
    pub max_workers: Option<usize>,
    pub per_file_timeout: Duration,
    pub extensions: Vec<String>,
    pub sample_rate: u32,
    pub cache_dir: PathBuf,
    pub use_cache: bool,
    pub cancel: CancelFlag,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            per_file_timeout: Duration::from_secs(60),
            extensions: crate::SUPPORTED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sample_rate: crate::ANALYSIS_SAMPLE_RATE,
            cache_dir: crate::config::default_cache_dir(),
            use_cache: true,
            cancel: CancelFlag::default(),
        }
    }
}

/// Worker-count policy: `max(min(6, n), n/2)` capped at `n`, then scaled
/// down for small batches.
pub fn worker_count(cpus: usize, file_count: usize) -> usize {
    let cpus = cpus.max(1);
    let base = 6.min(cpus).max(cpus / 2).min(cpus);
    let scaled = match file_count {
        0..=4 => 1,
        5..=19 => 2,
        20..=49 => 4,
        _ => base,
    };
    scaled.min(base).max(1)
}

/// Analyze every supported audio file under `root`.
///
/// Single files never abort the batch: each failure is returned alongside
/// the records that did resolve.
pub fn analyze_folder(
    root: &Path,
    cfg: &AnalyzeConfig,
    progress: &dyn ProgressSink,
) -> Result<AnalyzeOutcome, AnalyzeError> {
    let root = root.canonicalize().map_err(|source| AnalyzeError::Root {
        path: root.to_path_buf(),
        source,
    })?;

    let discovery = scanner::discover(&root, &cfg.extensions);
    let mut failures: Vec<AnalyzeFailure> = discovery
        .unreadable
        .into_iter()
        .map(|(path, message)| AnalyzeFailure {
            path,
            reason: FailureReason::Unreadable,
            message,
        })
        .collect();

    if discovery.files.is_empty() {
        return Ok(AnalyzeOutcome {
            records: Vec::new(),
            failures,
        });
    }

    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = cfg
        .max_workers
        .unwrap_or_else(|| worker_count(cpus, discovery.files.len()))
        .max(1);
    log::info!(
        "analyzing {} files with {} workers (timeout {:?})",
        discovery.files.len(),
        workers,
        cfg.per_file_timeout
    );

    let job_cfg = cfg.clone();
    let (records, mut pool_failures) = run_pool(
        Arc::new(discovery.files),
        workers,
        cfg.per_file_timeout,
        cfg.cancel.clone(),
        progress,
        Arc::new(move |path: &Path| analyze_file(path, &job_cfg)),
    );
    failures.append(&mut pool_failures);

    Ok(AnalyzeOutcome { records, failures })
}

/// One worker job's successful output.
pub(crate) struct JobOutput {
    record: TrackFeatures,
    from_cache: bool,
}

/// Cache-or-extract for a single file. This is the whole per-job critical
/// path; the cache lock is never held across the extraction.
fn analyze_file(path: &Path, cfg: &AnalyzeConfig) -> Result<JobOutput, AnalyzeFailure> {
    let cache = if cfg.use_cache {
        match TrackCache::open(&cfg.cache_dir) {
            Ok(cache) => Some(cache),
            Err(e) => {
                log::warn!("cache unavailable ({e}); analyzing without it");
                None
            }
        }
    } else {
        None
    };

    if let Some(cache) = cache.as_ref() {
        if let Some(record) = cache.get(path) {
            return Ok(JobOutput {
                record,
                from_cache: true,
            });
        }
    }

    let fingerprint = Fingerprint::stat(path).map_err(|e| AnalyzeFailure {
        path: path.to_path_buf(),
        reason: FailureReason::Unreadable,
        message: e.to_string(),
    })?;

    let pcm = decode::decode_to_mono(path, cfg.sample_rate).map_err(|e| {
        let reason = match e {
            decode::DecodeError::InvalidPcm(_) => FailureReason::Decode,
            _ => FailureReason::Unreadable,
        };
        AnalyzeFailure {
            path: path.to_path_buf(),
            reason,
            message: e.to_string(),
        }
    })?;

    let tags = scanner::metadata::resolve(path);
    let record = features::extract(path, &pcm, fingerprint, &tags).map_err(|e| AnalyzeFailure {
        path: path.to_path_buf(),
        reason: FailureReason::Feature,
        message: e.to_string(),
    })?;

    if let Some(cache) = cache.as_ref() {
        if let Err(e) = cache.put(path, &record) {
            log::warn!("cache write failed for {}: {e}", path.display());
        }
    }

    Ok(JobOutput {
        record,
        from_cache: false,
    })
}

enum WorkerEvent {
    Started {
        worker: usize,
        job: usize,
        at: Instant,
    },
    Done {
        job: usize,
        result: Result<JobOutput, AnalyzeFailure>,
    },
}

/// Dispatch `files` across `workers` threads running `job`, with per-job
/// deadlines. Returns records in enumeration order plus failures.
pub(crate) fn run_pool<F>(
    files: Arc<Vec<PathBuf>>,
    workers: usize,
    timeout: Duration,
    cancel: CancelFlag,
    progress: &dyn ProgressSink,
    job: Arc<F>,
) -> (Vec<TrackFeatures>, Vec<AnalyzeFailure>)
where
    F: Fn(&Path) -> Result<JobOutput, AnalyzeFailure> + Send + Sync + 'static,
{
    let total = files.len();
    let queue: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new((0..total).collect()));
    let (tx, rx) = mpsc::channel::<WorkerEvent>();

    let mut pool = Pool {
        files: files.clone(),
        queue: queue.clone(),
        tx,
        job,
        cancel: cancel.clone(),
        next_worker: 0,
        retire_flags: HashMap::new(),
    };
    for _ in 0..workers.min(total) {
        pool.spawn_worker();
    }

    let mut slots: Vec<Option<TrackFeatures>> = (0..total).map(|_| None).collect();
    let mut failures: Vec<AnalyzeFailure> = Vec::new();
    let mut in_flight: HashMap<usize, (usize, Instant)> = HashMap::new(); // job -> (worker, start)
    let mut abandoned: HashSet<usize> = HashSet::new();
    let mut done = 0usize;
    let mut cancelled_at: Option<Instant> = None;

    while done < total {
        if cancel.is_cancelled() && cancelled_at.is_none() {
            // Stop handing out work; in-flight jobs get one timeout of grace.
            let dropped = {
                let mut q = queue.lock().unwrap();
                let n = q.len();
                q.clear();
                n
            };
            done += dropped;
            cancelled_at = Some(Instant::now());
            log::info!("batch cancelled; {dropped} queued jobs dropped");
        }

        if let Some(at) = cancelled_at {
            if in_flight.is_empty() {
                break;
            }
            if at.elapsed() > timeout {
                for (job_idx, (worker, _)) in in_flight.drain() {
                    pool.retire(worker);
                    failures.push(timeout_failure(&files[job_idx]));
                    done += 1;
                }
                break;
            }
        }

        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(WorkerEvent::Started { worker, job, at }) => {
                in_flight.insert(job, (worker, at));
            }
            Ok(WorkerEvent::Done { job, result }) => {
                if abandoned.remove(&job) {
                    // Late result from an abandoned worker; the job was
                    // already counted as a timeout.
                    continue;
                }
                in_flight.remove(&job);
                done += 1;
                let status = match &result {
                    Ok(output) if output.from_cache => ProgressStatus::Cached,
                    Ok(_) => ProgressStatus::Analyzed,
                    Err(_) => ProgressStatus::Failed,
                };
                progress.update(done, total, &files[job], status);
                match result {
                    Ok(output) => slots[job] = Some(output.record),
                    Err(failure) => failures.push(failure),
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Every worker is gone. Anything still marked in-flight died
                // without reporting.
                for (job_idx, _) in in_flight.drain() {
                    failures.push(AnalyzeFailure {
                        path: files[job_idx].clone(),
                        reason: FailureReason::WorkerCrash,
                        message: "worker exited without reporting".to_string(),
                    });
                    done += 1;
                    progress.update(done, total, &files[job_idx], ProgressStatus::Failed);
                }
                break;
            }
        }

        // Deadline pass: abandon overdue jobs and replace their workers.
        let now = Instant::now();
        let overdue: Vec<usize> = in_flight
            .iter()
            .filter(|(_, (_, start))| now.duration_since(*start) >= timeout)
            .map(|(&job_idx, _)| job_idx)
            .collect();
        for job_idx in overdue {
            let (worker, _) = in_flight.remove(&job_idx).unwrap();
            pool.retire(worker);
            abandoned.insert(job_idx);
            done += 1;
            failures.push(timeout_failure(&files[job_idx]));
            progress.update(done, total, &files[job_idx], ProgressStatus::TimedOut);
            log::warn!(
                "{}: deadline of {timeout:?} elapsed; worker abandoned",
                files[job_idx].display()
            );
            if !cancel.is_cancelled() && !queue.lock().unwrap().is_empty() {
                pool.spawn_worker();
            }
        }
    }

    let records = slots.into_iter().flatten().collect();
    (records, failures)
}

fn timeout_failure(path: &Path) -> AnalyzeFailure {
    AnalyzeFailure {
        path: path.to_path_buf(),
        reason: FailureReason::Timeout,
        message: "per-file deadline elapsed".to_string(),
    }
}

/// Worker bookkeeping shared by the dispatcher.
struct Pool<F> {
    files: Arc<Vec<PathBuf>>,
    queue: Arc<Mutex<VecDeque<usize>>>,
    tx: mpsc::Sender<WorkerEvent>,
    job: Arc<F>,
    cancel: CancelFlag,
    next_worker: usize,
    retire_flags: HashMap<usize, Arc<AtomicBool>>,
}

impl<F> Pool<F>
where
    F: Fn(&Path) -> Result<JobOutput, AnalyzeFailure> + Send + Sync + 'static,
{
    fn spawn_worker(&mut self) {
        let worker = self.next_worker;
        self.next_worker += 1;

        let retired = Arc::new(AtomicBool::new(false));
        self.retire_flags.insert(worker, retired.clone());

        let files = self.files.clone();
        let queue = self.queue.clone();
        let tx = self.tx.clone();
        let job = self.job.clone();
        let cancel = self.cancel.clone();

        std::thread::spawn(move || {
            loop {
                if retired.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    break;
                }
                let job_idx = match queue.lock().unwrap().pop_front() {
                    Some(idx) => idx,
                    None => break,
                };
                let path = &files[job_idx];
                if tx
                    .send(WorkerEvent::Started {
                        worker,
                        job: job_idx,
                        at: Instant::now(),
                    })
                    .is_err()
                {
                    break;
                }

                let result = match catch_unwind(AssertUnwindSafe(|| job(path))) {
                    Ok(result) => result,
                    Err(panic) => Err(AnalyzeFailure {
                        path: path.clone(),
                        reason: FailureReason::WorkerCrash,
                        message: panic_message(&panic),
                    }),
                };
                if tx
                    .send(WorkerEvent::Done {
                        job: job_idx,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Mark a worker so it exits instead of taking another job. The thread
    /// itself cannot be killed mid-kernel; its slot is what gets replaced.
    fn retire(&mut self, worker: usize) {
        if let Some(flag) = self.retire_flags.remove(&worker) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
