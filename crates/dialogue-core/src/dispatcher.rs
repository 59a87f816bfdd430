//! Concurrent synthesis dispatch.
//!
//! Speech events become sentence jobs on a shared queue drained by a fixed
//! pool of workers. Each worker checks the cache, calls backends with retry
//! and fallback, and sends the outcome back to a single coordinator, which
//! also resolves silence and sound-effect events, reports progress and
//! reassembles everything in script order.

use crate::backend::BackendChain;
use crate::cache::{CacheEntry, CacheKey, SynthesisCache};
use crate::clip::ClipLoader;
use crate::error::{DialogueError, DialogueResult};
use crate::script::{split_sentences, Event};
use crate::timeline::{Resolution, Segment, SynthesisFailure, SynthesisResult, Timeline, Warning};
use crate::voice::VoiceConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Exponential backoff for retriable backend errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, per backend
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Maximum concurrent backend workers
    pub workers: usize,
    /// Retry policy per backend
    pub retry: RetryPolicy,
    /// Synthesize each sentence separately
    pub split_sentences: bool,
    /// Sample rate requested from backends and used for cache keys
    pub sample_rate: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            workers: crate::DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            split_sentences: true,
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Progress report emitted after each event resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Events resolved so far
    pub completed: usize,
    /// Events in the script
    pub total: usize,
    /// Short description of the event that just resolved
    pub message: String,
}

/// Where progress reports go; only the coordinator ever emits
#[derive(Clone, Default)]
pub enum ProgressSink {
    /// Discard progress
    #[default]
    None,
    /// Call a function
    Callback(Arc<dyn Fn(&ProgressEvent) + Send + Sync>),
    /// Send over a channel
    Channel(mpsc::UnboundedSender<ProgressEvent>),
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("ProgressSink::None"),
            Self::Callback(_) => f.write_str("ProgressSink::Callback"),
            Self::Channel(_) => f.write_str("ProgressSink::Channel"),
        }
    }
}

impl ProgressSink {
    /// Sink that calls `callback`
    #[must_use]
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    fn emit(&self, event: &ProgressEvent) {
        match self {
            Self::None => {}
            Self::Callback(callback) => callback(event),
            Self::Channel(sender) => {
                // A dropped receiver only means nobody is listening
                let _ = sender.send(event.clone());
            }
        }
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation shared between a caller and a running composition
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    /// Create an uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; wakes every waiter
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Counters for one dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Sentence jobs queued
    pub jobs: u64,
    /// Workers started
    pub workers: u64,
    /// Jobs served from the cache
    pub cache_hits: u64,
    /// Jobs that missed the cache
    pub cache_misses: u64,
    /// Backend calls made
    pub backend_calls: u64,
    /// Retries after retriable errors
    pub retries: u64,
    /// Speech events that failed
    pub failures: u64,
    /// Segments produced by a non-primary backend
    pub fallbacks: u64,
}

impl std::fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dispatch: {} jobs on {} workers, cache {}/{} hit, {} calls, {} retries, {} fallbacks, {} failures",
            self.jobs,
            self.workers,
            self.cache_hits,
            self.cache_hits + self.cache_misses,
            self.backend_calls,
            self.retries,
            self.fallbacks,
            self.failures
        )
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    backend_calls: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Output of a dispatch run
#[derive(Debug, Clone)]
pub struct DispatchOutput {
    /// Script-ordered results
    pub timeline: Timeline,
    /// Counters
    pub stats: DispatchStats,
    /// Cache write problems
    pub warnings: Vec<Warning>,
}

struct ProgressTracker<'a> {
    sink: &'a ProgressSink,
    completed: usize,
    total: usize,
}

impl ProgressTracker<'_> {
    fn resolved(&mut self, index: usize, event: &Event) {
        self.completed += 1;
        self.sink.emit(&ProgressEvent {
            completed: self.completed,
            total: self.total,
            message: event.describe(),
        });
        debug!("Resolved event {} ({}/{})", index, self.completed, self.total);
    }
}

#[derive(Debug)]
struct Job {
    event: usize,
    sentence: usize,
    text: String,
    voice: Arc<VoiceConfig>,
}

#[derive(Debug)]
struct JobOutcome {
    event: usize,
    sentence: usize,
    result: Result<Segment, SynthesisFailure>,
    cache_warning: Option<Warning>,
}

#[derive(Debug)]
struct PendingSpeech {
    segments: Vec<Option<Segment>>,
    remaining: usize,
    failure: Option<SynthesisFailure>,
}

struct WorkerContext {
    backends: BackendChain,
    cache: Option<Arc<dyn SynthesisCache>>,
    retry: RetryPolicy,
    sample_rate: u32,
    stats: StatsCounters,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run(&self, queue: &Mutex<VecDeque<Job>>, results: &mpsc::Sender<JobOutcome>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(job) = queue.lock().pop_front() else {
                break;
            };
            let outcome = self.synthesize(job).await;
            if results.send(outcome).await.is_err() {
                break;
            }
        }
    }

    async fn synthesize(&self, job: Job) -> JobOutcome {
        let plan = self.backends.plan(&job.voice);
        let key = CacheKey::new(&job.text, &job.voice, self.sample_rate);
        let mut outcome = JobOutcome {
            event: job.event,
            sentence: job.sentence,
            result: Err(SynthesisFailure {
                error: DialogueError::synthesis("no backend attempted"),
                attempts: 0,
            }),
            cache_warning: None,
        };

        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(entry)) => {
                    StatsCounters::bump(&self.stats.cache_hits);
                    debug!("Cache hit {} (event {}, sentence {})", key, job.event, job.sentence);
                    outcome.result = Ok(Segment {
                        audio: entry.audio().clone(),
                        backend: plan[0].name().to_string(),
                        fallback: false,
                        cached: true,
                    });
                    return outcome;
                }
                Ok(None) => {}
                Err(e) => warn!("Cache lookup failed for {}: {}", key, e),
            }
            StatsCounters::bump(&self.stats.cache_misses);
        }

        let mut attempts = 0;
        let mut last_error = DialogueError::synthesis("no backend attempted");

        for (position, backend) in plan.iter().enumerate() {
            for attempt in 0..=self.retry.max_retries {
                if self.cancel.is_cancelled() {
                    outcome.result = Err(SynthesisFailure {
                        error: DialogueError::Cancelled,
                        attempts,
                    });
                    return outcome;
                }

                attempts += 1;
                StatsCounters::bump(&self.stats.backend_calls);
                match backend.synthesize(&job.text, &job.voice).await {
                    Ok(audio) => {
                        if position == 0 {
                            if let Some(cache) = &self.cache {
                                if let Err(e) = cache.put(&key, CacheEntry::new(audio.clone())).await {
                                    warn!("Cache write failed for {}: {}", key, e);
                                    outcome.cache_warning = Some(Warning::CacheWrite { message: e.to_string() });
                                }
                            }
                        } else {
                            StatsCounters::bump(&self.stats.fallbacks);
                            warn!(
                                "Event {} sentence {} synthesized by fallback backend '{}'",
                                job.event,
                                job.sentence,
                                backend.name()
                            );
                        }
                        outcome.result = Ok(Segment {
                            audio,
                            backend: backend.name().to_string(),
                            fallback: position > 0,
                            cached: false,
                        });
                        return outcome;
                    }
                    Err(e) if e.is_retriable() && attempt < self.retry.max_retries => {
                        StatsCounters::bump(&self.stats.retries);
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            "Backend '{}' failed (attempt {}), retrying in {:?}: {}",
                            backend.name(),
                            attempt + 1,
                            delay,
                            e
                        );
                        last_error = e;
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.cancel.cancelled() => {
                                outcome.result = Err(SynthesisFailure { error: DialogueError::Cancelled, attempts });
                                return outcome;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Backend '{}' gave up on event {}: {}", backend.name(), job.event, e);
                        last_error = e;
                        break;
                    }
                }
            }
        }

        outcome.result = Err(SynthesisFailure {
            error: last_error,
            attempts,
        });
        outcome
    }
}

/// Resolves parsed events into a [`Timeline`]
pub struct Dispatcher {
    backends: BackendChain,
    cache: Option<Arc<dyn SynthesisCache>>,
    clips: Arc<dyn ClipLoader>,
    options: DispatchOptions,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backends", &self.backends)
            .field("cache", &self.cache.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        backends: BackendChain,
        cache: Option<Arc<dyn SynthesisCache>>,
        clips: Arc<dyn ClipLoader>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            backends,
            cache,
            clips,
            options,
        }
    }

    /// Dispatch options
    #[must_use]
    pub const fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Resolve every event
    ///
    /// `voices[i]` must hold the voice for every speech event `events[i]`.
    /// Synthesis failures become [`Resolution::Failed`] entries rather than errors.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the token fires, `Concurrency` if a worker dies,
    /// or `InvalidInput` if a speech event has no voice.
    pub async fn dispatch(
        &self,
        events: Vec<Event>,
        voices: Vec<Option<Arc<VoiceConfig>>>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> DialogueResult<DispatchOutput> {
        if cancel.is_cancelled() {
            return Err(DialogueError::Cancelled);
        }
        if voices.len() != events.len() {
            return Err(DialogueError::invalid_input(format!(
                "{} voices given for {} events",
                voices.len(),
                events.len()
            )));
        }

        let total = events.len();
        let mut slots: Vec<Option<Resolution>> = vec![None; total];
        let mut pending: Vec<Option<PendingSpeech>> = (0..total).map(|_| None).collect();
        let mut jobs = VecDeque::new();

        for (index, (event, voice)) in events.iter().zip(&voices).enumerate() {
            if let Event::Speech { text, line_number, .. } = event {
                let voice = voice.as_ref().ok_or_else(|| {
                    DialogueError::invalid_input(format!("No voice resolved for line {line_number}"))
                })?;
                let sentences = if self.options.split_sentences {
                    split_sentences(text)
                } else {
                    vec![text.clone()]
                };
                pending[index] = Some(PendingSpeech {
                    segments: vec![None; sentences.len()],
                    remaining: sentences.len(),
                    failure: None,
                });
                for (sentence, text) in sentences.into_iter().enumerate() {
                    jobs.push_back(Job {
                        event: index,
                        sentence,
                        text,
                        voice: Arc::clone(voice),
                    });
                }
            }
        }

        let job_count = jobs.len();
        let worker_count = self.options.workers.max(1).min(job_count);
        info!("Dispatching {} events ({} synthesis jobs) on {} workers", total, job_count, worker_count);

        let context = Arc::new(WorkerContext {
            backends: self.backends.clone(),
            cache: self.cache.clone(),
            retry: self.options.retry,
            sample_rate: self.options.sample_rate,
            stats: StatsCounters::default(),
            cancel: cancel.clone(),
        });
        let queue = Arc::new(Mutex::new(jobs));
        let (sender, mut receiver) = mpsc::channel(job_count.max(1));
        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let context = Arc::clone(&context);
            let queue = Arc::clone(&queue);
            let sender = sender.clone();
            workers.spawn(async move { context.run(&queue, &sender).await });
        }
        drop(sender);

        let mut tracker = ProgressTracker {
            sink: progress,
            completed: 0,
            total,
        };

        for (index, event) in events.iter().enumerate() {
            if cancel.is_cancelled() {
                workers.abort_all();
                info!("Dispatch cancelled while resolving directives");
                return Err(DialogueError::Cancelled);
            }
            let resolution = match event {
                Event::Speech { .. } => continue,
                Event::Silence { duration_ms, .. } => Resolution::Silence {
                    duration_ms: *duration_ms,
                },
                Event::SoundEffect { path, .. } => {
                    let loaded = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        loaded = self.clips.load(path) => Some(loaded),
                    };
                    let Some(loaded) = loaded else {
                        workers.abort_all();
                        info!("Dispatch cancelled while loading {}", path.display());
                        return Err(DialogueError::Cancelled);
                    };
                    match loaded {
                        Ok(clip) => {
                            let clip = if clip.channels() > 2 { clip.to_mono() } else { clip };
                            Resolution::Clip(clip.resample(self.options.sample_rate))
                        }
                        Err(e) => {
                            warn!("Sound effect {} skipped: {}", path.display(), e);
                            Resolution::MissingClip { reason: e.to_string() }
                        }
                    }
                }
            };
            slots[index] = Some(resolution);
            tracker.resolved(index, event);
        }

        let mut warnings = Vec::new();
        let mut failures = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcome = receiver.recv() => match outcome {
                    Some(outcome) => Some(outcome),
                    None => break,
                },
            };
            let Some(outcome) = outcome else {
                workers.abort_all();
                info!("Dispatch cancelled after {}/{} events", tracker.completed, total);
                return Err(DialogueError::Cancelled);
            };

            if let Some(warning) = outcome.cache_warning {
                warnings.push(warning);
            }
            let Some(speech) = pending[outcome.event].as_mut() else {
                return Err(DialogueError::concurrency(format!(
                    "Outcome for event {} that has no pending speech",
                    outcome.event
                )));
            };
            match outcome.result {
                Ok(segment) => speech.segments[outcome.sentence] = Some(segment),
                Err(failure) if failure.error == DialogueError::Cancelled => {
                    workers.abort_all();
                    return Err(DialogueError::Cancelled);
                }
                Err(failure) => speech.failure = Some(failure),
            }
            speech.remaining -= 1;

            if speech.remaining == 0 {
                let resolution = if let Some(failure) = speech.failure.take() {
                    failures += 1;
                    Resolution::Failed(failure)
                } else {
                    Resolution::Speech(speech.segments.drain(..).flatten().collect())
                };
                slots[outcome.event] = Some(resolution);
                tracker.resolved(outcome.event, &events[outcome.event]);
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                return Err(DialogueError::concurrency(format!("Synthesis worker failed: {e}")));
            }
        }
        if cancel.is_cancelled() {
            return Err(DialogueError::Cancelled);
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, resolution)| {
                resolution
                    .map(|resolution| SynthesisResult { index, resolution })
                    .ok_or_else(|| DialogueError::concurrency(format!("Event {index} was never resolved")))
            })
            .collect::<DialogueResult<Vec<_>>>()?;

        let stats = DispatchStats {
            jobs: job_count as u64,
            workers: worker_count as u64,
            cache_hits: context.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: context.stats.cache_misses.load(Ordering::Relaxed),
            backend_calls: context.stats.backend_calls.load(Ordering::Relaxed),
            retries: context.stats.retries.load(Ordering::Relaxed),
            failures,
            fallbacks: context.stats.fallbacks.load(Ordering::Relaxed),
        };
        info!("{}", stats);

        Ok(DispatchOutput {
            timeline: Timeline::new(events, voices, results)?,
            stats,
            warnings,
        })
    }
}
