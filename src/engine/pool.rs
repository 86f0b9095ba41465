// src/engine/pool.rs
//
// Dispatcher / job pool.
//
// **Architecture**: one coordinator thread owns every registry (pending
// queue, job entries, slots). Callers and units never touch that state;
// they talk to the coordinator over a single mpsc channel:
//
// - `JobPool` sends commands (enqueue, cancel, stats, dispose)
// - units send `UnitEvent`s tagged with their slot index
//
// All job callbacks run on the coordinator thread, one at a time. A callback
// that panics is contained and logged; the pool keeps running.
//
// **Scheduling**: strict FIFO into the first idle slot in construction
// order. A retried job goes back to the *front* of the queue.
//
// **Pool size**: `available_parallelism()` clamped to 1..=4, fallback 2.
// Can be overridden with IMGBATCH_POOL_SIZE / IMGBATCH_RETRY_LIMIT.

use crate::engine::common::run_with_panic_policy;
use crate::engine::job::{Job, JobCallbacks, JobHandle};
use crate::engine::protocol::{JobFailure, JobId, JobMeta, UnitEvent, UnitRequest};
use crate::engine::signal::{CancelSignal, ListenerId};
use crate::engine::unit::{ExecutionUnit, PostError, ThreadUnit, UnitFactory, UnitOutbox};
use crate::error::{ErrorCategory, PoolError};
use crate::settings::Settings;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

/// Smallest pool.
pub const MIN_POOL_SIZE: usize = 1;

/// Largest pool. Each unit holds a decoded image, so more units mostly
/// buys memory pressure.
pub const MAX_POOL_SIZE: usize = 4;

/// Used when hardware parallelism cannot be detected.
const FALLBACK_POOL_SIZE: usize = 2;

pub const DEFAULT_RETRY_LIMIT: u32 = 1;

pub const POOL_SIZE_ENV: &str = "IMGBATCH_POOL_SIZE";
pub const RETRY_LIMIT_ENV: &str = "IMGBATCH_RETRY_LIMIT";

/// Hardware parallelism clamped to `[MIN_POOL_SIZE, MAX_POOL_SIZE]`.
pub fn default_pool_size() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_POOL_SIZE)
        .clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub size: usize,
    /// How many times a failed job is re-queued before its error callback
    /// fires.
    pub retry_limit: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl PoolOptions {
    pub fn new(size: usize, retry_limit: u32) -> Self {
        Self { size, retry_limit }.normalized()
    }

    /// Defaults overridden by `IMGBATCH_POOL_SIZE` and
    /// `IMGBATCH_RETRY_LIMIT`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(size) = lookup(POOL_SIZE_ENV).and_then(|v| v.trim().parse::<usize>().ok()) {
            options.size = size;
        }
        if let Some(limit) = lookup(RETRY_LIMIT_ENV).and_then(|v| v.trim().parse::<u32>().ok()) {
            options.retry_limit = limit;
        }
        options.normalized()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self.normalized()
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    fn normalized(mut self) -> Self {
        self.size = self.size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE);
        self
    }
}

/// Snapshot of the coordinator's registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub size: usize,
    /// Units that reported `Ready`.
    pub ready: usize,
    pub running: usize,
    pub pending: usize,
    pub registered: usize,
}

pub(crate) enum Message {
    Enqueue(Box<Job>),
    Cancel(JobId),
    Stats(Sender<PoolStats>),
    Dispose(Sender<()>),
    Unit { slot: usize, event: UnitEvent },
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Enqueue(job) => f.debug_tuple("Enqueue").field(&job.meta.id).finish(),
            Message::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            Message::Stats(_) => f.write_str("Stats"),
            Message::Dispose(_) => f.write_str("Dispose"),
            Message::Unit { slot, event } => f
                .debug_struct("Unit")
                .field("slot", slot)
                .field("event", event)
                .finish(),
        }
    }
}

/// Bounded pool of execution units with a FIFO queue, retries and
/// cancellation.
///
/// Dropping the pool disposes it.
pub struct JobPool {
    tx: Sender<Message>,
    disposed: Arc<AtomicBool>,
    // Held shared while an enqueue is sent and exclusively while dispose
    // flips `disposed`, so no Enqueue can trail the Dispose message.
    gate: RwLock<()>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    coordinator_id: ThreadId,
    options: PoolOptions,
}

impl JobPool {
    /// Build a pool with one unit per slot from `factory`.
    pub fn new<F: UnitFactory>(factory: F, options: PoolOptions) -> Result<Self, PoolError> {
        let options = options.normalized();
        let (tx, rx) = mpsc::channel();

        let mut slots = Vec::with_capacity(options.size);
        for index in 0..options.size {
            match factory.spawn(UnitOutbox::new(index, tx.clone())) {
                Ok(unit) => slots.push(Slot::new(unit)),
                Err(e) => {
                    for slot in &mut slots {
                        slot.unit.terminate();
                    }
                    return Err(e);
                }
            }
        }

        let coordinator = Coordinator {
            rx,
            tx: tx.clone(),
            slots,
            queue: VecDeque::new(),
            jobs: HashMap::new(),
            retry_limit: options.retry_limit,
        };
        let handle = thread::Builder::new()
            .name("imgbatch-coordinator".into())
            .spawn(move || coordinator.run())
            .map_err(|e| PoolError::unit_spawn(format!("coordinator: {e}")))?;

        info!(
            target: "imgbatch::pool",
            size = options.size,
            retry_limit = options.retry_limit,
            "job pool started"
        );

        Ok(Self {
            tx,
            disposed: Arc::new(AtomicBool::new(false)),
            gate: RwLock::new(()),
            coordinator_id: handle.thread().id(),
            coordinator: Mutex::new(Some(handle)),
            options,
        })
    }

    /// Pool backed by `ThreadUnit`s.
    pub fn with_thread_units(options: PoolOptions) -> Result<Self, PoolError> {
        Self::new(ThreadUnit::factory, options)
    }

    pub fn options(&self) -> PoolOptions {
        self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Submit a job.
    ///
    /// Fails synchronously when the pool is disposed or the settings cannot
    /// be used. A job whose signal already fired gets its cancelled
    /// callback on this thread before `enqueue` returns.
    pub fn enqueue(&self, job: Job) -> Result<JobHandle, PoolError> {
        let gate = self.gate.read();
        if self.is_disposed() {
            return Err(PoolError::Disposed);
        }
        job.settings.validate().map_err(PoolError::InvalidSettings)?;

        let id = job.meta.id.clone();
        let already_cancelled = job.signal.as_ref().is_some_and(CancelSignal::is_cancelled);
        if already_cancelled {
            // The callback may dispose the pool.
            drop(gate);
            debug!(target: "imgbatch::pool", job = %id, "signal already fired, job not queued");
            job.callbacks.cancelled();
            return Ok(JobHandle::finished(id));
        }

        self.tx
            .send(Message::Enqueue(Box::new(job)))
            .map_err(|_| PoolError::Disposed)?;
        drop(gate);

        let tx = self.tx.clone();
        Ok(JobHandle::new(
            id,
            Arc::new(move |id: &str| {
                let _ = tx.send(Message::Cancel(id.to_string()));
            }),
            self.disposed.clone(),
        ))
    }

    /// Cancel a queued or running job. Unknown ids are ignored.
    pub fn cancel(&self, id: &str) {
        if self.is_disposed() {
            return;
        }
        let _ = self.tx.send(Message::Cancel(id.to_string()));
    }

    /// Snapshot of the registries. Must not be called from a job callback.
    pub fn stats(&self) -> Result<PoolStats, PoolError> {
        if self.is_disposed() {
            return Err(PoolError::Disposed);
        }
        if thread::current().id() == self.coordinator_id {
            return Err(PoolError::Reentrant);
        }
        let (reply, answer) = mpsc::channel();
        self.tx
            .send(Message::Stats(reply))
            .map_err(|_| PoolError::Disposed)?;
        answer.recv().map_err(|_| PoolError::Disposed)
    }

    /// Cancel everything and stop the units. Idempotent.
    ///
    /// Blocks until every cancelled callback has fired, unless called from
    /// a job callback, in which case teardown happens as soon as that
    /// callback returns.
    pub fn dispose(&self) {
        let (reply, done) = mpsc::channel();
        {
            let _gate = self.gate.write();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            if self.tx.send(Message::Dispose(reply)).is_err() {
                return;
            }
        }
        if thread::current().id() == self.coordinator_id {
            return;
        }
        let _ = done.recv();
        if let Some(handle) = self.coordinator.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Slot {
    unit: Box<dyn ExecutionUnit>,
    current: Option<JobId>,
    ready: bool,
}

impl Slot {
    fn new(unit: Box<dyn ExecutionUnit>) -> Self {
        Self {
            unit,
            current: None,
            ready: false,
        }
    }

    fn runs(&self, id: &str) -> bool {
        self.current.as_deref() == Some(id)
    }
}

/// Registry record for a live job.
struct Entry {
    meta: JobMeta,
    settings: Settings,
    /// `None` while a unit owns the buffer.
    input: Option<Vec<u8>>,
    callbacks: JobCallbacks,
    attempt: u32,
    last_progress: Option<u8>,
    cancel_requested: bool,
    listener: Option<(CancelSignal, ListenerId)>,
}

struct Coordinator {
    rx: Receiver<Message>,
    tx: Sender<Message>,
    slots: Vec<Slot>,
    queue: VecDeque<JobId>,
    jobs: HashMap<JobId, Entry>,
    retry_limit: u32,
}

fn guarded(label: &'static str, f: impl FnOnce()) {
    let _ = run_with_panic_policy(label, || {
        f();
        Ok(())
    });
}

impl Coordinator {
    fn run(mut self) {
        while let Ok(message) = self.rx.recv() {
            match message {
                Message::Enqueue(job) => self.enqueue(*job),
                Message::Cancel(id) => self.cancel(&id),
                Message::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Message::Unit { slot, event } => self.handle_event(slot, event),
                Message::Dispose(reply) => {
                    self.dispose();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.slots.len(),
            ready: self.slots.iter().filter(|s| s.ready).count(),
            running: self.slots.iter().filter(|s| s.current.is_some()).count(),
            pending: self.queue.len(),
            registered: self.jobs.len(),
        }
    }

    fn enqueue(&mut self, job: Job) {
        let Job {
            meta,
            settings,
            input,
            signal,
            callbacks,
        } = job;
        let id = meta.id.clone();

        if self.jobs.contains_key(&id) {
            warn!(target: "imgbatch::pool", job = %id, "duplicate job id rejected");
            guarded("callback:error", || {
                callbacks.error(JobFailure {
                    message: format!("job '{id}' is already queued or running"),
                    category: ErrorCategory::Unknown,
                    recoverable: false,
                })
            });
            return;
        }

        // A signal that fires from here on sends a Cancel behind this
        // Enqueue, so the job is registered by the time it arrives.
        let listener = signal.and_then(|signal| {
            let tx = self.tx.clone();
            let target = id.clone();
            signal
                .subscribe(move || {
                    let _ = tx.send(Message::Cancel(target));
                })
                .map(|lid| (signal, lid))
        });

        self.jobs.insert(
            id.clone(),
            Entry {
                meta,
                settings,
                input: Some(input),
                callbacks,
                attempt: 0,
                last_progress: None,
                cancel_requested: false,
                listener,
            },
        );
        self.queue.push_back(id.clone());
        debug!(target: "imgbatch::pool", job = %id, pending = self.queue.len(), "job queued");
        self.drain();
    }

    fn cancel(&mut self, id: &str) {
        if let Some(pos) = self.queue.iter().position(|queued| queued == id) {
            self.queue.remove(pos);
            if let Some(entry) = self.remove(id) {
                debug!(target: "imgbatch::pool", job = %id, "queued job cancelled");
                guarded("callback:cancelled", || entry.callbacks.cancelled());
            }
            return;
        }

        let Some(index) = self.slots.iter().position(|slot| slot.runs(id)) else {
            return;
        };
        if let Some(entry) = self.jobs.get_mut(id) {
            entry.cancel_requested = true;
        }
        let request = UnitRequest::Cancel { id: id.to_string() };
        match self.slots[index].unit.post(request) {
            Ok(()) => {
                debug!(target: "imgbatch::pool", job = %id, slot = index, "cancel forwarded to unit");
            }
            Err(PostError { error, .. }) => {
                warn!(
                    target: "imgbatch::pool",
                    job = %id,
                    slot = index,
                    error = %error,
                    "cancel delivery failed"
                );
                self.slots[index].current = None;
                if let Some(entry) = self.remove(id) {
                    let failure = JobFailure::from_message(error.to_string(), true);
                    guarded("callback:error", || entry.callbacks.error(failure));
                }
                self.drain();
            }
        }
    }

    fn handle_event(&mut self, slot: usize, event: UnitEvent) {
        if slot >= self.slots.len() {
            return;
        }
        if let UnitEvent::Ready = event {
            self.slots[slot].ready = true;
            debug!(target: "imgbatch::pool", slot, "unit ready");
            return;
        }
        // Stale: the slot has moved on from this job.
        match event.job_id() {
            Some(id) if self.slots[slot].runs(id) => {}
            _ => return,
        }

        match event {
            UnitEvent::Ready => {}
            UnitEvent::Progress { id, progress } => {
                let Some(entry) = self.jobs.get_mut(&id) else {
                    return;
                };
                if entry.cancel_requested {
                    return;
                }
                let progress = progress.min(100);
                if entry.last_progress.is_some_and(|last| progress < last) {
                    return;
                }
                entry.last_progress = Some(progress);
                let callbacks = &mut entry.callbacks;
                guarded("callback:progress", || callbacks.progress(progress));
            }
            UnitEvent::Done { id, result } => {
                self.slots[slot].current = None;
                if let Some(entry) = self.remove(&id) {
                    debug!(
                        target: "imgbatch::pool",
                        job = %id,
                        slot,
                        bytes = result.size,
                        "job completed"
                    );
                    guarded("callback:completed", || entry.callbacks.completed(result));
                }
                self.drain();
            }
            UnitEvent::Error {
                id,
                failure,
                returned_input,
            } => {
                self.settle_failure(slot, &id, failure, returned_input);
                self.drain();
            }
        }
    }

    /// Release `slot` and route a failed attempt: cancelled, retried or
    /// terminal. Does not drain.
    fn settle_failure(
        &mut self,
        slot: usize,
        id: &str,
        failure: JobFailure,
        returned_input: Option<Vec<u8>>,
    ) {
        self.slots[slot].current = None;
        let Some(entry) = self.jobs.get_mut(id) else {
            return;
        };

        if failure.is_cancellation() || entry.cancel_requested {
            if let Some(entry) = self.remove(id) {
                debug!(target: "imgbatch::pool", job = %id, slot, "running job cancelled");
                guarded("callback:cancelled", || entry.callbacks.cancelled());
            }
            return;
        }

        // Without the buffer back there is nothing to retry with.
        if entry.attempt < self.retry_limit && returned_input.is_some() {
            entry.attempt += 1;
            entry.input = returned_input;
            warn!(
                target: "imgbatch::pool",
                job = %id,
                slot,
                attempt = entry.attempt,
                category = %failure.category,
                error = %failure.message,
                "job failed, retrying"
            );
            self.queue.push_front(id.to_string());
            return;
        }

        if let Some(entry) = self.remove(id) {
            debug!(
                target: "imgbatch::pool",
                job = %id,
                slot,
                category = %failure.category,
                "job failed"
            );
            guarded("callback:error", || entry.callbacks.error(failure));
        }
    }

    fn drain(&mut self) {
        loop {
            let Some(index) = self.slots.iter().position(|slot| slot.current.is_none()) else {
                return;
            };
            let Some(id) = self.queue.pop_front() else {
                return;
            };
            self.run_job(index, id);
        }
    }

    fn run_job(&mut self, index: usize, id: JobId) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };
        let request = UnitRequest::Process {
            meta: entry.meta.clone(),
            settings: entry.settings.clone(),
            input: entry.input.take().unwrap_or_default(),
        };
        debug!(
            target: "imgbatch::pool",
            job = %id,
            slot = index,
            attempt = entry.attempt,
            "job assigned"
        );
        self.slots[index].current = Some(id.clone());

        if let Err(PostError { request, error }) = self.slots[index].unit.post(request) {
            let input = match request {
                UnitRequest::Process { input, .. } => Some(input),
                _ => None,
            };
            let failure = JobFailure::from_message(error.to_string(), true);
            self.settle_failure(index, &id, failure, input);
        }
    }

    /// Take a job out of the registry and detach its signal listener.
    fn remove(&mut self, id: &str) -> Option<Entry> {
        let mut entry = self.jobs.remove(id)?;
        if let Some((signal, lid)) = entry.listener.take() {
            signal.unsubscribe(lid);
        }
        Some(entry)
    }

    fn dispose(&mut self) {
        while let Some(id) = self.queue.pop_front() {
            if let Some(entry) = self.remove(&id) {
                guarded("callback:cancelled", || entry.callbacks.cancelled());
            }
        }
        for index in 0..self.slots.len() {
            if let Some(id) = self.slots[index].current.take() {
                if let Some(entry) = self.remove(&id) {
                    guarded("callback:cancelled", || entry.callbacks.cancelled());
                }
            }
            self.slots[index].unit.terminate();
        }
        let leftover: Vec<JobId> = self.jobs.keys().cloned().collect();
        for id in leftover {
            self.remove(&id);
        }

        // Commands that raced with disposal.
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Enqueue(job) => {
                    guarded("callback:cancelled", || job.callbacks.cancelled());
                }
                Message::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Message::Dispose(reply) => {
                    let _ = reply.send(());
                }
                Message::Cancel(_) | Message::Unit { .. } => {}
            }
        }
        info!(target: "imgbatch::pool", "job pool disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Env;

    #[test]
    fn default_size_is_clamped() {
        let size = default_pool_size();
        assert!((MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&size));
        assert_eq!(PoolOptions::default().retry_limit, 1);
    }

    #[test]
    fn options_are_clamped() {
        assert_eq!(PoolOptions::new(0, 2).size, 1);
        assert_eq!(PoolOptions::new(64, 2).size, MAX_POOL_SIZE);
        assert_eq!(PoolOptions::new(3, 2).size, 3);
    }

    #[test]
    fn env_overrides() {
        let env: Env<&str, &str> = [(POOL_SIZE_ENV, "3"), (RETRY_LIMIT_ENV, " 5 ")].into();
        let options = PoolOptions::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(options, PoolOptions::new(3, 5));
    }

    #[test]
    fn unparseable_env_is_ignored() {
        let env: Env<&str, &str> = [(POOL_SIZE_ENV, "many"), (RETRY_LIMIT_ENV, "-1")].into();
        let options = PoolOptions::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(options, PoolOptions::default());
    }

    #[test]
    fn env_size_is_clamped() {
        let env: Env<&str, &str> = [(POOL_SIZE_ENV, "0")].into();
        let options = PoolOptions::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(options.size, MIN_POOL_SIZE);
    }
}
