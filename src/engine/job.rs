// src/engine/job.rs
//
// A job as the caller hands it to the pool: metadata, settings, the input
// buffer, an optional cancellation signal and its callbacks.

use crate::engine::protocol::{JobFailure, JobId, JobMeta, ProcessResult};
use crate::engine::signal::CancelSignal;
use crate::settings::Settings;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type ProgressFn = Box<dyn FnMut(u8) + Send>;
type CompletedFn = Box<dyn FnOnce(ProcessResult) + Send>;
type ErrorFn = Box<dyn FnOnce(JobFailure) + Send>;
type CancelledFn = Box<dyn FnOnce() + Send>;

/// Callback slots. Every slot is optional; a missing slot drops the event.
///
/// Exactly one of `completed`, `error` or `cancelled` fires per job.
#[derive(Default)]
pub struct JobCallbacks {
    progress: Option<ProgressFn>,
    completed: Option<CompletedFn>,
    error: Option<ErrorFn>,
    cancelled: Option<CancelledFn>,
}

impl JobCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(u8) + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn on_completed(mut self, f: impl FnOnce(ProcessResult) + Send + 'static) -> Self {
        self.completed = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(JobFailure) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_cancelled(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.cancelled = Some(Box::new(f));
        self
    }

    pub(crate) fn progress(&mut self, percent: u8) {
        if let Some(f) = self.progress.as_mut() {
            f(percent);
        }
    }

    pub(crate) fn completed(self, result: ProcessResult) {
        if let Some(f) = self.completed {
            f(result);
        }
    }

    pub(crate) fn error(self, failure: JobFailure) {
        if let Some(f) = self.error {
            f(failure);
        }
    }

    pub(crate) fn cancelled(self) {
        if let Some(f) = self.cancelled {
            f();
        }
    }
}

impl fmt::Debug for JobCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCallbacks")
            .field("progress", &self.progress.is_some())
            .field("completed", &self.completed.is_some())
            .field("error", &self.error.is_some())
            .field("cancelled", &self.cancelled.is_some())
            .finish()
    }
}

/// One unit of work for the pool.
#[derive(Debug)]
pub struct Job {
    pub meta: JobMeta,
    pub settings: Settings,
    /// Moves to the execution unit that accepts the job.
    pub input: Vec<u8>,
    pub signal: Option<CancelSignal>,
    pub callbacks: JobCallbacks,
}

impl Job {
    pub fn new(meta: JobMeta, settings: Settings, input: Vec<u8>) -> Self {
        Self {
            meta,
            settings,
            input,
            signal: None,
            callbacks: JobCallbacks::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_callbacks(mut self, callbacks: JobCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Returned by `JobPool::enqueue`.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    disposed: Arc<AtomicBool>,
}

impl JobHandle {
    pub(crate) fn new(
        id: JobId,
        cancel: Arc<dyn Fn(&str) + Send + Sync>,
        disposed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            cancel: Some(cancel),
            disposed,
        }
    }

    /// Handle for a job that already reached its terminal state.
    pub(crate) fn finished(id: JobId) -> Self {
        Self {
            id,
            cancel: None,
            disposed: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cancellation. No-op once the job is terminal or the pool is
    /// gone.
    pub fn cancel(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if let Some(cancel) = &self.cancel {
            cancel(&self.id);
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn missing_slots_are_skipped() {
        let mut callbacks = JobCallbacks::new();
        callbacks.progress(50);
        callbacks.cancelled();
    }

    #[test]
    fn progress_slot_is_reusable() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let mut callbacks = JobCallbacks::new().on_progress(move |p| {
            s.fetch_add(p as usize, Ordering::SeqCst);
        });
        callbacks.progress(10);
        callbacks.progress(55);
        assert_eq!(seen.load(Ordering::SeqCst), 65);
    }

    #[test]
    fn finished_handle_cancel_is_noop() {
        let handle = JobHandle::finished("x".into());
        handle.cancel();
        assert_eq!(handle.id(), "x");
    }

    #[test]
    fn handle_forwards_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = JobHandle::new(
            "a".into(),
            Arc::new(move |id: &str| {
                assert_eq!(id, "a");
                c.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(AtomicBool::new(false)),
        );
        handle.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
