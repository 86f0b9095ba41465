// src/engine/unit.rs
//
// Execution units: the seam between the coordinator and whatever runs a
// job's pipeline.
//
// A unit owns at most one job at a time. Everything it reports goes through
// its `UnitOutbox`, which tags events with the unit's slot index so the
// coordinator can tell units apart on a single channel.

use crate::engine::common::run_with_panic_policy;
use crate::engine::pipeline::{run_pipeline, StageObserver};
use crate::engine::pool::Message;
use crate::engine::protocol::{JobFailure, JobId, ProcessResult, UnitEvent, UnitRequest};
use crate::error::{PoolError, ProcessError};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace};

/// A request the unit could not accept. The request is handed back so its
/// input buffer is not lost.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PostError {
    pub request: UnitRequest,
    #[source]
    pub error: PoolError,
}

/// Something that runs jobs for one pool slot.
pub trait ExecutionUnit: Send {
    /// Deliver a request. Must not block on job execution.
    fn post(&mut self, request: UnitRequest) -> Result<(), PostError>;

    /// Stop the unit. Called once, when the pool is disposed.
    fn terminate(&mut self);
}

/// Builds one unit per slot at pool construction.
pub trait UnitFactory {
    fn spawn(&self, outbox: UnitOutbox) -> Result<Box<dyn ExecutionUnit>, PoolError>;
}

impl<F> UnitFactory for F
where
    F: Fn(UnitOutbox) -> Result<Box<dyn ExecutionUnit>, PoolError>,
{
    fn spawn(&self, outbox: UnitOutbox) -> Result<Box<dyn ExecutionUnit>, PoolError> {
        self(outbox)
    }
}

/// Outbound channel of one unit.
#[derive(Debug, Clone)]
pub struct UnitOutbox {
    slot: usize,
    tx: Sender<Message>,
}

impl UnitOutbox {
    pub(crate) fn new(slot: usize, tx: Sender<Message>) -> Self {
        Self { slot, tx }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Report an event. Returns `false` once the pool is gone.
    pub fn send(&self, event: UnitEvent) -> bool {
        self.tx
            .send(Message::Unit {
                slot: self.slot,
                event,
            })
            .is_ok()
    }
}

/// Unit backed by a dedicated OS thread.
pub struct ThreadUnit {
    slot: usize,
    tx: Sender<UnitRequest>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadUnit {
    pub fn spawn(outbox: UnitOutbox) -> Result<Self, PoolError> {
        let slot = outbox.slot();
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("imgbatch-unit-{slot}"))
            .spawn(move || unit_loop(rx, outbox))
            .map_err(|e| PoolError::unit_spawn(format!("slot {slot}: {e}")))?;
        Ok(Self {
            slot,
            tx,
            handle: Some(handle),
        })
    }

    /// Factory for `JobPool::new`.
    pub fn factory(outbox: UnitOutbox) -> Result<Box<dyn ExecutionUnit>, PoolError> {
        Ok(Box::new(Self::spawn(outbox)?))
    }
}

impl ExecutionUnit for ThreadUnit {
    fn post(&mut self, request: UnitRequest) -> Result<(), PostError> {
        self.tx.send(request).map_err(|mpsc::SendError(request)| PostError {
            request,
            error: PoolError::unit_unavailable(format!("unit {} has stopped", self.slot)),
        })
    }

    fn terminate(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(UnitRequest::Shutdown);
            // Detached: a job mid-encode finishes on its own and its report
            // is dropped by the coordinator.
            drop(handle);
        }
    }
}

impl Drop for ThreadUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Polls the inbox between pipeline stages.
struct InboxWatch<'a> {
    job: &'a str,
    inbox: &'a Receiver<UnitRequest>,
    outbox: &'a UnitOutbox,
    backlog: &'a mut VecDeque<UnitRequest>,
    aborted: bool,
    shutdown: bool,
}

impl StageObserver for InboxWatch<'_> {
    fn progress(&mut self, percent: u8) {
        self.outbox.send(UnitEvent::Progress {
            id: self.job.to_string(),
            progress: percent,
        });
    }

    fn should_abort(&mut self) -> bool {
        loop {
            match self.inbox.try_recv() {
                Ok(UnitRequest::Cancel { id }) if id == self.job => self.aborted = true,
                Ok(UnitRequest::Cancel { .. }) => {}
                Ok(UnitRequest::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.aborted = true;
                    self.shutdown = true;
                    break;
                }
                Ok(request @ UnitRequest::Process { .. }) => self.backlog.push_back(request),
                Err(TryRecvError::Empty) => break,
            }
        }
        self.aborted
    }
}

fn unit_loop(inbox: Receiver<UnitRequest>, outbox: UnitOutbox) {
    let slot = outbox.slot();
    outbox.send(UnitEvent::Ready);
    debug!(target: "imgbatch::unit", slot, "unit ready");

    let mut backlog = VecDeque::new();
    loop {
        let request = match backlog.pop_front() {
            Some(request) => request,
            None => match inbox.recv() {
                Ok(request) => request,
                Err(_) => break,
            },
        };

        match request {
            UnitRequest::Process {
                meta,
                settings,
                input,
            } => {
                let started = Instant::now();
                let mut watch = InboxWatch {
                    job: &meta.id,
                    inbox: &inbox,
                    outbox: &outbox,
                    backlog: &mut backlog,
                    aborted: false,
                    shutdown: false,
                };
                let outcome = run_with_panic_policy("pipeline", || {
                    run_pipeline(&meta, &settings, &input, &mut watch)
                });
                let shutdown = watch.shutdown;
                trace!(
                    target: "imgbatch::unit",
                    slot,
                    job = %meta.id,
                    ok = outcome.is_ok(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "job finished"
                );
                report(&outbox, meta.id, outcome, input);
                if shutdown {
                    break;
                }
            }
            // Nothing is running, so there is nothing to cancel.
            UnitRequest::Cancel { .. } => {}
            UnitRequest::Shutdown => break,
        }
    }
    debug!(target: "imgbatch::unit", slot, "unit stopped");
}

fn report(
    outbox: &UnitOutbox,
    id: JobId,
    outcome: Result<ProcessResult, ProcessError>,
    input: Vec<u8>,
) {
    match outcome {
        Ok(result) => {
            outbox.send(UnitEvent::Done { id, result });
        }
        Err(err) => {
            let failure = JobFailure::from(&err);
            let returned_input = (!failure.is_cancellation()).then_some(input);
            outbox.send(UnitEvent::Error {
                id,
                failure,
                returned_input,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::JobMeta;
    use crate::error::ErrorCategory;
    use crate::settings::Settings;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(30);

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([x as u8, y as u8, 7])
        }));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn unit_events(rx: &Receiver<Message>) -> UnitEvent {
        match rx.recv_timeout(WAIT).unwrap() {
            Message::Unit { slot, event } => {
                assert_eq!(slot, 3);
                event
            }
            _ => panic!("unexpected coordinator message"),
        }
    }

    fn spawn_unit() -> (ThreadUnit, Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        let unit = ThreadUnit::spawn(UnitOutbox::new(3, tx)).unwrap();
        assert!(matches!(unit_events(&rx), UnitEvent::Ready));
        (unit, rx)
    }

    #[test]
    fn runs_a_job_and_reports_progress_then_done() {
        let (mut unit, rx) = spawn_unit();
        unit.post(UnitRequest::Process {
            meta: JobMeta::new("j", "j.png", "image/png"),
            settings: Settings::default(),
            input: png_bytes(16, 16),
        })
        .unwrap();

        let mut progress = Vec::new();
        loop {
            match unit_events(&rx) {
                UnitEvent::Progress { id, progress: p } => {
                    assert_eq!(id, "j");
                    progress.push(p);
                }
                UnitEvent::Done { id, result } => {
                    assert_eq!(id, "j");
                    assert_eq!(result.name, "j.jpg");
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(progress, vec![0, 10, 55, 80, 100]);
        unit.terminate();
    }

    #[test]
    fn empty_input_fails_with_no_data_and_returns_buffer() {
        let (mut unit, rx) = spawn_unit();
        unit.post(UnitRequest::Process {
            meta: JobMeta::new("e", "e.png", "image/png"),
            settings: Settings::default(),
            input: Vec::new(),
        })
        .unwrap();

        assert!(matches!(
            unit_events(&rx),
            UnitEvent::Progress { progress: 0, .. }
        ));
        match unit_events(&rx) {
            UnitEvent::Error {
                failure,
                returned_input,
                ..
            } => {
                assert_eq!(failure.message, "no-data");
                assert_eq!(failure.category, ErrorCategory::Unknown);
                assert_eq!(returned_input, Some(Vec::new()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn post_after_terminate_hands_the_request_back() {
        let (mut unit, _rx) = spawn_unit();
        unit.terminate();
        // The thread may still be draining; wait until the channel closes.
        let mut request = UnitRequest::Cancel { id: "x".into() };
        let started = Instant::now();
        loop {
            match unit.post(request) {
                Ok(()) => {
                    assert!(started.elapsed() < WAIT);
                    thread::sleep(Duration::from_millis(5));
                    request = UnitRequest::Cancel { id: "x".into() };
                }
                Err(err) => {
                    assert!(matches!(err.request, UnitRequest::Cancel { .. }));
                    assert!(matches!(err.error, PoolError::UnitUnavailable { .. }));
                    break;
                }
            }
        }
    }
}
