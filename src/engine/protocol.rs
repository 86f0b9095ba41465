// src/engine/protocol.rs
//
// Messages exchanged between the coordinator and execution units, plus the
// job metadata and result types they carry.

use crate::error::{categorize, ErrorCategory, ProcessError, CANCELLED_SENTINEL};
use crate::settings::{OutputFormat, Settings};

/// Caller-assigned job identity, unique while the job is live.
pub type JobId = String;

/// What the caller knows about a source before it is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMeta {
    pub id: JobId,
    /// Display name of the source, used to derive the output name.
    pub name: String,
    /// Declared MIME type. Magic bytes win when they disagree.
    pub mime: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
}

impl JobMeta {
    pub fn new(id: impl Into<JobId>, name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime: mime.into(),
            size: 0,
            width: 0,
            height: 0,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Output of one successful job. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub bytes: Vec<u8>,
    pub size: usize,
    pub name: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// A failure as reported across the unit boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub category: ErrorCategory,
    pub recoverable: bool,
}

impl JobFailure {
    /// Failure from a free-form message; the category is inferred.
    pub fn from_message(message: impl Into<String>, recoverable: bool) -> Self {
        let message = message.into();
        Self {
            category: categorize(&message),
            message,
            recoverable,
        }
    }

    /// The acknowledgement a unit sends after aborting a job.
    pub fn cancelled() -> Self {
        Self {
            message: CANCELLED_SENTINEL.to_string(),
            category: ErrorCategory::Cancelled,
            recoverable: true,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.message == CANCELLED_SENTINEL
    }
}

impl From<&ProcessError> for JobFailure {
    fn from(err: &ProcessError) -> Self {
        if matches!(err, ProcessError::Cancelled) {
            return Self::cancelled();
        }
        Self {
            message: err.to_string(),
            category: err.category(),
            recoverable: err.is_recoverable(),
        }
    }
}

/// Coordinator -> unit.
#[derive(Debug)]
pub enum UnitRequest {
    /// Run one job. The input buffer moves into the unit.
    Process {
        meta: JobMeta,
        settings: Settings,
        input: Vec<u8>,
    },
    Cancel {
        id: JobId,
    },
    /// Stop the unit. A job in flight is abandoned.
    Shutdown,
}

/// Unit -> coordinator.
#[derive(Debug)]
pub enum UnitEvent {
    Ready,
    Progress {
        id: JobId,
        progress: u8,
    },
    Done {
        id: JobId,
        result: ProcessResult,
    },
    Error {
        id: JobId,
        failure: JobFailure,
        /// The job's input handed back so a retry needs no copy.
        returned_input: Option<Vec<u8>>,
    },
}

impl UnitEvent {
    /// Job the event refers to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            UnitEvent::Ready => None,
            UnitEvent::Progress { id, .. }
            | UnitEvent::Done { id, .. }
            | UnitEvent::Error { id, .. } => Some(id),
        }
    }
}
