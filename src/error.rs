// src/error.rs
//
// Unified error handling for imgbatch
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy (per job):
// - Unsupported: format cannot be decoded or encoded
// - Decode: input bytes could not be turned into pixels
// - Encode: any stage after decode failed
// - OutOfMemory: dimension/pixel/allocation limits
// - Cancelled: job was aborted (never surfaced as an error to callers)
// - Unknown: everything else
//
// Dispatcher-level failures (disposed pool, bad settings, missing source)
// are a separate enum, PoolError, and are always synchronous.

use std::borrow::Cow;
use thiserror::Error;

/// Failure message a unit reports when a job was aborted mid-pipeline.
///
/// The dispatcher recognises this payload and routes the job to its
/// cancelled callback instead of the error callback.
pub const CANCELLED_SENTINEL: &str = "cancelled";

/// Closed failure taxonomy for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Format not decodable/encodable
    Unsupported,
    /// Input bytes could not be decoded
    Decode,
    /// Resize, watermark or encode failed
    Encode,
    /// Dimension, pixel-count or allocation limits
    OutOfMemory,
    /// Job was aborted
    Cancelled,
    /// Anything we cannot classify
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Unsupported => "unsupported",
            ErrorCategory::Decode => "decode",
            ErrorCategory::Encode => "encode",
            ErrorCategory::OutOfMemory => "oom",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while running one job through the pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessError {
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Image dimension {dimension} exceeds maximum {max} (out of memory guard)")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max} (out of memory guard)")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Out of memory: {message}")]
    OutOfMemory { message: Cow<'static, str> },

    #[error("cancelled")]
    Cancelled,

    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidSettings {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("no-data")]
    MissingInput,

    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },

    #[error("{message}")]
    Generic { message: Cow<'static, str> },
}

// Constructor Helpers
impl ProcessError {
    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn out_of_memory(message: impl Into<Cow<'static, str>>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn invalid_settings(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidSettings {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_input() -> Self {
        Self::MissingInput
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedFormat { .. } => ErrorCategory::Unsupported,
            Self::DecodeFailed { .. } => ErrorCategory::Decode,
            Self::EncodeFailed { .. } => ErrorCategory::Encode,
            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::OutOfMemory { .. } => ErrorCategory::OutOfMemory,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::InvalidSettings { .. }
            | Self::MissingInput
            | Self::InternalPanic { .. }
            | Self::Generic { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether retrying the same job could plausibly succeed.
    ///
    /// Decode failures, unsupported formats and bad settings will fail the
    /// same way on the same bytes; everything else may be transient.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::InvalidSettings { .. }
            | Self::MissingInput
            | Self::Cancelled => false,
            Self::EncodeFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::OutOfMemory { .. }
            | Self::InternalPanic { .. }
            | Self::Generic { .. } => true,
        }
    }

    /// Re-classify a failure that happened after the decode stage.
    ///
    /// Anything that is not already an out-of-memory or cancellation error
    /// becomes an encode error for the given output format.
    pub fn after_decode(self, format: &'static str) -> Self {
        match self.category() {
            ErrorCategory::OutOfMemory | ErrorCategory::Cancelled | ErrorCategory::Encode => self,
            _ => Self::encode_failed(format, self.to_string()),
        }
    }
}

/// Synchronous failures raised by the dispatcher itself.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    #[error("job pool has been disposed")]
    Disposed,

    #[error("invalid job settings: {0}")]
    InvalidSettings(#[source] ProcessError),

    #[error("source not found for item '{id}'")]
    SourceNotFound { id: String },

    #[error("failed to reach execution unit: {message}")]
    UnitUnavailable { message: Cow<'static, str> },

    #[error("failed to spawn execution unit: {message}")]
    UnitSpawn { message: Cow<'static, str> },

    #[error("job pool cannot wait on itself from a job callback")]
    Reentrant,
}

impl PoolError {
    pub fn unit_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::UnitUnavailable {
            message: message.into(),
        }
    }

    pub fn unit_spawn(message: impl Into<Cow<'static, str>>) -> Self {
        Self::UnitSpawn {
            message: message.into(),
        }
    }
}

/// Classify a free-form failure message by substring.
///
/// Used when a failure arrives without a structured error (foreign unit
/// implementations, panics, transport failures).
pub fn categorize(message: &str) -> ErrorCategory {
    let m = message.to_lowercase();
    if m.contains("unsupported") || m.contains("not supported") {
        ErrorCategory::Unsupported
    } else if m.contains("decode") {
        ErrorCategory::Decode
    } else if m.contains("encode") {
        ErrorCategory::Encode
    } else if m.contains("memory") || m.contains("oom") {
        ErrorCategory::OutOfMemory
    } else if m.contains("cancelled") || m.contains("canceled") {
        ErrorCategory::Cancelled
    } else {
        ErrorCategory::Unknown
    }
}

/// Short, display-ready description of a failure message.
pub fn user_friendly(message: &str) -> Cow<'_, str> {
    match categorize(message) {
        ErrorCategory::Unsupported => {
            Cow::Borrowed("This format is not supported, please use JPEG, PNG or WebP")
        }
        ErrorCategory::Decode => {
            Cow::Borrowed("The image could not be decoded, retry or pick another file")
        }
        ErrorCategory::Encode => Cow::Borrowed(
            "Encoding failed, try a lower intensity or a different output format",
        ),
        ErrorCategory::OutOfMemory => Cow::Borrowed(
            "Not enough memory, reduce the output size or process fewer images at once",
        ),
        ErrorCategory::Cancelled => Cow::Borrowed("Cancelled"),
        ErrorCategory::Unknown if message.is_empty() => {
            Cow::Borrowed("An unknown error occurred")
        }
        ErrorCategory::Unknown => Cow::Borrowed(message),
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ProcessError>;
