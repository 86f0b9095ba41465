// lib.rs
//
// imgbatch: parallel image transformation behind a bounded job pool.
//
// Each job is decoded, resized/cropped, watermarked and re-encoded inside
// an execution unit. The pool dispatches jobs FIFO, retries failures once by
// default, cancels queued and running jobs, and streams progress back
// through per-job callbacks.
//
// Design goals:
// - Never block the caller: enqueue returns immediately
// - Input buffers move to the unit, never copied (retries included)
// - One failing job never affects another

pub mod engine;
pub mod error;
pub mod settings;

pub use engine::{
    estimate_size, process, submit, CancelSignal, Estimate, EstimateInput, Job, JobCallbacks,
    JobFailure, JobHandle, JobMeta, JobPool, PoolOptions, PoolStats, ProcessResult, SourceItem,
    SourceProvider,
};
pub use error::{ErrorCategory, PoolError, ProcessError};
pub use settings::{
    CropSettings, EncodeSettings, FitMode, OutputFormat, Settings, SettingsOverride,
    SizeSettings, WatermarkMode, WatermarkSettings,
};

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Input formats with a dedicated decoder. Anything else the `image` crate
/// reads is accepted too.
pub fn supported_input_formats() -> &'static [&'static str] {
    &["jpeg", "jpg", "png", "webp"]
}

pub fn supported_output_formats() -> &'static [&'static str] {
    &["jpeg", "png", "webp"]
}
