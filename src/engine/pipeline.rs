// src/engine/pipeline.rs
//
// Ordered stage runner: decode -> resize/crop -> watermark -> encode.
//
// Progress checkpoints are fixed (0, 10, 55, 80, 100) and never go
// backwards. Between stages the observer is asked whether the job was
// aborted; an abort ends the run with `ProcessError::Cancelled` and nothing
// is reported after it.

use crate::engine::decoder::decode_image;
use crate::engine::encoder::{encode_with_fallback, output_name};
use crate::engine::protocol::{JobMeta, ProcessResult};
use crate::engine::quality::{normalize_encoder_quality, resolve_quality};
use crate::engine::resize::apply_resize;
use crate::engine::watermark::apply_watermark;
use crate::error::ProcessError;
use crate::settings::Settings;
use std::time::Instant;
use tracing::trace;

type PipelineResult<T> = std::result::Result<T, ProcessError>;

pub const PROGRESS_START: u8 = 0;
pub const PROGRESS_DECODED: u8 = 10;
pub const PROGRESS_RESIZED: u8 = 55;
pub const PROGRESS_WATERMARKED: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

/// Receives checkpoints from a running pipeline.
pub trait StageObserver {
    fn progress(&mut self, percent: u8);

    /// Polled between stages. Returning `true` aborts the job.
    fn should_abort(&mut self) -> bool {
        false
    }
}

/// Observer that ignores progress and never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl StageObserver for Silent {
    fn progress(&mut self, _percent: u8) {}
}

/// Records every checkpoint. Handy for tests and benchmarks.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub checkpoints: Vec<u8>,
    /// Abort once this many checkpoints have been seen.
    pub abort_after: Option<usize>,
}

impl StageObserver for Recorder {
    fn progress(&mut self, percent: u8) {
        self.checkpoints.push(percent);
    }

    fn should_abort(&mut self) -> bool {
        self.abort_after
            .is_some_and(|limit| self.checkpoints.len() >= limit)
    }
}

fn checkpoint(observer: &mut dyn StageObserver, percent: u8) -> PipelineResult<()> {
    if observer.should_abort() {
        return Err(ProcessError::cancelled());
    }
    observer.progress(percent);
    Ok(())
}

fn abort_point(observer: &mut dyn StageObserver) -> PipelineResult<()> {
    if observer.should_abort() {
        return Err(ProcessError::cancelled());
    }
    Ok(())
}

/// Run one job end to end.
pub fn run_pipeline(
    meta: &JobMeta,
    settings: &Settings,
    input: &[u8],
    observer: &mut dyn StageObserver,
) -> PipelineResult<ProcessResult> {
    observer.progress(PROGRESS_START);
    if input.is_empty() {
        return Err(ProcessError::missing_input());
    }
    let settings = settings.clone().normalized();
    let format = settings.encode.format;
    abort_point(observer)?;

    let started = Instant::now();
    let declared = (!meta.mime.is_empty()).then_some(meta.mime.as_str());
    let img = decode_image(input, declared)?;
    trace!(
        target: "imgbatch::pipeline",
        job = %meta.id,
        stage = "decode",
        width = img.width(),
        height = img.height(),
        elapsed_us = started.elapsed().as_micros() as u64,
    );
    checkpoint(observer, PROGRESS_DECODED)?;

    let started = Instant::now();
    let img = apply_resize(img, &settings.size, &settings.crop)
        .map_err(|e| e.into_process_error())?;
    trace!(
        target: "imgbatch::pipeline",
        job = %meta.id,
        stage = "resize",
        width = img.width(),
        height = img.height(),
        elapsed_us = started.elapsed().as_micros() as u64,
    );
    checkpoint(observer, PROGRESS_RESIZED)?;

    let started = Instant::now();
    let img = apply_watermark(img, &settings.watermark)
        .map_err(|e| e.after_decode(format.as_str()))?;
    trace!(
        target: "imgbatch::pipeline",
        job = %meta.id,
        stage = "watermark",
        elapsed_us = started.elapsed().as_micros() as u64,
    );
    checkpoint(observer, PROGRESS_WATERMARKED)?;

    let started = Instant::now();
    let quality = normalize_encoder_quality(resolve_quality(&settings.encode) as f64);
    let encoded = encode_with_fallback(&img, format, quality)
        .map_err(|e| e.after_decode(format.as_str()))?;
    trace!(
        target: "imgbatch::pipeline",
        job = %meta.id,
        stage = "encode",
        tier = ?encoded.tier,
        bytes = encoded.bytes.len(),
        elapsed_us = started.elapsed().as_micros() as u64,
    );
    checkpoint(observer, PROGRESS_DONE)?;

    let size = encoded.bytes.len();
    Ok(ProcessResult {
        bytes: encoded.bytes,
        size,
        name: output_name(&meta.name, format),
        format,
        width: img.width(),
        height: img.height(),
    })
}

/// Run one job without progress reporting or cancellation.
pub fn process(meta: &JobMeta, settings: &Settings, input: &[u8]) -> PipelineResult<ProcessResult> {
    run_pipeline(meta, settings, input, &mut Silent)
}
