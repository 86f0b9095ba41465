// src/engine.rs
//
// The core of imgbatch. A bounded pool of execution units, each running
// one image at a time through:
// 1. Decode (mozjpeg / zune-png / libwebp / image)
// 2. Resize and cover-crop (fast_image_resize)
// 3. Tiled, rotated watermark
// 4. Encode with an accelerated tier and a baseline fallback
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

pub mod common;
pub mod crop;
pub mod decoder;
pub mod encoder;
pub mod estimator;
pub mod job;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod quality;
pub mod resize;
pub mod signal;
pub mod source;
pub mod unit;
pub mod watermark;

pub use crop::{compute_crop_rect, CropRect};
pub use decoder::{check_dimensions, decode_image};
pub use encoder::{encode_with_fallback, output_name, Encoded, EncoderTier};
pub use estimator::{estimate_size, Estimate, EstimateInput};
pub use job::{Job, JobCallbacks, JobHandle};
pub use pipeline::{process, run_pipeline, StageObserver};
pub use pool::{default_pool_size, JobPool, PoolOptions, PoolStats};
pub use protocol::{JobFailure, JobId, JobMeta, ProcessResult, UnitEvent, UnitRequest};
pub use quality::{intensity_to_quality, normalize_encoder_quality};
pub use resize::{calc_target_size, contain, cover, resolve_target_box, ScaledBox};
pub use signal::CancelSignal;
pub use source::{submit, SourceItem, SourceProvider};
pub use unit::{ExecutionUnit, PostError, ThreadUnit, UnitFactory, UnitOutbox};
pub use watermark::{compute_placements, PlacementPlan};
