// src/engine/estimator.rs
//
// Advisory output-size prediction. Pure, never fails, never blocks the
// pipeline. Callers use it to show expected savings before a job finishes.

use crate::engine::quality::QualityBand;
use crate::settings::OutputFormat;

/// Smallest size an estimate will report, in bytes.
pub const MIN_ESTIMATE_BYTES: u64 = 200;

const MIN_AREA_SCALE: f64 = 0.05;
const MAX_AREA_SCALE: f64 = 5.0;

/// Empirical size coefficients per format, indexed by `QualityBand`.
/// Heuristic defaults; tune freely as long as each row is non-increasing.
const JPEG_COEFFS: [f64; 4] = [1.0, 0.9, 0.8, 0.7];
const WEBP_COEFFS: [f64; 4] = [1.0, 0.85, 0.7, 0.6];
const PNG_COEFFS: [f64; 4] = [1.0, 1.0, 0.95, 0.9];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateInput {
    pub format: OutputFormat,
    /// Encoder quality on the 0-100 scale.
    pub quality: f64,
    pub src_size: u64,
    pub src_pixels: u64,
    pub target_pixels: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub estimated_size: u64,
    /// Fraction of the source size saved, 0..=1.
    pub ratio: f64,
}

pub fn coefficient(format: OutputFormat, quality: f64) -> f64 {
    let table = match format {
        OutputFormat::Jpeg => &JPEG_COEFFS,
        OutputFormat::WebP => &WEBP_COEFFS,
        OutputFormat::Png => &PNG_COEFFS,
    };
    table[QualityBand::from_quality(quality).index()]
}

pub fn estimate_size(input: &EstimateInput) -> Estimate {
    let EstimateInput {
        format,
        quality,
        src_size,
        src_pixels,
        target_pixels,
    } = *input;

    if src_size == 0 || src_pixels == 0 || target_pixels == 0 {
        return Estimate {
            estimated_size: src_size,
            ratio: 0.0,
        };
    }

    let area_scale =
        (target_pixels as f64 / src_pixels as f64).clamp(MIN_AREA_SCALE, MAX_AREA_SCALE);
    let raw = (src_size as f64 * area_scale * coefficient(format, quality)).round() as u64;
    let estimated_size = raw.max(MIN_ESTIMATE_BYTES);
    let ratio = (1.0 - estimated_size as f64 / src_size as f64).clamp(0.0, 1.0);

    Estimate {
        estimated_size,
        ratio,
    }
}
