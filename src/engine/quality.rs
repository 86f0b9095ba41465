// src/engine/quality.rs
//
// Quality mapping: user-facing intensity -> encoder quality -> per-codec knobs.
//
// intensity (0-100, higher compresses harder)
//   -> quality (30-95) via `intensity_to_quality`
//   -> encoder quality (0.1-0.95) via `normalize_encoder_quality`
//   -> codec tuning via `QualitySettings` bands

use crate::settings::EncodeSettings;

pub const DEFAULT_INTENSITY: f64 = 60.0;
pub const MIN_QUALITY: u8 = 30;
pub const MAX_QUALITY: u8 = 95;

/// `clamp(round(95 - 0.65 * intensity), 30, 95)`.
///
/// Monotonically non-increasing; intensity 100 maps to exactly 30.
pub fn intensity_to_quality(intensity: f64) -> u8 {
    let intensity = if intensity.is_nan() {
        DEFAULT_INTENSITY
    } else {
        intensity
    };
    let q = (95.0 - 0.65 * intensity).round();
    q.clamp(MIN_QUALITY as f64, MAX_QUALITY as f64) as u8
}

/// Round and clamp to 0..=100; NaN becomes the default intensity.
pub fn normalize_intensity(v: f64) -> f64 {
    if v.is_nan() {
        return DEFAULT_INTENSITY;
    }
    v.round().clamp(0.0, 100.0)
}

/// Map a 0-100 quality onto the encoder's 0.1-0.95 scale, rounded to three
/// decimals.
pub fn normalize_encoder_quality(quality: f64) -> f64 {
    let q = (quality / 100.0).clamp(0.1, 0.95);
    (q * 1000.0).round() / 1000.0
}

/// Quality (0-100) the encoders run at for these settings.
pub fn resolve_quality(encode: &EncodeSettings) -> u8 {
    match encode.quality {
        Some(q) => q.min(MAX_QUALITY),
        None => intensity_to_quality(normalize_intensity(encode.intensity)),
    }
}

/// Four quality bands shared by the size estimator and codec tuning.
/// - High (>=85)
/// - Balanced (70-84)
/// - Fast (50-69)
/// - Fastest (<50)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualityBand {
    pub fn from_quality(quality: f64) -> Self {
        if quality >= 85.0 {
            QualityBand::High
        } else if quality >= 70.0 {
            QualityBand::Balanced
        } else if quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    /// Index into per-band tables, 0 = High.
    pub fn index(&self) -> usize {
        match self {
            QualityBand::High => 0,
            QualityBand::Balanced => 1,
            QualityBand::Fast => 2,
            QualityBand::Fastest => 3,
        }
    }
}

/// Codec tuning derived from one quality value.
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100) as f32,
        }
    }

    /// Build from the normalized 0.1-0.95 encoder scale.
    pub fn from_normalized(q: f64) -> Self {
        Self {
            quality: (q * 100.0).clamp(0.0, 100.0) as f32,
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn band(&self) -> QualityBand {
        QualityBand::from_quality(self.quality as f64)
    }

    // Method 4 and a single pass for every band; the speed/size trade-off
    // is tuned through SNS and filter strength instead.
    pub fn webp_method(&self) -> i32 {
        4
    }

    pub fn webp_pass(&self) -> i32 {
        1
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            _ => 0,
        }
    }

    /// mozjpeg input smoothing; heavier at low quality to hide blocking.
    pub fn jpeg_smoothing(&self) -> u8 {
        if self.quality >= 90.0 {
            0
        } else if self.quality >= 70.0 {
            5
        } else if self.quality >= 60.0 {
            10
        } else {
            18
        }
    }
}
