// src/settings.rs
//
// Closed settings bundle carried by every job.
//
// Four independent sub-settings (encode / size / crop / watermark). Callers
// hold global defaults and may attach a per-item override; `Settings::resolve`
// merges them field-by-field with the override winning. The result is
// normalized and validated before it crosses into an execution unit.

use crate::engine::quality::{normalize_intensity, DEFAULT_INTENSITY};
use crate::error::{ProcessError, Result};
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// ENCODE
// =============================================================================

/// Output container. Closed set: lossy JPEG, lossless PNG, lossy WebP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    /// Encoder identifier for this format.
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ProcessError;

    /// Parse a format name or MIME type ("jpeg", "jpg", "image/webp", ...).
    fn from_str(value: &str) -> Result<Self> {
        let lower = value.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("image/").unwrap_or(&lower);
        match name {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::WebP),
            _ => Err(ProcessError::unsupported_format(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub format: OutputFormat,
    /// User-facing compression strength, 0..=100, higher compresses harder.
    pub intensity: f64,
    /// Pins the encoder quality (10..=95) instead of deriving it from
    /// `intensity`.
    pub quality: Option<u8>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            intensity: DEFAULT_INTENSITY,
            quality: None,
        }
    }
}

pub const MIN_PINNED_QUALITY: u8 = 10;
pub const MAX_PINNED_QUALITY: u8 = 95;

// =============================================================================
// SIZE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitMode {
    /// Scale to fit inside the box.
    #[default]
    Contain,
    /// Scale to fill the box, cropping the excess.
    Cover,
}

impl FromStr for FitMode {
    type Err = ProcessError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contain" | "inside" => Ok(FitMode::Contain),
            "cover" | "fill" => Ok(FitMode::Cover),
            other => Err(ProcessError::invalid_settings(
                "fit",
                other.to_string(),
                "expected contain or cover",
            )),
        }
    }
}

/// Fixed aspect ratio `w:h`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatio {
    pub w: f64,
    pub h: f64,
}

impl AspectRatio {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    /// Width over height.
    pub fn value(&self) -> f64 {
        self.w / self.h
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeSettings {
    pub enabled: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ratio: Option<AspectRatio>,
    pub fit: FitMode,
    pub prevent_upscale: bool,
}

impl Default for SizeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            width: None,
            height: None,
            ratio: None,
            fit: FitMode::Contain,
            prevent_upscale: true,
        }
    }
}

// =============================================================================
// CROP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    /// Normalized crop centre, 0..=1.
    pub x: f64,
    pub y: f64,
    /// Framing tightness; 1 keeps the widest cover window, larger zooms in.
    pub scale: f64,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            scale: 1.0,
        }
    }
}

pub const MIN_CROP_SCALE: f64 = 0.1;

// =============================================================================
// WATERMARK
// =============================================================================

/// Text stamp payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStamp {
    pub text: String,
    /// Font size in pixels before `WatermarkSettings::scale` is applied.
    pub font_size: Option<f64>,
    /// `#RGB` or `#RRGGBB`; black when absent or unparseable.
    pub color: Option<String>,
    /// TrueType/OpenType bytes used to rasterize the glyphs.
    pub font: Option<Arc<Vec<u8>>>,
}

impl TextStamp {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font_size: None,
            color: None,
            font: None,
        }
    }
}

/// Image stamp payload: encoded image bytes plus the intrinsic box it is
/// drawn into.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStamp {
    pub data: Option<Arc<Vec<u8>>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageStamp {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Some(Arc::new(data)),
            width: None,
            height: None,
        }
    }
}

/// The payload only exists for the mode that uses it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WatermarkMode {
    #[default]
    Off,
    Text(TextStamp),
    Image(ImageStamp),
}

impl WatermarkMode {
    pub fn is_off(&self) -> bool {
        matches!(self, WatermarkMode::Off)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSettings {
    pub mode: WatermarkMode,
    /// Rotation in degrees.
    pub angle: f64,
    pub spacing: f64,
    pub scale: f64,
    pub margin: f64,
    pub opacity: f64,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            mode: WatermarkMode::Off,
            angle: 30.0,
            spacing: 240.0,
            scale: 1.0,
            margin: 24.0,
            opacity: 0.14,
        }
    }
}

pub const MIN_TILE_SCALE: f64 = 0.1;

// =============================================================================
// BUNDLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub encode: EncodeSettings,
    pub size: SizeSettings,
    pub crop: CropSettings,
    pub watermark: WatermarkSettings,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodeOverride {
    pub format: Option<OutputFormat>,
    pub intensity: Option<f64>,
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SizeOverride {
    pub enabled: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ratio: Option<AspectRatio>,
    pub fit: Option<FitMode>,
    pub prevent_upscale: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CropOverride {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WatermarkOverride {
    pub mode: Option<WatermarkMode>,
    pub angle: Option<f64>,
    pub spacing: Option<f64>,
    pub scale: Option<f64>,
    pub margin: Option<f64>,
    pub opacity: Option<f64>,
}

/// Per-item override; every absent sub-setting (and every absent field
/// inside a present one) falls through to the defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsOverride {
    pub encode: Option<EncodeOverride>,
    pub size: Option<SizeOverride>,
    pub crop: Option<CropOverride>,
    pub watermark: Option<WatermarkOverride>,
}

impl EncodeSettings {
    fn merged(&self, o: &EncodeOverride) -> Self {
        Self {
            format: o.format.unwrap_or(self.format),
            intensity: o.intensity.unwrap_or(self.intensity),
            quality: o.quality.or(self.quality),
        }
    }
}

impl SizeSettings {
    fn merged(&self, o: &SizeOverride) -> Self {
        Self {
            enabled: o.enabled.unwrap_or(self.enabled),
            width: o.width.or(self.width),
            height: o.height.or(self.height),
            ratio: o.ratio.or(self.ratio),
            fit: o.fit.unwrap_or(self.fit),
            prevent_upscale: o.prevent_upscale.unwrap_or(self.prevent_upscale),
        }
    }
}

impl CropSettings {
    fn merged(&self, o: &CropOverride) -> Self {
        Self {
            x: o.x.unwrap_or(self.x),
            y: o.y.unwrap_or(self.y),
            scale: o.scale.unwrap_or(self.scale),
        }
    }
}

impl WatermarkSettings {
    fn merged(&self, o: &WatermarkOverride) -> Self {
        Self {
            mode: o.mode.clone().unwrap_or_else(|| self.mode.clone()),
            angle: o.angle.unwrap_or(self.angle),
            spacing: o.spacing.unwrap_or(self.spacing),
            scale: o.scale.unwrap_or(self.scale),
            margin: o.margin.unwrap_or(self.margin),
            opacity: o.opacity.unwrap_or(self.opacity),
        }
    }
}

fn clamp_unit(v: f64, fallback: f64) -> f64 {
    if v.is_nan() {
        fallback
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn at_least(v: f64, min: f64, fallback: f64) -> f64 {
    if v.is_nan() {
        fallback
    } else {
        v.max(min)
    }
}

impl Settings {
    /// Merge global defaults with an optional per-item override.
    pub fn resolve(defaults: &Settings, over: Option<&SettingsOverride>) -> Settings {
        let Some(o) = over else {
            return defaults.clone();
        };
        Settings {
            encode: o
                .encode
                .as_ref()
                .map_or_else(|| defaults.encode.clone(), |e| defaults.encode.merged(e)),
            size: o
                .size
                .as_ref()
                .map_or_else(|| defaults.size.clone(), |s| defaults.size.merged(s)),
            crop: o
                .crop
                .as_ref()
                .map_or(defaults.crop, |c| defaults.crop.merged(c)),
            watermark: o.watermark.as_ref().map_or_else(
                || defaults.watermark.clone(),
                |w| defaults.watermark.merged(w),
            ),
        }
    }

    /// Clamp every field into its documented range.
    pub fn normalized(mut self) -> Settings {
        self.encode.intensity = normalize_intensity(self.encode.intensity);
        self.encode.quality = self
            .encode
            .quality
            .map(|q| q.clamp(MIN_PINNED_QUALITY, MAX_PINNED_QUALITY));

        self.crop.x = clamp_unit(self.crop.x, 0.5);
        self.crop.y = clamp_unit(self.crop.y, 0.5);
        self.crop.scale = if self.crop.scale.is_nan() || self.crop.scale == 0.0 {
            1.0
        } else {
            self.crop.scale.max(MIN_CROP_SCALE)
        };

        let wm = &mut self.watermark;
        wm.opacity = clamp_unit(wm.opacity, 0.14);
        wm.spacing = at_least(wm.spacing, 0.0, 240.0);
        wm.margin = at_least(wm.margin, 0.0, 24.0);
        wm.scale = at_least(wm.scale, MIN_TILE_SCALE, 1.0);
        self
    }

    /// Reject values that cannot be clamped into something meaningful.
    pub fn validate(&self) -> Result<()> {
        let size = &self.size;
        if size.width == Some(0) {
            return Err(ProcessError::invalid_settings(
                "width",
                "0",
                "target width must be positive",
            ));
        }
        if size.height == Some(0) {
            return Err(ProcessError::invalid_settings(
                "height",
                "0",
                "target height must be positive",
            ));
        }
        if let Some(r) = size.ratio {
            if !(r.w.is_finite() && r.h.is_finite() && r.w > 0.0 && r.h > 0.0) {
                return Err(ProcessError::invalid_settings(
                    "ratio",
                    format!("{}:{}", r.w, r.h),
                    "aspect ratio components must be finite and positive",
                ));
            }
        }

        let wm = &self.watermark;
        if !wm.angle.is_finite() {
            return Err(ProcessError::invalid_settings(
                "angle",
                wm.angle.to_string(),
                "rotation angle must be finite",
            ));
        }
        if let WatermarkMode::Text(stamp) = &wm.mode {
            if stamp.text.trim().is_empty() {
                return Err(ProcessError::invalid_settings(
                    "text",
                    "\"\"",
                    "watermark text must not be empty",
                ));
            }
            if let Some(size) = stamp.font_size {
                if !size.is_finite() || size <= 0.0 {
                    return Err(ProcessError::invalid_settings(
                        "font_size",
                        size.to_string(),
                        "font size must be finite and positive",
                    ));
                }
            }
        }
        Ok(())
    }
}
