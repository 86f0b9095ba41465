// src/engine/resize.rs
//
// Resize stage: target-box resolution, contain/cover scaling, and the
// high-quality resampler that draws the (possibly cropped) source into the
// output box.
//
// Resampling goes through fast_image_resize (Lanczos3, SIMD). Any failure on
// that path falls back to the image crate's Lanczos3 resize of the cropped
// view, so a resize only fails when both paths do.

use crate::engine::crop::{compute_crop_rect, CropRect};
use crate::engine::decoder::check_dimensions;
use crate::error::ProcessError;
use crate::settings::{CropSettings, FitMode, SizeSettings};
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};

type ResizeResult<T> = std::result::Result<T, ResizeError>;

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
    /// Set when the target box exceeds the decode limits.
    pub limit: Option<ProcessError>,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
            limit: None,
        }
    }

    pub fn over_limit(source_dims: (u32, u32), target_dims: (u32, u32), limit: ProcessError) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: limit.to_string(),
            limit: Some(limit),
        }
    }

    pub fn into_process_error(self) -> ProcessError {
        if let Some(limit) = self.limit {
            return limit;
        }
        ProcessError::encode_failed(
            "resize",
            format!(
                "resize {}x{} -> {}x{} failed: {}",
                self.source_dims.0,
                self.source_dims.1,
                self.target_dims.0,
                self.target_dims.1,
                self.reason
            ),
        )
    }
}

/// Output dimensions plus the scale that produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledBox {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

fn round_dim(v: f64) -> u32 {
    (v.round().max(1.0)).min(u32::MAX as f64) as u32
}

/// Resolve the box the source is fitted into.
///
/// Missing dimensions are derived from the aspect ratio when one is set,
/// otherwise from the source's own ratio. With a ratio but neither width
/// nor height, the box is the largest box of that ratio inside the source.
pub fn resolve_target_box(src_w: u32, src_h: u32, size: &SizeSettings) -> (u32, u32) {
    let mut w = size.width.map(f64::from);
    let mut h = size.height.map(f64::from);
    let ratio = size.ratio.map(|r| r.value()).filter(|r| r.is_finite() && *r > 0.0);
    let (sw, sh) = (src_w as f64, src_h as f64);

    if let Some(ratio) = ratio {
        match (w, h) {
            (Some(bw), None) => h = Some((bw / ratio).round()),
            (None, Some(bh)) => w = Some((bh * ratio).round()),
            (None, None) => {
                let by_w = (sw, (sw / ratio).round());
                let by_h = ((sh * ratio).round(), sh);
                let (bw, bh) = if by_w.1 <= sh { by_w } else { by_h };
                w = Some(bw);
                h = Some(bh);
            }
            (Some(_), Some(_)) => {}
        }
    }

    let (w, h) = match (w, h) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, (sh * (w / sw)).round()),
        (None, Some(h)) => ((sw * (h / sh)).round(), h),
        (None, None) => (sw, sh),
    };
    (round_dim(w), round_dim(h))
}

fn scaled(src_w: u32, src_h: u32, scale: f64, prevent_upscale: bool) -> ScaledBox {
    let s = if prevent_upscale { scale.min(1.0) } else { scale };
    ScaledBox {
        width: round_dim(src_w as f64 * s),
        height: round_dim(src_h as f64 * s),
        scale: s,
    }
}

/// Largest scale at which the source fits inside the box.
pub fn contain(src_w: u32, src_h: u32, box_w: u32, box_h: u32, prevent_upscale: bool) -> ScaledBox {
    let scale = (box_w as f64 / src_w as f64).min(box_h as f64 / src_h as f64);
    scaled(src_w, src_h, scale, prevent_upscale)
}

/// Smallest scale at which the source fills the box.
pub fn cover(src_w: u32, src_h: u32, box_w: u32, box_h: u32, prevent_upscale: bool) -> ScaledBox {
    let scale = (box_w as f64 / src_w as f64).max(box_h as f64 / src_h as f64);
    scaled(src_w, src_h, scale, prevent_upscale)
}

/// Output size for a source under the given size settings.
pub fn calc_target_size(src_w: u32, src_h: u32, size: &SizeSettings) -> ScaledBox {
    if !size.enabled || src_w == 0 || src_h == 0 {
        return ScaledBox {
            width: src_w,
            height: src_h,
            scale: 1.0,
        };
    }
    let (box_w, box_h) = resolve_target_box(src_w, src_h, size);
    match size.fit {
        FitMode::Cover => cover(src_w, src_h, box_w, box_h, size.prevent_upscale),
        FitMode::Contain => contain(src_w, src_h, box_w, box_h, size.prevent_upscale),
    }
}

/// What the resize stage will do for a given source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizePlan {
    pub output: ScaledBox,
    /// Source window for cover fits; `None` draws the whole source.
    pub crop: Option<CropRect>,
}

impl ResizePlan {
    pub fn is_identity(&self, src_w: u32, src_h: u32) -> bool {
        self.crop
            .map_or(true, |c| c.x == 0 && c.y == 0 && c.width == src_w && c.height == src_h)
            && self.output.width == src_w
            && self.output.height == src_h
    }
}

pub fn plan_resize(src_w: u32, src_h: u32, size: &SizeSettings, crop: &CropSettings) -> ResizePlan {
    let output = calc_target_size(src_w, src_h, size);
    let crop = (size.enabled && size.fit == FitMode::Cover)
        .then(|| compute_crop_rect(src_w, src_h, output.width, output.height, crop));
    ResizePlan { output, crop }
}

/// Run the resize stage. Returns the input untouched when the plan is a
/// no-op.
pub fn apply_resize(
    img: DynamicImage,
    size: &SizeSettings,
    crop: &CropSettings,
) -> ResizeResult<DynamicImage> {
    let (src_w, src_h) = (img.width(), img.height());
    let plan = plan_resize(src_w, src_h, size, crop);
    if plan.is_identity(src_w, src_h) {
        return Ok(img);
    }
    let (dst_w, dst_h) = (plan.output.width, plan.output.height);
    check_dimensions(dst_w, dst_h)
        .map_err(|e| ResizeError::over_limit((src_w, src_h), (dst_w, dst_h), e))?;
    resample(img, dst_w, dst_h, plan.crop)
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

/// Draw `img` (or the `crop` window of it) into a `dst_width x dst_height`
/// image.
pub fn resample(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
    crop: Option<CropRect>,
) -> ResizeResult<DynamicImage> {
    let src_width = img.width();
    let src_height = img.height();

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(
            (src_width, src_height),
            (dst_width, dst_height),
            "invalid dimensions for resize",
        ));
    }

    let mut options = default_resize_options();
    if let Some(rect) = crop {
        options = options.crop(
            rect.x as f64,
            rect.y as f64,
            rect.width as f64,
            rect.height as f64,
        );
    }

    // Take ownership of the pixel buffer; only exotic layouts need a copy.
    let (pixel_type, src_pixels): (PixelType, Vec<u8>) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.into_raw()),
        other => (PixelType::U8x4, other.to_rgba8().into_raw()),
    };

    resample_raw(
        src_width, src_height, src_pixels, pixel_type, dst_width, dst_height, crop, options,
    )
    .map_err(|reason| ResizeError::new((src_width, src_height), (dst_width, dst_height), reason))
}

#[allow(clippy::too_many_arguments)]
fn resample_raw(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    crop: Option<CropRect>,
    options: ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let pixel_count = (src_width as usize)
        .checked_mul(src_height as usize)
        .ok_or_else(|| "image dimensions overflow during resize".to_string())?;
    let required_bytes = pixel_count
        .checked_mul(pixel_type.size())
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "fir source image invalid buffer size. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }

    let primary = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => {
            resize_with_source_image(src_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let aligned = copy_pixels_to_aligned_image(
                src_width,
                src_height,
                pixel_type,
                &src_pixels,
                required_bytes,
            )?;
            resize_with_source_image(aligned, pixel_type, dst_width, dst_height, &options)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary {
        Ok(img) => Ok(img),
        Err(err) => {
            tracing::debug!(
                target: "imgbatch::pipeline",
                error = %err,
                "fast resize failed, falling back to image crate"
            );
            resize_with_image_crate_fallback(
                src_pixels, src_width, src_height, pixel_type, dst_width, dst_height, crop,
            )
            .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn copy_pixels_to_aligned_image(
    width: u32,
    height: u32,
    pixel_type: PixelType,
    src_pixels: &[u8],
    required_bytes: usize,
) -> std::result::Result<fir::images::Image<'static>, String> {
    let mut aligned_image = fir::images::Image::new(width, height, pixel_type);
    let aligned_buffer = aligned_image.buffer_mut();
    if aligned_buffer.len() != required_bytes {
        return Err(format!(
            "fir alignment fallback buffer mismatch. expected {required_bytes} bytes, got {} bytes",
            aligned_buffer.len()
        ));
    }
    aligned_buffer.copy_from_slice(&src_pixels[..required_bytes]);
    Ok(aligned_image)
}

fn resize_with_image_crate_fallback(
    src_pixels: Vec<u8>,
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    crop: Option<CropRect>,
) -> std::result::Result<DynamicImage, String> {
    let src = match pixel_type {
        PixelType::U8x3 => RgbImage::from_raw(src_width, src_height, src_pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| "failed to build rgb image for fallback resize".to_string())?,
        PixelType::U8x4 => RgbaImage::from_raw(src_width, src_height, src_pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?,
        _ => return Err("fallback resize supports only U8x3/U8x4 pixel types".to_string()),
    };
    let view = match crop {
        Some(r) => src.crop_imm(r.x, r.y, r.width, r.height),
        None => src,
    };
    Ok(view.resize_exact(dst_width, dst_height, FilterType::Lanczos3))
}

fn has_translucency(image: &fir::images::Image, pixel_type: PixelType) -> bool {
    pixel_type == PixelType::U8x4 && image.buffer().iter().skip(3).step_by(4).any(|&a| a != 255)
}

fn resize_with_source_image(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: &ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    // Premultiply so transparent pixels do not bleed colour into edges.
    let needs_premultiply = has_translucency(&src_image, pixel_type);
    let mul_div = MulDiv::default();
    if needs_premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, options)
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if needs_premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let dst_pixels = dst_image.into_vec();
    match pixel_type {
        PixelType::U8x3 => RgbImage::from_raw(dst_width, dst_height, dst_pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| "failed to create rgb image from resized data".to_string()),
        PixelType::U8x4 => RgbaImage::from_raw(dst_width, dst_height, dst_pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| "failed to create rgba image from resized data".to_string()),
        _ => Err("unsupported pixel type after resize".to_string()),
    }
}
