// src/engine/encoder.rs
//
// Encode stage, two tiers:
// - Accelerated: mozjpeg (progressive JPEG), libwebp (lossy WebP),
//   PNG re-optimised losslessly by oxipng.
// - Baseline: the image crate's own encoders.
//
// `encode_with_fallback` always tries the baseline after any accelerated
// failure, including a contained panic.

use crate::engine::common::run_with_panic_policy;
use crate::engine::quality::QualitySettings;
use crate::engine::decoder::check_dimensions;
use crate::error::ProcessError;
use crate::settings::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::Cursor;
use tracing::warn;

type EncoderResult<T> = std::result::Result<T, ProcessError>;

/// Which tier produced an encoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderTier {
    Accelerated,
    Baseline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub tier: EncoderTier,
}

fn validate_dimensions(img: &DynamicImage, format: &'static str) -> EncoderResult<()> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(ProcessError::encode_failed(
            format,
            "invalid image dimensions: width or height is zero",
        ));
    }
    check_dimensions(w, h)
}

/// Encode to JPEG using mozjpeg with web-optimised settings.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        validate_dimensions(img, "jpeg")?;
        let settings = QualitySettings::new(quality);

        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ProcessError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            for row in pixels.chunks(w as usize * 3) {
                writer.write_scanlines(row).map_err(|e| {
                    ProcessError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ProcessError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }
        Ok(output)
    })
}

/// Encode to lossy WebP via libwebp. Alpha is kept only when present.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        validate_dimensions(img, "webp")?;
        let (w, h) = (img.width(), img.height());

        let rgba;
        let rgb;
        let encoder = if img.color().has_alpha() {
            rgba = img.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), w, h)
        } else {
            rgb = match img {
                DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
                _ => Cow::Owned(img.to_rgb8()),
            };
            webp::Encoder::from_rgb(rgb.as_raw(), w, h)
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| ProcessError::encode_failed("webp", "failed to create WebPConfig"))?;

        let settings = QualitySettings::new(quality);
        config.quality = settings.quality();
        config.method = settings.webp_method();
        config.pass = settings.webp_pass();
        config.preprocessing = 0;
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            ProcessError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;
        Ok(mem.to_vec())
    })
}

/// Encode to PNG and re-compress losslessly with oxipng.
pub fn encode_png(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        validate_dimensions(img, "png")?;
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| ProcessError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(2);
        options.strip = oxipng::StripChunks::Safe;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            ProcessError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Accelerated tier for `format`.
pub fn encode_accelerated(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> EncoderResult<Vec<u8>> {
    match format {
        OutputFormat::Jpeg => encode_jpeg(img, quality),
        OutputFormat::WebP => encode_webp(img, quality),
        OutputFormat::Png => encode_png(img),
    }
}

/// Baseline tier: the image crate's encoders (JPEG at the same quality,
/// PNG, lossless WebP).
pub fn encode_baseline(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:baseline", || {
        validate_dimensions(img, format.as_str())?;
        let mut buf = Vec::new();
        let result = match format {
            OutputFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(
                    &mut buf,
                    quality.clamp(1, 100),
                ))
            }
            OutputFormat::Png => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
            OutputFormat::WebP => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))
            }
        };
        result.map_err(|e| {
            ProcessError::encode_failed(format.as_str(), format!("baseline encoder failed: {e}"))
        })?;
        Ok(buf)
    })
}

/// Run `accelerated`, falling back to `baseline` on any failure.
///
/// When both fail the error carries both messages. Out-of-memory failures
/// keep their category.
pub fn with_fallback<A, B>(format: OutputFormat, accelerated: A, baseline: B) -> EncoderResult<Encoded>
where
    A: FnOnce() -> EncoderResult<Vec<u8>>,
    B: FnOnce() -> EncoderResult<Vec<u8>>,
{
    let primary_err = match run_with_panic_policy("encode:accelerated", accelerated) {
        Ok(bytes) => {
            return Ok(Encoded {
                bytes,
                tier: EncoderTier::Accelerated,
            })
        }
        Err(e) => e,
    };

    warn!(
        target: "imgbatch::encode",
        format = format.as_str(),
        error = %primary_err,
        "accelerated encoder failed, falling back to baseline"
    );

    match run_with_panic_policy("encode:baseline", baseline) {
        Ok(bytes) => Ok(Encoded {
            bytes,
            tier: EncoderTier::Baseline,
        }),
        Err(fallback_err) => {
            if fallback_err.category() == crate::error::ErrorCategory::OutOfMemory {
                return Err(fallback_err);
            }
            Err(ProcessError::encode_failed(
                format.as_str(),
                format!("{primary_err}; baseline fallback failed: {fallback_err}"),
            ))
        }
    }
}

/// Encode `img` as `format` at the normalized encoder quality
/// (0.1..=0.95).
pub fn encode_with_fallback(
    img: &DynamicImage,
    format: OutputFormat,
    encoder_quality: f64,
) -> EncoderResult<Encoded> {
    let quality = (encoder_quality * 100.0).round().clamp(1.0, 100.0) as u8;
    with_fallback(
        format,
        || encode_accelerated(img, format, quality),
        || encode_baseline(img, format, quality),
    )
}

/// Presentation name for an output: the source stem plus the format
/// extension (`photo.heic` -> `photo.jpg`).
pub fn output_name(source_name: &str, format: OutputFormat) -> String {
    let stem = match source_name.rfind('.') {
        Some(idx) if idx > 0 && !source_name[idx + 1..].contains(['/', '\\']) => {
            &source_name[..idx]
        }
        _ => source_name,
    };
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{stem}.{}", format.extension())
}
