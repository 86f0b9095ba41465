// src/engine/decoder.rs
//
// Decode stage: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp), anything
// else the image crate can read.
//
// Format comes from magic bytes first and the declared MIME type second.
// Dimensions are checked against the engine limits from the header before
// any pixel buffer is allocated, and again after decode.

use crate::engine::common::run_with_panic_policy;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ProcessError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageError, ImageFormat, ImageReader, RgbImage,
    RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

type DecoderResult<T> = std::result::Result<T, ProcessError>;

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(ProcessError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            ProcessError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            ProcessError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = u32::try_from(decompress.width())
            .map_err(|_| ProcessError::dimension_exceeds_limit(u32::MAX, MAX_DIMENSION))?;
        let height = u32::try_from(decompress.height())
            .map_err(|_| ProcessError::dimension_exceeds_limit(u32::MAX, MAX_DIMENSION))?;
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            ProcessError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width, height, flat_pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                ProcessError::decode_failed("mozjpeg: failed to create image from raw data")
            })
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        // zune's own size cap is lower than ours; our limits are applied to
        // the header below instead.
        let options = DecoderOptions::default()
            .png_set_strip_to_8bit(true)
            .set_max_width(u32::MAX as usize)
            .set_max_height(u32::MAX as usize);
        let mut decoder = PngDecoder::new_with_options(data, options);
        decoder
            .decode_headers()
            .map_err(|e| ProcessError::decode_failed(format!("png: invalid header: {e}")))?;
        if let Some((w, h)) = decoder.get_dimensions() {
            check_dimensions(
                u32::try_from(w).unwrap_or(u32::MAX),
                u32::try_from(h).unwrap_or(u32::MAX),
            )?;
        }

        let pixels = decoder
            .decode()
            .map_err(|e| ProcessError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .get_info()
            .ok_or_else(|| ProcessError::decode_failed("png: missing header info"))?;

        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(ProcessError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .get_colorspace()
            .ok_or_else(|| ProcessError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| ProcessError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| ProcessError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| ProcessError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| ProcessError::decode_failed("png: failed to build LumaA image"))?,
            other => {
                return Err(ProcessError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated WebP goes through the image crate
/// and yields the first frame.
pub fn decode_webp_libwebp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            ProcessError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return image::load_from_memory_with_format(data, ImageFormat::WebP).map_err(|e| {
                ProcessError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| ProcessError::decode_failed("webp: decode failed"))?;

        check_dimensions(decoded.width(), decoded.height())?;
        Ok(decoded.to_image())
    })
}

/// Decode anything else the image crate understands.
pub fn decode_with_image_crate(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data).map_err(|e| match e {
            ImageError::Unsupported(u) => ProcessError::unsupported_format(u.to_string()),
            other => ProcessError::decode_failed(format!("decode failed: {other}")),
        })
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Map a declared MIME type onto a decoder.
pub fn format_from_mime(mime: &str) -> Option<ImageFormat> {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        "image/png" | "image/apng" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Decode entry point used by the pipeline.
///
/// Routes by magic bytes, then by `declared_type`. Bytes that match neither
/// are `UnsupportedFormat`.
pub fn decode_image(bytes: &[u8], declared_type: Option<&str>) -> DecoderResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(ProcessError::missing_input());
    }
    ensure_dimensions_safe(bytes)?;

    let format = detect_format(bytes).or_else(|| declared_type.and_then(format_from_mime));
    let img = match format {
        Some(ImageFormat::Jpeg) => decode_jpeg_mozjpeg(bytes)?,
        Some(ImageFormat::Png) => decode_png_zune(bytes)?,
        Some(ImageFormat::WebP) => decode_webp_libwebp(bytes)?,
        Some(_) => decode_with_image_crate(bytes)?,
        None => {
            return Err(ProcessError::unsupported_format(
                declared_type
                    .filter(|t| !t.is_empty())
                    .unwrap_or("unknown")
                    .to_string(),
            ))
        }
    };

    check_dimensions(img.width(), img.height())?;
    Ok(img)
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ProcessError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(ProcessError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Inspect encoded bytes and ensure the image dimensions are safe before decoding.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> DecoderResult<()> {
    let cursor = Cursor::new(bytes);
    if let Ok(reader) = ImageReader::new(cursor).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            return check_dimensions(width, height);
        }
    }
    Ok(())
}
