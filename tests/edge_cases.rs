// tests/edge_cases.rs
//
// Boundary inputs pushed through the whole pipeline: 1x1 images, alpha,
// oversized headers, empty and mislabelled input, pinned quality.

use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
use imgbatch::engine::pipeline::process;
use imgbatch::engine::protocol::{JobFailure, JobMeta};
use imgbatch::error::{ErrorCategory, ProcessError};
use imgbatch::settings::{
    EncodeSettings, FitMode, ImageStamp, OutputFormat, Settings, SizeSettings, WatermarkMode,
};
use std::io::Cursor;

fn create_test_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

// High-frequency content so quality changes show up in the byte count.
fn create_noisy_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729)) % 256;
        image::Rgb([v as u8, (v * 3 % 256) as u8, (255 - v) as u8])
    }))
}

fn to_bytes(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn png_meta(name: &str) -> JobMeta {
    JobMeta::new("edge", name, "image/png")
}

fn settings_for(format: OutputFormat) -> Settings {
    Settings {
        encode: EncodeSettings {
            format,
            ..EncodeSettings::default()
        },
        ..Settings::default()
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in bytes {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

fn png_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let mut body = kind.to_vec();
    body.extend_from_slice(data);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32(&body).to_be_bytes());
}

// A PNG whose header claims `width x height` but carries no real pixels.
fn png_header_only(width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    png_chunk(&mut out, b"IHDR", &ihdr);
    png_chunk(&mut out, b"IDAT", &[0x78, 0x9C, 0x03, 0x00]);
    png_chunk(&mut out, b"IEND", &[]);
    out
}

mod minimal_image_tests {
    use super::*;

    #[test]
    fn test_1x1_to_every_format() {
        let input = to_bytes(&create_test_image(1, 1), ImageFormat::Png);
        for format in [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::WebP] {
            let result = process(&png_meta("dot.png"), &settings_for(format), &input).unwrap();
            assert_eq!((result.width, result.height), (1, 1), "{format:?}");
            assert_eq!(result.format, format);
            let decoded = image::load_from_memory(&result.bytes).unwrap();
            assert_eq!(decoded.dimensions(), (1, 1), "{format:?}");
        }
    }

    #[test]
    fn test_1x1_jpeg_magic() {
        let input = to_bytes(&create_test_image(1, 1), ImageFormat::Png);
        let result = process(&png_meta("dot.png"), &Settings::default(), &input).unwrap();
        assert_eq!(&result.bytes[0..2], &[0xFF, 0xD8]);
        assert_eq!(result.name, "dot.jpg");
    }

    #[test]
    fn test_1x1_is_not_upscaled_by_default() {
        let input = to_bytes(&create_test_image(1, 1), ImageFormat::Png);
        let mut settings = Settings::default();
        settings.size = SizeSettings {
            enabled: true,
            width: Some(100),
            ..SizeSettings::default()
        };
        let result = process(&png_meta("dot.png"), &settings, &input).unwrap();
        assert_eq!((result.width, result.height), (1, 1));

        settings.size.prevent_upscale = false;
        let result = process(&png_meta("dot.png"), &settings, &input).unwrap();
        assert_eq!((result.width, result.height), (100, 100));
    }
}

mod alpha_tests {
    use super::*;

    fn translucent_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(16, 16, |x, y| {
            image::Rgba([200, (x * 16) as u8, (y * 16) as u8, (x * 16 + 15) as u8])
        }));
        to_bytes(&img, ImageFormat::Png)
    }

    #[test]
    fn test_alpha_to_jpeg_is_flattened() {
        let result = process(&png_meta("a.png"), &Settings::default(), &translucent_png()).unwrap();
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert!(!decoded.color().has_alpha());
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[test]
    fn test_alpha_survives_png_output() {
        let result = process(
            &png_meta("a.png"),
            &settings_for(OutputFormat::Png),
            &translucent_png(),
        )
        .unwrap();
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_alpha_to_webp() {
        let result = process(
            &png_meta("a.png"),
            &settings_for(OutputFormat::WebP),
            &translucent_png(),
        )
        .unwrap();
        assert_eq!(&result.bytes[0..4], b"RIFF");
        assert_eq!(&result.bytes[8..12], b"WEBP");
        assert_eq!(result.name, "a.webp");
    }
}

mod cover_tests {
    use super::*;

    fn cover_settings(width: u32, height: u32) -> Settings {
        let mut settings = Settings::default();
        settings.size = SizeSettings {
            enabled: true,
            width: Some(width),
            height: Some(height),
            fit: FitMode::Cover,
            ..SizeSettings::default()
        };
        settings
    }

    #[test]
    fn test_cover_fills_box_exactly() {
        let input = to_bytes(&create_test_image(200, 100), ImageFormat::Png);
        let result = process(&png_meta("wide.png"), &cover_settings(50, 50), &input).unwrap();
        assert_eq!((result.width, result.height), (50, 50));
    }

    #[test]
    fn test_cover_with_offset_and_zoom() {
        let input = to_bytes(&create_test_image(300, 120), ImageFormat::Png);
        let mut settings = cover_settings(60, 40);
        settings.crop.x = 1.0;
        settings.crop.y = 0.0;
        settings.crop.scale = 2.5;
        let result = process(&png_meta("wide.png"), &settings, &input).unwrap();
        assert_eq!((result.width, result.height), (60, 40));
    }

    #[test]
    fn test_extreme_aspect_ratio() {
        let input = to_bytes(&create_test_image(1000, 1), ImageFormat::Png);
        let mut settings = Settings::default();
        settings.size = SizeSettings {
            enabled: true,
            width: Some(100),
            ..SizeSettings::default()
        };
        let result = process(&png_meta("line.png"), &settings, &input).unwrap();
        assert_eq!(result.width, 100);
        assert_eq!(result.height, 1);
    }
}

mod size_limit_tests {
    use super::*;

    #[test]
    fn test_oversized_header_is_rejected_before_decode() {
        let input = png_header_only(40_000, 1);
        let err = process(&png_meta("bomb.png"), &Settings::default(), &input).unwrap_err();
        assert!(matches!(err, ProcessError::DimensionExceedsLimit { .. }), "{err}");
        assert_eq!(err.category(), ErrorCategory::OutOfMemory);
    }

    #[test]
    fn test_upscale_beyond_pixel_limit_fails_the_job() {
        let input = to_bytes(&create_test_image(64, 64), ImageFormat::Png);
        let mut settings = Settings::default();
        settings.size = SizeSettings {
            enabled: true,
            width: Some(12_000),
            height: Some(12_000),
            prevent_upscale: false,
            ..SizeSettings::default()
        };
        let err = process(&png_meta("tiny.png"), &settings, &input).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::OutOfMemory);
        assert_eq!(JobFailure::from(&err).category, ErrorCategory::OutOfMemory);
    }

    #[test]
    fn test_pixel_bomb_is_rejected() {
        let input = png_header_only(20_000, 20_000);
        let err = process(&png_meta("bomb.png"), &Settings::default(), &input).unwrap_err();
        assert!(matches!(err, ProcessError::PixelCountExceedsLimit { .. }), "{err}");
        let failure = JobFailure::from(&err);
        assert_eq!(failure.category, ErrorCategory::OutOfMemory);
    }
}

mod input_tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        let err = process(&png_meta("none.png"), &Settings::default(), &[]).unwrap_err();
        assert!(matches!(err, ProcessError::MissingInput));
        assert_eq!(err.to_string(), "no-data");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_text_file_without_type() {
        let meta = JobMeta::new("edge", "notes.txt", "");
        let err = process(&meta, &Settings::default(), b"just some text").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unsupported);
    }

    #[test]
    fn test_text_file_labelled_as_png() {
        let err = process(&png_meta("fake.png"), &Settings::default(), b"just some text")
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Decode);
    }

    #[test]
    fn test_magic_bytes_win_over_declared_type() {
        let input = to_bytes(&create_test_image(8, 6), ImageFormat::Png);
        let meta = JobMeta::new("edge", "mislabelled.jpg", "image/jpeg");
        let result = process(&meta, &settings_for(OutputFormat::Png), &input).unwrap();
        assert_eq!((result.width, result.height), (8, 6));
        assert_eq!(result.name, "mislabelled.png");
    }

    #[test]
    fn test_truncated_jpeg() {
        let full = to_bytes(&create_noisy_image(64, 64), ImageFormat::Jpeg);
        let truncated = &full[..full.len() / 3];
        let meta = JobMeta::new("edge", "cut.jpg", "image/jpeg");
        // Either the decoder recovers a partial frame or it reports a decode
        // failure; it must never panic out of the pipeline.
        if let Err(err) = process(&meta, &Settings::default(), truncated) {
            assert_eq!(err.category(), ErrorCategory::Decode, "{err}");
        }
    }
}

mod quality_boundary_tests {
    use super::*;

    fn pinned(quality: u8) -> Settings {
        Settings {
            encode: EncodeSettings {
                quality: Some(quality),
                ..EncodeSettings::default()
            },
            ..Settings::default()
        }
    }

    #[test]
    fn test_pinned_quality_orders_output_size() {
        let input = to_bytes(&create_noisy_image(128, 128), ImageFormat::Png);
        let low = process(&png_meta("n.png"), &pinned(10), &input).unwrap();
        let high = process(&png_meta("n.png"), &pinned(95), &input).unwrap();
        assert!(high.size > low.size, "{} <= {}", high.size, low.size);
    }

    #[test]
    fn test_pinned_quality_above_range_is_clamped() {
        let input = to_bytes(&create_noisy_image(64, 64), ImageFormat::Png);
        let max = process(&png_meta("n.png"), &pinned(95), &input).unwrap();
        let over = process(&png_meta("n.png"), &pinned(u8::MAX), &input).unwrap();
        assert_eq!(max.bytes, over.bytes);
    }

    #[test]
    fn test_intensity_extremes() {
        let input = to_bytes(&create_noisy_image(128, 128), ImageFormat::Png);
        let mut gentle = Settings::default();
        gentle.encode.intensity = 0.0;
        let mut harsh = Settings::default();
        harsh.encode.intensity = 100.0;
        let gentle = process(&png_meta("n.png"), &gentle, &input).unwrap();
        let harsh = process(&png_meta("n.png"), &harsh, &input).unwrap();
        assert!(gentle.size >= harsh.size);
    }
}

mod watermark_tests {
    use super::*;

    fn with_stamp(stamp: ImageStamp) -> Settings {
        let mut settings = settings_for(OutputFormat::Png);
        settings.watermark.mode = WatermarkMode::Image(stamp);
        settings.watermark.opacity = 1.0;
        settings
    }

    #[test]
    fn test_image_stamp_changes_pixels() {
        let canvas = DynamicImage::ImageRgb8(RgbImage::from_pixel(96, 64, image::Rgb([255; 3])));
        let input = to_bytes(&canvas, ImageFormat::Png);
        let stamp_img =
            DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([200, 0, 0])));
        let mut stamp = ImageStamp::new(to_bytes(&stamp_img, ImageFormat::Png));
        stamp.width = Some(16);
        stamp.height = Some(16);

        let mut settings = with_stamp(stamp);
        settings.watermark.angle = 0.0;
        settings.watermark.spacing = 0.0;
        settings.watermark.margin = 0.0;
        let plain = process(&png_meta("w.png"), &settings_for(OutputFormat::Png), &input).unwrap();
        let stamped = process(&png_meta("w.png"), &settings, &input).unwrap();

        assert_eq!((stamped.width, stamped.height), (96, 64));
        let plain = image::load_from_memory(&plain.bytes).unwrap().to_rgb8();
        let stamped = image::load_from_memory(&stamped.bytes).unwrap().to_rgb8();
        assert_ne!(plain, stamped);
    }

    #[test]
    fn test_undecodable_stamp_is_skipped() {
        let input = to_bytes(&create_test_image(32, 32), ImageFormat::Png);
        let plain = process(&png_meta("w.png"), &settings_for(OutputFormat::Png), &input).unwrap();
        let broken =
            process(&png_meta("w.png"), &with_stamp(ImageStamp::new(vec![1, 2, 3])), &input)
                .unwrap();
        assert_eq!(plain.bytes, broken.bytes);
    }
}
