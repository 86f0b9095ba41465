#![no_main]

use arbitrary::Arbitrary;
use image::{DynamicImage, ImageFormat, RgbaImage};
use imgbatch::engine::pipeline::process;
use imgbatch::settings::{
    FitMode, ImageStamp, OutputFormat, Settings, SizeSettings, TextStamp, WatermarkMode,
};
use imgbatch::JobMeta;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

#[derive(Arbitrary, Debug)]
struct SettingsSeed {
    format: u8,
    intensity: f64,
    quality: Option<u8>,
    width: Option<u8>,
    height: Option<u8>,
    cover: bool,
    prevent_upscale: bool,
    crop: (f64, f64, f64),
    watermark: u8,
    angle: f64,
    spacing: f64,
    scale: f64,
    opacity: f64,
    pixels: Vec<u8>,
}

fn source_png(pixels: &[u8]) -> Vec<u8> {
    let width = pixels.first().copied().unwrap_or(0) as u32 % 48 + 1;
    let height = pixels.get(1).copied().unwrap_or(0) as u32 % 48 + 1;
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize;
        let v = if pixels.is_empty() { 0 } else { pixels[i % pixels.len()] };
        image::Rgba([v, v.wrapping_mul(3), v ^ 0x5A, v | 0x0F])
    });
    let mut buf = Vec::new();
    let _ = DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png);
    buf
}

fn build_settings(seed: &SettingsSeed) -> Settings {
    let mut settings = Settings::default();
    settings.encode.format = match seed.format % 3 {
        0 => OutputFormat::Jpeg,
        1 => OutputFormat::Png,
        _ => OutputFormat::WebP,
    };
    settings.encode.intensity = seed.intensity;
    settings.encode.quality = seed.quality;
    settings.size = SizeSettings {
        enabled: seed.width.is_some() || seed.height.is_some(),
        width: seed.width.map(|w| w.max(1) as u32),
        height: seed.height.map(|h| h.max(1) as u32),
        ratio: None,
        fit: if seed.cover { FitMode::Cover } else { FitMode::Contain },
        prevent_upscale: seed.prevent_upscale,
    };
    settings.crop.x = seed.crop.0;
    settings.crop.y = seed.crop.1;
    settings.crop.scale = seed.crop.2;
    settings.watermark.mode = match seed.watermark % 3 {
        0 => WatermarkMode::Off,
        1 => WatermarkMode::Text(TextStamp::new("fuzz")),
        _ => WatermarkMode::Image(ImageStamp::new(seed.pixels.clone())),
    };
    settings.watermark.angle = seed.angle;
    settings.watermark.spacing = seed.spacing.clamp(0.0, 1000.0);
    settings.watermark.scale = seed.scale.clamp(0.0, 4.0);
    settings.watermark.opacity = seed.opacity;
    settings
}

fuzz_target!(|seed: SettingsSeed| {
    let settings = build_settings(&seed);
    if settings.validate().is_err() {
        return;
    }
    let input = source_png(&seed.pixels);
    let meta = JobMeta::new("fuzz", "fuzz.png", "image/png");
    if let Ok(result) = process(&meta, &settings, &input) {
        assert_eq!(result.size, result.bytes.len());
        assert!(result.width >= 1 && result.height >= 1);
    }
});
