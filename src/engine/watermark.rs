// src/engine/watermark.rs
//
// Tiled, rotated watermark.
//
// 1. Build one tile (rasterized text or a fitted stamp image) with a
//    transparent margin around it.
// 2. Plan a grid of tile origins over an area large enough to cover the
//    canvas after rotation.
// 3. Composite: every canvas pixel is mapped back through the rotation into
//    grid space and blended with the tile texel it lands on. Rows run in
//    parallel.
//
// Missing resources (no font, no stamp bytes, undecodable stamp) skip the
// stage with a warning; a watermark never fails a job on its own.

use crate::engine::decoder::{check_dimensions, decode_image};
use crate::engine::resize::{contain, resample};
use crate::error::ProcessError;
use crate::settings::{ImageStamp, TextStamp, WatermarkMode, WatermarkSettings, MIN_TILE_SCALE};
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{DynamicImage, Rgba, RgbaImage};
use rayon::prelude::*;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::warn;

pub const DEFAULT_FONT_SIZE: f64 = 24.0;
pub const MIN_FONT_SIZE: f64 = 8.0;
/// Approximate glyph cell width as a fraction of the font size.
const CHAR_WIDTH_FACTOR: f64 = 0.6;
pub const DEFAULT_STAMP_WIDTH: u32 = 240;
pub const DEFAULT_STAMP_HEIGHT: u32 = 120;
const MIN_STEP: f64 = 4.0;

/// Environment variable naming a TTF/OTF file used when a text stamp carries
/// no font bytes.
pub const FONT_ENV: &str = "IMGBATCH_FONT";

const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
}

/// Grid of tile origins in the rotated covering area.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementPlan {
    pub angle_rad: f64,
    pub diag_w: f64,
    pub diag_h: f64,
    pub step_x: f64,
    pub step_y: f64,
    /// Grid start, equal to `-margin` on both axes.
    pub start: f64,
    pub columns: usize,
    pub rows: usize,
}

impl PlacementPlan {
    pub fn placement_count(&self) -> usize {
        self.columns.saturating_mul(self.rows)
    }

    /// Row-major tile origins, computed on demand.
    pub fn positions(&self) -> impl Iterator<Item = Placement> + '_ {
        (0..self.rows).flat_map(move |row| {
            let y = self.start + row as f64 * self.step_y;
            (0..self.columns).map(move |col| Placement {
                x: self.start + col as f64 * self.step_x,
                y,
            })
        })
    }
}

fn font_px(stamp: &TextStamp, scale: f64) -> f64 {
    (stamp.font_size.unwrap_or(DEFAULT_FONT_SIZE) * scale)
        .round()
        .max(MIN_FONT_SIZE)
}

pub fn tile_size_for_text(stamp: &TextStamp, scale: f64, margin: f64) -> TileSize {
    let font_size = font_px(stamp, scale);
    let char_w = (font_size * CHAR_WIDTH_FACTOR).round().max(1.0);
    let text_w = (stamp.text.chars().count() as f64 * char_w).max(1.0);
    TileSize {
        width: (text_w + margin * 2.0).round().max(1.0) as u32,
        height: (font_size + margin * 2.0).round().max(1.0) as u32,
    }
}

pub fn tile_size_for_image(stamp: &ImageStamp, scale: f64, margin: f64) -> TileSize {
    let base_w = stamp.width.unwrap_or(DEFAULT_STAMP_WIDTH) as f64;
    let base_h = stamp.height.unwrap_or(DEFAULT_STAMP_HEIGHT) as f64;
    TileSize {
        width: (base_w * scale + margin * 2.0).round().max(1.0) as u32,
        height: (base_h * scale + margin * 2.0).round().max(1.0) as u32,
    }
}

/// Bounding box of an `out_w x out_h` canvas rotated by `angle_rad`.
pub fn compute_diagonal(out_w: u32, out_h: u32, angle_rad: f64) -> (f64, f64) {
    let c = angle_rad.cos().abs();
    let s = angle_rad.sin().abs();
    let (w, h) = (out_w as f64, out_h as f64);
    (w * c + h * s, w * s + h * c)
}

fn grid_count(start: f64, end: f64, step: f64) -> usize {
    if end <= start {
        0
    } else {
        ((end - start) / step).ceil() as usize
    }
}

pub fn compute_placements(
    out_w: u32,
    out_h: u32,
    tile_w: u32,
    tile_h: u32,
    angle_deg: f64,
    spacing: f64,
    margin: f64,
) -> PlacementPlan {
    let angle_rad = (angle_deg % 360.0).to_radians();
    let (diag_w, diag_h) = compute_diagonal(out_w, out_h, angle_rad);
    let step_x = (tile_w as f64 + spacing).max(MIN_STEP);
    let step_y = (tile_h as f64 + spacing).max(MIN_STEP);

    let start = -margin;
    let columns = grid_count(start, (diag_w + margin).ceil(), step_x);
    let rows = grid_count(start, (diag_h + margin).ceil(), step_y);

    PlacementPlan {
        angle_rad,
        diag_w,
        diag_h,
        step_x,
        step_y,
        start,
        columns,
        rows,
    }
}

// =============================================================================
// TILE RENDERING
// =============================================================================

/// Parse `#RGB` / `#RRGGBB`.
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => Some([
            channel(&hex[0..1])? * 17,
            channel(&hex[1..2])? * 17,
            channel(&hex[2..3])? * 17,
        ]),
        6 => Some([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        ]),
        _ => None,
    }
}

fn system_font() -> Option<&'static [u8]> {
    static SYSTEM_FONT: OnceLock<Option<Vec<u8>>> = OnceLock::new();
    SYSTEM_FONT
        .get_or_init(|| {
            let from_env = std::env::var(FONT_ENV).ok();
            from_env
                .iter()
                .map(String::as_str)
                .chain(SYSTEM_FONT_PATHS.iter().copied())
                .find_map(|path| std::fs::read(path).ok())
        })
        .as_deref()
}

fn font_bytes(stamp: &TextStamp) -> Option<Cow<'_, [u8]>> {
    match &stamp.font {
        Some(bytes) => Some(Cow::Borrowed(bytes.as_slice())),
        None => system_font().map(Cow::Borrowed),
    }
}

/// Rasterize the text centred in a transparent tile.
pub fn render_text_tile(stamp: &TextStamp, scale: f64, margin: f64) -> Option<RgbaImage> {
    let bytes = font_bytes(stamp)?;
    let font = match FontRef::try_from_slice(&bytes) {
        Ok(font) => font,
        Err(e) => {
            warn!(target: "imgbatch::pipeline", error = %e, "watermark font is not a valid font");
            return None;
        }
    };

    let size = tile_size_for_text(stamp, scale, margin);
    let px = PxScale::from(font_px(stamp, scale) as f32);
    let scaled = font.as_scaled(px);
    let [r, g, b] = stamp
        .color
        .as_deref()
        .and_then(parse_hex_color)
        .unwrap_or([0, 0, 0]);

    let mut measured = 0.0f32;
    let mut prev: Option<ab_glyph::GlyphId> = None;
    for c in stamp.text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            measured += scaled.kern(p, id);
        }
        measured += scaled.h_advance(id);
        prev = Some(id);
    }

    let mut tile = RgbaImage::new(size.width, size.height);
    let mut cursor_x = (size.width as f32 - measured) / 2.0;
    // Centre the ascent/descent band vertically.
    let baseline = (size.height as f32 + scaled.ascent() + scaled.descent()) / 2.0;

    let mut prev: Option<ab_glyph::GlyphId> = None;
    for c in stamp.text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            cursor_x += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(px, ab_glyph::point(cursor_x, baseline));
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let x = gx as i32 + bounds.min.x as i32;
                let y = gy as i32 + bounds.min.y as i32;
                if x >= 0 && y >= 0 && (x as u32) < size.width && (y as u32) < size.height {
                    let top = Rgba([r, g, b, (coverage.clamp(0.0, 1.0) * 255.0) as u8]);
                    let pixel = tile.get_pixel_mut(x as u32, y as u32);
                    *pixel = blend_over(*pixel, top, 1.0);
                }
            });
        }
        cursor_x += scaled.h_advance(id);
        prev = Some(id);
    }
    Some(tile)
}

/// Decode the stamp and fit it (contain) centred in a tile of `size`.
pub fn render_image_tile(stamp: &ImageStamp, size: TileSize) -> Option<RgbaImage> {
    let data = stamp.data.as_ref()?;
    let decoded = match decode_image(data, None) {
        Ok(img) => img,
        Err(e) => {
            warn!(target: "imgbatch::pipeline", error = %e, "watermark stamp failed to decode");
            return None;
        }
    };

    let fitted = contain(decoded.width(), decoded.height(), size.width, size.height, false);
    let drawn = if fitted.width == decoded.width() && fitted.height == decoded.height() {
        decoded.into_rgba8()
    } else {
        match resample(
            DynamicImage::ImageRgba8(decoded.into_rgba8()),
            fitted.width,
            fitted.height,
            None,
        ) {
            Ok(img) => img.into_rgba8(),
            Err(e) => {
                warn!(target: "imgbatch::pipeline", reason = %e.reason, "watermark stamp failed to resize");
                return None;
            }
        }
    };

    let mut tile = RgbaImage::new(size.width, size.height);
    let dx = (size.width.saturating_sub(drawn.width())) / 2;
    let dy = (size.height.saturating_sub(drawn.height())) / 2;
    image::imageops::replace(&mut tile, &drawn, dx as i64, dy as i64);
    Some(tile)
}

// =============================================================================
// COMPOSITING
// =============================================================================

/// Porter-Duff source-over with an extra opacity on the foreground.
pub fn blend_over(background: Rgba<u8>, foreground: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let fg_alpha = (foreground[3] as f32 / 255.0) * opacity.clamp(0.0, 1.0);
    let bg_alpha = background[3] as f32 / 255.0;
    let out_alpha = fg_alpha + bg_alpha * (1.0 - fg_alpha);

    if out_alpha < 0.001 {
        return Rgba([0, 0, 0, 0]);
    }

    let blend_channel = |fg: u8, bg: u8| -> u8 {
        let fg_f = fg as f32 / 255.0;
        let bg_f = bg as f32 / 255.0;
        let result = (fg_f * fg_alpha + bg_f * bg_alpha * (1.0 - fg_alpha)) / out_alpha;
        (result * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        blend_channel(foreground[0], background[0]),
        blend_channel(foreground[1], background[1]),
        blend_channel(foreground[2], background[2]),
        (out_alpha * 255.0).round() as u8,
    ])
}

/// Stamp `tile` at every grid position of `plan`, rotated about the canvas
/// centre, at `opacity`.
pub fn composite(canvas: &mut RgbaImage, tile: &RgbaImage, plan: &PlacementPlan, opacity: f32) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 || plan.columns == 0 || plan.rows == 0 || opacity <= 0.0 {
        return;
    }
    let (tile_w, tile_h) = (tile.width() as f64, tile.height() as f64);
    let (sin, cos) = plan.angle_rad.sin_cos();
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
    let (half_w, half_h) = (plan.diag_w / 2.0, plan.diag_h / 2.0);

    canvas
        .par_chunks_mut(width as usize * 4)
        .enumerate()
        .for_each(|(py, row)| {
            let dy = py as f64 + 0.5 - cy;
            for (px, pixel) in row.chunks_exact_mut(4).enumerate() {
                let dx = px as f64 + 0.5 - cx;
                // Inverse rotation into the covering area, origin at -diag/2.
                let gx = dx * cos + dy * sin + half_w - plan.start;
                let gy = -dx * sin + dy * cos + half_h - plan.start;
                if gx < 0.0 || gy < 0.0 {
                    continue;
                }
                let col = (gx / plan.step_x).floor();
                let row_idx = (gy / plan.step_y).floor();
                if col >= plan.columns as f64 || row_idx >= plan.rows as f64 {
                    continue;
                }
                let lx = gx - col * plan.step_x;
                let ly = gy - row_idx * plan.step_y;
                if lx >= tile_w || ly >= tile_h {
                    continue;
                }
                let texel = *tile.get_pixel(lx as u32, ly as u32);
                if texel[3] == 0 {
                    continue;
                }
                let bg = Rgba([pixel[0], pixel[1], pixel[2], pixel[3]]);
                let out = blend_over(bg, texel, opacity);
                pixel.copy_from_slice(&out.0);
            }
        });
}

/// Build the tile for the configured mode, or `None` when the stage should
/// be skipped.
fn build_tile(settings: &WatermarkSettings, scale: f64, margin: f64) -> Option<RgbaImage> {
    match &settings.mode {
        WatermarkMode::Off => None,
        WatermarkMode::Text(stamp) => {
            let tile = render_text_tile(stamp, scale, margin);
            if tile.is_none() {
                warn!(
                    target: "imgbatch::pipeline",
                    env = FONT_ENV,
                    "no usable font for text watermark, skipping"
                );
            }
            tile
        }
        WatermarkMode::Image(stamp) => {
            if stamp.data.is_none() {
                warn!(target: "imgbatch::pipeline", "image watermark has no stamp bytes, skipping");
                return None;
            }
            render_image_tile(stamp, tile_size_for_image(stamp, scale, margin))
        }
    }
}

/// Run the watermark stage.
pub fn apply_watermark(
    img: DynamicImage,
    settings: &WatermarkSettings,
) -> Result<DynamicImage, ProcessError> {
    if settings.mode.is_off() {
        return Ok(img);
    }
    let spacing = settings.spacing.max(0.0);
    let scale = settings.scale.max(MIN_TILE_SCALE);
    let margin = settings.margin.max(0.0);
    let opacity = settings.opacity.clamp(0.0, 1.0);
    if !settings.angle.is_finite() {
        return Err(ProcessError::invalid_settings(
            "angle",
            settings.angle.to_string(),
            "rotation angle must be finite",
        ));
    }

    let tile_size = match &settings.mode {
        WatermarkMode::Off => None,
        WatermarkMode::Text(stamp) => Some(tile_size_for_text(stamp, scale, margin)),
        WatermarkMode::Image(stamp) => Some(tile_size_for_image(stamp, scale, margin)),
    };
    if let Some(size) = tile_size {
        check_dimensions(size.width, size.height)?;
    }

    let Some(tile) = build_tile(settings, scale, margin) else {
        return Ok(img);
    };

    let (out_w, out_h) = (img.width(), img.height());
    let plan = compute_placements(
        out_w,
        out_h,
        tile.width(),
        tile.height(),
        settings.angle,
        spacing,
        margin,
    );

    let keep_alpha = img.color().has_alpha();
    let mut canvas = img.into_rgba8();
    composite(&mut canvas, &tile, &plan, opacity as f32);

    Ok(if keep_alpha {
        DynamicImage::ImageRgba8(canvas)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).into_rgb8())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    mod geometry_tests {
        use super::*;

        #[test]
        fn text_tile_size() {
            let stamp = TextStamp::new("HELLO");
            // font 24, cell round(14.4)=14, text 70, margin 24 each side
            assert_eq!(
                tile_size_for_text(&stamp, 1.0, 24.0),
                TileSize {
                    width: 118,
                    height: 72
                }
            );
        }

        #[test]
        fn text_tile_font_floor() {
            let mut stamp = TextStamp::new("ab");
            stamp.font_size = Some(4.0);
            let t = tile_size_for_text(&stamp, 0.5, 0.0);
            // font floored to 8, cell round(4.8)=5
            assert_eq!((t.width, t.height), (10, 8));
        }

        #[test]
        fn image_tile_size_defaults() {
            let stamp = ImageStamp {
                data: None,
                width: None,
                height: None,
            };
            assert_eq!(
                tile_size_for_image(&stamp, 0.5, 10.0),
                TileSize {
                    width: 140,
                    height: 80
                }
            );
        }

        #[test]
        fn zero_angle_covers_canvas_exactly() {
            let (w, h) = compute_diagonal(800, 600, 0.0);
            assert!((w - 800.0).abs() < 1e-9);
            assert!((h - 600.0).abs() < 1e-9);
        }

        #[test]
        fn right_angle_swaps_axes() {
            let (w, h) = compute_diagonal(800, 600, std::f64::consts::FRAC_PI_2);
            assert!((w - 600.0).abs() < 1e-6);
            assert!((h - 800.0).abs() < 1e-6);
        }

        #[test]
        fn placement_grid_matches_formula() {
            let plan = compute_placements(100, 100, 30, 20, 0.0, 10.0, 5.0);
            assert_eq!(plan.step_x, 40.0);
            assert_eq!(plan.step_y, 30.0);
            // x: -5, 35, 75 (< 105); y: -5, 25, 55, 85 (< 105)
            assert_eq!(plan.columns, 3);
            assert_eq!(plan.rows, 4);
            assert_eq!(plan.placement_count(), 12);
            let positions: Vec<Placement> = plan.positions().collect();
            assert_eq!(positions.len(), 12);
            assert_eq!(positions[0], Placement { x: -5.0, y: -5.0 });
            assert_eq!(positions[1], Placement { x: 35.0, y: -5.0 });
            assert_eq!(positions[11], Placement { x: 75.0, y: 85.0 });
        }

        #[test]
        fn step_has_floor() {
            let plan = compute_placements(50, 50, 1, 1, 45.0, 0.0, 0.0);
            assert_eq!(plan.step_x, 4.0);
            assert_eq!(plan.step_y, 4.0);
        }

        #[test]
        fn angle_wraps() {
            let a = compute_placements(200, 100, 20, 20, 390.0, 10.0, 0.0);
            let b = compute_placements(200, 100, 20, 20, 30.0, 10.0, 0.0);
            assert!((a.angle_rad - b.angle_rad).abs() < 1e-9);
            assert_eq!(a.placement_count(), b.placement_count());
        }

        #[test]
        fn huge_canvas_with_tiny_tiles_plans_without_materialising_origins() {
            let plan = compute_placements(32_768, 32_768, 1, 1, 0.0, 0.0, 0.0);
            assert_eq!(plan.columns, 8192);
            assert_eq!(plan.rows, 8192);
            assert_eq!(plan.placement_count(), 8192 * 8192);
            assert_eq!(
                plan.positions().nth(8193),
                Some(Placement { x: 4.0, y: 4.0 })
            );
        }
    }

    #[test]
    fn parses_colors() {
        assert_eq!(parse_hex_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_hex_color("#12ab34"), Some([0x12, 0xab, 0x34]));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(parse_hex_color("#12345"), None);
    }

    #[test]
    fn blend_respects_opacity() {
        let bg = Rgba([0, 0, 0, 255]);
        let fg = Rgba([255, 255, 255, 255]);
        assert_eq!(blend_over(bg, fg, 0.0), bg);
        assert_eq!(blend_over(bg, fg, 1.0), fg);
        let half = blend_over(bg, fg, 0.5);
        assert!(half[0] > 120 && half[0] < 135);
        assert_eq!(half[3], 255);
    }

    mod composite_tests {
        use super::*;

        fn solid_tile(w: u32, h: u32) -> RgbaImage {
            RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
        }

        #[test]
        fn unrotated_grid_stamps_expected_pixels() {
            let mut canvas = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
            let tile = solid_tile(4, 4);
            let plan = compute_placements(20, 20, 4, 4, 0.0, 6.0, 0.0);
            composite(&mut canvas, &tile, &plan, 1.0);
            // tiles at 0,10 on both axes
            assert_eq!(canvas.get_pixel(1, 1)[0], 255);
            assert_eq!(canvas.get_pixel(11, 11)[0], 255);
            assert_eq!(canvas.get_pixel(5, 5)[0], 0);
            assert_eq!(canvas.get_pixel(15, 1)[0], 0);
        }

        #[test]
        fn zero_opacity_is_noop() {
            let mut canvas = RgbaImage::from_pixel(16, 16, Rgba([9, 9, 9, 255]));
            let before = canvas.clone();
            let tile = solid_tile(8, 8);
            let plan = compute_placements(16, 16, 8, 8, 30.0, 0.0, 0.0);
            composite(&mut canvas, &tile, &plan, 0.0);
            assert_eq!(canvas, before);
        }

        #[test]
        fn rotated_dense_grid_covers_whole_canvas() {
            let mut canvas = RgbaImage::from_pixel(40, 30, Rgba([0, 0, 0, 255]));
            let tile = solid_tile(8, 8);
            // spacing 0: tiles abut, so every pixel is covered at any angle
            let plan = compute_placements(40, 30, 8, 8, 30.0, 0.0, 0.0);
            composite(&mut canvas, &tile, &plan, 1.0);
            assert!(canvas.pixels().all(|p| p[0] == 255));
        }
    }

    mod stage_tests {
        use super::*;

        fn stamp_png() -> Vec<u8> {
            let img = RgbaImage::from_pixel(10, 5, Rgba([0, 0, 255, 255]));
            let mut buf = Vec::new();
            DynamicImage::ImageRgba8(img)
                .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            buf
        }

        #[test]
        fn off_mode_returns_input() {
            let img = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
            let out = apply_watermark(img.clone(), &WatermarkSettings::default()).unwrap();
            assert_eq!(out, img);
        }

        #[test]
        fn image_stamp_changes_pixels_and_keeps_layout() {
            let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                64,
                64,
                image::Rgb([255, 255, 255]),
            ));
            let settings = WatermarkSettings {
                mode: WatermarkMode::Image(ImageStamp {
                    data: Some(Arc::new(stamp_png())),
                    width: Some(20),
                    height: Some(10),
                }),
                angle: 0.0,
                spacing: 0.0,
                scale: 1.0,
                margin: 0.0,
                opacity: 1.0,
            };
            let out = apply_watermark(img, &settings).unwrap();
            assert_eq!((out.width(), out.height()), (64, 64));
            assert!(!out.color().has_alpha());
            let rgb = out.to_rgb8();
            assert!(rgb.pixels().any(|p| p[2] > 200 && p[0] < 50));
        }

        #[test]
        fn undecodable_stamp_is_skipped() {
            let img = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
            let settings = WatermarkSettings {
                mode: WatermarkMode::Image(ImageStamp::new(vec![1, 2, 3])),
                ..Default::default()
            };
            let out = apply_watermark(img.clone(), &settings).unwrap();
            assert_eq!(out, img);
        }

        #[test]
        fn invalid_font_bytes_skip_text_stamp() {
            let img = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
            let mut stamp = TextStamp::new("x");
            stamp.font = Some(Arc::new(vec![0u8; 16]));
            let settings = WatermarkSettings {
                mode: WatermarkMode::Text(stamp),
                ..Default::default()
            };
            let out = apply_watermark(img.clone(), &settings).unwrap();
            assert_eq!(out, img);
        }

        #[test]
        fn oversized_tile_is_rejected() {
            let img = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
            let settings = WatermarkSettings {
                mode: WatermarkMode::Image(ImageStamp::new(vec![1, 2, 3])),
                scale: 1e6,
                ..Default::default()
            };
            let err = apply_watermark(img, &settings).unwrap_err();
            assert_eq!(err.category(), crate::error::ErrorCategory::OutOfMemory);
        }
    }
}
