#![no_main]

use arbitrary::Arbitrary;
use imgbatch::engine::crop::compute_crop_rect;
use imgbatch::engine::resize::calc_target_size;
use imgbatch::engine::watermark::compute_placements;
use imgbatch::settings::{AspectRatio, CropSettings, FitMode, SizeSettings};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct GeometryInput {
    src_w: u16,
    src_h: u16,
    width: Option<u16>,
    height: Option<u16>,
    ratio: Option<(u8, u8)>,
    cover: bool,
    prevent_upscale: bool,
    crop_x: f64,
    crop_y: f64,
    crop_scale: f64,
    tile_w: u16,
    tile_h: u16,
    angle: f64,
    spacing: f64,
}

fuzz_target!(|input: GeometryInput| {
    let src_w = input.src_w.max(1) as u32;
    let src_h = input.src_h.max(1) as u32;
    let size = SizeSettings {
        enabled: true,
        width: input.width.map(|w| w.max(1) as u32),
        height: input.height.map(|h| h.max(1) as u32),
        ratio: input
            .ratio
            .map(|(w, h)| AspectRatio::new(w.max(1) as f64, h.max(1) as f64)),
        fit: if input.cover { FitMode::Cover } else { FitMode::Contain },
        prevent_upscale: input.prevent_upscale,
    };

    let target = calc_target_size(src_w, src_h, &size);
    assert!(target.width >= 1 && target.height >= 1);

    let crop = CropSettings {
        x: input.crop_x,
        y: input.crop_y,
        scale: input.crop_scale,
    };
    let rect = compute_crop_rect(src_w, src_h, target.width, target.height, &crop);
    assert!(rect.width >= 1 && rect.height >= 1);
    assert!(rect.x + rect.width <= src_w && rect.y + rect.height <= src_h);

    if !input.angle.is_finite() || !input.spacing.is_finite() || input.spacing < 0.0 {
        return;
    }
    let out_w = target.width.min(512);
    let out_h = target.height.min(512);
    let plan = compute_placements(
        out_w,
        out_h,
        input.tile_w.max(1) as u32,
        input.tile_h.max(1) as u32,
        input.angle,
        input.spacing.min(10_000.0),
        24.0,
    );
    assert_eq!(plan.positions().count(), plan.placement_count());
});
