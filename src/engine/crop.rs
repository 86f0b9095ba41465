// src/engine/crop.rs
//
// Cover-mode crop window: which part of the source is drawn into the
// output box.

use crate::settings::{CropSettings, MIN_CROP_SCALE};

/// Source rectangle in pixels. Always lies inside the source bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale factor at which the source just covers the output box.
pub fn base_cover_scale(src_w: u32, src_h: u32, out_w: u32, out_h: u32) -> f64 {
    (out_w as f64 / src_w as f64).max(out_h as f64 / src_h as f64)
}

fn centre(v: f64) -> f64 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Crop rectangle for drawing `src` into an `out_w x out_h` box.
///
/// The window keeps the output aspect ratio, shrinks as `crop.scale` grows,
/// is centred on the normalized crop point, and is then shifted back inside
/// the source.
pub fn compute_crop_rect(
    src_w: u32,
    src_h: u32,
    out_w: u32,
    out_h: u32,
    crop: &CropSettings,
) -> CropRect {
    if src_w == 0 || src_h == 0 {
        return CropRect {
            x: 0,
            y: 0,
            width: src_w,
            height: src_h,
        };
    }

    let k = base_cover_scale(src_w, src_h, out_w.max(1), out_h.max(1));
    let scale = if crop.scale.is_nan() || crop.scale == 0.0 {
        1.0
    } else {
        crop.scale.max(MIN_CROP_SCALE)
    };

    let crop_w = ((out_w as f64 / (k * scale)).round() as u32).clamp(1, src_w);
    let crop_h = ((out_h as f64 / (k * scale)).round() as u32).clamp(1, src_h);

    let cx = centre(crop.x);
    let cy = centre(crop.y);

    let x = (cx * src_w as f64 - crop_w as f64 / 2.0).round();
    let y = (cy * src_h as f64 - crop_h as f64 / 2.0).round();
    let x = x.clamp(0.0, (src_w - crop_w) as f64) as u32;
    let y = y.clamp(0.0, (src_h - crop_h) as f64) as u32;

    CropRect {
        x,
        y,
        width: crop_w,
        height: crop_h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop(x: f64, y: f64, scale: f64) -> CropSettings {
        CropSettings { x, y, scale }
    }

    #[test]
    fn centred_crop_on_wide_source() {
        // 4000x3000 into 2000x2000: k = 2/3, window 3000x3000 centred.
        let r = compute_crop_rect(4000, 3000, 2000, 2000, &crop(0.5, 0.5, 1.0));
        assert_eq!(
            r,
            CropRect {
                x: 500,
                y: 0,
                width: 3000,
                height: 3000
            }
        );
    }

    #[test]
    fn centre_is_clamped_into_bounds() {
        let left = compute_crop_rect(4000, 3000, 2000, 2000, &crop(0.0, 0.5, 1.0));
        assert_eq!(left.x, 0);
        let right = compute_crop_rect(4000, 3000, 2000, 2000, &crop(1.0, 0.5, 1.0));
        assert_eq!(right.x, 1000);
        let outside = compute_crop_rect(4000, 3000, 2000, 2000, &crop(7.0, -3.0, 1.0));
        assert_eq!((outside.x, outside.y), (1000, 0));
    }

    #[test]
    fn nan_centre_means_middle() {
        let r = compute_crop_rect(4000, 3000, 2000, 2000, &crop(f64::NAN, f64::NAN, 1.0));
        assert_eq!((r.x, r.y), (500, 0));
    }

    #[test]
    fn larger_scale_zooms_in() {
        let wide = compute_crop_rect(4000, 3000, 2000, 2000, &crop(0.5, 0.5, 1.0));
        let tight = compute_crop_rect(4000, 3000, 2000, 2000, &crop(0.5, 0.5, 2.0));
        assert!(tight.width < wide.width);
        assert!(tight.height < wide.height);
        assert_eq!(tight.width, 1500);
        assert_eq!((tight.x, tight.y), (1250, 750));
    }

    #[test]
    fn tiny_scale_is_floored_and_window_never_exceeds_source() {
        let r = compute_crop_rect(800, 600, 400, 400, &crop(0.5, 0.5, 0.01));
        assert!(r.width <= 800 && r.height <= 600);
        assert!(r.x + r.width <= 800);
        assert!(r.y + r.height <= 600);
    }
}
