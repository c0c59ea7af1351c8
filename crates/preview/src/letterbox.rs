//! Aspect-preserving fit of a source frame into a fixed render target.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Placement of the scaled source inside the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fit {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rectangle with the source's aspect ratio that fits the target,
/// centered.
pub fn fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Fit {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Fit {
            x: 0,
            y: 0,
            width: dst_w,
            height: dst_h,
        };
    }
    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let width = ((src_w as f64 * scale).round() as u32).clamp(1, dst_w);
    let height = ((src_h as f64 * scale).round() as u32).clamp(1, dst_h);
    Fit {
        x: (dst_w - width) / 2,
        y: (dst_h - height) / 2,
        width,
        height,
    }
}

/// Draw `frame` into a black `width`×`height` target, letterboxed or
/// pillarboxed as needed.
pub fn letterbox(frame: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let width = width.max(1);
    let height = height.max(1);
    let mut target = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let placement = fit(frame.width(), frame.height(), width, height);

    if (placement.width, placement.height) == frame.dimensions() {
        imageops::replace(&mut target, frame, placement.x as i64, placement.y as i64);
    } else {
        let scaled = imageops::resize(frame, placement.width, placement.height, FilterType::Triangle);
        imageops::replace(&mut target, &scaled, placement.x as i64, placement.y as i64);
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_source_is_letterboxed() {
        // 2.35:1 into 16:9 leaves bars top and bottom.
        let f = fit(2350, 1000, 640, 360);
        assert_eq!(f.width, 640);
        assert_eq!(f.height, 272);
        assert_eq!(f.x, 0);
        assert_eq!(f.y, 44);
    }

    #[test]
    fn test_tall_source_is_pillarboxed() {
        let f = fit(1080, 1920, 640, 360);
        assert_eq!(f.height, 360);
        assert_eq!(f.width, 203);
        assert_eq!(f.x, (640 - 203) / 2);
    }

    #[test]
    fn test_letterbox_keeps_bars_black() {
        let white = RgbaImage::from_pixel(40, 10, Rgba([255, 255, 255, 255]));
        let out = letterbox(&white, 40, 30);
        assert_eq!(out.dimensions(), (40, 30));
        assert_eq!(out.get_pixel(20, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(20, 15).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(20, 29).0, [0, 0, 0, 255]);
    }
}
