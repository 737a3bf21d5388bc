//! Pdfium-backed document engine.
//!
//! Pdfium has no chapter structure, so an opened PDF presents itself as a
//! single chapter holding every page. Page content is "recorded" as a handle
//! back into the document; replay rasterizes at the transform's scale and
//! rotation, with a one-entry raster cache per page so consecutive frames at
//! a steady zoom do not re-rasterize.

use paperview_core::{Matrix, Rect, Rotation};

#[cfg(feature = "pdf")]
mod backend;

#[cfg(feature = "pdf")]
pub use backend::PdfiumEngineFactory;

/// Raster-cache key resolution: zoom quantized to milli-units so tiny float
/// drift between frames still hits the cache.
pub(crate) fn quantize_scale(scale: f32) -> u32 {
    (scale * 1000.0).round().max(1.0) as u32
}

/// Recover the quarter-turn rotation and uniform scale baked into a draw
/// matrix. Only matrices built from `scale_matrix` reach this point, so the
/// linear part is always a scaled quarter-turn.
pub(crate) fn decompose_draw_matrix(matrix: Matrix) -> (Rotation, f32) {
    let scale = (matrix.a * matrix.a + matrix.b * matrix.b).sqrt();
    let rotation = if matrix.a > f32::EPSILON {
        Rotation::Deg0
    } else if matrix.b > f32::EPSILON {
        Rotation::Deg90
    } else if matrix.a < -f32::EPSILON {
        Rotation::Deg180
    } else {
        Rotation::Deg270
    };
    (rotation, scale)
}

/// Rotate an RGBA8 buffer by quarter turns, clockwise.
pub(crate) fn rotate_rgba(
    width: u32,
    height: u32,
    pixels: &[u8],
    rotation: Rotation,
) -> (u32, u32, Vec<u8>) {
    if rotation == Rotation::Deg0 {
        return (width, height, pixels.to_vec());
    }
    let (w, h) = (width as usize, height as usize);
    let (out_w, out_h) = match rotation {
        Rotation::Deg90 | Rotation::Deg270 => (h, w),
        _ => (w, h),
    };
    let mut out = vec![0u8; out_w * out_h * 4];
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = match rotation {
                Rotation::Deg90 => (h - 1 - y, x),
                Rotation::Deg180 => (w - 1 - x, h - 1 - y),
                Rotation::Deg270 => (y, w - 1 - x),
                Rotation::Deg0 => unreachable!(),
            };
            let src = (y * w + x) * 4;
            let dst = (dy * out_w + dx) * 4;
            out[dst..dst + 4].copy_from_slice(&pixels[src..src + 4]);
        }
    }
    (out_w as u32, out_h as u32, out)
}

/// Map a link rectangle from PDF space (origin bottom-left, y up) to page
/// space (origin top-left, y down).
pub(crate) fn link_rect_to_page(
    page_height: f32,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
) -> Rect {
    Rect::new(left, page_height - top, right, page_height - bottom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_quantization_absorbs_float_drift() {
        assert_eq!(quantize_scale(1.5), quantize_scale(1.5000001));
        assert_ne!(quantize_scale(1.5), quantize_scale(1.502));
        // never quantizes to zero
        assert_eq!(quantize_scale(0.0001), 1);
    }

    #[test]
    fn draw_matrix_decomposition_recovers_zoom_and_turns() {
        let bounds = Rect::new(0.0, 0.0, 600.0, 800.0);
        for rotation in [
            Rotation::Deg0,
            Rotation::Deg90,
            Rotation::Deg180,
            Rotation::Deg270,
        ] {
            let matrix = paperview_core::scale_matrix(1.75, rotation, bounds);
            let (recovered, scale) = decompose_draw_matrix(matrix);
            assert_eq!(recovered, rotation);
            assert!((scale - 1.75).abs() < 1e-4);
        }
    }

    #[test]
    fn quarter_turn_moves_top_left_pixel() {
        // 2x1 image: [A, B]
        let pixels = [1, 1, 1, 255, 2, 2, 2, 255];
        let (w, h, out) = rotate_rgba(2, 1, &pixels, Rotation::Deg90);
        assert_eq!((w, h), (1, 2));
        // clockwise: A ends up at the bottom
        assert_eq!(out[0], 2);
        assert_eq!(out[4], 1);

        let (w, h, out) = rotate_rgba(2, 1, &pixels, Rotation::Deg180);
        assert_eq!((w, h), (2, 1));
        assert_eq!(out[0], 2);
        assert_eq!(out[4], 1);
    }

    #[test]
    fn link_rects_flip_to_top_left_origin() {
        // pdf-space rect near the top of a 792-high page
        let rect = link_rect_to_page(792.0, 100.0, 780.0, 200.0, 760.0);
        assert!((rect.y0 - 12.0).abs() < 1e-4);
        assert!((rect.y1 - 32.0).abs() < 1e-4);
        assert!((rect.x0 - 100.0).abs() < 1e-4);
        assert!(rect.height() > 0.0);
    }
}
