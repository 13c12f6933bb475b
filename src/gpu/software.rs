// ============================================================================
// SOFTWARE RENDERER: RenderBackend on CPU pixel buffers
// ============================================================================
//
// Mirrors the blit shader exactly (same blend formula, same clipping, same
// 8-bit quantisation after every blit), so headless runs and tests produce
// the pixels the GPU path would. Rows of a blit are processed in parallel.

use egui::Rect;
use rayon::prelude::*;
use slotmap::SlotMap;

use super::{BlitParams, BlitSource, RenderBackend, SurfaceId};
use crate::error::PaintError;
use crate::pixels::{PixelBuffer, composite_pixel, from_unit, is_empty_rect, snap_out, to_unit};

/// Largest edge the software renderer will allocate.
const MAX_SURFACE_DIM: u32 = 16384;

pub struct SoftwareRenderer {
    surfaces: SlotMap<SurfaceId, PixelBuffer>,
    max_dim: u32,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            surfaces: SlotMap::with_key(),
            max_dim: MAX_SURFACE_DIM,
        }
    }

    /// Renderer with a custom size limit, used to exercise allocation failures.
    pub fn with_max_dimension(max_dim: u32) -> Self {
        Self {
            surfaces: SlotMap::with_key(),
            max_dim,
        }
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn blit_buffer(src: &PixelBuffer, src_rect: Rect, dst: &mut PixelBuffer, dst_rect: Rect, params: BlitParams) {
    let (w, h) = (dst.width() as i32, dst.height() as i32);
    let (x0, y0, x1, y1) = snap_out(dst_rect);
    let (x0, y0, x1, y1) = (x0.max(0), y0.max(0), x1.min(w), y1.min(h));
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let scale_x = src_rect.width() / dst_rect.width();
    let scale_y = src_rect.height() / dst_rect.height();
    let row_bytes = w as usize * 4;

    dst.as_raw_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(py, row)| {
            let cy = py as f32 + 0.5;
            if cy < dst_rect.min.y || cy >= dst_rect.max.y {
                return;
            }
            let v = src_rect.min.y + (cy - dst_rect.min.y) * scale_y;
            for px in x0..x1 {
                let cx = px as f32 + 0.5;
                if cx < dst_rect.min.x || cx >= dst_rect.max.x {
                    continue;
                }
                let u = src_rect.min.x + (cx - dst_rect.min.x) * scale_x;
                let sample = src.sample(u, v, params.filter);
                let i = px as usize * 4;
                let base = [
                    to_unit(row[i]),
                    to_unit(row[i + 1]),
                    to_unit(row[i + 2]),
                    to_unit(row[i + 3]),
                ];
                let out = composite_pixel(base, sample, params.op, params.opacity, params.tint);
                for c in 0..4 {
                    row[i + c] = from_unit(out[c]);
                }
            }
        });
}

impl RenderBackend for SoftwareRenderer {
    fn name(&self) -> &str {
        "software"
    }

    fn max_surface_dimension(&self) -> u32 {
        self.max_dim
    }

    fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId, PaintError> {
        if width == 0 || height == 0 || width > self.max_dim || height > self.max_dim {
            return Err(PaintError::SurfaceAllocation { width, height });
        }
        Ok(self.surfaces.insert(PixelBuffer::new(width, height)))
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(surface);
    }

    fn surface_size(&self, surface: SurfaceId) -> (u32, u32) {
        self.surfaces
            .get(surface)
            .map(|b| (b.width(), b.height()))
            .unwrap_or((0, 0))
    }

    fn blit(
        &mut self,
        src: BlitSource<'_>,
        src_rect: Rect,
        dst: SurfaceId,
        dst_rect: Rect,
        params: BlitParams,
    ) {
        if is_empty_rect(dst_rect) {
            return;
        }
        match src {
            BlitSource::Pixels(buf) => {
                if let Some(target) = self.surfaces.get_mut(dst) {
                    blit_buffer(buf, src_rect, target, dst_rect, params);
                }
            }
            BlitSource::Surface(id) if id == dst => {
                let Some(copy) = self.surfaces.get(id).cloned() else { return };
                if let Some(target) = self.surfaces.get_mut(dst) {
                    blit_buffer(&copy, src_rect, target, dst_rect, params);
                }
            }
            BlitSource::Surface(id) => {
                if let Some([source, target]) = self.surfaces.get_disjoint_mut([id, dst]) {
                    blit_buffer(source, src_rect, target, dst_rect, params);
                }
            }
        }
    }

    fn clear(&mut self, dst: SurfaceId, rect: Rect) {
        let Some(buf) = self.surfaces.get_mut(dst) else { return };
        let (x0, y0, x1, y1) = snap_out(rect);
        let w = (x1 - x0).max(0) as u32;
        let h = (y1 - y0).max(0) as u32;
        if w > 0 && h > 0 {
            buf.write_from(&PixelBuffer::new(w, h), x0, y0);
        }
    }

    fn read_pixels(&mut self, surface: SurfaceId, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer {
        match self.surfaces.get(surface) {
            Some(buf) => buf.crop(x, y, width, height),
            None => PixelBuffer::new(width, height),
        }
    }

    fn write_pixels(&mut self, surface: SurfaceId, x: i32, y: i32, pixels: &PixelBuffer) {
        if let Some(buf) = self.surfaces.get_mut(surface) {
            buf.write_from(pixels, x, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::{BlendMode, CompositeOp, Filter, pixel_rect};

    fn solid(r: &mut SoftwareRenderer, w: u32, h: u32, rgba: [u8; 4]) -> SurfaceId {
        let id = r.create_surface(w, h).expect("surface");
        r.write_pixels(id, 0, 0, &PixelBuffer::filled(w, h, rgba));
        id
    }

    #[test]
    fn blit_red_over_blue() {
        let mut r = SoftwareRenderer::new();
        let blue = solid(&mut r, 4, 4, [0, 0, 255, 255]);
        let red = solid(&mut r, 4, 4, [255, 0, 0, 255]);
        let full = pixel_rect(0, 0, 4, 4);
        r.blit(BlitSource::Surface(red), full, blue, full, BlitParams::blend(CompositeOp::Blend(BlendMode::Normal), 1.0));
        assert_eq!(r.read_pixels(blue, 0, 0, 1, 1).get_pixel(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn blit_half_opacity_averages_to_128() {
        let mut r = SoftwareRenderer::new();
        let blue = solid(&mut r, 2, 2, [0, 0, 255, 255]);
        let red = PixelBuffer::filled(2, 2, [255, 0, 0, 255]);
        let full = pixel_rect(0, 0, 2, 2);
        r.blit(BlitSource::Pixels(&red), full, blue, full, BlitParams::blend(CompositeOp::Blend(BlendMode::Normal), 0.5));
        let px = r.read_pixels(blue, 1, 1, 1, 1).get_pixel(0, 0);
        assert!((127..=128).contains(&px[0]));
        assert!((127..=128).contains(&px[2]));
        assert_eq!(px[1], 0);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn blit_only_touches_dst_rect_and_clips_source() {
        let mut r = SoftwareRenderer::new();
        let dst = r.create_surface(8, 8).expect("surface");
        let src = PixelBuffer::filled(2, 2, [0, 255, 0, 255]);
        // Source rect hangs two pixels past the right edge of the 2x2 source.
        r.blit(
            BlitSource::Pixels(&src),
            pixel_rect(0, 0, 4, 2),
            dst,
            pixel_rect(3, 3, 4, 2),
            BlitParams::blend(CompositeOp::Blend(BlendMode::Normal), 1.0),
        );
        let out = r.read_pixels(dst, 0, 0, 8, 8);
        assert_eq!(out.get_pixel(3, 3), [0, 255, 0, 255]);
        assert_eq!(out.get_pixel(4, 4), [0, 255, 0, 255]);
        assert_eq!(out.get_pixel(5, 3), [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(2, 3), [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(3, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn copy_region_translates_and_clears_uncovered_pixels() {
        let mut r = SoftwareRenderer::new();
        let src = solid(&mut r, 3, 3, [10, 20, 30, 255]);
        let dst = solid(&mut r, 6, 6, [99, 99, 99, 255]);
        r.copy_region(src, pixel_rect(-1, -1, 4, 4), dst, pixel_rect(2, 2, 4, 4), Filter::Nearest);
        let out = r.read_pixels(dst, 0, 0, 6, 6);
        assert_eq!(out.get_pixel(2, 2), [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(3, 3), [10, 20, 30, 255]);
        assert_eq!(out.get_pixel(5, 5), [10, 20, 30, 255]);
        assert_eq!(out.get_pixel(1, 1), [99, 99, 99, 255]);
    }

    #[test]
    fn read_outside_surface_is_transparent() {
        let mut r = SoftwareRenderer::new();
        let id = solid(&mut r, 2, 2, [1, 2, 3, 4]);
        let out = r.read_pixels(id, -1, -1, 3, 3);
        assert_eq!(out.get_pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(1, 1), [1, 2, 3, 4]);
    }

    #[test]
    fn clear_and_erase() {
        let mut r = SoftwareRenderer::new();
        let id = solid(&mut r, 4, 4, [50, 60, 70, 255]);
        r.clear(id, pixel_rect(0, 0, 2, 4));
        let stamp = PixelBuffer::filled(1, 1, [255, 255, 255, 255]);
        r.blit(BlitSource::Pixels(&stamp), pixel_rect(0, 0, 1, 1), id, pixel_rect(3, 3, 1, 1), BlitParams::blend(CompositeOp::Erase, 1.0));
        let out = r.read_pixels(id, 0, 0, 4, 4);
        assert_eq!(out.get_pixel(1, 0), [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(2, 0), [50, 60, 70, 255]);
        assert_eq!(out.get_pixel(3, 3), [50, 60, 70, 0]);
    }

    #[test]
    fn allocation_failure_is_an_error() {
        let mut r = SoftwareRenderer::with_max_dimension(64);
        assert!(matches!(
            r.create_surface(65, 10),
            Err(PaintError::SurfaceAllocation { width: 65, height: 10 })
        ));
        assert!(r.create_surface(0, 10).is_err());
        let id = r.create_surface(64, 64).expect("within limit");
        r.destroy_surface(id);
        assert_eq!(r.surface_count(), 0);
    }
}
