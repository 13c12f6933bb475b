// ============================================================================
// GPU RENDERER: RenderBackend implemented on wgpu
// ============================================================================

use egui::Rect;
use slotmap::SlotMap;

use super::compositor::{BlitPipeline, BlitUniforms, ReadbackBuffer, Scissor, read_texture};
use super::context::GpuContext;
use super::pool::TexturePool;
use super::texture::{SurfaceTexture, create_texture, extent, upload_pixels};
use super::{BlitParams, BlitSource, RenderBackend, SurfaceId};
use crate::error::PaintError;
use crate::log_err;
use crate::pixels::{PixelBuffer, is_empty_rect, snap_out};

pub struct GpuRenderer {
    ctx: GpuContext,
    blit: BlitPipeline,
    surfaces: SlotMap<SurfaceId, SurfaceTexture>,
    pool: TexturePool,
    readback: ReadbackBuffer,
    name: String,
}

/// Clip an integer box to a `width`×`height` texture.
fn clip(x0: i32, y0: i32, x1: i32, y1: i32, width: u32, height: u32) -> Option<Scissor> {
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(width as i32);
    let y1 = y1.min(height as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Scissor {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

impl GpuRenderer {
    pub fn new(preferred_gpu: &str) -> Result<Self, PaintError> {
        let ctx = GpuContext::new(preferred_gpu)?;
        let blit = BlitPipeline::new(&ctx.device);
        let name = format!("wgpu ({})", ctx.adapter_name);
        Ok(Self {
            ctx,
            blit,
            surfaces: SlotMap::with_key(),
            pool: TexturePool::new(),
            readback: ReadbackBuffer::default(),
            name,
        })
    }

    fn scratch(&mut self, width: u32, height: u32) -> wgpu::Texture {
        self.pool
            .acquire(width, height)
            .unwrap_or_else(|| create_texture(&self.ctx.device, width, height, "blit_scratch"))
    }
}

impl RenderBackend for GpuRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn diagnostics(&self) -> String {
        format!(
            "{}: {} surfaces, {} pooled scratch textures ({} KiB)",
            self.name,
            self.surfaces.len(),
            self.pool.pooled_count(),
            self.pool.pooled_memory_bytes() / 1024
        )
    }

    fn max_surface_dimension(&self) -> u32 {
        self.ctx.max_texture_dim
    }

    fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId, PaintError> {
        if !self.ctx.fits(width, height) {
            log_err!("[GPU] cannot allocate {}x{} surface (max {})", width, height, self.ctx.max_texture_dim);
            return Err(PaintError::SurfaceAllocation { width, height });
        }
        let surface = SurfaceTexture::new(&self.ctx.device, width, height);
        Ok(self.surfaces.insert(surface))
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(surface);
    }

    fn surface_size(&self, surface: SurfaceId) -> (u32, u32) {
        self.surfaces
            .get(surface)
            .map(|s| (s.width, s.height))
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
        let Some((target_w, target_h)) = self.surfaces.get(dst).map(|s| (s.width, s.height)) else {
            return;
        };
        let (x0, y0, x1, y1) = snap_out(dst_rect);
        let Some(scissor) = clip(x0, y0, x1, y1, target_w, target_h) else {
            return;
        };

        // Source texture: a live surface, a copy of the target when the two
        // are the same, or an upload of CPU pixels.
        let mut uploaded: Option<(wgpu::Texture, u32, u32)> = None;
        match src {
            BlitSource::Surface(id) if id != dst => {}
            BlitSource::Surface(id) => {
                let tex = self.scratch(target_w, target_h);
                let Some(s) = self.surfaces.get(id) else { return };
                let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("blit_self_copy"),
                });
                encoder.copy_texture_to_texture(
                    s.texture.as_image_copy(),
                    tex.as_image_copy(),
                    extent(target_w, target_h),
                );
                self.ctx.submit_one(encoder);
                uploaded = Some((tex, target_w, target_h));
            }
            BlitSource::Pixels(buf) => {
                if buf.is_empty() {
                    return;
                }
                let tex = self.scratch(buf.width(), buf.height());
                upload_pixels(&self.ctx.queue, &tex, 0, 0, buf);
                uploaded = Some((tex, buf.width(), buf.height()));
            }
        }

        let (src_w, src_h) = match (&uploaded, src) {
            (Some((_, w, h)), _) => (*w, *h),
            (None, BlitSource::Surface(id)) => self.surface_size(id),
            (None, BlitSource::Pixels(_)) => return,
        };
        if src_w == 0 || src_h == 0 {
            return;
        }

        let uniforms = BlitUniforms {
            dst_rect: [dst_rect.min.x, dst_rect.min.y, dst_rect.width(), dst_rect.height()],
            src_rect: [
                src_rect.min.x / src_w as f32,
                src_rect.min.y / src_h as f32,
                src_rect.width() / src_w as f32,
                src_rect.height() / src_h as f32,
            ],
            target_size: [target_w as f32, target_h as f32],
            opacity: params.opacity,
            mode: params.op.shader_mode(),
            tint: [params.tint[0], params.tint[1], params.tint[2], 1.0],
        };

        let base = self.scratch(target_w, target_h);
        let base_view = base.create_view(&wgpu::TextureViewDescriptor::default());
        let uploaded_view = uploaded
            .as_ref()
            .map(|(tex, _, _)| tex.create_view(&wgpu::TextureViewDescriptor::default()));

        {
            let src_view = match (&uploaded_view, src) {
                (Some(view), _) => view,
                (None, BlitSource::Surface(id)) => match self.surfaces.get(id) {
                    Some(s) => &s.view,
                    None => return,
                },
                (None, BlitSource::Pixels(_)) => return,
            };
            let Some(target) = self.surfaces.get(dst) else { return };
            self.blit.blit(
                &self.ctx,
                &uniforms,
                src_view,
                &target.texture,
                &target.view,
                &base,
                &base_view,
                scissor,
                params.filter,
            );
        }

        self.pool.release(base, target_w, target_h);
        if let Some((tex, w, h)) = uploaded {
            self.pool.release(tex, w, h);
        }
    }

    fn clear(&mut self, dst: SurfaceId, rect: Rect) {
        let Some(s) = self.surfaces.get(dst) else { return };
        let (x0, y0, x1, y1) = snap_out(rect);
        let Some(area) = clip(x0, y0, x1, y1, s.width, s.height) else { return };
        s.upload(&self.ctx.queue, area.x, area.y, &PixelBuffer::new(area.width, area.height));
    }

    fn read_pixels(&mut self, surface: SurfaceId, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer {
        let mut out = PixelBuffer::new(width, height);
        let Some(s) = self.surfaces.get(surface) else { return out };
        let Some(area) = clip(x, y, x + width as i32, y + height as i32, s.width, s.height) else {
            return out;
        };
        if let Some(region) = read_texture(&self.ctx, &s.texture, area, &mut self.readback) {
            out.write_from(&region, area.x as i32 - x, area.y as i32 - y);
        }
        out
    }

    fn write_pixels(&mut self, surface: SurfaceId, x: i32, y: i32, pixels: &PixelBuffer) {
        let Some(s) = self.surfaces.get(surface) else { return };
        let Some(area) = clip(
            x,
            y,
            x + pixels.width() as i32,
            y + pixels.height() as i32,
            s.width,
            s.height,
        ) else {
            return;
        };
        let region = pixels.crop(area.x as i32 - x, area.y as i32 - y, area.width, area.height);
        s.upload(&self.ctx.queue, area.x, area.y, &region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_rejects_boxes_outside_the_texture() {
        assert_eq!(clip(-5, -5, 0, 10, 8, 8), None);
        assert_eq!(clip(8, 0, 12, 4, 8, 8), None);
        assert_eq!(
            clip(-2, 3, 20, 5, 8, 8),
            Some(Scissor { x: 0, y: 3, width: 8, height: 2 })
        );
    }
}
