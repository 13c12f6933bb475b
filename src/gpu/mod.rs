// ============================================================================
// GPU MODULE: the graphics primitive surface used by the compositor
// ============================================================================
//
// Architecture:
//   context.rs    wgpu Device, Queue, adapter init
//   shaders.rs    WGSL source for the blit shader
//   texture.rs    SurfaceTexture, texture creation and pixel upload
//   compositor.rs blit pipeline (blend modes, erase, replace) + readback
//   pool.rs       scratch texture recycling pool
//   renderer.rs   GpuRenderer: RenderBackend on top of wgpu
//   software.rs   SoftwareRenderer: the same contract on the CPU (rayon)
// ============================================================================

pub mod compositor;
pub mod context;
pub mod pool;
pub mod renderer;
pub mod shaders;
pub mod software;
pub mod texture;

use egui::Rect;

use crate::error::PaintError;
use crate::pixels::{CompositeOp, Filter, PixelBuffer};
use crate::settings::PaintSettings;
use crate::{log_info, log_warn};

pub use renderer::GpuRenderer;
pub use software::SoftwareRenderer;

slotmap::new_key_type! {
    /// Handle to a backend-owned surface (texture).
    pub struct SurfaceId;
}

/// Where a blit reads its pixels from.
#[derive(Clone, Copy)]
pub enum BlitSource<'a> {
    Surface(SurfaceId),
    /// CPU pixels, uploaded for the duration of the blit (parked layers,
    /// brush sprites).
    Pixels(&'a PixelBuffer),
}

impl BlitSource<'_> {
    pub fn size(&self, backend: &dyn RenderBackend) -> (u32, u32) {
        match self {
            BlitSource::Surface(id) => backend.surface_size(*id),
            BlitSource::Pixels(buf) => (buf.width(), buf.height()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlitParams {
    pub op: CompositeOp,
    pub opacity: f32,
    /// Multiplies the source colour (brush colour / 255).
    pub tint: [f32; 3],
    pub filter: Filter,
}

impl BlitParams {
    pub fn blend(op: CompositeOp, opacity: f32) -> Self {
        Self {
            op,
            opacity,
            tint: [1.0; 3],
            filter: Filter::Nearest,
        }
    }

    pub fn replace(filter: Filter) -> Self {
        Self {
            op: CompositeOp::Replace,
            opacity: 1.0,
            tint: [1.0; 3],
            filter,
        }
    }
}

/// Rendering context threaded through every drawing operation.
///
/// Rects are in the pixel space of the surface they refer to. A blit maps
/// `src_rect` onto `dst_rect`; destination pixels whose centres fall inside
/// `dst_rect` are written. Source samples outside the source surface are
/// transparent.
pub trait RenderBackend {
    fn name(&self) -> &str;

    /// One-line resource summary for verbose output.
    fn diagnostics(&self) -> String {
        self.name().to_string()
    }

    /// Largest width or height `create_surface` accepts.
    fn max_surface_dimension(&self) -> u32;

    fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId, PaintError>;

    fn destroy_surface(&mut self, surface: SurfaceId);

    fn surface_size(&self, surface: SurfaceId) -> (u32, u32);

    fn blit(
        &mut self,
        src: BlitSource<'_>,
        src_rect: Rect,
        dst: SurfaceId,
        dst_rect: Rect,
        params: BlitParams,
    );

    /// Set every pixel of `rect` to transparent.
    fn clear(&mut self, dst: SurfaceId, rect: Rect);

    /// Read a `width`×`height` region starting at (`x`, `y`). Pixels outside
    /// the surface read as transparent.
    fn read_pixels(&mut self, surface: SurfaceId, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer;

    /// Replace the pixels under `pixels` placed at (`x`, `y`), clipped.
    fn write_pixels(&mut self, surface: SurfaceId, x: i32, y: i32, pixels: &PixelBuffer);

    /// Copy without blending. Destination pixels whose source lies outside
    /// `src` become transparent.
    fn copy_region(
        &mut self,
        src: SurfaceId,
        src_rect: Rect,
        dst: SurfaceId,
        dst_rect: Rect,
        filter: Filter,
    ) {
        self.blit(BlitSource::Surface(src), src_rect, dst, dst_rect, BlitParams::replace(filter));
    }
}

/// Pick a renderer from the settings: wgpu when enabled and available,
/// otherwise the software renderer.
pub fn create_backend(settings: &PaintSettings) -> Box<dyn RenderBackend> {
    if settings.gpu_acceleration {
        match GpuRenderer::new(&settings.preferred_gpu) {
            Ok(gpu) => {
                log_info!("Using GPU renderer ({})", gpu.name());
                return Box::new(gpu);
            }
            Err(e) => {
                log_warn!("GPU renderer unavailable ({}), falling back to software", e);
            }
        }
    }
    log_info!("Using software renderer");
    Box::new(SoftwareRenderer::new())
}
