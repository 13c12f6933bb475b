// ============================================================================
// SURFACE TEXTURE: one RGBA8 texture per backend surface
// ============================================================================

use crate::pixels::PixelBuffer;

/// Surfaces and scratch copies are sampled by the blit shader, rendered into,
/// and copied in both directions.
pub const SURFACE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Layer store, composite cache, canvas or display.
pub struct SurfaceTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl SurfaceTexture {
    /// Transparent surface (wgpu zero-initialises new textures).
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = create_texture(device, width, height, "layer_surface");
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, width, height }
    }

    /// Replace the pixels under `pixels` placed at (`x`, `y`). The caller
    /// clips to the surface.
    pub fn upload(&self, queue: &wgpu::Queue, x: u32, y: u32, pixels: &PixelBuffer) {
        debug_assert!(x + pixels.width() <= self.width && y + pixels.height() <= self.height);
        upload_pixels(queue, &self.texture, x, y, pixels);
    }
}

pub fn create_texture(device: &wgpu::Device, width: u32, height: u32, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(width, height),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage: SURFACE_USAGE,
        view_formats: &[],
    })
}

pub fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d { width, height, depth_or_array_layers: 1 }
}

/// `queue.write_texture` of a whole pixel buffer at (`x`, `y`).
pub fn upload_pixels(queue: &wgpu::Queue, texture: &wgpu::Texture, x: u32, y: u32, pixels: &PixelBuffer) {
    if pixels.is_empty() {
        return;
    }
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        pixels.as_raw(),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * pixels.width()),
            rows_per_image: Some(pixels.height()),
        },
        extent(pixels.width(), pixels.height()),
    );
}
