// ============================================================================
// COMPOSITOR: blit pipeline with custom blend math, plus texture readback
// ============================================================================
//
// Hardware blending is disabled. For each blit the destination region is
// first copied into a scratch texture; the fragment shader reads that copy
// (background) and the source (foreground), applies the blend formula and
// writes the result over the destination, restricted by a scissor rect.
// ============================================================================

use bytemuck::{Pod, Zeroable};

use super::context::GpuContext;
use super::texture::{SURFACE_FORMAT, extent};
use crate::log_err;
use crate::pixels::{Filter, PixelBuffer};

// ============================================================================
// UNIFORMS
// ============================================================================

/// Mirrors `BlitUniforms` in the WGSL source (64 bytes, no implicit padding).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BlitUniforms {
    /// Destination rect in target pixels: x, y, width, height.
    pub dst_rect: [f32; 4],
    /// Source rect normalized to the source texture: u, v, du, dv.
    pub src_rect: [f32; 4],
    pub target_size: [f32; 2],
    pub opacity: f32,
    pub mode: u32,
    pub tint: [f32; 4],
}

/// Integer scissor rectangle, already clipped to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scissor {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// BLIT PIPELINE
// ============================================================================

pub struct BlitPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler_linear: wgpu::Sampler,
    sampler_nearest: wgpu::Sampler,
}

impl BlitPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::BLIT_SHADER.into()),
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(3),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_blit",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_blit",
                targets: &[Some(wgpu::ColorTargetState {
                    format: SURFACE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blit_uniform_buf"),
            size: std::mem::size_of::<BlitUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Clamp-to-edge is the sampler default; outside [0,1] the shader zeroes.
        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_nearest"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
            sampler_linear,
            sampler_nearest,
        }
    }

    fn sampler(&self, filter: Filter) -> &wgpu::Sampler {
        match filter {
            Filter::Nearest => &self.sampler_nearest,
            Filter::Linear => &self.sampler_linear,
        }
    }

    /// Record and submit one blit.
    ///
    /// `base` must hold a copy of `target` over at least `scissor`; the copy
    /// is encoded here before the render pass.
    pub fn blit(
        &self,
        ctx: &GpuContext,
        uniforms: &BlitUniforms,
        src_view: &wgpu::TextureView,
        target: &wgpu::Texture,
        target_view: &wgpu::TextureView,
        base: &wgpu::Texture,
        base_view: &wgpu::TextureView,
        scissor: Scissor,
        filter: Filter,
    ) {
        let device = &ctx.device;
        ctx.queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler(filter)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(base_view),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("blit_encoder"),
        });

        let origin = wgpu::Origin3d {
            x: scissor.x,
            y: scissor.y,
            z: 0,
        };
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: base,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            extent(scissor.width, scissor.height),
        );

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
            pass.draw(0..6, 0..1);
        }

        ctx.submit_one(encoder);
    }
}

// ============================================================================
// READBACK
// ============================================================================

pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
    let unaligned = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}

/// Map-readable buffer reused across readbacks. Grows, never shrinks.
#[derive(Default)]
pub struct ReadbackBuffer {
    buffer: Option<wgpu::Buffer>,
}

impl ReadbackBuffer {
    fn with_capacity(&mut self, device: &wgpu::Device, size: u64) -> &wgpu::Buffer {
        if self.buffer.as_ref().is_none_or(|b| b.size() < size) {
            self.buffer = None;
        }
        self.buffer.get_or_insert_with(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("layer_readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })
    }
}

/// Drop the row padding the copy alignment added.
pub(crate) fn unpack_rows(padded: &[u8], width: u32, height: u32, bytes_per_row: u32) -> Option<PixelBuffer> {
    let row = width as usize * 4;
    let data: Vec<u8> = padded
        .chunks(bytes_per_row as usize)
        .take(height as usize)
        .flat_map(|line| &line[..row.min(line.len())])
        .copied()
        .collect();
    PixelBuffer::from_raw(width, height, data)
}

/// Copy `area` of `texture` into CPU memory, blocking until the GPU is done.
/// `None` (logged) when the buffer cannot be mapped.
pub fn read_texture(
    ctx: &GpuContext,
    texture: &wgpu::Texture,
    area: Scissor,
    readback: &mut ReadbackBuffer,
) -> Option<PixelBuffer> {
    let bytes_per_row = aligned_bytes_per_row(area.width);
    let size = bytes_per_row as u64 * area.height as u64;
    let buffer = readback.with_capacity(&ctx.device, size);

    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("layer_readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: area.x, y: area.y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(area.height),
            },
        },
        extent(area.width, area.height),
    );
    ctx.submit_one(encoder);

    let slice = buffer.slice(..size);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);
    let failure = match rx.recv() {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    if let Some(e) = failure {
        log_err!("[GPU] readback of {}x{} failed: {}", area.width, area.height, e);
        return None;
    }

    let pixels = unpack_rows(&slice.get_mapped_range(), area.width, area.height, bytes_per_row);
    buffer.unmap();
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<BlitUniforms>(), 64);
    }

    #[test]
    fn rows_align_to_copy_alignment() {
        assert_eq!(aligned_bytes_per_row(1), 256);
        assert_eq!(aligned_bytes_per_row(64), 256);
        assert_eq!(aligned_bytes_per_row(65), 512);
    }

    #[test]
    fn unpacking_drops_row_padding() {
        let mut padded = vec![0u8; 256 * 2];
        padded[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        padded[256..264].copy_from_slice(&[9, 9, 9, 9, 8, 8, 8, 8]);
        let pixels = unpack_rows(&padded, 2, 2, 256).expect("pixels");
        assert_eq!(pixels.get_pixel(1, 0), [5, 6, 7, 8]);
        assert_eq!(pixels.get_pixel(0, 1), [9, 9, 9, 9]);
    }
}
