// ============================================================================
// GPU CONTEXT: wgpu Device, Queue and adapter initialization
// ============================================================================

use std::sync::Arc;

use crate::error::PaintError;
use crate::{log_info, log_warn};

/// Headless wgpu device. No window or swapchain: every surface is an
/// offscreen texture read back on demand.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    pub max_texture_dim: u32,
}

impl GpuContext {
    /// Hardware adapter first, then the software rasterizer
    /// (`force_fallback_adapter`).
    pub fn new(preferred_gpu: &str) -> Result<Self, PaintError> {
        if let Some(ctx) = pollster::block_on(Self::new_async(preferred_gpu, false)) {
            return Ok(ctx);
        }
        log_warn!("[GPU] No hardware adapter for '{}', trying fallback adapter", preferred_gpu);
        let ctx = pollster::block_on(Self::new_async(preferred_gpu, true)).ok_or(PaintError::GpuUnavailable)?;
        log_info!("[GPU] Fallback adapter: {}", ctx.adapter_name);
        Ok(ctx)
    }

    async fn new_async(preferred_gpu: &str, force_fallback: bool) -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power = match preferred_gpu.to_lowercase().as_str() {
            "low power" | "integrated" => wgpu::PowerPreference::LowPower,
            _ => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("LayerPaint GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .ok()?;

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
        })
    }

    /// Non-empty and within the device's 2D texture limit.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width > 0 && height > 0 && width <= self.max_texture_dim && height <= self.max_texture_dim
    }

    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}
