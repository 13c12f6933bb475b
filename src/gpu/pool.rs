// ============================================================================
// TEXTURE POOL: recycle scratch textures between blits
// ============================================================================

use std::collections::HashMap;

/// Key for pooled textures: (width, height).
type PoolKey = (u32, u32);

/// Scratch textures keyed by dimensions.
///
/// Every blit needs a copy of the destination (the shader cannot sample its
/// own render target) and, for CPU sources, an upload texture. Brush stamps
/// blit hundreds of times per stroke with the same sizes, so these are kept
/// around instead of created per call.
pub struct TexturePool {
    pool: HashMap<PoolKey, Vec<wgpu::Texture>>,
    /// Maximum number of textures to keep per key.
    max_per_key: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            max_per_key: 4,
        }
    }

    /// Recycled texture of the given size, or `None` if the caller must create one.
    pub fn acquire(&mut self, width: u32, height: u32) -> Option<wgpu::Texture> {
        self.pool.get_mut(&(width, height)).and_then(|v| v.pop())
    }

    /// Return a texture for reuse. Dropped when the bucket is full.
    pub fn release(&mut self, texture: wgpu::Texture, width: u32, height: u32) {
        let entry = self.pool.entry((width, height)).or_default();
        if entry.len() < self.max_per_key {
            entry.push(texture);
        }
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(|v| v.len()).sum()
    }

    /// Approximate GPU memory held by pooled textures (bytes).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.pool
            .iter()
            .map(|((w, h), textures)| (*w as usize) * (*h as usize) * 4 * textures.len())
            .sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
