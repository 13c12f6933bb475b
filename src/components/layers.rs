use egui::Rect;

use crate::error::PaintError;
use crate::gpu::{BlitSource, RenderBackend, SurfaceId};
use crate::log_info;
use crate::pixels::{BlendMode, Filter, PixelBuffer, is_empty_rect, pixel_rect, trim_insets};

slotmap::new_key_type! {
    /// Stable handle to a layer in the project's arena.
    pub struct LayerId;
}

// ============================================================================
// BACKING STORE
// ============================================================================

/// Where a layer's pixels live. A selected layer is resident on the backend
/// so tools can draw into it; every other layer is parked in CPU memory.
#[derive(Debug)]
pub enum Backing {
    Resident(SurfaceId),
    Parked(PixelBuffer),
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Debug)]
pub struct Layer {
    pub name: String,
    /// Top-left corner in canvas pixels. May be negative.
    pub x: i32,
    pub y: i32,
    /// Extent of the backing store, not of the canvas.
    pub width: u32,
    pub height: u32,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub(crate) backing: Backing,
    /// Canvas-sized composite of every layer below this one.
    pub(crate) cache: Option<SurfaceId>,
    pub(crate) selected: bool,
}

impl Layer {
    /// Empty 0×0 layer at the origin.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_pixels(name, 0, 0, PixelBuffer::default())
    }

    pub fn with_pixels(name: impl Into<String>, x: i32, y: i32, pixels: PixelBuffer) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            width: pixels.width(),
            height: pixels.height(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            backing: Backing::Parked(pixels),
            cache: None,
            selected: false,
        }
    }

    /// Canvas-space bounds of the backing store.
    pub fn rect(&self) -> Rect {
        pixel_rect(self.x, self.y, self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.backing, Backing::Resident(_))
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        match self.backing {
            Backing::Resident(id) => Some(id),
            Backing::Parked(_) => None,
        }
    }

    /// Blit source for drawing this layer. Parked pixels are uploaded by the
    /// backend for the duration of the blit.
    pub fn source(&self) -> BlitSource<'_> {
        match &self.backing {
            Backing::Resident(id) => BlitSource::Surface(*id),
            Backing::Parked(buf) => BlitSource::Pixels(buf),
        }
    }

    /// Copy of the layer's own pixels, `width`×`height`.
    pub fn read_pixels(&self, backend: &mut dyn RenderBackend) -> PixelBuffer {
        match &self.backing {
            Backing::Resident(id) => backend.read_pixels(*id, 0, 0, self.width, self.height),
            Backing::Parked(buf) => buf.clone(),
        }
    }

    /// Region given in canvas coordinates. Outside the layer reads transparent.
    pub fn read_region(&self, backend: &mut dyn RenderBackend, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer {
        let (lx, ly) = (x - self.x, y - self.y);
        match &self.backing {
            Backing::Resident(id) => backend.read_pixels(*id, lx, ly, width, height),
            Backing::Parked(buf) => buf.crop(lx, ly, width, height),
        }
    }

    pub fn drop_cache(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(cache) = self.cache.take() {
            backend.destroy_surface(cache);
        }
    }

    /// Union of the current extent and `target`. An empty layer has no
    /// extent to keep.
    fn covering(&self, target: Rect) -> Rect {
        if self.is_empty() {
            target
        } else {
            self.rect().union(target)
        }
    }

    /// Grow the backing store to cover `target` (canvas space) as well as its
    /// current extent. Content keeps its canvas position. Returns whether the
    /// extent changed. Fails without touching the layer if the grown extent
    /// is larger than the backend can hold.
    pub fn grow_to(&mut self, backend: &mut dyn RenderBackend, target: Rect) -> Result<bool, PaintError> {
        let new_rect = self.covering(target);
        if new_rect == self.rect() || is_empty_rect(new_rect) {
            return Ok(false);
        }
        let (nx, ny) = (new_rect.min.x as i32, new_rect.min.y as i32);
        let (nw, nh) = (new_rect.width() as u32, new_rect.height() as u32);
        let max = backend.max_surface_dimension();
        if nw > max || nh > max {
            return Err(PaintError::SurfaceAllocation { width: nw, height: nh });
        }
        let (ox, oy) = (self.x - nx, self.y - ny);

        match &mut self.backing {
            Backing::Resident(old) => {
                let new = backend.create_surface(nw, nh)?;
                let (w, h) = (self.width as f32, self.height as f32);
                backend.copy_region(
                    *old,
                    Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(w, h)),
                    new,
                    Rect::from_min_size(egui::pos2(ox as f32, oy as f32), egui::vec2(w, h)),
                    Filter::Nearest,
                );
                backend.destroy_surface(*old);
                *old = new;
            }
            Backing::Parked(buf) => {
                let mut grown = PixelBuffer::new(nw, nh);
                grown.write_from(buf, ox, oy);
                *buf = grown;
            }
        }
        self.x = nx;
        self.y = ny;
        self.width = nw;
        self.height = nh;
        Ok(true)
    }

    /// Cover the whole canvas and move the pixels onto the backend.
    ///
    /// A parked layer gets its canvas-covering surface directly, so nothing
    /// of that size is allocated in CPU memory first.
    pub fn expand(&mut self, backend: &mut dyn RenderBackend, canvas_width: u32, canvas_height: u32) -> Result<(), PaintError> {
        let canvas = pixel_rect(0, 0, canvas_width, canvas_height);
        let Backing::Parked(buf) = &self.backing else {
            self.grow_to(backend, canvas)?;
            return Ok(());
        };
        let target = self.covering(canvas);
        let (nx, ny) = (target.min.x as i32, target.min.y as i32);
        let (nw, nh) = (target.width() as u32, target.height() as u32);
        let surface = backend.create_surface(nw, nh)?;
        if !buf.is_empty() {
            backend.write_pixels(surface, self.x - nx, self.y - ny, buf);
        }
        self.backing = Backing::Resident(surface);
        self.x = nx;
        self.y = ny;
        self.width = nw;
        self.height = nh;
        Ok(())
    }

    /// Read the surface back into CPU memory and release it.
    pub fn park(&mut self, backend: &mut dyn RenderBackend) {
        if let Backing::Resident(id) = self.backing {
            let pixels = backend.read_pixels(id, 0, 0, self.width, self.height);
            backend.destroy_surface(id);
            self.backing = Backing::Parked(pixels);
        }
    }

    /// Shrink a parked layer to the bounding box of its visible pixels.
    /// A fully transparent layer becomes 0×0 at its current position.
    pub fn trim(&mut self) {
        let Backing::Parked(buf) = &mut self.backing else { return };
        match trim_insets(buf) {
            None => {
                *buf = PixelBuffer::default();
                self.width = 0;
                self.height = 0;
            }
            Some(insets) => {
                let w = buf.width() - insets.left - insets.right;
                let h = buf.height() - insets.top - insets.bottom;
                if w == buf.width() && h == buf.height() {
                    return;
                }
                *buf = buf.crop(insets.left as i32, insets.top as i32, w, h);
                self.x += insets.left as i32;
                self.y += insets.top as i32;
                self.width = w;
                self.height = h;
            }
        }
    }

    /// Drop the cache, park and trim.
    pub fn deselect(&mut self, backend: &mut dyn RenderBackend) {
        self.drop_cache(backend);
        self.park(backend);
        self.trim();
        self.selected = false;
        log_info!("Layer '{}' parked at {},{} ({}x{})", self.name, self.x, self.y, self.width, self.height);
    }

    /// Write `pixels` with their top-left at canvas position (`x`, `y`),
    /// growing the backing store first if the region lies outside it.
    pub fn write_region(
        &mut self,
        backend: &mut dyn RenderBackend,
        x: i32,
        y: i32,
        pixels: &PixelBuffer,
    ) -> Result<(), PaintError> {
        if pixels.is_empty() {
            return Ok(());
        }
        self.grow_to(backend, pixel_rect(x, y, pixels.width(), pixels.height()))?;
        let (lx, ly) = (x - self.x, y - self.y);
        match &mut self.backing {
            Backing::Resident(id) => backend.write_pixels(*id, lx, ly, pixels),
            Backing::Parked(buf) => buf.write_from(pixels, lx, ly),
        }
        Ok(())
    }

    /// Free the layer's surfaces for good. Its pixels go with it.
    pub fn discard(mut self, backend: &mut dyn RenderBackend) {
        self.drop_cache(backend);
        if let Backing::Resident(id) = self.backing {
            backend.destroy_surface(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareRenderer;

    const INK: [u8; 4] = [10, 200, 30, 255];

    /// 20×20 buffer with a 10×10 opaque block inset by 5 on every side.
    fn bordered() -> PixelBuffer {
        let mut buf = PixelBuffer::new(20, 20);
        buf.write_from(&PixelBuffer::filled(10, 10, INK), 5, 5);
        buf
    }

    #[test]
    fn trim_removes_transparent_border() {
        let mut layer = Layer::with_pixels("l", 3, -2, bordered());
        layer.trim();
        assert_eq!((layer.x, layer.y), (8, 3));
        assert_eq!((layer.width, layer.height), (10, 10));
        let mut backend = SoftwareRenderer::new();
        let pixels = layer.read_pixels(&mut backend);
        assert_eq!(pixels, PixelBuffer::filled(10, 10, INK));
    }

    #[test]
    fn trim_keeps_content_the_centre_sample_misses() {
        let mut buf = PixelBuffer::new(9, 9);
        // Single pixel in a corner: no line's centre sample ever hits it.
        buf.put_pixel(1, 7, INK);
        let mut layer = Layer::with_pixels("corner", 0, 0, buf);
        layer.trim();
        assert_eq!((layer.x, layer.y, layer.width, layer.height), (1, 7, 1, 1));
    }

    #[test]
    fn transparent_layer_trims_to_nothing() {
        let mut layer = Layer::with_pixels("empty", 4, 4, PixelBuffer::new(6, 6));
        layer.trim();
        assert!(layer.is_empty());
        assert_eq!((layer.width, layer.height), (0, 0));
    }

    #[test]
    fn expand_covers_canvas_and_keeps_canvas_position() {
        let mut backend = SoftwareRenderer::new();
        // 10×10 block hanging off the top-left of a 30×20 canvas.
        let mut layer = Layer::with_pixels("off", -4, -3, PixelBuffer::filled(10, 10, INK));
        layer.expand(&mut backend, 30, 20).expect("expand");

        assert!(layer.is_resident());
        assert_eq!((layer.x, layer.y), (-4, -3));
        assert_eq!((layer.width, layer.height), (34, 23));
        let pixels = layer.read_pixels(&mut backend);
        // Canvas (0,0) is layer (4,3): inside the block.
        assert_eq!(pixels.get_pixel(4, 3), INK);
        assert_eq!(pixels.get_pixel(9, 9), INK);
        assert_eq!(pixels.get_pixel(10, 10), [0; 4]);
        assert_eq!(pixels.get_pixel(33, 22), [0; 4]);
    }

    #[test]
    fn empty_layer_expands_to_canvas() {
        let mut backend = SoftwareRenderer::new();
        let mut layer = Layer::new("blank");
        layer.expand(&mut backend, 16, 8).expect("expand");
        assert_eq!(layer.rect(), pixel_rect(0, 0, 16, 8));
        assert_eq!(backend.surface_count(), 1);
    }

    #[test]
    fn deselect_parks_and_trims() {
        let mut backend = SoftwareRenderer::new();
        let mut layer = Layer::with_pixels("l", 5, 5, PixelBuffer::filled(4, 4, INK));
        layer.expand(&mut backend, 20, 20).expect("expand");
        layer.selected = true;
        layer.deselect(&mut backend);
        assert!(!layer.is_resident());
        assert_eq!(backend.surface_count(), 0);
        assert_eq!(layer.rect(), pixel_rect(5, 5, 4, 4));
    }

    #[test]
    fn oversized_expand_fails_before_allocating() {
        let mut backend = SoftwareRenderer::with_max_dimension(64);
        let mut layer = Layer::with_pixels("far", -1_000_000, 0, PixelBuffer::filled(4, 4, INK));
        let err = layer.expand(&mut backend, 32, 32);
        assert!(matches!(err, Err(PaintError::SurfaceAllocation { width: 1_000_032, .. })));
        assert!(!layer.is_resident());
        assert_eq!(layer.rect(), pixel_rect(-1_000_000, 0, 4, 4));
        assert_eq!(backend.surface_count(), 0);
    }

    #[test]
    fn oversized_growth_of_a_parked_layer_is_refused() {
        let mut backend = SoftwareRenderer::with_max_dimension(64);
        let mut layer = Layer::with_pixels("far", -1_000_000, 0, PixelBuffer::filled(4, 4, INK));
        let err = layer.write_region(&mut backend, 0, 0, &PixelBuffer::filled(2, 2, INK));
        assert!(matches!(err, Err(PaintError::SurfaceAllocation { .. })));
        assert_eq!(layer.read_pixels(&mut backend), PixelBuffer::filled(4, 4, INK));
    }

    #[test]
    fn discard_frees_surface_and_cache() {
        let mut backend = SoftwareRenderer::new();
        let mut layer = Layer::with_pixels("l", 0, 0, PixelBuffer::filled(4, 4, INK));
        layer.expand(&mut backend, 8, 8).expect("expand");
        layer.cache = Some(backend.create_surface(8, 8).expect("cache"));
        assert_eq!(backend.surface_count(), 2);
        layer.discard(&mut backend);
        assert_eq!(backend.surface_count(), 0);
    }

    #[test]
    fn write_region_grows_parked_layer() {
        let mut backend = SoftwareRenderer::new();
        let mut layer = Layer::with_pixels("l", 0, 0, PixelBuffer::filled(2, 2, INK));
        layer
            .write_region(&mut backend, 4, 1, &PixelBuffer::filled(1, 1, [1, 2, 3, 255]))
            .expect("write");
        assert!(!layer.is_resident());
        assert_eq!(layer.rect(), pixel_rect(0, 0, 5, 2));
        let pixels = layer.read_pixels(&mut backend);
        assert_eq!(pixels.get_pixel(4, 1), [1, 2, 3, 255]);
        assert_eq!(pixels.get_pixel(1, 1), INK);
        assert_eq!(pixels.get_pixel(3, 0), [0; 4]);
    }
}
