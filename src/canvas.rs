// ============================================================================
// CANVAS STATE: layer stack, composite caches, redraw scheduling
// ============================================================================
//
// The layer stack is ordered top-first: index 0 is drawn last. Painting a
// dirty region starts at some layer L: the pixels of everything below L come
// from L's composite cache (or are recomposited from the bottom), then L and
// every layer above it are blended in, and the result is presented to the
// display surface.
//
// Requests are coalesced: the dirty rectangles are unioned and only one
// start layer is remembered until `on_frame` runs. Any change below a cached
// layer drops that cache, so starting from a higher layer than the one that
// changed still produces correct pixels.

use std::collections::HashSet;

use egui::{Rect, vec2};
use slotmap::SlotMap;

use crate::components::history::LayerValue;
use crate::components::layers::{Layer, LayerId};
use crate::error::PaintError;
use crate::gpu::{BlitParams, BlitSource, RenderBackend, SurfaceId};
use crate::pixels::{CompositeOp, Filter, PixelBuffer, is_empty_rect, pixel_rect, snap_out};
use crate::{log_err, log_info, log_warn};

pub struct CanvasState {
    pub width: u32,
    pub height: u32,
    layers: SlotMap<LayerId, Layer>,
    /// Paint order, top-first.
    stack: Vec<LayerId>,
    selected: Option<LayerId>,
    backend: Box<dyn RenderBackend>,
    /// Composite target.
    canvas: SurfaceId,
    /// What the user sees; updated from `canvas` on present.
    display: SurfaceId,
    /// Start layer of the next paint. Together with `dirty_rect` this is the
    /// whole scheduler state: a frame is due while `dirty_rect` is set.
    pending: Option<LayerId>,
    dirty_rect: Option<Rect>,
    frames_painted: u64,
}

impl CanvasState {
    pub fn new(width: u32, height: u32, mut backend: Box<dyn RenderBackend>) -> Result<Self, PaintError> {
        if width == 0 || height == 0 {
            return Err(PaintError::InvalidCanvasSize { width, height });
        }
        let canvas = backend.create_surface(width, height)?;
        let display = backend.create_surface(width, height)?;
        log_info!("Canvas {}x{} on {}", width, height, backend.name());
        Ok(Self {
            width,
            height,
            layers: SlotMap::with_key(),
            stack: Vec::new(),
            selected: None,
            backend,
            canvas,
            display,
            pending: None,
            dirty_rect: None,
            frames_painted: 0,
        })
    }

    pub fn canvas_rect(&self) -> Rect {
        pixel_rect(0, 0, self.width, self.height)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn diagnostics(&self) -> String {
        self.backend.diagnostics()
    }

    // ========================================================================
    // LAYER ACCESS
    // ========================================================================

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn stack(&self) -> &[LayerId] {
        &self.stack
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.stack.iter().position(|&l| l == id)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.stack.contains(&id)
    }

    pub fn selected(&self) -> Option<LayerId> {
        self.selected
    }

    pub fn bottom(&self) -> Option<LayerId> {
        self.stack.last().copied()
    }

    /// Add a layer to the arena. It is not drawn until spliced into the stack.
    pub fn insert_layer(&mut self, layer: Layer) -> LayerId {
        self.layers.insert(layer)
    }

    /// Layers held in the arena, including ones outside the stack that
    /// history can still bring back.
    pub fn arena_len(&self) -> usize {
        self.layers.len()
    }

    /// Free every layer that is neither in the stack nor named by `keep`.
    /// Returns how many were removed.
    pub fn release_unreferenced(&mut self, keep: &HashSet<LayerId>) -> usize {
        let orphans: Vec<LayerId> = self
            .layers
            .keys()
            .filter(|id| !keep.contains(id) && !self.stack.contains(id))
            .collect();
        for &id in &orphans {
            if let Some(layer) = self.layers.remove(id) {
                layer.discard(self.backend.as_mut());
            }
            if self.pending == Some(id) {
                self.pending = None;
            }
        }
        if !orphans.is_empty() {
            log_info!("Released {} unreachable layer(s)", orphans.len());
        }
        orphans.len()
    }

    /// The layer's own pixels (its full backing store).
    pub fn layer_pixels(&mut self, id: LayerId) -> Option<PixelBuffer> {
        let layer = self.layers.get(id)?;
        Some(layer.read_pixels(self.backend.as_mut()))
    }

    /// A canvas-space region of one layer.
    pub fn read_layer_region(&mut self, id: LayerId, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer {
        match self.layers.get(id) {
            Some(layer) => layer.read_region(self.backend.as_mut(), x, y, width, height),
            None => PixelBuffer::new(width, height),
        }
    }

    /// The presented image.
    pub fn composite_pixels(&mut self) -> PixelBuffer {
        self.backend.read_pixels(self.display, 0, 0, self.width, self.height)
    }

    // ========================================================================
    // LAYER MUTATION (through history actions)
    // ========================================================================

    /// Current value of the attribute `like` names.
    pub fn layer_value(&self, id: LayerId, like: &LayerValue) -> LayerValue {
        let Some(layer) = self.layers.get(id) else { return like.clone() };
        match like {
            LayerValue::X(_) => LayerValue::X(layer.x),
            LayerValue::Y(_) => LayerValue::Y(layer.y),
            LayerValue::Opacity(_) => LayerValue::Opacity(layer.opacity),
            LayerValue::Visible(_) => LayerValue::Visible(layer.visible),
            LayerValue::Blend(_) => LayerValue::Blend(layer.blend_mode),
            LayerValue::Name(_) => LayerValue::Name(layer.name.clone()),
        }
    }

    pub fn apply_value(&mut self, id: LayerId, value: &LayerValue) {
        let Some(layer) = self.layers.get_mut(id) else {
            log_warn!("apply_value: unknown layer {:?}", id);
            return;
        };
        match value {
            LayerValue::X(v) => layer.x = *v,
            LayerValue::Y(v) => layer.y = *v,
            LayerValue::Opacity(v) => layer.opacity = *v,
            LayerValue::Visible(v) => layer.visible = *v,
            LayerValue::Blend(v) => layer.blend_mode = *v,
            LayerValue::Name(v) => layer.name = v.clone(),
        }
        if value.affects_composite() {
            self.invalidate_above(id);
        }
    }

    /// Add (`sign` = 1) or subtract (`sign` = -1) a numeric delta.
    pub fn offset_value(&mut self, id: LayerId, delta: &LayerValue, sign: i32) {
        let Some(layer) = self.layers.get_mut(id) else {
            log_warn!("offset_value: unknown layer {:?}", id);
            return;
        };
        match delta {
            LayerValue::X(d) => layer.x += sign * d,
            LayerValue::Y(d) => layer.y += sign * d,
            LayerValue::Opacity(d) => layer.opacity += sign as f32 * d,
            other => {
                log_warn!("offset_value: {} is not numeric", other.field_name());
                return;
            }
        }
        self.invalidate_above(id);
    }

    /// Replace `remove` stack entries at `index` with `inserted`, returning
    /// what was removed. Every cache is dropped, and a selected layer that
    /// left the stack is deselected.
    pub fn splice_stack(&mut self, index: usize, remove: usize, inserted: &[LayerId]) -> Vec<LayerId> {
        let index = index.min(self.stack.len());
        let end = (index + remove).min(self.stack.len());
        let removed: Vec<LayerId> = self.stack.splice(index..end, inserted.iter().copied()).collect();
        self.invalidate_all();
        if let Some(sel) = self.selected
            && !self.stack.contains(&sel)
        {
            self.deselect();
        }
        removed
    }

    /// Overwrite pixels of a layer at a canvas position.
    pub fn write_layer_region(&mut self, id: LayerId, x: i32, y: i32, pixels: &PixelBuffer) {
        let Some(layer) = self.layers.get_mut(id) else { return };
        if let Err(e) = layer.write_region(self.backend.as_mut(), x, y, pixels) {
            log_err!("Failed to restore region of layer '{}': {}", layer.name, e);
        }
        self.invalidate_above(id);
    }

    // ========================================================================
    // TOOL SUPPORT
    // ========================================================================

    /// Live position change during a drag. Not recorded.
    pub fn set_layer_position(&mut self, id: LayerId, x: i32, y: i32) {
        let Some(layer) = self.layers.get_mut(id) else { return };
        if (layer.x, layer.y) == (x, y) {
            return;
        }
        layer.x = x;
        layer.y = y;
        self.invalidate_above(id);
    }

    pub fn expand_layer(&mut self, id: LayerId) -> Result<(), PaintError> {
        let (w, h) = (self.width, self.height);
        let layer = self.layers.get_mut(id).ok_or(PaintError::UnknownLayer)?;
        layer.expand(self.backend.as_mut(), w, h)
    }

    /// Canvas-sized copy of a layer's content at its canvas position.
    pub fn snapshot_layer(&mut self, id: LayerId) -> Result<SurfaceId, PaintError> {
        let layer = self.layers.get(id).ok_or(PaintError::UnknownLayer)?;
        let temp = self.backend.create_surface(self.width, self.height)?;
        let full = self.canvas_rect();
        let src = full.translate(vec2(-layer.x as f32, -layer.y as f32));
        self.backend
            .blit(layer.source(), src, temp, full, BlitParams::replace(Filter::Nearest));
        Ok(temp)
    }

    pub fn read_surface(&mut self, surface: SurfaceId, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer {
        self.backend.read_pixels(surface, x, y, width, height)
    }

    pub fn release_surface(&mut self, surface: SurfaceId) {
        self.backend.destroy_surface(surface);
    }

    /// Blit into a resident layer. `dst` is in canvas coordinates.
    pub fn draw_into_layer(&mut self, id: LayerId, src: BlitSource<'_>, src_rect: Rect, dst: Rect, params: BlitParams) {
        let Some(layer) = self.layers.get(id) else { return };
        let Some(surface) = layer.surface() else {
            log_warn!("draw_into_layer: layer '{}' is not resident", layer.name);
            return;
        };
        let local = dst.translate(vec2(-layer.x as f32, -layer.y as f32));
        self.backend.blit(src, src_rect, surface, local, params);
        self.invalidate_above(id);
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    /// Make `id` the selected layer: cache what is below it and move its
    /// pixels onto a canvas-covering surface.
    pub fn select(&mut self, id: LayerId) -> Result<(), PaintError> {
        if self.selected == Some(id) {
            return Ok(());
        }
        if !self.contains(id) {
            return Err(PaintError::UnknownLayer);
        }
        self.deselect();
        self.build_cache(id)?;
        let (w, h) = (self.width, self.height);
        let backend = self.backend.as_mut();
        let layer = self.layers.get_mut(id).ok_or(PaintError::UnknownLayer)?;
        if let Err(e) = layer.expand(backend, w, h) {
            layer.drop_cache(backend);
            return Err(e);
        }
        layer.selected = true;
        self.selected = Some(id);
        log_info!("Selected layer '{}'", layer.name);
        Ok(())
    }

    pub fn deselect(&mut self) {
        if let Some(id) = self.selected.take()
            && let Some(layer) = self.layers.get_mut(id)
        {
            layer.deselect(self.backend.as_mut());
        }
    }

    // ========================================================================
    // COMPOSITE CACHES
    // ========================================================================

    /// Recomposite everything below `id` into a fresh cache surface. The
    /// bottom layer's cache stays transparent.
    pub fn build_cache(&mut self, id: LayerId) -> Result<(), PaintError> {
        let index = self.index_of(id).ok_or(PaintError::UnknownLayer)?;
        let cache = self.backend.create_surface(self.width, self.height)?;
        let bottom = self.stack.len() - 1;
        if index < bottom {
            let full = self.canvas_rect();
            self.draw_chain(bottom, cache, full, Some(index));
        }
        if let Some(layer) = self.layers.get_mut(id) {
            layer.drop_cache(self.backend.as_mut());
            layer.cache = Some(cache);
        }
        Ok(())
    }

    /// Drop the caches of every layer above `id`.
    pub fn invalidate_above(&mut self, id: LayerId) {
        let Some(index) = self.index_of(id) else { return };
        for &above in &self.stack[..index] {
            if let Some(layer) = self.layers.get_mut(above) {
                layer.drop_cache(self.backend.as_mut());
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        for (_, layer) in self.layers.iter_mut() {
            layer.drop_cache(self.backend.as_mut());
        }
    }

    // ========================================================================
    // REDRAW SCHEDULING
    // ========================================================================

    /// Ask for `rect` (canvas space) to be repainted starting at `id`.
    ///
    /// The rect always joins the dirty region. The requester becomes the
    /// start layer unless the pending one sits above it.
    pub fn request_redraw(&mut self, id: LayerId, rect: Rect) {
        if is_empty_rect(rect) {
            return;
        }
        self.dirty_rect = Some(match self.dirty_rect {
            Some(existing) => existing.union(rect),
            None => rect,
        });
        let superseded = match self.pending {
            Some(pending) => match (self.index_of(pending), self.index_of(id)) {
                (Some(p), Some(r)) => p < r,
                (Some(_), None) => true,
                (None, _) => false,
            },
            None => false,
        };
        if !superseded {
            self.pending = Some(id);
        }
    }

    /// Repaint a layer's current bounds.
    pub fn redraw_layer_bounds(&mut self, id: LayerId) {
        if let Some(rect) = self.layers.get(id).map(Layer::rect) {
            self.request_redraw(id, rect);
        }
    }

    /// Repaint the whole canvas from the bottom layer.
    pub fn redraw_all(&mut self) {
        let full = self.canvas_rect();
        match self.bottom() {
            Some(bottom) => self.request_redraw(bottom, full),
            None => self.dirty_rect = Some(full),
        }
    }

    pub fn frame_requested(&self) -> bool {
        self.dirty_rect.is_some()
    }

    pub fn pending_layer(&self) -> Option<LayerId> {
        self.pending
    }

    pub fn dirty_rect(&self) -> Option<Rect> {
        self.dirty_rect
    }

    pub fn frames_painted(&self) -> u64 {
        self.frames_painted
    }

    /// The frame callback. Paints the pending region once and returns whether
    /// anything was painted.
    pub fn on_frame(&mut self) -> bool {
        let Some(dirty) = self.dirty_rect else { return false };
        let pending = self.pending;
        let Some(rect) = self.clip_to_canvas(dirty) else {
            self.dirty_rect = None;
            self.pending = None;
            return false;
        };

        if self.stack.is_empty() {
            self.backend.clear(self.canvas, rect);
            self.present(rect);
            self.frames_painted += 1;
            return true;
        }

        let bottom = self.stack.len() - 1;
        let start = pending.and_then(|id| self.index_of(id)).unwrap_or(bottom);
        let id = self.stack[start];

        let needs_cache = self.selected == Some(id) && self.layers.get(id).is_some_and(|l| !l.has_cache());
        if needs_cache && let Err(e) = self.build_cache(id) {
            log_err!("Failed to rebuild composite cache: {}", e);
        }

        match self.layers.get(id).and_then(|l| l.cache) {
            Some(cache) => self.backend.copy_region(cache, rect, self.canvas, rect, Filter::Nearest),
            None => {
                self.backend.clear(self.canvas, rect);
                if start < bottom {
                    self.draw_chain(bottom, self.canvas, rect, Some(start));
                }
            }
        }
        self.draw_chain(start, self.canvas, rect, None);
        self.frames_painted += 1;
        true
    }

    /// Blend layers `start`, `start - 1`, … into `target` over `rect`,
    /// stopping before index `stop_at` (or after the top layer). Reaching the
    /// top on the canvas surface presents the result.
    pub fn draw_chain(&mut self, start: usize, target: SurfaceId, rect: Rect, stop_at: Option<usize>) {
        let end = stop_at.map_or(0, |s| s + 1);
        if !self.stack.is_empty() {
            let start = start.min(self.stack.len() - 1);
            for i in (end..=start).rev() {
                let Some(layer) = self.layers.get(self.stack[i]) else { continue };
                if !layer.visible || layer.is_empty() {
                    continue;
                }
                let area = rect.intersect(layer.rect());
                if is_empty_rect(area) {
                    continue;
                }
                let src = area.translate(vec2(-layer.x as f32, -layer.y as f32));
                let params = BlitParams::blend(CompositeOp::Blend(layer.blend_mode), layer.opacity);
                self.backend.blit(layer.source(), src, target, area, params);
            }
        }
        if target == self.canvas && stop_at.is_none() {
            self.present(rect);
        }
    }

    /// Copy the canvas to the display over `rect` grown by one pixel, and
    /// clear the pending pair.
    fn present(&mut self, rect: Rect) {
        if let Some(area) = self.clip_to_canvas(rect.expand(1.0)) {
            self.backend
                .copy_region(self.canvas, area, self.display, area, Filter::Nearest);
        }
        self.pending = None;
        self.dirty_rect = None;
    }

    /// Snap outward to whole pixels and clip to the canvas.
    fn clip_to_canvas(&self, rect: Rect) -> Option<Rect> {
        let (x0, y0, x1, y1) = snap_out(rect);
        let x0 = x0.max(0);
        let y0 = y0.max(0);
        let x1 = x1.min(self.width as i32);
        let y1 = y1.min(self.height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(pixel_rect(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
