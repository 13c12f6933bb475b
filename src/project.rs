use std::collections::HashSet;
use std::path::Path;

use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use uuid::Uuid;

use crate::canvas::CanvasState;
use crate::components::history::{Action, History, LayerValue};
use crate::components::layers::{Layer, LayerId};
use crate::components::tools::{Brush, PointerEvent, ToolKind, Tools};
use crate::error::PaintError;
use crate::gpu::RenderBackend;
use crate::pixels::{BlendMode, PixelBuffer};
use crate::settings::PaintSettings;
use crate::log_info;

/// Single open document: canvas, layer stack, tools and history.
pub struct Project {
    pub id: Uuid,
    pub name: String,
    canvas: CanvasState,
    history: History<Action>,
    tools: Tools,
    /// Numbering for default layer names.
    layer_counter: usize,
}

impl Project {
    pub fn new(width: u32, height: u32, backend: Box<dyn RenderBackend>) -> Result<Self, PaintError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: "Untitled".to_string(),
            canvas: CanvasState::new(width, height, backend)?,
            history: History::default(),
            tools: Tools::new(Brush::default()),
            layer_counter: 0,
        })
    }

    /// Canvas size, brush defaults and history cap from the settings.
    pub fn with_settings(settings: &PaintSettings, backend: Box<dyn RenderBackend>) -> Result<Self, PaintError> {
        let mut project = Self::new(settings.canvas_width, settings.canvas_height, backend)?;
        project.history = History::new(settings.max_undo_steps);
        project.tools = Tools::new(Brush::from_settings(settings));
        Ok(project)
    }

    pub fn width(&self) -> u32 {
        self.canvas.width
    }

    pub fn height(&self) -> u32 {
        self.canvas.height
    }

    pub fn canvas(&self) -> &CanvasState {
        &self.canvas
    }

    pub fn history(&self) -> &History<Action> {
        &self.history
    }

    /// Top-first layer stack.
    pub fn layers(&self) -> &[LayerId] {
        self.canvas.stack()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.canvas.layer(id)
    }

    pub fn selected_layer(&self) -> Option<LayerId> {
        self.canvas.selected()
    }

    pub fn layer_pixels(&mut self, id: LayerId) -> Option<PixelBuffer> {
        self.canvas.layer_pixels(id)
    }

    /// Record every push made inside `f` as one undo step.
    pub fn group<R>(&mut self, label: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.history.begin_group(label);
        let result = f(self);
        self.history.end_group();
        self.release_orphans();
        result
    }

    /// Drop layers that left the stack and that no history entry can bring
    /// back, once history has thrown entries away.
    fn release_orphans(&mut self) {
        if !self.history.take_discarded() {
            return;
        }
        let mut referenced = HashSet::new();
        self.history.for_each_command(|action| referenced.extend(action.layers()));
        self.canvas.release_unreferenced(&referenced);
    }

    // ========================================================================
    // LAYER STACK
    // ========================================================================

    /// New empty layer directly above the selected one, or on top.
    pub fn add_layer(&mut self) -> LayerId {
        self.layer_counter += 1;
        let name = format!("Layer {}", self.layer_counter);
        self.insert_layer(Layer::new(name))
    }

    /// New layer holding `pixels` with its top-left at (`x`, `y`).
    pub fn add_image_layer(&mut self, name: &str, x: i32, y: i32, pixels: PixelBuffer) -> LayerId {
        self.layer_counter += 1;
        let id = self.insert_layer(Layer::with_pixels(name, x, y, pixels));
        self.canvas.redraw_layer_bounds(id);
        id
    }

    pub fn import_png(&mut self, path: &Path, x: i32, y: i32) -> Result<LayerId, PaintError> {
        let img = image::open(path)?.to_rgba8();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Imported".to_string());
        log_info!("Imported {} ({}x{})", path.display(), img.width(), img.height());
        Ok(self.add_image_layer(&name, x, y, PixelBuffer::from_rgba_image(img)))
    }

    fn insert_layer(&mut self, layer: Layer) -> LayerId {
        let id = self.canvas.insert_layer(layer);
        let index = self.canvas.selected().and_then(|s| self.canvas.index_of(s)).unwrap_or(0);
        self.group("Add layer", |p| {
            let action = Action::splice(&mut p.canvas, index, 0, vec![id]);
            p.history.push(action);
        });
        id
    }

    /// Take the layer out of the stack. Undo puts it back.
    pub fn delete_layer(&mut self, id: LayerId) -> Result<(), PaintError> {
        let index = self.canvas.index_of(id).ok_or(PaintError::UnknownLayer)?;
        if self.canvas.selected() == Some(id) {
            self.canvas.deselect();
        }
        let action = Action::splice(&mut self.canvas, index, 1, Vec::new());
        self.history.push(action);
        self.release_orphans();
        self.canvas.redraw_all();
        Ok(())
    }

    /// Swap with the layer above. Returns `false` when already on top.
    pub fn move_layer_up(&mut self, id: LayerId) -> Result<bool, PaintError> {
        let index = self.canvas.index_of(id).ok_or(PaintError::UnknownLayer)?;
        if index == 0 {
            return Ok(false);
        }
        self.reorder(id, index, index - 1);
        Ok(true)
    }

    /// Swap with the layer below. Returns `false` when already at the bottom.
    pub fn move_layer_down(&mut self, id: LayerId) -> Result<bool, PaintError> {
        let index = self.canvas.index_of(id).ok_or(PaintError::UnknownLayer)?;
        if index + 1 >= self.canvas.stack().len() {
            return Ok(false);
        }
        self.reorder(id, index, index + 1);
        Ok(true)
    }

    fn reorder(&mut self, id: LayerId, from: usize, to: usize) {
        let neighbour = self.canvas.stack()[to];
        self.group("Reorder layers", |p| {
            let remove = Action::splice(&mut p.canvas, from, 1, Vec::new());
            p.history.push(remove);
            let insert = Action::splice(&mut p.canvas, to, 0, vec![id]);
            p.history.push(insert);
        });
        self.canvas.redraw_layer_bounds(id);
        self.canvas.redraw_layer_bounds(neighbour);
    }

    pub fn select_layer(&mut self, id: LayerId) -> Result<(), PaintError> {
        self.canvas.select(id)
    }

    pub fn deselect_layer(&mut self) {
        self.canvas.deselect();
    }

    // ========================================================================
    // LAYER PROPERTIES
    // ========================================================================

    fn set_value(&mut self, id: LayerId, value: LayerValue) -> Result<(), PaintError> {
        if self.canvas.layer(id).is_none() {
            return Err(PaintError::UnknownLayer);
        }
        let redraw = value.affects_composite();
        let action = Action::set_value(&mut self.canvas, id, value);
        self.history.push(action);
        self.release_orphans();
        if redraw {
            self.canvas.redraw_layer_bounds(id);
        }
        Ok(())
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> Result<(), PaintError> {
        self.set_value(id, LayerValue::Opacity(opacity.clamp(0.0, 1.0)))
    }

    pub fn set_layer_visible(&mut self, id: LayerId, visible: bool) -> Result<(), PaintError> {
        self.set_value(id, LayerValue::Visible(visible))
    }

    pub fn set_layer_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<(), PaintError> {
        self.set_value(id, LayerValue::Blend(mode))
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> Result<(), PaintError> {
        self.set_value(id, LayerValue::Name(name.to_string()))
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    pub fn undo(&mut self) -> Option<String> {
        let description = self.history.undo(&mut self.canvas)?;
        self.canvas.redraw_all();
        Some(description)
    }

    pub fn redo(&mut self) -> Option<String> {
        let description = self.history.redo(&mut self.canvas)?;
        self.canvas.redraw_all();
        Some(description)
    }

    /// Forget every undo step, making the current document the baseline.
    /// Refused (returns `false`) while steps are undone.
    pub fn clear_history(&mut self) -> bool {
        if self.history.can_redo() {
            return false;
        }
        self.history.clear();
        self.release_orphans();
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ========================================================================
    // TOOLS
    // ========================================================================

    pub fn tool(&self) -> ToolKind {
        self.tools.active()
    }

    pub fn set_tool(&mut self, kind: ToolKind) {
        self.tools.set_active(kind);
    }

    pub fn brush(&self) -> &Brush {
        &self.tools.brush
    }

    pub fn brush_mut(&mut self) -> &mut Brush {
        &mut self.tools.brush
    }

    pub fn pointer_down(&mut self, event: PointerEvent) -> Result<(), PaintError> {
        let layer = self.canvas.selected().ok_or(PaintError::NoLayerSelected)?;
        let result = self
            .tools
            .current_mut()
            .pointer_down(&mut self.canvas, &mut self.history, layer, event);
        self.release_orphans();
        result
    }

    pub fn pointer_move(&mut self, event: PointerEvent) -> Result<(), PaintError> {
        let layer = self.canvas.selected().ok_or(PaintError::NoLayerSelected)?;
        let result = self
            .tools
            .current_mut()
            .pointer_move(&mut self.canvas, &mut self.history, layer, event);
        self.release_orphans();
        result
    }

    pub fn pointer_up(&mut self, event: PointerEvent) -> Result<(), PaintError> {
        let layer = self.canvas.selected().ok_or(PaintError::NoLayerSelected)?;
        let result = self
            .tools
            .current_mut()
            .pointer_up(&mut self.canvas, &mut self.history, layer, event);
        self.release_orphans();
        result
    }

    // ========================================================================
    // OUTPUT
    // ========================================================================

    /// Run the pending frame, if any.
    pub fn on_frame(&mut self) -> bool {
        self.canvas.on_frame()
    }

    /// The full composite, repainted from the bottom layer.
    pub fn composite(&mut self) -> PixelBuffer {
        self.canvas.redraw_all();
        self.canvas.on_frame();
        self.canvas.composite_pixels()
    }

    /// PNG bytes of the composited canvas.
    pub fn save_as_png(&mut self) -> Result<Vec<u8>, PaintError> {
        let pixels = self.composite();
        let mut out = Vec::new();
        PngEncoder::new(&mut out).write_image(
            pixels.as_raw(),
            pixels.width(),
            pixels.height(),
            image::ColorType::Rgba8,
        )?;
        Ok(out)
    }

    pub fn save_png_to(&mut self, path: &Path) -> Result<(), PaintError> {
        let bytes = self.save_as_png()?;
        std::fs::write(path, bytes)?;
        log_info!("Saved {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareRenderer;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn project(w: u32, h: u32) -> Project {
        Project::new(w, h, Box::new(SoftwareRenderer::new())).expect("project")
    }

    /// Pixels of every layer in stack order, for exact state comparison.
    fn snapshot(p: &mut Project) -> Vec<(LayerId, PixelBuffer)> {
        let (w, h) = (p.width(), p.height());
        let ids = p.layers().to_vec();
        ids.into_iter()
            .map(|id| (id, p.canvas.read_layer_region(id, 0, 0, w, h)))
            .collect()
    }

    #[test]
    fn new_layers_go_above_the_selection() {
        let mut p = project(10, 10);
        let a = p.add_layer();
        let b = p.add_layer();
        assert_eq!(p.layers(), &[b, a]);
        p.select_layer(a).expect("select");
        let c = p.add_layer();
        assert_eq!(p.layers(), &[b, c, a]);
        assert_eq!(p.layer(c).map(|l| l.name.as_str()), Some("Layer 3"));
    }

    #[test]
    fn pointer_events_need_a_selection() {
        let mut p = project(10, 10);
        p.add_layer();
        let err = p.pointer_down(PointerEvent::new(1.0, 1.0));
        assert!(matches!(err, Err(PaintError::NoLayerSelected)));
    }

    #[test]
    fn full_undo_then_redo_restores_pixels_and_order() {
        let mut p = project(48, 48);
        let bottom = p.add_image_layer("blue", 0, 0, PixelBuffer::filled(48, 48, BLUE));
        let top = p.add_layer();
        p.select_layer(top).expect("select");
        p.brush_mut().set_color([255, 0, 0]);
        p.brush_mut().set_size(12.0);
        p.pointer_down(PointerEvent::new(10.0, 10.0)).expect("down");
        p.pointer_move(PointerEvent::new(30.0, 20.0)).expect("move");
        p.pointer_up(PointerEvent::new(30.0, 20.0)).expect("up");
        p.set_layer_opacity(top, 0.5).expect("opacity");
        p.move_layer_down(top).expect("down");
        p.set_tool(ToolKind::Move);
        p.pointer_down(PointerEvent::new(5.0, 5.0)).expect("down");
        p.pointer_up(PointerEvent::new(9.0, 2.0)).expect("up");
        p.set_layer_blend_mode(bottom, BlendMode::Multiply).expect("blend");

        let end_state = snapshot(&mut p);
        let end_image = p.composite();

        let mut steps = 0;
        while p.undo().is_some() {
            steps += 1;
        }
        assert!(p.layers().is_empty());
        for _ in 0..steps {
            assert!(p.redo().is_some());
        }
        assert!(p.redo().is_none());
        assert_eq!(snapshot(&mut p), end_state);
        assert_eq!(p.composite(), end_image);
    }

    #[test]
    fn delete_and_undo_restore_the_layer() {
        let mut p = project(8, 8);
        let a = p.add_image_layer("a", 0, 0, PixelBuffer::filled(8, 8, RED));
        p.select_layer(a).expect("select");
        p.delete_layer(a).expect("delete");
        assert_eq!(p.selected_layer(), None);
        assert!(p.layers().is_empty());
        assert_eq!(p.composite(), PixelBuffer::new(8, 8));
        p.undo();
        assert_eq!(p.layers(), &[a]);
        assert_eq!(p.composite().get_pixel(4, 4), RED);
    }

    #[test]
    fn reorder_is_one_step_and_changes_the_composite() {
        let mut p = project(4, 4);
        let blue = p.add_image_layer("blue", 0, 0, PixelBuffer::filled(4, 4, BLUE));
        let red = p.add_image_layer("red", 0, 0, PixelBuffer::filled(4, 4, RED));
        assert_eq!(p.composite().get_pixel(0, 0), RED);
        assert!(p.move_layer_up(blue).expect("up"));
        assert!(!p.move_layer_up(blue).expect("top"));
        assert_eq!(p.layers(), &[blue, red]);
        assert_eq!(p.composite().get_pixel(0, 0), BLUE);
        assert_eq!(p.undo().as_deref(), Some("Reorder layers"));
        assert_eq!(p.layers(), &[red, blue]);
    }

    #[test]
    fn property_setters_record_history() {
        let mut p = project(4, 4);
        let a = p.add_image_layer("a", 0, 0, PixelBuffer::filled(4, 4, RED));
        p.rename_layer(a, "renamed").expect("rename");
        p.set_layer_visible(a, false).expect("hide");
        assert_eq!(p.composite().get_pixel(1, 1), [0; 4]);
        p.undo();
        assert_eq!(p.composite().get_pixel(1, 1), RED);
        p.undo();
        assert_eq!(p.layer(a).map(|l| l.name.as_str()), Some("a"));
        assert!(p.set_layer_opacity(LayerId::default(), 0.5).is_err());
    }

    #[test]
    fn layers_dropped_from_the_redo_tail_are_released() {
        let mut p = project(8, 8);
        let base = p.add_layer();
        for _ in 0..100 {
            p.add_layer();
            p.undo();
            p.set_layer_opacity(base, 0.5).expect("opacity");
        }
        assert_eq!(p.layers(), &[base]);
        assert_eq!(p.canvas().arena_len(), 1);
    }

    #[test]
    fn layers_pruned_by_the_history_cap_are_released() {
        let settings = PaintSettings {
            max_undo_steps: 2,
            ..PaintSettings::default()
        };
        let mut p = Project::with_settings(&settings, Box::new(SoftwareRenderer::new())).expect("project");
        let kept = p.add_layer();
        let gone = p.add_layer();
        p.delete_layer(gone).expect("delete");
        // Undo can still reinsert it.
        assert_eq!(p.canvas().arena_len(), 2);
        p.rename_layer(kept, "a").expect("rename");
        p.rename_layer(kept, "b").expect("rename");
        assert_eq!(p.canvas().arena_len(), 1);
        assert!(p.layer(gone).is_none());
        assert!(p.layer(kept).is_some());
    }

    #[test]
    fn clearing_history_keeps_the_document() {
        let mut p = project(4, 4);
        let a = p.add_image_layer("a", 0, 0, PixelBuffer::filled(4, 4, RED));
        let b = p.add_layer();
        p.delete_layer(b).expect("delete");
        assert!(p.clear_history());
        assert!(!p.can_undo());
        assert_eq!(p.layers(), &[a]);
        assert_eq!(p.canvas().arena_len(), 1);
        assert_eq!(p.composite().get_pixel(2, 2), RED);

        p.rename_layer(a, "x").expect("rename");
        p.undo();
        assert!(!p.clear_history());
        assert!(p.can_redo());
    }

    #[test]
    fn png_export_has_canvas_dimensions() {
        let mut p = project(7, 5);
        p.add_image_layer("a", 1, 1, PixelBuffer::filled(2, 2, RED));
        let bytes = p.save_as_png().expect("png");
        let decoded = image::load_from_memory(&bytes).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (7, 5));
        assert_eq!(decoded.get_pixel(1, 1).0, RED);
        assert_eq!(decoded.get_pixel(0, 0).0, [0; 4]);
    }

    #[test]
    fn settings_configure_project() {
        let settings = PaintSettings {
            canvas_width: 32,
            canvas_height: 16,
            brush_size: 7.0,
            max_undo_steps: 2,
            ..PaintSettings::default()
        };
        let mut p = Project::with_settings(&settings, Box::new(SoftwareRenderer::new())).expect("project");
        assert_eq!((p.width(), p.height()), (32, 16));
        assert_eq!(p.brush().size(), 7.0);
        for _ in 0..4 {
            p.add_layer();
        }
        assert_eq!(p.history().len(), 2);
    }
}
