use egui::{Rect, pos2, vec2};

use crate::canvas::CanvasState;
use crate::components::history::{Action, History, LayerValue};
use crate::components::layers::LayerId;
use crate::error::PaintError;
use crate::gpu::{BlitParams, BlitSource, SurfaceId};
use crate::log_info;
use crate::pixels::{BlendMode, CompositeOp, Filter, PixelBuffer, is_empty_rect};
use crate::settings::PaintSettings;

/// Edge length of the brush sprite; stamps scale it to the brush diameter.
pub const BRUSH_SPRITE_SIZE: u32 = 30;

pub const BRUSH_SIZE_RANGE: (f32, f32) = (3.0, 100.0);
pub const BRUSH_INTERVAL_RANGE: (f32, f32) = (0.1, 5.0);
pub const BRUSH_OPACITY_RANGE: (f32, f32) = (0.01, 1.0);

// ============================================================================
// POINTER INPUT
// ============================================================================

/// Pointer sample in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub x: f32,
    pub y: f32,
    /// 0..1 from a pen; mice report 0 or 0.5.
    pub pressure: f32,
}

impl PointerEvent {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, pressure: 1.0 }
    }

    pub fn with_pressure(x: f32, y: f32, pressure: f32) -> Self {
        Self { x, y, pressure }
    }
}

/// A tool driven by one pointer gesture on the selected layer.
pub trait PointerTool {
    fn name(&self) -> &'static str;

    fn pointer_down(
        &mut self,
        canvas: &mut CanvasState,
        history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError>;

    fn pointer_move(
        &mut self,
        canvas: &mut CanvasState,
        history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError>;

    fn pointer_up(
        &mut self,
        canvas: &mut CanvasState,
        history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolKind {
    #[default]
    Brush,
    Move,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Brush => "brush",
            ToolKind::Move => "move",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "brush" => Some(ToolKind::Brush),
            "move" => Some(ToolKind::Move),
            _ => None,
        }
    }
}

/// Every tool instance plus which one receives pointer events.
pub struct Tools {
    active: ToolKind,
    pub brush: Brush,
    pub mover: MoveTool,
}

impl Tools {
    pub fn new(brush: Brush) -> Self {
        Self {
            active: ToolKind::Brush,
            brush,
            mover: MoveTool::default(),
        }
    }

    pub fn active(&self) -> ToolKind {
        self.active
    }

    pub fn set_active(&mut self, kind: ToolKind) {
        self.active = kind;
    }

    pub fn current_mut(&mut self) -> &mut dyn PointerTool {
        match self.active {
            ToolKind::Brush => &mut self.brush,
            ToolKind::Move => &mut self.mover,
        }
    }
}

// ============================================================================
// STROKE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

/// Sampled path of one brush gesture.
#[derive(Clone, Debug)]
pub struct Stroke {
    points: Vec<StrokePoint>,
    /// Distance travelled since the last stamp, carried into the next `add`.
    last_distance: f32,
}

impl Stroke {
    pub fn new(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            points: vec![StrokePoint { x, y, pressure }],
            last_distance: 0.0,
        }
    }

    pub fn points(&self) -> &[StrokePoint] {
        &self.points
    }

    pub fn last_distance(&self) -> f32 {
        self.last_distance
    }

    /// Extend the path and return the stamp centres the new segment needs.
    ///
    /// Stamps are `max(size * pressure * interval / 2, 2)` apart along the
    /// path, measured across segments.
    pub fn add(&mut self, x: f32, y: f32, pressure: f32, size: f32, interval: f32) -> Vec<(f32, f32)> {
        let Some(prev) = self.points.last().copied() else {
            self.points.push(StrokePoint { x, y, pressure });
            return Vec::new();
        };
        let dist = (x - prev.x).hypot(y - prev.y);
        self.points.push(StrokePoint { x, y, pressure });
        if dist <= 0.0 {
            return Vec::new();
        }

        let len = self.last_distance + dist;
        let dir = ((x - prev.x) / dist, (y - prev.y) / dist);
        let spacing = (size * pressure * interval / 2.0).max(2.0);
        let count = (len / spacing).floor() as usize;
        let margin = spacing - self.last_distance;
        self.last_distance = len % spacing;

        (0..count)
            .map(|i| {
                let along = spacing * i as f32 + margin;
                (prev.x + dir.0 * along, prev.y + dir.1 * along)
            })
            .collect()
    }

    /// (min_x, min_y, max_x, max_y) over every sampled point.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}

// ============================================================================
// BRUSH
// ============================================================================

pub struct Brush {
    /// Diameter in canvas pixels.
    size: f32,
    /// Stamp spacing as a fraction of the radius.
    interval: f32,
    opacity: f32,
    color: [u8; 3],
    pub pressure: bool,
    pub erase: bool,
    pub blend_mode: BlendMode,
    sprite: PixelBuffer,
    stroke: Option<Stroke>,
    /// Canvas-sized copy of the layer taken at pointer-down.
    snapshot: Option<SurfaceId>,
    stamps_drawn: usize,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            size: 50.0,
            interval: 0.1,
            opacity: 1.0,
            color: [0, 0, 0],
            pressure: true,
            erase: false,
            blend_mode: BlendMode::Normal,
            sprite: PixelBuffer::radial_sprite(BRUSH_SPRITE_SIZE),
            stroke: None,
            snapshot: None,
            stamps_drawn: 0,
        }
    }
}

impl Brush {
    pub fn from_settings(settings: &PaintSettings) -> Self {
        let mut brush = Self::default();
        brush.set_size(settings.brush_size);
        brush.set_interval(settings.brush_interval);
        brush.set_opacity(settings.brush_opacity);
        brush.pressure = settings.brush_pressure;
        brush
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = size.clamp(BRUSH_SIZE_RANGE.0, BRUSH_SIZE_RANGE.1);
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: f32) {
        self.interval = interval.clamp(BRUSH_INTERVAL_RANGE.0, BRUSH_INTERVAL_RANGE.1);
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(BRUSH_OPACITY_RANGE.0, BRUSH_OPACITY_RANGE.1);
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn set_color(&mut self, color: [u8; 3]) {
        self.color = color;
    }

    pub fn is_stroking(&self) -> bool {
        self.stroke.is_some()
    }

    /// Stamps drawn since the brush was created.
    pub fn stamps_drawn(&self) -> usize {
        self.stamps_drawn
    }

    /// Missing or zero pressure counts as full pressure.
    fn effective_pressure(&self, pressure: f32) -> f32 {
        if !self.pressure || pressure <= 0.0 {
            1.0
        } else {
            pressure.min(1.0)
        }
    }

    fn stamp_params(&self) -> BlitParams {
        let op = if self.erase {
            CompositeOp::Erase
        } else {
            CompositeOp::Blend(self.blend_mode)
        };
        BlitParams {
            op,
            opacity: self.opacity,
            tint: [
                self.color[0] as f32 / 255.0,
                self.color[1] as f32 / 255.0,
                self.color[2] as f32 / 255.0,
            ],
            filter: Filter::Linear,
        }
    }

    /// Draw one sprite of `diameter` centred on (`x`, `y`), clipped to the
    /// canvas, and schedule a redraw of it.
    fn stamp(&mut self, canvas: &mut CanvasState, layer: LayerId, x: f32, y: f32, diameter: f32) {
        if diameter <= 0.0 {
            return;
        }
        let draw = Rect::from_min_size(pos2(x - diameter / 2.0, y - diameter / 2.0), vec2(diameter, diameter));
        let clipped = draw.intersect(canvas.canvas_rect());
        if is_empty_rect(clipped) {
            return;
        }
        let scale = self.sprite.width() as f32 / diameter;
        let src = Rect::from_min_max(
            pos2((clipped.min.x - draw.min.x) * scale, (clipped.min.y - draw.min.y) * scale),
            pos2((clipped.max.x - draw.min.x) * scale, (clipped.max.y - draw.min.y) * scale),
        );
        let params = self.stamp_params();
        canvas.draw_into_layer(layer, BlitSource::Pixels(&self.sprite), src, clipped, params);
        canvas.request_redraw(layer, clipped);
        self.stamps_drawn += 1;
    }

    fn release_snapshot(&mut self, canvas: &mut CanvasState) {
        if let Some(snapshot) = self.snapshot.take() {
            canvas.release_surface(snapshot);
        }
    }
}

impl PointerTool for Brush {
    fn name(&self) -> &'static str {
        "Brush"
    }

    fn pointer_down(
        &mut self,
        canvas: &mut CanvasState,
        _history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError> {
        self.release_snapshot(canvas);
        self.snapshot = Some(canvas.snapshot_layer(layer)?);
        let pressure = self.effective_pressure(event.pressure);
        self.stroke = Some(Stroke::new(event.x, event.y, pressure));
        self.stamp(canvas, layer, event.x, event.y, self.size * pressure);
        Ok(())
    }

    fn pointer_move(
        &mut self,
        canvas: &mut CanvasState,
        _history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError> {
        let pressure = self.effective_pressure(event.pressure);
        let (size, interval) = (self.size, self.interval);
        let Some(stroke) = self.stroke.as_mut() else { return Ok(()) };
        let stamps = stroke.add(event.x, event.y, pressure, size, interval);
        for (x, y) in stamps {
            self.stamp(canvas, layer, x, y, size * pressure);
        }
        Ok(())
    }

    /// Record the stroke: before/after pixels of its bounding box.
    fn pointer_up(
        &mut self,
        canvas: &mut CanvasState,
        history: &mut History<Action>,
        layer: LayerId,
        _event: PointerEvent,
    ) -> Result<(), PaintError> {
        let Some(stroke) = self.stroke.take() else { return Ok(()) };
        let radius = self.size / 2.0;
        let (min_x, min_y, max_x, max_y) = stroke.bounds();
        let x = (min_x - radius).floor();
        let y = (min_y - radius).floor();
        let w = (max_x - x + radius).ceil();
        let h = (max_y - y + radius).ceil();

        let x0 = (x as i32).max(0);
        let y0 = (y as i32).max(0);
        let x1 = ((x + w) as i32).min(canvas.width as i32);
        let y1 = ((y + h) as i32).min(canvas.height as i32);

        if x1 > x0 && y1 > y0 {
            let (w, h) = ((x1 - x0) as u32, (y1 - y0) as u32);
            let before = match self.snapshot {
                Some(snapshot) => canvas.read_surface(snapshot, x0, y0, w, h),
                None => PixelBuffer::new(w, h),
            };
            let after = canvas.read_layer_region(layer, x0, y0, w, h);
            history.push(Action::region_render(canvas, layer, x0, y0, before, after));
            log_info!("Brush stroke: {} points, region {}x{} at {},{}", stroke.points().len(), w, h, x0, y0);
        }
        self.release_snapshot(canvas);
        Ok(())
    }
}

// ============================================================================
// MOVE TOOL
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct MoveTool {
    layer_start: (i32, i32),
    pointer_start: (f32, f32),
    dragging: bool,
}

impl MoveTool {
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }
}

impl PointerTool for MoveTool {
    fn name(&self) -> &'static str {
        "Move"
    }

    fn pointer_down(
        &mut self,
        canvas: &mut CanvasState,
        _history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError> {
        let l = canvas.layer(layer).ok_or(PaintError::UnknownLayer)?;
        self.layer_start = (l.x, l.y);
        self.pointer_start = (event.x, event.y);
        self.dragging = true;
        Ok(())
    }

    /// Live preview: not recorded.
    fn pointer_move(
        &mut self,
        canvas: &mut CanvasState,
        _history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError> {
        if !self.dragging {
            return Ok(());
        }
        canvas.redraw_layer_bounds(layer);
        let x = (self.layer_start.0 as f32 + event.x - self.pointer_start.0).round() as i32;
        let y = (self.layer_start.1 as f32 + event.y - self.pointer_start.1).round() as i32;
        canvas.set_layer_position(layer, x, y);
        canvas.redraw_layer_bounds(layer);
        Ok(())
    }

    /// Commit the drag as one undo step.
    fn pointer_up(
        &mut self,
        canvas: &mut CanvasState,
        history: &mut History<Action>,
        layer: LayerId,
        event: PointerEvent,
    ) -> Result<(), PaintError> {
        if !self.dragging {
            return Ok(());
        }
        self.dragging = false;
        let dx = (event.x - self.pointer_start.0).round() as i32;
        let dy = (event.y - self.pointer_start.1).round() as i32;

        canvas.redraw_layer_bounds(layer);
        canvas.set_layer_position(layer, self.layer_start.0, self.layer_start.1);
        if dx == 0 && dy == 0 {
            canvas.redraw_layer_bounds(layer);
            return Ok(());
        }

        history.begin_group("Move layer");
        history.push(Action::offset_value(canvas, layer, LayerValue::X(dx)));
        history.push(Action::offset_value(canvas, layer, LayerValue::Y(dy)));
        let expanded = canvas.expand_layer(layer);
        history.end_group();
        expanded?;
        canvas.redraw_layer_bounds(layer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::Command;
    use crate::components::layers::Layer;
    use crate::gpu::SoftwareRenderer;

    fn canvas_with_selected_layer(w: u32, h: u32) -> (CanvasState, LayerId) {
        let mut canvas = CanvasState::new(w, h, Box::new(SoftwareRenderer::new())).expect("canvas");
        let id = canvas.insert_layer(Layer::new("paint"));
        Action::splice(&mut canvas, 0, 0, vec![id]);
        canvas.select(id).expect("select");
        (canvas, id)
    }

    #[test]
    fn spacing_follows_size_and_interval() {
        let mut stroke = Stroke::new(0.0, 0.0, 1.0);
        let stamps = stroke.add(100.0, 0.0, 1.0, 50.0, 0.1);
        assert_eq!(stamps.len(), 40);
        assert_eq!(stamps[0], (2.5, 0.0));
        assert_eq!(stamps[39], (100.0, 0.0));
    }

    #[test]
    fn leftover_distance_carries_across_segments() {
        let mut stroke = Stroke::new(0.0, 0.0, 1.0);
        // Spacing clamps to the 2px minimum for a small brush.
        assert!(stroke.add(1.5, 0.0, 1.0, 10.0, 0.1).is_empty());
        assert_eq!(stroke.last_distance(), 1.5);
        let stamps = stroke.add(3.0, 0.0, 1.0, 10.0, 0.1);
        assert_eq!(stamps, vec![(2.0, 0.0)]);
        assert!((stroke.last_distance() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_length_move_only_records_the_point() {
        let mut stroke = Stroke::new(5.0, 5.0, 1.0);
        assert!(stroke.add(5.0, 5.0, 1.0, 50.0, 0.1).is_empty());
        assert_eq!(stroke.points().len(), 2);
        assert_eq!(stroke.last_distance(), 0.0);
    }

    #[test]
    fn hundred_pixel_drag_draws_forty_one_stamps() {
        let (mut canvas, layer) = canvas_with_selected_layer(200, 100);
        let mut history = History::default();
        let mut brush = Brush::default();
        brush
            .pointer_down(&mut canvas, &mut history, layer, PointerEvent::new(50.0, 50.0))
            .expect("down");
        brush
            .pointer_move(&mut canvas, &mut history, layer, PointerEvent::new(150.0, 50.0))
            .expect("move");
        brush
            .pointer_up(&mut canvas, &mut history, layer, PointerEvent::new(150.0, 50.0))
            .expect("up");
        assert_eq!(brush.stamps_drawn(), 41);
        assert_eq!(history.len(), 1);
        assert!(canvas.frame_requested());
    }

    #[test]
    fn stroke_paints_and_undoes_exactly() {
        let (mut canvas, layer) = canvas_with_selected_layer(64, 64);
        let mut history = History::default();
        let mut brush = Brush::default();
        brush.set_color([255, 0, 0]);
        brush.set_size(20.0);
        let before = canvas.layer_pixels(layer).expect("layer");

        brush
            .pointer_down(&mut canvas, &mut history, layer, PointerEvent::new(20.0, 20.0))
            .expect("down");
        brush
            .pointer_move(&mut canvas, &mut history, layer, PointerEvent::new(40.0, 30.0))
            .expect("move");
        brush
            .pointer_up(&mut canvas, &mut history, layer, PointerEvent::new(40.0, 30.0))
            .expect("up");

        let painted = canvas.layer_pixels(layer).expect("layer");
        let centre = painted.get_pixel(20, 20);
        assert_eq!(centre[0], 255);
        assert!(centre[3] > 200, "{:?}", centre);
        assert_eq!(painted.get_pixel(60, 5), [0; 4]);

        history.undo(&mut canvas);
        assert_eq!(canvas.layer_pixels(layer).expect("layer"), before);
        history.redo(&mut canvas);
        assert_eq!(canvas.layer_pixels(layer).expect("layer"), painted);
    }

    #[test]
    fn eraser_removes_alpha() {
        let mut canvas = CanvasState::new(32, 32, Box::new(SoftwareRenderer::new())).expect("canvas");
        let id = canvas.insert_layer(Layer::with_pixels("solid", 0, 0, PixelBuffer::filled(32, 32, [0, 0, 255, 255])));
        Action::splice(&mut canvas, 0, 0, vec![id]);
        canvas.select(id).expect("select");
        let mut history = History::default();
        let mut brush = Brush {
            erase: true,
            ..Brush::default()
        };
        brush.set_size(10.0);
        brush
            .pointer_down(&mut canvas, &mut history, id, PointerEvent::new(16.0, 16.0))
            .expect("down");
        brush
            .pointer_up(&mut canvas, &mut history, id, PointerEvent::new(16.0, 16.0))
            .expect("up");
        let pixels = canvas.layer_pixels(id).expect("layer");
        assert!(pixels.get_pixel(16, 16)[3] < 64, "{:?}", pixels.get_pixel(16, 16));
        assert_eq!(pixels.get_pixel(16, 16)[2], 255);
        assert_eq!(pixels.get_pixel(0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn non_positive_pressure_counts_as_full() {
        let brush = Brush::default();
        assert_eq!(brush.effective_pressure(0.0), 1.0);
        assert_eq!(brush.effective_pressure(-1.0), 1.0);
        assert_eq!(brush.effective_pressure(0.25), 0.25);
        let flat = Brush {
            pressure: false,
            ..Brush::default()
        };
        assert_eq!(flat.effective_pressure(0.25), 1.0);
    }

    #[test]
    fn setters_clamp_to_ranges() {
        let mut brush = Brush::default();
        brush.set_size(500.0);
        brush.set_interval(0.0);
        brush.set_opacity(0.0);
        assert_eq!(brush.size(), 100.0);
        assert_eq!(brush.interval(), 0.1);
        assert_eq!(brush.opacity(), 0.01);
    }

    #[test]
    fn move_drag_is_one_undo_step() {
        let mut canvas = CanvasState::new(40, 40, Box::new(SoftwareRenderer::new())).expect("canvas");
        let id = canvas.insert_layer(Layer::with_pixels("block", 5, 5, PixelBuffer::filled(4, 4, [9, 9, 9, 255])));
        Action::splice(&mut canvas, 0, 0, vec![id]);
        canvas.select(id).expect("select");
        let mut history = History::default();
        let mut tool = MoveTool::default();

        tool.pointer_down(&mut canvas, &mut history, id, PointerEvent::new(10.0, 10.0))
            .expect("down");
        tool.pointer_move(&mut canvas, &mut history, id, PointerEvent::new(13.0, 8.0))
            .expect("move");
        tool.pointer_up(&mut canvas, &mut history, id, PointerEvent::new(15.4, 7.4))
            .expect("up");

        assert_eq!(history.len(), 1);
        // Content moved by the rounded drag delta (5, -3).
        let pixels = canvas.read_layer_region(id, 10, 2, 4, 4);
        assert_eq!(pixels, PixelBuffer::filled(4, 4, [9, 9, 9, 255]));
        assert!(canvas.layer(id).is_some_and(|l| l.rect().contains_rect(canvas.canvas_rect())));

        history.undo(&mut canvas);
        assert!(history.can_redo());
        let pixels = canvas.read_layer_region(id, 5, 5, 4, 4);
        assert_eq!(pixels, PixelBuffer::filled(4, 4, [9, 9, 9, 255]));
        assert_eq!(canvas.read_layer_region(id, 10, 2, 1, 1).get_pixel(0, 0), [0; 4]);
    }

    #[test]
    fn move_without_displacement_records_nothing() {
        let (mut canvas, layer) = canvas_with_selected_layer(10, 10);
        let mut history = History::default();
        let mut tool = MoveTool::default();
        tool.pointer_down(&mut canvas, &mut history, layer, PointerEvent::new(3.0, 3.0))
            .expect("down");
        tool.pointer_up(&mut canvas, &mut history, layer, PointerEvent::new(3.2, 2.9))
            .expect("up");
        assert!(history.is_empty());
    }

    #[test]
    fn splice_action_undo_restores_stack() {
        let (mut canvas, layer) = canvas_with_selected_layer(8, 8);
        let action = Action::splice(&mut canvas, 0, 1, Vec::new());
        assert!(canvas.stack().is_empty());
        assert_eq!(canvas.selected(), None);
        action.undo(&mut canvas);
        assert_eq!(canvas.stack(), &[layer]);
    }
}
