// ============================================================================
// PIXELS: CPU pixel buffers, blend math and the transparent-border trim
// ============================================================================

use std::fmt;

use egui::{Rect, pos2};

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Add,
    Subtract,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Add,
            BlendMode::Subtract,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Add => "Add",
            BlendMode::Subtract => "Subtract",
        }
    }

    /// Parse the short names used by scripts and settings (`"sub"` is accepted
    /// as an alias for subtract).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(BlendMode::Normal),
            "multiply" => Some(BlendMode::Multiply),
            "add" | "additive" => Some(BlendMode::Add),
            "sub" | "subtract" => Some(BlendMode::Subtract),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Add => 2,
            BlendMode::Subtract => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Add,
            3 => BlendMode::Subtract,
            _ => BlendMode::Normal,
        }
    }
}

/// What a blit does with the destination pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeOp {
    Blend(BlendMode),
    /// Eraser: subtracts source alpha from the destination, colour untouched.
    Erase,
    /// Straight copy of the sampled source, no blending.
    Replace,
}

impl CompositeOp {
    /// Mode selector shared with the WGSL blit shader.
    pub fn shader_mode(self) -> u32 {
        match self {
            CompositeOp::Blend(mode) => mode.to_u8() as u32,
            CompositeOp::Erase => 4,
            CompositeOp::Replace => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[inline]
pub fn to_unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
pub fn from_unit(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Composite one straight-alpha source sample over one destination pixel.
///
/// `sample` is the raw source texel; tint and opacity are applied here so the
/// software path mirrors the blit shader line for line.
pub fn composite_pixel(
    base: [f32; 4],
    sample: [f32; 4],
    op: CompositeOp,
    opacity: f32,
    tint: [f32; 3],
) -> [f32; 4] {
    let mode = match op {
        CompositeOp::Replace => return sample,
        CompositeOp::Erase => {
            return [base[0], base[1], base[2], base[3] - sample[3] * opacity];
        }
        CompositeOp::Blend(mode) => mode,
    };

    let pa = sample[3] * opacity;
    let pc = [sample[0] * tint[0], sample[1] * tint[1], sample[2] * tint[2]];
    let ba = base[3];

    let alpha = ba + pa * (1.0 - ba);
    let cutout = if alpha == 0.0 { 0.0 } else { 1.0 / alpha };

    let mut out = [0.0; 4];
    for c in 0..3 {
        let bc = base[c];
        let blended = match mode {
            BlendMode::Normal => pc[c],
            BlendMode::Multiply => bc * pc[c],
            BlendMode::Add => bc + pc[c],
            BlendMode::Subtract => bc - pc[c],
        };
        out[c] = ((1.0 - pa) * ba * bc + (1.0 - ba) * pa * pc[c] + ba * pa * blended) * cutout;
    }
    out[3] = alpha;
    out
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// Straight-alpha RGBA8 pixels, row-major, origin top-left.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    /// Wrap raw RGBA bytes. Returns `None` when the length does not match.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    #[inline]
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.data[self.offset(x, y) + 3]
    }

    /// Copy of the `w`×`h` region at (`x`, `y`); anything outside the buffer
    /// reads as transparent.
    pub fn crop(&self, x: i32, y: i32, w: u32, h: u32) -> PixelBuffer {
        let mut out = PixelBuffer::new(w, h);
        out.write_from(self, -x, -y);
        out
    }

    /// Overwrite pixels with `src` placed at (`x`, `y`), clipped to this buffer.
    pub fn write_from(&mut self, src: &PixelBuffer, x: i32, y: i32) {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + src.width as i32).min(self.width as i32);
        let y1 = (y + src.height as i32).min(self.height as i32);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let row_bytes = (x1 - x0) as usize * 4;
        for dy in y0..y1 {
            let s = src.offset((x0 - x) as u32, (dy - y) as u32);
            let d = self.offset(x0 as u32, dy as u32);
            self.data[d..d + row_bytes].copy_from_slice(&src.data[s..s + row_bytes]);
        }
    }

    /// Sample at pixel-space coordinates (`u`, `v`). Samples outside the
    /// buffer are transparent; inside, lookups clamp to the edge.
    pub fn sample(&self, u: f32, v: f32, filter: Filter) -> [f32; 4] {
        let w = self.width as f32;
        let h = self.height as f32;
        if self.is_empty() || !(0.0..=w).contains(&u) || !(0.0..=h).contains(&v) {
            return [0.0; 4];
        }
        match filter {
            Filter::Nearest => {
                let x = (u.floor() as u32).min(self.width - 1);
                let y = (v.floor() as u32).min(self.height - 1);
                self.texel(x as i64, y as i64)
            }
            Filter::Linear => {
                let fx = u - 0.5;
                let fy = v - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let a = self.texel(x0, y0);
                let b = self.texel(x0 + 1, y0);
                let c = self.texel(x0, y0 + 1);
                let d = self.texel(x0 + 1, y0 + 1);
                let mut out = [0.0; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * tx;
                    let bottom = c[i] + (d[i] - c[i]) * tx;
                    out[i] = top + (bottom - top) * ty;
                }
                out
            }
        }
    }

    #[inline]
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        let p = self.get_pixel(x, y);
        [to_unit(p[0]), to_unit(p[1]), to_unit(p[2]), to_unit(p[3])]
    }

    /// White disc whose alpha falls off linearly from the centre to the rim.
    pub fn radial_sprite(size: u32) -> PixelBuffer {
        let mut out = PixelBuffer::new(size, size);
        let radius = size as f32 / 2.0;
        for y in 0..size {
            for x in 0..size {
                let dx = x as f32 + 0.5 - radius;
                let dy = y as f32 + 0.5 - radius;
                let d = (dx * dx + dy * dy).sqrt() / radius;
                let a = from_unit(1.0 - d);
                out.put_pixel(x, y, [255, 255, 255, a]);
            }
        }
        out
    }

    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn from_rgba_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

// ============================================================================
// TRIM: shrink a layer to the bounding box of its non-transparent pixels
// ============================================================================

/// Number of fully transparent lines removable from each edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TrimInsets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

#[derive(Clone, Copy)]
enum Axis {
    Rows,
    Columns,
}

/// Scan inward from one edge.
///
/// Pass 1 samples a single pixel (the middle of each line) and stops at the
/// first line with alpha. Pass 2 walks back from there toward the edge summing
/// whole lines, so content that misses the sample still stops the trim.
fn edge_depth(buf: &PixelBuffer, axis: Axis, from_end: bool) -> u32 {
    let (lines, span) = match axis {
        Axis::Rows => (buf.height, buf.width),
        Axis::Columns => (buf.width, buf.height),
    };
    if lines == 0 || span == 0 {
        return 0;
    }
    let alpha_at = |line: u32, along: u32| -> u32 {
        let line = if from_end { lines - 1 - line } else { line };
        let a = match axis {
            Axis::Rows => buf.alpha(along, line),
            Axis::Columns => buf.alpha(line, along),
        };
        a as u32
    };

    let centre = span / 2;
    let mut depth = lines;
    for line in 0..lines {
        if alpha_at(line, centre) != 0 {
            depth = line;
            break;
        }
    }

    for back in (0..depth).rev() {
        let sum: u32 = (0..span).map(|along| alpha_at(back, along)).sum();
        if sum > 0 {
            depth = back;
        }
    }
    depth
}

/// Insets of the tight bounding box, or `None` if every pixel is transparent.
pub fn trim_insets(buf: &PixelBuffer) -> Option<TrimInsets> {
    if buf.is_empty() {
        return None;
    }
    let top = edge_depth(buf, Axis::Rows, false);
    if top >= buf.height {
        return None;
    }
    Some(TrimInsets {
        top,
        bottom: edge_depth(buf, Axis::Rows, true),
        left: edge_depth(buf, Axis::Columns, false),
        right: edge_depth(buf, Axis::Columns, true),
    })
}

// ============================================================================
// RECT HELPERS
// ============================================================================

pub fn pixel_rect(x: i32, y: i32, width: u32, height: u32) -> Rect {
    Rect::from_min_max(
        pos2(x as f32, y as f32),
        pos2(x as f32 + width as f32, y as f32 + height as f32),
    )
}

/// Smallest integer box containing `rect`: (x0, y0, x1, y1), exclusive max.
pub fn snap_out(rect: Rect) -> (i32, i32, i32, i32) {
    (
        rect.min.x.floor() as i32,
        rect.min.y.floor() as i32,
        rect.max.x.ceil() as i32,
        rect.max.y.ceil() as i32,
    )
}

pub fn is_empty_rect(rect: Rect) -> bool {
    !(rect.width() > 0.0 && rect.height() > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    fn normal(base: [f32; 4], sample: [f32; 4], opacity: f32) -> [f32; 4] {
        composite_pixel(base, sample, CompositeOp::Blend(BlendMode::Normal), opacity, [1.0; 3])
    }

    #[test]
    fn opaque_red_over_blue_is_red() {
        let out = normal(BLUE, RED, 1.0);
        assert_eq!(out, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn half_red_over_blue_averages() {
        let out = normal(BLUE, [1.0, 0.0, 0.0, 0.5], 1.0);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert_eq!(out[3], 1.0);
        // Same result when the alpha comes from layer opacity instead.
        assert_eq!(normal(BLUE, RED, 0.5), out);
    }

    #[test]
    fn over_transparent_keeps_source_colour() {
        let out = normal([0.0; 4], [0.2, 0.4, 0.6, 0.5], 1.0);
        assert!((out[0] - 0.2).abs() < 1e-6);
        assert!((out[3] - 0.5).abs() < 1e-6);
        assert_eq!(normal([0.0; 4], [0.0; 4], 1.0), [0.0; 4]);
    }

    #[test]
    fn multiply_add_subtract_use_blended_term() {
        let base = [0.5, 0.5, 0.5, 1.0];
        let src = [0.5, 0.25, 1.0, 1.0];
        let m = composite_pixel(base, src, CompositeOp::Blend(BlendMode::Multiply), 1.0, [1.0; 3]);
        assert_eq!(m, [0.25, 0.125, 0.5, 1.0]);
        let a = composite_pixel(base, src, CompositeOp::Blend(BlendMode::Add), 1.0, [1.0; 3]);
        assert_eq!(a, [1.0, 0.75, 1.5, 1.0]);
        let s = composite_pixel(base, src, CompositeOp::Blend(BlendMode::Subtract), 1.0, [1.0; 3]);
        assert_eq!(s, [0.0, 0.25, -0.5, 1.0]);
        assert_eq!(from_unit(s[2]), 0);
    }

    #[test]
    fn tint_multiplies_source_colour() {
        let white = [1.0, 1.0, 1.0, 1.0];
        let out = composite_pixel([0.0; 4], white, CompositeOp::Blend(BlendMode::Normal), 1.0, [1.0, 0.0, 0.5]);
        assert_eq!(out, [1.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn erase_subtracts_alpha_only() {
        let out = composite_pixel([0.3, 0.6, 0.9, 1.0], [1.0, 1.0, 1.0, 0.25], CompositeOp::Erase, 1.0, [1.0; 3]);
        assert_eq!(out, [0.3, 0.6, 0.9, 0.75]);
        let gone = composite_pixel([0.3, 0.6, 0.9, 0.2], RED, CompositeOp::Erase, 1.0, [1.0; 3]);
        assert_eq!(from_unit(gone[3]), 0);
    }

    #[test]
    fn sample_outside_bounds_is_transparent() {
        let buf = PixelBuffer::filled(4, 4, [255, 0, 0, 255]);
        assert_eq!(buf.sample(-0.5, 1.0, Filter::Nearest), [0.0; 4]);
        assert_eq!(buf.sample(2.0, 4.5, Filter::Linear), [0.0; 4]);
        assert_eq!(buf.sample(3.9, 3.9, Filter::Nearest), RED);
        // Linear clamps to edge inside the bounds, no bleed to transparent.
        assert_eq!(buf.sample(0.0, 0.0, Filter::Linear), RED);
    }

    #[test]
    fn crop_outside_reads_transparent() {
        let buf = PixelBuffer::filled(2, 2, [9, 9, 9, 255]);
        let c = buf.crop(-1, 0, 2, 2);
        assert_eq!(c.get_pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(c.get_pixel(1, 1), [9, 9, 9, 255]);
    }

    fn bordered(w: u32, h: u32, border: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        for y in border..h - border {
            for x in border..w - border {
                buf.put_pixel(x, y, [(x * 7) as u8, (y * 3) as u8, 200, 255]);
            }
        }
        buf
    }

    #[test]
    fn trim_finds_five_pixel_border() {
        let buf = bordered(40, 30, 5);
        let insets = trim_insets(&buf).expect("content present");
        assert_eq!(insets, TrimInsets { left: 5, top: 5, right: 5, bottom: 5 });
    }

    #[test]
    fn trim_confirmation_pass_catches_content_off_the_sampled_line() {
        // Content lives only in the top-left corner, away from the middle sample.
        let mut buf = PixelBuffer::new(20, 20);
        buf.put_pixel(2, 3, [0, 0, 0, 10]);
        buf.put_pixel(12, 9, [0, 0, 0, 255]);
        let insets = trim_insets(&buf).expect("content present");
        assert_eq!(insets.top, 3);
        assert_eq!(insets.left, 2);
        assert_eq!(insets.bottom, 20 - 1 - 9);
        assert_eq!(insets.right, 20 - 1 - 12);
    }

    #[test]
    fn trim_of_transparent_or_full_buffers() {
        assert_eq!(trim_insets(&PixelBuffer::new(8, 8)), None);
        assert_eq!(trim_insets(&PixelBuffer::new(0, 0)), None);
        let full = PixelBuffer::filled(3, 3, [1, 1, 1, 1]);
        assert_eq!(trim_insets(&full), Some(TrimInsets::default()));
    }

    #[test]
    fn radial_sprite_fades_to_the_rim() {
        let sprite = PixelBuffer::radial_sprite(30);
        assert!(sprite.alpha(15, 15) > 240);
        assert_eq!(sprite.alpha(0, 0), 0);
        assert!(sprite.alpha(15, 15) > sprite.alpha(22, 15));
    }

    #[test]
    fn blend_mode_names_round_trip() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_name(mode.name()), Some(*mode));
            assert_eq!(BlendMode::from_u8(mode.to_u8()), *mode);
        }
        assert_eq!(BlendMode::from_name("sub"), Some(BlendMode::Subtract));
    }
}
