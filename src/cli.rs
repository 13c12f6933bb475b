// ============================================================================
// LayerPaint CLI: headless stroke scripts rendered to PNG
// ============================================================================
//
// Usage examples:
//   layerpaint --script strokes.json --output result.png
//   layerpaint -s strokes.json -o out.png --width 1024 --height 768 --cpu
//   layerpaint -o demo.png                       (renders the built-in demo)
//
// A script is a JSON object with a `steps` array. Every step carries an `op`
// tag, for example:
//   {"steps": [
//     {"op": "add_layer", "name": "ink"},
//     {"op": "select", "layer": "ink"},
//     {"op": "brush", "size": 12, "color": [200, 30, 30]},
//     {"op": "stroke", "points": [[10, 10], [120, 80, 0.5]]},
//     {"op": "undo"}
//   ]}

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use serde::Deserialize;

use crate::components::layers::LayerId;
use crate::components::tools::{PointerEvent, ToolKind};
use crate::error::PaintError;
use crate::gpu::create_backend;
use crate::pixels::{BlendMode, PixelBuffer};
use crate::project::Project;
use crate::settings::PaintSettings;
use crate::log_info;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// LayerPaint headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "layerpaint",
    about = "Replay a layer/stroke script and write the composite as PNG",
    long_about = "Run a JSON script of layer, brush and history operations against a\n\
                  fresh canvas and save the flattened result.\n\n\
                  Example:\n  \
                  layerpaint --script strokes.json --output result.png"
)]
pub struct CliArgs {
    /// JSON step script. When omitted, a three-layer demo is rendered.
    #[arg(short, long, value_name = "SCRIPT.json")]
    pub script: Option<PathBuf>,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE", default_value = "layerpaint.png")]
    pub output: PathBuf,

    /// Canvas width (defaults to the saved settings).
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height (defaults to the saved settings).
    #[arg(long)]
    pub height: Option<u32>,

    /// Use the software renderer even when a GPU is available.
    #[arg(long)]
    pub cpu: bool,

    /// Echo log lines to stderr and print timing.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Script format
// ============================================================================

#[derive(Deserialize, Debug, PartialEq)]
pub struct Script {
    pub steps: Vec<Step>,
}

/// Pointer position, optionally with pen pressure.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum ScriptPoint {
    Xy([f32; 2]),
    Xyp([f32; 3]),
}

impl ScriptPoint {
    fn event(self) -> PointerEvent {
        match self {
            ScriptPoint::Xy([x, y]) => PointerEvent::new(x, y),
            ScriptPoint::Xyp([x, y, p]) => PointerEvent::with_pressure(x, y, p),
        }
    }
}

/// Layers are addressed by name.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    AddLayer {
        #[serde(default)]
        name: Option<String>,
    },
    /// Every file matching the glob pattern becomes a layer.
    Import {
        path: String,
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
    },
    Select { layer: String },
    Delete { layer: String },
    MoveUp { layer: String },
    MoveDown { layer: String },
    Opacity { layer: String, value: f32 },
    Visible { layer: String, value: bool },
    Blend { layer: String, mode: String },
    Rename { layer: String, name: String },
    Tool { name: String },
    Brush {
        #[serde(default)]
        size: Option<f32>,
        #[serde(default)]
        interval: Option<f32>,
        #[serde(default)]
        opacity: Option<f32>,
        #[serde(default)]
        color: Option<[u8; 3]>,
        #[serde(default)]
        erase: Option<bool>,
        #[serde(default)]
        blend: Option<String>,
        #[serde(default)]
        pressure: Option<bool>,
    },
    /// Pointer down at the first point, moves through the rest, up at the last.
    Stroke { points: Vec<ScriptPoint> },
    Drag { from: ScriptPoint, to: ScriptPoint },
    Undo,
    Redo,
    Frame,
}

pub fn parse_script(source: &str) -> Result<Script, PaintError> {
    Ok(serde_json::from_str(source)?)
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();

    let mut settings = PaintSettings::load();
    if args.cpu {
        settings.gpu_acceleration = false;
    }
    if let Some(w) = args.width {
        settings.canvas_width = w;
    }
    if let Some(h) = args.height {
        settings.canvas_height = h;
    }

    let script = match &args.script {
        Some(path) => match load_script(path) {
            Ok(script) => Some(script),
            Err(e) => {
                eprintln!("error: could not load script '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let backend = create_backend(&settings);
    let mut project = match Project::with_settings(&settings, backend) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.verbose {
        println!("{}", project.canvas().diagnostics());
    }

    let result = match &script {
        Some(script) => run_script(&mut project, script, args.verbose),
        None => build_demo(&mut project),
    };
    if let Err(e) = result {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = project.save_png_to(&args.output) {
        eprintln!("error: could not write '{}': {}", args.output.display(), e);
        return ExitCode::FAILURE;
    }

    if args.verbose {
        println!(
            "  → {} ({:.0}ms, {} undo steps)",
            args.output.display(),
            start.elapsed().as_secs_f64() * 1000.0,
            project.history().len() - project.history().index()
        );
    }
    ExitCode::SUCCESS
}

fn load_script(path: &Path) -> Result<Script, PaintError> {
    let source = std::fs::read_to_string(path)?;
    parse_script(&source)
}

// ============================================================================
// Step execution
// ============================================================================

/// Apply every step in order, then run the pending frame.
pub fn run_script(project: &mut Project, script: &Script, verbose: bool) -> Result<(), PaintError> {
    for (idx, step) in script.steps.iter().enumerate() {
        if verbose {
            println!("[{}/{}] {:?}", idx + 1, script.steps.len(), step);
        }
        run_step(project, step).map_err(|e| match e {
            PaintError::Script(msg) => PaintError::Script(format!("step {}: {}", idx + 1, msg)),
            other => other,
        })?;
    }
    project.on_frame();
    Ok(())
}

fn run_step(project: &mut Project, step: &Step) -> Result<(), PaintError> {
    match step {
        Step::AddLayer { name } => {
            let id = project.add_layer();
            if let Some(name) = name {
                project.rename_layer(id, name)?;
            }
        }
        Step::Import { path, x, y } => {
            let paths = resolve_pattern(path);
            if paths.is_empty() {
                return Err(PaintError::Script(format!("'{}' matched no files", path)));
            }
            for p in paths {
                project.import_png(&p, *x, *y)?;
            }
        }
        Step::Select { layer } => {
            let id = find_layer(project, layer)?;
            project.select_layer(id)?;
        }
        Step::Delete { layer } => {
            let id = find_layer(project, layer)?;
            project.delete_layer(id)?;
        }
        Step::MoveUp { layer } => {
            let id = find_layer(project, layer)?;
            project.move_layer_up(id)?;
        }
        Step::MoveDown { layer } => {
            let id = find_layer(project, layer)?;
            project.move_layer_down(id)?;
        }
        Step::Opacity { layer, value } => {
            let id = find_layer(project, layer)?;
            project.set_layer_opacity(id, *value)?;
        }
        Step::Visible { layer, value } => {
            let id = find_layer(project, layer)?;
            project.set_layer_visible(id, *value)?;
        }
        Step::Blend { layer, mode } => {
            let id = find_layer(project, layer)?;
            project.set_layer_blend_mode(id, parse_blend(mode)?)?;
        }
        Step::Rename { layer, name } => {
            let id = find_layer(project, layer)?;
            project.rename_layer(id, name)?;
        }
        Step::Tool { name } => {
            let kind = ToolKind::from_name(name)
                .ok_or_else(|| PaintError::Script(format!("unknown tool '{}'", name)))?;
            project.set_tool(kind);
        }
        Step::Brush { size, interval, opacity, color, erase, blend, pressure } => {
            let blend = blend.as_deref().map(parse_blend).transpose()?;
            let brush = project.brush_mut();
            if let Some(v) = size {
                brush.set_size(*v);
            }
            if let Some(v) = interval {
                brush.set_interval(*v);
            }
            if let Some(v) = opacity {
                brush.set_opacity(*v);
            }
            if let Some(v) = color {
                brush.set_color(*v);
            }
            if let Some(v) = erase {
                brush.erase = *v;
            }
            if let Some(v) = blend {
                brush.blend_mode = v;
            }
            if let Some(v) = pressure {
                brush.pressure = *v;
            }
        }
        Step::Stroke { points } => {
            let (first, rest) = points
                .split_first()
                .ok_or_else(|| PaintError::Script("stroke needs at least one point".to_string()))?;
            project.pointer_down(first.event())?;
            for p in rest {
                project.pointer_move(p.event())?;
            }
            let last = rest.last().unwrap_or(first);
            project.pointer_up(last.event())?;
        }
        Step::Drag { from, to } => {
            project.pointer_down(from.event())?;
            project.pointer_move(to.event())?;
            project.pointer_up(to.event())?;
        }
        Step::Undo => {
            if let Some(desc) = project.undo() {
                log_info!("Script undo: {}", desc);
            }
        }
        Step::Redo => {
            if let Some(desc) = project.redo() {
                log_info!("Script redo: {}", desc);
            }
        }
        Step::Frame => {
            project.on_frame();
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Topmost layer with the given name.
fn find_layer(project: &Project, name: &str) -> Result<LayerId, PaintError> {
    project
        .layers()
        .iter()
        .copied()
        .find(|&id| project.layer(id).is_some_and(|l| l.name == name))
        .ok_or_else(|| PaintError::Script(format!("no layer named '{}'", name)))
}

fn parse_blend(name: &str) -> Result<BlendMode, PaintError> {
    BlendMode::from_name(name).ok_or_else(|| PaintError::Script(format!("unknown blend mode '{}'", name)))
}

/// A literal path, or every file the glob pattern matches, in order.
fn resolve_pattern(pattern: &str) -> Vec<PathBuf> {
    let as_path = Path::new(pattern);
    if as_path.exists() {
        return vec![as_path.to_path_buf()];
    }
    match glob::glob(pattern) {
        Ok(entries) => entries.flatten().collect(),
        Err(e) => {
            eprintln!("warning: invalid glob '{}': {}", pattern, e);
            Vec::new()
        }
    }
}

/// Three overlapping sample layers: a backdrop, a multiplied panel and a
/// soft brush dab on top. The setup is the starting document, so it leaves
/// nothing to undo.
pub fn build_demo(project: &mut Project) -> Result<(), PaintError> {
    let (w, h) = (project.width(), project.height());

    project.add_image_layer("Backdrop", 0, 0, PixelBuffer::filled(w, h, [235, 225, 200, 255]));

    let panel = project.add_image_layer(
        "Panel",
        (w / 6) as i32,
        (h / 6) as i32,
        PixelBuffer::filled(w / 2, h / 2, [70, 130, 200, 255]),
    );
    project.set_layer_blend_mode(panel, BlendMode::Multiply)?;

    let dab = w.min(h) / 2;
    let mut sprite = PixelBuffer::radial_sprite(dab.max(1));
    for px in sprite.as_raw_mut().chunks_exact_mut(4) {
        px[0] = 220;
        px[1] = 60;
        px[2] = 40;
    }
    let glow = project.add_image_layer("Glow", (w / 2) as i32 - (dab / 4) as i32, (h / 2) as i32 - (dab / 4) as i32, sprite);
    project.set_layer_opacity(glow, 0.8)?;

    project.clear_history();
    project.on_frame();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareRenderer;

    fn project(w: u32, h: u32) -> Project {
        Project::new(w, h, Box::new(SoftwareRenderer::new())).expect("project")
    }

    #[test]
    fn parses_tagged_steps() {
        let script = parse_script(
            r#"{"steps": [
                {"op": "add_layer", "name": "ink"},
                {"op": "brush", "size": 8, "color": [1, 2, 3]},
                {"op": "stroke", "points": [[1, 2], [3, 4, 0.5]]},
                {"op": "move_up", "layer": "ink"},
                {"op": "undo"}
            ]}"#,
        )
        .expect("parse");
        assert_eq!(script.steps.len(), 5);
        assert_eq!(script.steps[0], Step::AddLayer { name: Some("ink".to_string()) });
        assert_eq!(
            script.steps[2],
            Step::Stroke { points: vec![ScriptPoint::Xy([1.0, 2.0]), ScriptPoint::Xyp([3.0, 4.0, 0.5])] }
        );
        assert_eq!(script.steps[4], Step::Undo);
    }

    #[test]
    fn unknown_ops_are_script_errors() {
        let err = parse_script(r#"{"steps": [{"op": "explode"}]}"#);
        assert!(matches!(err, Err(PaintError::Script(_))));
    }

    #[test]
    fn script_paints_and_undoes() {
        let mut p = project(40, 40);
        let script = parse_script(
            r#"{"steps": [
                {"op": "add_layer", "name": "ink"},
                {"op": "select", "layer": "ink"},
                {"op": "brush", "size": 10, "color": [0, 200, 0]},
                {"op": "stroke", "points": [[5, 20], [35, 20]]},
                {"op": "add_layer", "name": "scratch"},
                {"op": "delete", "layer": "scratch"},
                {"op": "undo"},
                {"op": "redo"}
            ]}"#,
        )
        .expect("parse");
        run_script(&mut p, &script, false).expect("run");
        assert_eq!(p.layers().len(), 1);
        let image = p.composite();
        assert!(image.alpha(20, 20) > 0);
        assert_eq!(image.get_pixel(20, 20)[0], 0);
        assert_eq!(image.alpha(20, 2), 0);
    }

    #[test]
    fn missing_layer_names_the_step() {
        let mut p = project(8, 8);
        let script = parse_script(r#"{"steps": [{"op": "frame"}, {"op": "select", "layer": "nope"}]}"#)
            .expect("parse");
        match run_script(&mut p, &script, false) {
            Err(PaintError::Script(msg)) => assert!(msg.starts_with("step 2:"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn demo_has_three_layers() {
        let mut p = project(60, 40);
        build_demo(&mut p).expect("demo");
        assert!(!p.can_undo());
        let names: Vec<_> = p.layers().iter().filter_map(|&id| p.layer(id)).map(|l| l.name.clone()).collect();
        assert_eq!(names, ["Glow", "Panel", "Backdrop"]);
        let image = p.composite();
        assert_eq!(image.get_pixel(0, 0), [235, 225, 200, 255]);
    }
}
