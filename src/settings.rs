// ============================================================================
// SETTINGS: persisted renderer, history and tool defaults
// ============================================================================

use std::path::PathBuf;

use crate::log_warn;

/// User preferences stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct PaintSettings {
    pub gpu_acceleration: bool,
    /// Substring matched against adapter names; empty picks the default.
    pub preferred_gpu: String,
    /// History cap. 0 keeps every step.
    pub max_undo_steps: usize,
    pub brush_size: f32,
    pub brush_interval: f32,
    pub brush_opacity: f32,
    pub brush_pressure: bool,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Default for PaintSettings {
    fn default() -> Self {
        Self {
            gpu_acceleration: true,
            preferred_gpu: String::new(),
            max_undo_steps: 0,
            brush_size: 50.0,
            brush_interval: 0.1,
            brush_opacity: 1.0,
            brush_pressure: true,
            canvas_width: 800,
            canvas_height: 600,
        }
    }
}

impl PaintSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/layerpaint/layerpaint_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\LayerPaint\layerpaint_settings.cfg
    /// On macOS:   ~/Library/Application Support/LayerPaint/layerpaint_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
                .ok()?
                .join("layerpaint");
            return Some(config_dir.join("layerpaint_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("LayerPaint").join("layerpaint_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("LayerPaint")
                    .join("layerpaint_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("layerpaint_settings.cfg")))
        }
    }

    /// Load from disk, or defaults when there is no readable file.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::parse(&content)
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_config_string())
    }

    /// Parse `key=value` lines over the defaults. Unknown keys are skipped and
    /// values that do not parse keep the default.
    pub fn parse(content: &str) -> Self {
        let d = Self::default();
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "gpu_acceleration" => s.gpu_acceleration = val == "true",
                "preferred_gpu" => s.preferred_gpu = val.to_string(),
                "max_undo_steps" => s.max_undo_steps = val.parse().unwrap_or(d.max_undo_steps),
                "brush_size" => s.brush_size = val.parse().unwrap_or(d.brush_size),
                "brush_interval" => s.brush_interval = val.parse().unwrap_or(d.brush_interval),
                "brush_opacity" => s.brush_opacity = val.parse().unwrap_or(d.brush_opacity),
                "brush_pressure" => s.brush_pressure = val != "false",
                "canvas_width" => s.canvas_width = val.parse().unwrap_or(d.canvas_width),
                "canvas_height" => s.canvas_height = val.parse().unwrap_or(d.canvas_height),
                other => {
                    log_warn!("Ignoring unknown setting '{}'", other);
                }
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "gpu_acceleration={}\n\
             preferred_gpu={}\n\
             max_undo_steps={}\n\
             brush_size={}\n\
             brush_interval={}\n\
             brush_opacity={}\n\
             brush_pressure={}\n\
             canvas_width={}\n\
             canvas_height={}\n",
            self.gpu_acceleration,
            self.preferred_gpu,
            self.max_undo_steps,
            self.brush_size,
            self.brush_interval,
            self.brush_opacity,
            self.brush_pressure,
            self.canvas_width,
            self.canvas_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_settings_parse_back() {
        let s = PaintSettings {
            gpu_acceleration: false,
            preferred_gpu: "NVIDIA".into(),
            max_undo_steps: 30,
            brush_size: 12.0,
            canvas_width: 320,
            ..PaintSettings::default()
        };
        assert_eq!(PaintSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn bad_values_and_unknown_keys_fall_back() {
        let s = PaintSettings::parse("brush_size=huge\ntheme=dark\n# comment\ncanvas_height=90\n");
        assert_eq!(s.brush_size, 50.0);
        assert_eq!(s.canvas_height, 90);
        assert!(s.gpu_acceleration);
    }
}
