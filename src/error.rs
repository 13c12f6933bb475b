// ============================================================================
// ERRORS: one error type for the paint core and the headless driver
// ============================================================================

use std::fmt;

#[derive(Debug)]
pub enum PaintError {
    /// A tool or layer operation ran while no layer was selected.
    NoLayerSelected,
    /// The layer handle is not part of this project.
    UnknownLayer,
    /// A backing surface could not be allocated (size limit or zero size).
    SurfaceAllocation { width: u32, height: u32 },
    /// No usable GPU adapter was found.
    GpuUnavailable,
    InvalidCanvasSize { width: u32, height: u32 },
    Encode(String),
    Io(std::io::Error),
    Script(String),
}

impl fmt::Display for PaintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaintError::NoLayerSelected => write!(f, "no layer is selected"),
            PaintError::UnknownLayer => write!(f, "layer does not belong to this project"),
            PaintError::SurfaceAllocation { width, height } => {
                write!(f, "failed to allocate a {}x{} surface", width, height)
            }
            PaintError::GpuUnavailable => write!(f, "no GPU adapter available"),
            PaintError::InvalidCanvasSize { width, height } => {
                write!(f, "invalid canvas size {}x{}", width, height)
            }
            PaintError::Encode(e) => write!(f, "Image encoding error: {}", e),
            PaintError::Io(e) => write!(f, "I/O error: {}", e),
            PaintError::Script(e) => write!(f, "Script error: {}", e),
        }
    }
}

impl std::error::Error for PaintError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PaintError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PaintError {
    fn from(e: std::io::Error) -> Self {
        PaintError::Io(e)
    }
}

impl From<image::ImageError> for PaintError {
    fn from(e: image::ImageError) -> Self {
        PaintError::Encode(e.to_string())
    }
}

impl From<serde_json::Error> for PaintError {
    fn from(e: serde_json::Error) -> Self {
        PaintError::Script(e.to_string())
    }
}
