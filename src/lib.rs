//! Layered raster paint surface: layer compositing over a pluggable render
//! backend, coalesced redraw scheduling and undo/redo history.

#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod gpu;
pub mod pixels;
pub mod project;
pub mod settings;

pub use canvas::CanvasState;
pub use error::PaintError;
pub use project::Project;
