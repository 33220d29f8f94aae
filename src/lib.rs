//! sclpoly: Species Conservation Landscape polygons
//!
//! Classifies a landscape into functional units (core habitat, stepping
//! stones, survey targets, restoration candidates, fragments) for one species
//! and snapshot date. Raster layers are masked, thresholded per zone, sized
//! into patches and dilated; the result is polygonized with per-polygon
//! attributes and sorted into categories by a rule set.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use config::PipelineConfig;
pub use pipeline::{ExportOutcome, OutputRecord, Pipeline, RunReport, RunRequest};
pub use types::{CmpOp, Crs, GeoTransform, GridSpec, Raster, SclError, SclResult};
