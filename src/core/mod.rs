//! Core landscape classification modules

pub mod density;
pub mod dilation;
pub mod graph;
pub mod patch;
pub mod polygonize;
pub mod rasterize;
pub mod reduce;
pub mod resample;
pub mod resolution;
pub mod rules;
pub mod threshold;

// Re-export main types
pub use density::{DensityFields, DensityRecord, DensityResolver, DensitySource, MinimumSize, MinimumSizePolicy, SizeLimits};
pub use dilation::{dilate, dilate_km, squared_distance_transform};
pub use graph::{ArithOp, Evaluator, Expr, Graph, NodeId};
pub use patch::{connected_pixel_count, label_components, ComponentLabels, Connectivity, PatchFilter, PatchFilterParams};
pub use polygonize::{BandSpec, LabeledPolygon, PolygonizeParams, Polygonizer};
pub use rasterize::rasterize;
pub use reduce::Reducer;
pub use resample::{GridResampler, Reprojector, Resampling};
pub use resolution::{area_to_pixel_count, area_to_pixels, distance_to_pixels};
pub use rules::{Attributes, Category, Operand, Predicate, RuleSet};
pub use threshold::{ThresholdCalibration, ThresholdCalibrator, ZoneCalibration, ZoneThresholds};
