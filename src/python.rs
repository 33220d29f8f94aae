//! Python bindings.
//!
//! Arrays cross the boundary as float64 with NaN marking masked cells.

use crate::core::density::{DensityResolver, MinimumSizePolicy};
use crate::core::dilation::dilate_km;
use crate::core::patch::{Connectivity, PatchFilter, PatchFilterParams};
use crate::core::resample::GridResampler;
use crate::core::resolution::{area_to_pixels, distance_to_pixels};
use crate::core::rules::RuleSet;
use crate::core::threshold::{ThresholdCalibration, ThresholdCalibrator};
use crate::types::{Crs, GeoTransform, GridSpec, Raster};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::BTreeMap;

/// Array with a unit-less projected grid of `cell_size` metres
fn numpy_to_raster(arr: PyReadonlyArray2<f64>, cell_size: f64) -> PyResult<Raster> {
    let data = arr.as_array().to_owned();
    let (rows, cols) = data.dim();
    let grid = GridSpec::new(
        GeoTransform::north_up(0.0, rows as f64 * cell_size, cell_size),
        Crs::epsg(3857),
        rows,
        cols,
    );
    Raster::new(grid, data).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn raster_to_numpy(py: Python, raster: &Raster) -> PyObject {
    let mut out = raster.data.clone();
    ndarray::Zip::from(&mut out).and(&raster.valid).for_each(|d, &v| {
        if !v {
            *d = f64::NAN;
        }
    });
    out.to_pyarray(py).into()
}

fn parse_connectivity(connectivity: u8) -> PyResult<Connectivity> {
    match connectivity {
        4 => Ok(Connectivity::Four),
        8 => Ok(Connectivity::Eight),
        other => Err(PyValueError::new_err(format!("connectivity must be 4 or 8, got {}", other))),
    }
}

/// Keep connected patches of at least `min_size` cells.
///
/// With `canonical_cell_size` the result is resampled onto a grid of that cell
/// size covering the same extent.
#[pyfunction]
#[pyo3(signature = (mask, min_size, connectivity = 8, max_pixels = 10_000_000_000, cell_size = 1.0, canonical_cell_size = None))]
fn patch_filter(
    py: Python,
    mask: PyReadonlyArray2<f64>,
    min_size: u64,
    connectivity: u8,
    max_pixels: u64,
    cell_size: f64,
    canonical_cell_size: Option<f64>,
) -> PyResult<PyObject> {
    let raster = numpy_to_raster(mask, cell_size)?;
    let filter = PatchFilter::new(PatchFilterParams {
        min_size,
        connectivity: parse_connectivity(connectivity)?,
        max_pixels,
    });
    let filtered = match canonical_cell_size {
        Some(scale) => {
            let canonical = raster
                .grid
                .with_scale(scale)
                .map_err(|e| PyValueError::new_err(e.to_string()))?;
            filter.filter_to_grid(&raster, &canonical, &GridResampler)
        }
        None => filter.filter(&raster),
    }
    .map_err(|e| PyRuntimeError::new_err(format!("Patch filter failed: {}", e)))?;
    Ok(raster_to_numpy(py, &filtered))
}

/// Dilate a mask by `distance_km` at `cell_size` metres
#[pyfunction]
fn dilate_mask(py: Python, mask: PyReadonlyArray2<f64>, distance_km: f64, cell_size: f64) -> PyResult<PyObject> {
    let raster = numpy_to_raster(mask, cell_size)?;
    let grown = dilate_km(&raster, distance_km).map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(raster_to_numpy(py, &grown))
}

/// (pixel radius, pixel area) for a distance and an area at `cell_size` metres
#[pyfunction]
fn to_pixels(distance_km: f64, area_km2: f64, cell_size: f64) -> PyResult<(u32, f64)> {
    let radius = distance_to_pixels(distance_km, cell_size).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let area = area_to_pixels(area_km2, cell_size).map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok((radius, area))
}

/// Per-zone pressure thresholds from the histogram search
#[pyfunction]
#[pyo3(signature = (zones, pressure, high_suitability, bins = 100, empty_zone_default = None))]
fn calibrate_thresholds(
    zones: PyReadonlyArray2<f64>,
    pressure: PyReadonlyArray2<f64>,
    high_suitability: PyReadonlyArray2<f64>,
    bins: usize,
    empty_zone_default: Option<f64>,
) -> PyResult<BTreeMap<i64, f64>> {
    let zones = numpy_to_raster(zones, 1.0)?;
    let pressure = numpy_to_raster(pressure, 1.0)?;
    let high = numpy_to_raster(high_suitability, 1.0)?;
    let calibrator = ThresholdCalibrator::new(ThresholdCalibration { bins, empty_zone_default });
    let thresholds = calibrator
        .calibrate(&zones, &pressure, &high)
        .map_err(|e| PyRuntimeError::new_err(format!("Calibration failed: {}", e)))?;
    Ok(thresholds.table())
}

/// Minimum core and stepping-stone sizes (pixels) for one density estimate
#[pyfunction]
fn minimum_sizes(py: Python, density: f64, cell_size: f64) -> PyResult<PyObject> {
    let resolver = DensityResolver::new(MinimumSizePolicy::default(), cell_size)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let record = crate::core::density::DensityRecord {
        ecoregion: 0,
        primary: Some(density),
        secondary: None,
        tertiary: None,
    };
    let size = resolver
        .resolve_record(&record)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let result = PyDict::new(py);
    result.set_item("density", size.density)?;
    result.set_item("core_px", size.core_px)?;
    result.set_item("stepping_stone_px", size.stepping_stone_px)?;
    Ok(result.into())
}

/// Categories a polygon with `attributes` belongs to
#[pyfunction]
#[pyo3(signature = (attributes, rules_json = None))]
fn classify(attributes: BTreeMap<String, f64>, rules_json: Option<String>) -> PyResult<Vec<String>> {
    let rules = match rules_json {
        Some(text) => {
            let rules: RuleSet =
                serde_json::from_str(&text).map_err(|e| PyValueError::new_err(format!("Invalid rules: {}", e)))?;
            rules.validate().map_err(|e| PyValueError::new_err(e.to_string()))?;
            rules
        }
        None => RuleSet::standard(),
    };
    Ok(rules.categories_of(&attributes).into_iter().map(String::from).collect())
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(patch_filter, m)?)?;
    m.add_function(wrap_pyfunction!(dilate_mask, m)?)?;
    m.add_function(wrap_pyfunction!(to_pixels, m)?)?;
    m.add_function(wrap_pyfunction!(calibrate_thresholds, m)?)?;
    m.add_function(wrap_pyfunction!(minimum_sizes, m)?)?;
    m.add_function(wrap_pyfunction!(classify, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
