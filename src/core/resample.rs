//! Resampling onto a canonical grid.
//!
//! Reprojection mathematics are an external primitive. This module covers the
//! part the pipeline relies on: moving rasters between grids that share a CRS,
//! either by nearest-neighbour lookup or by a masked mean over the source cells
//! whose centres fall inside each target cell.

use crate::types::{GridSpec, Raster, SclError, SclResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Resampling method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resampling {
    Nearest,
    /// Mean of valid source cells (reduceResolution)
    Mean,
}

/// Moves rasters between grids
pub trait Reprojector {
    fn reproject(&self, raster: &Raster, target: &GridSpec, method: Resampling) -> SclResult<Raster>;
}

/// Same-CRS resampler
#[derive(Debug, Default, Clone, Copy)]
pub struct GridResampler;

impl Reprojector for GridResampler {
    fn reproject(&self, raster: &Raster, target: &GridSpec, method: Resampling) -> SclResult<Raster> {
        if raster.grid.same_as(target) {
            return Ok(raster.clone());
        }
        if raster.grid.crs != target.crs {
            return Err(SclError::Processing(format!(
                "reprojection from {} to {} is not available in the grid resampler",
                raster.grid.crs, target.crs
            )));
        }

        log::debug!(
            "Resampling {}x{} -> {}x{} ({:?})",
            raster.grid.rows,
            raster.grid.cols,
            target.rows,
            target.cols,
            method
        );

        match method {
            Resampling::Nearest => Ok(build_raster(*target, |r, c| nearest(raster, target, r, c))),
            Resampling::Mean => Ok(build_raster(*target, |r, c| cell_mean(raster, target, r, c))),
        }
    }
}

fn nearest(src: &Raster, target: &GridSpec, row: usize, col: usize) -> Option<f64> {
    let (x, y) = target.transform.cell_center(row, col);
    let (sr, sc) = src.grid.transform.pixel_of(x, y);
    if sr < 0.0 || sc < 0.0 {
        return None;
    }
    let (sr, sc) = (sr.floor() as usize, sc.floor() as usize);
    if sr >= src.grid.rows || sc >= src.grid.cols {
        return None;
    }
    src.get(sr, sc)
}

fn cell_mean(src: &Raster, target: &GridSpec, row: usize, col: usize) -> Option<f64> {
    // Source window covered by the target cell
    let (x0, y0) = target.transform.map_coord(row as f64, col as f64);
    let (x1, y1) = target.transform.map_coord(row as f64 + 1.0, col as f64 + 1.0);
    let (ra, ca) = src.grid.transform.pixel_of(x0, y0);
    let (rb, cb) = src.grid.transform.pixel_of(x1, y1);
    let (r_lo, r_hi) = (ra.min(rb), ra.max(rb));
    let (c_lo, c_hi) = (ca.min(cb), ca.max(cb));

    // Cells whose centre lies in [lo, hi)
    let first = |lo: f64| (lo - 0.5).ceil().max(0.0) as usize;
    let last = |hi: f64, n: usize| ((hi - 0.5).ceil().max(0.0) as usize).min(n);
    let (r_start, r_end) = (first(r_lo), last(r_hi, src.grid.rows));
    let (c_start, c_end) = (first(c_lo), last(c_hi, src.grid.cols));

    let mut sum = 0.0;
    let mut count = 0usize;
    for r in r_start..r_end {
        for c in c_start..c_end {
            if let Some(v) = src.get(r, c) {
                sum += v;
                count += 1;
            }
        }
    }
    if count == 0 {
        // Coarser source: fall back to the covering cell
        if r_start >= r_end || c_start >= c_end {
            return nearest(src, target, row, col);
        }
        return None;
    }
    Some(sum / count as f64)
}

/// Materialise a raster cell by cell, row-parallel when enabled
pub(crate) fn build_raster<F>(grid: GridSpec, f: F) -> Raster
where
    F: Fn(usize, usize) -> Option<f64> + Sync,
{
    let rows = collect_rows(grid.rows, grid.cols, &f);
    let mut data = Array2::zeros(grid.dim());
    let mut valid = Array2::from_elem(grid.dim(), false);
    for (r, row) in rows.into_iter().enumerate() {
        for (c, value) in row.into_iter().enumerate() {
            if let Some(v) = value {
                data[[r, c]] = v;
                valid[[r, c]] = true;
            }
        }
    }
    Raster { grid, data, valid }
}

#[cfg(feature = "parallel")]
fn collect_rows<F>(rows: usize, cols: usize, f: &F) -> Vec<Vec<Option<f64>>>
where
    F: Fn(usize, usize) -> Option<f64> + Sync,
{
    use rayon::prelude::*;
    (0..rows)
        .into_par_iter()
        .map(|r| (0..cols).map(|c| f(r, c)).collect())
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn collect_rows<F>(rows: usize, cols: usize, f: &F) -> Vec<Vec<Option<f64>>>
where
    F: Fn(usize, usize) -> Option<f64> + Sync,
{
    (0..rows).map(|r| (0..cols).map(|c| f(r, c)).collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};

    fn grid(rows: usize, cols: usize, size: f64) -> GridSpec {
        GridSpec::new(GeoTransform::north_up(0.0, 1200.0, size), Crs::epsg(32647), rows, cols)
    }

    #[test]
    fn test_mean_reduces_and_skips_masked() {
        let fine = grid(4, 4, 300.0);
        let src = Raster::from_fn(fine, |r, c| if r == 0 && c == 0 { None } else { Some((r * 4 + c) as f64) });
        let coarse = grid(2, 2, 600.0);
        let out = GridResampler.reproject(&src, &coarse, Resampling::Mean).unwrap();
        // top-left block: cells 1, 4, 5 (cell 0 masked)
        assert_eq!(out.get(0, 0), Some((1.0 + 4.0 + 5.0) / 3.0));
        assert_eq!(out.get(1, 1), Some((10.0 + 11.0 + 14.0 + 15.0) / 4.0));
    }

    #[test]
    fn test_nearest_upsamples() {
        let coarse = grid(2, 2, 600.0);
        let src = Raster::from_fn(coarse, |r, c| Some((r * 2 + c) as f64));
        let fine = grid(4, 4, 300.0);
        let out = GridResampler.reproject(&src, &fine, Resampling::Nearest).unwrap();
        assert_eq!(out.get(0, 1), Some(0.0));
        assert_eq!(out.get(3, 3), Some(3.0));
        assert_eq!(out.get(1, 2), Some(1.0));
    }

    #[test]
    fn test_cross_crs_is_rejected() {
        let a = grid(2, 2, 600.0);
        let mut b = a;
        b.crs = Crs::WGS84;
        let src = Raster::filled(a, 1.0);
        assert!(GridResampler.reproject(&src, &b, Resampling::Nearest).is_err());
    }
}
