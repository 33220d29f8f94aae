//! Distance-transform dilation modelling dispersal range.

use crate::core::resolution::distance_to_pixels;
use crate::types::{Raster, SclResult};
use ndarray::Array2;

const INF: f64 = 1e20;

/// Squared Euclidean distance (in pixels) from every cell to the nearest
/// true cell. Cells are at `INF` when the mask is empty.
pub fn squared_distance_transform(mask: &Array2<bool>) -> Array2<f64> {
    let (rows, cols) = mask.dim();
    let mut dist = mask.mapv(|m| if m { 0.0 } else { INF });

    // Columns first, then rows (separable lower envelope)
    for c in 0..cols {
        let column: Vec<f64> = (0..rows).map(|r| dist[[r, c]]).collect();
        let out = lower_envelope(&column);
        for r in 0..rows {
            dist[[r, c]] = out[r];
        }
    }
    transform_rows(&mut dist);
    dist
}

#[cfg(feature = "parallel")]
fn transform_rows(dist: &mut Array2<f64>) {
    use ndarray::Axis;
    use rayon::prelude::*;
    dist.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut row| {
        let values: Vec<f64> = row.iter().copied().collect();
        let out = lower_envelope(&values);
        for (dst, v) in row.iter_mut().zip(out) {
            *dst = v;
        }
    });
}

#[cfg(not(feature = "parallel"))]
fn transform_rows(dist: &mut Array2<f64>) {
    for mut row in dist.rows_mut() {
        let values: Vec<f64> = row.iter().copied().collect();
        let out = lower_envelope(&values);
        for (dst, v) in row.iter_mut().zip(out) {
            *dst = v;
        }
    }
}

/// 1D squared distance transform of a sampled function (Felzenszwalb & Huttenlocher)
fn lower_envelope(f: &[f64]) -> Vec<f64> {
    let n = f.len();
    let mut d = vec![INF; n];
    if n == 0 {
        return d;
    }
    let mut v = vec![0usize; n];
    let mut z = vec![0f64; n + 1];
    let mut k = 0usize;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        // z[0] is -inf, so the loop stops at k == 0
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let diff = q as f64 - v[k] as f64;
        *out = diff * diff + f[v[k]];
    }
    d
}

/// Grow a mask to every cell within `radius_px` (Euclidean) of a true cell.
///
/// The result is self-masked: cells outside the dilation are masked.
pub fn dilate(mask: &Raster, radius_px: u32) -> Raster {
    let binary = mask.truthy();
    if radius_px == 0 {
        return Raster::from_bool(mask.grid, &binary);
    }
    let dist = squared_distance_transform(&binary);
    let limit = (radius_px as f64) * (radius_px as f64);
    let grown = dist.mapv(|d| d <= limit);
    log::debug!(
        "Dilated {} -> {} cells (radius {} px)",
        binary.iter().filter(|&&b| b).count(),
        grown.iter().filter(|&&b| b).count(),
        radius_px
    );
    Raster::from_bool(mask.grid, &grown)
}

/// Dilate by a map distance using the mask's own resolution
pub fn dilate_km(mask: &Raster, distance_km: f64) -> SclResult<Raster> {
    let radius = distance_to_pixels(distance_km, mask.grid.resolution_m())?;
    Ok(dilate(mask, radius))
}
