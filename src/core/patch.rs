//! Connected-component labelling and patch size filtering.

use crate::core::resample::{Reprojector, Resampling};
use crate::types::{GridSpec, Raster, SclError, SclResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Neighbourhood rule for connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl Connectivity {
    /// Neighbours already visited in a row-major scan
    fn backward_offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (0, -1)],
            Connectivity::Eight => &[(-1, -1), (-1, 0), (-1, 1), (0, -1)],
        }
    }

    pub fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (0, -1), (0, 1), (1, 0)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// Result of component labelling
#[derive(Debug, Clone)]
pub struct ComponentLabels {
    /// 0 = background, components numbered 1.. in row-major first-seen order
    pub labels: Array2<u32>,
    /// Cell count per component; index 0 is unused
    pub sizes: Vec<u64>,
}

impl ComponentLabels {
    pub fn component_count(&self) -> usize {
        self.sizes.len().saturating_sub(1)
    }

    pub fn size_at(&self, row: usize, col: usize) -> u64 {
        match self.labels[[row, col]] {
            0 => 0,
            label => self.sizes[label as usize],
        }
    }
}

struct DisjointSet {
    parent: Vec<u32>,
}

impl DisjointSet {
    fn new() -> Self {
        Self { parent: vec![0] }
    }

    fn make(&mut self) -> u32 {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        id
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // keep the smaller root so labels follow scan order
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop as usize] = keep;
        }
    }
}

/// Label groups of connected cells sharing the same class.
///
/// `class_of` returns `None` for background cells; neighbours join a component
/// only when their class is equal. Fails when the grid holds more than
/// `max_pixels` cells.
pub fn label_classes<F>(
    dim: (usize, usize),
    class_of: F,
    connectivity: Connectivity,
    max_pixels: u64,
    stage: &str,
) -> SclResult<ComponentLabels>
where
    F: Fn(usize, usize) -> Option<i64>,
{
    let (rows, cols) = dim;
    let cells = (rows * cols) as u64;
    if cells > max_pixels {
        return Err(SclError::ComputeBudgetExceeded {
            stage: stage.to_string(),
            cells,
            budget: max_pixels,
        });
    }

    let mut provisional = Array2::<u32>::zeros(dim);
    let mut classes = Array2::<i64>::zeros(dim);
    let mut sets = DisjointSet::new();

    // First pass: provisional labels and equivalences
    for r in 0..rows {
        for c in 0..cols {
            let Some(class) = class_of(r, c) else { continue };
            classes[[r, c]] = class;
            let mut label = 0u32;
            for &(dr, dc) in connectivity.backward_offsets() {
                let (nr, nc) = (r as isize + dr, c as isize + dc);
                if nr < 0 || nc < 0 || nc >= cols as isize {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                let neighbour = provisional[[nr, nc]];
                if neighbour == 0 || classes[[nr, nc]] != class {
                    continue;
                }
                if label == 0 {
                    label = neighbour;
                } else {
                    sets.union(label, neighbour);
                }
            }
            provisional[[r, c]] = if label == 0 { sets.make() } else { label };
        }
    }

    // Second pass: compact roots into 1..n in first-seen order
    let mut compact = vec![0u32; sets.parent.len()];
    let mut sizes = vec![0u64];
    let mut labels = Array2::<u32>::zeros(dim);
    for r in 0..rows {
        for c in 0..cols {
            let p = provisional[[r, c]];
            if p == 0 {
                continue;
            }
            let root = sets.find(p) as usize;
            if compact[root] == 0 {
                sizes.push(0);
                compact[root] = (sizes.len() - 1) as u32;
            }
            let label = compact[root];
            labels[[r, c]] = label;
            sizes[label as usize] += 1;
        }
    }

    log::debug!("{}: {} components over {} cells", stage, sizes.len() - 1, cells);
    Ok(ComponentLabels { labels, sizes })
}

/// Label connected true cells of a binary mask
pub fn label_components(
    mask: &Array2<bool>,
    connectivity: Connectivity,
    max_pixels: u64,
) -> SclResult<ComponentLabels> {
    label_classes(
        mask.dim(),
        |r, c| if mask[[r, c]] { Some(1) } else { None },
        connectivity,
        max_pixels,
        "connected components",
    )
}

/// Patch filter parameters
#[derive(Debug, Clone)]
pub struct PatchFilterParams {
    /// Minimum component size in pixels at the mask's native resolution
    pub min_size: u64,
    pub connectivity: Connectivity,
    pub max_pixels: u64,
}

/// Keeps only patches at or above a minimum size
pub struct PatchFilter {
    params: PatchFilterParams,
}

impl PatchFilter {
    pub fn new(params: PatchFilterParams) -> Self {
        Self { params }
    }

    /// Filter in the mask's native grid; the result is self-masked
    pub fn filter(&self, mask: &Raster) -> SclResult<Raster> {
        let binary = mask.truthy();
        let components = label_components(&binary, self.params.connectivity, self.params.max_pixels)?;
        let keep = Array2::from_shape_fn(binary.dim(), |(r, c)| {
            binary[[r, c]] && components.size_at(r, c) >= self.params.min_size
        });
        log::debug!(
            "Patch filter kept {} of {} cells (min size {} px)",
            keep.iter().filter(|&&k| k).count(),
            binary.iter().filter(|&&k| k).count(),
            self.params.min_size
        );
        Ok(Raster::from_bool(mask.grid, &keep))
    }

    /// Filter, then bring the result onto the canonical grid
    pub fn filter_to_grid(
        &self,
        mask: &Raster,
        canonical: &GridSpec,
        reprojector: &dyn Reprojector,
    ) -> SclResult<Raster> {
        let filtered = self.filter(mask)?;
        let out = reprojector.reproject(&filtered, canonical, Resampling::Nearest)?;
        Ok(out.self_mask())
    }
}

/// Per-cell size of the containing component, capped at `max_size`.
///
/// Background cells are masked.
pub fn connected_pixel_count(
    mask: &Raster,
    max_size: u64,
    connectivity: Connectivity,
    max_pixels: u64,
) -> SclResult<Raster> {
    let binary = mask.truthy();
    let components = label_components(&binary, connectivity, max_pixels)?;
    Ok(Raster::from_fn(mask.grid, |r, c| {
        if binary[[r, c]] {
            Some(components.size_at(r, c).min(max_size) as f64)
        } else {
            None
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resample::GridResampler;
    use crate::types::{Crs, GeoTransform};

    fn grid(rows: usize, cols: usize, size: f64) -> GridSpec {
        GridSpec::new(GeoTransform::north_up(0.0, rows as f64 * size, size), Crs::epsg(32647), rows, cols)
    }

    fn mask_from(rows: &[&str]) -> Raster {
        let g = grid(rows.len(), rows[0].len(), 1000.0);
        Raster::from_fn(g, |r, c| {
            if rows[r].as_bytes()[c] == b'#' {
                Some(1.0)
            } else {
                None
            }
        })
    }

    fn filter(min_size: u64) -> PatchFilter {
        PatchFilter::new(PatchFilterParams {
            min_size,
            connectivity: Connectivity::Eight,
            max_pixels: 1_000_000,
        })
    }

    #[test]
    fn test_component_survives_iff_large_enough() {
        let m = mask_from(&["####....", "........"]);
        assert_eq!(filter(4).filter(&m).unwrap().valid_count(), 4);
        assert_eq!(filter(5).filter(&m).unwrap().valid_count(), 0);
    }

    #[test]
    fn test_sizing_is_component_local() {
        // Two components of 3 cells each: combined 6 >= 4 but neither survives
        let m = mask_from(&["###.###", "......."]);
        assert_eq!(filter(4).filter(&m).unwrap().valid_count(), 0);
        assert_eq!(filter(3).filter(&m).unwrap().valid_count(), 6);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let m = mask_from(&["#..", ".#.", "..#"]);
        let eight = label_components(&m.truthy(), Connectivity::Eight, 100).unwrap();
        let four = label_components(&m.truthy(), Connectivity::Four, 100).unwrap();
        assert_eq!(eight.component_count(), 1);
        assert_eq!(four.component_count(), 3);
    }

    #[test]
    fn test_u_shape_merges_and_labels_in_scan_order() {
        let m = mask_from(&["#.#", "#.#", "###"]);
        let labels = label_components(&m.truthy(), Connectivity::Four, 100).unwrap();
        assert_eq!(labels.component_count(), 1);
        assert_eq!(labels.labels[[0, 2]], 1);
        assert_eq!(labels.sizes[1], 7);
    }

    #[test]
    fn test_budget_is_enforced() {
        let m = mask_from(&["####", "####"]);
        let err = label_components(&m.truthy(), Connectivity::Eight, 7).unwrap_err();
        assert!(matches!(err, SclError::ComputeBudgetExceeded { cells: 8, budget: 7, .. }));
    }

    #[test]
    fn test_connected_pixel_count_caps() {
        let m = mask_from(&["#####.#"]);
        let counts = connected_pixel_count(&m, 3, Connectivity::Eight, 100).unwrap();
        assert_eq!(counts.get(0, 0), Some(3.0));
        assert_eq!(counts.get(0, 5), None);
        assert_eq!(counts.get(0, 6), Some(1.0));
    }

    #[test]
    fn test_filter_to_canonical_grid() {
        let m = mask_from(&["##..", "##.."]);
        let canonical = grid(1, 2, 2000.0);
        let out = filter(4)
            .filter_to_grid(&m, &canonical, &GridResampler)
            .unwrap();
        assert!(out.grid.same_as(&canonical));
        assert_eq!(out.get(0, 0), Some(1.0));
        assert_eq!(out.get(0, 1), None);
    }

    #[test]
    fn test_deterministic() {
        let m = mask_from(&["#.#.#", ".#.#.", "#...#"]);
        let a = label_components(&m.truthy(), Connectivity::Eight, 100).unwrap();
        let b = label_components(&m.truthy(), Connectivity::Eight, 100).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.sizes, b.sizes);
    }
}
