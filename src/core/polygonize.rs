//! Raster to polygon conversion with per-band attribute reduction.
//!
//! Contiguous cells sharing a label become one polygon. Every attribute band
//! is reduced over the polygon's member cells, skipping masked cells. The
//! processed-cell budget is checked before any work is done.

use crate::core::patch::{label_classes, ComponentLabels, Connectivity};
use crate::core::reduce::Reducer;
use crate::core::resample::{Reprojector, Resampling};
use crate::core::rules::Attributes;
use crate::types::{GridSpec, Raster, SclError, SclResult};
use geo::{Area, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An attribute band and how to reduce it
#[derive(Debug, Clone)]
pub struct BandSpec {
    pub name: String,
    pub raster: Raster,
    pub reducer: Reducer,
}

impl BandSpec {
    pub fn new(name: &str, raster: Raster, reducer: Reducer) -> Self {
        Self {
            name: name.to_string(),
            raster,
            reducer,
        }
    }
}

/// Polygonization parameters
#[derive(Debug, Clone)]
pub struct PolygonizeParams {
    /// Output grid (resolution and CRS)
    pub grid: GridSpec,
    /// Cells whose centre falls outside are ignored
    pub bounds: Option<Polygon<f64>>,
    pub connectivity: Connectivity,
    pub max_pixels: u64,
}

/// Polygon produced from a labelled region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledPolygon {
    pub label: i64,
    pub cell_count: u64,
    pub geometry: MultiPolygon<f64>,
    /// Reduced band values; absent when no member cell was valid
    pub attributes: BTreeMap<String, f64>,
}

impl Attributes for LabeledPolygon {
    fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }
}

/// Final exported polygon with its run-local id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedPolygon {
    /// 1-based, in polygon order
    pub poly_id: u64,
    pub label: i64,
    pub cell_count: u64,
    pub geometry: MultiPolygon<f64>,
    pub attributes: BTreeMap<String, f64>,
}

impl Attributes for ClassifiedPolygon {
    fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }
}

/// Groups labelled cells into polygons and aggregates bands
pub struct Polygonizer<'a> {
    params: PolygonizeParams,
    reprojector: &'a dyn Reprojector,
}

impl<'a> Polygonizer<'a> {
    pub fn new(params: PolygonizeParams, reprojector: &'a dyn Reprojector) -> Self {
        Self { params, reprojector }
    }

    pub fn reduce_to_polygons(&self, label: &Raster, bands: &[BandSpec]) -> SclResult<Vec<LabeledPolygon>> {
        let grid = self.params.grid;
        let cells = grid.cell_count() as u64;
        if cells > self.params.max_pixels {
            return Err(SclError::ComputeBudgetExceeded {
                stage: "reduce_to_polygons".to_string(),
                cells,
                budget: self.params.max_pixels,
            });
        }

        log::info!("🧩 Polygonizing {}x{} grid with {} attribute bands", grid.rows, grid.cols, bands.len());

        let label = self.reprojector.reproject(label, &grid, Resampling::Nearest)?;
        let inside = self.inside_mask(&grid);
        let components = label_classes(
            grid.dim(),
            |r, c| {
                if inside[[r, c]] {
                    label.get(r, c).map(|v| v.round() as i64)
                } else {
                    None
                }
            },
            self.params.connectivity,
            self.params.max_pixels,
            "reduce_to_polygons",
        )?;

        let aligned = bands
            .iter()
            .map(|b| {
                let raster = self.reprojector.reproject(&b.raster, &grid, Resampling::Nearest)?;
                Ok((b.name.as_str(), raster, b.reducer))
            })
            .collect::<SclResult<Vec<_>>>()?;

        let reduced = reduce_bands(&components, &aligned);
        let rings = trace_rings(&components.labels, components.component_count());

        let mut first_cell = vec![None; components.sizes.len()];
        for ((r, c), &l) in components.labels.indexed_iter() {
            if l != 0 && first_cell[l as usize].is_none() {
                first_cell[l as usize] = Some((r, c));
            }
        }

        let mut polygons = Vec::with_capacity(components.component_count());
        for (id, ring_set) in rings.into_iter().enumerate().skip(1) {
            let Some((r, c)) = first_cell[id] else { continue };
            let label_value = label.get(r, c).map(|v| v.round() as i64).unwrap_or_default();
            let mut attributes = BTreeMap::new();
            for (band_idx, (name, _, _)) in aligned.iter().enumerate() {
                if let Some(v) = reduced[band_idx][id] {
                    attributes.insert(name.to_string(), v);
                }
            }
            polygons.push(LabeledPolygon {
                label: label_value,
                cell_count: components.sizes[id],
                geometry: ring_set.to_geometry(&grid),
                attributes,
            });
        }

        log::info!("✅ Produced {} polygons", polygons.len());
        Ok(polygons)
    }

    fn inside_mask(&self, grid: &GridSpec) -> Array2<bool> {
        match &self.params.bounds {
            None => Array2::from_elem(grid.dim(), true),
            Some(bounds) => Array2::from_shape_fn(grid.dim(), |(r, c)| {
                let (x, y) = grid.transform.cell_center(r, c);
                bounds.contains(&Point::new(x, y))
            }),
        }
    }
}

type AlignedBand<'b> = (&'b str, Raster, Reducer);

fn reduce_band(components: &ComponentLabels, raster: &Raster, reducer: Reducer) -> Vec<Option<f64>> {
    let mut accs: Vec<_> = (0..components.sizes.len()).map(|_| reducer.accumulator()).collect();
    for ((r, c), &l) in components.labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        if let Some(v) = raster.get(r, c) {
            accs[l as usize].push(v);
        }
    }
    accs.iter().map(|a| a.finish()).collect()
}

#[cfg(feature = "parallel")]
fn reduce_bands(components: &ComponentLabels, bands: &[AlignedBand<'_>]) -> Vec<Vec<Option<f64>>> {
    use rayon::prelude::*;
    bands
        .par_iter()
        .map(|(_, raster, reducer)| reduce_band(components, raster, *reducer))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn reduce_bands(components: &ComponentLabels, bands: &[AlignedBand<'_>]) -> Vec<Vec<Option<f64>>> {
    bands
        .iter()
        .map(|(_, raster, reducer)| reduce_band(components, raster, *reducer))
        .collect()
}

/// Rings of one component in (col, row) corner coordinates
#[derive(Debug, Default, Clone)]
struct RingSet {
    rings: Vec<Vec<(i64, i64)>>,
}

impl RingSet {
    fn to_geometry(&self, grid: &GridSpec) -> MultiPolygon<f64> {
        let to_pixel_polygon = |ring: &Vec<(i64, i64)>| {
            Polygon::new(
                LineString::from(ring.iter().map(|&(x, y)| (x as f64, y as f64)).collect::<Vec<_>>()),
                vec![],
            )
        };

        let mut exteriors = Vec::new();
        let mut holes = Vec::new();
        for ring in &self.rings {
            if signed_area(ring) > 0 {
                exteriors.push(ring);
            } else {
                holes.push(ring);
            }
        }

        let pixel_exteriors: Vec<Polygon<f64>> = exteriors.iter().map(|r| to_pixel_polygon(r)).collect();
        let mut interiors: Vec<Vec<&Vec<(i64, i64)>>> = vec![Vec::new(); exteriors.len()];
        for hole in holes {
            let inside = hole_sample_point(hole);
            let owner = pixel_exteriors
                .iter()
                .enumerate()
                .filter(|(_, p)| p.contains(&inside))
                .min_by(|(_, a), (_, b)| a.unsigned_area().total_cmp(&b.unsigned_area()))
                .map(|(i, _)| i);
            if let Some(i) = owner {
                interiors[i].push(hole);
            }
        }

        let to_map = |ring: &Vec<(i64, i64)>| -> LineString<f64> {
            LineString::from(
                ring.iter()
                    .map(|&(col, row)| {
                        let (x, y) = grid.transform.map_coord(row as f64, col as f64);
                        Coord { x, y }
                    })
                    .collect::<Vec<_>>(),
            )
        };

        MultiPolygon::new(
            exteriors
                .iter()
                .zip(interiors)
                .map(|(ext, ints)| Polygon::new(to_map(ext), ints.into_iter().map(to_map).collect()))
                .collect(),
        )
    }
}

/// Twice the signed area in (col, row) space; exteriors are positive
fn signed_area(ring: &[(i64, i64)]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

/// A point just inside the area a hole ring encloses
fn hole_sample_point(ring: &[(i64, i64)]) -> Point<f64> {
    let (x0, y0) = ring[0];
    let (x1, y1) = ring[1 % ring.len()];
    let (dx, dy) = ((x1 - x0).signum() as f64, (y1 - y0).signum() as f64);
    // members sit on the right of travel, the hole on the left
    Point::new(x0 as f64 + dx * 0.5 + dy * 0.25, y0 as f64 + dy * 0.5 - dx * 0.25)
}

/// Trace cell-edge boundaries of every component.
///
/// Edges run with the component on their right (row axis pointing down), so
/// outer rings come out with positive signed area and holes negative. At
/// pinch vertices the right-most turn is taken, which keeps rings simple.
fn trace_rings(labels: &Array2<u32>, count: usize) -> Vec<RingSet> {
    let (rows, cols) = labels.dim();
    let at = |r: i64, c: i64| -> u32 {
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            0
        } else {
            labels[[r as usize, c as usize]]
        }
    };

    // edges[label] : start vertex -> outgoing directions
    let mut edges: Vec<BTreeMap<(i64, i64), Vec<(i64, i64)>>> = vec![BTreeMap::new(); count + 1];
    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            let l = at(r, c);
            if l == 0 {
                continue;
            }
            let e = &mut edges[l as usize];
            if at(r - 1, c) != l {
                e.entry((c, r)).or_default().push((1, 0));
            }
            if at(r, c + 1) != l {
                e.entry((c + 1, r)).or_default().push((0, 1));
            }
            if at(r + 1, c) != l {
                e.entry((c + 1, r + 1)).or_default().push((-1, 0));
            }
            if at(r, c - 1) != l {
                e.entry((c, r + 1)).or_default().push((0, -1));
            }
        }
    }

    edges
        .into_iter()
        .map(|mut outgoing| {
            let mut set = RingSet::default();
            // exhausted vertices are removed, so the first key always has edges left
            while let Some(&start) = outgoing.keys().next() {
                let mut ring = vec![start];
                let mut vertex = start;
                let mut dir = take_edge(&mut outgoing, vertex, None);
                while let Some(d) = dir {
                    vertex = (vertex.0 + d.0, vertex.1 + d.1);
                    if vertex == start && !outgoing.contains_key(&vertex) {
                        break;
                    }
                    ring.push(vertex);
                    dir = take_edge(&mut outgoing, vertex, Some(d));
                }
                set.rings.push(simplify(ring));
            }
            set
        })
        .collect()
}

fn take_edge(
    outgoing: &mut BTreeMap<(i64, i64), Vec<(i64, i64)>>,
    vertex: (i64, i64),
    incoming: Option<(i64, i64)>,
) -> Option<(i64, i64)> {
    let dirs = outgoing.get_mut(&vertex)?;
    let idx = match incoming {
        None => 0,
        Some((dx, dy)) => {
            // right, straight, left in screen orientation
            let preference = [(-dy, dx), (dx, dy), (dy, -dx)];
            preference
                .iter()
                .find_map(|p| dirs.iter().position(|d| d == p))
                .unwrap_or(0)
        }
    };
    let dir = dirs.swap_remove(idx);
    if dirs.is_empty() {
        outgoing.remove(&vertex);
    }
    Some(dir)
}

/// Drop vertices where the boundary runs straight through
fn simplify(ring: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    let n = ring.len();
    if n < 4 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            let d0 = (cur.0 - prev.0, cur.1 - prev.1);
            let d1 = (next.0 - cur.0, next.1 - cur.1);
            d0.0 * d1.1 - d0.1 * d1.0 != 0
        })
        .map(|i| ring[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch::label_components;
    use crate::core::resample::GridResampler;
    use crate::types::{Crs, GeoTransform};
    use geo::polygon;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(GeoTransform::north_up(0.0, rows as f64, 1.0), Crs::epsg(32647), rows, cols)
    }

    fn raster(rows: &[&[f64]]) -> Raster {
        let g = grid(rows.len(), rows[0].len());
        Raster::from_fn(g, |r, c| {
            let v = rows[r][c];
            if v.is_nan() {
                None
            } else {
                Some(v)
            }
        })
    }

    fn polygonizer(g: GridSpec, max_pixels: u64) -> Polygonizer<'static> {
        Polygonizer::new(
            PolygonizeParams {
                grid: g,
                bounds: None,
                connectivity: Connectivity::Eight,
                max_pixels,
            },
            &GridResampler,
        )
    }

    const N: f64 = f64::NAN;

    #[test]
    fn test_groups_same_label_and_reduces_bands() {
        let label = raster(&[&[1.0, 1.0, 2.0], &[1.0, N, 2.0]]);
        let category = raster(&[&[5.0, 7.0, 1.0], &[7.0, 3.0, 1.0]]);
        let area = raster(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let flag = raster(&[&[0.0, 1.0, 0.0], &[N, 1.0, N]]);
        let bands = vec![
            BandSpec::new("category", category, Reducer::Mode),
            BandSpec::new("area", area, Reducer::Sum),
            BandSpec::new("flag", flag, Reducer::Max),
        ];
        let polys = polygonizer(grid(2, 3), 100).reduce_to_polygons(&label, &bands).unwrap();
        assert_eq!(polys.len(), 2);

        let a = &polys[0];
        assert_eq!(a.label, 1);
        assert_eq!(a.cell_count, 3);
        assert_eq!(a.attributes["category"], 7.0);
        assert_eq!(a.attributes["area"], 7.0);
        assert_eq!(a.attributes["flag"], 1.0);

        let b = &polys[1];
        assert_eq!(b.label, 2);
        assert_eq!(b.attributes["area"], 9.0);
        assert_eq!(b.attributes["flag"], 0.0);
    }

    #[test]
    fn test_missing_band_values_leave_attribute_absent() {
        let label = raster(&[&[1.0, 1.0]]);
        let band = raster(&[&[N, N]]);
        let polys = polygonizer(grid(1, 2), 100)
            .reduce_to_polygons(&label, &[BandSpec::new("pa", band, Reducer::Sum)])
            .unwrap();
        assert!(!polys[0].attributes.contains_key("pa"));
    }

    #[test]
    fn test_budget_exceeded_is_an_error() {
        let label = raster(&[&[1.0, 1.0], &[1.0, 1.0]]);
        let err = polygonizer(grid(2, 2), 3).reduce_to_polygons(&label, &[]).unwrap_err();
        assert!(matches!(err, SclError::ComputeBudgetExceeded { cells: 4, budget: 3, .. }));
    }

    #[test]
    fn test_ring_with_hole() {
        let label = raster(&[&[1.0, 1.0, 1.0], &[1.0, N, 1.0], &[1.0, 1.0, 1.0]]);
        let polys = polygonizer(grid(3, 3), 100).reduce_to_polygons(&label, &[]).unwrap();
        assert_eq!(polys.len(), 1);
        let geom = &polys[0].geometry;
        assert_eq!(geom.0.len(), 1);
        assert_eq!(geom.0[0].interiors().len(), 1);
        assert!((geom.unsigned_area() - 8.0).abs() < 1e-9);
        // simplified to the 4 corners (+ closing point)
        assert_eq!(geom.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_l_shape_area_and_bounds_clip() {
        let label = raster(&[&[3.0, N], &[3.0, 3.0]]);
        let polys = polygonizer(grid(2, 2), 100).reduce_to_polygons(&label, &[]).unwrap();
        assert!((polys[0].geometry.unsigned_area() - 3.0).abs() < 1e-9);

        let mut params = PolygonizeParams {
            grid: grid(2, 2),
            bounds: Some(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 2.0), (x: 0.0, y: 2.0)]),
            connectivity: Connectivity::Eight,
            max_pixels: 100,
        };
        let clipped = Polygonizer::new(params.clone(), &GridResampler)
            .reduce_to_polygons(&label, &[])
            .unwrap();
        assert_eq!(clipped[0].cell_count, 2);
        params.bounds = None;
        assert_eq!(Polygonizer::new(params, &GridResampler).reduce_to_polygons(&label, &[]).unwrap()[0].cell_count, 3);
    }

    #[test]
    fn test_lattice_of_single_cell_holes() {
        let g = grid(61, 61);
        let label = Raster::from_fn(g, |r, c| (r % 2 == 0 || c % 2 == 0).then_some(1.0));
        let components = label_components(&label.truthy(), Connectivity::Eight, 10_000).unwrap();
        let rings = trace_rings(&components.labels, components.component_count());
        assert_eq!(rings[1].rings.len(), 1 + 30 * 30);

        let polys = polygonizer(g, 10_000).reduce_to_polygons(&label, &[]).unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].geometry.0[0].interiors().len(), 900);
        assert!((polys[0].geometry.unsigned_area() - (61.0 * 61.0 - 900.0)).abs() < 1e-6);
    }

    #[test]
    fn test_diagonal_cells_form_one_polygon_with_two_rings() {
        let label = raster(&[&[1.0, N], &[N, 1.0]]);
        let polys = polygonizer(grid(2, 2), 100).reduce_to_polygons(&label, &[]).unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].geometry.0.len(), 2);
        assert!((polys[0].geometry.unsigned_area() - 2.0).abs() < 1e-9);
    }
}
