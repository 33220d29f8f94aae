//! Vector layer to raster conversion.
//!
//! A cell takes part in a feature when the cell centre lies inside the
//! feature's geometry. Values from all covering features are combined with
//! the requested reducer, visiting features in layer order.

use crate::core::reduce::{Accumulator, Reducer};
use crate::io::vector::VectorLayer;
use crate::types::{GridSpec, Raster};

/// Rasterize one numeric property of `layer` onto `grid`.
///
/// Features lacking the property are ignored; cells covered by no feature
/// are masked.
pub fn rasterize(layer: &VectorLayer, property: &str, reducer: Reducer, grid: &GridSpec) -> Raster {
    let (rows, cols) = grid.dim();
    let mut cells: Vec<Option<Accumulator>> = vec![None; rows * cols];

    for feature in &layer.features {
        let Some(value) = feature.property(property) else { continue };
        let Some(bounds) = feature.bounds() else { continue };

        let (r_a, c_a) = grid.transform.pixel_of(bounds.min().x, bounds.min().y);
        let (r_b, c_b) = grid.transform.pixel_of(bounds.max().x, bounds.max().y);
        let r_start = r_a.min(r_b).floor().max(0.0) as usize;
        let r_end = (r_a.max(r_b).ceil().max(0.0) as usize).min(rows);
        let c_start = c_a.min(c_b).floor().max(0.0) as usize;
        let c_end = (c_a.max(c_b).ceil().max(0.0) as usize).min(cols);

        for r in r_start..r_end {
            for c in c_start..c_end {
                let (x, y) = grid.transform.cell_center(r, c);
                if feature.contains_point(x, y) {
                    cells[r * cols + c]
                        .get_or_insert_with(|| reducer.accumulator())
                        .push(value);
                }
            }
        }
    }

    let raster = Raster::from_fn(*grid, |r, c| cells[r * cols + c].as_ref().and_then(|acc| acc.finish()));
    log::debug!(
        "Rasterized '{}' from {} features: {} of {} cells covered",
        property,
        layer.len(),
        raster.valid_count(),
        grid.cell_count()
    );
    raster
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::vector::Feature;
    use crate::types::{Crs, GeoTransform};
    use geo::polygon;

    fn grid() -> GridSpec {
        // 4x4 cells of 1 unit, covering x 0..4, y 0..4
        GridSpec::new(GeoTransform::north_up(0.0, 4.0, 1.0), Crs::epsg(32647), 4, 4)
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
        Feature::from_polygon(polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)])
    }

    #[test]
    fn test_first_and_mode_reducers() {
        let layer = VectorLayer::new(vec![
            rect(0.0, 0.0, 2.0, 4.0).with_property("Zone", 1.0),
            rect(1.0, 0.0, 4.0, 4.0).with_property("Zone", 2.0),
        ]);
        let first = rasterize(&layer, "Zone", Reducer::First, &grid());
        assert_eq!(first.get(0, 0), Some(1.0));
        assert_eq!(first.get(0, 1), Some(1.0));
        assert_eq!(first.get(0, 3), Some(2.0));

        let max = rasterize(&layer, "Zone", Reducer::Max, &grid());
        assert_eq!(max.get(0, 1), Some(2.0));
    }

    #[test]
    fn test_uncovered_cells_are_masked() {
        let layer = VectorLayer::new(vec![rect(0.0, 2.0, 2.0, 4.0).with_property("ECO_ID", 42.0)]);
        let r = rasterize(&layer, "ECO_ID", Reducer::Mode, &grid());
        assert_eq!(r.valid_count(), 4);
        assert_eq!(r.get(1, 1), Some(42.0));
        assert_eq!(r.get(3, 3), None);
        assert_eq!(rasterize(&layer, "BIOME_NUM", Reducer::Mode, &grid()).valid_count(), 0);
    }
}
