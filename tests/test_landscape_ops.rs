use approx::assert_relative_eq;
use sclpoly::core::dilation::dilate;
use sclpoly::core::patch::{label_components, Connectivity, PatchFilter, PatchFilterParams};
use sclpoly::core::resolution::{area_to_pixels, distance_to_pixels};
use sclpoly::core::rules::RuleSet;
use sclpoly::core::threshold::{ThresholdCalibration, ThresholdCalibrator};
use sclpoly::{Crs, GeoTransform, GridSpec, Raster, SclError};
use std::collections::BTreeMap;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grid(rows: usize, cols: usize) -> GridSpec {
    GridSpec::new(GeoTransform::north_up(0.0, rows as f64 * 1000.0, 1000.0), Crs::epsg(32647), rows, cols)
}

fn mask(rows: &[&str]) -> Raster {
    let cells: Vec<Vec<bool>> = rows.iter().map(|r| r.chars().map(|ch| ch == '#').collect()).collect();
    Raster::from_fn(grid(rows.len(), rows[0].len()), |r, c| cells[r][c].then_some(1.0))
}

fn filter(min_size: u64) -> PatchFilter {
    PatchFilter::new(PatchFilterParams {
        min_size,
        connectivity: Connectivity::Eight,
        max_pixels: 1_000_000,
    })
}

#[test]
fn test_resolution_conversions() {
    assert_eq!(distance_to_pixels(2.0, 1000.0).unwrap(), 2);
    assert_eq!(distance_to_pixels(2.0, 300.0).unwrap(), 7);
    assert_relative_eq!(area_to_pixels(5.0, 1000.0).unwrap(), 5.0);
    assert_relative_eq!(area_to_pixels(1.0, 300.0).unwrap(), 11.111111111111111);
    assert!(matches!(distance_to_pixels(1.0, 0.0), Err(SclError::InvalidParameter(_))));
    assert!(area_to_pixels(-1.0, 1000.0).is_err());
}

#[test]
fn test_patch_sizing_is_component_local() {
    init_logging();
    let joined = mask(&["####..", "......"]);
    let split = mask(&["##..##", "......"]);

    assert_eq!(filter(4).filter(&joined).unwrap().valid_count(), 4);
    // Same four cells in two pairs: neither pair reaches the threshold
    assert_eq!(filter(4).filter(&split).unwrap().valid_count(), 0);
    assert_eq!(filter(2).filter(&split).unwrap().valid_count(), 4);
}

#[test]
fn test_diagonal_cells_connect_with_eight_neighbours() {
    let diagonal = mask(&["#..", ".#.", "..#"]);
    let eight = label_components(&diagonal.truthy(), Connectivity::Eight, 100).unwrap();
    let four = label_components(&diagonal.truthy(), Connectivity::Four, 100).unwrap();
    assert_eq!(eight.component_count(), 1);
    assert_eq!(four.component_count(), 3);
}

#[test]
fn test_budget_is_enforced_not_truncated() {
    let m = mask(&["####", "####"]);
    let err = PatchFilter::new(PatchFilterParams {
        min_size: 1,
        connectivity: Connectivity::Eight,
        max_pixels: 4,
    })
    .filter(&m)
    .unwrap_err();
    assert!(matches!(err, SclError::ComputeBudgetExceeded { cells: 8, budget: 4, .. }));
}

#[test]
fn test_dilation_joins_nearby_patches() {
    // Gap of two cells between the patches
    let m = mask(&["#..#"]);
    let grown = dilate(&m, 1);
    assert_eq!(grown.valid_count(), 4);
    let components = label_components(&grown.truthy(), Connectivity::Eight, 100).unwrap();
    assert_eq!(components.component_count(), 1);

    assert_eq!(dilate(&m, 0).valid_count(), 2);
}

#[test]
fn test_dilation_radius_is_euclidean() {
    let m = mask(&[".....", ".....", "..#..", ".....", "....."]);
    let grown = dilate(&m, 2);
    // 5x5 minus the corner cells at (±2, ±1), (±1, ±2), (±2, ±2)
    assert_eq!(grown.valid_count(), 13);
    assert_eq!(grown.get(0, 2), Some(1.0));
    assert_eq!(grown.get(0, 1), None);
}

#[test]
fn test_zone_thresholds_from_histograms() {
    init_logging();
    let g = grid(2, 4);
    let zones = Raster::from_fn(g, |_, c| Some(if c < 2 { 1.0 } else { 2.0 }));
    // Zone 1: habitat sits at the high end of the pressure range
    // Zone 2: no habitat at all
    let pressure = Raster::from_fn(g, |r, c| Some((r * 4 + c) as f64));
    let high = Raster::from_fn(g, |r, c| (c < 2 && r == 1).then_some(1.0));

    let calibrator = ThresholdCalibrator::new(ThresholdCalibration {
        bins: 7,
        empty_zone_default: None,
    });
    let thresholds = calibrator.calibrate(&zones, &pressure, &high).unwrap();
    assert_relative_eq!(thresholds.get(1).unwrap(), 5.0);
    assert_eq!(thresholds.get(2), Some(0.0));

    let with_default = ThresholdCalibrator::new(ThresholdCalibration {
        bins: 7,
        empty_zone_default: Some(3.5),
    })
    .calibrate(&zones, &pressure, &high)
    .unwrap();
    assert_eq!(with_default.get(2), Some(3.5));

    let raster = thresholds.to_raster(&zones);
    assert_relative_eq!(raster.get(0, 0).unwrap(), 5.0);
}

#[test]
fn test_rule_scenario_from_json() {
    let rules: RuleSet = serde_json::from_str(
        r#"{
            "thresholds": {"landscape_size": 3, "current_range": 2, "landscape_probability": 1, "landscape_survey_effort": 1},
            "categories": [
                {"name": "species", "predicate": {"all": [
                    {"compare": {"attribute": "size", "op": ">=", "rhs": {"threshold": "landscape_size"}}},
                    {"compare": {"attribute": "range", "op": "=", "rhs": {"threshold": "current_range"}}}
                ]}},
                {"name": "tiny", "predicate": {"compare": {"attribute": "size", "op": "<", "rhs": {"value": 2}}}}
            ]
        }"#,
    )
    .unwrap();
    rules.validate().unwrap();

    let polygon: BTreeMap<String, f64> =
        [("size", 5.0), ("range", 2.0)].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    assert_eq!(rules.categories_of(&polygon), vec!["species"]);

    let standard = RuleSet::standard();
    let mut polygon = polygon;
    polygon.insert("probability".to_string(), 1.0);
    polygon.insert("effort".to_string(), 1.0);
    assert_eq!(standard.categories_of(&polygon), vec!["species"]);
}
