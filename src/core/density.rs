//! Density-driven minimum patch sizes.
//!
//! Each ecoregion carries up to three density estimates (animals per 100 km²)
//! in priority order. The first positive estimate wins, otherwise a global
//! default applies. The density gives the area needed to sustain a core
//! population, which becomes a pixel threshold for core patches; stepping
//! stones get a fixed fraction of it.

use crate::core::resolution::area_to_pixels;
use crate::io::vector::VectorLayer;
use crate::types::{Raster, SclError, SclResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which estimate supplied an ecoregion's density
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DensitySource {
    Primary,
    Secondary,
    Tertiary,
    GlobalDefault,
}

/// Density estimates for one ecoregion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityRecord {
    pub ecoregion: i64,
    pub primary: Option<f64>,
    pub secondary: Option<f64>,
    pub tertiary: Option<f64>,
}

impl DensityRecord {
    /// First positive estimate in priority order, else `default`
    pub fn resolve(&self, default: f64) -> (f64, DensitySource) {
        let candidates = [
            (self.primary, DensitySource::Primary),
            (self.secondary, DensitySource::Secondary),
            (self.tertiary, DensitySource::Tertiary),
        ];
        candidates
            .iter()
            .find_map(|&(value, source)| value.filter(|v| *v > 0.0).map(|v| (v, source)))
            .unwrap_or((default, DensitySource::GlobalDefault))
    }
}

/// Property names used to read density records from a vector layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityFields {
    pub ecoregion: String,
    pub primary: String,
    pub secondary: String,
    pub tertiary: String,
}

impl Default for DensityFields {
    fn default() -> Self {
        Self {
            ecoregion: "ECO_ID".to_string(),
            primary: "MED_DENSITY_ECO".to_string(),
            secondary: "MED_DENSITY_BIOME".to_string(),
            tertiary: "MED_DENSITY_REALM".to_string(),
        }
    }
}

/// Absolute bounds in km²
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub min: f64,
    pub max: f64,
}

/// Minimum-size policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimumSizePolicy {
    pub n_core_animals: f64,
    pub core_to_step_ratio: f64,
    pub core_size_limits: SizeLimits,
    pub step_size_limits: SizeLimits,
    /// Density used when no estimate is positive
    #[serde(default = "default_density")]
    pub default_density: f64,
}

fn default_density() -> f64 {
    1.0
}

impl Default for MinimumSizePolicy {
    fn default() -> Self {
        Self {
            n_core_animals: 5.0,
            core_to_step_ratio: 0.1,
            core_size_limits: SizeLimits { min: 30.0, max: 625.0 },
            step_size_limits: SizeLimits { min: 3.0, max: 63.0 },
            default_density: default_density(),
        }
    }
}

impl MinimumSizePolicy {
    pub fn validate(&self) -> SclResult<()> {
        let bad = |msg: String| Err(SclError::Config(msg));
        if !(self.n_core_animals > 0.0) {
            return bad(format!("n_core_animals must be positive, got {}", self.n_core_animals));
        }
        if !(self.core_to_step_ratio > 0.0 && self.core_to_step_ratio <= 1.0) {
            return bad(format!("core_to_step_ratio must be in (0, 1], got {}", self.core_to_step_ratio));
        }
        if !(self.default_density > 0.0) {
            return bad(format!("default_density must be positive, got {}", self.default_density));
        }
        for (name, limits) in [("core", self.core_size_limits), ("step", self.step_size_limits)] {
            if !(limits.min >= 0.0 && limits.min <= limits.max) {
                return bad(format!("{} size limits must satisfy 0 <= min <= max, got {:?}", name, limits));
            }
        }
        Ok(())
    }
}

/// Resolved thresholds for one ecoregion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinimumSize {
    pub density: f64,
    pub source: DensitySource,
    /// Unclamped area sustaining `n_core_animals`
    pub min_core_area_km2: f64,
    pub core_px: u64,
    pub stepping_stone_px: u64,
}

/// Turns density records into per-ecoregion pixel thresholds
pub struct DensityResolver {
    policy: MinimumSizePolicy,
    resolution_m: f64,
}

impl DensityResolver {
    pub fn new(policy: MinimumSizePolicy, resolution_m: f64) -> SclResult<Self> {
        policy.validate()?;
        area_to_pixels(1.0, resolution_m)?;
        Ok(Self { policy, resolution_m })
    }

    fn px(&self, area_km2: f64) -> SclResult<u64> {
        Ok(area_to_pixels(area_km2, self.resolution_m)?.floor() as u64)
    }

    /// Pixel bounds for (core, stepping stone)
    pub fn pixel_limits(&self) -> SclResult<((u64, u64), (u64, u64))> {
        let core = self.policy.core_size_limits;
        let step = self.policy.step_size_limits;
        Ok((
            (self.px(core.min)?, self.px(core.max)?),
            (self.px(step.min)?, self.px(step.max)?),
        ))
    }

    pub fn resolve_record(&self, record: &DensityRecord) -> SclResult<MinimumSize> {
        let ((core_min, core_max), (step_min, step_max)) = self.pixel_limits()?;
        let (density, source) = record.resolve(self.policy.default_density);
        let min_core_area_km2 = self.policy.n_core_animals / density * 100.0;
        let core_px = self.px(min_core_area_km2)?.clamp(core_min, core_max);
        let stepping_stone_px = ((core_px as f64 * self.policy.core_to_step_ratio).floor() as u64)
            .clamp(step_min, step_max);
        Ok(MinimumSize {
            density,
            source,
            min_core_area_km2,
            core_px,
            stepping_stone_px,
        })
    }

    /// Thresholds for every ecoregion in `records`; the first record wins on duplicates
    pub fn resolve(&self, records: &[DensityRecord]) -> SclResult<BTreeMap<i64, MinimumSize>> {
        let mut table = BTreeMap::new();
        for record in records {
            if table.contains_key(&record.ecoregion) {
                log::warn!("Duplicate density record for ecoregion {}; keeping the first", record.ecoregion);
                continue;
            }
            table.insert(record.ecoregion, self.resolve_record(record)?);
        }
        let fallbacks = table.values().filter(|m| m.source == DensitySource::GlobalDefault).count();
        log::info!(
            "Resolved minimum sizes for {} ecoregions ({} on global default density)",
            table.len(),
            fallbacks
        );
        Ok(table)
    }

    /// (min core size, min stepping stone size) rasters in pixels.
    ///
    /// Ecoregions without a record are masked, which keeps them out of
    /// core and stepping-stone classification.
    pub fn size_rasters(table: &BTreeMap<i64, MinimumSize>, ecoregions: &Raster) -> (Raster, Raster) {
        let core: BTreeMap<i64, f64> = table.iter().map(|(&k, m)| (k, m.core_px as f64)).collect();
        let step: BTreeMap<i64, f64> = table.iter().map(|(&k, m)| (k, m.stepping_stone_px as f64)).collect();
        (ecoregions.remap(&core), ecoregions.remap(&step))
    }
}

/// Read density records from a layer; features without an ecoregion id are skipped
pub fn records_from_layer(layer: &VectorLayer, fields: &DensityFields) -> Vec<DensityRecord> {
    layer
        .features
        .iter()
        .filter_map(|f| {
            let ecoregion = f.property(&fields.ecoregion)?.round() as i64;
            Some(DensityRecord {
                ecoregion,
                primary: f.property(&fields.primary),
                secondary: f.property(&fields.secondary),
                tertiary: f.property(&fields.tertiary),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::vector::Feature;
    use crate::types::{Crs, GeoTransform, GridSpec};
    use geo::MultiPolygon;

    fn record(p: Option<f64>, s: Option<f64>, t: Option<f64>) -> DensityRecord {
        DensityRecord { ecoregion: 1, primary: p, secondary: s, tertiary: t }
    }

    #[test]
    fn test_fallback_chain() {
        assert_eq!(record(Some(2.0), Some(3.0), None).resolve(1.0), (2.0, DensitySource::Primary));
        assert_eq!(record(Some(0.0), Some(3.0), None).resolve(1.0), (3.0, DensitySource::Secondary));
        assert_eq!(record(Some(-1.0), None, Some(0.5)).resolve(1.0), (0.5, DensitySource::Tertiary));
        assert_eq!(record(Some(0.0), Some(-2.0), Some(0.0)).resolve(1.0), (1.0, DensitySource::GlobalDefault));
        assert_eq!(record(None, None, None).resolve(1.0), (1.0, DensitySource::GlobalDefault));
    }

    #[test]
    fn test_min_sizes_at_1km() {
        let resolver = DensityResolver::new(MinimumSizePolicy::default(), 1000.0).unwrap();

        // 5 animals at 2 per 100 km² -> 250 km²
        let m = resolver.resolve_record(&record(Some(2.0), None, None)).unwrap();
        assert_eq!(m.core_px, 250);
        assert_eq!(m.stepping_stone_px, 25);

        // default density 1 -> 500 km²
        let m = resolver.resolve_record(&record(None, None, None)).unwrap();
        assert_eq!(m.core_px, 500);
        assert_eq!(m.stepping_stone_px, 50);

        // very high density clamps to the lower bounds
        let m = resolver.resolve_record(&record(Some(100.0), None, None)).unwrap();
        assert_eq!(m.core_px, 30);
        assert_eq!(m.stepping_stone_px, 3);

        // very low density clamps to the upper bounds
        let m = resolver.resolve_record(&record(Some(0.1), None, None)).unwrap();
        assert_eq!(m.core_px, 625);
        assert_eq!(m.stepping_stone_px, 62);
    }

    #[test]
    fn test_unmapped_ecoregions_are_masked() {
        let resolver = DensityResolver::new(MinimumSizePolicy::default(), 1000.0).unwrap();
        let records = vec![
            DensityRecord { ecoregion: 10, primary: Some(2.0), secondary: None, tertiary: None },
            DensityRecord { ecoregion: 10, primary: Some(50.0), secondary: None, tertiary: None },
        ];
        let table = resolver.resolve(&records).unwrap();
        assert_eq!(table[&10].core_px, 250);

        let grid = GridSpec::new(GeoTransform::north_up(0.0, 0.0, 1000.0), Crs::epsg(32647), 1, 2);
        let eco = Raster::from_fn(grid, |_, c| Some(if c == 0 { 10.0 } else { 99.0 }));
        let (core, step) = DensityResolver::size_rasters(&table, &eco);
        assert_eq!(core.get(0, 0), Some(250.0));
        assert_eq!(core.get(0, 1), None);
        assert_eq!(step.get(0, 1), None);
    }

    #[test]
    fn test_records_from_layer() {
        let layer = VectorLayer::new(vec![
            Feature::new(MultiPolygon::new(vec![]))
                .with_property("ECO_ID", 7.0)
                .with_property("MED_DENSITY_ECO", 0.0)
                .with_property("MED_DENSITY_BIOME", 1.5),
            Feature::new(MultiPolygon::new(vec![])).with_property("MED_DENSITY_ECO", 3.0),
        ]);
        let records = records_from_layer(&layer, &DensityFields::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolve(1.0), (1.5, DensitySource::Secondary));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let mut policy = MinimumSizePolicy::default();
        policy.core_to_step_ratio = 0.0;
        assert!(DensityResolver::new(policy, 1000.0).is_err());
        assert!(DensityResolver::new(MinimumSizePolicy::default(), 0.0).is_err());
    }
}
