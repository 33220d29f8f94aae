//! Pipeline configuration.
//!
//! One immutable record holds every threshold, size policy, input collection
//! and rule set a run needs. Defaults reproduce the effective potential
//! habitat task; a JSON file may override any section.

use crate::core::density::{DensityFields, MinimumSizePolicy};
use crate::core::patch::Connectivity;
use crate::core::rules::RuleSet;
use crate::core::threshold::ThresholdCalibration;
use crate::types::{Crs, SclError, SclResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Placeholder replaced by the species name in collection paths
pub const SPECIES_PLACEHOLDER: &str = "{species}";

/// Canonical output grid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub crs: Crs,
    /// Nominal cell size in metres
    pub scale_m: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            crs: Crs::WGS84,
            scale_m: 1000.0,
        }
    }
}

/// Habitat thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitatThresholds {
    /// Structural habitat cells at or above this value are habitat
    pub structural_habitat: f64,
    /// Minimum habitat fraction of a canonical cell after resolution reduction
    pub reduce_res_input_pixels: f64,
    /// Minimum connected structural habitat patch (km²)
    pub structural_habitat_patch_size: f64,
    /// Dispersal distance (km); dilation uses half of it
    pub dispersal_distance: f64,
    /// Cells at or above this elevation (m) are excluded when an elevation input is configured
    pub elevation: f64,
    /// Probability at or above which a cell counts as high probability
    pub probability: f64,
}

impl Default for HabitatThresholds {
    fn default() -> Self {
        Self {
            structural_habitat: 0.5,
            reduce_res_input_pixels: 0.5,
            structural_habitat_patch_size: 5.0,
            dispersal_distance: 4.0,
            elevation: 3350.0,
            probability: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    pub policy: MinimumSizePolicy,
    pub fields: DensityFields,
}

/// Where zone pressure thresholds come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureThresholds {
    /// Fixed threshold per zone label
    Fixed(BTreeMap<i64, f64>),
    /// Histogram calibration against high-suitability habitat
    Calibrated(ThresholdCalibration),
}

impl Default for PressureThresholds {
    fn default() -> Self {
        PressureThresholds::Fixed([(1, 14.4), (2, 7.2), (3, 4.9), (4, 4.9)].into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    /// Pressure values are divided by this before comparison
    pub divisor: f64,
    pub thresholds: PressureThresholds,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            divisor: 100.0,
            thresholds: PressureThresholds::default(),
        }
    }
}

/// One input collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Collection path, `{species}` is substituted
    pub collection: String,
    /// Maximum snapshot age; `None` marks a static input
    #[serde(default)]
    pub max_age_years: Option<u32>,
}

impl InputSpec {
    pub fn dated(collection: &str, max_age_years: u32) -> Self {
        Self {
            collection: collection.to_string(),
            max_age_years: Some(max_age_years),
        }
    }

    pub fn fixed(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            max_age_years: None,
        }
    }

    pub fn collection_for(&self, species: &str) -> String {
        self.collection.replace(SPECIES_PLACEHOLDER, species)
    }
}

/// Vector attribute names read by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub zone: String,
    pub ecoregion: String,
    pub biome: String,
    pub country: String,
    pub protected_area: String,
    pub extirpated: String,
    pub extirpation_year: String,
    pub extirpation_revert: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            zone: "Zone".to_string(),
            ecoregion: "ECO_ID".to_string(),
            biome: "BIOME_NUM".to_string(),
            country: "ISONUMERIC".to_string(),
            protected_area: "WDPAID".to_string(),
            extirpated: "diss".to_string(),
            extirpation_year: "ext_year".to_string(),
            extirpation_revert: "ext_revert".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub structural_habitat: InputSpec,
    pub hii: InputSpec,
    pub extirpated_range: InputSpec,
    pub historical_range: InputSpec,
    pub density: InputSpec,
    pub zones: InputSpec,
    pub ecoregions: InputSpec,
    pub countries: InputSpec,
    pub protected_areas: InputSpec,
    pub water: InputSpec,
    /// Optional inputs feeding the category attributes
    pub elevation: Option<InputSpec>,
    pub probability: Option<InputSpec>,
    pub survey_effort: Option<InputSpec>,
    pub fields: FieldNames,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            structural_habitat: InputSpec::dated("structural_habitat", 1),
            hii: InputSpec::dated("hii", 1),
            extirpated_range: InputSpec::fixed("{species}/extirpated_range"),
            historical_range: InputSpec::fixed("{species}/historical_range"),
            density: InputSpec::fixed("{species}/biome_density"),
            zones: InputSpec::fixed("{species}/zones"),
            ecoregions: InputSpec::fixed("ecoregions"),
            countries: InputSpec::fixed("countries"),
            protected_areas: InputSpec::fixed("protected_areas"),
            water: InputSpec::fixed("watermask"),
            elevation: None,
            probability: None,
            survey_effort: None,
            fields: FieldNames::default(),
        }
    }
}

impl InputConfig {
    fn specs(&self) -> Vec<(&'static str, &InputSpec)> {
        let mut specs = vec![
            ("structural_habitat", &self.structural_habitat),
            ("hii", &self.hii),
            ("extirpated_range", &self.extirpated_range),
            ("historical_range", &self.historical_range),
            ("density", &self.density),
            ("zones", &self.zones),
            ("ecoregions", &self.ecoregions),
            ("countries", &self.countries),
            ("protected_areas", &self.protected_areas),
            ("water", &self.water),
        ];
        for (name, spec) in [
            ("elevation", &self.elevation),
            ("probability", &self.probability),
            ("survey_effort", &self.survey_effort),
        ] {
            if let Some(spec) = spec {
                specs.push((name, spec));
            }
        }
        specs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Processed-cell limit for labelling and polygonization
    pub max_pixels: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_pixels: 10_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolygonConfig {
    pub connectivity: Connectivity,
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: String,
    pub grid: GridConfig,
    pub thresholds: HabitatThresholds,
    pub density: DensityConfig,
    pub pressure: PressureConfig,
    pub rules: RuleSet,
    pub inputs: InputConfig,
    pub budget: BudgetConfig,
    pub polygon: PolygonConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: "2".to_string(),
            grid: GridConfig::default(),
            thresholds: HabitatThresholds::default(),
            density: DensityConfig::default(),
            pressure: PressureConfig::default(),
            rules: RuleSet::standard(),
            inputs: InputConfig::default(),
            budget: BudgetConfig::default(),
            polygon: PolygonConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON configuration; missing sections take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SclResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded configuration version {} from {}", config.version, path.as_ref().display());
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> SclResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> SclResult<()> {
        let bad = |msg: String| Err(SclError::Config(msg));

        if self.version.trim().is_empty() {
            return bad("version must not be empty".to_string());
        }
        if !(self.grid.scale_m.is_finite() && self.grid.scale_m > 0.0) {
            return bad(format!("grid.scale_m must be positive, got {}", self.grid.scale_m));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("structural_habitat_patch_size", t.structural_habitat_patch_size),
            ("dispersal_distance", t.dispersal_distance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return bad(format!("thresholds.{} must be non-negative, got {}", name, value));
            }
        }
        if !(0.0..=1.0).contains(&t.reduce_res_input_pixels) {
            return bad(format!(
                "thresholds.reduce_res_input_pixels must be in [0, 1], got {}",
                t.reduce_res_input_pixels
            ));
        }
        for (name, value) in [
            ("structural_habitat", t.structural_habitat),
            ("elevation", t.elevation),
            ("probability", t.probability),
        ] {
            if !value.is_finite() {
                return bad(format!("thresholds.{} must be finite, got {}", name, value));
            }
        }

        self.density.policy.validate()?;

        if !(self.pressure.divisor.is_finite() && self.pressure.divisor != 0.0) {
            return bad(format!("pressure.divisor must be non-zero, got {}", self.pressure.divisor));
        }
        match &self.pressure.thresholds {
            PressureThresholds::Fixed(table) => {
                if table.is_empty() {
                    return bad("pressure.thresholds.fixed must name at least one zone".to_string());
                }
                if let Some((zone, v)) = table.iter().find(|(_, v)| !v.is_finite()) {
                    return bad(format!("pressure threshold for zone {} is not finite: {}", zone, v));
                }
            }
            PressureThresholds::Calibrated(c) => {
                if c.bins == 0 {
                    return bad("pressure.thresholds.calibrated.bins must be at least 1".to_string());
                }
            }
        }

        self.rules.validate()?;

        for (name, spec) in self.inputs.specs() {
            if spec.collection.trim().is_empty() {
                return bad(format!("inputs.{} has an empty collection", name));
            }
        }

        if self.budget.max_pixels == 0 {
            return bad("budget.max_pixels must be positive".to_string());
        }
        Ok(())
    }
}
