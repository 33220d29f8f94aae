//! The landscape unit run for one species and taskdate.
//!
//! Inputs are resolved first; a missing or stale input aborts the run. The
//! raster stages are described as one [`Graph`] and materialised on demand.
//! Every output is then exported on its own: a compute budget overrun skips
//! the outputs depending on the failed stage, an empty category is skipped
//! with a warning, and the remaining exports go ahead.

use crate::config::{InputSpec, PipelineConfig, PressureThresholds};
use crate::core::density::{records_from_layer, DensityResolver};
use crate::core::graph::{Evaluator, Graph, NodeId};
use crate::core::patch::Connectivity;
use crate::core::polygonize::{BandSpec, ClassifiedPolygon, PolygonizeParams, Polygonizer};
use crate::core::rasterize::rasterize;
use crate::core::reduce::Reducer;
use crate::core::resample::{Reprojector, Resampling};
use crate::core::resolution::{area_to_pixel_count, distance_to_pixels};
use crate::core::threshold::{ThresholdCalibrator, ZoneThresholds};
use crate::io::{resolve_input, Artifact, Exporter, TemporalDataset, VectorLayer};
use crate::types::{CmpOp, GridSpec, Raster, SclError, SclResult};
use chrono::{Datelike, NaiveDate};
use geo::{LineString, Polygon};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_SCENARIO: &str = "canonical";

/// Bands reduced with the mode
pub const MODE_BANDS: [&str; 6] = [
    "range",
    "country",
    "ecoregion",
    "biome",
    "min_patch_size",
    "min_stepping_stone_size",
];

/// Bands reduced with the sum
pub const SUM_BANDS: [&str; 4] = ["polygon_area", "eff_pot_hab_area", "connected_eff_pot_hab_area", "pa_area"];

/// Label band of the classification image
pub const LABEL_BAND: &str = "scl_poly";

/// What to run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRequest {
    pub species: String,
    pub scenario: Option<String>,
    pub taskdate: NaiveDate,
}

impl RunRequest {
    pub fn new(species: &str, taskdate: NaiveDate) -> Self {
        Self {
            species: species.to_string(),
            scenario: None,
            taskdate,
        }
    }

    pub fn scenario(&self) -> &str {
        self.scenario.as_deref().unwrap_or(DEFAULT_SCENARIO)
    }

    /// Logical output path of a named artifact
    pub fn output_path(&self, name: &str) -> String {
        format!("{}/{}/{}/pothab/{}", self.species, self.scenario(), self.taskdate, name)
    }
}

/// Result of one export
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    Written { location: String },
    SkippedEmpty,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub name: String,
    pub outcome: ExportOutcome,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub species: String,
    pub scenario: String,
    pub taskdate: NaiveDate,
    pub config_version: String,
    /// Effective date of every input used
    pub inputs: BTreeMap<String, NaiveDate>,
    pub zone_thresholds: BTreeMap<i64, f64>,
    pub polygon_count: usize,
    pub outputs: Vec<OutputRecord>,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&ExportOutcome> {
        self.outputs.iter().find(|o| o.name == name).map(|o| &o.outcome)
    }

    /// True when no export failed
    pub fn is_complete(&self) -> bool {
        !self
            .outputs
            .iter()
            .any(|o| matches!(o.outcome, ExportOutcome::Failed { .. }))
    }
}

struct Inputs {
    structural_habitat: Raster,
    hii: Raster,
    extirpated_range: VectorLayer,
    historical_range: Raster,
    density: VectorLayer,
    zones: VectorLayer,
    ecoregions: VectorLayer,
    countries: VectorLayer,
    protected_areas: VectorLayer,
    water: Raster,
    elevation: Option<Raster>,
    probability: Option<Raster>,
    survey_effort: Option<Raster>,
    effective: BTreeMap<String, NaiveDate>,
}

/// Graph handles of the rasters a run exports or polygonizes
struct Nodes {
    habitat_mask: NodeId,
    pressure: NodeId,
    potential_habitat_export: NodeId,
    bands: Vec<(String, NodeId)>,
}

struct RasterProducts {
    potential_habitat: Raster,
    image: BTreeMap<String, Raster>,
    zone_thresholds: ZoneThresholds,
    canonical: GridSpec,
    extent: Polygon<f64>,
}

/// One canonical, parameterised landscape unit run
pub struct Pipeline<'a> {
    config: PipelineConfig,
    source: &'a dyn TemporalDataset,
    exporter: &'a dyn Exporter,
    reprojector: &'a dyn Reprojector,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        source: &'a dyn TemporalDataset,
        exporter: &'a dyn Exporter,
        reprojector: &'a dyn Reprojector,
    ) -> SclResult<Self> {
        config.validate()?;
        let pipeline = Self {
            config,
            source,
            exporter,
            reprojector,
        };
        for (category, missing) in pipeline.unavailable_attributes() {
            log::warn!(
                "Category '{}' reads attributes no configured input produces ({}); those comparisons are always false",
                category,
                missing.join(", ")
            );
        }
        Ok(pipeline)
    }

    /// Categories reading attributes that no band of this configuration produces
    pub fn unavailable_attributes(&self) -> Vec<(String, Vec<String>)> {
        let mut produced: BTreeSet<&str> = MODE_BANDS.iter().chain(SUM_BANDS.iter()).copied().collect();
        produced.extend(["size", "pa_proportion"]);
        if self.config.inputs.probability.is_some() {
            produced.insert("probability");
        }
        if self.config.inputs.survey_effort.is_some() {
            produced.insert("effort");
        }
        self.config
            .rules
            .attributes_by_category()
            .into_iter()
            .filter_map(|(name, read)| {
                let missing: Vec<String> = read
                    .into_iter()
                    .filter(|a| !produced.contains(*a))
                    .map(str::to_string)
                    .collect();
                (!missing.is_empty()).then(|| (name.to_string(), missing))
            })
            .collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, request: &RunRequest) -> SclResult<RunReport> {
        log::info!(
            "🐅 Starting landscape run: species={} scenario={} taskdate={} (config {})",
            request.species,
            request.scenario(),
            request.taskdate,
            self.config.version
        );

        let inputs = self.load_inputs(request)?;
        let mut report = RunReport {
            species: request.species.clone(),
            scenario: request.scenario().to_string(),
            taskdate: request.taskdate,
            config_version: self.config.version.clone(),
            inputs: inputs.effective.clone(),
            zone_thresholds: BTreeMap::new(),
            polygon_count: 0,
            outputs: Vec::new(),
        };

        let category_names: Vec<String> = self
            .config
            .rules
            .categories
            .iter()
            .map(|c| format!("scl_{}", c.name))
            .collect();

        let products = match self.compute_rasters(&inputs, request) {
            Ok(products) => products,
            Err(e) if e.is_output_local() => {
                log::error!("Raster stage failed: {}", e);
                let reason = e.to_string();
                for name in ["potential_habitat", "scl_image", "scl_polys"]
                    .iter()
                    .map(|s| s.to_string())
                    .chain(category_names)
                {
                    report.outputs.push(failed(&name, &reason));
                }
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.zone_thresholds = products.zone_thresholds.table();

        self.export(&mut report, request, "potential_habitat", &Artifact::Raster(&products.potential_habitat));
        self.export(&mut report, request, "scl_image", &Artifact::Bands { bands: &products.image });

        let polygons = match self.polygons(&products) {
            Ok(polygons) => polygons,
            Err(e) if e.is_output_local() => {
                log::error!("Polygonization failed: {}", e);
                let reason = e.to_string();
                report.outputs.push(failed("scl_polys", &reason));
                for name in &category_names {
                    report.outputs.push(failed(name, &reason));
                }
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.polygon_count = polygons.len();
        self.export(&mut report, request, "scl_polys", &Artifact::Polygons { features: &polygons });

        for (name, members) in self.config.rules.partition(&polygons) {
            let output = format!("scl_{}", name);
            if members.is_empty() {
                log::warn!("Category '{}' is empty; skipping export", name);
                report.outputs.push(OutputRecord {
                    name: output,
                    outcome: ExportOutcome::SkippedEmpty,
                });
                continue;
            }
            log::info!("Category '{}': {} polygons", name, members.len());
            let features: Vec<ClassifiedPolygon> = members.into_iter().cloned().collect();
            self.export(&mut report, request, &output, &Artifact::Polygons { features: &features });
        }

        log::info!(
            "✅ Run finished: {} polygons, {} outputs ({})",
            report.polygon_count,
            report.outputs.len(),
            if report.is_complete() { "complete" } else { "partial" }
        );
        Ok(report)
    }

    /// A failed export is recorded against its output; siblings still run
    fn export(&self, report: &mut RunReport, request: &RunRequest, name: &str, artifact: &Artifact<'_>) {
        let outcome = match self.exporter.export(artifact, &request.output_path(name)) {
            Ok(location) => ExportOutcome::Written { location },
            Err(e) => {
                log::error!("Export of {} failed: {}", name, e);
                ExportOutcome::Failed { reason: e.to_string() }
            }
        };
        report.outputs.push(OutputRecord {
            name: name.to_string(),
            outcome,
        });
    }

    fn load_inputs(&self, request: &RunRequest) -> SclResult<Inputs> {
        let specs = &self.config.inputs;
        let mut effective = BTreeMap::new();
        let mut fetch = |name: &str, spec: &InputSpec| -> SclResult<crate::io::Dataset> {
            let snapshot = resolve_input(self.source, name, spec, &request.species, request.taskdate)?;
            effective.insert(name.to_string(), snapshot.effective);
            Ok(snapshot.dataset)
        };

        let structural_habitat = fetch("structural_habitat", &specs.structural_habitat)?.into_raster("structural_habitat")?;
        let hii = fetch("hii", &specs.hii)?.into_raster("hii")?;
        let extirpated_range = fetch("extirpated_range", &specs.extirpated_range)?.into_vector("extirpated_range")?;
        let historical_range = fetch("historical_range", &specs.historical_range)?.into_raster("historical_range")?;
        let density = fetch("density", &specs.density)?.into_vector("density")?;
        let zones = fetch("zones", &specs.zones)?.into_vector("zones")?;
        let ecoregions = fetch("ecoregions", &specs.ecoregions)?.into_vector("ecoregions")?;
        let countries = fetch("countries", &specs.countries)?.into_vector("countries")?;
        let protected_areas = fetch("protected_areas", &specs.protected_areas)?.into_vector("protected_areas")?;
        let water = fetch("water", &specs.water)?.into_raster("water")?;

        let mut optional = |name: &str, spec: &Option<InputSpec>| -> SclResult<Option<Raster>> {
            match spec {
                Some(spec) => Ok(Some(fetch(name, spec)?.into_raster(name)?)),
                None => Ok(None),
            }
        };
        let elevation = optional("elevation", &specs.elevation)?;
        let probability = optional("probability", &specs.probability)?;
        let survey_effort = optional("survey_effort", &specs.survey_effort)?;

        log::info!("Resolved {} inputs", effective.len());
        Ok(Inputs {
            structural_habitat,
            hii,
            extirpated_range,
            historical_range,
            density,
            zones,
            ecoregions,
            countries,
            protected_areas,
            water,
            elevation,
            probability,
            survey_effort,
            effective,
        })
    }

    fn compute_rasters(&self, inputs: &Inputs, request: &RunRequest) -> SclResult<RasterProducts> {
        let config = &self.config;
        let fields = &config.inputs.fields;
        let native = inputs.structural_habitat.grid;
        if native.crs != config.grid.crs {
            return Err(SclError::Processing(format!(
                "structural habitat is in {}, the canonical grid is {}",
                native.crs, config.grid.crs
            )));
        }
        let canonical = native.with_scale(config.grid.scale_m)?;
        log::info!(
            "Native grid {}x{} at {:.1} m, canonical grid {}x{} at {:.1} m",
            native.rows,
            native.cols,
            native.resolution_m(),
            canonical.rows,
            canonical.cols,
            config.grid.scale_m
        );

        // Vector inputs become rasters up front
        let zones = rasterize(&inputs.zones, &fields.zone, Reducer::First, &native);
        let countries = rasterize(&inputs.countries, &fields.country, Reducer::Mode, &canonical);
        let ecoregions = rasterize(&inputs.ecoregions, &fields.ecoregion, Reducer::Mode, &canonical);
        let biomes = rasterize(&inputs.ecoregions, &fields.biome, Reducer::Mode, &canonical);
        let protected = rasterize(&inputs.protected_areas, &fields.protected_area, Reducer::First, &canonical);
        let extirpated = rasterize(
            &self.extirpated_at(&inputs.extirpated_range, request.taskdate),
            &fields.extirpated,
            Reducer::First,
            &canonical,
        )
        .unmask(0.0);

        let resolver = DensityResolver::new(config.density.policy.clone(), config.grid.scale_m)?;
        let density_table = resolver.resolve(&records_from_layer(&inputs.density, &config.density.fields))?;
        let (min_patch_size, min_step_size) = DensityResolver::size_rasters(&density_table, &ecoregions);

        let mut graph = Graph::new();
        let nodes = self.build_graph(&mut graph, inputs, native, canonical, &resolver)?;

        let mut eval = Evaluator::new(&graph, self.reprojector, config.budget.max_pixels);
        eval.bind("structural_habitat", inputs.structural_habitat.clone())
            .bind("hii", inputs.hii.clone())
            .bind("historical_range", inputs.historical_range.clone())
            .bind("water", inputs.water.clone())
            .bind("extirpated_range", extirpated)
            .bind("country", countries)
            .bind("ecoregion", ecoregions)
            .bind("biome", biomes)
            .bind("protected_areas", protected)
            .bind("min_patch_size", min_patch_size)
            .bind("min_stepping_stone_size", min_step_size)
            .bind("cell_area", cell_area(&canonical));
        for (name, raster) in [
            ("elevation", &inputs.elevation),
            ("probability", &inputs.probability),
            ("survey_effort", &inputs.survey_effort),
        ] {
            if let Some(raster) = raster {
                eval.bind(name, raster.clone());
            }
        }

        let zone_thresholds = match &config.pressure.thresholds {
            PressureThresholds::Fixed(table) => ZoneThresholds::from_fixed(table),
            PressureThresholds::Calibrated(params) => {
                let pressure = eval.evaluate(nodes.pressure)?;
                let habitat = eval.evaluate(nodes.habitat_mask)?;
                ThresholdCalibrator::new(params.clone()).calibrate(&zones, &pressure, &habitat)?
            }
        };
        for (zone, threshold) in zone_thresholds.table() {
            log::info!("Zone {} pressure threshold {:.4}", zone, threshold);
        }
        eval.bind("pressure_threshold", zone_thresholds.to_raster(&zones));

        let potential_habitat = (*eval.evaluate(nodes.potential_habitat_export)?).clone();
        let mut image = BTreeMap::new();
        for (name, node) in &nodes.bands {
            image.insert(name.clone(), (*eval.evaluate(*node)?).clone());
        }
        log::debug!("Evaluated {} of {} graph nodes", eval.computed(), graph.len());

        Ok(RasterProducts {
            potential_habitat,
            image,
            zone_thresholds,
            canonical,
            extent: extent_polygon(&native),
        })
    }

    /// Extirpated range features in effect for the taskdate year
    fn extirpated_at(&self, layer: &VectorLayer, taskdate: NaiveDate) -> VectorLayer {
        let fields = &self.config.inputs.fields;
        let year = taskdate.year() as f64;
        layer.filter(|f| {
            match (f.property(&fields.extirpation_year), f.property(&fields.extirpation_revert)) {
                (Some(from), Some(until)) => from <= year && year < until,
                _ => false,
            }
        })
    }

    fn build_graph(
        &self,
        g: &mut Graph,
        inputs: &Inputs,
        native: GridSpec,
        canonical: GridSpec,
        resolver: &DensityResolver,
    ) -> SclResult<Nodes> {
        let t = &self.config.thresholds;
        let connectivity = Connectivity::Eight;

        // Structural habitat, optionally limited by elevation
        let habitat = g.source("structural_habitat");
        let suitable = g.compare(habitat, CmpOp::Ge, t.structural_habitat);
        let mut habitat_mask = g.self_mask(suitable);
        if inputs.elevation.is_some() {
            let elevation = g.source("elevation");
            let elevation = g.resample(elevation, native, Resampling::Nearest);
            let low = g.compare(elevation, CmpOp::Lt, t.elevation);
            habitat_mask = g.update_mask(habitat_mask, low);
        }

        let patch_px = area_to_pixel_count(t.structural_habitat_patch_size, native.resolution_m())?;
        let connected_habitat = g.patch_filter(habitat_mask, patch_px, connectivity);

        // Human pressure against per-zone thresholds
        let hii = g.source("hii");
        let hii = g.resample(hii, native, Resampling::Nearest);
        let pressure = g.multiply_by(hii, 1.0 / self.config.pressure.divisor);
        let threshold = g.source("pressure_threshold");
        let below = g.compare_raster(pressure, CmpOp::Le, threshold);
        let low_pressure = g.self_mask(below);

        let eff_pot_hab = self.reduce_to_canonical(g, habitat_mask, low_pressure, canonical);
        let potential_habitat_export = self.reduce_to_canonical(g, connected_habitat, low_pressure, canonical);

        // Patch sizes on the canonical grid
        let ((_, core_max), (step_min, _)) = resolver.pixel_limits()?;
        let connected_potential = g.connected_pixel_count(eff_pot_hab, core_max, connectivity);
        let enough = g.compare(connected_potential, CmpOp::Ge, step_min as f64);
        let kept = g.update_mask(connected_potential, enough);
        let potential_habitat = g.self_mask(kept);

        // Core and stepping stone classes, dilated by half the dispersal distance
        let radius = distance_to_pixels(t.dispersal_distance / 2.0, self.config.grid.scale_m)?;
        let water = g.source("water");
        let water = g.resample(water, canonical, Resampling::Nearest);
        let min_patch = g.source("min_patch_size");
        let min_step = g.source("min_stepping_stone_size");
        let zero = g.constant(0.0, canonical);

        let is_core = g.compare_raster(potential_habitat, CmpOp::Ge, min_patch);
        let core_seed = g.where_set(zero, is_core, 1.0);
        let core_seed = g.self_mask(core_seed);
        let core = g.dilate(core_seed, radius);
        let core = g.multiply_by(core, 3.0);
        let core = g.unmask(core, 0.0);
        let potential_core = g.update_mask(core, water);

        let under_core = g.compare_raster(potential_habitat, CmpOp::Lt, min_patch);
        let over_step = g.compare_raster(potential_habitat, CmpOp::Ge, min_step);
        let is_step = g.multiply(under_core, over_step);
        let step_seed = g.where_set(zero, is_step, 1.0);
        let step_seed = g.self_mask(step_seed);
        let step = g.dilate(step_seed, radius);
        let step = g.unmask(step, 0.0);
        let potential_step = g.update_mask(step, water);

        let all_potential = g.add(potential_core, potential_step);
        let all_potential = g.self_mask(all_potential);

        // 2 = historical range, 1 = extirpated
        let historical = g.source("historical_range");
        let historical = g.resample(historical, canonical, Resampling::Nearest);
        let is_historical = g.compare(historical, CmpOp::Eq, 1.0);
        let extirpated = g.source("extirpated_range");
        let is_extirpated = g.compare(extirpated, CmpOp::Eq, 1.0);
        let range = g.where_set(zero, is_historical, 2.0);
        let range = g.where_set(range, is_extirpated, 1.0);
        let range = g.self_mask(range);

        // Areas in km², water excluded
        let cell_area = g.source("cell_area");
        let area = g.update_mask(cell_area, water);
        let eff_pot_hab_area = g.update_mask(area, eff_pot_hab);
        let connected_area = g.update_mask(area, potential_habitat);
        let protected = g.source("protected_areas");
        let pa_area = g.update_mask(area, protected);

        let country = g.source("country");
        let ecoregion = g.source("ecoregion");
        let biome = g.source("biome");
        let country_code = g.multiply_by(country, 1000.0);
        let eco_country = g.add(country_code, ecoregion);
        let label = g.update_mask(eco_country, all_potential);

        let mut bands = vec![
            (LABEL_BAND.to_string(), label),
            ("range".to_string(), range),
            ("country".to_string(), country),
            ("ecoregion".to_string(), ecoregion),
            ("biome".to_string(), biome),
            ("min_patch_size".to_string(), min_patch),
            ("min_stepping_stone_size".to_string(), min_step),
            ("polygon_area".to_string(), area),
            ("eff_pot_hab_area".to_string(), eff_pot_hab_area),
            ("connected_eff_pot_hab_area".to_string(), connected_area),
            ("pa_area".to_string(), pa_area),
            ("size".to_string(), all_potential),
        ];

        if inputs.probability.is_some() {
            let probability = g.source("probability");
            let probability = g.resample(probability, canonical, Resampling::Nearest);
            let high = g.compare(probability, CmpOp::Ge, t.probability);
            bands.push(("probability".to_string(), high));
        }
        if inputs.survey_effort.is_some() {
            let effort = g.source("survey_effort");
            let effort = g.resample(effort, canonical, Resampling::Nearest);
            bands.push(("effort".to_string(), effort));
        }

        log::debug!("Built raster graph with {} nodes", g.len());
        Ok(Nodes {
            habitat_mask,
            pressure,
            potential_habitat_export,
            bands,
        })
    }

    /// Fraction of masked-in native cells per canonical cell, thresholded
    fn reduce_to_canonical(&self, g: &mut Graph, mask: NodeId, keep: NodeId, canonical: GridSpec) -> NodeId {
        let kept = g.update_mask(mask, keep);
        let filled = g.unmask(kept, 0.0);
        let fraction = g.resample(filled, canonical, Resampling::Mean);
        let enough = g.compare(fraction, CmpOp::Ge, self.config.thresholds.reduce_res_input_pixels);
        g.self_mask(enough)
    }

    fn polygons(&self, products: &RasterProducts) -> SclResult<Vec<ClassifiedPolygon>> {
        let image = &products.image;
        let band = |name: &str| {
            image
                .get(name)
                .cloned()
                .ok_or_else(|| SclError::Processing(format!("classification band '{}' missing", name)))
        };

        let mut bands = Vec::new();
        for name in MODE_BANDS {
            bands.push(BandSpec::new(name, band(name)?, Reducer::Mode));
        }
        for name in SUM_BANDS {
            bands.push(BandSpec::new(name, band(name)?, Reducer::Sum));
        }
        bands.push(BandSpec::new("size", band("size")?, Reducer::Mode));
        if image.contains_key("probability") {
            bands.push(BandSpec::new("probability", band("probability")?, Reducer::Mode));
        }
        if image.contains_key("effort") {
            bands.push(BandSpec::new("effort", band("effort")?, Reducer::Max));
        }

        let polygonizer = Polygonizer::new(
            PolygonizeParams {
                grid: products.canonical,
                bounds: Some(products.extent.clone()),
                connectivity: self.config.polygon.connectivity,
                max_pixels: self.config.budget.max_pixels,
            },
            self.reprojector,
        );
        let labeled = polygonizer.reduce_to_polygons(&band(LABEL_BAND)?, &bands)?;
        let total = labeled.len();

        let polygons: Vec<ClassifiedPolygon> = labeled
            .into_iter()
            .filter(|p| p.attributes.get("eff_pot_hab_area").map_or(false, |a| *a > 0.0))
            .enumerate()
            .map(|(i, p)| {
                let mut attributes = p.attributes;
                let polygon_area = attributes.get("polygon_area").copied().unwrap_or(0.0);
                let pa_area = attributes.get("pa_area").copied().unwrap_or(0.0);
                let proportion = if polygon_area > 0.0 { pa_area / polygon_area } else { 0.0 };
                attributes.insert("pa_proportion".to_string(), proportion);
                ClassifiedPolygon {
                    poly_id: i as u64 + 1,
                    label: p.label,
                    cell_count: p.cell_count,
                    geometry: p.geometry,
                    attributes,
                }
            })
            .collect();

        log::info!(
            "Kept {} of {} polygons with effective potential habitat",
            polygons.len(),
            total
        );
        Ok(polygons)
    }
}

fn failed(name: &str, reason: &str) -> OutputRecord {
    OutputRecord {
        name: name.to_string(),
        outcome: ExportOutcome::Failed {
            reason: reason.to_string(),
        },
    }
}

/// Cell area in km² for every cell of `grid`
fn cell_area(grid: &GridSpec) -> Raster {
    Raster::from_fn(*grid, |r, _| Some(grid.cell_area_km2(r)))
}

fn extent_polygon(grid: &GridSpec) -> Polygon<f64> {
    let (min_x, min_y, max_x, max_y) = grid.extent();
    Polygon::new(
        LineString::from(vec![(min_x, min_y), (max_x, min_y), (max_x, max_y), (min_x, max_y), (min_x, min_y)]),
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let mut request = RunRequest::new("Panthera_tigris", date);
        assert_eq!(request.output_path("scl_polys"), "Panthera_tigris/canonical/2020-01-01/pothab/scl_polys");
        request.scenario = Some("fragment_test".to_string());
        assert_eq!(request.scenario(), "fragment_test");
    }

    #[test]
    fn test_report_completeness() {
        let report = RunReport {
            species: "x".to_string(),
            scenario: DEFAULT_SCENARIO.to_string(),
            taskdate: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            config_version: "2".to_string(),
            inputs: BTreeMap::new(),
            zone_thresholds: BTreeMap::new(),
            polygon_count: 0,
            outputs: vec![
                OutputRecord { name: "scl_species".to_string(), outcome: ExportOutcome::SkippedEmpty },
                failed("scl_polys", "budget"),
            ],
        };
        assert!(!report.is_complete());
        assert_eq!(report.outcome("scl_species"), Some(&ExportOutcome::SkippedEmpty));
    }

    #[test]
    fn test_extent_polygon_covers_grid() {
        use crate::types::{Crs, GeoTransform};
        use geo::Area;
        let grid = GridSpec::new(GeoTransform::north_up(10.0, 20.0, 2.0), Crs::epsg(32647), 3, 4);
        assert!((extent_polygon(&grid).unsigned_area() - 48.0).abs() < 1e-9);
    }
}
