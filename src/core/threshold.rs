//! Per-zone pressure threshold calibration.
//!
//! For every zone two histograms are built over the pressure raster's value
//! range: one over all zone cells and one over the zone cells that are also
//! high-suitability habitat. The zone threshold is the largest bin left edge
//! where habitat cells are over-represented, proportionally, against the zone
//! background. Ties (including bins empty in both histograms) do not qualify.

use crate::types::{Raster, SclError, SclResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PROPORTION_EPSILON: f64 = 1e-12;

/// Calibration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCalibration {
    /// Number of equal-width histogram bins
    pub bins: usize,
    /// Threshold used for zones without any high-suitability cell.
    /// `None` leaves such zones at 0.
    #[serde(default)]
    pub empty_zone_default: Option<f64>,
}

impl Default for ThresholdCalibration {
    fn default() -> Self {
        Self {
            bins: 100,
            empty_zone_default: None,
        }
    }
}

/// Histogram diagnostics for one zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneCalibration {
    pub zone: i64,
    pub threshold: f64,
    pub total_all: u64,
    pub total_high: u64,
    pub used_default: bool,
}

/// Calibrated thresholds keyed by zone label
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZoneThresholds {
    pub zones: BTreeMap<i64, ZoneCalibration>,
}

impl ZoneThresholds {
    pub fn from_fixed(fixed: &BTreeMap<i64, f64>) -> Self {
        let zones = fixed
            .iter()
            .map(|(&zone, &threshold)| {
                (
                    zone,
                    ZoneCalibration {
                        zone,
                        threshold,
                        total_all: 0,
                        total_high: 0,
                        used_default: false,
                    },
                )
            })
            .collect();
        Self { zones }
    }

    pub fn get(&self, zone: i64) -> Option<f64> {
        self.zones.get(&zone).map(|z| z.threshold)
    }

    pub fn table(&self) -> BTreeMap<i64, f64> {
        self.zones.iter().map(|(&z, c)| (z, c.threshold)).collect()
    }

    /// Threshold raster via zone remap; cells outside known zones are masked
    pub fn to_raster(&self, zones: &Raster) -> Raster {
        zones.remap(&self.table())
    }
}

struct Histogram {
    all: Vec<u64>,
    high: Vec<u64>,
}

/// Histogram-search threshold calibrator
pub struct ThresholdCalibrator {
    params: ThresholdCalibration,
}

impl ThresholdCalibrator {
    pub fn new(params: ThresholdCalibration) -> Self {
        Self { params }
    }

    /// Calibrate thresholds for every zone present in `zones`.
    ///
    /// `zones` holds integer labels (0 or masked = no zone), `pressure` the
    /// pressure values and `high_suitability` the reference mask. All three
    /// must share a grid.
    pub fn calibrate(
        &self,
        zones: &Raster,
        pressure: &Raster,
        high_suitability: &Raster,
    ) -> SclResult<ZoneThresholds> {
        if self.params.bins == 0 {
            return Err(SclError::InvalidParameter("histogram needs at least one bin".to_string()));
        }
        zones.ensure_same_grid(pressure)?;
        zones.ensure_same_grid(high_suitability)?;

        let Some((min, max)) = value_range(pressure) else {
            log::warn!("Pressure raster has no valid cells; no zone thresholds calibrated");
            return Ok(ZoneThresholds::default());
        };
        let bins = if max > min { self.params.bins } else { 1 };
        let width = if max > min { (max - min) / bins as f64 } else { 1.0 };
        log::debug!("Pressure range [{}, {}] in {} bins of {}", min, max, bins, width);

        let high = high_suitability.truthy();
        let mut histograms: BTreeMap<i64, Histogram> = BTreeMap::new();
        for ((r, c), &zone_valid) in zones.valid.indexed_iter() {
            if !zone_valid {
                continue;
            }
            let zone = zones.data[[r, c]].round() as i64;
            if zone == 0 {
                continue;
            }
            let Some(value) = pressure.get(r, c) else { continue };
            let bin = (((value - min) / width).floor() as usize).min(bins - 1);
            let h = histograms.entry(zone).or_insert_with(|| Histogram {
                all: vec![0; bins],
                high: vec![0; bins],
            });
            h.all[bin] += 1;
            if high[[r, c]] {
                h.high[bin] += 1;
            }
        }

        let mut result = ZoneThresholds::default();
        for (zone, h) in histograms {
            let calibration = self.search(zone, &h, min, width);
            log::debug!(
                "Zone {}: threshold {:.4} ({} cells, {} high-suitability)",
                zone,
                calibration.threshold,
                calibration.total_all,
                calibration.total_high
            );
            result.zones.insert(zone, calibration);
        }
        Ok(result)
    }

    fn search(&self, zone: i64, h: &Histogram, min: f64, width: f64) -> ZoneCalibration {
        let total_all: u64 = h.all.iter().sum();
        let total_high: u64 = h.high.iter().sum();

        if total_high == 0 {
            let (threshold, used_default) = match self.params.empty_zone_default {
                Some(default) => {
                    log::warn!("Zone {} has no high-suitability cells; using default threshold {}", zone, default);
                    (default, true)
                }
                None => {
                    log::warn!("Zone {} has no high-suitability cells; threshold is 0", zone);
                    (0.0, false)
                }
            };
            return ZoneCalibration { zone, threshold, total_all, total_high, used_default };
        }

        let mut threshold = 0.0f64;
        for b in 0..h.all.len() {
            let proportion_all = h.all[b] as f64 / total_all as f64;
            let proportion_high = h.high[b] as f64 / total_high as f64;
            let difference = proportion_high - proportion_all;
            let left_edge = min + b as f64 * width;
            let candidate = if difference > PROPORTION_EPSILON { left_edge } else { 0.0 };
            threshold = threshold.max(candidate);
        }

        ZoneCalibration { zone, threshold, total_all, total_high, used_default: false }
    }
}

fn value_range(raster: &Raster) -> Option<(f64, f64)> {
    raster
        .data
        .iter()
        .zip(raster.valid.iter())
        .filter(|(_, &v)| v)
        .map(|(&d, _)| d)
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
