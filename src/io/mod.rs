//! Input and output collaborators
//!
//! Dataset lookup and artifact export are traits so runs can be driven from
//! any store; the local implementations work on a directory tree of JSON
//! snapshots.

pub mod catalog;
pub mod export;
#[cfg(feature = "gdal")]
pub mod geotiff;
pub mod vector;

pub use catalog::LocalCatalog;
pub use export::LocalExporter;
pub use vector::{Feature, VectorLayer};

use crate::config::InputSpec;
use crate::core::polygonize::ClassifiedPolygon;
use crate::types::{Raster, SclError, SclResult};
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contents of one stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dataset {
    Raster(Raster),
    Vector(VectorLayer),
}

impl Dataset {
    pub fn kind(&self) -> &'static str {
        match self {
            Dataset::Raster(_) => "raster",
            Dataset::Vector(_) => "vector",
        }
    }

    pub fn into_raster(self, name: &str) -> SclResult<Raster> {
        match self {
            Dataset::Raster(r) => Ok(r),
            other => Err(SclError::InvalidFormat(format!(
                "input '{}' must be a raster, found {}",
                name,
                other.kind()
            ))),
        }
    }

    pub fn into_vector(self, name: &str) -> SclResult<VectorLayer> {
        match self {
            Dataset::Vector(v) => Ok(v),
            other => Err(SclError::InvalidFormat(format!(
                "input '{}' must be a vector layer, found {}",
                name,
                other.kind()
            ))),
        }
    }
}

/// A dataset together with the date it is effective from
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dataset: Dataset,
    pub effective: NaiveDate,
}

/// Source of dated snapshots
pub trait TemporalDataset {
    /// Newest snapshot of `collection` effective on or before `as_of`
    fn most_recent(&self, collection: &str, as_of: NaiveDate) -> SclResult<Option<Snapshot>>;
}

/// Look up an input and enforce its maximum age.
///
/// A missing snapshot is `MissingInput`; a dated input older than its
/// allowed age is `StaleInput`. Static inputs (no max age) are never stale.
pub fn resolve_input(
    source: &dyn TemporalDataset,
    name: &str,
    spec: &InputSpec,
    species: &str,
    as_of: NaiveDate,
) -> SclResult<Snapshot> {
    let collection = spec.collection_for(species);
    let snapshot = source
        .most_recent(&collection, as_of)?
        .ok_or_else(|| SclError::MissingInput {
            name: name.to_string(),
            collection: collection.clone(),
            as_of,
        })?;

    if let Some(years) = spec.max_age_years {
        let oldest = as_of
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN);
        if snapshot.effective < oldest {
            return Err(SclError::StaleInput {
                name: name.to_string(),
                effective: snapshot.effective,
                as_of,
                max_age_years: years,
            });
        }
    }

    log::debug!("Input '{}' from {} effective {}", name, collection, snapshot.effective);
    Ok(snapshot)
}

/// Something a run writes out
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact<'a> {
    Raster(&'a Raster),
    /// Named co-registered bands
    Bands { bands: &'a BTreeMap<String, Raster> },
    Polygons { features: &'a [ClassifiedPolygon] },
}

/// Destination for run artifacts
pub trait Exporter {
    /// Write `artifact` under the logical `path`; returns where it landed
    fn export(&self, artifact: &Artifact<'_>, path: &str) -> SclResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(BTreeMap<String, NaiveDate>);

    impl TemporalDataset for Fixed {
        fn most_recent(&self, collection: &str, _as_of: NaiveDate) -> SclResult<Option<Snapshot>> {
            Ok(self.0.get(collection).map(|&effective| Snapshot {
                dataset: Dataset::Vector(VectorLayer::default()),
                effective,
            }))
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_missing_and_stale() {
        let source = Fixed(
            [("hii".to_string(), date("2018-06-30")), ("tiger/zones".to_string(), date("1990-01-01"))]
                .into_iter()
                .collect(),
        );
        let as_of = date("2020-01-01");

        let err = resolve_input(&source, "habitat", &InputSpec::dated("structural_habitat", 1), "tiger", as_of)
            .unwrap_err();
        assert!(matches!(err, SclError::MissingInput { .. }));
        assert!(err.is_fatal_for_run());

        let err = resolve_input(&source, "hii", &InputSpec::dated("hii", 1), "tiger", as_of).unwrap_err();
        assert!(matches!(err, SclError::StaleInput { max_age_years: 1, .. }));

        assert!(resolve_input(&source, "hii", &InputSpec::dated("hii", 2), "tiger", as_of).is_ok());
        assert!(resolve_input(&source, "zones", &InputSpec::fixed("{species}/zones"), "tiger", as_of).is_ok());
    }

    #[test]
    fn test_dataset_kind_checks() {
        let err = Dataset::Vector(VectorLayer::default()).into_raster("hii").unwrap_err();
        assert!(matches!(err, SclError::InvalidFormat(_)));
    }
}
