//! Filesystem snapshot catalog.
//!
//! Layout under the catalog root:
//!
//! ```text
//! <collection>/<YYYY-MM-DD>[_suffix].json[.gz]   dated snapshots
//! <collection>.json[.gz]                         static dataset
//! ```

use crate::io::{Dataset, Snapshot, TemporalDataset};
use crate::types::{SclError, SclResult};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Catalog over a local directory tree
pub struct LocalCatalog {
    root: PathBuf,
    snapshot_name: Regex,
}

impl LocalCatalog {
    pub fn new<P: AsRef<Path>>(root: P) -> SclResult<Self> {
        let snapshot_name = Regex::new(r"^(\d{4}-\d{2}-\d{2})(?:_[^/\\]*)?\.json(?:\.gz)?$")
            .map_err(|e| SclError::Processing(format!("snapshot pattern: {}", e)))?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            snapshot_name,
        })
    }

    /// Dated snapshots of a collection, oldest first
    pub fn snapshots(&self, collection: &str) -> SclResult<Vec<(NaiveDate, PathBuf)>> {
        let dir = self.root.join(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(caps) = self.snapshot_name.captures(&name) else { continue };
            match NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
                Ok(date) => found.push((date, entry.path())),
                Err(_) => log::warn!("Ignoring snapshot with invalid date: {}", entry.path().display()),
            }
        }
        found.sort();
        Ok(found)
    }

    fn static_path(&self, collection: &str) -> Option<PathBuf> {
        ["json", "json.gz"]
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", collection, ext)))
            .find(|p| p.is_file())
    }
}

impl TemporalDataset for LocalCatalog {
    fn most_recent(&self, collection: &str, as_of: NaiveDate) -> SclResult<Option<Snapshot>> {
        let snapshots = self.snapshots(collection)?;
        if let Some((effective, path)) = snapshots.into_iter().filter(|(d, _)| *d <= as_of).last() {
            log::debug!("{}: using snapshot {}", collection, path.display());
            let dataset = read_dataset(&path)?;
            return Ok(Some(Snapshot { dataset, effective }));
        }
        match self.static_path(collection) {
            Some(path) => {
                log::debug!("{}: using static dataset {}", collection, path.display());
                Ok(Some(Snapshot {
                    dataset: read_dataset(&path)?,
                    effective: as_of,
                }))
            }
            None => Ok(None),
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

/// Read a JSON dataset, gunzipping `.gz` files
pub fn read_dataset(path: &Path) -> SclResult<Dataset> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    serde_json::from_reader(reader).map_err(|e| SclError::InvalidFormat(format!("{}: {}", path.display(), e)))
}

/// Write a JSON dataset, gzipping when the path ends in `.gz`
pub fn write_dataset(path: &Path, dataset: &Dataset) -> SclResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(path)?);
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, dataset)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        serde_json::to_writer(&mut file, dataset)?;
        file.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VectorLayer;
    use crate::types::{Crs, GeoTransform, GridSpec, Raster};
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn raster(v: f64) -> Dataset {
        let grid = GridSpec::new(GeoTransform::north_up(0.0, 1.0, 1.0), Crs::epsg(32647), 1, 1);
        Dataset::Raster(Raster::filled(grid, v))
    }

    #[test]
    fn test_most_recent_on_or_before() {
        let dir = TempDir::new().unwrap();
        write_dataset(&dir.path().join("hii/2018-01-01.json"), &raster(1.0)).unwrap();
        write_dataset(&dir.path().join("hii/2019-06-01_v2.json.gz"), &raster(2.0)).unwrap();
        write_dataset(&dir.path().join("hii/2021-01-01.json"), &raster(3.0)).unwrap();
        std::fs::write(dir.path().join("hii/notes.txt"), "ignored").unwrap();

        let catalog = LocalCatalog::new(dir.path()).unwrap();
        let snap = catalog.most_recent("hii", date("2020-01-01")).unwrap().unwrap();
        assert_eq!(snap.effective, date("2019-06-01"));
        let r = snap.dataset.into_raster("hii").unwrap();
        assert_eq!(r.get(0, 0), Some(2.0));

        assert!(catalog.most_recent("hii", date("2017-01-01")).unwrap().is_none());
        assert!(catalog.most_recent("nothing", date("2020-01-01")).unwrap().is_none());
    }

    #[test]
    fn test_static_dataset_takes_as_of_date() {
        let dir = TempDir::new().unwrap();
        write_dataset(&dir.path().join("tiger/zones.json.gz"), &Dataset::Vector(VectorLayer::default())).unwrap();
        let catalog = LocalCatalog::new(dir.path()).unwrap();
        let snap = catalog.most_recent("tiger/zones", date("2020-01-01")).unwrap().unwrap();
        assert_eq!(snap.effective, date("2020-01-01"));
        assert!(matches!(snap.dataset, Dataset::Vector(_)));
    }
}
