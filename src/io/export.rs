//! Local JSON exporter with overwrite-or-version policy.

use crate::io::{Artifact, Exporter};
use crate::types::SclResult;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes artifacts as pretty JSON under a root directory.
///
/// With `overwrite` off an existing `<name>.json` is kept and the artifact
/// goes to the first free `<name>_v2.json`, `<name>_v3.json`, ...
pub struct LocalExporter {
    root: PathBuf,
    overwrite: bool,
}

impl LocalExporter {
    pub fn new<P: AsRef<Path>>(root: P, overwrite: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            overwrite,
        }
    }

    /// Target file for a logical artifact path
    pub fn target(&self, path: &str) -> PathBuf {
        let base = self.root.join(format!("{}.json", path));
        if self.overwrite || !base.exists() {
            return base;
        }
        (2u32..)
            .map(|v| self.root.join(format!("{}_v{}.json", path, v)))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }
}

impl Exporter for LocalExporter {
    fn export(&self, artifact: &Artifact<'_>, path: &str) -> SclResult<String> {
        let target = self.target(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(artifact)?;
        text.push('\n');
        let mut file = std::fs::File::create(&target)?;
        file.write_all(text.as_bytes())?;
        log::info!("💾 Exported {}", target.display());
        Ok(target.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform, GridSpec, Raster};
    use tempfile::TempDir;

    fn raster() -> Raster {
        Raster::filled(GridSpec::new(GeoTransform::north_up(0.0, 1.0, 1.0), Crs::epsg(32647), 1, 1), 1.0)
    }

    #[test]
    fn test_versions_instead_of_overwriting() {
        let dir = TempDir::new().unwrap();
        let r = raster();
        let exporter = LocalExporter::new(dir.path(), false);
        let first = exporter.export(&Artifact::Raster(&r), "tiger/pothab/scl_image").unwrap();
        let second = exporter.export(&Artifact::Raster(&r), "tiger/pothab/scl_image").unwrap();
        assert!(first.ends_with("scl_image.json"));
        assert!(second.ends_with("scl_image_v2.json"));
        let third = exporter.export(&Artifact::Raster(&r), "tiger/pothab/scl_image").unwrap();
        assert!(third.ends_with("scl_image_v3.json"));
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = TempDir::new().unwrap();
        let r = raster();
        let exporter = LocalExporter::new(dir.path(), true);
        let a = exporter.export(&Artifact::Raster(&r), "x").unwrap();
        let b = exporter.export(&Artifact::Raster(&r), "x").unwrap();
        assert_eq!(a, b);
        let text = std::fs::read_to_string(&a).unwrap();
        assert!(text.contains("\"kind\": \"raster\""));
    }
}
