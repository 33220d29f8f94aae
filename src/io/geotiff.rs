//! GeoTIFF raster I/O through GDAL.

use crate::types::{Crs, GeoTransform, GridSpec, Raster, SclError, SclResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Read band 1 of a raster file; nodata and non-finite cells become masked
pub fn read_raster<P: AsRef<Path>>(path: P) -> SclResult<Raster> {
    log::info!("Reading raster from: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let epsg = dataset
        .spatial_ref()
        .ok()
        .and_then(|srs| srs.auth_code().ok())
        .and_then(|code| u32::try_from(code).ok())
        .ok_or_else(|| {
            SclError::InvalidFormat(format!("{} has no EPSG coordinate system", path.as_ref().display()))
        })?;

    let band = dataset.rasterband(1)?;
    let nodata = band.no_data_value();
    let buffer = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    let mut data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| SclError::Processing(format!("Failed to reshape raster data: {}", e)))?;
    if let Some(nodata) = nodata {
        data.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }

    log::debug!("Raster size: {}x{}, EPSG:{}", width, height, epsg);
    Raster::new(GridSpec::new(transform, Crs::epsg(epsg), height, width), data)
}

/// Write a raster as a single-band Float64 GeoTIFF with NaN nodata
pub fn write_raster<P: AsRef<Path>>(raster: &Raster, path: P) -> SclResult<()> {
    log::info!("Saving raster as GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.dim();
    let mut dataset = driver.create_with_band_type::<f64, _>(path.as_ref(), width, height, 1)?;
    dataset.set_geo_transform(&raster.grid.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(raster.grid.crs.epsg)?)?;

    let values: Vec<f64> = raster
        .data
        .iter()
        .zip(raster.valid.iter())
        .map(|(&d, &v)| if v { d } else { f64::NAN })
        .collect();
    let mut band = dataset.rasterband(1)?;
    band.set_no_data_value(Some(f64::NAN))?;
    band.write((0, 0), (width, height), &Buffer::new((width, height), values))?;
    Ok(())
}
