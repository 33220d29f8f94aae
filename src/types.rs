use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued raster cell
pub type CellValue = f64;

/// EPSG codes treated as geographic (degree-based) coordinate systems
const GEOGRAPHIC_EPSG: [u32; 3] = [4326, 4269, 4258];

/// Metres per degree at the equator, used for nominal scale of geographic grids
pub const METRES_PER_DEGREE: f64 = 111_320.0;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Coordinate reference system, identified by EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub fn epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    pub fn is_geographic(&self) -> bool {
        GEOGRAPHIC_EPSG.contains(&self.epsg)
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinate of a cell corner (row/col may be fractional)
    pub fn map_coord(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Map coordinate of a cell centre
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.map_coord(row as f64 + 0.5, col as f64 + 0.5)
    }

    /// Fractional (row, col) for a map coordinate; rotation terms are ignored
    pub fn pixel_of(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width;
        let row = (y - self.top_left_y) / self.pixel_height;
        (row, col)
    }
}

/// Grid definition shared by co-registered rasters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub crs: Crs,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(transform: GeoTransform, crs: Crs, rows: usize, cols: usize) -> Self {
        Self { transform, crs, rows, cols }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Nominal cell size in metres
    pub fn resolution_m(&self) -> f64 {
        let size = self.transform.pixel_width.abs();
        if self.crs.is_geographic() {
            size * METRES_PER_DEGREE
        } else {
            size
        }
    }

    /// Area of one cell of the given row in km²
    pub fn cell_area_km2(&self, row: usize) -> f64 {
        if self.crs.is_geographic() {
            // Spherical zone area between the row's bounding latitudes
            let (_, lat_top) = self.transform.map_coord(row as f64, 0.0);
            let (_, lat_bottom) = self.transform.map_coord(row as f64 + 1.0, 0.0);
            let dlon = self.transform.pixel_width.abs().to_radians();
            let band = (lat_top.to_radians().sin() - lat_bottom.to_radians().sin()).abs();
            EARTH_RADIUS_KM * EARTH_RADIUS_KM * dlon * band
        } else {
            let km = self.transform.pixel_width.abs() / 1000.0;
            let km_y = self.transform.pixel_height.abs() / 1000.0;
            km * km_y
        }
    }

    /// Map extent as (min_x, min_y, max_x, max_y)
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let (x0, y0) = self.transform.map_coord(0.0, 0.0);
        let (x1, y1) = self.transform.map_coord(self.rows as f64, self.cols as f64);
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Same extent and CRS at a different nominal scale (metres)
    pub fn with_scale(&self, scale_m: f64) -> SclResult<GridSpec> {
        if !(scale_m.is_finite() && scale_m > 0.0) {
            return Err(SclError::InvalidParameter(format!(
                "grid scale must be positive, got {}",
                scale_m
            )));
        }
        let pixel_size = if self.crs.is_geographic() {
            scale_m / METRES_PER_DEGREE
        } else {
            scale_m
        };
        let (min_x, min_y, max_x, max_y) = self.extent();
        let cols = ((max_x - min_x) / pixel_size - 1e-9).ceil().max(1.0) as usize;
        let rows = ((max_y - min_y) / pixel_size - 1e-9).ceil().max(1.0) as usize;
        Ok(GridSpec {
            transform: GeoTransform::north_up(min_x, max_y, pixel_size),
            crs: self.crs,
            rows,
            cols,
        })
    }

    /// True when both grids address identical cells
    pub fn same_as(&self, other: &GridSpec) -> bool {
        const TOL: f64 = 1e-9;
        let a = self.transform.to_gdal();
        let b = other.transform.to_gdal();
        self.crs == other.crs
            && self.rows == other.rows
            && self.cols == other.cols
            && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= TOL * x.abs().max(1.0))
    }
}

/// Comparison operator shared by raster algebra and classification rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl CmpOp {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Gt => lhs > rhs,
        }
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        };
        write!(f, "{}", s)
    }
}

/// Masked 2D raster.
///
/// `valid[[r, c]] == false` marks a masked cell. Masked cells carry no value:
/// they are skipped by every reduction and propagate through cell algebra
/// unless explicitly filled with [`Raster::unmask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RasterDocument", into = "RasterDocument")]
pub struct Raster {
    pub grid: GridSpec,
    pub data: Array2<CellValue>,
    pub valid: Array2<bool>,
}

/// Rasters are equal when grid and mask agree and valid cells hold equal values
impl PartialEq for Raster {
    fn eq(&self, other: &Self) -> bool {
        self.grid == other.grid
            && self.valid == other.valid
            && Zip::from(&self.data)
                .and(&other.data)
                .and(&self.valid)
                .all(|a, b, &v| !v || a == b)
    }
}

impl Raster {
    /// Build a raster from values; non-finite values become masked
    pub fn new(grid: GridSpec, mut data: Array2<CellValue>) -> SclResult<Self> {
        if data.dim() != grid.dim() {
            return Err(SclError::GridMismatch(format!(
                "data shape {:?} does not match grid {:?}",
                data.dim(),
                grid.dim()
            )));
        }
        let valid = data.mapv(|v| v.is_finite());
        data.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
        Ok(Self { grid, data, valid })
    }

    /// Build a raster from values and an explicit mask; masked cells are stored as 0
    pub fn with_mask(grid: GridSpec, mut data: Array2<CellValue>, valid: Array2<bool>) -> SclResult<Self> {
        if data.dim() != grid.dim() || valid.dim() != grid.dim() {
            return Err(SclError::GridMismatch(format!(
                "data {:?} / mask {:?} do not match grid {:?}",
                data.dim(),
                valid.dim(),
                grid.dim()
            )));
        }
        Zip::from(&mut data).and(&valid).for_each(|d, &v| {
            if !v {
                *d = 0.0;
            }
        });
        Ok(Self { grid, data, valid })
    }

    pub fn filled(grid: GridSpec, value: CellValue) -> Self {
        Self {
            grid,
            data: Array2::from_elem(grid.dim(), value),
            valid: Array2::from_elem(grid.dim(), true),
        }
    }

    pub fn masked(grid: GridSpec) -> Self {
        Self {
            grid,
            data: Array2::zeros(grid.dim()),
            valid: Array2::from_elem(grid.dim(), false),
        }
    }

    pub fn from_fn<F>(grid: GridSpec, f: F) -> Self
    where
        F: Fn(usize, usize) -> Option<CellValue>,
    {
        let mut data = Array2::zeros(grid.dim());
        let mut valid = Array2::from_elem(grid.dim(), false);
        for ((r, c), v) in data.indexed_iter_mut() {
            if let Some(value) = f(r, c) {
                *v = value;
                valid[[r, c]] = true;
            }
        }
        Self { grid, data, valid }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<CellValue> {
        if self.valid[[row, col]] {
            Some(self.data[[row, col]])
        } else {
            None
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// True for cells that are valid and non-zero
    pub fn truthy(&self) -> Array2<bool> {
        let mut out = Array2::from_elem(self.dim(), false);
        Zip::from(&mut out)
            .and(&self.data)
            .and(&self.valid)
            .for_each(|o, &d, &v| *o = v && d != 0.0);
        out
    }

    /// Binary raster (1 where set, masked elsewhere)
    pub fn from_bool(grid: GridSpec, mask: &Array2<bool>) -> Self {
        Self {
            grid,
            data: mask.mapv(|b| if b { 1.0 } else { 0.0 }),
            valid: mask.clone(),
        }
    }

    /// Mask every zero cell
    pub fn self_mask(&self) -> Self {
        let valid = self.truthy();
        Self { grid: self.grid, data: self.data.clone(), valid }
    }

    /// Mask cells where `mask` is masked or zero
    pub fn update_mask(&self, mask: &Raster) -> SclResult<Self> {
        self.ensure_same_grid(mask)?;
        let keep = mask.truthy();
        let mut valid = self.valid.clone();
        Zip::from(&mut valid).and(&keep).for_each(|v, &k| *v = *v && k);
        Ok(Self { grid: self.grid, data: self.data.clone(), valid })
    }

    /// Replace masked cells by `fill`; the result is fully valid
    pub fn unmask(&self, fill: CellValue) -> Self {
        let mut data = self.data.clone();
        Zip::from(&mut data).and(&self.valid).for_each(|d, &v| {
            if !v {
                *d = fill;
            }
        });
        Self {
            grid: self.grid,
            data,
            valid: Array2::from_elem(self.dim(), true),
        }
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(CellValue) -> CellValue,
    {
        Self {
            grid: self.grid,
            data: self.data.mapv(f),
            valid: self.valid.clone(),
        }
    }

    /// Cell-wise binary operation; masked if either input is masked
    pub fn zip_with<F>(&self, other: &Raster, f: F) -> SclResult<Self>
    where
        F: Fn(CellValue, CellValue) -> CellValue,
    {
        self.ensure_same_grid(other)?;
        let mut data = Array2::zeros(self.dim());
        let mut valid = Array2::from_elem(self.dim(), false);
        Zip::from(&mut data)
            .and(&mut valid)
            .and(&self.data)
            .and(&self.valid)
            .and(&other.data)
            .and(&other.valid)
            .for_each(|d, v, &a, &va, &b, &vb| {
                *v = va && vb;
                if *v {
                    *d = f(a, b);
                }
            });
        Ok(Self { grid: self.grid, data, valid })
    }

    /// 1/0 raster of `self <op> rhs`, masked where self is masked
    pub fn compare(&self, op: CmpOp, rhs: CellValue) -> Self {
        self.map(|v| if op.apply(v, rhs) { 1.0 } else { 0.0 })
    }

    /// Cell-wise comparison against another raster
    pub fn compare_raster(&self, op: CmpOp, rhs: &Raster) -> SclResult<Self> {
        self.zip_with(rhs, |a, b| if op.apply(a, b) { 1.0 } else { 0.0 })
    }

    /// Map integer class values through a lookup; unmapped values become masked
    pub fn remap(&self, table: &BTreeMap<i64, CellValue>) -> Self {
        let mut data = Array2::zeros(self.dim());
        let mut valid = Array2::from_elem(self.dim(), false);
        Zip::from(&mut data)
            .and(&mut valid)
            .and(&self.data)
            .and(&self.valid)
            .for_each(|d, v, &src, &src_valid| {
                if src_valid {
                    if let Some(&mapped) = table.get(&(src.round() as i64)) {
                        *d = mapped;
                        *v = true;
                    }
                }
            });
        Self { grid: self.grid, data, valid }
    }

    pub fn clamp(&self, min: CellValue, max: CellValue) -> Self {
        self.map(|v| v.max(min).min(max))
    }

    /// Mask cells whose value is not finite (division by zero and the like)
    pub fn masking_non_finite(mut self) -> Self {
        Zip::from(&mut self.valid).and(&mut self.data).for_each(|v, d| {
            if !d.is_finite() {
                *v = false;
                *d = 0.0;
            }
        });
        self
    }

    /// Write `value` wherever `cond` is valid and non-zero
    pub fn where_set(&self, cond: &Raster, value: CellValue) -> SclResult<Self> {
        self.ensure_same_grid(cond)?;
        let set = cond.truthy();
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&mut out.valid)
            .and(&set)
            .for_each(|d, v, &s| {
                if s {
                    *d = value;
                    *v = true;
                }
            });
        Ok(out)
    }

    pub fn ensure_same_grid(&self, other: &Raster) -> SclResult<()> {
        if self.grid.same_as(&other.grid) {
            Ok(())
        } else {
            Err(SclError::GridMismatch(format!(
                "{}x{} @ {} vs {}x{} @ {}",
                self.grid.rows, self.grid.cols, self.grid.crs, other.grid.rows, other.grid.cols, other.grid.crs
            )))
        }
    }
}

/// On-disk raster layout: row-major values, `null` for masked cells
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterDocument {
    pub grid: GridSpec,
    pub values: Vec<Option<CellValue>>,
}

impl TryFrom<RasterDocument> for Raster {
    type Error = SclError;

    fn try_from(doc: RasterDocument) -> Result<Self, Self::Error> {
        if doc.values.len() != doc.grid.cell_count() {
            return Err(SclError::InvalidFormat(format!(
                "raster has {} values, grid needs {}",
                doc.values.len(),
                doc.grid.cell_count()
            )));
        }
        let cols = doc.grid.cols;
        Ok(Raster::from_fn(doc.grid, |r, c| {
            doc.values[r * cols + c].filter(|v| v.is_finite())
        }))
    }
}

impl From<Raster> for RasterDocument {
    fn from(raster: Raster) -> Self {
        let values = raster
            .data
            .iter()
            .zip(raster.valid.iter())
            .map(|(&d, &v)| if v { Some(d) } else { None })
            .collect();
        RasterDocument { grid: raster.grid, values }
    }
}

/// Error types for landscape unit processing
#[derive(Debug, thiserror::Error)]
pub enum SclError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing input '{name}': no snapshot in '{collection}' on or before {as_of}")]
    MissingInput {
        name: String,
        collection: String,
        as_of: chrono::NaiveDate,
    },

    #[error("Stale input '{name}': newest snapshot {effective} is older than {max_age_years} year(s) before {as_of}")]
    StaleInput {
        name: String,
        effective: chrono::NaiveDate,
        as_of: chrono::NaiveDate,
        max_age_years: u32,
    },

    #[error("Compute budget exceeded in {stage}: {cells} cells > max_pixels {budget}")]
    ComputeBudgetExceeded {
        stage: String,
        cells: u64,
        budget: u64,
    },

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl SclError {
    /// Errors that abort the whole run rather than one output
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, SclError::MissingInput { .. } | SclError::StaleInput { .. })
    }

    /// Errors confined to the output being produced
    pub fn is_output_local(&self) -> bool {
        matches!(self, SclError::ComputeBudgetExceeded { .. })
    }
}

/// Result type for landscape unit operations
pub type SclResult<T> = Result<T, SclError>;
