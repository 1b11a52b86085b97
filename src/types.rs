use geo::{BoundingRect, MultiPolygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Real-valued cell data (radiance, coverage count, population count)
pub type Cell = f32;

/// 2D cell grid (rows x cols)
pub type Grid = Array2<Cell>;

/// Reserved value marking a cell without a valid measurement
pub const NODATA: Cell = -99999.0;

/// Calendar period number within a year (1-based, at most 12)
pub type Period = u8;

/// Maximum number of periods in a series (one per calendar month)
pub const MAX_PERIODS: usize = 12;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude in degrees)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
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
    /// North-up transform with square-ish cells (`pixel_height` is negated)
    pub fn north_up(top_left_x: f64, top_left_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: cell_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -cell_height.abs(),
        }
    }

    /// Build from the six-term GDAL array
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

    /// World coordinates of the centre of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a world coordinate. Ignores rotation terms.
    pub fn world_to_cell(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.top_left_y) / self.pixel_height,
            (x - self.top_left_x) / self.pixel_width,
        )
    }

    /// Transform of a window whose top-left cell is (row, col) of this grid
    pub fn offset(&self, row: usize, col: usize) -> Self {
        Self {
            top_left_x: self.top_left_x + col as f64 * self.pixel_width + row as f64 * self.rotation_x,
            top_left_y: self.top_left_y + col as f64 * self.rotation_y + row as f64 * self.pixel_height,
            ..*self
        }
    }
}

/// Single-band georeferenced raster with a nodata sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: Grid,
    pub geo_transform: GeoTransform,
    pub coordinate_system: CoordinateSystem,
    pub nodata: Cell,
}

impl Raster {
    /// Create a raster using the default sentinel
    pub fn new(data: Grid, geo_transform: GeoTransform, coordinate_system: CoordinateSystem) -> Self {
        Self {
            data,
            geo_transform,
            coordinate_system,
            nodata: NODATA,
        }
    }

    /// New raster sharing this raster's spatial metadata and sentinel
    pub fn with_data(&self, data: Grid) -> Self {
        Self {
            data,
            geo_transform: self.geo_transform,
            coordinate_system: self.coordinate_system,
            nodata: self.nodata,
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    #[inline]
    pub fn is_valid(&self, value: Cell) -> bool {
        value != self.nodata
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != self.nodata).count()
    }

    /// Fail with `ShapeMismatch` unless `other` has the same shape
    pub fn ensure_same_shape(&self, other: &Raster) -> NtlResult<()> {
        if self.shape() != other.shape() {
            return Err(NtlError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            });
        }
        Ok(())
    }

    /// Extent in world coordinates
    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.shape();
        let gt = &self.geo_transform;
        let x0 = gt.top_left_x;
        let x1 = gt.top_left_x + cols as f64 * gt.pixel_width;
        let y0 = gt.top_left_y;
        let y1 = gt.top_left_y + rows as f64 * gt.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }
}

/// One administrative (or reference) polygon
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

impl Zone {
    pub fn new(id: impl Into<String>, name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            geometry,
        }
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.geometry.bounding_rect().map(|r| BoundingBox {
            min_x: r.min().x,
            max_x: r.max().x,
            min_y: r.min().y,
            max_y: r.max().y,
        })
    }
}

/// Ordered polygon collection with unique zone identifiers
#[derive(Debug, Clone)]
pub struct ZoneSet {
    zones: Vec<Zone>,
    pub coordinate_system: CoordinateSystem,
}

impl ZoneSet {
    /// Build a zone set, rejecting duplicate identifiers
    pub fn new(zones: Vec<Zone>, coordinate_system: CoordinateSystem) -> NtlResult<Self> {
        {
            let mut seen = HashSet::with_capacity(zones.len());
            for zone in &zones {
                if !seen.insert(zone.id.as_str()) {
                    return Err(NtlError::InvalidParameter(format!(
                        "duplicate zone identifier '{}'",
                        zone.id
                    )));
                }
            }
        }
        Ok(Self {
            zones,
            coordinate_system,
        })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Zone> {
        self.zones.iter()
    }
}

/// Aligned rasters for one spatial unit, one per period (index 0 = period 1)
#[derive(Debug, Clone)]
pub struct TimeSeries {
    pub unit: String,
    rasters: Vec<Raster>,
}

impl TimeSeries {
    /// Build a series from rasters already ordered by period
    pub fn new(unit: impl Into<String>, rasters: Vec<Raster>) -> NtlResult<Self> {
        let unit = unit.into();
        if rasters.is_empty() {
            return Err(NtlError::MissingInput { unit, period: 1 });
        }
        if rasters.len() > MAX_PERIODS {
            return Err(NtlError::InvalidParameter(format!(
                "series for '{}' has {} periods, at most {} allowed",
                unit,
                rasters.len(),
                MAX_PERIODS
            )));
        }
        let first = &rasters[0];
        for raster in &rasters[1..] {
            first.ensure_same_shape(raster)?;
            if raster.geo_transform != first.geo_transform
                || raster.coordinate_system != first.coordinate_system
                || raster.nodata != first.nodata
            {
                return Err(NtlError::InvalidParameter(format!(
                    "series for '{}' mixes grids with different georeferencing or nodata",
                    unit
                )));
            }
        }
        Ok(Self { unit, rasters })
    }

    /// Build a series of `expected` periods from a keyed map.
    ///
    /// A gap in `1..=expected` is a `MissingInput` error.
    pub fn from_periods(
        unit: impl Into<String>,
        mut by_period: BTreeMap<Period, Raster>,
        expected: usize,
    ) -> NtlResult<Self> {
        let unit = unit.into();
        let mut rasters = Vec::with_capacity(expected);
        for period in 1..=expected as Period {
            match by_period.remove(&period) {
                Some(raster) => rasters.push(raster),
                None => return Err(NtlError::MissingInput { unit, period }),
            }
        }
        if let Some(extra) = by_period.keys().next() {
            return Err(NtlError::InvalidParameter(format!(
                "period {} is outside the expected range 1..={}",
                extra, expected
            )));
        }
        Self::new(unit, rasters)
    }

    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    pub fn rasters(&self) -> &[Raster] {
        &self.rasters
    }

    pub fn into_rasters(self) -> Vec<Raster> {
        self.rasters
    }

    /// Raster for a 1-based period
    pub fn period(&self, period: Period) -> Option<&Raster> {
        (period as usize).checked_sub(1).and_then(|i| self.rasters.get(i))
    }

    /// (period, raster) pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (Period, &Raster)> {
        self.rasters
            .iter()
            .enumerate()
            .map(|(i, r)| ((i + 1) as Period, r))
    }
}

/// Error types for nighttime-light processing
#[derive(Debug, thiserror::Error)]
pub enum NtlError {
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("zone '{zone}' has no valid cells")]
    EmptyZone { zone: String },

    #[error("degenerate value range for '{unit}' (all valid values equal {value})")]
    DegenerateRange { unit: String, value: f64 },

    #[error("zone '{zone}' has no value for period {period:02}")]
    IncompleteJoin { zone: String, period: Period },

    #[error("{found} zones supplied, at least {required} required for correlation")]
    InsufficientZones { found: usize, required: usize },

    #[error("missing input for '{unit}' period {period:02}")]
    MissingInput { unit: String, period: Period },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for nighttime-light operations
pub type NtlResult<T> = Result<T, NtlError>;
