//! nightlights: calibrated nighttime-light time series per administrative unit
//!
//! Turns monthly VIIRS day/night band radiance and coverage rasters into
//! per-zone tables: coverage and value masking, capital-maximum outlier
//! suppression, per-unit temporal normalization, zonal aggregation with
//! area-based derived metrics, and radiance threshold calibration against
//! an independent reference raster.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, Cell, CoordinateSystem, GeoTransform, Grid, NtlError, NtlResult, Period, Raster,
    TimeSeries, Zone, ZoneSet, MAX_PERIODS, NODATA,
};

pub use config::PipelineConfig;
pub use core::{
    AreaProjection, CalibrationParams, GridMasker, MaskParams, OutlierPolicy, OutlierSuppressor,
    Pipeline, PipelineParams, TemporalNormalizer, ThresholdCalibrator, UnitFailure,
    ZonalAggregator, ZonalStatistic, ZonalTable,
};
