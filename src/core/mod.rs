//! Core nighttime-light processing modules

pub mod area;
pub mod calibrate;
pub mod mask;
pub mod mosaic;
pub mod normalize;
pub mod outliers;
pub mod pipeline;
pub mod table;
pub mod zonal;

// Re-export main types
pub use area::AreaProjection;
pub use calibrate::{
    calibrate, pearson, threshold_steps, CalibrationParams, CalibrationResult, ThresholdCalibrator,
    ThresholdCurve, ThresholdPoint, ThresholdSweep,
};
pub use mask::{mask, reclass_by_threshold, remove_negative, GridMasker, MaskParams, ValueComparison};
pub use mosaic::{clip_to_zone, mosaic, mosaic_into};
pub use normalize::{NormalizedRaster, TemporalNormalizer};
pub use outliers::{
    interpolate_above, max_in_zone, suppress_above, IdwParams, OutlierPolicy, OutlierSuppressor,
};
pub use pipeline::{
    CalibrationInput, CountryJob, CountryOutput, PeriodInput, Pipeline, PipelineParams, Stage,
    StageContext, UnitFailure,
};
pub use table::{
    Column, DerivedMetrics, PeriodDerived, PeriodValue, SummaryRow, SummaryTable, ZonalRow,
    ZonalStatistic, ZonalTable, ZoneStats,
};
pub use zonal::{ZonalAggregator, ZoneFootprint, ZoneIndex};
