//! Country-level processing: mask → capital-max suppression → per-unit
//! normalization → zonal aggregation.
//!
//! Each country is an independent unit of work. A failure is reported with
//! the country (or admin unit) and the stage it happened in, and never stops
//! sibling countries in [`Pipeline::run_countries`]. Within a country, an
//! admin unit that cannot be normalized is left out of the normalized
//! products and listed in [`CountryOutput::skipped_units`].

use crate::core::area::AreaProjection;
use crate::core::calibrate::{CalibrationParams, CalibrationResult, ThresholdCalibrator};
use crate::core::mask::{GridMasker, MaskParams};
use crate::core::mosaic::{clip_to_zone, mosaic_into};
use crate::core::normalize::{NormalizedRaster, TemporalNormalizer};
use crate::core::outliers::{OutlierPolicy, OutlierSuppressor};
use crate::core::table::{PeriodValue, ZonalStatistic, ZonalTable};
use crate::core::zonal::ZonalAggregator;
use crate::types::{NtlError, Period, Raster, TimeSeries, Zone, ZoneSet, MAX_PERIODS};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Processing stage, reported with failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Loading,
    Masking,
    OutlierSuppression,
    Clipping,
    Normalization,
    Mosaic,
    Aggregation,
    Calibration,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "loading",
            Stage::Masking => "masking",
            Stage::OutlierSuppression => "outlier suppression",
            Stage::Clipping => "clipping",
            Stage::Normalization => "normalization",
            Stage::Mosaic => "mosaic",
            Stage::Aggregation => "aggregation",
            Stage::Calibration => "calibration",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Error of one unit of work with enough context to re-run just that unit
#[derive(Debug, thiserror::Error)]
#[error("{unit} failed during {stage}: {source}")]
pub struct UnitFailure {
    pub unit: String,
    pub stage: Stage,
    #[source]
    pub source: NtlError,
}

/// Attach unit and stage context to an `NtlResult`
pub trait StageContext<T> {
    fn at(self, unit: &str, stage: Stage) -> Result<T, UnitFailure>;
}

impl<T> StageContext<T> for Result<T, NtlError> {
    fn at(self, unit: &str, stage: Stage) -> Result<T, UnitFailure> {
        self.map_err(|source| UnitFailure {
            unit: unit.to_string(),
            stage,
            source,
        })
    }
}

/// Radiance and coverage rasters of one period
#[derive(Debug, Clone)]
pub struct PeriodInput {
    pub period: Period,
    pub radiance: Raster,
    pub coverage: Raster,
}

/// Radiance composite and an independent reference grid (e.g. population
/// counts) on the same cells
#[derive(Debug, Clone)]
pub struct CalibrationInput {
    pub radiance: Raster,
    pub reference: Raster,
}

/// Everything needed to process one country
#[derive(Debug, Clone)]
pub struct CountryJob {
    pub country: String,
    pub inputs: Vec<PeriodInput>,
    /// Stable bright reference region used for the outlier cap
    pub capital: Zone,
    /// Administrative units to normalize and aggregate over
    pub units: ZoneSet,
    pub calibration: Option<CalibrationInput>,
}

/// Pipeline parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub periods: usize,
    pub mask: MaskParams,
    pub outliers: OutlierPolicy,
    /// Area projection; the country's registered projection when unset
    pub area: Option<AreaProjection>,
    pub normalize: bool,
    /// Threshold sweep run when the job carries a calibration input
    pub calibration: Option<CalibrationParams>,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            periods: MAX_PERIODS,
            mask: MaskParams::default(),
            outliers: OutlierPolicy::default(),
            area: None,
            normalize: true,
            calibration: None,
        }
    }
}

/// Products of one country run
#[derive(Debug)]
pub struct CountryOutput {
    pub country: String,
    /// Capital maximum used as the outlier cap, per period
    pub capital_max: Vec<PeriodValue>,
    /// Masked and outlier-suppressed national rasters
    pub suppressed: TimeSeries,
    /// Rescaled national rasters, mosaicked from per-unit series
    pub normalized: Option<TimeSeries>,
    /// Zonal sums of the suppressed rasters
    pub radiance: ZonalTable,
    /// Zonal sums of the normalized rasters, one row per normalized unit
    pub normalized_table: Option<ZonalTable>,
    pub calibration: Option<CalibrationResult>,
    /// Admin units left out of the normalized products
    pub skipped_units: Vec<UnitFailure>,
}

/// Per-unit normalization assembled onto the national grid
struct NormalizedUnits {
    series: TimeSeries,
    units: Vec<Zone>,
    skipped: Vec<UnitFailure>,
}

/// Country processing pipeline
pub struct Pipeline {
    params: PipelineParams,
}

impl Pipeline {
    pub fn new(params: PipelineParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Process independent countries concurrently
    pub fn run_countries(&self, jobs: Vec<CountryJob>) -> Vec<Result<CountryOutput, UnitFailure>> {
        log::info!("Running pipeline for {} countries", jobs.len());

        #[cfg(feature = "parallel")]
        let results: Vec<_> = {
            use rayon::prelude::*;
            jobs.into_par_iter().map(|job| self.run_country(job)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = jobs.into_iter().map(|job| self.run_country(job)).collect();

        for failure in results.iter().filter_map(|r| r.as_ref().err()) {
            log::warn!("Skipping {}: {}", failure.unit, failure);
        }
        results
    }

    /// Process one country end to end
    pub fn run_country(&self, job: CountryJob) -> Result<CountryOutput, UnitFailure> {
        let country = job.country.clone();
        log::info!("Processing {} ({} period inputs)", country, job.inputs.len());

        let inputs = self.order_inputs(&country, job.inputs)?;

        let masker = GridMasker::with_params(self.params.mask.clone());
        let suppressor = OutlierSuppressor::with_policy(self.params.outliers.clone());

        let prepared = self.prepare_periods(&country, &inputs, &job.capital, &masker, &suppressor)?;
        let mut capital_max = Vec::with_capacity(prepared.len());
        let mut suppressed = Vec::with_capacity(prepared.len());
        for (period, (raster, cap)) in prepared.into_iter().enumerate() {
            capital_max.push(PeriodValue {
                period: (period + 1) as Period,
                value: cap,
            });
            suppressed.push(raster);
        }
        let suppressed = TimeSeries::new(country.as_str(), suppressed).at(&country, Stage::Masking)?;

        let projection = self
            .params
            .area
            .unwrap_or_else(|| AreaProjection::for_country(&country));
        let aggregator = ZonalAggregator::new(projection);
        let radiance = aggregator
            .aggregate(&job.units, &suppressed, ZonalStatistic::Sum)
            .at(&country, Stage::Aggregation)?;

        let mut skipped_units = Vec::new();
        let (normalized, normalized_table) = if self.params.normalize {
            let NormalizedUnits {
                series,
                units,
                skipped,
            } = self.normalize_units(&country, &suppressed, &job.units)?;
            skipped_units = skipped;

            let table = if units.is_empty() {
                log::warn!("No unit of {} could be normalized", country);
                None
            } else {
                let units = ZoneSet::new(units, job.units.coordinate_system)
                    .at(&country, Stage::Aggregation)?;
                Some(
                    aggregator
                        .aggregate(&units, &series, ZonalStatistic::Sum)
                        .at(&country, Stage::Aggregation)?,
                )
            };
            (Some(series), table)
        } else {
            (None, None)
        };

        let calibration = match (&self.params.calibration, &job.calibration) {
            (Some(params), Some(input)) => Some(
                ThresholdCalibrator::with_params(params.clone())
                    .calibrate(&input.radiance, &input.reference, &job.units)
                    .at(&country, Stage::Calibration)?,
            ),
            (Some(_), None) => {
                log::warn!("No calibration input for {}, skipping threshold sweep", country);
                None
            }
            _ => None,
        };

        log::info!("Finished {}", country);
        Ok(CountryOutput {
            country,
            capital_max,
            suppressed,
            normalized,
            radiance,
            normalized_table,
            calibration,
            skipped_units,
        })
    }

    /// Inputs sorted by period, one per period in `1..=periods`
    fn order_inputs(
        &self,
        country: &str,
        inputs: Vec<PeriodInput>,
    ) -> Result<Vec<PeriodInput>, UnitFailure> {
        if self.params.periods == 0 || self.params.periods > MAX_PERIODS {
            return Err(NtlError::InvalidParameter(format!(
                "period count must be in 1..={}, got {}",
                MAX_PERIODS, self.params.periods
            )))
            .at(country, Stage::Loading);
        }

        let mut by_period = BTreeMap::new();
        for input in inputs {
            let period = input.period;
            if by_period.insert(period, input).is_some() {
                return Err(NtlError::InvalidParameter(format!(
                    "period {:02} supplied twice",
                    period
                )))
                .at(country, Stage::Loading);
            }
        }

        let mut ordered = Vec::with_capacity(self.params.periods);
        for period in 1..=self.params.periods as Period {
            match by_period.remove(&period) {
                Some(input) => ordered.push(input),
                None => {
                    return Err(NtlError::MissingInput {
                        unit: country.to_string(),
                        period,
                    })
                    .at(country, Stage::Loading)
                }
            }
        }
        Ok(ordered)
    }

    /// Mask and suppress every period; returns (raster, capital max)
    fn prepare_periods(
        &self,
        country: &str,
        inputs: &[PeriodInput],
        capital: &Zone,
        masker: &GridMasker,
        suppressor: &OutlierSuppressor,
    ) -> Result<Vec<(Raster, f64)>, UnitFailure> {
        let prepare = |input: &PeriodInput| -> Result<(Raster, f64), UnitFailure> {
            let unit = format!("{}/{:02}", country, input.period);
            let masked = masker
                .apply(&input.radiance, &input.coverage)
                .at(&unit, Stage::Masking)?;
            suppressor
                .apply(&masked, capital)
                .at(&unit, Stage::OutlierSuppression)
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            inputs.par_iter().map(prepare).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            inputs.iter().map(prepare).collect()
        }
    }

    /// Clip, normalize and paste back one admin unit at a time.
    ///
    /// Units that fail to clip or normalize stay nodata on the national grid
    /// and are reported as skipped; the other units are unaffected.
    fn normalize_units(
        &self,
        country: &str,
        suppressed: &TimeSeries,
        units: &ZoneSet,
    ) -> Result<NormalizedUnits, UnitFailure> {
        let mut merged: Vec<Raster> = suppressed
            .rasters()
            .iter()
            .map(|r| r.with_data(Array2::from_elem(r.shape(), r.nodata)))
            .collect();
        let mut kept = Vec::with_capacity(units.len());
        let mut skipped = Vec::new();

        for zone in units.iter() {
            let unit = format!("{}/{}", country, zone.name);
            match normalize_unit(&unit, suppressed, zone) {
                Ok(normalized) => {
                    for n in &normalized {
                        mosaic_into(&mut merged[(n.period - 1) as usize], &n.raster)
                            .at(&unit, Stage::Mosaic)?;
                    }
                    kept.push(zone.clone());
                }
                Err(failure) => {
                    log::warn!("Leaving {} out of the normalized series: {}", unit, failure);
                    skipped.push(failure);
                }
            }
        }

        let series = TimeSeries::new(format!("{}_norm", country), merged).at(country, Stage::Mosaic)?;
        Ok(NormalizedUnits {
            series,
            units: kept,
            skipped,
        })
    }
}

/// One unit's clipped series, rescaled; dropped once pasted into the mosaic
fn normalize_unit(
    unit: &str,
    suppressed: &TimeSeries,
    zone: &Zone,
) -> Result<Vec<NormalizedRaster>, UnitFailure> {
    let clipped = suppressed
        .rasters()
        .iter()
        .map(|r| clip_to_zone(r, zone))
        .collect::<Result<Vec<_>, _>>()
        .at(unit, Stage::Clipping)?;
    let series = TimeSeries::new(zone.name.as_str(), clipped).at(unit, Stage::Clipping)?;
    TemporalNormalizer::normalize(&series).at(unit, Stage::Normalization)
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineParams::default())
    }
}
