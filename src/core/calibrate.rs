use crate::core::mask::reclass_by_threshold;
use crate::core::zonal::ZoneIndex;
use crate::types::{NtlError, NtlResult, Raster, ZoneSet};
use serde::{Deserialize, Serialize};

/// Fewest zones for which a correlation is reported
pub const MIN_ZONES: usize = 3;

/// Most thresholds a single sweep may evaluate
pub const MAX_THRESHOLD_STEPS: usize = 100_000;

/// Radiance threshold sweep parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub threshold_min: f64,
    pub threshold_max: f64,
    pub threshold_step: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            threshold_min: 0.0,
            threshold_max: 5.0,
            threshold_step: 0.05,
        }
    }
}

impl CalibrationParams {
    pub fn validate(&self) -> NtlResult<()> {
        if !(self.threshold_step > 0.0) {
            return Err(NtlError::InvalidParameter(format!(
                "threshold step must be positive, got {}",
                self.threshold_step
            )));
        }
        if !(self.threshold_min <= self.threshold_max) {
            return Err(NtlError::InvalidParameter(format!(
                "threshold range [{}, {}] is empty",
                self.threshold_min, self.threshold_max
            )));
        }
        let count = (self.threshold_max - self.threshold_min) / self.threshold_step;
        if !(count < MAX_THRESHOLD_STEPS as f64) {
            return Err(NtlError::InvalidParameter(format!(
                "sweep [{}, {}] by {} exceeds {} thresholds",
                self.threshold_min, self.threshold_max, self.threshold_step, MAX_THRESHOLD_STEPS
            )));
        }
        Ok(())
    }

    /// Inclusive list of thresholds
    pub fn steps(&self) -> NtlResult<Vec<f64>> {
        threshold_steps(self.threshold_min, self.threshold_max, self.threshold_step)
    }
}

/// `min, min + step, ..., max`, endpoint included.
///
/// Each value is computed as `min + i * step` rather than by repeated
/// addition, and the last one snaps to `max` when within rounding.
pub fn threshold_steps(min: f64, max: f64, step: f64) -> NtlResult<Vec<f64>> {
    CalibrationParams {
        threshold_min: min,
        threshold_max: max,
        threshold_step: step,
    }
    .validate()?;

    let n = ((max - min) / step + 1e-9).floor() as usize;
    let mut steps: Vec<f64> = (0..=n).map(|i| min + i as f64 * step).collect();
    if let Some(last) = steps.last_mut() {
        if (*last - max).abs() <= 1e-9 * step {
            *last = max;
        }
    }
    Ok(steps)
}

/// Correlation recorded for one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPoint {
    pub threshold: f64,
    /// `None` when the column has no variance
    pub correlation: Option<f64>,
}

/// Threshold → correlation with the reference zonal sums
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCurve {
    pub points: Vec<ThresholdPoint>,
}

impl ThresholdCurve {
    pub fn push(&mut self, threshold: f64, correlation: Option<f64>) {
        self.points.push(ThresholdPoint {
            threshold,
            correlation,
        });
    }

    /// Point with the highest correlation; the lowest threshold wins ties
    pub fn best(&self) -> Option<ThresholdPoint> {
        let mut best: Option<(ThresholdPoint, f64)> = None;
        for p in &self.points {
            if let Some(c) = p.correlation {
                if best.map_or(true, |(_, b)| c > b) {
                    best = Some((*p, c));
                }
            }
        }
        best.map(|(p, _)| p)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Per-zone sums for every threshold of a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSweep {
    pub zone_ids: Vec<String>,
    /// Reference raster zonal sums, in zone order
    pub reference: Vec<f64>,
    pub thresholds: Vec<f64>,
    /// `sums[t][z]` for threshold `t` and zone `z`
    pub sums: Vec<Vec<f64>>,
}

/// Outcome of a calibration run
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    pub best_threshold: f64,
    pub best_correlation: f64,
    pub curve: ThresholdCurve,
    pub sweep: ThresholdSweep,
}

/// Radiance threshold selection against an independent reference raster
/// (e.g. population counts)
pub struct ThresholdCalibrator {
    params: CalibrationParams,
}

impl ThresholdCalibrator {
    pub fn new() -> Self {
        Self {
            params: CalibrationParams::default(),
        }
    }

    pub fn with_params(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    pub fn calibrate(
        &self,
        raster: &Raster,
        reference: &Raster,
        zones: &ZoneSet,
    ) -> NtlResult<CalibrationResult> {
        if zones.len() < MIN_ZONES {
            return Err(NtlError::InsufficientZones {
                found: zones.len(),
                required: MIN_ZONES,
            });
        }
        let thresholds = self.params.steps()?;
        log::info!(
            "Calibrating over {} thresholds in [{}, {}] against {} zones",
            thresholds.len(),
            self.params.threshold_min,
            self.params.threshold_max,
            zones.len()
        );

        let reference_sums = reference_sums(zones, reference)?;

        let index = ZoneIndex::build(zones, raster);
        if let Some(empty) = index.footprints.iter().find(|f| f.is_empty()) {
            log::warn!("Zone '{}' touches no raster cells", empty.zone_id);
            return Err(NtlError::EmptyZone {
                zone: empty.zone_id.clone(),
            });
        }

        let mut curve = ThresholdCurve::default();
        let mut sums = Vec::with_capacity(thresholds.len());
        for &threshold in &thresholds {
            let masked = reclass_by_threshold(raster, threshold as f32);
            // a zone with cells but none above the threshold holds no light
            let column: Vec<f64> = index
                .stats(&masked)?
                .into_iter()
                .map(|s| s.map_or(0.0, |s| s.sum))
                .collect();
            let r = pearson(&column, &reference_sums);
            log::debug!("Threshold {:.4}: correlation {:?}", threshold, r);
            curve.push(threshold, r);
            sums.push(column);
        }

        let best = curve.best().ok_or_else(|| NtlError::DegenerateRange {
            unit: "threshold curve".to_string(),
            value: self.params.threshold_min,
        })?;
        let best_correlation = best.correlation.unwrap_or(f64::NAN);
        log::info!(
            "Best threshold {} with correlation {:.4}",
            best.threshold,
            best_correlation
        );

        Ok(CalibrationResult {
            best_threshold: best.threshold,
            best_correlation,
            curve,
            sweep: ThresholdSweep {
                zone_ids: zones.iter().map(|z| z.id.clone()).collect(),
                reference: reference_sums,
                thresholds,
                sums,
            },
        })
    }
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

/// `calibrate(raster, reference, zones, min, max, step) -> (best, curve)`
pub fn calibrate(
    raster: &Raster,
    reference: &Raster,
    zones: &ZoneSet,
    threshold_min: f64,
    threshold_max: f64,
    threshold_step: f64,
) -> NtlResult<(f64, ThresholdCurve)> {
    let result = ThresholdCalibrator::with_params(CalibrationParams {
        threshold_min,
        threshold_max,
        threshold_step,
    })
    .calibrate(raster, reference, zones)?;
    Ok((result.best_threshold, result.curve))
}

fn reference_sums(zones: &ZoneSet, reference: &Raster) -> NtlResult<Vec<f64>> {
    let index = ZoneIndex::build(zones, reference);
    let stats = index.stats(reference)?;
    zones
        .iter()
        .zip(stats)
        .map(|(zone, s)| {
            s.map(|s| s.sum).ok_or_else(|| NtlError::EmptyZone {
                zone: zone.id.clone(),
            })
        })
        .collect()
}

/// Pearson correlation coefficient; `None` if either side has no variance
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, Zone};
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};
    use ndarray::{arr2, Array2};

    fn raster(data: Array2<f32>) -> Raster {
        Raster::new(
            data,
            GeoTransform::north_up(0.0, 4.0, 1.0, 1.0),
            CoordinateSystem::Geographic,
        )
    }

    /// One zone per grid row
    fn row_zones(n: usize) -> ZoneSet {
        let zones = (0..n)
            .map(|i| {
                let top = 4.0 - i as f64;
                Zone::new(
                    format!("{}", i + 1),
                    format!("row{}", i),
                    MultiPolygon::new(vec![polygon![
                        (x: 0.0, y: top - 1.0), (x: 4.0, y: top - 1.0), (x: 4.0, y: top), (x: 0.0, y: top),
                    ]]),
                )
            })
            .collect();
        ZoneSet::new(zones, CoordinateSystem::Geographic).unwrap()
    }

    #[test]
    fn test_threshold_steps_include_endpoint() {
        let steps = threshold_steps(0.0, 0.3, 0.1).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(*steps.last().unwrap(), 0.3);

        let steps = threshold_steps(0.0, 5.0, 0.05).unwrap();
        assert_eq!(steps.len(), 101);
        assert_eq!(*steps.last().unwrap(), 5.0);

        let single = threshold_steps(2.0, 2.0, 0.5).unwrap();
        assert_eq!(single, vec![2.0]);
    }

    #[test]
    fn test_threshold_steps_invalid() {
        assert!(threshold_steps(0.0, 1.0, 0.0).is_err());
        assert!(threshold_steps(1.0, 0.0, 0.1).is_err());
        assert!(matches!(
            threshold_steps(0.0, 1e12, 1e-3),
            Err(NtlError::InvalidParameter(_))
        ));
        assert!(threshold_steps(0.0, f64::INFINITY, 1.0).is_err());
        assert_eq!(threshold_steps(0.0, 10_000.0, 0.5).unwrap().len(), 20_001);
    }

    #[test]
    fn test_pearson() {
        assert_relative_eq!(pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap(), 1.0);
        assert_relative_eq!(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap(), -1.0);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_curve_best_prefers_lowest_on_tie() {
        let mut curve = ThresholdCurve::default();
        curve.push(0.0, Some(0.5));
        curve.push(0.5, None);
        curve.push(1.0, Some(0.9));
        curve.push(1.5, Some(0.9));
        assert_eq!(curve.best().unwrap().threshold, 1.0);
    }

    #[test]
    fn test_selects_threshold_with_linear_match() {
        // zone sums above 1.0 are exactly 2x the reference sums; zone 1's
        // dim cells spoil the correlation below it, and above 2.0 zone 1's
        // signal is cut
        let lights = raster(arr2(&[
            [2.0, 1.0, 1.0, 1.0],
            [4.0, 0.0, 0.0, 0.0],
            [6.0, 0.0, 0.0, 0.0],
            [8.0, 0.0, 0.0, 0.0],
        ]));
        let reference = raster(arr2(&[
            [1.0, 0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0, 0.0],
            [3.0, 0.0, 0.0, 0.0],
            [4.0, 0.0, 0.0, 0.0],
        ]));

        let (best, curve) = calibrate(&lights, &reference, &row_zones(4), 0.0, 2.0, 0.5).unwrap();
        assert_eq!(best, 1.0);
        assert_eq!(curve.len(), 5);
        let at_best = curve.points.iter().find(|p| p.threshold == 1.0).unwrap();
        assert_relative_eq!(at_best.correlation.unwrap(), 1.0, epsilon = 1e-12);
        assert!(curve.points[0].correlation.unwrap() < 1.0 - 1e-6);
        assert!(curve.points[4].correlation.unwrap() < 1.0 - 1e-6);
    }

    #[test]
    fn test_insufficient_zones() {
        let lights = raster(Array2::from_elem((4, 4), 1.0));
        let result = calibrate(&lights, &lights, &row_zones(2), 0.0, 1.0, 0.5);
        assert!(matches!(
            result,
            Err(NtlError::InsufficientZones { found: 2, required: 3 })
        ));
    }

    #[test]
    fn test_sweep_records_every_threshold() {
        let lights = raster(Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f32));
        let reference = raster(Array2::from_shape_fn((4, 4), |(i, _)| i as f32 + 1.0));
        let result = ThresholdCalibrator::with_params(CalibrationParams {
            threshold_min: 0.0,
            threshold_max: 3.0,
            threshold_step: 1.0,
        })
        .calibrate(&lights, &reference, &row_zones(4))
        .unwrap();

        assert_eq!(result.sweep.thresholds, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(result.sweep.sums.len(), 4);
        // row 0 holds 0,1,2,3: above 2.0 only 3 survives
        assert_eq!(result.sweep.sums[2][0], 3.0);
        assert_eq!(result.sweep.reference, vec![4.0, 8.0, 12.0, 16.0]);
    }
}
