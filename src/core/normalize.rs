use crate::types::{NtlError, NtlResult, Period, Raster, TimeSeries};
use ndarray::{Array3, Axis};

/// One rescaled period of a unit's series
#[derive(Debug, Clone)]
pub struct NormalizedRaster {
    pub unit: String,
    pub period: Period,
    pub raster: Raster,
}

/// Per-unit rescaling of a period series to [0, 1].
///
/// The reference range is the minimum and maximum over every valid cell of
/// the whole stack, so a dim period is scaled against the unit's year and
/// not against itself.
pub struct TemporalNormalizer;

impl TemporalNormalizer {
    pub fn normalize(series: &TimeSeries) -> NtlResult<Vec<NormalizedRaster>> {
        let stack = Self::stack(series);
        let nodata = series.rasters()[0].nodata;

        let (min, max) = valid_range(&stack, nodata).ok_or_else(|| NtlError::EmptyZone {
            zone: series.unit.clone(),
        })?;
        if max == min {
            return Err(NtlError::DegenerateRange {
                unit: series.unit.clone(),
                value: min,
            });
        }
        log::info!(
            "Normalizing '{}' over {} periods with range [{}, {}]",
            series.unit,
            series.len(),
            min,
            max
        );

        let span = max - min;
        let scaled = stack.mapv(|v| {
            if v == nodata {
                nodata
            } else {
                ((v as f64 - min) / span) as f32
            }
        });

        Ok(series
            .iter()
            .zip(scaled.axis_iter(Axis(0)))
            .map(|((period, template), layer)| NormalizedRaster {
                unit: series.unit.clone(),
                period,
                raster: template.with_data(layer.to_owned()),
            })
            .collect())
    }

    /// (period, row, col) stack of a series
    pub fn stack(series: &TimeSeries) -> Array3<f32> {
        let (rows, cols) = series.rasters()[0].shape();
        let mut stack = Array3::from_elem((series.len(), rows, cols), 0.0f32);
        for (mut layer, raster) in stack.axis_iter_mut(Axis(0)).zip(series.rasters()) {
            layer.assign(&raster.data);
        }
        stack
    }
}

fn valid_range(stack: &Array3<f32>, nodata: f32) -> Option<(f64, f64)> {
    stack
        .iter()
        .filter(|&&v| v != nodata)
        .fold(None, |acc, &v| {
            let v = v as f64;
            Some(match acc {
                None => (v, v),
                Some((lo, hi)) => (f64::min(lo, v), f64::max(hi, v)),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, NODATA};
    use ndarray::{arr2, Array2};

    fn raster(data: Array2<f32>) -> Raster {
        Raster::new(
            data,
            GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
            CoordinateSystem::Geographic,
        )
    }

    #[test]
    fn test_global_range_rescaling() {
        let series = TimeSeries::new(
            "Nord",
            vec![
                raster(arr2(&[[2.0, NODATA]])),
                raster(arr2(&[[4.0, NODATA]])),
                raster(arr2(&[[6.0, NODATA]])),
            ],
        )
        .unwrap();

        let out = TemporalNormalizer::normalize(&series).unwrap();
        let cell: Vec<f32> = out.iter().map(|n| n.raster.data[[0, 0]]).collect();
        assert_eq!(cell, vec![0.0, 0.5, 1.0]);
        assert!(out.iter().all(|n| n.raster.data[[0, 1]] == NODATA));
        assert_eq!(out.iter().map(|n| n.period).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(out.iter().all(|n| n.unit == "Nord"));
    }

    #[test]
    fn test_dim_period_not_stretched() {
        let series = TimeSeries::new(
            "Sud",
            vec![raster(arr2(&[[1.0, 2.0]])), raster(arr2(&[[1.0, 11.0]]))],
        )
        .unwrap();
        let out = TemporalNormalizer::normalize(&series).unwrap();
        // period 1's own maximum maps to 0.1, not 1.0
        assert!((out[0].raster.data[[0, 1]] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_constant_series_is_degenerate() {
        let series = TimeSeries::new(
            "Centre",
            vec![raster(arr2(&[[3.0, NODATA]])), raster(arr2(&[[3.0, 3.0]]))],
        )
        .unwrap();
        match TemporalNormalizer::normalize(&series) {
            Err(NtlError::DegenerateRange { unit, value }) => {
                assert_eq!(unit, "Centre");
                assert_eq!(value, 3.0);
            }
            other => panic!("expected DegenerateRange, got {:?}", other),
        }
    }

    #[test]
    fn test_all_nodata_series_is_empty() {
        let series = TimeSeries::new("Nippes", vec![raster(arr2(&[[NODATA]]))]).unwrap();
        assert!(matches!(
            TemporalNormalizer::normalize(&series),
            Err(NtlError::EmptyZone { .. })
        ));
    }

    #[test]
    fn test_metadata_preserved() {
        let mut r = raster(arr2(&[[0.0, 8.0]]));
        r.geo_transform = GeoTransform::north_up(-73.0, 19.0, 0.004, 0.004);
        let series = TimeSeries::new("Artibonite", vec![r.clone()]).unwrap();
        let out = TemporalNormalizer::normalize(&series).unwrap();
        assert_eq!(out[0].raster.geo_transform, r.geo_transform);
        assert_eq!(out[0].raster.nodata, r.nodata);
    }
}
