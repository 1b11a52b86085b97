use crate::core::area::AreaProjection;
use crate::core::table::{
    DerivedMetrics, PeriodValue, SummaryRow, SummaryTable, ZonalRow, ZonalStatistic, ZonalTable,
    ZoneStats,
};
use crate::types::{GeoTransform, NtlError, NtlResult, Raster, TimeSeries, Zone, ZoneSet};
use geo::{Contains, Point};

/// Cells of one grid whose centres fall inside a zone polygon
#[derive(Debug, Clone)]
pub struct ZoneFootprint {
    pub zone_id: String,
    pub cells: Vec<(usize, usize)>,
}

impl ZoneFootprint {
    /// Rasterize `zone` against a grid of `shape` cells
    pub fn build(zone: &Zone, geo_transform: &GeoTransform, shape: (usize, usize)) -> Self {
        let (rows, cols) = shape;
        let mut cells = Vec::new();

        if let Some(bbox) = zone.bounds() {
            let (r0, c0) = geo_transform.world_to_cell(bbox.min_x, bbox.max_y);
            let (r1, c1) = geo_transform.world_to_cell(bbox.max_x, bbox.min_y);
            let row_range = clamp_range(r0.min(r1), r0.max(r1), rows);
            let col_range = clamp_range(c0.min(c1), c0.max(c1), cols);

            for i in row_range {
                for j in col_range.clone() {
                    let (x, y) = geo_transform.cell_center(i, j);
                    if zone.geometry.contains(&Point::new(x, y)) {
                        cells.push((i, j));
                    }
                }
            }
        }

        Self {
            zone_id: zone.id.clone(),
            cells,
        }
    }

    /// Valid cell values of `raster` within the footprint
    pub fn values<'a>(&'a self, raster: &'a Raster) -> impl Iterator<Item = f64> + 'a {
        self.cells.iter().filter_map(move |&(i, j)| {
            let v = raster.data[[i, j]];
            raster.is_valid(v).then_some(v as f64)
        })
    }

    pub fn stats(&self, raster: &Raster) -> Option<ZoneStats> {
        ZoneStats::from_values(self.values(raster))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn clamp_range(lo: f64, hi: f64, len: usize) -> std::ops::Range<usize> {
    let start = lo.floor().max(0.0) as usize;
    let end = (hi.ceil().max(0.0) as usize).min(len);
    start.min(end)..end
}

/// Footprints of every zone of a set against one grid
#[derive(Debug, Clone)]
pub struct ZoneIndex {
    pub geo_transform: GeoTransform,
    pub shape: (usize, usize),
    pub footprints: Vec<ZoneFootprint>,
}

impl ZoneIndex {
    /// Rasterize all zones against the grid of `template`
    pub fn build(zones: &ZoneSet, template: &Raster) -> Self {
        let geo_transform = template.geo_transform;
        let shape = template.shape();

        #[cfg(feature = "parallel")]
        let footprints = {
            use rayon::prelude::*;
            zones
                .zones()
                .par_iter()
                .map(|z| ZoneFootprint::build(z, &geo_transform, shape))
                .collect::<Vec<_>>()
        };
        #[cfg(not(feature = "parallel"))]
        let footprints = zones
            .iter()
            .map(|z| ZoneFootprint::build(z, &geo_transform, shape))
            .collect::<Vec<_>>();

        let empty = footprints.iter().filter(|f| f.is_empty()).count();
        if empty > 0 {
            log::warn!("{} of {} zones cover no cell centres", empty, footprints.len());
        }
        log::debug!("Built zone index for {} zones on {:?} grid", footprints.len(), shape);

        Self {
            geo_transform,
            shape,
            footprints,
        }
    }

    /// True when `raster` lies on the grid this index was built for
    pub fn matches(&self, raster: &Raster) -> bool {
        raster.shape() == self.shape && raster.geo_transform == self.geo_transform
    }

    /// Statistics for every zone, in zone order
    pub fn stats(&self, raster: &Raster) -> NtlResult<Vec<Option<ZoneStats>>> {
        if raster.shape() != self.shape {
            return Err(NtlError::ShapeMismatch {
                expected: self.shape,
                found: raster.shape(),
            });
        }

        #[cfg(feature = "parallel")]
        let stats = {
            use rayon::prelude::*;
            self.footprints.par_iter().map(|f| f.stats(raster)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let stats = self.footprints.iter().map(|f| f.stats(raster)).collect();

        Ok(stats)
    }
}

/// Zonal aggregation over single rasters and period series
pub struct ZonalAggregator {
    projection: AreaProjection,
}

impl ZonalAggregator {
    /// Aggregator computing zone areas with `projection`
    pub fn new(projection: AreaProjection) -> Self {
        Self { projection }
    }

    /// Aggregator using the projection registered for a country
    pub fn for_country(iso: &str) -> Self {
        Self::new(AreaProjection::for_country(iso))
    }

    pub fn projection(&self) -> AreaProjection {
        self.projection
    }

    /// Zone area in km² using the configured projection
    pub fn zone_area(&self, zones: &ZoneSet, zone: &Zone) -> f64 {
        self.projection
            .resolve(zones.coordinate_system)
            .area_km2(&zone.geometry)
    }

    /// Per-period statistic for every zone, joined on zone identifier.
    ///
    /// Sum tables also carry the derived annual, area-rate and percent
    /// deviation metrics. A zone covering no cell centre, or without a valid
    /// cell in any period, fails with `EmptyZone`; a zone missing only some
    /// periods fails with `IncompleteJoin`.
    pub fn aggregate(
        &self,
        zones: &ZoneSet,
        series: &TimeSeries,
        statistic: ZonalStatistic,
    ) -> NtlResult<ZonalTable> {
        log::info!(
            "Aggregating {} over {} zones and {} periods for {}",
            statistic,
            zones.len(),
            series.len(),
            series.unit
        );

        let first = series
            .period(1)
            .ok_or_else(|| NtlError::MissingInput {
                unit: series.unit.clone(),
                period: 1,
            })?;
        // all periods share a grid, so one index serves the whole series
        let index = ZoneIndex::build(zones, first);
        if let Some(empty) = index.footprints.iter().find(|f| f.is_empty()) {
            return Err(NtlError::EmptyZone {
                zone: empty.zone_id.clone(),
            });
        }

        let mut columns: Vec<Vec<Option<ZoneStats>>> = Vec::with_capacity(series.len());
        for (period, raster) in series.iter() {
            log::debug!("Zonal {} for period {:02}", statistic, period);
            columns.push(index.stats(raster)?);
        }

        let mut rows = Vec::with_capacity(zones.len());
        for (z, zone) in zones.iter().enumerate() {
            if columns.iter().all(|column| column[z].is_none()) {
                return Err(NtlError::EmptyZone {
                    zone: zone.id.clone(),
                });
            }
            let mut values = Vec::with_capacity(series.len());
            for (p, column) in columns.iter().enumerate() {
                let period = (p + 1) as u8;
                let stats = column[z].ok_or_else(|| NtlError::IncompleteJoin {
                    zone: zone.id.clone(),
                    period,
                })?;
                values.push(PeriodValue {
                    period,
                    value: stats.get(statistic),
                });
            }

            let derived = if statistic == ZonalStatistic::Sum {
                let area = self.zone_area(zones, zone);
                Some(DerivedMetrics::from_sums(&zone.id, &values, area)?)
            } else {
                None
            };

            rows.push(ZonalRow {
                zone_id: zone.id.clone(),
                name: zone.name.clone(),
                values,
                derived,
            });
        }

        log::info!("Zonal table complete: {} rows", rows.len());
        Ok(ZonalTable {
            statistic,
            periods: series.len(),
            rows,
        })
    }

    /// Statistics of one independent raster (e.g. population counts)
    pub fn summarize(
        &self,
        zones: &ZoneSet,
        raster: &Raster,
        statistics: &[ZonalStatistic],
    ) -> NtlResult<SummaryTable> {
        if statistics.is_empty() {
            return Err(NtlError::InvalidParameter(
                "at least one statistic is required".to_string(),
            ));
        }
        let index = ZoneIndex::build(zones, raster);
        let stats = index.stats(raster)?;

        let rows = zones
            .iter()
            .zip(stats)
            .map(|(zone, s)| SummaryRow {
                zone_id: zone.id.clone(),
                name: zone.name.clone(),
                values: statistics.iter().map(|&k| s.map(|s| s.get(k))).collect(),
            })
            .collect();

        Ok(SummaryTable {
            statistics: statistics.to_vec(),
            rows,
        })
    }
}

impl Default for ZonalAggregator {
    fn default() -> Self {
        Self::new(AreaProjection::default())
    }
}
