//! Per-zone result tables.
//!
//! Values are held as typed per-period records; the `sum01`-style column
//! names only exist at the serialization boundary (see [`Column`]).

use crate::types::{NtlError, NtlResult, Period};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zonal statistic kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZonalStatistic {
    Sum,
    Mean,
    Std,
    Min,
    Max,
    Count,
}

impl ZonalStatistic {
    pub const ALL: [ZonalStatistic; 6] = [
        ZonalStatistic::Sum,
        ZonalStatistic::Mean,
        ZonalStatistic::Std,
        ZonalStatistic::Min,
        ZonalStatistic::Max,
        ZonalStatistic::Count,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ZonalStatistic::Sum => "sum",
            ZonalStatistic::Mean => "mean",
            ZonalStatistic::Std => "std",
            ZonalStatistic::Min => "min",
            ZonalStatistic::Max => "max",
            ZonalStatistic::Count => "count",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

impl fmt::Display for ZonalStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary of the valid cells of one zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneStats {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ZoneStats {
    /// Statistics over `values`; `None` when there are none.
    /// `std` is the population standard deviation.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut shift = None;

        for v in values {
            // shifted sums keep the variance stable for large radiances
            let k = *shift.get_or_insert(v);
            let d = v - k;
            count += 1;
            sum += v;
            sum_sq += d * d;
            min = min.min(v);
            max = max.max(v);
        }

        if count == 0 {
            return None;
        }
        let n = count as f64;
        let mean = sum / n;
        let shifted_mean = mean - shift.unwrap_or(0.0);
        let variance = (sum_sq / n - shifted_mean * shifted_mean).max(0.0);

        Some(Self {
            count,
            sum,
            mean,
            std: variance.sqrt(),
            min,
            max,
        })
    }

    pub fn get(&self, statistic: ZonalStatistic) -> f64 {
        match statistic {
            ZonalStatistic::Sum => self.sum,
            ZonalStatistic::Mean => self.mean,
            ZonalStatistic::Std => self.std,
            ZonalStatistic::Min => self.min,
            ZonalStatistic::Max => self.max,
            ZonalStatistic::Count => self.count as f64,
        }
    }
}

/// Statistic value for one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodValue {
    pub period: Period,
    pub value: f64,
}

/// Cross-period metrics for one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodDerived {
    pub period: Period,
    /// Period sum divided by zone area (per km²)
    pub area_rate: f64,
    /// Percent deviation of the period sum from the annual average
    pub percent_deviation: f64,
}

/// Metrics derived from a full set of period sums
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub area_km2: f64,
    pub annual_average: f64,
    pub annual_per_area: f64,
    pub per_period: Vec<PeriodDerived>,
}

impl DerivedMetrics {
    /// Derive from period sums and a zone area
    pub fn from_sums(zone: &str, sums: &[PeriodValue], area_km2: f64) -> NtlResult<Self> {
        if sums.is_empty() {
            return Err(NtlError::IncompleteJoin {
                zone: zone.to_string(),
                period: 1,
            });
        }
        if !(area_km2 > 0.0) {
            return Err(NtlError::EmptyZone {
                zone: zone.to_string(),
            });
        }

        let annual_average = sums.iter().map(|s| s.value).sum::<f64>() / sums.len() as f64;
        if annual_average == 0.0 {
            return Err(NtlError::DegenerateRange {
                unit: zone.to_string(),
                value: 0.0,
            });
        }

        let per_period = sums
            .iter()
            .map(|s| PeriodDerived {
                period: s.period,
                area_rate: s.value / area_km2,
                percent_deviation: (s.value - annual_average) / annual_average * 100.0,
            })
            .collect();

        Ok(Self {
            area_km2,
            annual_average,
            annual_per_area: annual_average / area_km2,
            per_period,
        })
    }
}

/// One zone's row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalRow {
    pub zone_id: String,
    pub name: String,
    pub values: Vec<PeriodValue>,
    pub derived: Option<DerivedMetrics>,
}

impl ZonalRow {
    pub fn value(&self, period: Period) -> Option<f64> {
        self.values.iter().find(|v| v.period == period).map(|v| v.value)
    }

    pub fn derived_for(&self, period: Period) -> Option<&PeriodDerived> {
        self.derived
            .as_ref()
            .and_then(|d| d.per_period.iter().find(|p| p.period == period))
    }
}

/// Serialized column of a [`ZonalTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    ZoneId,
    Name,
    Statistic(ZonalStatistic, Period),
    Area,
    AnnualAverage,
    AnnualPerArea,
    AreaRate(Period),
    PercentDeviation(Period),
}

impl Column {
    pub fn name(&self) -> String {
        match self {
            Column::ZoneId => "zone_id".to_string(),
            Column::Name => "name".to_string(),
            Column::Statistic(s, p) => format!("{}{:02}", s.name(), p),
            Column::Area => "area".to_string(),
            Column::AnnualAverage => "annual_ave".to_string(),
            Column::AnnualPerArea => "annual_per_km".to_string(),
            Column::AreaRate(p) => format!("mean{:02}", p),
            Column::PercentDeviation(p) => format!("diff{:02}", p),
        }
    }

    /// Parse a header name. `mean{pp}` is an area rate when the table
    /// carries derived columns, otherwise the zonal mean.
    pub fn parse(name: &str, derived: bool) -> Option<Self> {
        match name {
            "zone_id" => return Some(Column::ZoneId),
            "name" => return Some(Column::Name),
            "area" => return Some(Column::Area),
            "annual_ave" => return Some(Column::AnnualAverage),
            "annual_per_km" => return Some(Column::AnnualPerArea),
            _ => {}
        }
        if name.len() < 3 || !name.is_char_boundary(name.len() - 2) {
            return None;
        }
        let (prefix, digits) = name.split_at(name.len() - 2);
        let period: Period = digits.parse().ok()?;
        match prefix {
            "diff" if derived => Some(Column::PercentDeviation(period)),
            "mean" if derived => Some(Column::AreaRate(period)),
            _ => ZonalStatistic::from_name(prefix).map(|s| Column::Statistic(s, period)),
        }
    }
}

/// Per-zone, per-period statistics keyed by zone identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalTable {
    pub statistic: ZonalStatistic,
    pub periods: usize,
    pub rows: Vec<ZonalRow>,
}

impl ZonalTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, zone_id: &str) -> Option<&ZonalRow> {
        self.rows.iter().find(|r| r.zone_id == zone_id)
    }

    pub fn has_derived(&self) -> bool {
        self.rows.iter().any(|r| r.derived.is_some())
    }

    /// Columns in output order
    pub fn columns(&self) -> Vec<Column> {
        let periods = 1..=self.periods as Period;
        let mut cols = vec![Column::ZoneId, Column::Name];
        cols.extend(periods.clone().map(|p| Column::Statistic(self.statistic, p)));
        if self.has_derived() {
            cols.push(Column::Area);
            cols.push(Column::AnnualAverage);
            cols.push(Column::AnnualPerArea);
            cols.extend(periods.clone().map(Column::AreaRate));
            cols.extend(periods.map(Column::PercentDeviation));
        }
        cols
    }

    /// Numeric value of a cell; `None` for text columns or absent values
    pub fn cell(&self, row: &ZonalRow, column: Column) -> Option<f64> {
        let derived = row.derived.as_ref();
        match column {
            Column::ZoneId | Column::Name => None,
            Column::Statistic(_, p) => row.value(p),
            Column::Area => derived.map(|d| d.area_km2),
            Column::AnnualAverage => derived.map(|d| d.annual_average),
            Column::AnnualPerArea => derived.map(|d| d.annual_per_area),
            Column::AreaRate(p) => row.derived_for(p).map(|d| d.area_rate),
            Column::PercentDeviation(p) => row.derived_for(p).map(|d| d.percent_deviation),
        }
    }

    /// Period sums relative to the zone's lowest period sum
    pub fn observation_coefficients(&self, zone_id: &str) -> NtlResult<Vec<PeriodValue>> {
        if self.statistic != ZonalStatistic::Sum {
            return Err(NtlError::InvalidParameter(format!(
                "observation coefficients need a sum table, got {}",
                self.statistic
            )));
        }
        let row = self.row(zone_id).ok_or_else(|| {
            NtlError::InvalidParameter(format!("unknown zone '{}'", zone_id))
        })?;
        let baseline = row
            .values
            .iter()
            .map(|v| v.value)
            .fold(f64::INFINITY, f64::min);
        if !baseline.is_finite() || baseline == 0.0 {
            return Err(NtlError::DegenerateRange {
                unit: zone_id.to_string(),
                value: if baseline.is_finite() { baseline } else { 0.0 },
            });
        }
        Ok(row
            .values
            .iter()
            .map(|v| PeriodValue {
                period: v.period,
                value: v.value / baseline,
            })
            .collect())
    }
}

/// Several statistics of one independent raster per zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub statistics: Vec<ZonalStatistic>,
    pub rows: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub zone_id: String,
    pub name: String,
    /// Same order as `SummaryTable::statistics`; `None` when the zone has
    /// no valid cells
    pub values: Vec<Option<f64>>,
}

impl SummaryTable {
    pub fn row(&self, zone_id: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.zone_id == zone_id)
    }

    pub fn value(&self, zone_id: &str, statistic: ZonalStatistic) -> Option<f64> {
        let idx = self.statistics.iter().position(|s| *s == statistic)?;
        self.row(zone_id).and_then(|r| r.values[idx])
    }
}
