//! CSV encoding of zonal tables and calibration audits.
//!
//! Zonal tables use the column convention of [`Column::name`]: `zone_id`,
//! `name`, `sum01`..`sumNN`, then for sum tables `area`, `annual_ave`,
//! `annual_per_km`, `mean01`.. (area rates) and `diff01`.. (percent
//! deviations).

use super::write_atomic;
use crate::core::calibrate::{ThresholdCurve, ThresholdSweep};
use crate::core::table::{
    Column, DerivedMetrics, PeriodDerived, PeriodValue, SummaryTable, ZonalRow, ZonalTable,
};
use crate::types::{NtlError, NtlResult, Period};
use std::collections::BTreeMap;
use std::path::Path;

pub fn write_zonal_table<P: AsRef<Path>>(table: &ZonalTable, path: P) -> NtlResult<()> {
    log::info!(
        "Writing {} table with {} rows to {}",
        table.statistic,
        table.len(),
        path.as_ref().display()
    );
    write_atomic(path, |tmp| {
        let mut writer = csv::Writer::from_path(tmp)?;
        encode_zonal_table(table, &mut writer)?;
        writer.flush()?;
        Ok(())
    })
}

fn encode_zonal_table<W: std::io::Write>(
    table: &ZonalTable,
    writer: &mut csv::Writer<W>,
) -> NtlResult<()> {
    let columns = table.columns();
    writer.write_record(columns.iter().map(|c| c.name()))?;

    for row in &table.rows {
        let record: Vec<String> = columns
            .iter()
            .map(|&col| match col {
                Column::ZoneId => row.zone_id.clone(),
                Column::Name => row.name.clone(),
                other => table
                    .cell(row, other)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    Ok(())
}

pub fn read_zonal_table<P: AsRef<Path>>(path: P) -> NtlResult<ZonalTable> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    decode_zonal_table(&mut reader)
}

fn decode_zonal_table<R: std::io::Read>(reader: &mut csv::Reader<R>) -> NtlResult<ZonalTable> {
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let derived = headers.iter().any(|h| h == "annual_ave");

    let columns = headers
        .iter()
        .map(|h| {
            Column::parse(h, derived)
                .ok_or_else(|| NtlError::InvalidParameter(format!("unknown column '{}'", h)))
        })
        .collect::<NtlResult<Vec<_>>>()?;

    let statistic = columns
        .iter()
        .find_map(|c| match c {
            Column::Statistic(s, _) => Some(*s),
            _ => None,
        })
        .ok_or_else(|| NtlError::InvalidParameter("table has no statistic columns".to_string()))?;
    let periods = columns
        .iter()
        .filter(|c| matches!(c, Column::Statistic(..)))
        .count();
    if !columns.contains(&Column::ZoneId) {
        return Err(NtlError::InvalidParameter("CSV missing 'zone_id' column".to_string()));
    }

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        let mut row = ZonalRow {
            zone_id: String::new(),
            name: String::new(),
            values: Vec::with_capacity(periods),
            derived: None,
        };
        let mut area = None;
        let mut annual_average = None;
        let mut annual_per_area = None;
        let mut rates: BTreeMap<Period, f64> = BTreeMap::new();
        let mut deviations: BTreeMap<Period, f64> = BTreeMap::new();

        for (col, field) in columns.iter().zip(record.iter()) {
            match *col {
                Column::ZoneId => row.zone_id = field.to_string(),
                Column::Name => row.name = field.to_string(),
                Column::Statistic(s, period) => {
                    if s != statistic {
                        return Err(NtlError::InvalidParameter(format!(
                            "mixed statistics {} and {} in one table",
                            statistic, s
                        )));
                    }
                    row.values.push(PeriodValue {
                        period,
                        value: parse_number(field, row_no, col)?,
                    });
                }
                Column::Area => area = Some(parse_number(field, row_no, col)?),
                Column::AnnualAverage => annual_average = Some(parse_number(field, row_no, col)?),
                Column::AnnualPerArea => annual_per_area = Some(parse_number(field, row_no, col)?),
                Column::AreaRate(p) => {
                    rates.insert(p, parse_number(field, row_no, col)?);
                }
                Column::PercentDeviation(p) => {
                    deviations.insert(p, parse_number(field, row_no, col)?);
                }
            }
        }

        if let (Some(area_km2), Some(annual_average), Some(annual_per_area)) =
            (area, annual_average, annual_per_area)
        {
            let per_period = rates
                .iter()
                .map(|(&period, &area_rate)| PeriodDerived {
                    period,
                    area_rate,
                    percent_deviation: deviations.get(&period).copied().unwrap_or(f64::NAN),
                })
                .collect();
            row.derived = Some(DerivedMetrics {
                area_km2,
                annual_average,
                annual_per_area,
                per_period,
            });
        }
        rows.push(row);
    }

    log::debug!("Read {} table with {} rows", statistic, rows.len());
    Ok(ZonalTable {
        statistic,
        periods,
        rows,
    })
}

fn parse_number(field: &str, row_no: usize, column: &Column) -> NtlResult<f64> {
    field.trim().parse().map_err(|_| {
        NtlError::InvalidParameter(format!(
            "row {}: column '{}' has non-numeric value '{}'",
            row_no + 1,
            column.name(),
            field
        ))
    })
}

/// One row per zone, one column per statistic; empty cells for zones
/// without valid values
pub fn write_summary_table<P: AsRef<Path>>(table: &SummaryTable, path: P) -> NtlResult<()> {
    write_atomic(path, |tmp| {
        let mut writer = csv::Writer::from_path(tmp)?;
        let mut header = vec!["zone_id".to_string(), "name".to_string()];
        header.extend(table.statistics.iter().map(|s| s.name().to_string()));
        writer.write_record(&header)?;

        for row in &table.rows {
            let mut record = vec![row.zone_id.clone(), row.name.clone()];
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// `threshold,correlation` with an empty correlation for constant columns
pub fn write_threshold_curve<P: AsRef<Path>>(curve: &ThresholdCurve, path: P) -> NtlResult<()> {
    write_atomic(path, |tmp| {
        let mut writer = csv::Writer::from_path(tmp)?;
        writer.write_record(["threshold", "correlation"])?;
        for point in &curve.points {
            writer.write_record([
                point.threshold.to_string(),
                point.correlation.map(|c| c.to_string()).unwrap_or_default(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    })
}

pub fn read_threshold_curve<P: AsRef<Path>>(path: P) -> NtlResult<ThresholdCurve> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut curve = ThresholdCurve::default();
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        let threshold: f64 = field(0).parse().map_err(|_| {
            NtlError::InvalidParameter(format!("row {}: bad threshold '{}'", row_no + 1, field(0)))
        })?;
        let correlation = match field(1) {
            "" => None,
            text => Some(text.parse::<f64>().map_err(|_| {
                NtlError::InvalidParameter(format!("row {}: bad correlation '{}'", row_no + 1, text))
            })?),
        };
        curve.push(threshold, correlation);
    }
    Ok(curve)
}

/// Long-format sweep: `zone_id,reference,threshold,sum`
pub fn write_threshold_sweep<P: AsRef<Path>>(sweep: &ThresholdSweep, path: P) -> NtlResult<()> {
    write_atomic(path, |tmp| {
        let mut writer = csv::Writer::from_path(tmp)?;
        writer.write_record(["zone_id", "reference", "threshold", "sum"])?;
        for (t, threshold) in sweep.thresholds.iter().enumerate() {
            for (z, zone_id) in sweep.zone_ids.iter().enumerate() {
                writer.write_record([
                    zone_id.clone(),
                    sweep.reference[z].to_string(),
                    threshold.to_string(),
                    sweep.sums[t][z].to_string(),
                ])?;
            }
        }
        writer.flush()?;
        Ok(())
    })
}
