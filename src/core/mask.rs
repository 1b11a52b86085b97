use crate::types::{NtlResult, Raster};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// How the value gate decides which cells to drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueComparison {
    /// Keep only cells strictly above the threshold (drop `v <= threshold`)
    KeepAbove,
    /// Drop only cells strictly below the threshold (keep `v >= threshold`)
    StrictlyBelow,
    /// Drop negative cells, ignoring the threshold
    NegativeOnly,
}

/// Grid masking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskParams {
    /// Cells whose coverage is below this value become nodata
    pub quality_threshold: f32,
    /// Radiance cut-off applied after the coverage gate
    pub value_threshold: f32,
    /// Comparison used for the radiance cut-off
    pub comparison: ValueComparison,
    /// Skip the radiance cut-off altogether
    pub apply_value_gate: bool,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            quality_threshold: 1.0,
            value_threshold: 0.0,
            comparison: ValueComparison::KeepAbove,
            apply_value_gate: true,
        }
    }
}

/// Coverage and radiance masking.
///
/// Both gates only ever add nodata, so the result is monotonic and
/// re-applying the same parameters to an output is a no-op. NaN cells are
/// not supported.
pub struct GridMasker {
    params: MaskParams,
}

impl GridMasker {
    pub fn new() -> Self {
        Self {
            params: MaskParams::default(),
        }
    }

    pub fn with_params(params: MaskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MaskParams {
        &self.params
    }

    /// Mask `values` by `quality` then by value
    pub fn apply(&self, values: &Raster, quality: &Raster) -> NtlResult<Raster> {
        values.ensure_same_shape(quality)?;
        log::debug!("Mask parameters: {:?}", self.params);

        let nodata = values.nodata;
        let mut out = values.data.clone();
        let quality_threshold = self.params.quality_threshold;

        Zip::from(&mut out)
            .and(&quality.data)
            .for_each(|v, &q| {
                if q < quality_threshold {
                    *v = nodata;
                }
            });
        let after_quality = count_nodata(&out, nodata);

        let mut masked = values.with_data(out);
        if self.params.apply_value_gate {
            apply_value_gate(&mut masked, self.params.value_threshold, self.params.comparison);
        }

        let total = masked.data.len();
        let after_value = count_nodata(&masked.data, nodata);
        log::info!(
            "Masked {} cells by coverage and {} by value ({} of {} valid)",
            after_quality - count_nodata(&values.data, nodata),
            after_value - after_quality,
            total - after_value,
            total
        );
        Ok(masked)
    }

    /// Value gate only, no coverage grid
    pub fn apply_value_only(&self, values: &Raster) -> Raster {
        let mut masked = values.clone();
        apply_value_gate(&mut masked, self.params.value_threshold, self.params.comparison);
        masked
    }
}

impl Default for GridMasker {
    fn default() -> Self {
        Self::new()
    }
}

/// `mask(value_grid, quality_grid, quality_threshold, value_threshold)`
pub fn mask(
    values: &Raster,
    quality: &Raster,
    quality_threshold: f32,
    value_threshold: f32,
) -> NtlResult<Raster> {
    GridMasker::with_params(MaskParams {
        quality_threshold,
        value_threshold,
        ..MaskParams::default()
    })
    .apply(values, quality)
}

/// Keep only cells strictly above `threshold`
pub fn reclass_by_threshold(values: &Raster, threshold: f32) -> Raster {
    let mut out = values.clone();
    apply_value_gate(&mut out, threshold, ValueComparison::KeepAbove);
    out
}

/// Turn negative cells into nodata; the sentinel itself is left alone
pub fn remove_negative(values: &Raster) -> Raster {
    let mut out = values.clone();
    apply_value_gate(&mut out, 0.0, ValueComparison::NegativeOnly);
    out
}

fn apply_value_gate(raster: &mut Raster, threshold: f32, comparison: ValueComparison) {
    let nodata = raster.nodata;
    raster.data.mapv_inplace(|v| {
        if v == nodata {
            return v;
        }
        let drop = match comparison {
            ValueComparison::KeepAbove => v <= threshold,
            ValueComparison::StrictlyBelow => v < threshold,
            ValueComparison::NegativeOnly => v < 0.0,
        };
        if drop {
            nodata
        } else {
            v
        }
    });
}

fn count_nodata(data: &crate::types::Grid, nodata: f32) -> usize {
    data.iter().filter(|&&v| v == nodata).count()
}
