use crate::core::mask::{GridMasker, MaskParams};
use crate::core::normalize::TemporalNormalizer;
use crate::core::outliers;
use crate::io::tiles::{TileName, TileProduct};
use crate::types::{CoordinateSystem, GeoTransform, NtlError, Raster, TimeSeries};
use ndarray::{Array3, Axis};
use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(err: NtlError) -> PyErr {
    match err {
        NtlError::InvalidParameter(_) | NtlError::ShapeMismatch { .. } => {
            PyErr::new::<PyValueError, _>(err.to_string())
        }
        _ => PyErr::new::<PyRuntimeError, _>(err.to_string()),
    }
}

/// Arrays from Python carry no georeferencing; a unit grid is enough for
/// the cell-wise operations exposed here
fn bare_raster(data: ndarray::Array2<f32>) -> Raster {
    Raster::new(
        data,
        GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
        CoordinateSystem::Geographic,
    )
}

/// Coverage and value masking; masked cells become -99999
#[pyfunction]
#[pyo3(signature = (values, quality, quality_threshold = 1.0, value_threshold = 0.0))]
fn mask<'py>(
    py: Python<'py>,
    values: PyReadonlyArray2<f32>,
    quality: PyReadonlyArray2<f32>,
    quality_threshold: f32,
    value_threshold: f32,
) -> PyResult<&'py PyArray2<f32>> {
    let values = bare_raster(values.as_array().to_owned());
    let quality = bare_raster(quality.as_array().to_owned());
    let masker = GridMasker::with_params(MaskParams {
        quality_threshold,
        value_threshold,
        ..MaskParams::default()
    });
    let masked = masker.apply(&values, &quality).map_err(to_py_err)?;
    Ok(masked.data.into_pyarray(py))
}

/// Cells strictly above `threshold` become -99999
#[pyfunction]
fn suppress_above<'py>(
    py: Python<'py>,
    values: PyReadonlyArray2<f32>,
    threshold: f64,
) -> PyResult<&'py PyArray2<f32>> {
    let raster = bare_raster(values.as_array().to_owned());
    Ok(outliers::suppress_above(&raster, threshold).data.into_pyarray(py))
}

/// Rescale a (period, row, col) stack to [0, 1] over its global range
#[pyfunction]
#[pyo3(signature = (stack, unit = "unit"))]
fn normalize<'py>(
    py: Python<'py>,
    stack: PyReadonlyArray3<f32>,
    unit: &str,
) -> PyResult<&'py PyArray3<f32>> {
    let rasters = stack
        .as_array()
        .axis_iter(Axis(0))
        .map(|layer| bare_raster(layer.to_owned()))
        .collect();
    let series = TimeSeries::new(unit, rasters).map_err(to_py_err)?;
    let normalized = TemporalNormalizer::normalize(&series).map_err(to_py_err)?;

    let (rows, cols) = series.rasters()[0].shape();
    let mut out = Array3::zeros((normalized.len(), rows, cols));
    for (mut layer, n) in out.axis_iter_mut(Axis(0)).zip(&normalized) {
        layer.assign(&n.raster.data);
    }
    Ok(out.into_pyarray(py))
}

/// `(extent, start, end, product, period)` of a VIIRS composite tile name
#[pyfunction]
fn parse_tile_name(name: &str) -> PyResult<(String, String, String, String, Option<u8>)> {
    let tile = TileName::parse(name).map_err(to_py_err)?;
    let product = match tile.product {
        TileProduct::Radiance => "radiance",
        TileProduct::Coverage => "coverage",
    };
    Ok((
        tile.extent.clone(),
        tile.start.to_string(),
        tile.end.to_string(),
        product.to_string(),
        tile.period(),
    ))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(mask, m)?)?;
    m.add_function(wrap_pyfunction!(suppress_above, m)?)?;
    m.add_function(wrap_pyfunction!(normalize, m)?)?;
    m.add_function(wrap_pyfunction!(parse_tile_name, m)?)?;
    Ok(())
}
