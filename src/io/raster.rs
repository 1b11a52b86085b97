//! Single-band GeoTIFF reading and writing through GDAL

use super::write_atomic;
use crate::types::{BoundingBox, CoordinateSystem, GeoTransform, NtlError, NtlResult, Raster, NODATA};
use gdal::raster::RasterCreationOption;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Read band 1 of a raster. Cells equal to the file's nodata value are
/// rewritten to the crate sentinel.
pub fn read_raster<P: AsRef<Path>>(path: P) -> NtlResult<Raster> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    read_window(&dataset, path.as_ref(), (0, 0), (width, height))
}

/// Read the cells of band 1 intersecting `bbox`
pub fn read_raster_window<P: AsRef<Path>>(path: P, bbox: &BoundingBox) -> NtlResult<Raster> {
    let dataset = Dataset::open(path.as_ref())?;
    let gt = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let (r0, c0) = gt.world_to_cell(bbox.min_x, bbox.max_y);
    let (r1, c1) = gt.world_to_cell(bbox.max_x, bbox.min_y);
    let clamp = |v: f64, hi: usize| (v.max(0.0) as usize).min(hi);
    let (row_start, row_end) = (clamp(r0.min(r1).floor(), height), clamp(r0.max(r1).ceil(), height));
    let (col_start, col_end) = (clamp(c0.min(c1).floor(), width), clamp(c0.max(c1).ceil(), width));
    if row_start >= row_end || col_start >= col_end {
        return Err(NtlError::InvalidParameter(format!(
            "{:?} does not intersect {}",
            bbox,
            path.as_ref().display()
        )));
    }

    read_window(
        &dataset,
        path.as_ref(),
        (col_start as isize, row_start as isize),
        (col_end - col_start, row_end - row_start),
    )
}

fn read_window(
    dataset: &Dataset,
    path: &Path,
    offset: (isize, isize),
    size: (usize, usize),
) -> NtlResult<Raster> {
    log::info!("Reading raster from: {}", path.display());
    let (width, height) = size;

    let gt = GeoTransform::from_gdal(dataset.geo_transform()?);
    let geo_transform = gt.offset(offset.1 as usize, offset.0 as usize);
    let coordinate_system = match dataset.spatial_ref() {
        Ok(srs) => coordinate_system(&srs),
        Err(_) => {
            log::warn!("{} has no spatial reference, assuming geographic", path.display());
            CoordinateSystem::Geographic
        }
    };

    let band = dataset.rasterband(1)?;
    let file_nodata = band.no_data_value();
    let buffer = band.read_as::<f32>(offset, (width, height), (width, height), None)?;
    let mut data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| NtlError::Processing(format!("Failed to reshape raster data: {}", e)))?;

    if let Some(nd) = file_nodata {
        let nd = nd as f32;
        if nd != NODATA {
            data.mapv_inplace(|v| if v == nd || (nd.is_nan() && v.is_nan()) { NODATA } else { v });
        }
    }
    log::debug!("Raster size: {}x{}, nodata {:?}", width, height, file_nodata);

    Ok(Raster::new(data, geo_transform, coordinate_system))
}

fn coordinate_system(srs: &SpatialRef) -> CoordinateSystem {
    if srs.is_geographic() {
        return CoordinateSystem::Geographic;
    }
    match srs.auth_code() {
        Ok(code) if code > 0 => CoordinateSystem::Projected { epsg: code as u32 },
        _ => CoordinateSystem::Projected { epsg: 0 },
    }
}

/// Write a single-band float GeoTIFF (LZW, horizontal predictor, BigTIFF)
/// through a temporary file
pub fn write_raster<P: AsRef<Path>>(raster: &Raster, path: P) -> NtlResult<()> {
    log::info!("Saving raster as GeoTIFF: {}", path.as_ref().display());
    write_atomic(path, |tmp| write_geotiff(raster, tmp))
}

fn write_geotiff(raster: &Raster, path: &Path) -> NtlResult<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.shape();
    let options = [
        RasterCreationOption { key: "COMPRESS", value: "LZW" },
        RasterCreationOption { key: "PREDICTOR", value: "2" },
        RasterCreationOption { key: "BIGTIFF", value: "YES" },
    ];

    let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
        path,
        width as isize,
        height as isize,
        1,
        &options,
    )?;
    dataset.set_geo_transform(&raster.geo_transform.to_gdal())?;
    let epsg = match raster.coordinate_system {
        CoordinateSystem::Geographic => 4326,
        CoordinateSystem::Projected { epsg } => epsg,
    };
    if epsg > 0 {
        dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;
    }

    let mut band = dataset.rasterband(1)?;
    let flat: Vec<f32> = raster.data.iter().copied().collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat);
    band.write((0, 0), (width, height), &buffer)?;
    band.set_no_data_value(Some(raster.nodata as f64))?;
    Ok(())
}
