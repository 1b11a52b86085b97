//! Zone polygons from vector files (shapefile, GeoPackage, GeoJSON)

use crate::types::{CoordinateSystem, NtlError, NtlResult, Zone, ZoneSet};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{MultiPolygon, Polygon};
use std::path::Path;

/// Read the first layer of a vector file as a zone set.
///
/// `id_field` must hold unique values. Features without a polygon geometry
/// are skipped with a warning.
pub fn read_zones<P: AsRef<Path>>(path: P, id_field: &str, name_field: &str) -> NtlResult<ZoneSet> {
    log::info!("Reading zones from: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let mut layer = dataset.layer(0)?;

    let coordinate_system = match layer.spatial_ref() {
        Some(srs) if !srs.is_geographic() => CoordinateSystem::Projected {
            epsg: srs.auth_code().map(|c| c as u32).unwrap_or(0),
        },
        _ => CoordinateSystem::Geographic,
    };

    let mut zones = Vec::new();
    for feature in layer.features() {
        let id = feature
            .field_as_string_by_name(id_field)?
            .ok_or_else(|| NtlError::InvalidParameter(format!("feature without '{}'", id_field)))?;
        let name = feature.field_as_string_by_name(name_field)?.unwrap_or_default();

        let Some(geometry) = feature.geometry() else {
            log::warn!("Zone '{}' has no geometry, skipping", id);
            continue;
        };
        match into_multipolygon(geometry.to_geo()?) {
            Some(polygons) => zones.push(Zone::new(id, name, polygons)),
            None => log::warn!("Zone '{}' is not a polygon, skipping", id),
        }
    }

    log::info!("Read {} zones", zones.len());
    ZoneSet::new(zones, coordinate_system)
}

fn into_multipolygon(geometry: geo::Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        geo::Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::GeometryCollection(gc) => {
            let polygons: Vec<Polygon<f64>> = gc
                .into_iter()
                .filter_map(into_multipolygon)
                .flat_map(|mp| mp.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}
