use crate::core::zonal::ZoneFootprint;
use crate::types::{Grid, NtlError, NtlResult, Raster, Zone};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Inverse-distance fill parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdwParams {
    /// Maximum search radius in cells
    pub max_search_distance: usize,
    /// Stop widening the search once this many valid cells were found
    pub min_neighbors: usize,
    /// Distance weighting exponent
    pub power: f64,
}

impl Default for IdwParams {
    fn default() -> Self {
        Self {
            max_search_distance: 100,
            min_neighbors: 8,
            power: 2.0,
        }
    }
}

/// What happens to cells above the reference maximum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Outliers become nodata
    Suppress,
    /// Outliers are re-estimated from surrounding valid cells
    Interpolate(IdwParams),
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        OutlierPolicy::Suppress
    }
}

/// Capital-maximum outlier handling.
///
/// Snow glare, gas flares and fires produce readings brighter than any
/// stable city; cells brighter than the reference zone's maximum are
/// either removed or, when asked for explicitly, interpolated.
pub struct OutlierSuppressor {
    policy: OutlierPolicy,
}

impl OutlierSuppressor {
    pub fn new() -> Self {
        Self {
            policy: OutlierPolicy::default(),
        }
    }

    pub fn with_policy(policy: OutlierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &OutlierPolicy {
        &self.policy
    }

    /// Apply the configured policy with the maximum found in `reference`
    pub fn apply(&self, raster: &Raster, reference: &Zone) -> NtlResult<(Raster, f64)> {
        let cap = max_in_zone(raster, reference)?;
        let out = match &self.policy {
            OutlierPolicy::Suppress => suppress_above(raster, cap),
            OutlierPolicy::Interpolate(params) => interpolate_above(raster, cap, params),
        };
        Ok((out, cap))
    }
}

impl Default for OutlierSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest valid cell value inside `zone`
pub fn max_in_zone(raster: &Raster, zone: &Zone) -> NtlResult<f64> {
    let footprint = ZoneFootprint::build(zone, &raster.geo_transform, raster.shape());
    let max = footprint
        .values(raster)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

    match max {
        Some(m) => {
            log::info!("Maximum in reference zone '{}': {}", zone.id, m);
            Ok(m)
        }
        None => Err(NtlError::EmptyZone {
            zone: zone.id.clone(),
        }),
    }
}

/// Cells strictly greater than `threshold` become nodata
pub fn suppress_above(raster: &Raster, threshold: f64) -> Raster {
    let nodata = raster.nodata;
    let mut removed = 0usize;
    let data = raster.data.mapv(|v| {
        if v != nodata && v as f64 > threshold {
            removed += 1;
            nodata
        } else {
            v
        }
    });
    log::info!("Suppressed {} cells above {}", removed, threshold);
    raster.with_data(data)
}

/// Cells strictly greater than `threshold` are replaced by an
/// inverse-distance-weighted estimate from valid cells around them.
///
/// Only cells that were valid and not above the threshold serve as
/// sources. Outliers with no source inside the search radius stay nodata.
pub fn interpolate_above(raster: &Raster, threshold: f64, params: &IdwParams) -> Raster {
    let nodata = raster.nodata;
    // 1 = usable source, 0 = outlier or nodata
    let validity: Array2<u8> = raster
        .data
        .mapv(|v| u8::from(v != nodata && v as f64 <= threshold));

    let targets: Vec<(usize, usize)> = raster
        .data
        .indexed_iter()
        .filter(|(_, &v)| v != nodata && v as f64 > threshold)
        .map(|(idx, _)| idx)
        .collect();

    log::info!(
        "Interpolating {} cells above {} (search radius {})",
        targets.len(),
        threshold,
        params.max_search_distance
    );

    #[cfg(feature = "parallel")]
    let estimates: Vec<Option<f32>> = {
        use rayon::prelude::*;
        targets
            .par_iter()
            .map(|&(i, j)| idw_estimate(&raster.data, &validity, i, j, params))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let estimates: Vec<Option<f32>> = targets
        .iter()
        .map(|&(i, j)| idw_estimate(&raster.data, &validity, i, j, params))
        .collect();

    let mut data = raster.data.clone();
    let mut unfilled = 0usize;
    for (&(i, j), estimate) in targets.iter().zip(estimates) {
        data[[i, j]] = match estimate {
            Some(v) => v,
            None => {
                unfilled += 1;
                nodata
            }
        };
    }
    if unfilled > 0 {
        log::warn!("{} outlier cells had no valid neighbour and stay nodata", unfilled);
    }

    raster.with_data(data)
}

/// Search square rings of growing radius around (i, j)
fn idw_estimate(
    data: &Grid,
    validity: &Array2<u8>,
    i: usize,
    j: usize,
    params: &IdwParams,
) -> Option<f32> {
    let (rows, cols) = data.dim();
    let mut weight_sum = 0.0f64;
    let mut value_sum = 0.0f64;
    let mut found = 0usize;

    let sample = |di: isize, dj: isize| -> Option<(f64, f64)> {
        let ni = i as isize + di;
        let nj = j as isize + dj;
        if ni < 0 || nj < 0 || ni >= rows as isize || nj >= cols as isize {
            return None;
        }
        let (ni, nj) = (ni as usize, nj as usize);
        if validity[[ni, nj]] == 0 {
            return None;
        }
        let distance = ((di * di + dj * dj) as f64).sqrt();
        Some((1.0 / distance.powf(params.power), data[[ni, nj]] as f64))
    };

    for radius in 1..=params.max_search_distance {
        let r = radius as isize;
        // perimeter of the (2r+1)² square: full top and bottom rows, then
        // the side columns without their corners
        let ring = (-r..=r)
            .flat_map(move |dj| [(-r, dj), (r, dj)])
            .chain(((1 - r)..r).flat_map(move |di| [(di, -r), (di, r)]));
        for (w, v) in ring.filter_map(|(di, dj)| sample(di, dj)) {
            weight_sum += w;
            value_sum += w * v;
            found += 1;
        }
        if found >= params.min_neighbors {
            break;
        }
    }

    (found > 0).then(|| (value_sum / weight_sum) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, NODATA};
    use geo::{polygon, MultiPolygon};
    use ndarray::arr2;

    fn raster(data: Array2<f32>) -> Raster {
        Raster::new(
            data,
            GeoTransform::north_up(0.0, 3.0, 1.0, 1.0),
            CoordinateSystem::Geographic,
        )
    }

    fn capital() -> Zone {
        // top-left 2x2 block of a 3x3 grid
        Zone::new(
            "CAP",
            "Capital",
            MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 3.0), (x: 0.0, y: 3.0),
            ]]),
        )
    }

    #[test]
    fn test_max_in_zone() {
        let r = raster(arr2(&[[1.0, 5.0, 90.0], [3.0, NODATA, 2.0], [50.0, 1.0, 1.0]]));
        assert_eq!(max_in_zone(&r, &capital()).unwrap(), 5.0);
    }

    #[test]
    fn test_max_in_empty_zone() {
        let r = raster(arr2(&[[NODATA, NODATA, 1.0], [NODATA, NODATA, 1.0], [1.0, 1.0, 1.0]]));
        assert!(matches!(max_in_zone(&r, &capital()), Err(NtlError::EmptyZone { .. })));
    }

    #[test]
    fn test_suppress_above_is_strict() {
        let r = raster(arr2(&[[1.0, 5.0, 90.0], [3.0, NODATA, 5.0], [50.0, 1.0, 1.0]]));
        let out = suppress_above(&r, 5.0);
        assert_eq!(
            out.data,
            arr2(&[[1.0, 5.0, NODATA], [3.0, NODATA, 5.0], [NODATA, 1.0, 1.0]])
        );
        // caller's raster untouched
        assert_eq!(r.data[[0, 2]], 90.0);
    }

    #[test]
    fn test_interpolate_above_fills_from_neighbours() {
        let r = raster(arr2(&[[2.0, 2.0, 2.0], [2.0, 100.0, 2.0], [2.0, 2.0, 2.0]]));
        let out = interpolate_above(&r, 10.0, &IdwParams::default());
        assert!((out.data[[1, 1]] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_interpolate_ignores_nodata_sources() {
        let r = raster(arr2(&[[NODATA, NODATA, NODATA], [NODATA, 100.0, 4.0], [NODATA, NODATA, NODATA]]));
        let out = interpolate_above(&r, 10.0, &IdwParams::default());
        assert!((out.data[[1, 1]] - 4.0).abs() < 1e-6);
        assert_eq!(out.data[[0, 0]], NODATA);
    }

    #[test]
    fn test_interpolate_without_sources_leaves_nodata() {
        let r = raster(arr2(&[[NODATA, 100.0], [200.0, NODATA]]));
        let params = IdwParams {
            max_search_distance: 3,
            ..IdwParams::default()
        };
        let out = interpolate_above(&r, 10.0, &params);
        assert_eq!(out.data, arr2(&[[NODATA, NODATA], [NODATA, NODATA]]));
    }

    #[test]
    fn test_ring_search_visits_each_perimeter_cell_once() {
        // radius 1 has no valid cell; radius 2 holds exactly 16 of them
        let mut data = Array2::from_elem((5, 5), 3.0f32);
        data.slice_mut(ndarray::s![1..4, 1..4]).fill(NODATA);
        data[[2, 2]] = 100.0;
        data[[0, 0]] = 7.0;
        let params = IdwParams {
            max_search_distance: 2,
            min_neighbors: 16,
            power: 2.0,
        };
        let out = interpolate_above(&raster(data), 10.0, &params);

        // corners sit at distance sqrt(8), the other 12 ring cells at
        // sqrt(5) or 2
        let (mut ws, mut vs) = (0.0f64, 0.0f64);
        for di in -2i32..=2 {
            for dj in -2i32..=2 {
                if di.abs() != 2 && dj.abs() != 2 {
                    continue;
                }
                let w = 1.0 / ((di * di + dj * dj) as f64);
                let v = if di == -2 && dj == -2 { 7.0 } else { 3.0 };
                ws += w;
                vs += w * v;
            }
        }
        assert!((out.data[[2, 2]] as f64 - vs / ws).abs() < 1e-5);
    }

    #[test]
    fn test_policy_dispatch() {
        let r = raster(arr2(&[[1.0, 5.0, 90.0], [3.0, 4.0, 2.0], [50.0, 1.0, 1.0]]));
        let (suppressed, cap) = OutlierSuppressor::new().apply(&r, &capital()).unwrap();
        assert_eq!(cap, 5.0);
        assert_eq!(suppressed.data[[0, 2]], NODATA);

        let interp = OutlierSuppressor::with_policy(OutlierPolicy::Interpolate(IdwParams::default()));
        let (filled, _) = interp.apply(&r, &capital()).unwrap();
        assert!(filled.data[[0, 2]] != NODATA);
        assert!(filled.data[[0, 2]] as f64 <= 5.0);
    }
}
