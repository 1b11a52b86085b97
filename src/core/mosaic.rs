//! Cropping rasters to zones and merging aligned pieces back together

use crate::core::zonal::ZoneFootprint;
use crate::types::{NtlError, NtlResult, Raster, Zone};
use ndarray::{s, Array2};

/// Crop `raster` to the cell window covering `zone` and blank every cell
/// whose centre lies outside the polygon.
pub fn clip_to_zone(raster: &Raster, zone: &Zone) -> NtlResult<Raster> {
    let footprint = ZoneFootprint::build(zone, &raster.geo_transform, raster.shape());
    if footprint.is_empty() {
        return Err(NtlError::EmptyZone {
            zone: zone.id.clone(),
        });
    }

    let (mut r0, mut c0) = (usize::MAX, usize::MAX);
    let (mut r1, mut c1) = (0usize, 0usize);
    for &(i, j) in &footprint.cells {
        r0 = r0.min(i);
        c0 = c0.min(j);
        r1 = r1.max(i);
        c1 = c1.max(j);
    }

    let mut data = Array2::from_elem((r1 - r0 + 1, c1 - c0 + 1), raster.nodata);
    for &(i, j) in &footprint.cells {
        data[[i - r0, j - c0]] = raster.data[[i, j]];
    }
    log::debug!(
        "Clipped zone '{}' to rows {}..={} cols {}..={}",
        zone.id,
        r0,
        r1,
        c0,
        c1
    );

    Ok(Raster {
        data,
        geo_transform: raster.geo_transform.offset(r0, c0),
        coordinate_system: raster.coordinate_system,
        nodata: raster.nodata,
    })
}

/// Merge pieces lying on the grid of `template` into one raster of the
/// template's extent. Later valid cells overwrite earlier ones; cells no
/// piece covers are nodata.
pub fn mosaic(template: &Raster, pieces: &[Raster]) -> NtlResult<Raster> {
    let mut merged = template.with_data(Array2::from_elem(template.shape(), template.nodata));
    for piece in pieces {
        mosaic_into(&mut merged, piece)?;
    }
    Ok(merged)
}

/// Paste the valid cells of `piece` into `target` in place. The piece must
/// share the target's resolution and cell alignment.
pub fn mosaic_into(target: &mut Raster, piece: &Raster) -> NtlResult<()> {
    let gt = target.geo_transform;
    let (rows, cols) = target.shape();

    if piece.geo_transform.pixel_width != gt.pixel_width
        || piece.geo_transform.pixel_height != gt.pixel_height
    {
        return Err(NtlError::InvalidParameter(format!(
            "piece resolution ({}, {}) differs from template ({}, {})",
            piece.geo_transform.pixel_width,
            piece.geo_transform.pixel_height,
            gt.pixel_width,
            gt.pixel_height
        )));
    }
    let (fr, fc) = gt.world_to_cell(piece.geo_transform.top_left_x, piece.geo_transform.top_left_y);
    let (row_off, col_off) = (fr.round(), fc.round());
    if (fr - row_off).abs() > 1e-6 || (fc - col_off).abs() > 1e-6 {
        return Err(NtlError::InvalidParameter(
            "piece is not aligned with the template grid".to_string(),
        ));
    }
    let (row_off, col_off) = (row_off as isize, col_off as isize);
    let (pr, pc) = piece.shape();

    // overlap of piece and target in target coordinates
    let r_start = row_off.max(0);
    let c_start = col_off.max(0);
    let r_end = (row_off + pr as isize).min(rows as isize);
    let c_end = (col_off + pc as isize).min(cols as isize);
    if r_start >= r_end || c_start >= c_end {
        log::warn!("Mosaic piece lies outside the template extent");
        return Ok(());
    }

    let src = piece.data.slice(s![
        (r_start - row_off) as usize..(r_end - row_off) as usize,
        (c_start - col_off) as usize..(c_end - col_off) as usize
    ]);
    let mut dst = target.data.slice_mut(s![
        r_start as usize..r_end as usize,
        c_start as usize..c_end as usize
    ]);
    let piece_nodata = piece.nodata;
    dst.zip_mut_with(&src, |d, &v| {
        if v != piece_nodata {
            *d = v;
        }
    });
    Ok(())
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

    fn triangle() -> Zone {
        // covers centres (0,1), (1,1), (1,2) of a 3x3 grid
        Zone::new(
            "T",
            "Triangle",
            MultiPolygon::new(vec![polygon![
                (x: 1.0, y: 3.5), (x: 3.5, y: 1.0), (x: 1.0, y: 1.0),
            ]]),
        )
    }

    #[test]
    fn test_clip_applies_cutline() {
        let r = raster(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]));
        let clipped = clip_to_zone(&r, &triangle()).unwrap();
        assert_eq!(clipped.data, arr2(&[[2.0, NODATA], [5.0, 6.0]]));
        assert_eq!(clipped.geo_transform.top_left_x, 1.0);
        assert_eq!(clipped.geo_transform.top_left_y, 3.0);
    }

    #[test]
    fn test_clip_outside_zone() {
        let r = raster(Array2::zeros((3, 3)));
        let far = Zone::new(
            "F",
            "Far",
            MultiPolygon::new(vec![polygon![(x: 10.0, y: 10.0), (x: 11.0, y: 10.0), (x: 11.0, y: 11.0)]]),
        );
        assert!(matches!(clip_to_zone(&r, &far), Err(NtlError::EmptyZone { .. })));
    }

    #[test]
    fn test_clip_then_mosaic_restores_zone_cells() {
        let r = raster(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]));
        let clipped = clip_to_zone(&r, &triangle()).unwrap();
        let merged = mosaic(&r, &[clipped]).unwrap();
        assert_eq!(
            merged.data,
            arr2(&[[NODATA, 2.0, NODATA], [NODATA, 5.0, 6.0], [NODATA, NODATA, NODATA]])
        );
    }

    #[test]
    fn test_mosaic_later_pieces_win() {
        let template = raster(Array2::zeros((2, 2)));
        let a = raster(arr2(&[[1.0, 1.0], [1.0, 1.0]]));
        let b = raster(arr2(&[[NODATA, 2.0], [2.0, NODATA]]));
        let merged = mosaic(&template, &[a, b]).unwrap();
        assert_eq!(merged.data, arr2(&[[1.0, 2.0], [2.0, 1.0]]));
    }

    #[test]
    fn test_mosaic_into_matches_mosaic() {
        let r = raster(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]));
        let lower = Zone::new(
            "L",
            "Lower",
            MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0), (x: 3.0, y: 0.0), (x: 0.0, y: 3.0),
            ]]),
        );
        let pieces = vec![
            clip_to_zone(&r, &triangle()).unwrap(),
            clip_to_zone(&r, &lower).unwrap(),
        ];

        let mut target = r.with_data(Array2::from_elem((3, 3), NODATA));
        for piece in &pieces {
            mosaic_into(&mut target, piece).unwrap();
        }
        assert_eq!(target.data, mosaic(&r, &pieces).unwrap().data);
        assert_eq!(target.data[[1, 1]], 5.0);
    }

    #[test]
    fn test_mosaic_rejects_misaligned_piece() {
        let template = raster(Array2::zeros((2, 2)));
        let mut piece = raster(Array2::zeros((1, 1)));
        piece.geo_transform.top_left_x = 0.5;
        assert!(mosaic(&template, &[piece]).is_err());
    }
}
