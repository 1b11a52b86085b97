use geo::{polygon, MultiPolygon};
use nightlights::core::mask::mask;
use nightlights::core::table::ZonalStatistic;
use nightlights::io::table::write_summary_table;
use nightlights::{
    CoordinateSystem, GeoTransform, Raster, TimeSeries, ZonalAggregator, Zone, ZoneSet, NODATA,
};
use ndarray::{arr2, Array2};

fn grid(data: Array2<f32>) -> Raster {
    Raster::new(
        data,
        GeoTransform::north_up(500_000.0, 2_000_400.0, 100.0, 100.0),
        CoordinateSystem::Projected { epsg: 32618 },
    )
}

fn square(id: &str, x0: f64, y0: f64, size: f64) -> Zone {
    Zone::new(
        id,
        format!("Unit {}", id),
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0), (x: x0 + size, y: y0), (x: x0 + size, y: y0 + size), (x: x0, y: y0 + size),
        ]]),
    )
}

/// Two 200 m squares over a 4x4 grid of 100 m cells
fn zones() -> ZoneSet {
    ZoneSet::new(
        vec![
            square("A", 500_000.0, 2_000_200.0, 200.0),
            square("B", 500_200.0, 2_000_000.0, 200.0),
        ],
        CoordinateSystem::Projected { epsg: 32618 },
    )
    .expect("unique ids")
}

#[test]
fn test_masked_series_aggregation() {
    let _ = env_logger::builder().is_test(true).try_init();
    println!("=== Mask then aggregate ===");

    let quality = grid(Array2::from_elem((4, 4), 2.0));
    let rasters: Vec<Raster> = (1..=4)
        .map(|p| {
            let mut values = Array2::from_elem((4, 4), p as f32);
            values[[0, 0]] = -1.0;
            values[[3, 3]] = 0.0;
            mask(&grid(values), &quality, 1.0, 0.0).expect("aligned grids")
        })
        .collect();
    assert_eq!(rasters[0].data[[0, 0]], NODATA);
    assert_eq!(rasters[0].data[[3, 3]], NODATA);

    let series = TimeSeries::new("TST", rasters).expect("aligned series");
    let table = ZonalAggregator::default()
        .aggregate(&zones(), &series, ZonalStatistic::Sum)
        .expect("aggregation");

    // projected zones keep their native planar area
    let a = table.row("A").expect("zone A");
    let derived = a.derived.as_ref().expect("derived");
    assert!((derived.area_km2 - 0.04).abs() < 1e-12);
    assert_eq!(a.value(1), Some(3.0));
    assert_eq!(a.value(4), Some(12.0));
    assert!((derived.annual_average - 7.5).abs() < 1e-12);
    assert!((a.derived_for(2).expect("p2").area_rate - 6.0 / 0.04).abs() < 1e-9);
    assert!((a.derived_for(4).expect("p4").percent_deviation - 60.0).abs() < 1e-9);

    let means = ZonalAggregator::default()
        .aggregate(&zones(), &series, ZonalStatistic::Mean)
        .expect("aggregation");
    assert_eq!(means.row("B").expect("zone B").value(3), Some(3.0));
    assert!(!means.has_derived());
}

#[test]
fn test_population_summary() {
    let _ = env_logger::builder().is_test(true).try_init();

    let population = grid(arr2(&[
        [10.0, 20.0, 0.0, 0.0],
        [30.0, NODATA, 0.0, 0.0],
        [0.0, 0.0, 5.0, 5.0],
        [0.0, 0.0, 5.0, 1.0],
    ]));
    let summary = ZonalAggregator::default()
        .summarize(
            &zones(),
            &population,
            &[ZonalStatistic::Sum, ZonalStatistic::Max, ZonalStatistic::Count],
        )
        .expect("summary");
    assert_eq!(summary.value("A", ZonalStatistic::Sum), Some(60.0));
    assert_eq!(summary.value("A", ZonalStatistic::Count), Some(3.0));
    assert_eq!(summary.value("B", ZonalStatistic::Max), Some(5.0));

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("HTI_ppp_L1.csv");
    write_summary_table(&summary, &path).expect("summary written");
    let text = std::fs::read_to_string(&path).expect("summary read");
    assert!(text.starts_with("zone_id,name,sum,max,count\nA,Unit A,60,30,3\n"));
}
