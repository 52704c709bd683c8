//! Canonical layout guarantees of the coordinate normalizer.

use dataset_reader::CoordinateNormalizer;
use grid_common::{ArrayValues, Crs, DataArray};
use test_utils::{
    cube_value, lat_lon_grid, lat_lon_grid_with_crs, projected_grid, sst_cube, CUBE_START,
};

fn x_values(da: &DataArray) -> Vec<f64> {
    da.coord("x").unwrap().values.to_f64_vec().unwrap()
}

fn assert_wrapped(xs: &[f64]) {
    assert!(xs.iter().all(|&x| (-180.0..180.0).contains(&x)), "out of range: {:?}", xs);
    assert!(xs.windows(2).all(|w| w[0] < w[1]), "not ascending: {:?}", xs);
}

#[test]
fn test_zero_to_360_grid_is_wrapped() {
    let lons: Vec<f64> = (0..360).map(f64::from).collect();
    let ds = lat_lon_grid("sst", &[-10.0, 0.0, 10.0], &lons);

    let da = CoordinateNormalizer::normalize(&ds, "sst", None, None).unwrap();
    assert_eq!(da.dims, vec!["y", "x"]);
    assert_eq!(da.shape, vec![3, 360]);

    let xs = x_values(&da);
    assert_wrapped(&xs);
    assert_eq!(xs[0], -180.0);
    assert_eq!(xs[359], 179.0);

    // Longitude 180 (column 180) moved to the front; longitude 0 sits at index 180.
    assert_eq!(da.values.get_f64(0), Some(180_000.0));
    assert_eq!(da.values.get_f64(180), Some(0.0));
    assert_eq!(da.values.get_f64(360 + 181), Some(1_001.0));
}

#[test]
fn test_wrapping_holds_for_various_resolutions() {
    for step in [0.25, 1.0, 2.5, 7.5, 45.0, 120.0] {
        let n = (360.0 / step) as usize;
        let lons: Vec<f64> = (0..n).map(|i| i as f64 * step).collect();
        let ds = lat_lon_grid("v", &[0.0], &lons);
        let da = CoordinateNormalizer::normalize(&ds, "v", None, None).unwrap();
        let xs = x_values(&da);
        assert_eq!(xs.len(), n, "step {}", step);
        assert_wrapped(&xs);
    }
}

#[test]
fn test_wrapping_does_not_depend_on_the_declared_crs() {
    for code in ["EPSG:4283", "EPSG:4674", "EPSG:4612", "EPSG:4326"] {
        let ds = lat_lon_grid_with_crs("sst", &[0.0], &[0.0, 90.0, 180.0, 270.0], code);
        let da = CoordinateNormalizer::normalize(&ds, "sst", None, None).unwrap();

        assert_eq!(da.crs, Crs::parse(code).unwrap(), "{}", code);
        assert_eq!(x_values(&da), vec![-180.0, -90.0, 0.0, 90.0], "{}", code);
        // Value is col * 1000: longitude 180 (col 2) now comes first.
        assert_eq!(
            da.values,
            ArrayValues::Float(vec![2000.0, 3000.0, 0.0, 1000.0]),
            "{}",
            code
        );
    }
}

#[test]
fn test_grid_already_in_range_is_untouched() {
    let lons = [-180.0, -90.0, 0.0, 90.0, 180.0];
    let ds = lat_lon_grid("v", &[0.0], &lons);
    let da = CoordinateNormalizer::normalize(&ds, "v", None, None).unwrap();
    assert_eq!(x_values(&da), lons.to_vec());
}

#[test]
fn test_cube_defaults_to_first_time_step() {
    let da = CoordinateNormalizer::normalize(&sst_cube(), "sst", None, None).unwrap();
    assert_eq!(da.dims, vec!["time", "y", "x"]);
    assert_eq!(da.shape, vec![1, 4, 8]);
    assert_eq!(da.coord("time").unwrap().values, ArrayValues::Time(vec![CUBE_START]));

    // After wrapping, x index k holds source longitude index (k + 4) % 8.
    for y in 0..4 {
        for k in 0..8 {
            assert_eq!(
                da.values.get_f64(y * 8 + k),
                Some(cube_value(0, y, (k + 4) % 8)),
                "y={} k={}",
                y,
                k
            );
        }
    }
}

#[test]
fn test_cube_time_selection() {
    let da = CoordinateNormalizer::normalize(&sst_cube(), "ice", Some("2020-01-03T06:00:00Z"), None).unwrap();
    assert_eq!(da.shape, vec![1, 4, 8]);
    assert_eq!(da.values.get_f64(4), Some(cube_value(2, 0, 0) + 1000.0));
}

#[test]
fn test_projected_grid_keeps_its_crs() {
    let wkt = r#"PROJCS["WGS 84 / Antarctic Polar Stereographic",GEOGCS["WGS 84"],PROJECTION["Polar_Stereographic"]]"#;
    let da = CoordinateNormalizer::normalize(&projected_grid(wkt), "elevation", None, None).unwrap();

    assert_eq!(da.dims, vec!["y", "x"]);
    assert_eq!(da.shape, vec![2, 3]);
    assert_eq!(da.crs, Crs::Wkt(wkt.to_string()));
    assert!(!da.crs.is_geographic());
    // Stored as (x, y) with value col * 1000 + row.
    assert_eq!(
        da.values,
        ArrayValues::Float(vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0])
    );
}
