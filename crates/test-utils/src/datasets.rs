//! Synthetic datasets with predictable values.
//!
//! Values encode their own position so tests can check that reordering,
//! selection and longitude wrapping moved the right cells.

use grid_common::{ArrayValues, Dataset, Variable};

/// 2020-01-01T00:00:00Z
pub const CUBE_START: i64 = 1_577_836_800;

pub const DAY: i64 = 86_400;

pub const CUBE_LATS: [f64; 4] = [-45.0, -15.0, 15.0, 45.0];

/// 0..=315 in 45 degree steps, so half of the grid lies east of 180.
pub const CUBE_LONS: [f64; 8] = [0.0, 45.0, 90.0, 135.0, 180.0, 225.0, 270.0, 315.0];

/// Value of the cube's `sst` at `(time, lat, lon)` indices.
pub fn cube_value(t: usize, y: usize, x: usize) -> f64 {
    (t * 100 + y * 10 + x) as f64
}

/// A daily sea surface temperature cube, `time(3) x lat(4) x lon(8)`.
///
/// Data variables are inserted out of alphabetical order: `sst`, `ice`,
/// `err`, `anom`. Only `sst` follows [`cube_value`]; the others are offsets of it.
pub fn sst_cube() -> Dataset {
    let mut ds = Dataset::new();
    ds.attrs.insert("title".into(), "synthetic sst".into());

    ds.add_coord(
        Variable::coord(
            "time",
            ArrayValues::Time((0..3).map(|d| CUBE_START + d * DAY).collect()),
        )
        .with_attr("standard_name", "time"),
    )
    .expect("time coordinate");
    ds.add_coord(
        Variable::coord("lat", ArrayValues::Float(CUBE_LATS.to_vec()))
            .with_attr("units", "degrees_north"),
    )
    .expect("lat coordinate");
    ds.add_coord(
        Variable::coord("lon", ArrayValues::Float(CUBE_LONS.to_vec()))
            .with_attr("units", "degrees_east"),
    )
    .expect("lon coordinate");

    for (name, offset) in [("sst", 0.0), ("ice", 1000.0), ("err", 2000.0), ("anom", 3000.0)] {
        let mut values = Vec::with_capacity(3 * 4 * 8);
        for t in 0..3 {
            for y in 0..4 {
                for x in 0..8 {
                    values.push(cube_value(t, y, x) + offset);
                }
            }
        }
        let var = Variable::new(
            name,
            vec!["time".into(), "lat".into(), "lon".into()],
            vec![3, 4, 8],
            ArrayValues::Float(values),
        )
        .expect("cube variable")
        .with_attr("units", "K");
        ds.add_data_var(var).expect("cube variable");
    }

    ds
}

/// A single `name(latitude, longitude)` grid whose value is `col * 1000 + row`.
pub fn lat_lon_grid(name: &str, lats: &[f64], lons: &[f64]) -> Dataset {
    let mut ds = Dataset::new();
    ds.add_coord(Variable::coord("latitude", ArrayValues::Float(lats.to_vec())))
        .expect("latitude coordinate");
    ds.add_coord(Variable::coord("longitude", ArrayValues::Float(lons.to_vec())))
        .expect("longitude coordinate");

    let mut values = Vec::with_capacity(lats.len() * lons.len());
    for row in 0..lats.len() {
        for col in 0..lons.len() {
            values.push((col * 1000 + row) as f64);
        }
    }
    ds.add_data_var(
        Variable::new(
            name,
            vec!["latitude".into(), "longitude".into()],
            vec![lats.len(), lons.len()],
            ArrayValues::Float(values),
        )
        .expect("grid variable"),
    )
    .expect("grid variable");
    ds
}

/// [`lat_lon_grid`] with a `crs` grid-mapping variable naming `epsg_code`.
pub fn lat_lon_grid_with_crs(name: &str, lats: &[f64], lons: &[f64], epsg_code: &str) -> Dataset {
    let mut ds = lat_lon_grid(name, lats, lons);
    ds.add_coord(
        Variable::new("crs", vec![], vec![], ArrayValues::Int(vec![0]))
            .expect("grid mapping")
            .with_attr("epsg_code", epsg_code),
    )
    .expect("grid mapping");
    if let Some(var) = ds.data_vars.iter_mut().find(|v| v.name == name) {
        var.attrs.insert("grid_mapping".into(), "crs".into());
    }
    ds
}

/// A projected grid with an `x`/`y` layout stored as `(x, y)` and a
/// `spatial_ref` grid-mapping variable. Coordinates are in kilometres and
/// stay within 180 of the origin.
pub fn projected_grid(wkt: &str) -> Dataset {
    let xs = vec![-150.0, 0.0, 150.0];
    let ys = vec![100.0, 50.0];

    let mut ds = Dataset::new();
    ds.add_coord(Variable::coord("x", ArrayValues::Float(xs.clone())))
        .expect("x coordinate");
    ds.add_coord(Variable::coord("y", ArrayValues::Float(ys.clone())))
        .expect("y coordinate");
    ds.add_coord(
        Variable::new("spatial_ref", vec![], vec![], ArrayValues::Int(vec![0]))
            .expect("grid mapping")
            .with_attr("crs_wkt", wkt),
    )
    .expect("grid mapping");

    let mut values = Vec::with_capacity(xs.len() * ys.len());
    for col in 0..xs.len() {
        for row in 0..ys.len() {
            values.push((col * 1000 + row) as f64);
        }
    }
    ds.add_data_var(
        Variable::new(
            "elevation",
            vec!["x".into(), "y".into()],
            vec![xs.len(), ys.len()],
            ArrayValues::Float(values),
        )
        .expect("elevation")
        .with_attr("grid_mapping", "spatial_ref"),
    )
    .expect("elevation");
    ds
}
