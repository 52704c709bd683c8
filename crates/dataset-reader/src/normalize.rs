//! Coordinate normalization into the canonical raster layout.
//!
//! The output of [`CoordinateNormalizer::normalize`] has spatial dimensions
//! named `y` and `x` as its last two axes, a time axis (if any) first and of
//! length one, and a CRS attached. An `x` axis with any value above 180 is
//! taken to be a [0, 360) longitude axis and is remapped to `[-180, 180)`
//! ascending, whatever CRS the variable declares.
//! Downstream reprojection relies on that layout.

use tracing::debug;

use grid_common::time::{parse_time_selector, parse_timestamp, CfTimeUnits};
use grid_common::{ArrayValues, AttrValue, Crs, DataArray, Dataset, DatasetError, DatasetResult, Variable};

const LAT_NAMES: [&str; 2] = ["lat", "latitude"];
const LON_NAMES: [&str; 2] = ["lon", "longitude"];
const TIME_DIM: &str = "time";

/// Attributes of a grid-mapping variable that may hold a CRS definition.
const CRS_ATTRS: [&str; 3] = ["crs_wkt", "spatial_ref", "epsg_code"];

/// Stateless normalizer for a single variable of an opened dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateNormalizer;

/// Working state: the variable plus the 1-D coordinates of its dimensions.
struct Selection {
    var: Variable,
    coords: Vec<Variable>,
}

impl Selection {
    fn coord(&self, dim: &str) -> Option<&Variable> {
        self.coords.iter().find(|c| c.name == dim)
    }

    fn coord_mut(&mut self, dim: &str) -> Option<&mut Variable> {
        self.coords.iter_mut().find(|c| c.name == dim)
    }

    /// Keep `indices` along `dim` in both the variable and its coordinate.
    fn select(&mut self, axis: usize, indices: &[usize]) {
        let dim = self.var.dims[axis].clone();
        self.var = self.var.select_axis(axis, indices);
        if let Some(coord) = self.coord_mut(&dim) {
            *coord = coord.select_axis(0, indices);
        }
    }

    fn rename_dim(&mut self, from: &str, to: &str) {
        for dim in self.var.dims.iter_mut() {
            if dim.as_str() == from {
                *dim = to.to_string();
            }
        }
        if let Some(coord) = self.coord_mut(from) {
            coord.name = to.to_string();
            coord.dims = vec![to.to_string()];
        }
    }
}

impl CoordinateNormalizer {
    /// Normalize `variable` of `ds`.
    ///
    /// `drop_dim` is `"dim=value"`: the dimension is reduced to the step whose
    /// coordinate equals `value` and then removed. `time` selects the nearest
    /// time step by date; without it the first step is used.
    pub fn normalize(
        ds: &Dataset,
        variable: &str,
        time: Option<&str>,
        drop_dim: Option<&str>,
    ) -> DatasetResult<DataArray> {
        let var = ds
            .variable(variable)
            .ok_or_else(|| DatasetError::VariableNotFound(variable.to_string()))?;

        let coords = var
            .dims
            .iter()
            .filter_map(|dim| ds.coord(dim))
            .filter(|c| c.ndim() == 1 && c.dims[0] == c.name)
            .cloned()
            .collect();
        let mut sel = Selection {
            var: var.clone(),
            coords,
        };

        if let Some(selector) = drop_dim {
            drop_dimension(&mut sel, selector)?;
        }

        rename_spatial(&mut sel, &LAT_NAMES, "y");
        rename_spatial(&mut sel, &LON_NAMES, "x");
        if sel.var.axis("x").is_none() || sel.var.axis("y").is_none() {
            return Err(DatasetError::AmbiguousDimensions {
                variable: variable.to_string(),
                dims: sel.var.dims.clone(),
            });
        }

        let time_dim = find_time_dim(&sel);
        transpose_canonical(&mut sel, time_dim.as_deref());
        wrap_longitudes(&mut sel);
        let crs = resolve_crs(ds, &sel.var);

        if let Some(dim) = &time_dim {
            select_time(&mut sel, dim, time)?;
        } else if let Some(t) = time {
            debug!(variable = %variable, time = %t, "Ignoring time selector for variable without a time axis");
        }

        let Selection { var, coords } = sel;
        let coords = var
            .dims
            .iter()
            .filter_map(|d| coords.iter().find(|c| &c.name == d).cloned())
            .collect();

        Ok(DataArray {
            name: var.name,
            dims: var.dims,
            shape: var.shape,
            values: var.values,
            coords,
            attrs: var.attrs,
            crs,
        })
    }
}

fn drop_dimension(sel: &mut Selection, selector: &str) -> DatasetResult<()> {
    let (dim, value) = selector
        .split_once('=')
        .map(|(d, v)| (d.trim(), v.trim()))
        .ok_or_else(|| DatasetError::invalid_parameter("drop_dim", "expected 'dim=value'"))?;

    let axis = sel.var.axis(dim).ok_or_else(|| {
        DatasetError::InvalidSelection(format!("'{}' is not a dimension of '{}'", dim, sel.var.name))
    })?;

    let index = match sel.coord(dim) {
        Some(coord) => label_index(&coord.values, value),
        // Dimensions without a coordinate are indexed by position.
        None => value.parse::<usize>().ok().filter(|&i| i < sel.var.shape[axis]),
    }
    .ok_or_else(|| DatasetError::InvalidSelection(format!("no '{}' step equals {}", dim, value)))?;

    sel.select(axis, &[index]);
    sel.var.dims.remove(axis);
    sel.var.shape.remove(axis);
    sel.coords.retain(|c| c.name != dim);
    Ok(())
}

/// Index of the coordinate label equal to `value`.
fn label_index(values: &ArrayValues, value: &str) -> Option<usize> {
    match values {
        ArrayValues::Text(labels) => labels.iter().position(|l| l == value),
        ArrayValues::Time(seconds) => {
            let target = parse_timestamp(value).ok()?.timestamp();
            seconds.iter().position(|&s| s == target)
        }
        ArrayValues::Int(ints) => {
            let target = value.parse::<f64>().ok()?;
            ints.iter().position(|&i| i as f64 == target)
        }
        ArrayValues::Float(floats) => {
            let target = value.parse::<f64>().ok()?;
            floats.iter().position(|&f| f == target)
        }
    }
}

/// Rename the first dimension found in `candidates` to `canonical`.
fn rename_spatial(sel: &mut Selection, candidates: &[&str], canonical: &str) {
    if sel.var.axis(canonical).is_some() {
        return;
    }
    if let Some(found) = candidates.iter().find(|c| sel.var.axis(c).is_some()) {
        sel.rename_dim(found, canonical);
    }
}

fn find_time_dim(sel: &Selection) -> Option<String> {
    sel.var
        .dims
        .iter()
        .find(|d| {
            d.as_str() == TIME_DIM
                || sel
                    .coord(d)
                    .is_some_and(|c| matches!(c.values, ArrayValues::Time(_)))
        })
        .cloned()
}

/// Reorder to `[time, <other dims>, y, x]`.
fn transpose_canonical(sel: &mut Selection, time_dim: Option<&str>) {
    let dims = &sel.var.dims;
    let mut order = Vec::with_capacity(dims.len());
    if let Some(t) = time_dim.and_then(|t| sel.var.axis(t)) {
        order.push(t);
    }
    order.extend(
        dims.iter()
            .enumerate()
            .filter(|(_, d)| Some(d.as_str()) != time_dim && *d != "y" && *d != "x")
            .map(|(i, _)| i),
    );
    order.extend(sel.var.axis("y"));
    order.extend(sel.var.axis("x"));
    sel.var = sel.var.transpose(&order);
}

/// Remap a [0, 360) longitude axis onto [-180, 180) and sort ascending.
fn wrap_longitudes(sel: &mut Selection) {
    let Some(axis) = sel.var.axis("x") else {
        return;
    };
    let Some(lons) = sel.coord("x").and_then(|c| c.values.to_f64_vec()) else {
        return;
    };
    if !lons.iter().any(|&x| x > 180.0) {
        return;
    }

    let wrapped: Vec<f64> = lons
        .iter()
        .map(|&x| {
            let shifted = (x + 180.0).rem_euclid(360.0);
            // rem_euclid can round up to the modulus itself.
            if shifted >= 360.0 {
                -180.0
            } else {
                shifted - 180.0
            }
        })
        .collect();
    let mut order: Vec<usize> = (0..wrapped.len()).collect();
    order.sort_by(|&a, &b| wrapped[a].total_cmp(&wrapped[b]));

    debug!(variable = %sel.var.name, "Wrapping longitudes to [-180, 180)");
    sel.var = sel.var.select_axis(axis, &order);
    if let Some(coord) = sel.coord_mut("x") {
        coord.values = ArrayValues::Float(order.iter().map(|&i| wrapped[i]).collect());
    }
}

/// CRS from the grid mapping, a `spatial_ref` coordinate, or the variable itself.
fn resolve_crs(ds: &Dataset, var: &Variable) -> Crs {
    let grid_mapping = var
        .attr("grid_mapping")
        .and_then(AttrValue::as_str)
        .and_then(|name| ds.variable(name));

    grid_mapping
        .and_then(crs_from_attrs)
        .or_else(|| ds.coord("spatial_ref").and_then(crs_from_attrs))
        .or_else(|| var.attr("crs").and_then(parse_crs_attr))
        .unwrap_or_default()
}

fn crs_from_attrs(holder: &Variable) -> Option<Crs> {
    CRS_ATTRS
        .iter()
        .filter_map(|name| holder.attr(name))
        .find_map(parse_crs_attr)
}

fn parse_crs_attr(value: &AttrValue) -> Option<Crs> {
    match value {
        AttrValue::Int(code) => u32::try_from(*code).ok().map(Crs::Epsg),
        other => {
            let text = other.as_str()?;
            match Crs::parse(text) {
                Ok(crs) => Some(crs),
                Err(e) => {
                    debug!(error = %e, "Ignoring unrecognised CRS attribute");
                    None
                }
            }
        }
    }
}

/// Reduce the time axis to one step: the nearest to `selector`, or the first.
fn select_time(sel: &mut Selection, dim: &str, selector: Option<&str>) -> DatasetResult<()> {
    let Some(axis) = sel.var.axis(dim) else {
        return Ok(());
    };
    if sel.var.shape[axis] == 0 {
        return Err(DatasetError::InvalidSelection(format!(
            "'{}' has an empty '{}' axis",
            sel.var.name, dim
        )));
    }

    let seconds = sel.coord(dim).map(time_seconds).transpose();
    let index = match selector {
        None => 0,
        Some(raw) => {
            let target = parse_time_selector(raw)
                .map_err(|e| DatasetError::invalid_parameter("time", e.to_string()))?
                .timestamp();
            let seconds = seconds?.ok_or_else(|| {
                DatasetError::InvalidSelection(format!("'{}' has no coordinate values", dim))
            })?;
            seconds
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.abs_diff(target))
                .map(|(i, _)| i)
                .unwrap_or(0)
        }
    };

    sel.select(axis, &[index]);
    if let Some(coord) = sel.coord_mut(dim) {
        if let Ok(coerced) = time_seconds(coord) {
            coord.values = ArrayValues::Time(coerced);
        }
    }
    Ok(())
}

/// Time coordinate values as seconds since the epoch.
pub(crate) fn time_seconds(coord: &Variable) -> DatasetResult<Vec<i64>> {
    let uncoercible = || {
        DatasetError::InvalidSelection(format!(
            "time coordinate '{}' cannot be read as timestamps",
            coord.name
        ))
    };

    match &coord.values {
        ArrayValues::Time(seconds) => Ok(seconds.clone()),
        ArrayValues::Text(labels) => labels
            .iter()
            .map(|l| parse_timestamp(l).map(|dt| dt.timestamp()))
            .collect::<Result<_, _>>()
            .map_err(|_| uncoercible()),
        values => {
            let units = coord
                .attr("units")
                .and_then(AttrValue::as_str)
                .and_then(|u| CfTimeUnits::parse(u).ok())
                .ok_or_else(uncoercible)?;
            values
                .to_f64_vec()
                .unwrap_or_default()
                .into_iter()
                .map(|v| units.decode(v))
                .collect::<Option<_>>()
                .ok_or_else(uncoercible)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;

    fn dataset(vars: Vec<Variable>, coords: Vec<Variable>) -> Dataset {
        let mut ds = Dataset::new();
        for c in coords {
            ds.add_coord(c).unwrap();
        }
        for v in vars {
            ds.add_data_var(v).unwrap();
        }
        ds
    }

    fn grid(name: &str, dims: &[&str], shape: &[usize]) -> Variable {
        let n: usize = shape.iter().product();
        Variable::new(
            name,
            dims.iter().map(|d| d.to_string()).collect(),
            shape.to_vec(),
            ArrayValues::Float((0..n).map(|v| v as f64).collect()),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_variable() {
        let ds = Dataset::new();
        let err = CoordinateNormalizer::normalize(&ds, "sst", None, None).unwrap_err();
        assert_eq!(err.kind(), "VariableNotFound");
    }

    #[test]
    fn test_lon_lat_order_is_transposed() {
        let ds = dataset(
            vec![grid("t2m", &["longitude", "latitude"], &[3, 2])],
            vec![
                Variable::coord("longitude", ArrayValues::Float(vec![-10.0, 0.0, 10.0])),
                Variable::coord("latitude", ArrayValues::Float(vec![5.0, 6.0])),
            ],
        );
        let out = CoordinateNormalizer::normalize(&ds, "t2m", None, None).unwrap();
        assert_eq!(out.dims, vec!["y", "x"]);
        assert_eq!(out.shape, vec![2, 3]);
        // out[y][x] == in[x][y] == x * 2 + y
        assert_eq!(out.values, ArrayValues::Float(vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]));
        assert_eq!(out.coords[0].name, "y");
        assert_eq!(out.coords[1].name, "x");
        assert_eq!(out.crs, Crs::Epsg(4326));
    }

    #[test]
    fn test_missing_spatial_dimension_is_ambiguous() {
        let ds = dataset(vec![grid("profile", &["depth", "lat"], &[2, 2])], vec![]);
        let err = CoordinateNormalizer::normalize(&ds, "profile", None, None).unwrap_err();
        assert_eq!(err.kind(), "AmbiguousDimensions");
    }

    #[test]
    fn test_drop_dim_selects_and_removes() {
        let ds = dataset(
            vec![grid("temp", &["depth", "lat", "lon"], &[3, 1, 2])],
            vec![Variable::coord("depth", ArrayValues::Float(vec![0.0, 10.0, 50.0]))],
        );
        let out = CoordinateNormalizer::normalize(&ds, "temp", None, Some("depth=10")).unwrap();
        assert_eq!(out.dims, vec!["y", "x"]);
        assert_eq!(out.values, ArrayValues::Float(vec![2.0, 3.0]));
        assert!(out.coord("depth").is_none());

        let err = CoordinateNormalizer::normalize(&ds, "temp", None, Some("depth=11")).unwrap_err();
        assert_eq!(err.kind(), "InvalidSelection");
        let err = CoordinateNormalizer::normalize(&ds, "temp", None, Some("depth")).unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");
        let err = CoordinateNormalizer::normalize(&ds, "temp", None, Some("band=1")).unwrap_err();
        assert_eq!(err.kind(), "InvalidSelection");
    }

    #[test]
    fn test_nearest_time_step() {
        let times = vec![0, DAY, 2 * DAY];
        let ds = dataset(
            vec![grid("sst", &["time", "lat", "lon"], &[3, 1, 1])],
            vec![Variable::coord("time", ArrayValues::Time(times))],
        );

        let out = CoordinateNormalizer::normalize(&ds, "sst", Some("1970-01-02T18:00:00Z"), None).unwrap();
        // Only the date is significant: 1970-01-02 is exactly step 1.
        assert_eq!(out.values, ArrayValues::Float(vec![1.0]));
        assert_eq!(out.dim_len("time"), Some(1));
        assert_eq!(out.coord("time").unwrap().values, ArrayValues::Time(vec![DAY]));

        let out = CoordinateNormalizer::normalize(&ds, "sst", Some("2001-01-01"), None).unwrap();
        assert_eq!(out.values, ArrayValues::Float(vec![2.0]));

        let err = CoordinateNormalizer::normalize(&ds, "sst", Some("yesterday"), None).unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");
    }

    #[test]
    fn test_text_time_coordinate_is_coerced() {
        let labels = vec!["2024-01-01".to_string(), "2024-01-03T00:00:00".to_string()];
        let ds = dataset(
            vec![grid("chl", &["time", "lat", "lon"], &[2, 1, 1])],
            vec![Variable::coord("time", ArrayValues::Text(labels))],
        );
        let out = CoordinateNormalizer::normalize(&ds, "chl", Some("2024-01-03"), None).unwrap();
        assert_eq!(out.values, ArrayValues::Float(vec![1.0]));
        assert!(matches!(out.coord("time").unwrap().values, ArrayValues::Time(_)));
    }

    #[test]
    fn test_numeric_time_with_units_is_coerced() {
        let time = Variable::coord("time", ArrayValues::Float(vec![0.0, 1.0, 2.0]))
            .with_attr("units", "days since 2020-01-01");
        let ds = dataset(vec![grid("sst", &["time", "lat", "lon"], &[3, 1, 1])], vec![time]);
        let out = CoordinateNormalizer::normalize(&ds, "sst", Some("2020-01-03"), None).unwrap();
        assert_eq!(out.values, ArrayValues::Float(vec![2.0]));
    }

    #[test]
    fn test_grid_mapping_crs_is_kept() {
        let crs = Variable::new("crs", vec![], vec![], ArrayValues::Int(vec![0]))
            .unwrap()
            .with_attr("epsg_code", "EPSG:3031");
        let var = grid("ice", &["y", "x"], &[1, 1]).with_attr("grid_mapping", "crs");
        let ds = dataset(vec![var], vec![crs]);
        let out = CoordinateNormalizer::normalize(&ds, "ice", None, None).unwrap();
        assert_eq!(out.crs, Crs::Epsg(3031));
    }

    #[test]
    fn test_crs_attribute_on_variable() {
        let var = grid("elev", &["y", "x"], &[1, 1]).with_attr("crs", "EPSG:32633");
        let ds = dataset(vec![var], vec![]);
        let out = CoordinateNormalizer::normalize(&ds, "elev", None, None).unwrap();
        assert_eq!(out.crs, Crs::Epsg(32633));
    }

    #[test]
    fn test_wrap_keeps_values_with_their_longitude() {
        let ds = dataset(
            vec![grid("sst", &["lat", "lon"], &[1, 4])],
            vec![
                Variable::coord("lat", ArrayValues::Float(vec![0.0])),
                Variable::coord("lon", ArrayValues::Float(vec![0.0, 90.0, 180.0, 270.0])),
            ],
        );
        let out = CoordinateNormalizer::normalize(&ds, "sst", None, None).unwrap();
        assert_eq!(
            out.coord("x").unwrap().values,
            ArrayValues::Float(vec![-180.0, -90.0, 0.0, 90.0])
        );
        assert_eq!(out.values, ArrayValues::Float(vec![2.0, 3.0, 0.0, 1.0]));
    }
}
