//! Variable listing and description for operators and the HTTP layer.

use serde::Serialize;
use serde_json::{json, Map, Value};

use grid_common::time::format_timestamp;
use grid_common::{AttrValue, Attributes, DataArray, DatasetResult, OpenOptions};

use crate::normalize::{time_seconds, CoordinateNormalizer};
use crate::opener::DatasetOpener;

/// Full extent of the globe in geographic coordinates.
const WORLD_BOUNDS: [f64; 4] = [-180.0, -90.0, 180.0, 90.0];

/// Summary of one normalized variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub crs: String,
    /// `[minx, miny, maxx, maxy]` in the variable's CRS, padded by half a cell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,
    /// Bounds clipped to the globe; only known for geographic CRSs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geographic_bounds: Option<[f64; 4]>,
    /// Dimensions other than `y` and `x`.
    pub other_dims: Vec<String>,
    pub attrs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<Vec<String>>,
}

pub struct VariableCatalog<'a> {
    opener: &'a DatasetOpener,
}

impl<'a> VariableCatalog<'a> {
    pub fn new(opener: &'a DatasetOpener) -> Self {
        Self { opener }
    }

    /// Names of the data variables in `locator`, sorted.
    pub async fn list_variables(&self, locator: &str, opts: &OpenOptions) -> DatasetResult<Vec<String>> {
        let ds = self.opener.open(locator, opts).await?;
        let mut names: Vec<String> = ds.data_var_names().into_iter().map(String::from).collect();
        names.sort();
        Ok(names)
    }

    /// Describe `variable` after normalization.
    ///
    /// With `show_times`, every step of the dataset's time axis is listed,
    /// not just the one the normalized variable keeps.
    pub async fn describe_variable(
        &self,
        locator: &str,
        opts: &OpenOptions,
        variable: &str,
        drop_dim: Option<&str>,
        show_times: bool,
    ) -> DatasetResult<VariableInfo> {
        let ds = self.opener.open(locator, opts).await?;
        let da = CoordinateNormalizer::normalize(&ds, variable, None, drop_dim)?;

        let bounds = spatial_bounds(&da);
        let geographic_bounds = if da.crs.is_geographic() {
            bounds.map(clip_to_world)
        } else {
            None
        };

        let times = if show_times {
            da.dims
                .first()
                .filter(|d| !matches!(d.as_str(), "y" | "x"))
                .and_then(|d| ds.coord(d))
                .and_then(|coord| time_seconds(coord).ok())
                .map(|seconds| seconds.into_iter().map(format_timestamp).collect::<Vec<_>>())
        } else {
            None
        };

        Ok(VariableInfo {
            name: da.name.clone(),
            dims: da.dims.clone(),
            shape: da.shape.clone(),
            dtype: da.values.dtype().to_string(),
            crs: da.crs.to_string(),
            bounds,
            geographic_bounds,
            other_dims: da
                .dims
                .iter()
                .filter(|d| !matches!(d.as_str(), "y" | "x"))
                .cloned()
                .collect(),
            attrs: attrs_json(&da.attrs),
            count: times.as_ref().map(Vec::len),
            times,
        })
    }
}

fn spatial_bounds(da: &DataArray) -> Option<[f64; 4]> {
    let (minx, maxx) = padded_extent(da, "x")?;
    let (miny, maxy) = padded_extent(da, "y")?;
    Some([minx, miny, maxx, maxy])
}

/// Extent of a 1-D coordinate, widened by half the cell size on each side.
fn padded_extent(da: &DataArray, dim: &str) -> Option<(f64, f64)> {
    let values = da.coord(dim)?.values.to_f64_vec()?;
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let min = finite.iter().copied().reduce(f64::min)?;
    let max = finite.iter().copied().reduce(f64::max)?;
    let half = match finite.as_slice() {
        [a, b, ..] => (b - a).abs() / 2.0,
        _ => 0.0,
    };
    Some((min - half, max + half))
}

fn clip_to_world(bounds: [f64; 4]) -> [f64; 4] {
    [
        bounds[0].max(WORLD_BOUNDS[0]),
        bounds[1].max(WORLD_BOUNDS[1]),
        bounds[2].min(WORLD_BOUNDS[2]),
        bounds[3].min(WORLD_BOUNDS[3]),
    ]
}

fn attrs_json(attrs: &Attributes) -> Map<String, Value> {
    attrs
        .iter()
        .map(|(k, v)| {
            let value = match v {
                AttrValue::Text(s) => json!(s),
                AttrValue::Texts(s) => json!(s),
                AttrValue::Float(f) => json!(f),
                AttrValue::Floats(f) => json!(f),
                AttrValue::Int(i) => json!(i),
                AttrValue::Ints(i) => json!(i),
            };
            (k.clone(), value)
        })
        .collect()
}
