//! In-memory dataset model and its binary cache encoding.
//!
//! A [`Dataset`] is what the reader produces after opening a store and what
//! cache backends hold (as [`Dataset::to_bytes`] output). A [`DataArray`] is a
//! single variable after coordinate normalization.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crs::Crs;
use crate::error::{DatasetError, DatasetResult};

/// Magic bytes at the start of every encoded dataset.
const DATASET_MAGIC: &[u8; 4] = b"GRDS";

/// Encoding version written by [`Dataset::to_bytes`].
const DATASET_VERSION: u8 = 1;

const HEADER_LEN: usize = DATASET_MAGIC.len() + 1;

pub type Attributes = BTreeMap<String, AttrValue>;

/// Attribute value attached to a dataset or variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Text(String),
    Texts(Vec<String>),
    Float(f64),
    Floats(Vec<f64>),
    Int(i64),
    Ints(Vec<i64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Texts(v) if v.len() == 1 => Some(&v[0]),
            _ => None,
        }
    }

    /// Numeric value of a scalar (or single-element) attribute.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Floats(v) if v.len() == 1 => Some(v[0]),
            AttrValue::Ints(v) if v.len() == 1 => Some(v[0] as f64),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

/// Row-major element storage for a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValues {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
    /// Seconds since the Unix epoch.
    Time(Vec<i64>),
}

impl ArrayValues {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float(v) => v.len(),
            ArrayValues::Int(v) | ArrayValues::Time(v) => v.len(),
            ArrayValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            ArrayValues::Float(_) => "float64",
            ArrayValues::Int(_) => "int64",
            ArrayValues::Text(_) => "str",
            ArrayValues::Time(_) => "datetime64[s]",
        }
    }

    /// Element `i` as a float; `None` for text or out of range.
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        match self {
            ArrayValues::Float(v) => v.get(i).copied(),
            ArrayValues::Int(v) | ArrayValues::Time(v) => v.get(i).map(|x| *x as f64),
            ArrayValues::Text(_) => None,
        }
    }

    /// All elements as floats, or `None` for text arrays.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            ArrayValues::Float(v) => Some(v.clone()),
            ArrayValues::Int(v) | ArrayValues::Time(v) => Some(v.iter().map(|x| *x as f64).collect()),
            ArrayValues::Text(_) => None,
        }
    }

    /// Gather elements by flat index.
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            ArrayValues::Float(v) => ArrayValues::Float(indices.iter().map(|&i| v[i]).collect()),
            ArrayValues::Int(v) => ArrayValues::Int(indices.iter().map(|&i| v[i]).collect()),
            ArrayValues::Time(v) => ArrayValues::Time(indices.iter().map(|&i| v[i]).collect()),
            ArrayValues::Text(v) => {
                ArrayValues::Text(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

/// A named n-dimensional array with attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: ArrayValues,
    pub attrs: Attributes,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        dims: Vec<String>,
        shape: Vec<usize>,
        values: ArrayValues,
    ) -> DatasetResult<Self> {
        let name = name.into();
        if dims.len() != shape.len() {
            return Err(DatasetError::Codec(format!(
                "variable '{}' has {} dimension names for a {}-d shape",
                name,
                dims.len(),
                shape.len()
            )));
        }
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(DatasetError::Codec(format!(
                "variable '{}' has {} values but shape {:?} needs {}",
                name,
                values.len(),
                shape,
                expected
            )));
        }
        Ok(Self {
            name,
            dims,
            shape,
            values,
            attrs: Attributes::new(),
        })
    }

    /// One-dimensional coordinate variable indexed by its own name.
    pub fn coord(name: impl Into<String>, values: ArrayValues) -> Self {
        let name = name.into();
        Self {
            dims: vec![name.clone()],
            shape: vec![values.len()],
            name,
            values,
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn axis(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Select `indices` along `axis`; the axis keeps its position with the new length.
    pub fn select_axis(&self, axis: usize, indices: &[usize]) -> Self {
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let len = self.shape[axis];

        let mut src = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            for &i in indices {
                let base = (o * len + i) * inner;
                src.extend(base..base + inner);
            }
        }

        let mut shape = self.shape.clone();
        shape[axis] = indices.len();
        Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            shape,
            values: self.values.take(&src),
            attrs: self.attrs.clone(),
        }
    }

    /// Remove a length-1 axis.
    pub fn squeeze_axis(mut self, axis: usize) -> Self {
        debug_assert_eq!(self.shape[axis], 1);
        self.dims.remove(axis);
        self.shape.remove(axis);
        self
    }

    /// Reorder axes; `order[k]` is the old axis that becomes axis `k`.
    pub fn transpose(&self, order: &[usize]) -> Self {
        if order.iter().enumerate().all(|(k, &a)| k == a) {
            return self.clone();
        }

        let ndim = self.shape.len();
        let mut old_strides = vec![1usize; ndim];
        for d in (0..ndim.saturating_sub(1)).rev() {
            old_strides[d] = old_strides[d + 1] * self.shape[d + 1];
        }

        let new_shape: Vec<usize> = order.iter().map(|&a| self.shape[a]).collect();
        let total: usize = new_shape.iter().product();
        let mut src = Vec::with_capacity(total);
        let mut idx = vec![0usize; ndim];
        for _ in 0..total {
            src.push(
                idx.iter()
                    .zip(order)
                    .map(|(i, &a)| i * old_strides[a])
                    .sum::<usize>(),
            );
            for d in (0..ndim).rev() {
                idx[d] += 1;
                if idx[d] < new_shape[d] {
                    break;
                }
                idx[d] = 0;
            }
        }

        Self {
            name: self.name.clone(),
            dims: order.iter().map(|&a| self.dims[a].clone()).collect(),
            shape: new_shape,
            values: self.values.take(&src),
            attrs: self.attrs.clone(),
        }
    }
}

/// An opened multidimensional dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dims: Vec<Dimension>,
    pub coords: Vec<Variable>,
    pub data_vars: Vec<Variable>,
    pub attrs: Attributes,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_coord(&mut self, var: Variable) -> DatasetResult<()> {
        self.register_dims(&var)?;
        self.coords.retain(|c| c.name != var.name);
        self.coords.push(var);
        Ok(())
    }

    pub fn add_data_var(&mut self, var: Variable) -> DatasetResult<()> {
        self.register_dims(&var)?;
        self.data_vars.retain(|v| v.name != var.name);
        self.data_vars.push(var);
        Ok(())
    }

    fn register_dims(&mut self, var: &Variable) -> DatasetResult<()> {
        for (name, &len) in var.dims.iter().zip(&var.shape) {
            match self.dims.iter().find(|d| &d.name == name) {
                Some(dim) if dim.len != len => {
                    return Err(DatasetError::Codec(format!(
                        "dimension '{}' has length {} but '{}' uses {}",
                        name, dim.len, var.name, len
                    )));
                }
                Some(_) => {}
                None => self.dims.push(Dimension {
                    name: name.clone(),
                    len,
                }),
            }
        }
        Ok(())
    }

    /// Look up a data variable, falling back to coordinates.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.data_vars
            .iter()
            .chain(self.coords.iter())
            .find(|v| v.name == name)
    }

    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.iter().find(|c| c.name == name)
    }

    pub fn data_var_names(&self) -> Vec<&str> {
        self.data_vars.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dims.iter().find(|d| d.name == name).map(|d| d.len)
    }

    /// Encode for a cache backend: magic, version byte, postcard body.
    pub fn to_bytes(&self) -> DatasetResult<Bytes> {
        let body = postcard::to_allocvec(self)?;
        let mut data = Vec::with_capacity(HEADER_LEN + body.len());
        data.extend_from_slice(DATASET_MAGIC);
        data.push(DATASET_VERSION);
        data.extend_from_slice(&body);
        Ok(Bytes::from(data))
    }

    pub fn from_bytes(data: &[u8]) -> DatasetResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(DatasetError::Codec("data too short for header".to_string()));
        }
        if &data[..DATASET_MAGIC.len()] != DATASET_MAGIC {
            return Err(DatasetError::Codec("invalid magic bytes".to_string()));
        }
        let version = data[DATASET_MAGIC.len()];
        if version != DATASET_VERSION {
            return Err(DatasetError::Codec(format!(
                "unsupported encoding version {}",
                version
            )));
        }
        Ok(postcard::from_bytes(&data[HEADER_LEN..])?)
    }
}

/// A single variable in canonical raster layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: ArrayValues,
    /// One-dimensional coordinates for the dimensions that have them.
    pub coords: Vec<Variable>,
    pub attrs: Attributes,
    pub crs: Crs,
}

impl DataArray {
    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.iter().find(|c| c.name == name)
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dims
            .iter()
            .position(|d| d == name)
            .map(|axis| self.shape[axis])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(values: Vec<f64>) -> Variable {
        Variable::new(
            "sst",
            vec!["a".into(), "b".into(), "c".into()],
            vec![2, 3, 2],
            ArrayValues::Float(values),
        )
        .unwrap()
    }

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.attrs.insert("title".into(), "sample".into());
        ds.add_coord(Variable::coord("time", ArrayValues::Time(vec![0, 86_400])))
            .unwrap();
        ds.add_coord(Variable::coord("lat", ArrayValues::Float(vec![-10.0, 10.0])))
            .unwrap();
        ds.add_data_var(
            Variable::new(
                "sst",
                vec!["time".into(), "lat".into()],
                vec![2, 2],
                ArrayValues::Float(vec![1.0, f64::NAN, 3.0, 4.0]),
            )
            .unwrap()
            .with_attr("units", "K")
            .with_attr("scale_factor", 0.01),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_shape_validation() {
        let err = Variable::new(
            "bad",
            vec!["x".into()],
            vec![3],
            ArrayValues::Float(vec![1.0, 2.0]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "Codec");

        let mut ds = Dataset::new();
        ds.add_coord(Variable::coord("x", ArrayValues::Int(vec![1, 2, 3])))
            .unwrap();
        let conflicting = Variable::coord("x2", ArrayValues::Int(vec![1]));
        let conflicting = Variable {
            dims: vec!["x".into()],
            ..conflicting
        };
        assert!(ds.add_data_var(conflicting).is_err());
    }

    #[test]
    fn test_select_axis() {
        let var = grid((0..12).map(|v| v as f64).collect());
        let picked = var.select_axis(1, &[2, 0]);
        assert_eq!(picked.shape, vec![2, 2, 2]);
        assert_eq!(
            picked.values,
            ArrayValues::Float(vec![4.0, 5.0, 0.0, 1.0, 10.0, 11.0, 6.0, 7.0])
        );
    }

    #[test]
    fn test_transpose() {
        let var = grid((0..12).map(|v| v as f64).collect());
        let t = var.transpose(&[2, 0, 1]);
        assert_eq!(t.dims, vec!["c", "a", "b"]);
        assert_eq!(t.shape, vec![2, 2, 3]);
        // t[c][a][b] == var[a][b][c]
        assert_eq!(
            t.values,
            ArrayValues::Float(vec![
                0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 1.0, 3.0, 5.0, 7.0, 9.0, 11.0
            ])
        );
    }

    #[test]
    fn test_bytes_round_trip() {
        let ds = sample_dataset();
        let encoded = ds.to_bytes().unwrap();
        assert_eq!(&encoded[..4], b"GRDS");

        let decoded = Dataset::from_bytes(&encoded).unwrap();
        assert_eq!(decoded.dims, ds.dims);
        assert_eq!(decoded.coords, ds.coords);
        assert_eq!(decoded.attrs, ds.attrs);
        assert_eq!(decoded.data_var_names(), vec!["sst"]);

        // NaN breaks PartialEq, so compare the re-encoding instead.
        assert_eq!(decoded.to_bytes().unwrap(), encoded);
        match &decoded.variable("sst").unwrap().values {
            ArrayValues::Float(v) => assert!(v[1].is_nan()),
            other => panic!("unexpected values {:?}", other),
        }
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Dataset::from_bytes(b"GR").is_err());
        assert!(Dataset::from_bytes(b"XXXX\x01abc").is_err());
        assert!(Dataset::from_bytes(b"GRDS\x09").is_err());
        assert!(Dataset::from_bytes(b"GRDS\x01\xff\xff").is_err());
    }

    #[test]
    fn test_variable_lookup_falls_back_to_coords() {
        let ds = sample_dataset();
        assert!(ds.variable("sst").is_some());
        assert!(ds.variable("lat").is_some());
        assert!(ds.variable("missing").is_none());
        assert_eq!(ds.dim_len("time"), Some(2));
    }
}
