//! CF decoding applied to every variable a loader reads.

use grid_common::time::CfTimeUnits;
use grid_common::{ArrayValues, AttrValue, Attributes, Variable};
use serde_json::Value;
use tracing::debug;

const FILL_ATTRS: [&str; 2] = ["_FillValue", "missing_value"];

/// Mask fill values, apply `scale_factor`/`add_offset`, then decode CF times.
pub(crate) fn decode_variable(var: Variable, decode_times: bool) -> Variable {
    let var = mask_and_scale(var);
    if decode_times {
        decode_time(var)
    } else {
        var
    }
}

fn numbers(value: &AttrValue) -> Vec<f64> {
    match value {
        AttrValue::Float(v) => vec![*v],
        AttrValue::Int(v) => vec![*v as f64],
        AttrValue::Floats(v) => v.clone(),
        AttrValue::Ints(v) => v.iter().map(|x| *x as f64).collect(),
        AttrValue::Text(_) | AttrValue::Texts(_) => Vec::new(),
    }
}

fn mask_and_scale(mut var: Variable) -> Variable {
    let fills: Vec<f64> = FILL_ATTRS
        .iter()
        .filter_map(|name| var.attrs.get(*name))
        .flat_map(numbers)
        .filter(|f| !f.is_nan())
        .collect();
    let scale = var.attr("scale_factor").and_then(AttrValue::as_f64);
    let offset = var.attr("add_offset").and_then(AttrValue::as_f64);

    let has_fill = FILL_ATTRS.iter().any(|name| var.attrs.contains_key(*name));
    if !has_fill && scale.is_none() && offset.is_none() {
        return var;
    }

    let raw = match &var.values {
        ArrayValues::Float(v) => v.clone(),
        ArrayValues::Int(v) => v.iter().map(|x| *x as f64).collect(),
        ArrayValues::Text(_) | ArrayValues::Time(_) => return var,
    };

    let scale = scale.unwrap_or(1.0);
    let offset = offset.unwrap_or(0.0);
    let decoded = raw
        .into_iter()
        .map(|v| {
            if fills.contains(&v) {
                f64::NAN
            } else {
                v * scale + offset
            }
        })
        .collect();

    var.values = ArrayValues::Float(decoded);
    for name in FILL_ATTRS.iter().chain(["scale_factor", "add_offset"].iter()) {
        var.attrs.remove(*name);
    }
    var
}

fn decode_time(mut var: Variable) -> Variable {
    let Some(units) = var.attr("units").and_then(AttrValue::as_str) else {
        return var;
    };
    if !units.contains(" since ") {
        return var;
    }
    let units = match CfTimeUnits::parse(units) {
        Ok(units) => units,
        Err(e) => {
            debug!(variable = %var.name, error = %e, "Leaving time variable undecoded");
            return var;
        }
    };
    let Some(raw) = var.values.to_f64_vec() else {
        return var;
    };
    if matches!(var.values, ArrayValues::Time(_)) {
        return var;
    }

    let decoded: Option<Vec<i64>> = raw.into_iter().map(|v| units.decode(v)).collect();
    match decoded {
        Some(seconds) => {
            var.values = ArrayValues::Time(seconds);
            var.attrs.remove("units");
            var.attrs.remove("calendar");
        }
        None => debug!(variable = %var.name, "Time variable has fill values; left undecoded"),
    }
    var
}

/// Convert a JSON attribute map (Zarr `.zattrs`) into attributes.
pub(crate) fn json_attributes(map: &serde_json::Map<String, Value>) -> Attributes {
    map.iter()
        .filter_map(|(k, v)| json_attr(v).map(|a| (k.clone(), a)))
        .collect()
}

fn json_attr(value: &Value) -> Option<AttrValue> {
    match value {
        Value::String(s) => Some(AttrValue::Text(s.clone())),
        Value::Bool(b) => Some(AttrValue::Int(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(AttrValue::Int(i)),
            None => n.as_f64().map(AttrValue::Float),
        },
        Value::Array(items) => {
            if let Some(texts) = items
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<Vec<_>>>() {
                Some(AttrValue::Texts(texts))
            } else if let Some(ints) = items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
                Some(AttrValue::Ints(ints))
            } else if let Some(floats) = items.iter().map(json_float).collect::<Option<Vec<_>>>() {
                Some(AttrValue::Floats(floats))
            } else {
                Some(AttrValue::Text(value.to_string()))
            }
        }
        Value::Null => None,
        Value::Object(_) => Some(AttrValue::Text(value.to_string())),
    }
}

/// Zarr writes non-finite floats as strings.
pub(crate) fn json_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}
