use crate::error::{CompileError, CompileResult};
use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, IxDyn};
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Scalar(f64),
    Array(ArrayD<f64>),
}

impl DataValue {
    /// Shape of the value; empty for scalars.
    pub fn shape(&self) -> &[usize] {
        match self {
            DataValue::Scalar(_) => &[],
            DataValue::Array(a) => a.shape(),
        }
    }

    /// Raw element at 1-based `indices`, `None` when out of bounds or the
    /// rank does not match. Missing entries come back as `Some(NaN)`.
    pub fn element(&self, indices: &[usize]) -> Option<f64> {
        match self {
            DataValue::Scalar(v) if indices.is_empty() => Some(*v),
            DataValue::Scalar(_) => None,
            DataValue::Array(a) => {
                if indices.len() != a.ndim() || indices.iter().any(|&i| i == 0) {
                    return None;
                }
                let zero_based: Vec<usize> = indices.iter().map(|i| i - 1).collect();
                a.get(IxDyn(&zero_based)).copied()
            }
        }
    }
}

/// Ordered mapping from variable name to value, used for both data and inits.
/// A `NaN` array entry is missing: it is either a parameter or unused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: IndexMap<String, DataValue>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: DataValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn scalar(mut self, name: &str, value: f64) -> Self {
        self.insert(name, DataValue::Scalar(value));
        self
    }

    pub fn vector(mut self, name: &str, values: Vec<f64>) -> Self {
        self.insert(name, DataValue::Array(Array1::from_vec(values).into_dyn()));
        self
    }

    pub fn array(mut self, name: &str, values: ArrayD<f64>) -> Self {
        self.insert(name, DataValue::Array(values));
        self
    }

    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Observed value of `name[indices]`, `None` if unbound, out of bounds or missing.
    pub fn observed(&self, name: &str, indices: &[usize]) -> Option<f64> {
        self.values
            .get(name)
            .and_then(|v| v.element(indices))
            .filter(|v| !v.is_nan())
    }

    /// Parse `{ "N": 3, "y": [1.0, null, 2.5], "x": [[1, 2], [3, 4]] }`.
    pub fn from_json(text: &str) -> CompileResult<Self> {
        let doc: Json = serde_json::from_str(text).map_err(|e| CompileError::InvalidData {
            name: "<document>".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_value(&doc)
    }

    pub fn from_json_value(doc: &Json) -> CompileResult<Self> {
        let obj = doc.as_object().ok_or_else(|| CompileError::InvalidData {
            name: "<document>".to_string(),
            reason: "expected an object mapping names to values".to_string(),
        })?;
        let mut bindings = Bindings::new();
        for (name, value) in obj {
            bindings.insert(name, json_to_value(name, value)?);
        }
        Ok(bindings)
    }
}

fn json_to_value(name: &str, value: &Json) -> CompileResult<DataValue> {
    match value {
        Json::Array(_) => {
            let mut shape = Vec::new();
            let mut flat = Vec::new();
            collect_json(name, value, 0, &mut shape, &mut flat)?;
            let array = ArrayD::from_shape_vec(IxDyn(&shape), flat)
                .map_err(|e| CompileError::Shape(format!("`{name}`: {e}")))?;
            Ok(DataValue::Array(array))
        }
        other => Ok(DataValue::Scalar(json_leaf(name, other)?)),
    }
}

fn json_leaf(name: &str, value: &Json) -> CompileResult<f64> {
    match value {
        Json::Null => Ok(f64::NAN),
        Json::Number(n) => n.as_f64().ok_or_else(|| CompileError::InvalidData {
            name: name.to_string(),
            reason: format!("{n} is not representable as f64"),
        }),
        other => Err(CompileError::InvalidData {
            name: name.to_string(),
            reason: format!("expected a number or null, found {other}"),
        }),
    }
}

/// Walk a nested JSON array row-major, recording the extent of every depth
/// and rejecting ragged input.
fn collect_json(
    name: &str,
    value: &Json,
    depth: usize,
    shape: &mut Vec<usize>,
    out: &mut Vec<f64>,
) -> CompileResult<()> {
    let ragged = || CompileError::Shape(format!("`{name}` is not a rectangular array"));
    match value {
        Json::Array(items) => {
            if depth == shape.len() {
                // First visit at this depth; only legal while no leaf has been seen deeper.
                if !out.is_empty() {
                    return Err(ragged());
                }
                shape.push(items.len());
            } else if depth > shape.len() || shape[depth] != items.len() {
                return Err(ragged());
            }
            for item in items {
                collect_json(name, item, depth + 1, shape, out)?;
            }
            Ok(())
        }
        leaf => {
            if depth != shape.len() {
                return Err(ragged());
            }
            out.push(json_leaf(name, leaf)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_scalars_vectors_and_matrices() {
        let b = Bindings::from_json(r#"{ "N": 3, "y": [1.0, null, 2.5], "x": [[1, 2, 3], [4, 5, 6]] }"#)
            .unwrap();
        assert_eq!(b.observed("N", &[]), Some(3.0));
        assert_eq!(b.get("y").unwrap().shape(), &[3]);
        assert_eq!(b.observed("y", &[1]), Some(1.0));
        assert_eq!(b.observed("y", &[2]), None);
        assert!(b.get("y").unwrap().element(&[2]).unwrap().is_nan());
        assert_eq!(b.get("x").unwrap().shape(), &[2, 3]);
        assert_eq!(b.observed("x", &[2, 1]), Some(4.0));
        assert_eq!(b.observed("x", &[3, 1]), None);
        assert_eq!(b.get("x").unwrap().element(&[1]), None);
    }

    #[test]
    fn test_ragged_array_is_shape_error() {
        let err = Bindings::from_json(r#"{ "x": [[1, 2], [3]] }"#).unwrap_err();
        assert!(matches!(err, CompileError::Shape(_)));
        let err = Bindings::from_json(r#"{ "x": [1, [2, 3]] }"#).unwrap_err();
        assert!(matches!(err, CompileError::Shape(_)));
    }

    #[test]
    fn test_non_numeric_leaf_is_invalid_data() {
        let err = Bindings::from_json(r#"{ "x": ["a"] }"#).unwrap_err();
        assert!(matches!(err, CompileError::InvalidData { .. }));
    }

    #[test]
    fn test_builder_preserves_insertion_order() {
        let b = Bindings::new().scalar("b", 1.0).vector("a", vec![1.0, 2.0]);
        let names: Vec<&String> = b.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(b.observed("a", &[2]), Some(2.0));
    }
}
