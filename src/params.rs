//! Flattening of nested request parameters into `(path, value)` pairs.
//!
//! Map keys contribute `[key]` and sequence membership contributes `[]` to
//! the path, so `{"user": {"tags": ["a"]}}` flattens to `user[tags][] = "a"`.
//! Output follows the iteration order of the parameter tree, which is
//! insertion order because `serde_json` is built with `preserve_order`.

use serde::Serialize;
use serde_json::{Map, Value};

pub type Params = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterPair {
    pub path: String,
    pub value: Value,
}

impl ParameterPair {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// Renders the scalar the way it would appear in a form field.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Flattens every top-level entry, or only the one named by `only`.
///
/// An empty `only` behaves like `None`.
pub fn flatten(params: &Params, only: Option<&str>) -> Vec<ParameterPair> {
    let only = only.filter(|key| !key.is_empty());
    let mut pairs = Vec::new();
    for (key, value) in params {
        if only.is_some_and(|wanted| wanted != key.as_str()) {
            continue;
        }
        let mut path = key.clone();
        collect(value, &mut path, &mut pairs);
    }
    pairs
}

/// Flattens each named group in order and concatenates the results.
pub fn flatten_groups<S: AsRef<str>>(params: &Params, groups: &[S]) -> Vec<ParameterPair> {
    groups
        .iter()
        .flat_map(|group| flatten(params, Some(group.as_ref())))
        .collect()
}

fn collect(value: &Value, path: &mut String, pairs: &mut Vec<ParameterPair>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let len = path.len();
                path.push('[');
                path.push_str(key);
                path.push(']');
                collect(child, path, pairs);
                path.truncate(len);
            }
        }
        Value::Array(items) => {
            for child in items {
                let len = path.len();
                path.push_str("[]");
                collect(child, path, pairs);
                path.truncate(len);
            }
        }
        scalar => pairs.push(ParameterPair::new(path.clone(), scalar.clone())),
    }
}
