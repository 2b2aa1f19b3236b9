//! Documents as stored by the remote collection.
//!
//! A document is a JSON object with a required string `_id`. Nested fields are
//! addressed with dot-paths: `_cluster_.title_vector_.kmeans_8` names the
//! `kmeans_8` key inside the `title_vector_` object inside `_cluster_`.
//!
//! Transforms run by the pull-update-push pipeline can flag a document as
//! invalid with [`Document::mark_invalid`]; the flag never reaches the wire.

mod path;

pub use path::{get_path, remove_path, set_path, split_path};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// A single document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(skip)]
    invalid: Option<String>,
}

impl Document {
    /// Create an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self {
            fields,
            invalid: None,
        }
    }

    /// Wrap a JSON value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Build from an existing field map.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            invalid: None,
        }
    }

    /// The `_id`, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The `_id` for messages; `<unknown>` when absent.
    pub fn display_id(&self) -> &str {
        self.id().unwrap_or("<unknown>")
    }

    /// Top-level fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume into the raw field map.
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Value at a dot-path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.fields, path)
    }

    /// Whether a non-null value exists at a dot-path.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// Set a value at a dot-path, creating intermediate objects.
    ///
    /// Intermediate non-object values are replaced by objects.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        set_path(&mut self.fields, path, value.into());
    }

    /// Remove and return the value at a dot-path.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        remove_path(&mut self.fields, path)
    }

    /// Parse the value at `path` as a numeric vector.
    ///
    /// Returns `Ok(None)` when the field is absent and
    /// [`Error::InvalidVector`] when it is present but not an array of numbers.
    pub fn vector(&self, path: &str) -> Result<Option<Vec<f32>>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => parse_vector(value).map(Some).ok_or_else(|| Error::InvalidVector {
                id: self.display_id().to_string(),
                field: path.to_string(),
            }),
        }
    }

    /// Keep only `_id` and the given paths.
    pub fn project(&self, paths: &[String]) -> Document {
        let mut out = Map::new();
        if let Some(id) = self.fields.get(ID_FIELD) {
            out.insert(ID_FIELD.to_string(), id.clone());
        }
        for path in paths {
            if let Some(value) = self.get(path) {
                set_path(&mut out, path, value.clone());
            }
        }
        Document::from_map(out)
    }

    /// Flag this document as unfit to be written back.
    pub fn mark_invalid(&mut self, reason: impl Into<String>) {
        self.invalid = Some(reason.into());
    }

    /// Reason given to [`Document::mark_invalid`], if any.
    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid.as_deref()
    }

    /// Whether the document was flagged invalid.
    pub fn is_invalid(&self) -> bool {
        self.invalid.is_some()
    }

    /// Every leaf dot-path in this document (objects are descended, arrays are leaves).
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_leaf_paths(&self.fields, "", &mut out);
        out
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

/// Convert a JSON array of numbers to `Vec<f32>`.
pub fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|x| x.as_f64().map(|f| f as f32))
        .collect()
}

/// Convert a vector to a JSON array.
///
/// Non-finite components serialize to `null`, which stores reject.
pub fn vector_value(vector: &[f32]) -> Value {
    Value::Array(
        vector
            .iter()
            .map(|&x| {
                serde_json::Number::from_f64(x as f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            })
            .collect(),
    )
}

/// Values of one field across documents, skipping documents that lack it.
pub fn field_across_documents(field: &str, documents: &[Document]) -> Vec<Value> {
    documents
        .iter()
        .filter_map(|d| d.get(field))
        .filter(|v| !v.is_null())
        .cloned()
        .collect()
}

fn collect_leaf_paths(map: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => collect_leaf_paths(inner, &path, out),
            _ => out.push(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_set_and_get() {
        let mut doc = Document::new("a");
        doc.set("_cluster_.v.kmeans_2", "cluster-1");
        assert_eq!(
            doc.get("_cluster_.v.kmeans_2"),
            Some(&Value::String("cluster-1".into()))
        );
        assert_eq!(doc.id(), Some("a"));
        assert!(doc.contains("_cluster_.v"));
    }

    #[test]
    fn vector_parsing() {
        let doc = Document::from_value(json!({"_id": "x", "v": [1, 2.5], "s": "no"})).unwrap();
        assert_eq!(doc.vector("v").unwrap(), Some(vec![1.0, 2.5]));
        assert_eq!(doc.vector("missing").unwrap(), None);
        assert!(doc.vector("s").is_err());
    }

    #[test]
    fn invalid_flag_not_serialized() {
        let mut doc = Document::new("a");
        doc.mark_invalid("NaN in value");
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"_id": "a"}));
        assert!(doc.is_invalid());
    }

    #[test]
    fn projection_keeps_id_and_paths() {
        let doc =
            Document::from_value(json!({"_id": "a", "x": {"y": 1, "z": 2}, "w": 3})).unwrap();
        let p = doc.project(&["x.y".to_string()]);
        assert_eq!(serde_json::to_value(&p).unwrap(), json!({"_id": "a", "x": {"y": 1}}));
    }

    #[test]
    fn leaf_paths_flatten_objects() {
        let doc = Document::from_value(json!({"_id": "a", "x": {"y": [1, 2]}})).unwrap();
        let mut paths = doc.leaf_paths();
        paths.sort();
        assert_eq!(paths, vec!["_id".to_string(), "x.y".to_string()]);
    }

    #[test]
    fn nan_serializes_to_null() {
        assert_eq!(vector_value(&[1.0, f32::NAN]), json!([1.0, null]));
    }
}
