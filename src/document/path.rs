//! Dot-path navigation over JSON object maps.

use serde_json::{Map, Value};

/// Split a dot-path into segments. Empty segments are dropped.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// Look up a dot-path.
pub fn get_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = split_path(path);
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a value at a dot-path, creating (or replacing non-object) parents.
pub fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = split_path(path).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = map;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(inner) = slot else {
            return;
        };
        current = inner;
    }
    current.insert(last.to_string(), value);
}

/// Remove the value at a dot-path. Parents are left in place.
pub fn remove_path(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    let segments: Vec<&str> = split_path(path).collect();
    let (last, parents) = segments.split_last()?;

    let mut current = map;
    for segment in parents {
        current = current.get_mut(*segment)?.as_object_mut()?;
    }
    current.remove(*last)
}
