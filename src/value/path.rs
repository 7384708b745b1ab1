//! Nested field access over `serde_json::Value`
//!
//! Paths are dot separated keys with optional bracket indexes:
//! `order.items[0].sku` and `order.items.0.sku` address the same field.
//! Nothing is evaluated, a path is only ever traversed.

use crate::error::PathError;
use serde_json::{Map, Value};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn parse(text: &str) -> Self {
        if text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = text.parse::<usize>() {
                return PathSegment::Index(index);
            }
        }
        PathSegment::Key(text.to_string())
    }

    /// Key form used when the segment addresses an object.
    pub fn to_key(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => index.to_string(),
        }
    }
}

/// Split a path into segments. Empty segments are dropped, so `""` addresses the root.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        let key_end = part.find('[').unwrap_or(part.len());
        let key = part[..key_end].trim();
        if !key.is_empty() {
            segments.push(PathSegment::parse(key));
        }

        let mut rest = &part[key_end..];
        while let Some(open) = rest.strip_prefix('[') {
            let Some(close) = open.find(']') else {
                // Unterminated bracket: keep the remainder as a literal key
                segments.push(PathSegment::Key(rest.to_string()));
                rest = "";
                break;
            };
            let inner = open[..close].trim().trim_matches(|c| c == '"' || c == '\'');
            if !inner.is_empty() {
                segments.push(PathSegment::parse(inner));
            }
            rest = &open[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }

    segments
}

/// Follow already parsed segments from `root`.
pub fn get_segments<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match (current, segment) {
        (Value::Object(map), segment) => map.get(&segment.to_key()),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        _ => None,
    })
}

fn get_segments_mut<'a>(root: &'a mut Value, segments: &[PathSegment]) -> Option<&'a mut Value> {
    segments.iter().try_fold(root, |current, segment| match (current, segment) {
        (Value::Object(map), segment) => map.get_mut(&segment.to_key()),
        (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
        _ => None,
    })
}

/// Read the value at `path`, `None` when any segment is missing.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    get_segments(root, &parse_path(path))
}

pub fn get_path_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    get_segments_mut(root, &parse_path(path))
}

/// Highest array index a write may grow an array to.
pub const MAX_ARRAY_INDEX: usize = 10_000;

/// Reject writes that would grow an array past `MAX_ARRAY_INDEX`.
///
/// Mirrors the traversal `set_path` performs: existing objects take index
/// segments as keys, while missing or scalar slots become fresh arrays.
/// Runs before anything is written so a refused path leaves `root` untouched.
fn check_growth(root: &Value, path: &str, segments: &[PathSegment]) -> Result<(), PathError> {
    let mut current = Some(root);
    for segment in segments {
        if let PathSegment::Index(index) = segment {
            let grows = match current {
                Some(Value::Object(_)) => false,
                Some(Value::Array(items)) => *index >= items.len(),
                _ => true,
            };
            if grows && *index > MAX_ARRAY_INDEX {
                return Err(PathError::IndexTooLarge {
                    path: path.to_string(),
                    index: *index,
                    limit: MAX_ARRAY_INDEX,
                });
            }
        }
        current = current.and_then(|value| get_segments(value, std::slice::from_ref(segment)));
    }
    Ok(())
}

/// Child slot for `segment`, converting `current` into a container when it
/// cannot hold the segment (scalars, or arrays addressed by key).
fn slot<'a>(current: &'a mut Value, segment: &PathSegment) -> &'a mut Value {
    let fits = matches!(
        (&*current, segment),
        (Value::Object(_), _) | (Value::Array(_), PathSegment::Index(_))
    );
    if !fits {
        *current = match segment {
            PathSegment::Index(_) => Value::Array(Vec::new()),
            PathSegment::Key(_) => Value::Object(Map::new()),
        };
    }

    match (current, segment) {
        (Value::Array(items), PathSegment::Index(index)) => {
            if items.len() <= *index {
                items.resize(index.saturating_add(1), Value::Null);
            }
            &mut items[*index]
        }
        (Value::Object(map), segment) => map.entry(segment.to_key()).or_insert(Value::Null),
        (other, _) => other,
    }
}

/// Overwrite the value at `path`, creating intermediate containers.
///
/// Fails without writing anything when the path would grow an array past
/// `MAX_ARRAY_INDEX`.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let segments = parse_path(path);
    check_growth(root, path, &segments)?;

    let mut current = root;
    for segment in &segments {
        current = slot(current, segment);
    }
    *current = value;
    Ok(())
}

/// Remove and return the value at `path`.
pub fn delete_path(root: &mut Value, path: &str) -> Option<Value> {
    let segments = parse_path(path);
    let (last, parents) = segments.split_last()?;
    match (get_segments_mut(root, parents)?, last) {
        (Value::Object(map), segment) => map.remove(&segment.to_key()),
        (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
            Some(items.remove(*index))
        }
        _ => None,
    }
}

/// Recursively merge `source` into `target`; `source` wins on conflicts.
///
/// Only plain objects merge. Any other pairing replaces `target` wholesale.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Deep-merge `value` into the object at `path` when both sides are objects,
/// otherwise overwrite the path.
pub fn merge_at_path(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let mergeable = value.is_object() && get_path(root, path).is_some_and(Value::is_object);
    if mergeable {
        if let Some(existing) = get_path_mut(root, path) {
            deep_merge(existing, value);
            return Ok(());
        }
    }
    set_path(root, path, value)
}
