//! Permissive decoding of the engine's structured container listing.
//!
//! Field names and value types drift between engine versions (`Id` vs `ID`,
//! `Ports` as string or array, `Labels` as map or `k=v` string, ...), so every
//! field is read from a loosely typed JSON object, trying known keys in
//! priority order. Shape variance at field level never raises an error; only
//! structurally invalid top-level output does.
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::error::CommandError;
use crate::container::ContainerRecord;

type Object = Map<String, Value>;

const ID_KEYS: &[&str] = &["Id", "ID"];
const CREATED_KEYS: &[&str] = &["CreatedAt", "Created"];
const IMAGE_KEYS: &[&str] = &["Image", "ImageName"];
const STATUS_KEYS: &[&str] = &["Status", "State"];
const SIZE_KEYS: &[&str] = &["Size", "SizeRw", "SizeRootFs"];
/// Members of the object form of `Size` reported by some engines.
const SIZE_OBJECT_KEYS: &[&str] = &["rwSize", "rootFsSize"];

/// Parses the raw output of the listing command.
///
/// Accepts a single JSON array of objects or a sequence of newline-delimited
/// JSON objects. Empty output (or `null`) yields an empty list.
///
/// # Errors
///
/// Returns [`CommandError::Decode`] if the output is not valid JSON and
/// [`CommandError::UnexpectedShape`] if a top-level value is neither an array
/// nor an object.
pub fn parse_containers(output: &[u8]) -> Result<Vec<ContainerRecord>, CommandError> {
    let text = String::from_utf8_lossy(output);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut containers = Vec::new();
    for value in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
        match value.map_err(CommandError::Decode)? {
            Value::Null => {}
            Value::Array(items) => {
                containers.reserve(items.len());
                for item in items {
                    match item {
                        Value::Object(object) => containers.push(parse_container(&object)),
                        other => log::trace!("skipping non-object listing entry: {}", other),
                    }
                }
            }
            Value::Object(object) => containers.push(parse_container(&object)),
            other => return Err(CommandError::UnexpectedShape(truncate(&other.to_string()))),
        }
    }

    Ok(containers)
}

/// Builds a record from one listing entry. Missing fields are left empty.
pub fn parse_container(item: &Object) -> ContainerRecord {
    let name = get_string_list(item, "Names")
        .into_iter()
        .next()
        .unwrap_or_else(|| get_string(item, "Name"));

    ContainerRecord {
        id: first_string(item, ID_KEYS),
        name,
        image: first_string(item, IMAGE_KEYS),
        status: first_string(item, STATUS_KEYS),
        storage_size: get_storage_size(item),
        created_at: first_string(item, CREATED_KEYS),
        ports: get_ports(item),
        labels: get_labels(item),
        ..Default::default()
    }
}

/// Renders a scalar as display text: strings are trimmed, numbers and
/// booleans use their JSON form, anything else is empty.
pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn get_string(item: &Object, key: &str) -> String {
    item.get(key).map(scalar_to_string).unwrap_or_default()
}

/// Returns the first non-empty value among `keys`.
pub(crate) fn first_string(item: &Object, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| get_string(item, key))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Reads a field that may be a single string or an array of strings.
/// Blank entries and non-string array members are dropped.
fn get_string_list(item: &Object, key: &str) -> Vec<String> {
    match item.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_owned()],
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// Flattens `Ports` into one comma-joined display string.
fn get_ports(item: &Object) -> String {
    get_string_list(item, "Ports").join(", ")
}

fn get_storage_size(item: &Object) -> String {
    if let Some(Value::Object(size)) = item.get("Size") {
        let size = first_string(size, SIZE_OBJECT_KEYS);
        if !size.is_empty() {
            return size;
        }
    }

    first_string(item, SIZE_KEYS)
}

/// Coerces `Labels` into a string map. Non-string values are dropped and an
/// empty result is reported as `None`.
fn get_labels(item: &Object) -> Option<BTreeMap<String, String>> {
    let labels: BTreeMap<String, String> = match item.get("Labels")? {
        Value::Object(entries) => entries
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_owned())))
            .collect(),
        Value::String(joined) => joined
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .filter(|(key, _)| !key.trim().is_empty())
            .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
            .collect(),
        _ => return None,
    };

    if labels.is_empty() { None } else { Some(labels) }
}

fn truncate(raw: &str) -> String {
    const MAX: usize = 64;
    match raw.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &raw[..idx]),
        None => raw.to_owned(),
    }
}
