//! Key-path access into schema-less resource bodies.
//!
//! Machine resources differ between infrastructure providers, so their bodies are
//! read as plain JSON trees. Every accessor distinguishes "absent" (`Ok(None)`)
//! from "present with the wrong shape" (`Err`), and never panics.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field '{path}' is not {expected}: found {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

fn wrong_type(path: &[&str], expected: &'static str, found: &Value) -> FieldError {
    FieldError::WrongType {
        path: path.join("."),
        expected,
        found: kind_of(found),
    }
}

/// Walk `path` from `root`. Every intermediate segment must be a map; a missing key
/// or an explicit `null` anywhere along the path yields `Ok(None)`.
pub fn nested_field<'a>(root: &'a Value, path: &[&str]) -> Result<Option<&'a Value>, FieldError> {
    let mut current = root;
    for (depth, key) in path.iter().enumerate() {
        let map = match current {
            Value::Object(map) => map,
            Value::Null => return Ok(None),
            other => return Err(wrong_type(&path[..depth], "a map", other)),
        };
        match map.get(*key) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(match current {
        Value::Null => None,
        value => Some(value),
    })
}

pub fn nested_map<'a>(
    root: &'a Value,
    path: &[&str],
) -> Result<Option<&'a Map<String, Value>>, FieldError> {
    match nested_field(root, path)? {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(wrong_type(path, "a map", other)),
    }
}

pub fn nested_str<'a>(root: &'a Value, path: &[&str]) -> Result<Option<&'a str>, FieldError> {
    match nested_field(root, path)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(wrong_type(path, "a string", other)),
    }
}

pub fn nested_bool(root: &Value, path: &[&str]) -> Result<Option<bool>, FieldError> {
    match nested_field(root, path)? {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(wrong_type(path, "a boolean", other)),
    }
}

pub fn nested_slice<'a>(root: &'a Value, path: &[&str]) -> Result<Option<&'a [Value]>, FieldError> {
    match nested_field(root, path)? {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.as_slice())),
        Some(other) => Err(wrong_type(path, "a list", other)),
    }
}
