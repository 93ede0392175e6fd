//! Structural decoding of loosely-typed maps into typed configuration values.
//!
//! Each decodable type declares an explicit allow-list of fields through
//! [`Decode::decode_field`]. Decoding walks the input map once:
//!
//! - a known field is coerced to its declared type (rules below);
//! - a known field that is absent or `null` keeps the type's default;
//! - an unknown field is ignored;
//! - a known field whose value cannot be coerced fails with [`DecodeError`].
//!
//! Coercion rules (see [`coerce`]):
//!
//! | declared type | accepted input                                      |
//! |---------------|-----------------------------------------------------|
//! | string        | string; integer or float (rendered in decimal)      |
//! | boolean       | boolean; the strings `"true"` / `"false"`            |
//! | port          | integer or decimal string in `0..=65535`            |
//! | string map    | map whose values are strings, numbers, or booleans  |
//! | map           | map (taken verbatim)                                |
//! | nested type   | map, decoded recursively                            |

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use crate::types::{Value, ValueMap};

/// Failure to coerce a known field, or a non-map input where a map is needed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("`{target}` must be decoded from a map, found {found}")]
    NotAMap {
        target: &'static str,
        found: &'static str,
    },
    #[error("`{target}.{field}`: expected {expected}, found {found}")]
    Field {
        target: &'static str,
        /// Dotted path of the offending field within `target`.
        field: String,
        expected: &'static str,
        found: String,
    },
}

impl DecodeError {
    fn field(target: &'static str, field: &str, expected: &'static str, found: &Value) -> Self {
        DecodeError::Field {
            target,
            field: field.to_string(),
            expected,
            found: found.kind().to_string(),
        }
    }
}

/// A typed value that can be decoded field-by-field from a [`ValueMap`].
pub trait Decode: Default {
    /// Name used in error messages (e.g., `"ConnectionConfig"`).
    const TARGET: &'static str;

    /// Assigns one field from the input map.
    ///
    /// Returns `Ok(true)` when `field` is part of this type's allow-list and
    /// `Ok(false)` when it is unknown and should be ignored.
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` when `field` is known but `value` cannot be
    /// coerced to its declared type.
    fn decode_field(&mut self, field: &str, value: &Value) -> Result<bool, DecodeError>;
}

/// Decodes a `T` from a key/value map.
///
/// # Errors
///
/// Returns the first field coercion failure encountered.
pub fn decode<T: Decode>(map: &ValueMap) -> Result<T, DecodeError> {
    let mut target = T::default();
    for (field, value) in map {
        if !target.decode_field(field, value)? {
            trace!(target_type = T::TARGET, field = %field, "ignoring unknown field");
        }
    }
    Ok(target)
}

/// Decodes a `T` from an arbitrary value. `null` yields `T::default()`.
///
/// # Errors
///
/// Returns `DecodeError::NotAMap` for non-map, non-null input, or any field
/// coercion failure.
pub fn decode_value<T: Decode>(value: &Value) -> Result<T, DecodeError> {
    match value {
        Value::Null => Ok(T::default()),
        Value::Map(map) => decode(map),
        other => Err(DecodeError::NotAMap {
            target: T::TARGET,
            found: other.kind(),
        }),
    }
}

/// Encodes the known fields of a configuration value back into a map.
///
/// Fields left at `None` are omitted, so encode -> decode -> encode is the
/// identity for every value produced by [`decode`].
#[must_use]
pub fn encode<T: Serialize>(value: &T) -> ValueMap {
    match Value::from_serialize(value) {
        Ok(Value::Map(map)) => map,
        _ => ValueMap::new(),
    }
}

/// Coercion helpers used by `Decode` implementations.
///
/// Every helper maps `null` to `Ok(None)` so the caller keeps its default.
pub mod coerce {
    use super::{decode, BTreeMap, Decode, DecodeError, Value, ValueMap};

    /// # Errors
    ///
    /// Fails for booleans, arrays, and maps.
    pub fn string(
        target: &'static str,
        field: &str,
        value: &Value,
    ) -> Result<Option<String>, DecodeError> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Int(i) => Ok(Some(i.to_string())),
            Value::Float(f) => Ok(Some(f.to_string())),
            other => Err(DecodeError::field(target, field, "string", other)),
        }
    }

    /// # Errors
    ///
    /// Fails for anything other than a boolean or `"true"`/`"false"`.
    pub fn boolean(
        target: &'static str,
        field: &str,
        value: &Value,
    ) -> Result<Option<bool>, DecodeError> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::String(s) if s == "true" => Ok(Some(true)),
            Value::String(s) if s == "false" => Ok(Some(false)),
            other => Err(DecodeError::field(target, field, "boolean", other)),
        }
    }

    /// # Errors
    ///
    /// Fails for values outside `0..=65535` or non-numeric strings.
    pub fn port(
        target: &'static str,
        field: &str,
        value: &Value,
    ) -> Result<Option<u16>, DecodeError> {
        let parsed = match value {
            Value::Null => return Ok(None),
            Value::Int(i) => u16::try_from(*i).ok(),
            Value::String(s) => s.trim().parse::<u16>().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| DecodeError::field(target, field, "port number (0-65535)", value))
    }

    /// # Errors
    ///
    /// Fails when `value` is not a map or an entry is not string-coercible.
    pub fn string_map(
        target: &'static str,
        field: &str,
        value: &Value,
    ) -> Result<Option<BTreeMap<String, String>>, DecodeError> {
        let map = match value {
            Value::Null => return Ok(None),
            Value::Map(map) => map,
            other => return Err(DecodeError::field(target, field, "map of strings", other)),
        };
        let mut out = BTreeMap::new();
        for (key, entry) in map {
            let coerced = match entry {
                Value::Bool(b) => Some(b.to_string()),
                other => string(target, &format!("{field}.{key}"), other)?,
            };
            if let Some(s) = coerced {
                out.insert(key.clone(), s);
            }
        }
        Ok(Some(out))
    }

    /// # Errors
    ///
    /// Fails when `value` is not a map.
    pub fn map(
        target: &'static str,
        field: &str,
        value: &Value,
    ) -> Result<Option<ValueMap>, DecodeError> {
        match value {
            Value::Null => Ok(None),
            Value::Map(map) => Ok(Some(map.clone())),
            other => Err(DecodeError::field(target, field, "map", other)),
        }
    }

    /// Decodes a nested type, prefixing inner error paths with `field`.
    ///
    /// # Errors
    ///
    /// Fails when `value` is not a map, or with the nested field's error.
    pub fn nested<T: Decode>(
        target: &'static str,
        field: &str,
        value: &Value,
    ) -> Result<Option<T>, DecodeError> {
        let map = match value {
            Value::Null => return Ok(None),
            Value::Map(map) => map,
            other => return Err(DecodeError::field(target, field, "map", other)),
        };
        decode::<T>(map).map(Some).map_err(|err| match err {
            DecodeError::Field {
                field: inner,
                expected,
                found,
                ..
            } => DecodeError::Field {
                target,
                field: format!("{field}.{inner}"),
                expected,
                found,
            },
            not_a_map @ DecodeError::NotAMap { .. } => not_a_map,
        })
    }
}
