//! Extraction of declared operation arguments from the raw argument map.
//!
//! Only arguments named in the descriptor's allow-list are looked at; any
//! other key in the raw map is ignored. `null` counts as absent.

use std::collections::HashMap;

use dsgate_core::{decode_value, ConnectionConfig, NavigatorSettings, Value, ValueMap};

use super::operation::{ArgSpec, ArgType, ArgumentError, OperationError};

/// One extracted argument, already coerced to its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Scalar(Value),
    Connection(Box<ConnectionConfig>),
    Navigator(NavigatorSettings),
}

/// Typed view over the declared arguments of one call.
#[derive(Debug, Clone, Default)]
pub struct Args {
    declared: &'static [ArgSpec],
    values: HashMap<&'static str, ArgValue>,
}

impl Args {
    /// Extracts every declared argument from `raw`.
    ///
    /// # Errors
    ///
    /// `ArgumentError::Missing` for an absent required argument,
    /// `ArgumentError::Type` for a scalar of the wrong kind, and
    /// `OperationError::Decode` when a structured argument fails to decode.
    pub fn extract(specs: &'static [ArgSpec], raw: &ValueMap) -> Result<Self, OperationError> {
        let mut values = HashMap::with_capacity(specs.len());
        for spec in specs {
            let value = match raw.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ArgumentError::Missing { name: spec.name }.into());
                    }
                    continue;
                }
                Some(value) => value,
            };
            values.insert(spec.name, coerce(spec, value)?);
        }
        Ok(Self {
            declared: specs,
            values,
        })
    }

    fn lookup(&self, name: &'static str) -> Result<Option<&ArgValue>, ArgumentError> {
        if !self.declared.iter().any(|s| s.name == name) {
            return Err(ArgumentError::Undeclared { name });
        }
        Ok(self.values.get(name))
    }

    fn scalar(&self, name: &'static str) -> Result<Option<&Value>, ArgumentError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(ArgValue::Scalar(v)) => Ok(Some(v)),
            Some(other) => Err(ArgumentError::Type {
                name,
                expected: "scalar",
                found: other.kind(),
            }),
        }
    }

    /// # Errors
    ///
    /// `Missing` when absent, `Undeclared` when not in the allow-list.
    pub fn str(&self, name: &'static str) -> Result<&str, ArgumentError> {
        self.opt_str(name)?.ok_or(ArgumentError::Missing { name })
    }

    /// # Errors
    ///
    /// `Undeclared` when not in the allow-list, `Type` for a non-string.
    pub fn opt_str(&self, name: &'static str) -> Result<Option<&str>, ArgumentError> {
        self.scalar(name)?
            .map(|v| {
                v.as_str().ok_or(ArgumentError::Type {
                    name,
                    expected: ArgType::String.as_str(),
                    found: v.kind(),
                })
            })
            .transpose()
    }

    /// # Errors
    ///
    /// `Undeclared` when not in the allow-list, `Type` for a non-boolean.
    pub fn opt_bool(&self, name: &'static str) -> Result<Option<bool>, ArgumentError> {
        self.scalar(name)?
            .map(|v| {
                v.as_bool().ok_or(ArgumentError::Type {
                    name,
                    expected: ArgType::Bool.as_str(),
                    found: v.kind(),
                })
            })
            .transpose()
    }

    /// # Errors
    ///
    /// `Undeclared` when not in the allow-list, `Type` for a non-integer.
    pub fn opt_i64(&self, name: &'static str) -> Result<Option<i64>, ArgumentError> {
        self.scalar(name)?
            .map(|v| {
                v.as_i64().ok_or(ArgumentError::Type {
                    name,
                    expected: ArgType::Int.as_str(),
                    found: v.kind(),
                })
            })
            .transpose()
    }

    /// # Errors
    ///
    /// `Undeclared` when not in the allow-list, `Type` for a non-map.
    pub fn opt_map(&self, name: &'static str) -> Result<Option<&ValueMap>, ArgumentError> {
        self.scalar(name)?
            .map(|v| {
                v.as_map().ok_or(ArgumentError::Type {
                    name,
                    expected: ArgType::Map.as_str(),
                    found: v.kind(),
                })
            })
            .transpose()
    }

    /// # Errors
    ///
    /// `Missing` when absent, `Undeclared` when not in the allow-list.
    pub fn connection_config(&self, name: &'static str) -> Result<&ConnectionConfig, ArgumentError> {
        match self.lookup(name)? {
            Some(ArgValue::Connection(config)) => Ok(&**config),
            Some(other) => Err(ArgumentError::Type {
                name,
                expected: ArgType::ConnectionConfig.as_str(),
                found: other.kind(),
            }),
            None => Err(ArgumentError::Missing { name }),
        }
    }

    /// # Errors
    ///
    /// `Missing` when absent, `Undeclared` when not in the allow-list.
    pub fn navigator_settings(
        &self,
        name: &'static str,
    ) -> Result<NavigatorSettings, ArgumentError> {
        match self.lookup(name)? {
            Some(ArgValue::Navigator(settings)) => Ok(*settings),
            Some(other) => Err(ArgumentError::Type {
                name,
                expected: ArgType::NavigatorSettings.as_str(),
                found: other.kind(),
            }),
            None => Err(ArgumentError::Missing { name }),
        }
    }
}

impl ArgValue {
    fn kind(&self) -> &'static str {
        match self {
            ArgValue::Scalar(v) => v.kind(),
            ArgValue::Connection(_) => ArgType::ConnectionConfig.as_str(),
            ArgValue::Navigator(_) => ArgType::NavigatorSettings.as_str(),
        }
    }
}

/// Checks `value` against the declared type, normalizing where the decoder
/// rules allow it (numbers as strings, `"true"`/`"false"` as booleans).
fn coerce(spec: &ArgSpec, value: &Value) -> Result<ArgValue, OperationError> {
    let mismatch = || ArgumentError::Type {
        name: spec.name,
        expected: spec.ty.as_str(),
        found: value.kind(),
    };
    let coerced = match (spec.ty, value) {
        (ArgType::String, Value::String(_))
        | (ArgType::Int, Value::Int(_))
        | (ArgType::Bool, Value::Bool(_))
        | (ArgType::Map, Value::Map(_)) => ArgValue::Scalar(value.clone()),
        (ArgType::String, Value::Int(i)) => ArgValue::Scalar(Value::String(i.to_string())),
        (ArgType::Bool, Value::String(s)) => match s.as_str() {
            "true" => ArgValue::Scalar(Value::Bool(true)),
            "false" => ArgValue::Scalar(Value::Bool(false)),
            _ => return Err(mismatch().into()),
        },
        (ArgType::ConnectionConfig, _) => ArgValue::Connection(Box::new(
            decode_value(value).map_err(|source| OperationError::Decode {
                argument: spec.name,
                source,
            })?,
        )),
        (ArgType::NavigatorSettings, _) => {
            ArgValue::Navigator(decode_value(value).map_err(|source| OperationError::Decode {
                argument: spec.name,
                source,
            })?)
        }
        _ => return Err(mismatch().into()),
    };
    Ok(coerced)
}
