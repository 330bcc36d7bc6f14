//! Typed control values and coercion of client-supplied JSON into them

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Declared value type of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Int,
    Float,
    Bool,
    Tuple,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlKind::Int => "int",
            ControlKind::Float => "float",
            ControlKind::Bool => "bool",
            ControlKind::Tuple => "tuple",
        };
        f.write_str(name)
    }
}

/// Current value of a control; always matches its spec's kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Tuple(Vec<i64>),
}

impl ControlValue {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlValue::Int(_) => ControlKind::Int,
            ControlValue::Float(_) => ControlKind::Float,
            ControlValue::Bool(_) => ControlKind::Bool,
            ControlValue::Tuple(_) => ControlKind::Tuple,
        }
    }

    /// Scalar view; booleans read as 0/1, tuples have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::Int(v) => Some(*v as f64),
            ControlValue::Float(v) => Some(*v),
            ControlValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            ControlValue::Tuple(_) => None,
        }
    }

    /// Build a scalar value of `kind` from a number, flooring for integers.
    pub fn from_f64(kind: ControlKind, v: f64) -> Result<Self, CoercionError> {
        if !v.is_finite() {
            return Err(CoercionError::NotFinite);
        }
        match kind {
            ControlKind::Int => Ok(ControlValue::Int(v.floor() as i64)),
            ControlKind::Float => Ok(ControlValue::Float(v)),
            ControlKind::Bool => Ok(ControlValue::Bool(v != 0.0)),
            ControlKind::Tuple => Err(CoercionError::Mismatch {
                expected: kind,
                got: v.to_string(),
            }),
        }
    }

    /// Clamp numeric values into `[min, max]`; other kinds are returned as is.
    pub fn clamp(self, min: Option<f64>, max: Option<f64>) -> Self {
        let lo = min.unwrap_or(f64::NEG_INFINITY);
        let hi = max.unwrap_or(f64::INFINITY);
        match self {
            ControlValue::Int(v) => {
                let mut v = v;
                if (v as f64) < lo {
                    v = lo.ceil() as i64;
                }
                if (v as f64) > hi {
                    v = hi.floor() as i64;
                }
                ControlValue::Int(v)
            }
            ControlValue::Float(v) => ControlValue::Float(v.max(lo).min(hi)),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("expected {expected}, got {got}")]
    Mismatch { expected: ControlKind, got: String },

    #[error("value is not a finite number")]
    NotFinite,

    #[error("no maximum known for this control")]
    NoMaximum,
}

/// Convert a JSON value into `kind`, accepting the loose forms browsers send
/// (numeric strings, 0/1 for booleans, "on"/"off").
pub fn coerce(kind: ControlKind, raw: &Value) -> Result<ControlValue, CoercionError> {
    let mismatch = || CoercionError::Mismatch {
        expected: kind,
        got: raw.to_string(),
    };

    match kind {
        ControlKind::Int | ControlKind::Float => {
            let v = match raw {
                Value::Number(n) => n.as_f64().ok_or_else(mismatch)?,
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            if !v.is_finite() {
                return Err(CoercionError::NotFinite);
            }
            Ok(match kind {
                ControlKind::Int => ControlValue::Int(v.trunc() as i64),
                _ => ControlValue::Float(v),
            })
        }
        ControlKind::Bool => match raw {
            Value::Bool(b) => Ok(ControlValue::Bool(*b)),
            Value::Number(n) => Ok(ControlValue::Bool(n.as_f64().ok_or_else(mismatch)? != 0.0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => Ok(ControlValue::Bool(true)),
                "false" | "0" | "off" | "no" => Ok(ControlValue::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ControlKind::Tuple => match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| match coerce(ControlKind::Int, item)? {
                    ControlValue::Int(v) => Ok(v),
                    _ => Err(mismatch()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ControlValue::Tuple),
            _ => Err(mismatch()),
        },
    }
}

/// A value as requested by a client or a mode definition
#[derive(Debug, Clone, PartialEq)]
pub enum RequestedValue {
    /// Drive the control to the hardware maximum
    Maximum,
    Literal(Value),
}

/// Wire spelling of [`RequestedValue::Maximum`].
pub const MAXIMUM_SENTINEL: &str = "max";

impl From<Value> for RequestedValue {
    fn from(value: Value) -> Self {
        match &value {
            Value::String(s) if s.trim().eq_ignore_ascii_case(MAXIMUM_SENTINEL) => {
                RequestedValue::Maximum
            }
            _ => RequestedValue::Literal(value),
        }
    }
}

impl Serialize for RequestedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestedValue::Maximum => serializer.serialize_str(MAXIMUM_SENTINEL),
            RequestedValue::Literal(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RequestedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(RequestedValue::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_accepts_numbers_strings_and_bools() {
        assert_eq!(coerce(ControlKind::Int, &json!(8)), Ok(ControlValue::Int(8)));
        assert_eq!(coerce(ControlKind::Int, &json!(8.9)), Ok(ControlValue::Int(8)));
        assert_eq!(coerce(ControlKind::Int, &json!(" 12 ")), Ok(ControlValue::Int(12)));
        assert_eq!(coerce(ControlKind::Int, &json!(true)), Ok(ControlValue::Int(1)));
        assert!(coerce(ControlKind::Int, &json!("bright")).is_err());
        assert!(coerce(ControlKind::Int, &json!(null)).is_err());
    }

    #[test]
    fn float_and_bool_coercion() {
        assert_eq!(coerce(ControlKind::Float, &json!("0.5")), Ok(ControlValue::Float(0.5)));
        assert_eq!(coerce(ControlKind::Bool, &json!(0)), Ok(ControlValue::Bool(false)));
        assert_eq!(coerce(ControlKind::Bool, &json!("on")), Ok(ControlValue::Bool(true)));
        assert!(coerce(ControlKind::Bool, &json!([1])).is_err());
    }

    #[test]
    fn tuple_needs_an_array_of_numbers() {
        assert_eq!(
            coerce(ControlKind::Tuple, &json!([33333, 33333])),
            Ok(ControlValue::Tuple(vec![33333, 33333]))
        );
        assert!(coerce(ControlKind::Tuple, &json!(5)).is_err());
        assert!(coerce(ControlKind::Tuple, &json!([1, "x"])).is_err());
    }

    #[test]
    fn clamp_respects_bounds() {
        assert_eq!(
            ControlValue::Int(250_000).clamp(Some(0.0), Some(200_000.0)),
            ControlValue::Int(200_000)
        );
        assert_eq!(
            ControlValue::Float(-3.0).clamp(Some(-1.0), Some(1.0)),
            ControlValue::Float(-1.0)
        );
        assert_eq!(
            ControlValue::Bool(true).clamp(Some(0.0), Some(0.0)),
            ControlValue::Bool(true)
        );
        assert_eq!(ControlValue::Int(5).clamp(None, None), ControlValue::Int(5));
    }

    #[test]
    fn from_f64_floors_integers() {
        assert_eq!(ControlValue::from_f64(ControlKind::Int, 15.99), Ok(ControlValue::Int(15)));
        assert_eq!(
            ControlValue::from_f64(ControlKind::Float, f64::NAN),
            Err(CoercionError::NotFinite)
        );
    }

    #[test]
    fn sentinel_is_case_insensitive() {
        assert_eq!(RequestedValue::from(json!("MAX")), RequestedValue::Maximum);
        assert_eq!(RequestedValue::from(json!(3)), RequestedValue::Literal(json!(3)));
        let parsed: RequestedValue = serde_json::from_str("\"max\"").unwrap();
        assert_eq!(parsed, RequestedValue::Maximum);
        assert_eq!(serde_json::to_value(RequestedValue::Maximum).unwrap(), json!("max"));
    }
}
