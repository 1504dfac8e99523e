//! ABOUTME: Tagged value type used throughout the expression evaluator and state tiers
//! ABOUTME: Preserves the integer/float distinction that serde_json::Number already carries

use serde_json::{Map, Number, Value as Json};
use std::fmt;

/// A dynamically typed value, mirroring the tagged union described in the
/// engine design notes (`int | float | bool | string | null | list | map`).
///
/// `Undefined` has no JSON counterpart: it only ever appears transiently
/// inside the evaluator, standing in for a path reference that didn't
/// resolve to anything. It is never written into a [`StateSnapshot`]
/// (see `state.rs`) — by the time a value is stored it has either been
/// computed into a concrete `Value` or the write never happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    List(Vec<Value>),
    Map(Map<String, Json>),
    /// An unresolved reference. Coerces to a kind-appropriate default when
    /// consumed by an operator or stringified, per the evaluator's contract
    /// for undefined template references.
    Undefined,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Null | Value::Undefined => false,
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Undefined => Some(0.0),
            _ => None,
        }
    }

    /// Length, for `.length` member access on strings/arrays/maps. Always integer.
    pub fn length(&self) -> Option<i64> {
        match self {
            Value::Str(s) => Some(s.chars().count() as i64),
            Value::List(l) => Some(l.len() as i64),
            Value::Map(m) => Some(m.len() as i64),
            Value::Undefined => Some(0),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Value {
        if name == "length" {
            return match self.length() {
                Some(n) => Value::Int(n),
                None => Value::Undefined,
            };
        }
        match self {
            Value::Map(m) => m.get(name).map(Value::from_json).unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }

    pub fn index(&self, idx: &Value) -> Value {
        match (self, idx) {
            (Value::List(l), Value::Int(i)) => {
                let i = *i;
                if i < 0 {
                    return Value::Undefined;
                }
                l.get(i as usize).cloned().unwrap_or(Value::Undefined)
            }
            (Value::Map(m), Value::Str(k)) => {
                m.get(k).map(Value::from_json).unwrap_or(Value::Undefined)
            }
            (Value::Str(s), Value::Int(i)) => {
                let i = *i;
                if i < 0 {
                    return Value::Undefined;
                }
                s.chars()
                    .nth(i as usize)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or(Value::Undefined)
            }
            _ => Value::Undefined,
        }
    }

    pub fn from_json(v: &Json) -> Value {
        match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            Json::Object(m) => Value::Map(m.clone()),
        }
    }

    /// Convert into a storable JSON value. `Undefined` becomes `Null` — it
    /// must never reach a state tier, but converting defensively beats
    /// panicking if it ever does.
    pub fn into_json(self) -> Json {
        match self {
            Value::Int(i) => Json::Number(i.into()),
            Value::Float(f) => Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(b),
            Value::Str(s) => Json::String(s),
            Value::Null | Value::Undefined => Json::Null,
            Value::List(l) => Json::Array(l.into_iter().map(Value::into_json).collect()),
            Value::Map(m) => Json::Object(m),
        }
    }
}

impl fmt::Display for Value {
    /// Template-interpolation stringification: undefined references render
    /// as the empty string (the generic "kind-appropriate default" case
    /// where no operator gives us a type hint — see `expr.rs`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Null => write!(f, ""),
            Value::Undefined => write!(f, ""),
            Value::List(l) => {
                let items: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", items.join(","))
            }
            Value::Map(_) => write!(f, "{}", Json::Object(self.clone().as_map_or_empty())),
        }
    }
}

impl Value {
    fn as_map_or_empty(self) -> Map<String, Json> {
        match self {
            Value::Map(m) => m,
            _ => Map::new(),
        }
    }
}
