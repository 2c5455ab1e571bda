//! Structural validation of JSON values against an expected shape.
//!
//! A [`Shape`] is a primitive type name, a nested object shape, or an array
//! shape with one element shape. Errors accumulate: one call reports every
//! mismatch found, each at a dotted/bracketed path (`b.c`, `items[0].id`).
//!
//! Array shapes check only the first element by default
//! ([`ArraySampling::First`]); [`ArraySampling::All`] checks every element.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

pub use crate::config::ArraySampling;
use crate::{Error, Result};

/// One structural mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: &str, message: String) -> Self {
        Self {
            path: path.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Expected structure of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    String,
    Number,
    Boolean,
    /// A string or a number, the two forms ids come in
    Identifier,
    /// Any array, elements unchecked
    Array,
    /// Any object, fields unchecked
    Object,
    /// Object whose listed fields must be present with the given shapes
    Fields(BTreeMap<String, Shape>),
    /// Array whose elements must match the element shape
    ArrayOf(Box<Shape>),
}

impl Shape {
    /// Object shape from `(field, shape)` pairs.
    pub fn fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<String>,
    {
        Self::Fields(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn array_of(element: Self) -> Self {
        Self::ArrayOf(Box::new(element))
    }

    /// Primitive shape of a value's JSON type; `None` for `null`.
    pub const fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
        }
    }

    /// Parse the JSON notation: `"string"`, `{"a": ...}`, `[elementShape]`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` for unknown type names, arrays that do not
    /// contain exactly one element shape, and other JSON values.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => match name.as_str() {
                "string" => Ok(Self::String),
                "number" => Ok(Self::Number),
                "boolean" => Ok(Self::Boolean),
                "identifier" => Ok(Self::Identifier),
                "array" => Ok(Self::Array),
                "object" => Ok(Self::Object),
                other => Err(Error::Parse(format!("unknown shape type '{other}'"))),
            },
            Value::Object(map) => map
                .iter()
                .map(|(key, inner)| Ok((key.clone(), Self::from_json(inner)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Self::Fields),
            Value::Array(items) => match items.as_slice() {
                [element] => Ok(Self::array_of(Self::from_json(element)?)),
                _ => Err(Error::Parse(format!(
                    "array shape must hold exactly one element shape, got {}",
                    items.len()
                ))),
            },
            other => Err(Error::Parse(format!("invalid shape: {other}"))),
        }
    }

    /// Type name this shape expects at its own level.
    const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Identifier => "string or number",
            Self::Array | Self::ArrayOf(_) => "array",
            Self::Object | Self::Fields(_) => "object",
        }
    }

    fn accepts(&self, actual: &str) -> bool {
        match self {
            Self::Identifier => matches!(actual, "string" | "number"),
            _ => actual == self.type_name(),
        }
    }
}

/// `typeof`-style name with arrays distinguished from objects.
pub const fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate with the default sampling policy (first array element only).
pub fn validate(value: &Value, shape: &Shape) -> Vec<ValidationError> {
    Validator::default().validate(value, shape)
}

/// Structural validator with a configurable array sampling policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    sampling: ArraySampling,
}

impl Validator {
    #[must_use]
    pub const fn new(sampling: ArraySampling) -> Self {
        Self { sampling }
    }

    pub fn validate(&self, value: &Value, shape: &Shape) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        self.validate_at(value, shape, "", &mut errors);
        errors
    }

    fn validate_at(
        &self,
        value: &Value,
        shape: &Shape,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let actual = type_of(value);
        if !shape.accepts(actual) {
            errors.push(ValidationError::new(
                path,
                format!(
                    "Type mismatch: expected {}, got {actual}",
                    shape.type_name()
                ),
            ));
            return;
        }
        match (shape, value) {
            (Shape::Fields(fields), Value::Object(object)) => {
                for (key, field_shape) in fields {
                    let field_path = join_key(path, key);
                    match object.get(key) {
                        None => errors.push(ValidationError::new(
                            &field_path,
                            format!("Missing property: {field_path}"),
                        )),
                        Some(field_value) => {
                            self.validate_at(field_value, field_shape, &field_path, errors);
                        }
                    }
                }
            }
            (Shape::ArrayOf(element), Value::Array(items)) => {
                let sampled = match self.sampling {
                    ArraySampling::First => items.len().min(1),
                    ArraySampling::All => items.len(),
                };
                for (index, item) in items.iter().take(sampled).enumerate() {
                    self.validate_at(item, element, &format!("{path}[{index}]"), errors);
                }
            }
            _ => {}
        }
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
