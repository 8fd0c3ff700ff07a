//! Structural shape language and the per-type dispatch catalog.
//!
//! The server-side protocol declares, for every remote type, which methods it
//! accepts and which events it emits. The client mirrors those declarations as
//! a [`Catalog`]: a closed table from type name to [`TypeSchema`], where each
//! method maps to its parameter and result [`Shape`]s. A name with no method
//! entry is not a call at all; plain data fields live in the initializer and
//! are modeled as ordinary struct members by the proxy types.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::validate::ValidationError;

/// Structural shape of a JSON payload.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Accepts any value unchanged.
    Any,
    String,
    Number,
    Boolean,
    /// Object with declared fields; undeclared keys are dropped during
    /// normalization.
    Object(Vec<Field>),
    /// Homogeneous array.
    Array(Box<Shape>),
}

/// A single declared object field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub shape: Shape,
    pub optional: bool,
}

impl Field {
    pub fn required(name: &str, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            shape,
            optional: false,
        }
    }

    pub fn optional(name: &str, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            shape,
            optional: true,
        }
    }
}

impl Shape {
    /// Empty object shape, for methods without parameters or results.
    pub fn empty_object() -> Self {
        Shape::Object(Vec::new())
    }

    /// Checks `value` against this shape and returns the normalized payload.
    ///
    /// Normalization keeps only declared object fields. `null` is accepted
    /// where an object is expected (treated as `{}`) so that parameterless
    /// calls need no explicit empty map.
    pub fn conform(&self, value: Value, path: &str) -> Result<Value, ValidationError> {
        match self {
            Shape::Any => Ok(value),
            Shape::String => match value {
                Value::String(_) => Ok(value),
                other => Err(mismatch(path, "string", &other)),
            },
            Shape::Number => match value {
                Value::Number(_) => Ok(value),
                other => Err(mismatch(path, "number", &other)),
            },
            Shape::Boolean => match value {
                Value::Bool(_) => Ok(value),
                other => Err(mismatch(path, "boolean", &other)),
            },
            Shape::Array(inner) => match value {
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        out.push(inner.conform(item, &format!("{path}[{i}]"))?);
                    }
                    Ok(Value::Array(out))
                }
                other => Err(mismatch(path, "array", &other)),
            },
            Shape::Object(fields) => {
                let mut map = match value {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => return Err(mismatch(path, "object", &other)),
                };

                let mut out = Map::new();
                for field in fields {
                    let field_path = join(path, &field.name);
                    match map.remove(&field.name) {
                        Some(Value::Null) | None if field.optional => {}
                        Some(Value::Null) | None => {
                            return Err(ValidationError {
                                path: field_path,
                                message: "missing required field".to_string(),
                            });
                        }
                        Some(v) => {
                            out.insert(field.name.clone(), field.shape.conform(v, &field_path)?);
                        }
                    }
                }
                Ok(Value::Object(out))
            }
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> ValidationError {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ValidationError {
        path: path.to_string(),
        message: format!("expected {expected}, got {got}"),
    }
}

/// Declared parameter and result shapes for one remote method.
#[derive(Debug, Clone)]
pub struct MethodSchema {
    pub params: Shape,
    pub result: Shape,
}

/// Everything the protocol declares about one remote type.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    initializer: Shape,
    methods: HashMap<String, MethodSchema>,
    events: HashMap<String, Shape>,
}

impl TypeSchema {
    pub fn new(initializer: Shape) -> Self {
        Self {
            initializer,
            methods: HashMap::new(),
            events: HashMap::new(),
        }
    }

    /// Declares a method with its parameter and result shapes.
    pub fn method(mut self, name: &str, params: Shape, result: Shape) -> Self {
        self.methods
            .insert(name.to_string(), MethodSchema { params, result });
        self
    }

    /// Declares an event with its payload shape.
    pub fn event(mut self, name: &str, params: Shape) -> Self {
        self.events.insert(name.to_string(), params);
        self
    }

    pub fn initializer(&self) -> &Shape {
        &self.initializer
    }

    pub fn method_schema(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.get(name)
    }

    pub fn event_schema(&self, name: &str) -> Option<&Shape> {
        self.events.get(name)
    }
}

/// Closed table from type name to [`TypeSchema`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: HashMap<String, TypeSchema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the schema for one remote type, replacing any previous entry.
    pub fn register_type(&mut self, name: &str, schema: TypeSchema) {
        self.types.insert(name.to_string(), schema);
    }

    pub fn type_schema(&self, name: &str) -> Option<&TypeSchema> {
        self.types.get(name)
    }

    pub fn method_schema(&self, type_name: &str, method: &str) -> Option<&MethodSchema> {
        self.types.get(type_name)?.method_schema(method)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn string_shape_rejects_number() {
        let err = Shape::String.conform(json!(42), "name").unwrap_err();
        assert_eq!(err.path, "name");
        assert!(err.message.contains("expected string"));
    }

    #[test]
    fn object_shape_drops_undeclared_keys() {
        let shape = Shape::Object(vec![Field::required("url", Shape::String)]);
        let normalized = shape
            .conform(json!({"url": "wss://x", "extra": 1}), "")
            .unwrap();
        assert_eq!(normalized, json!({"url": "wss://x"}));
    }

    #[test]
    fn object_shape_reports_missing_required_field() {
        let shape = Shape::Object(vec![Field::required("url", Shape::String)]);
        let err = shape.conform(json!({}), "params").unwrap_err();
        assert_eq!(err.path, "params.url");
        assert!(err.message.contains("missing required"));
    }

    #[test]
    fn null_accepted_where_object_expected() {
        let shape = Shape::Object(vec![Field::optional("depth", Shape::Number)]);
        let normalized = shape.conform(Value::Null, "").unwrap();
        assert_eq!(normalized, json!({}));
    }

    #[test]
    fn optional_field_accepts_explicit_null() {
        let shape = Shape::Object(vec![Field::optional("depth", Shape::Number)]);
        let normalized = shape.conform(json!({"depth": null}), "").unwrap();
        assert_eq!(normalized, json!({}));
    }

    #[test]
    fn array_shape_reports_element_path() {
        let shape = Shape::Array(Box::new(Shape::Number));
        let err = shape.conform(json!([1, "x", 3]), "ids").unwrap_err();
        assert_eq!(err.path, "ids[1]");
    }

    #[test]
    fn catalog_lookup_distinguishes_methods_from_fields() {
        let mut catalog = Catalog::new();
        catalog.register_type(
            "Session",
            TypeSchema::new(Shape::Object(vec![Field::required("label", Shape::String)]))
                .method("stop", Shape::empty_object(), Shape::empty_object()),
        );

        assert!(catalog.method_schema("Session", "stop").is_some());
        // "label" is initializer data, not a callable method.
        assert!(catalog.method_schema("Session", "label").is_none());
    }
}
