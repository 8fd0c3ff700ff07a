//! The validator seam between the runtime and the schema catalog.

use serde_json::Value;
use thiserror::Error;

use crate::schema::Catalog;

/// Which payload of a message is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Outbound call parameters, validated before sending.
    Params,
    /// Inbound call result, validated before resolving the caller.
    Result,
    /// Inbound domain event payload.
    Event,
    /// Initializer carried by a `__create__` message.
    Initializer,
}

/// A local schema mismatch. Never transmitted; always a logic error on
/// whichever side produced the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed at '{path}': {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

/// Normalizes and validates payloads against declared schemas.
///
/// The runtime only ever talks to this trait; the table-driven [`Catalog`]
/// implementation below is the stock one, but tests may substitute their own.
pub trait Validator: Send + Sync {
    /// Validates `value` for `(type_name, method, kind)` and returns the
    /// normalized payload, or an error describing the first mismatch.
    fn validate(
        &self,
        type_name: &str,
        method: &str,
        kind: PayloadKind,
        value: Value,
    ) -> Result<Value, ValidationError>;
}

impl Validator for Catalog {
    fn validate(
        &self,
        type_name: &str,
        method: &str,
        kind: PayloadKind,
        value: Value,
    ) -> Result<Value, ValidationError> {
        let ty = self.type_schema(type_name).ok_or_else(|| ValidationError {
            path: type_name.to_string(),
            message: "unknown type in catalog".to_string(),
        })?;

        match kind {
            PayloadKind::Initializer => ty
                .initializer()
                .conform(value, &format!("{type_name}.initializer")),
            PayloadKind::Params => {
                let schema = ty.method_schema(method).ok_or_else(|| ValidationError {
                    path: format!("{type_name}.{method}"),
                    message: "no such method declared".to_string(),
                })?;
                schema
                    .params
                    .conform(value, &format!("{type_name}.{method}.params"))
            }
            PayloadKind::Result => {
                let schema = ty.method_schema(method).ok_or_else(|| ValidationError {
                    path: format!("{type_name}.{method}"),
                    message: "no such method declared".to_string(),
                })?;
                schema
                    .result
                    .conform(value, &format!("{type_name}.{method}.result"))
            }
            PayloadKind::Event => {
                let shape = ty.event_schema(method).ok_or_else(|| ValidationError {
                    path: format!("{type_name}.{method}"),
                    message: "no such event declared".to_string(),
                })?;
                shape.conform(value, &format!("{type_name}.{method}"))
            }
        }
    }
}
