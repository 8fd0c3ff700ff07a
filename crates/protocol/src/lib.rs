//! Wire types and schema catalog for the tether protocol.
//!
//! This crate defines the transport-agnostic message envelope exchanged with
//! the server and the schema machinery the runtime uses to validate payloads
//! before sending and after receiving:
//!
//! - [`messages`]: request/response/event envelopes and the remote error payload
//! - [`schema`]: a minimal structural shape language plus the per-type dispatch
//!   [`Catalog`] mapping method names to parameter/result shapes
//! - [`validate`]: the [`Validator`] seam consumed by the runtime
//!
//! The catalog is deliberately closed: every remote type, method, and event the
//! client understands is registered up front, so an undeclared name is a local
//! logic error rather than a wire round trip.

pub mod messages;
pub mod schema;
pub mod validate;

pub use messages::{
    ADOPT_METHOD, CREATE_METHOD, DISPOSE_METHOD, ErrorPayload, ErrorWrapper, Event, Location,
    Message, Metadata, Request, Response,
};
pub use schema::{Catalog, Field, MethodSchema, Shape, TypeSchema};
pub use validate::{PayloadKind, ValidationError, Validator};
