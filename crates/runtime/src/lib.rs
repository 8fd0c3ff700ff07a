//! Tether Runtime - connection, object registry, and waiters
//!
//! This crate is the RPC core of the tether client: it correlates outbound
//! calls with inbound responses, mirrors every live remote object as a typed
//! local proxy, and routes lifecycle and domain events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  client API  │  Concrete proxy types (Session, Worker, ...)
//! └──────┬───────┘
//!        │ registers constructors in TypeRegistry
//! ┌──────▼───────┐
//! │tether-runtime│  This crate
//! │ ┌──────────┐ │
//! │ │Connection│ │  id correlation, lifecycle dispatch
//! │ └──────────┘ │
//! │ ┌──────────┐ │
//! │ │ Objects  │ │  guid registry, ownership tree
//! │ └──────────┘ │
//! │ ┌──────────┐ │
//! │ │Transport │ │  length-prefixed JSON over a pipe
//! │ └──────────┘ │
//! └──────────────┘
//! ```
//!
//! # Decoupling via TypeRegistry
//!
//! The `Connection` constructs proxies through the closed [`TypeRegistry`]
//! lookup instead of depending on concrete proxy types, so the runtime stays
//! independent of the API crate that defines them.

pub mod channel;
pub mod connection;
pub mod error;
pub mod events;
pub mod object;
pub mod registry;
pub mod transport;
pub mod waiter;

// Re-export key types at crate root
pub use channel::Channel;
pub use connection::{Connection, ConnectionLike, ObjectStore, ROOT_GUID};
pub use error::{Error, Result};
pub use events::{EventBus, EventStream, ObjectEvent};
pub use object::{
    DisposeReason, Instrumentation, ParentOrConnection, RemoteObject, RemoteObjectCore, RootObject,
};
pub use registry::TypeRegistry;
pub use transport::{
    PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
    TransportReceiver,
};
pub use waiter::Waiter;

// Used by the `impl_remote_object!` expansion.
#[doc(hidden)]
pub use serde_json as _serde_json;
