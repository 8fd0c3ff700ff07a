//! Closed type registry mapping wire type names to proxy constructors.
//!
//! The one place requiring compile-time knowledge of every remote type: a
//! `__create__` message resolves its type name here. New types are a local,
//! compile-checked addition: register a constructor and the runtime never
//! needs to know the concrete type again.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::object::{ParentOrConnection, RemoteObject};

/// Constructor producing a proxy for one remote type.
pub type ConstructorFn =
    dyn Fn(ParentOrConnection, Arc<str>, Value) -> Result<Arc<dyn RemoteObject>> + Send + Sync;

/// Registry of all remote object kinds this client understands.
#[derive(Default)]
pub struct TypeRegistry {
    constructors: HashMap<String, Arc<ConstructorFn>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for `type_name`, replacing any previous one.
    pub fn register<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn(ParentOrConnection, Arc<str>, Value) -> Result<Arc<dyn RemoteObject>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(type_name.to_string(), Arc::new(constructor));
    }

    /// Looks up the constructor for `type_name`.
    pub fn resolve(&self, type_name: &str) -> Option<Arc<ConstructorFn>> {
        self.constructors.get(type_name).cloned()
    }

    /// Constructs a proxy for a `__create__` message. An unregistered type is
    /// fatal; it signals a client built against an older protocol.
    pub fn construct(
        &self,
        type_name: &str,
        parent: ParentOrConnection,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Arc<dyn RemoteObject>> {
        let constructor = self
            .resolve(type_name)
            .ok_or_else(|| Error::UnknownObjectType(type_name.to_string()))?;
        constructor(parent, guid, initializer)
    }

    /// Names of all registered types, for diagnostics.
    pub fn type_names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}
