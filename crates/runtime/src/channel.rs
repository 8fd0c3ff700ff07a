//! Channel - the invocation surface of one remote object.
//!
//! A [`Channel`] carries everything needed to issue a validated call for its
//! object: guid, declared type name, and the connection seam. Method names are
//! resolved against the schema catalog: a name with no declared method schema
//! is not a call (plain data fields live in the object's initializer instead).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use tether_protocol::PayloadKind;

use crate::connection::ConnectionLike;
use crate::error::{Error, Result};

/// Validated call surface for one remote object.
#[derive(Clone)]
pub struct Channel {
    guid: Arc<str>,
    type_name: Arc<str>,
    connection: Arc<dyn ConnectionLike>,
    disposed: Arc<AtomicBool>,
}

impl Channel {
    pub(crate) fn new(
        guid: Arc<str>,
        type_name: Arc<str>,
        connection: Arc<dyn ConnectionLike>,
        disposed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            guid,
            type_name,
            connection,
            disposed,
        }
    }

    /// Validates `params` against the declared `(type, method)` schema and
    /// forwards the call to the connection.
    ///
    /// Fails fast with [`Error::Protocol`] once the object is disposed, and
    /// with a validation error if `method` is undeclared or the params do not
    /// conform.
    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Protocol(format!(
                "cannot invoke '{method}': {} \"{}\" is disposed",
                self.type_name, self.guid
            )));
        }

        let params =
            self.connection
                .validator()
                .validate(&self.type_name, method, PayloadKind::Params, params)?;

        self.connection
            .send_request(&self.guid, &self.type_name, method, params)
            .await
    }

    /// Typed variant of [`invoke`](Self::invoke): serializes the params and
    /// deserializes the (already schema-validated) result.
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let value = self.invoke(method, serde_json::to_value(params)?).await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Invokes a method with no parameters.
    pub async fn invoke_no_params(&self, method: &str) -> Result<Value> {
        self.invoke(method, Value::Null).await
    }

    /// Returns the guid this channel addresses.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Returns the declared type name of the addressed object.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}
