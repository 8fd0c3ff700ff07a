//! Connection - the message bus of the runtime.
//!
//! One [`Connection`] owns one transport. Outbound calls get a strictly
//! increasing id and a pending-call record; the dispatch path settles them
//! when the correlated response arrives. Inbound messages without an id are
//! lifecycle messages (`__create__`, `__adopt__`, `__dispose__`) handled
//! structurally, or domain events validated and routed to the addressed
//! object's emitter.
//!
//! The registry is mutated only from the dispatch path and from `close`, both
//! of which run on the single reader task, so dispatch never observes a
//! half-updated tree.

mod object_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use tether_protocol::{
    ADOPT_METHOD, CREATE_METHOD, DISPOSE_METHOD, ErrorPayload, Event, Message, Metadata,
    PayloadKind, Request, Response, Validator,
};

use crate::error::{Error, Result};
use crate::events::{EventBus, ObjectEvent};
use crate::object::{DisposeReason, ParentOrConnection, RemoteObject, RootObject};
use crate::registry::TypeRegistry;
use crate::transport::{Transport, TransportParts, TransportReceiver};

pub use object_store::ObjectStore;

/// Guid the bootstrap root object is registered under.
pub const ROOT_GUID: &str = "root";

/// The seam objects and channels use to talk to their connection.
///
/// [`Connection`] is the only production implementation; the trait exists so
/// object-level tests can substitute a recording stub.
pub trait ConnectionLike: Send + Sync + 'static {
    /// Issues a validated request and resolves with the (result-validated)
    /// payload.
    fn send_request<'a>(
        &'a self,
        guid: &'a str,
        type_name: &'a str,
        method: &'a str,
        params: Value,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Removes a disposed object from the guid registry.
    fn unregister_object(&self, guid: &str);

    /// The schema validator for this connection.
    fn validator(&self) -> &dyn Validator;
}

type PendingCalls = Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>;

/// Removes the pending-call entry when the caller stops waiting, so a late
/// response for an abandoned id finds nothing and is dropped on purpose.
struct CancelGuard<'a> {
    callbacks: &'a PendingCalls,
    id: u32,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.callbacks.lock().remove(&self.id);
    }
}

/// Message bus: id correlation, object registry, lifecycle dispatch.
pub struct Connection {
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    inbound: Mutex<Option<(Box<dyn TransportReceiver>, mpsc::UnboundedReceiver<Value>)>>,
    /// Last allocated request id. Ids are never reused, which is what lets
    /// `handle_response` tell an abandoned call from a desynced server.
    last_id: AtomicU32,
    callbacks: PendingCalls,
    objects: ObjectStore,
    registry: TypeRegistry,
    validator: Arc<dyn Validator>,
    close_reason: Mutex<Option<String>>,
    emitter: Arc<EventBus<ObjectEvent>>,
}

impl Connection {
    /// Creates a connection over the given transport halves and registers the
    /// bootstrap [`RootObject`] under [`ROOT_GUID`].
    pub fn new(
        parts: TransportParts,
        registry: TypeRegistry,
        validator: Arc<dyn Validator>,
    ) -> Arc<Self> {
        let TransportParts {
            sender,
            receiver,
            message_rx,
        } = parts;

        let connection = Arc::new(Self {
            transport: tokio::sync::Mutex::new(sender),
            inbound: Mutex::new(Some((receiver, message_rx))),
            last_id: AtomicU32::new(0),
            callbacks: Mutex::new(HashMap::new()),
            objects: ObjectStore::new(),
            registry,
            validator,
            close_reason: Mutex::new(None),
            emitter: Arc::new(EventBus::default()),
        });

        let connection_seam: Arc<dyn ConnectionLike> = connection.clone();
        let root: Arc<dyn RemoteObject> = Arc::new(RootObject::new(connection_seam));
        connection.objects.insert(Arc::from(ROOT_GUID), root);

        connection
    }

    /// Drives the transport until EOF, a dispatch error, or `close`.
    ///
    /// Always closes the connection on the way out, so pending callers are
    /// rejected rather than hung.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (receiver, mut message_rx) = self
            .inbound
            .lock()
            .take()
            .ok_or_else(|| Error::Protocol("connection is already running".to_string()))?;

        let mut reader = tokio::spawn(receiver.run());

        let result = 'dispatch: loop {
            tokio::select! {
                message = message_rx.recv() => match message {
                    Some(value) => {
                        if let Err(error) = self.dispatch_value(value) {
                            break 'dispatch Err(error);
                        }
                    }
                    None => break 'dispatch Ok(()),
                },
                joined = &mut reader => {
                    // The reader won the race; deliver what it already
                    // decoded before reporting its exit status.
                    while let Ok(value) = message_rx.try_recv() {
                        if let Err(error) = self.dispatch_value(value) {
                            break 'dispatch Err(error);
                        }
                    }
                    break 'dispatch match joined {
                        Ok(status) => status,
                        Err(join_error) => Err(Error::Transport(format!(
                            "transport reader task failed: {join_error}"
                        ))),
                    };
                }
            }
        };

        let reason = match &result {
            Ok(()) => "transport closed".to_string(),
            Err(error) => error.to_string(),
        };
        self.close(&reason);
        result
    }

    /// Marks the connection closed, rejects every outstanding call with the
    /// stored reason, disposes the object tree, and emits a local `closed`
    /// notification. Idempotent.
    pub fn close(&self, reason: &str) {
        {
            let mut close_reason = self.close_reason.lock();
            if close_reason.is_some() {
                return;
            }
            *close_reason = Some(reason.to_string());
        }
        tracing::info!(reason, "closing connection");

        let pending: Vec<oneshot::Sender<Result<Value>>> = {
            let mut callbacks = self.callbacks.lock();
            callbacks.drain().map(|(_, sender)| sender).collect()
        };
        for sender in pending {
            let _ = sender.send(Err(Error::ConnectionClosed(reason.to_string())));
        }

        // Destruction by eviction: objects are dropped from the registry
        // wholesale, without running the per-object dispose cascade. Any call
        // on a surviving handle still fails with the stored close reason.
        self.objects.clear();

        self.emitter.emit(ObjectEvent::new(
            "closed",
            serde_json::json!({ "reason": reason }),
        ));
    }

    /// Connection-level notifications (`closed`). Waiters arm poison
    /// listeners here.
    pub fn emitter(&self) -> Arc<EventBus<ObjectEvent>> {
        self.emitter.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason.lock().is_some()
    }

    /// The bootstrap root object.
    pub fn root(&self) -> Result<Arc<RootObject>> {
        let object = self
            .objects
            .try_get(ROOT_GUID)
            .ok_or_else(|| Error::ConnectionClosed(self.stored_close_reason()))?;
        object
            .downcast_arc::<RootObject>()
            .map_err(|_| Error::Protocol("root guid is not bound to the root object".to_string()))
    }

    /// Synchronous registry lookup.
    pub fn object(&self, guid: &str) -> Option<Arc<dyn RemoteObject>> {
        self.objects.try_get(guid)
    }

    /// Waits for `guid` to appear in the registry. A response may name a guid
    /// whose `__create__` is still queued behind it.
    pub async fn wait_for_object(
        &self,
        guid: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteObject>> {
        self.objects.wait_for(guid, timeout).await
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &ObjectStore {
        &self.objects
    }

    fn stored_close_reason(&self) -> String {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    }

    async fn send_request_inner(
        &self,
        guid: &str,
        type_name: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed(self.stored_close_reason()));
        }

        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = oneshot::channel();
        self.callbacks.lock().insert(id, sender);
        let _guard = CancelGuard {
            callbacks: &self.callbacks,
            id,
        };

        // close() may have drained the map between the first check and the
        // insert; re-check so this call cannot be left behind.
        if self.is_closed() {
            return Err(Error::ConnectionClosed(self.stored_close_reason()));
        }

        let request = Request {
            id,
            guid: Arc::from(guid),
            method: method.to_string(),
            params,
            metadata: Metadata::now(),
        };
        tracing::debug!(id, guid, method, "sending request");
        let message = serde_json::to_value(&request)?;
        self.transport.lock().await.send(message).await?;

        let outcome = receiver.await.map_err(|_| Error::ChannelClosed)?;
        let value = outcome?;
        let value = self
            .validator
            .validate(type_name, method, PayloadKind::Result, value)?;
        Ok(value)
    }

    pub(crate) fn dispatch_value(&self, value: Value) -> Result<()> {
        let message: Message = serde_json::from_value(value)?;
        self.dispatch(message)
    }

    /// Routes one inbound message. Errors here signal client/server desync
    /// and tear the connection down; they are never dropped silently.
    pub(crate) fn dispatch(&self, message: Message) -> Result<()> {
        match message {
            Message::Response(response) => self.handle_response(response),
            Message::Event(event) => match event.method.as_str() {
                CREATE_METHOD => self.handle_create(event),
                ADOPT_METHOD => self.handle_adopt(event),
                DISPOSE_METHOD => self.handle_dispose(event),
                _ => self.handle_domain_event(event),
            },
            Message::Unknown(value) => {
                // Forward compatibility: newer servers may add envelope
                // shapes this client does not know about.
                tracing::warn!(%value, "ignoring message with unrecognized shape");
                Ok(())
            }
        }
    }

    fn handle_response(&self, response: Response) -> Result<()> {
        let sender = self.callbacks.lock().remove(&response.id);
        let Some(sender) = sender else {
            // Ids start at 1, so only ids actually handed out can belong to
            // an abandoned call whose pending entry was reclaimed.
            let last_id = self.last_id.load(Ordering::SeqCst);
            if (1..=last_id).contains(&response.id) {
                tracing::debug!(id = response.id, "dropping response for abandoned call");
                return Ok(());
            }
            return Err(Error::Protocol(format!(
                "response for unknown request id {}",
                response.id
            )));
        };

        let outcome = match response.error {
            Some(wrapper) => Err(remote_error(wrapper.error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        // The receiver may already be gone; CancelGuard handles its entry.
        let _ = sender.send(outcome);
        Ok(())
    }

    fn handle_create(&self, event: Event) -> Result<()> {
        let params: CreateParams = serde_json::from_value(event.params)?;
        tracing::debug!(
            parent = %event.guid,
            object_type = %params.type_name,
            guid = %params.guid,
            "creating object"
        );

        let parent = self.objects.try_get(&event.guid).ok_or_else(|| {
            Error::Protocol(format!(
                "cannot create '{}': unknown parent guid '{}'",
                params.guid, event.guid
            ))
        })?;
        let initializer = self.validator.validate(
            &params.type_name,
            "",
            PayloadKind::Initializer,
            params.initializer,
        )?;

        let guid: Arc<str> = Arc::from(params.guid.as_str());
        let object = self.registry.construct(
            &params.type_name,
            ParentOrConnection::Parent(parent.clone()),
            guid.clone(),
            initializer,
        )?;
        parent.add_child(guid.clone(), object.clone());
        self.objects.insert(guid, object);
        Ok(())
    }

    /// Reparenting: purely structural, no schema involved. Guid, type, and
    /// any already-resolved results of the child are unaffected.
    fn handle_adopt(&self, event: Event) -> Result<()> {
        let params: AdoptParams = serde_json::from_value(event.params)?;
        tracing::debug!(parent = %event.guid, child = %params.guid, "adopting object");

        let new_parent = self.objects.try_get(&event.guid).ok_or_else(|| {
            Error::Protocol(format!("cannot adopt: unknown parent guid '{}'", event.guid))
        })?;
        let child = self.objects.try_get(&params.guid).ok_or_else(|| {
            Error::Protocol(format!("cannot adopt: unknown child guid '{}'", params.guid))
        })?;

        if let Some(old_parent) = child.parent() {
            old_parent.remove_child(child.guid());
        }
        new_parent.add_child(Arc::from(child.guid()), child.clone());
        child.set_parent(Some(new_parent));
        Ok(())
    }

    /// A dispose for a guid the registry does not hold is fatal: a duplicate
    /// or out-of-order dispose signals desync, never a silent no-op.
    fn handle_dispose(&self, event: Event) -> Result<()> {
        let object = self.objects.try_get(&event.guid).ok_or_else(|| {
            Error::Protocol(format!(
                "cannot dispose: unknown guid '{}'",
                event.guid
            ))
        })?;

        let reason = match event.params.get("reason").and_then(Value::as_str) {
            Some("gc") => DisposeReason::GarbageCollected,
            _ => DisposeReason::Closed,
        };
        object.dispose(reason);
        Ok(())
    }

    fn handle_domain_event(&self, event: Event) -> Result<()> {
        let object = self.objects.try_get(&event.guid).ok_or_else(|| {
            Error::Protocol(format!(
                "event '{}' for unknown guid '{}'",
                event.method, event.guid
            ))
        })?;

        let params = self.validator.validate(
            object.type_name(),
            &event.method,
            PayloadKind::Event,
            event.params,
        )?;
        object.on_event(&event.method, params);
        Ok(())
    }
}

impl ConnectionLike for Connection {
    fn send_request<'a>(
        &'a self,
        guid: &'a str,
        type_name: &'a str,
        method: &'a str,
        params: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.send_request_inner(guid, type_name, method, params))
    }

    fn unregister_object(&self, guid: &str) {
        self.objects.remove(guid);
    }

    fn validator(&self) -> &dyn Validator {
        &*self.validator
    }
}

fn remote_error(payload: ErrorPayload) -> Error {
    Error::Remote {
        name: payload.name.unwrap_or_else(|| "Error".to_string()),
        message: payload.message,
        stack: payload.stack,
    }
}

#[derive(Deserialize)]
struct CreateParams {
    #[serde(rename = "type")]
    type_name: String,
    guid: String,
    #[serde(default)]
    initializer: Value,
}

#[derive(Deserialize)]
struct AdoptParams {
    guid: String,
}
