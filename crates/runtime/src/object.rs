//! RemoteObject - typed local proxy for one remote object.
//!
//! Every live remote object is mirrored by exactly one proxy implementing
//! [`RemoteObject`]: identity (guid + type name), ownership-tree membership,
//! the validated call surface ([`Channel`]), and an event emitter. Concrete
//! proxy types embed [`RemoteObjectCore`] and delegate to it (the
//! [`impl_remote_object!`](crate::impl_remote_object) macro writes the
//! boilerplate).
//!
//! Lifecycle is `Created -> Active -> Disposed` (terminal). Disposal cascades
//! children-first; any invoke after disposal fails fast.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::Channel;
use crate::connection::ConnectionLike;
use crate::error::{Error, Result};
use crate::events::{EventBus, ObjectEvent};

/// Private module for the sealed trait pattern.
pub mod private {
    /// Marker trait that seals `RemoteObject`.
    pub trait Sealed {}
}

/// Reason an object was disposed, carried through the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
    /// Explicitly closed, locally or by the server.
    Closed,
    /// Garbage collected by the server.
    GarbageCollected,
}

/// Parent of a new object: another object, or the connection itself for the
/// bootstrap root.
pub enum ParentOrConnection {
    Parent(Arc<dyn RemoteObject>),
    Connection(Arc<dyn ConnectionLike>),
}

/// Sink receiving call-begin/call-end notifications from `wrap_api_call`.
///
/// Registered on any object in the tree; descendants report to the nearest
/// ancestor carrying a sink. Nested wrapped calls are not reported, so
/// composite operations count once.
pub trait Instrumentation: Send + Sync {
    fn call_begin(&self, api_name: &str);
    fn call_end(&self, api_name: &str, error: Option<&Error>);
}

/// Base trait for all remote-object proxies.
///
/// Sealed: implement it by embedding [`RemoteObjectCore`] and using
/// [`impl_remote_object!`](crate::impl_remote_object).
pub trait RemoteObject: private::Sealed + DowncastSync {
    /// Unique guid for this object within the connection session.
    fn guid(&self) -> &str;

    /// Declared protocol type name.
    fn type_name(&self) -> &str;

    /// Current parent, if any.
    fn parent(&self) -> Option<Arc<dyn RemoteObject>>;

    /// Updates the stored parent reference (adoption path).
    fn set_parent(&self, parent: Option<Arc<dyn RemoteObject>>);

    /// The connection this object belongs to.
    fn connection(&self) -> Arc<dyn ConnectionLike>;

    /// Raw initializer payload from the server. Plain data fields live here.
    fn initializer(&self) -> &Value;

    /// The validated call surface.
    fn channel(&self) -> &Channel;

    /// The object's event emitter.
    fn emitter(&self) -> Arc<EventBus<ObjectEvent>>;

    /// Disposes this object and its whole subtree, children first.
    fn dispose(&self, reason: DisposeReason);

    /// Adds a child to this parent's set.
    fn add_child(&self, guid: Arc<str>, child: Arc<dyn RemoteObject>);

    /// Removes a child from this parent's set.
    fn remove_child(&self, guid: &str);

    /// Handles a validated domain event addressed to this object.
    fn on_event(&self, method: &str, params: Value);

    /// True once `dispose` ran (terminal).
    fn is_disposed(&self) -> bool;

    /// Nearest instrumentation sink: own, else nearest ancestor's.
    fn instrumentation(&self) -> Option<Arc<dyn Instrumentation>>;
}

impl_downcast!(sync RemoteObject);

impl std::fmt::Debug for dyn RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("guid", &self.guid())
            .field("type_name", &self.type_name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

tokio::task_local! {
    /// Marker scoped over the body of an outermost `wrap_api_call`.
    static ACTIVE_API_CALL: ();
}

type ChildMap = HashMap<Arc<str>, Arc<dyn RemoteObject>>;

/// Embeddable base implementation of [`RemoteObject`].
pub struct RemoteObjectCore {
    guid: Arc<str>,
    type_name: Arc<str>,
    parent: Mutex<Option<Weak<dyn RemoteObject>>>,
    connection: Arc<dyn ConnectionLike>,
    children: Mutex<ChildMap>,
    channel: Channel,
    initializer: Value,
    emitter: Arc<EventBus<ObjectEvent>>,
    instrumentation: Mutex<Option<Arc<dyn Instrumentation>>>,
    disposed: Arc<AtomicBool>,
}

impl RemoteObjectCore {
    /// Creates the base state for a proxy. Registry insertion and parent
    /// linking happen on the connection's dispatch path, not here.
    pub fn new(
        parent: ParentOrConnection,
        type_name: &str,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        let (connection, parent_weak) = match parent {
            ParentOrConnection::Parent(p) => {
                let connection = p.connection();
                (connection, Some(Arc::downgrade(&p)))
            }
            ParentOrConnection::Connection(c) => (c, None),
        };

        let type_name: Arc<str> = Arc::from(type_name);
        let disposed = Arc::new(AtomicBool::new(false));
        let channel = Channel::new(
            guid.clone(),
            type_name.clone(),
            connection.clone(),
            disposed.clone(),
        );

        Self {
            guid,
            type_name,
            parent: Mutex::new(parent_weak),
            connection,
            children: Mutex::new(HashMap::new()),
            channel,
            initializer,
            emitter: Arc::new(EventBus::default()),
            instrumentation: Mutex::new(None),
            disposed,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn parent(&self) -> Option<Arc<dyn RemoteObject>> {
        self.parent.lock().as_ref().and_then(|p| p.upgrade())
    }

    pub fn set_parent(&self, parent: Option<Arc<dyn RemoteObject>>) {
        *self.parent.lock() = parent.map(|p| Arc::downgrade(&p));
    }

    pub fn connection(&self) -> Arc<dyn ConnectionLike> {
        self.connection.clone()
    }

    pub fn initializer(&self) -> &Value {
        &self.initializer
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn emitter(&self) -> Arc<EventBus<ObjectEvent>> {
        self.emitter.clone()
    }

    /// Disposes the subtree: every current child first (each attempted
    /// independently), then this object's own links and registry entry.
    /// Local double-dispose is an idempotent no-op.
    pub fn dispose(&self, reason: DisposeReason) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(guid = %self.guid, ?reason, "disposing object");

        let children: Vec<Arc<dyn RemoteObject>> = {
            let mut children = self.children.lock();
            children.drain().map(|(_, child)| child).collect()
        };
        for child in children {
            // Each child owns its disposal; an already-disposed child is a
            // no-op and never blocks its siblings.
            child.dispose(reason);
        }

        if let Some(parent) = self.parent() {
            parent.remove_child(&self.guid);
        }
        self.connection.unregister_object(&self.guid);
        self.set_parent(None);
    }

    pub fn add_child(&self, guid: Arc<str>, child: Arc<dyn RemoteObject>) {
        self.children.lock().insert(guid, child);
    }

    pub fn remove_child(&self, guid: &str) {
        let guid: Arc<str> = Arc::from(guid);
        self.children.lock().remove(&guid);
    }

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<Arc<dyn RemoteObject>> {
        self.children.lock().values().cloned().collect()
    }

    /// Emits a domain event on this object's bus.
    pub fn on_event(&self, method: &str, params: Value) {
        tracing::debug!(guid = %self.guid, method, "object event");
        self.emitter.emit(ObjectEvent::new(method, params));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Registers an instrumentation sink on this object; descendants without
    /// their own sink report here.
    pub fn set_instrumentation(&self, sink: Arc<dyn Instrumentation>) {
        *self.instrumentation.lock() = Some(sink);
    }

    pub fn instrumentation(&self) -> Option<Arc<dyn Instrumentation>> {
        if let Some(sink) = self.instrumentation.lock().clone() {
            return Some(sink);
        }
        self.parent().and_then(|p| p.instrumentation())
    }

    /// Runs `f` against a fresh clone of this object's channel as one logical
    /// API call.
    ///
    /// On error, the call name and the captured call site are attached before
    /// the error is rethrown; nothing is ever swallowed. The outermost wrapped
    /// call on a task reports call-begin/call-end to the nearest
    /// instrumentation sink; calls nested inside it are not reported
    /// separately.
    #[track_caller]
    pub fn wrap_api_call<T, F, Fut>(
        &self,
        api_name: &str,
        f: F,
    ) -> impl Future<Output = Result<T>> + use<T, F, Fut>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let caller = std::panic::Location::caller();
        let api_name = api_name.to_string();
        let channel = self.channel.clone();
        let instrumentation = self.instrumentation();

        async move {
            let nested = ACTIVE_API_CALL.try_with(|_| ()).is_ok();
            if nested {
                return f(channel)
                    .await
                    .map_err(|e| e.with_call_context(&api_name, caller));
            }

            if let Some(sink) = &instrumentation {
                sink.call_begin(&api_name);
            }
            let result = ACTIVE_API_CALL.scope((), f(channel)).await;
            if let Some(sink) = &instrumentation {
                sink.call_end(&api_name, result.as_ref().err());
            }
            result.map_err(|e| e.with_call_context(&api_name, caller))
        }
    }
}

/// Implements [`RemoteObject`] for a type embedding a [`RemoteObjectCore`]
/// field, delegating every method to it.
#[macro_export]
macro_rules! impl_remote_object {
    ($ty:ty, $field:ident) => {
        impl $crate::object::private::Sealed for $ty {}

        impl $crate::object::RemoteObject for $ty {
            fn guid(&self) -> &str {
                self.$field.guid()
            }

            fn type_name(&self) -> &str {
                self.$field.type_name()
            }

            fn parent(&self) -> Option<::std::sync::Arc<dyn $crate::object::RemoteObject>> {
                self.$field.parent()
            }

            fn set_parent(
                &self,
                parent: Option<::std::sync::Arc<dyn $crate::object::RemoteObject>>,
            ) {
                self.$field.set_parent(parent)
            }

            fn connection(&self) -> ::std::sync::Arc<dyn $crate::connection::ConnectionLike> {
                self.$field.connection()
            }

            fn initializer(&self) -> &$crate::_serde_json::Value {
                self.$field.initializer()
            }

            fn channel(&self) -> &$crate::channel::Channel {
                self.$field.channel()
            }

            fn emitter(
                &self,
            ) -> ::std::sync::Arc<$crate::events::EventBus<$crate::events::ObjectEvent>> {
                self.$field.emitter()
            }

            fn dispose(&self, reason: $crate::object::DisposeReason) {
                self.$field.dispose(reason)
            }

            fn add_child(
                &self,
                guid: ::std::sync::Arc<str>,
                child: ::std::sync::Arc<dyn $crate::object::RemoteObject>,
            ) {
                self.$field.add_child(guid, child)
            }

            fn remove_child(&self, guid: &str) {
                self.$field.remove_child(guid)
            }

            fn on_event(&self, method: &str, params: $crate::_serde_json::Value) {
                self.$field.on_event(method, params)
            }

            fn is_disposed(&self) -> bool {
                self.$field.is_disposed()
            }

            fn instrumentation(
                &self,
            ) -> Option<::std::sync::Arc<dyn $crate::object::Instrumentation>> {
                self.$field.instrumentation()
            }
        }
    };
}

/// Bootstrap object registered by the connection under [`ROOT_GUID`].
///
/// [`ROOT_GUID`]: crate::connection::ROOT_GUID
pub struct RootObject {
    pub(crate) core: RemoteObjectCore,
}

impl RootObject {
    pub(crate) fn new(connection: Arc<dyn ConnectionLike>) -> Self {
        Self {
            core: RemoteObjectCore::new(
                ParentOrConnection::Connection(connection),
                "Root",
                Arc::from(crate::connection::ROOT_GUID),
                Value::Null,
            ),
        }
    }

    /// Root-initialization call: announces the client and returns whatever
    /// the server reports about the session being set up.
    pub async fn initialize(&self) -> Result<Value> {
        self.core.channel().invoke("initialize", Value::Null).await
    }

    /// Registers the tree-wide instrumentation sink.
    pub fn set_instrumentation(&self, sink: Arc<dyn Instrumentation>) {
        self.core.set_instrumentation(sink);
    }
}

impl std::fmt::Debug for RootObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootObject")
            .field("guid", &self.core.guid())
            .field("disposed", &self.core.is_disposed())
            .finish()
    }
}

impl_remote_object!(RootObject, core);
