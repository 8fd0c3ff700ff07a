//! Per-object event emitter.
//!
//! Every remote object carries an [`EventBus`]: domain events routed to it by
//! the connection are emitted here. Two consumption patterns are supported:
//!
//! 1. **Streams**: [`EventBus::subscribe`] returns a broadcast receiver;
//!    [`EventStream`] wraps it with lag handling.
//! 2. **Sinks**: one-shot, predicate-matched callbacks registered by
//!    [`Waiter`](crate::waiter::Waiter). Sinks fire synchronously inside
//!    [`emit`](EventBus::emit), so "first matching event wins" is decided by
//!    emission order alone, and an event emitted before registration is never
//!    seen.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

/// A domain event delivered to one remote object.
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    pub name: Arc<str>,
    pub params: Value,
}

impl ObjectEvent {
    pub fn new(name: &str, params: Value) -> Self {
        Self {
            name: Arc::from(name),
            params,
        }
    }
}

type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type Deliver<E> = Box<dyn FnOnce(E) + Send>;

struct Sink<E> {
    id: u64,
    predicate: Predicate<E>,
    deliver: Deliver<E>,
}

/// Event dispatcher combining broadcast subscribers with one-shot sinks.
pub struct EventBus<E: Clone + Send + 'static> {
    tx: broadcast::Sender<E>,
    sinks: Mutex<Vec<Sink<E>>>,
    next_sink_id: AtomicU64,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Creates a bus with the given broadcast channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sinks: Mutex::new(Vec::new()),
            next_sink_id: AtomicU64::new(1),
        }
    }

    /// Emits an event to matching sinks, then to all broadcast subscribers.
    ///
    /// Matching sinks are removed and their callbacks run before this call
    /// returns, which gives waiters guaranteed, in-order delivery even when
    /// broadcast receivers lag.
    pub fn emit(&self, event: E) {
        let mut matched: Vec<Deliver<E>> = Vec::new();
        {
            let mut sinks = self.sinks.lock();
            let mut i = 0;
            while i < sinks.len() {
                if (sinks[i].predicate)(&event) {
                    matched.push(sinks.swap_remove(i).deliver);
                } else {
                    i += 1;
                }
            }
        }
        // Callbacks run outside the lock so a sink may register new sinks.
        for deliver in matched {
            deliver(event.clone());
        }
        let _ = self.tx.send(event);
    }

    /// Subscribes to the broadcast stream. Events emitted before subscription
    /// are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Registers a one-shot sink fired on the first event matching
    /// `predicate`. Returns an id usable with [`remove_sink`](Self::remove_sink).
    pub fn register_sink<P, D>(&self, predicate: P, deliver: D) -> u64
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
        D: FnOnce(E) + Send + 'static,
    {
        let id = self.next_sink_id.fetch_add(1, Ordering::Relaxed);
        self.sinks.lock().push(Sink {
            id,
            predicate: Box::new(predicate),
            deliver: Box::new(deliver),
        });
        id
    }

    /// Removes a sink that has not fired yet. Removing an already-fired or
    /// unknown id is a no-op.
    pub fn remove_sink(&self, id: u64) {
        self.sinks.lock().retain(|sink| sink.id != id);
    }

    /// Registers a one-shot waiter delivered through a oneshot channel.
    pub fn register_waiter<P>(&self, predicate: P) -> oneshot::Receiver<E>
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.register_sink(predicate, move |event| {
            let _ = tx.send(event);
        });
        rx
    }

    /// Number of sinks still armed.
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Wrapper around [`broadcast::Receiver`] that logs and skips lag instead of
/// surfacing it as an error.
///
/// [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver
pub struct EventStream<E: Clone + Send + 'static> {
    rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
    pub fn new(rx: broadcast::Receiver<E>) -> Self {
        Self { rx }
    }

    /// Receives the next event, or `None` when the bus is dropped.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "event stream lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receives an event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "event stream lagged, dropped events");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}
