//! Waiter - one-shot primitive settling on the first of several completions.
//!
//! A [`Waiter`] is armed with any mix of: a matching event
//! ([`wait_for_event`](Waiter::wait_for_event)), a poison event
//! ([`reject_on_event`](Waiter::reject_on_event)), and a timeout
//! ([`reject_on_timeout`](Waiter::reject_on_timeout)). Whichever fires first
//! settles the shared outcome exactly once; everything after that is inert.
//!
//! Event sinks fire synchronously at emission time, so when several armed
//! conditions are satisfiable, emission order alone decides which one wins.
//! `dispose` (also run from `Drop`, so it is reachable on every exit path)
//! removes every armed sink and aborts the timer regardless of how the
//! outcome settled; an undisposed waiter leaks listeners invisibly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::{EventBus, ObjectEvent};

struct Outcome {
    slot: Mutex<Option<Result<Value>>>,
    notify: Notify,
}

impl Outcome {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// First settlement wins; later ones are dropped.
    fn settle(&self, result: Result<Value>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.notify.notify_waiters();
        }
    }
}

/// One-shot cooperative wait over events, poison events, and a timeout.
pub struct Waiter {
    outcome: Arc<Outcome>,
    listeners: Vec<(Arc<EventBus<ObjectEvent>>, u64)>,
    timers: Vec<JoinHandle<()>>,
    disposed: bool,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            outcome: Arc::new(Outcome::new()),
            listeners: Vec::new(),
            timers: Vec::new(),
            disposed: false,
        }
    }

    /// Settles Ok with the payload of the first `event` on `emitter` for
    /// which `predicate` returns true. Events emitted before this call are
    /// never seen.
    pub fn wait_for_event<P>(&mut self, emitter: &Arc<EventBus<ObjectEvent>>, event: &str, predicate: P)
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(event);
        let outcome = self.outcome.clone();
        let id = emitter.register_sink(
            move |e: &ObjectEvent| e.name == name && predicate(&e.params),
            move |e| outcome.settle(Ok(e.params)),
        );
        self.listeners.push((emitter.clone(), id));
    }

    /// Settles Err(`error`) when `event` fires on `emitter`. Converts an
    /// owning object or connection closing into an immediate failure for
    /// this wait.
    pub fn reject_on_event(&mut self, emitter: &Arc<EventBus<ObjectEvent>>, event: &str, error: Error) {
        self.reject_on_event_if(emitter, event, error, |_| true);
    }

    /// [`reject_on_event`](Self::reject_on_event) with an extra payload filter.
    pub fn reject_on_event_if<P>(
        &mut self,
        emitter: &Arc<EventBus<ObjectEvent>>,
        event: &str,
        error: Error,
        predicate: P,
    ) where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(event);
        let outcome = self.outcome.clone();
        let id = emitter.register_sink(
            move |e: &ObjectEvent| e.name == name && predicate(&e.params),
            move |_| outcome.settle(Err(error)),
        );
        self.listeners.push((emitter.clone(), id));
    }

    /// Arms a timer that settles Err(timeout) after `duration` unless the
    /// outcome settled first.
    pub fn reject_on_timeout(&mut self, duration: Duration, message: &str) {
        let outcome = self.outcome.clone();
        let message = message.to_string();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            outcome.settle(Err(Error::Timeout(message)));
        }));
    }

    /// Awaits the settled outcome.
    pub async fn wait(&mut self) -> Result<Value> {
        loop {
            let notified = self.outcome.notify.notified();
            if let Some(result) = self.outcome.slot.lock().take() {
                return result;
            }
            if self.disposed {
                return Err(Error::ChannelClosed);
            }
            notified.await;
        }
    }

    /// Removes every armed sink and cancels the timer. Idempotent; also run
    /// from `Drop`.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for (bus, id) in self.listeners.drain(..) {
            bus.remove_sink(id);
        }
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.dispose();
    }
}
