//! Message Bus
//!
//! A per-session routing layer between the simulation data channel and the
//! components that derive state from it. The bus owns no domain state: it keeps
//! a registry of listeners, fans every decoded inbound event out to all of them
//! and forwards outbound commands to a [`Transport`].
//!
//! Dispatch is serialized through an internal queue. An event published while
//! another event is being dispatched (from a listener, or from another thread)
//! is appended to the queue and delivered once the current event has reached
//! every listener, so a listener is never re-entered.

use crate::protocol::{self, InboundEvent, OutboundTag};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Errors reported by an outbound transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,
    #[error("Transport failed: {0}")]
    Failed(String),
}

/// The send half of the data channel to the simulation.
///
/// Implementations are fire-and-forget: queuing, if any, is their concern.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn send(&self, frame: String) -> Result<(), TransportError>;
}

impl Transport for mpsc::UnboundedSender<String> {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, frame).map_err(|_| TransportError::Closed)
    }
}

/// A transport that keeps every frame it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<String> {
        lock(&self.frames).clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        lock(&self.frames).push(frame);
        Ok(())
    }
}

/// A callback invoked for every inbound event.
pub type Listener = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

type ListenerId = u64;

#[derive(Default)]
struct Registry {
    next_id: ListenerId,
    listeners: Vec<(ListenerId, Listener)>,
}

#[derive(Default)]
struct DispatchQueue {
    dispatching: bool,
    pending: VecDeque<InboundEvent>,
}

struct BusInner {
    registry: Mutex<Registry>,
    queue: Mutex<DispatchQueue>,
    transport: Arc<dyn Transport>,
}

/// Handle to a session's message bus. Clones share the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                queue: Mutex::new(DispatchQueue::default()),
                transport,
            }),
        }
    }

    /// Registers a listener. Listeners receive every event and must filter for
    /// the tags they care about.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        trace!(listener_id = id, "Listener registered");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.registry).listeners.len()
    }

    /// Decodes a raw inbound frame and dispatches it. Returns `false` if the
    /// frame was dropped.
    pub fn dispatch_frame(&self, raw: &str) -> bool {
        match InboundEvent::decode(raw) {
            Some(event) => {
                self.publish(event);
                true
            }
            None => false,
        }
    }

    /// Delivers an already-decoded event to every listener.
    pub fn publish(&self, event: InboundEvent) {
        {
            let mut queue = lock(&self.inner.queue);
            queue.pending.push_back(event);
            if queue.dispatching {
                return;
            }
            queue.dispatching = true;
        }

        let _guard = DispatchGuard(&self.inner);
        loop {
            let next = {
                let mut queue = lock(&self.inner.queue);
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.dispatching = false;
                        return;
                    }
                }
            };

            let snapshot: Vec<Listener> = lock(&self.inner.registry)
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            trace!(tag = %next.tag(), listeners = snapshot.len(), "Dispatching event");
            for listener in snapshot {
                listener(&next);
            }
        }
    }

    /// Encodes and sends an outbound command. Failures are logged, never returned.
    pub fn send_message(&self, tag: OutboundTag, payload: &str) {
        let frame = protocol::encode(tag, payload);
        debug!(%frame, "Sending outbound frame");
        if let Err(e) = self.inner.transport.send(frame) {
            warn!(%tag, error = %e, "Failed to send outbound frame");
        }
    }
}

/// Clears the dispatching flag if a listener panics mid-dispatch, so the bus
/// stays usable.
struct DispatchGuard<'a>(&'a BusInner);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut queue = lock(&self.0.queue);
            queue.dispatching = false;
            queue.pending.clear();
        }
    }
}

/// Registration token returned by [`MessageBus::on_message`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: ListenerId,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Removes the listener. Safe to call more than once, from inside the
    /// listener itself, or after the bus is gone.
    pub fn unsubscribe(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut registry = lock(&bus.registry);
        let before = registry.listeners.len();
        registry.listeners.retain(|(id, _)| *id != self.id);
        if registry.listeners.len() != before {
            trace!(listener_id = self.id, "Listener removed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| lock(&bus.registry).listeners.iter().any(|(id, _)| *id == self.id))
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
