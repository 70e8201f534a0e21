//! Node liveness events.

use crate::types::Endpoint;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events about node liveness changes.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The failure policy declared a node Dead.
    NodeFailed {
        /// The node's endpoint.
        endpoint: Endpoint,
    },

    /// A Dead node answered its probe and is Alive again.
    NodeRecovered {
        /// The node's endpoint.
        endpoint: Endpoint,
    },
}

impl NodeEvent {
    /// The endpoint this event is about.
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            NodeEvent::NodeFailed { endpoint } => endpoint,
            NodeEvent::NodeRecovered { endpoint } => endpoint,
        }
    }
}

/// Listener for node events.
pub trait NodeEventListener: Send + Sync + 'static {
    /// Called when a node event occurs. Invoked outside pool locks.
    fn on_event(&self, event: NodeEvent);
}

/// Event listener that logs events.
pub struct LoggingEventListener;

impl NodeEventListener for LoggingEventListener {
    fn on_event(&self, event: NodeEvent) {
        match &event {
            NodeEvent::NodeFailed { endpoint } => {
                tracing::error!(endpoint = %endpoint, "node declared dead");
            }
            NodeEvent::NodeRecovered { endpoint } => {
                tracing::info!(endpoint = %endpoint, "node recovered");
            }
        }
    }
}

/// Handle returned by [`EventSink::subscribe`]; pass back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Multicast registry for node events.
#[derive(Default)]
pub(crate) struct EventSink {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Arc<dyn NodeEventListener>)>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn NodeEventListener>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(i, _)| *i != id.0);
    }

    /// Deliver an event to every listener. Listeners are cloned out of
    /// the registry first so no lock is held across callbacks.
    pub fn emit(&self, event: NodeEvent) {
        let listeners: Vec<Arc<dyn NodeEventListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }
}
