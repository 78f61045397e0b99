//! Prioritized handlers for networked events delivered by the host.

use crate::error::EventError;
use crate::host::ClientId;
use crate::kernel::Kernel;
use crate::utils::panic_message;
use dashmap::DashMap;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

type NetHandlerFn = dyn Fn(ClientId, &[Value]) -> Result<(), EventError> + Send + Sync;

#[derive(Clone)]
struct NetHandler {
    priority: i32,
    handler: Arc<NetHandlerFn>,
}

#[derive(Default)]
pub(crate) struct NetRouter {
    handlers: DashMap<String, Vec<NetHandler>>,
}

impl NetRouter {
    /// Returns true when this is the first handler for `event`.
    fn add(&self, event: &str, priority: i32, handler: Arc<NetHandlerFn>) -> bool {
        let mut entry = self.handlers.entry(event.to_string()).or_default();
        let first = entry.is_empty();
        // insert after every handler of equal or lower priority
        let at = entry.partition_point(|h| h.priority <= priority);
        entry.insert(at, NetHandler { priority, handler });
        first
    }

    fn snapshot(&self, event: &str) -> Vec<NetHandler> {
        self.handlers
            .get(event)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub(crate) fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map(|h| h.len()).unwrap_or(0)
    }
}

impl Kernel {
    /// Subscribes to a networked event.
    ///
    /// The first handler for an event reserves the channel on the host.
    /// Handlers run in ascending `priority`; equal priorities keep
    /// subscription order.
    pub fn on_net<F>(&self, event: &str, priority: i32, handler: F)
    where
        F: Fn(ClientId, &[Value]) -> Result<(), EventError> + Send + Sync + 'static,
    {
        if self.inner.net.add(event, priority, Arc::new(handler)) {
            self.inner.host.register_net_event(event);
        }
    }

    /// Runs every handler for an inbound networked event.
    ///
    /// A failing handler is logged and the next one still runs. Returns the
    /// number of handlers invoked.
    pub fn dispatch_net(&self, event: &str, source: ClientId, args: &[Value]) -> usize {
        let handlers = self.inner.net.snapshot(event);
        if handlers.is_empty() {
            debug!("[Net] no handler for \"{}\" from {}", event, source);
            return 0;
        }

        for entry in &handlers {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(source, args)));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(EventError::Panicked(panic_message(payload))),
            };
            if let Err(e) = result {
                error!("[Net] ERROR on \"{}\" from {}: {}", event, source, e);
            }
        }
        handlers.len()
    }

    /// Sends an event to one peer, or every peer with [`crate::BROADCAST`].
    pub fn emit_net(&self, event: &str, target: ClientId, args: &[Value]) {
        self.inner.host.emit_net(event, target, args);
    }

    pub fn net_handler_count(&self, event: &str) -> usize {
        self.inner.net.handler_count(event)
    }
}
