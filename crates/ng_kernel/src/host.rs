//! Host environment primitives the kernel depends on.
//!
//! The game host supplies the process identity, packaging metadata,
//! external-channel reservation, outbound networking and the
//! "call into another isolated process by name" primitive. The kernel only
//! talks to the host through the [`Host`] trait.
//!
//! [`LocalHub`] is an in-process implementation: several kernels, each
//! with its own resource name, attach to one hub, and cross-resource calls
//! are routed to the named kernel's boundary surface.

use crate::error::KernelError;
use crate::kernel::{Kernel, WeakKernel};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Network peer identifier as delivered by the host.
pub type ClientId = i64;

/// Target value addressing every connected peer.
pub const BROADCAST: ClientId = -1;

/// Environment primitives supplied to the kernel.
#[async_trait]
pub trait Host: Send + Sync {
    /// Identity of the current isolated process.
    fn resource_name(&self) -> &str;

    /// Packaging metadata such as `version`.
    fn metadata(&self, key: &str) -> Option<String>;

    /// Reserves an external channel so that inbound messages for it are accepted.
    fn register_net_event(&self, event: &str);

    /// Sends `event` to a peer, or to every peer with [`BROADCAST`].
    fn emit_net(&self, event: &str, target: ClientId, args: &[Value]);

    /// Invokes `export` on another process's boundary surface.
    async fn call_export(
        &self,
        resource: &str,
        export: &str,
        args: Vec<Value>,
    ) -> Result<Value, KernelError>;

    /// Called once by [`Kernel::new`] so the host can route calls back to it.
    fn attach(&self, _kernel: &Kernel) {}
}

// ============================================================================
// In-process hub
// ============================================================================

/// An outbound message recorded by [`LocalHub`].
#[derive(Debug, Clone, PartialEq)]
pub struct NetMessage {
    pub from: String,
    pub event: String,
    pub target: ClientId,
    pub args: Vec<Value>,
}

/// Shared in-process router connecting several resources.
#[derive(Default)]
pub struct LocalHub {
    kernels: DashMap<String, WeakKernel>,
    reserved: DashMap<String, Vec<String>>,
    outbox: Mutex<Vec<NetMessage>>,
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("resources", &self.kernels.len())
            .finish()
    }
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates the host view for one resource attached to this hub.
    pub fn host(self: &Arc<Self>, resource: &str) -> Arc<LocalHost> {
        Arc::new(LocalHost {
            hub: self.clone(),
            resource: resource.to_string(),
            metadata: HashMap::new(),
        })
    }

    /// Like [`LocalHub::host`] with packaging metadata.
    pub fn host_with_metadata(
        self: &Arc<Self>,
        resource: &str,
        metadata: HashMap<String, String>,
    ) -> Arc<LocalHost> {
        Arc::new(LocalHost {
            hub: self.clone(),
            resource: resource.to_string(),
            metadata,
        })
    }

    /// Channels reserved so far by `resource`, in reservation order.
    pub fn reserved_events(&self, resource: &str) -> Vec<String> {
        self.reserved
            .get(resource)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn is_reserved(&self, resource: &str, event: &str) -> bool {
        self.reserved
            .get(resource)
            .is_some_and(|r| r.iter().any(|e| e == event))
    }

    /// Drains the recorded outbound messages.
    pub fn take_outbox(&self) -> Vec<NetMessage> {
        std::mem::take(
            &mut *self
                .outbox
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Delivers an inbound networked message to `resource`.
    ///
    /// Messages for channels the resource never reserved are dropped.
    /// Returns the number of handlers that ran.
    pub fn deliver_net(
        &self,
        resource: &str,
        event: &str,
        source: ClientId,
        args: &[Value],
    ) -> usize {
        if !self.is_reserved(resource, event) {
            warn!(
                "Dropping net event \"{}\" for {}: channel not registered",
                event, resource
            );
            return 0;
        }
        match self.kernel(resource) {
            Some(kernel) => kernel.dispatch_net(event, source, args),
            None => 0,
        }
    }

    /// Sends the stop signal for `resource` to every attached kernel.
    ///
    /// Each kernel ignores signals naming another resource.
    pub async fn stop_resource(&self, resource: &str) {
        let kernels: Vec<Kernel> = self
            .kernels
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for kernel in kernels {
            kernel.handle_resource_stop(resource).await;
        }
    }

    fn kernel(&self, resource: &str) -> Option<Kernel> {
        self.kernels.get(resource).and_then(|k| k.upgrade())
    }
}

/// One resource's view of a [`LocalHub`].
pub struct LocalHost {
    hub: Arc<LocalHub>,
    resource: String,
    metadata: HashMap<String, String>,
}

impl std::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHost")
            .field("resource", &self.resource)
            .finish()
    }
}

impl LocalHost {
    pub fn hub(&self) -> &Arc<LocalHub> {
        &self.hub
    }
}

#[async_trait]
impl Host for LocalHost {
    fn resource_name(&self) -> &str {
        &self.resource
    }

    fn metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }

    fn register_net_event(&self, event: &str) {
        let mut reserved = self.hub.reserved.entry(self.resource.clone()).or_default();
        if !reserved.iter().any(|e| e == event) {
            debug!("[{}] reserved net event \"{}\"", self.resource, event);
            reserved.push(event.to_string());
        }
    }

    fn emit_net(&self, event: &str, target: ClientId, args: &[Value]) {
        self.hub
            .outbox
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(NetMessage {
                from: self.resource.clone(),
                event: event.to_string(),
                target,
                args: args.to_vec(),
            });
    }

    async fn call_export(
        &self,
        resource: &str,
        export: &str,
        args: Vec<Value>,
    ) -> Result<Value, KernelError> {
        let kernel = self
            .hub
            .kernel(resource)
            .ok_or_else(|| KernelError::ResourceNotFound(resource.to_string()))?;
        kernel.invoke_export(export, args).await
    }

    fn attach(&self, kernel: &Kernel) {
        self.hub
            .kernels
            .insert(self.resource.clone(), kernel.downgrade());
    }
}
