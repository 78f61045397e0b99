//! Plugin manager: a module owning a second-level directory of plugins.
//!
//! Plugins are ordinary [`Module`]s that are not registered with the kernel
//! directly. They are reached from other processes with `CallPlugin`, which
//! resolves the manager registered under [`PLUGIN_MANAGER`] and then the
//! plugin by name.

use crate::error::ModuleError;
use crate::kernel::Kernel;
use crate::module::{Capabilities, Module, PluginHost};
use crate::utils::panic_message;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

/// Conventional registration name of the plugin manager.
pub const PLUGIN_MANAGER: &str = "plugin-manager";

// ============================================================================
// Plugin Manager
// ============================================================================

struct PluginEntry {
    name: String,
    plugin: Arc<dyn Module>,
    initialized: bool,
}

#[derive(Default)]
struct PluginDirectory {
    /// Insertion order
    entries: Vec<PluginEntry>,
    /// Names whose init failed; they stay unreachable until restart
    failed: Vec<String>,
}

/// Per-plugin status reported by [`PluginManager::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct PluginStats {
    pub name: String,
    pub initialized: bool,
}

/// Manages plugin lifecycles and lookups.
///
/// Plugins are initialized one at a time in insertion order when the
/// manager itself boots, and destroyed in reverse order on teardown. Only
/// initialized plugins are reachable through [`PluginHost::plugin`].
#[derive(Default)]
pub struct PluginManager {
    directory: RwLock<PluginDirectory>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.list())
            .finish()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PluginDirectory> {
        self.directory
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PluginDirectory> {
        self.directory
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds a plugin. Returns false if the name is already taken.
    pub fn add_plugin(&self, name: &str, plugin: Arc<dyn Module>) -> bool {
        let mut directory = self.write();
        let taken = directory.entries.iter().any(|e| e.name == name)
            || directory.failed.iter().any(|f| f == name);
        if taken {
            warn!("Plugin {} is already loaded, skipping", name);
            return false;
        }
        directory.entries.push(PluginEntry {
            name: name.to_string(),
            plugin,
            initialized: false,
        });
        true
    }

    /// Plugin names in insertion order.
    pub fn list(&self) -> Vec<String> {
        self.read().entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.read().entries.len()
    }

    pub fn stats(&self) -> Vec<PluginStats> {
        self.read()
            .entries
            .iter()
            .map(|e| PluginStats {
                name: e.name.clone(),
                initialized: e.initialized,
            })
            .collect()
    }

    fn uninitialized(&self) -> Vec<(String, Arc<dyn Module>)> {
        self.read()
            .entries
            .iter()
            .filter(|e| !e.initialized)
            .map(|e| (e.name.clone(), e.plugin.clone()))
            .collect()
    }

    async fn init_plugin(&self, kernel: &Kernel, name: &str, plugin: Arc<dyn Module>) {
        let result = if plugin.capabilities().init {
            match AssertUnwindSafe(plugin.init(kernel)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(ModuleError::Runtime(panic_message(payload))),
            }
        } else {
            Ok(())
        };

        let mut directory = self.write();
        match result {
            Ok(()) => {
                if let Some(entry) = directory.entries.iter_mut().find(|e| e.name == name) {
                    entry.initialized = true;
                }
                info!("Plugin {} initialized successfully", name);
            }
            Err(e) => {
                error!("Plugin {} initialization failed: {}", name, e);
                directory.entries.retain(|entry| entry.name != name);
                directory.failed.push(name.to_string());
            }
        }
    }
}

impl PluginHost for PluginManager {
    fn plugin(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.read()
            .entries
            .iter()
            .find(|e| e.name == name && e.initialized)
            .map(|e| e.plugin.clone())
    }
}

#[async_trait]
impl Module for PluginManager {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIFECYCLE
    }

    async fn init(&self, kernel: &Kernel) -> Result<(), ModuleError> {
        let pending = self.uninitialized();
        info!("Initializing {} plugins", pending.len());
        for (name, plugin) in pending {
            self.init_plugin(kernel, &name, plugin).await;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ModuleError> {
        let entries: Vec<(String, Arc<dyn Module>)> = {
            let mut directory = self.write();
            directory.failed.clear();
            directory
                .entries
                .drain(..)
                .rev()
                .filter(|e| e.initialized)
                .map(|e| (e.name, e.plugin))
                .collect()
        };

        info!("Shutting down {} plugins", entries.len());
        for (name, plugin) in entries {
            if !plugin.capabilities().destroy {
                continue;
            }
            let result = match AssertUnwindSafe(plugin.destroy()).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(ModuleError::Runtime(panic_message(payload))),
            };
            if let Err(e) = result {
                error!("Error shutting down plugin {}: {}", name, e);
            }
        }
        info!("All plugins shut down");
        Ok(())
    }

    fn has_method(&self, method: &str) -> bool {
        matches!(method, "list" | "count" | "stats")
    }

    async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, ModuleError> {
        match method {
            "list" => Ok(json!(self.list())),
            "count" => Ok(json!(self.count())),
            "stats" => serde_json::to_value(self.stats())
                .map_err(|e| ModuleError::ExecutionError(e.to_string())),
            other => Err(ModuleError::UnknownMethod(other.to_string())),
        }
    }

    fn as_plugin_host(&self) -> Option<&dyn PluginHost> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::host::LocalHub;
    use crate::kernel::KernelConfig;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Greeter {
        name: &'static str,
        journal: Journal,
        fail: bool,
    }

    #[async_trait]
    impl Module for Greeter {
        fn capabilities(&self) -> Capabilities {
            Capabilities::LIFECYCLE
        }

        async fn init(&self, _kernel: &Kernel) -> Result<(), ModuleError> {
            self.journal.lock().unwrap().push(format!("init:{}", self.name));
            if self.fail {
                Err(ModuleError::InitializationFailed("missing locale".to_string()))
            } else {
                Ok(())
            }
        }

        async fn destroy(&self) -> Result<(), ModuleError> {
            self.journal.lock().unwrap().push(format!("destroy:{}", self.name));
            Ok(())
        }

        fn has_method(&self, method: &str) -> bool {
            method == "hello"
        }

        async fn call(&self, _method: &str, args: Vec<Value>) -> Result<Value, ModuleError> {
            let who = args.first().and_then(Value::as_str).unwrap_or("stranger");
            Ok(json!(format!("{} says hello to {}", self.name, who)))
        }
    }

    fn greeter(name: &'static str, journal: &Journal, fail: bool) -> Arc<dyn Module> {
        Arc::new(Greeter {
            name,
            journal: journal.clone(),
            fail,
        })
    }

    #[test]
    fn test_duplicate_plugin_rejected() {
        let manager = PluginManager::new();
        let journal = Journal::default();
        assert!(manager.add_plugin("greeter", greeter("a", &journal, false)));
        assert!(!manager.add_plugin("greeter", greeter("b", &journal, false)));
        assert_eq!(manager.count(), 1);
    }

    #[tokio::test]
    async fn test_call_plugin_through_kernel() {
        let kernel = Kernel::new(LocalHub::new().host("ng_core"), KernelConfig::default());
        let journal = Journal::default();
        let manager = Arc::new(PluginManager::new());
        manager.add_plugin("greeter", greeter("greeter", &journal, false));
        manager.add_plugin("broken", greeter("broken", &journal, true));
        kernel.register_with_priority(PLUGIN_MANAGER, manager.clone(), 0);
        kernel.init().await;

        assert_eq!(manager.list(), vec!["greeter"]);
        assert_eq!(
            kernel
                .invoke_export("CallPlugin", vec![json!("greeter"), json!("hello"), json!("ana")])
                .await
                .unwrap(),
            json!("greeter says hello to ana")
        );
        assert!(matches!(
            kernel.call_plugin("broken", "hello", vec![]).await,
            Err(KernelError::PluginNotFound(p)) if p == "broken"
        ));
        assert!(matches!(
            kernel.call_plugin("greeter", "wave", vec![]).await,
            Err(KernelError::PluginMethodNotFound { method, .. }) if method == "wave"
        ));
        assert_eq!(
            kernel.call_module(PLUGIN_MANAGER, "count", vec![]).await.unwrap(),
            json!(1)
        );
    }

    #[tokio::test]
    async fn test_plugins_destroyed_in_reverse_order() {
        let kernel = Kernel::new(LocalHub::new().host("ng_core"), KernelConfig::default());
        let journal = Journal::default();
        let manager = Arc::new(PluginManager::new());
        for name in ["first", "second", "third"] {
            manager.add_plugin(name, greeter(name, &journal, false));
        }
        kernel.register(PLUGIN_MANAGER, manager.clone());
        kernel.init().await;
        kernel.destroy().await;

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "init:first",
                "init:second",
                "init:third",
                "destroy:third",
                "destroy:second",
                "destroy:first"
            ]
        );
        assert_eq!(manager.count(), 0);
    }
}
