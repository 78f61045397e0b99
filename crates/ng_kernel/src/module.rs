//! The module contract every feature module implements to register with the
//! kernel.
//!
//! Capability detection is explicit: a module declares through
//! [`Module::capabilities`] whether it has an initializer and a finalizer, and
//! the kernel branches on those flags instead of probing the instance.

use crate::error::ModuleError;
use crate::kernel::Kernel;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Lifecycle capabilities declared by a module at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The module must be initialized during boot before it is reachable
    pub init: bool,
    /// The module must be finalized during teardown
    pub destroy: bool,
}

impl Capabilities {
    /// Plain configuration or a stateless utility; reachable as soon as it
    /// is registered.
    pub const PASSIVE: Capabilities = Capabilities {
        init: false,
        destroy: false,
    };

    /// Initialized during boot and finalized during teardown.
    pub const LIFECYCLE: Capabilities = Capabilities {
        init: true,
        destroy: true,
    };

    /// Initialized during boot, nothing to finalize.
    pub const INIT_ONLY: Capabilities = Capabilities {
        init: true,
        destroy: false,
    };
}

/// A named unit registered with the [`Kernel`].
///
/// Every method has a default, so a passive module only needs to answer
/// calls. Modules are shared behind `Arc`, so state lives behind interior
/// mutability.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use ng_kernel::{Capabilities, Kernel, Module, ModuleError};
/// use serde_json::{json, Value};
///
/// struct Economy;
///
/// #[async_trait]
/// impl Module for Economy {
///     fn capabilities(&self) -> Capabilities {
///         Capabilities::INIT_ONLY
///     }
///
///     fn net_events(&self) -> Vec<String> {
///         vec!["economy:transfer".to_string()]
///     }
///
///     async fn init(&self, kernel: &Kernel) -> Result<(), ModuleError> {
///         kernel.log().info("economy ready");
///         Ok(())
///     }
///
///     fn has_method(&self, method: &str) -> bool {
///         method == "balance"
///     }
///
///     async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, ModuleError> {
///         match method {
///             "balance" => Ok(json!(5000)),
///             other => Err(ModuleError::UnknownMethod(other.to_string())),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities {
        Capabilities::PASSIVE
    }

    /// External channels reserved synchronously at registration time.
    fn net_events(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once during boot when `capabilities().init` is set.
    async fn init(&self, _kernel: &Kernel) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called once during teardown when `capabilities().destroy` is set.
    async fn destroy(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Whether `method` can be dispatched through [`Module::call`].
    fn has_method(&self, _method: &str) -> bool {
        false
    }

    /// Dispatches a named method with JSON arguments.
    async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, ModuleError> {
        Err(ModuleError::UnknownMethod(method.to_string()))
    }

    /// Exposes a plugin directory when this module manages plugins.
    fn as_plugin_host(&self) -> Option<&dyn PluginHost> {
        None
    }
}

/// A secondary named directory, resolved by `CallPlugin`.
pub trait PluginHost: Send + Sync {
    fn plugin(&self, name: &str) -> Option<Arc<dyn Module>>;
}

/// Passive module wrapping a JSON document, typically configuration.
///
/// Answers `get(key)` with the value at `key` (or null) and `all()` with the
/// whole document.
#[derive(Debug, Clone)]
pub struct ConfigModule {
    values: Value,
}

impl ConfigModule {
    pub fn new(values: Value) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

#[async_trait]
impl Module for ConfigModule {
    fn has_method(&self, method: &str) -> bool {
        matches!(method, "get" | "all")
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ModuleError> {
        match method {
            "get" => {
                let key = args.first().and_then(Value::as_str).ok_or_else(|| {
                    ModuleError::InvalidArguments("get expects a string key".to_string())
                })?;
                Ok(self.get(key).cloned().unwrap_or(Value::Null))
            }
            "all" => Ok(self.values.clone()),
            other => Err(ModuleError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_config_module_get() {
        let config = ConfigModule::new(json!({ "max_players": 32 }));
        assert_eq!(config.capabilities(), Capabilities::PASSIVE);
        assert_eq!(config.call("get", vec![json!("max_players")]).await.unwrap(), json!(32));
        assert_eq!(config.call("get", vec![json!("missing")]).await.unwrap(), Value::Null);
        assert!(matches!(
            config.call("get", vec![json!(1)]).await,
            Err(ModuleError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_default_call_is_unknown_method() {
        struct Bare;
        impl Module for Bare {}

        let bare = Bare;
        assert!(!bare.has_method("anything"));
        assert!(matches!(
            bare.call("anything", vec![]).await,
            Err(ModuleError::UnknownMethod(m)) if m == "anything"
        ));
        assert!(bare.as_plugin_host().is_none());
    }
}
