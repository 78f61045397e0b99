//! Cross-process call surface.
//!
//! Other isolated processes reach this one only through
//! [`Kernel::invoke_export`]. Modules in this process use
//! [`Kernel::call_module`] / [`Kernel::call_plugin`] directly, and
//! [`Kernel::use_resource`] to reach another process.

use crate::error::{KernelError, ModuleError};
use crate::host::Host;
use crate::kernel::Kernel;
use crate::plugins::PLUGIN_MANAGER;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Installed boundary entry point.
pub(crate) type ExportFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, KernelError>> + Send + Sync>;

/// Export names answered by every kernel.
pub const BUILTIN_EXPORTS: [&str; 6] = [
    "IsReady",
    "GetVersion",
    "GetModuleList",
    "GetModule",
    "CallModule",
    "CallPlugin",
];

/// Target of one exported name: a module method plus an optional fallback
/// returned while the module is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSpec {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
}

impl ExportSpec {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl From<&str> for ExportSpec {
    fn from(method: &str) -> Self {
        ExportSpec::new(method)
    }
}

impl From<String> for ExportSpec {
    fn from(method: String) -> Self {
        ExportSpec::new(method)
    }
}

/// Forwarding handle to another process's boundary surface (`Use(name)`).
///
/// Nothing is checked up front; an unknown export or a missing resource
/// surfaces as an error from [`ResourceProxy::invoke`].
#[derive(Clone)]
pub struct ResourceProxy {
    host: Arc<dyn Host>,
    resource: String,
}

impl std::fmt::Debug for ResourceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProxy")
            .field("resource", &self.resource)
            .finish()
    }
}

impl ResourceProxy {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Invokes `export` on the target process.
    pub async fn invoke(&self, export: &str, args: Vec<Value>) -> Result<Value, KernelError> {
        self.host.call_export(&self.resource, export, args).await
    }
}

fn string_arg(args: &[Value], index: usize, what: &str) -> Result<String, KernelError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            KernelError::Module(ModuleError::InvalidArguments(format!(
                "expected {} as argument {}",
                what, index
            )))
        })
}

impl Kernel {
    /// Installs boundary entry points forwarding to `module_name`.
    ///
    /// The module is resolved on every call, so exposing a module before it
    /// has booted is fine. While it is absent, a call returns the export's
    /// fallback if one was configured, otherwise [`KernelError::NotLoaded`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ng_kernel::{ExportSpec, Kernel, KernelConfig, LocalHub};
    /// use serde_json::json;
    ///
    /// let hub = LocalHub::new();
    /// let kernel = Kernel::new(hub.host("ng_core"), KernelConfig::default());
    /// kernel.expose(
    ///     "spawn",
    ///     [
    ///         ("GetSpawnPoints", ExportSpec::new("points").with_fallback(json!([]))),
    ///         ("SpawnPlayer", ExportSpec::from("spawn")),
    ///     ],
    /// );
    /// ```
    pub fn expose<I, K, S>(&self, module_name: &str, mapping: I)
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<ExportSpec>,
    {
        for (export, spec) in mapping {
            let export = export.into();
            let spec: ExportSpec = spec.into();
            let module = module_name.to_string();
            let weak = self.downgrade();

            let entry: ExportFn = Arc::new(move |args: Vec<Value>| {
                let kernel = weak.upgrade();
                let module = module.clone();
                let spec = spec.clone();
                async move {
                    let Some(kernel) = kernel else {
                        return Err(KernelError::NotLoaded(module));
                    };
                    if kernel.get_module(&module).is_none() {
                        return match spec.fallback {
                            Some(fallback) => Ok(fallback),
                            None => Err(KernelError::NotLoaded(module)),
                        };
                    }
                    kernel.call_module(&module, &spec.method, args).await
                }
                .boxed()
            });

            debug!("[Kernel] exposing \"{}\" → {}", export, module_name);
            self.inner.exports.insert(export, entry);
        }
    }

    /// Names installed through [`Kernel::expose`].
    pub fn exports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.exports.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Boundary entry point used by other processes.
    ///
    /// Exposed names shadow the built-in exports.
    pub async fn invoke_export(&self, export: &str, args: Vec<Value>) -> Result<Value, KernelError> {
        let exposed = self.inner.exports.get(export).map(|e| e.value().clone());
        if let Some(entry) = exposed {
            return entry(args).await;
        }

        match export {
            "IsReady" => Ok(json!(self.is_ready())),
            "GetVersion" => Ok(json!(self.version())),
            "GetModuleList" => Ok(json!(self.list())),
            "GetModule" => {
                let name = string_arg(&args, 0, "module name")?;
                Ok(match self.get_module(&name) {
                    Some(_) => json!(name),
                    None => Value::Null,
                })
            }
            "CallModule" => {
                let module = string_arg(&args, 0, "module name")?;
                let method = string_arg(&args, 1, "method name")?;
                self.call_module(&module, &method, args.into_iter().skip(2).collect())
                    .await
            }
            "CallPlugin" => {
                let plugin = string_arg(&args, 0, "plugin name")?;
                let method = string_arg(&args, 1, "method name")?;
                self.call_plugin(&plugin, &method, args.into_iter().skip(2).collect())
                    .await
            }
            other => Err(KernelError::ExportNotFound(other.to_string())),
        }
    }

    /// Invokes `method` on an active module of this process.
    pub async fn call_module(
        &self,
        module: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, KernelError> {
        let instance = self
            .get_module(module)
            .ok_or_else(|| KernelError::ModuleNotFound(module.to_string()))?;
        if !instance.has_method(method) {
            return Err(KernelError::MethodNotFound {
                module: module.to_string(),
                method: method.to_string(),
            });
        }
        Ok(instance.call(method, args).await?)
    }

    /// Like [`Kernel::call_module`], resolved through the plugin manager's
    /// directory.
    pub async fn call_plugin(
        &self,
        plugin: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, KernelError> {
        let manager = self
            .get_module(PLUGIN_MANAGER)
            .ok_or(KernelError::PluginManagerNotLoaded)?;
        let directory = manager
            .as_plugin_host()
            .ok_or(KernelError::PluginManagerNotLoaded)?;
        let instance = directory
            .plugin(plugin)
            .ok_or_else(|| KernelError::PluginNotFound(plugin.to_string()))?;
        if !instance.has_method(method) {
            return Err(KernelError::PluginMethodNotFound {
                plugin: plugin.to_string(),
                method: method.to_string(),
            });
        }
        Ok(instance.call(method, args).await?)
    }

    /// Returns a forwarding handle to another process's boundary surface.
    pub fn use_resource(&self, resource: &str) -> ResourceProxy {
        ResourceProxy {
            host: self.inner.host.clone(),
            resource: resource.to_string(),
        }
    }
}
