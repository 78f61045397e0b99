//! # NextGen Module Kernel
//!
//! A process-local orchestrator for independently authored feature modules.
//! Modules register with a shared [`Kernel`], get initialized in a safe
//! dependency order, talk through an [`EventBus`], and are reachable from
//! other isolated host processes through a uniform call surface.
//!
//! ## Core Features
//!
//! - **Priority Boot**: initializers run one at a time, lowest priority first,
//!   ties in registration order
//! - **Reverse Teardown**: finalizers run in the exact reverse of the realized
//!   boot order
//! - **Partial Availability**: a failing module is logged and excluded while
//!   its siblings keep booting
//! - **Event Bus**: synchronous fan-out plus asynchronous transform pipelines
//! - **Boundary Surface**: `CallModule`, `CallPlugin`, `expose` and
//!   `use_resource` resolve everything by name at call time
//! - **Hookable Logger**: level-filtered diagnostics forwarded to hooks
//!
//! ## Quick Start Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use ng_kernel::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Database;
//!
//! #[async_trait]
//! impl Module for Database {
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::LIFECYCLE
//!     }
//!
//!     async fn init(&self, kernel: &Kernel) -> Result<(), ModuleError> {
//!         kernel.log().info("database connected");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = LocalHub::new();
//!     let kernel = Kernel::new(hub.host("ng_core"), KernelConfig::default());
//!
//!     kernel.register_with_priority("db", Arc::new(Database), 0);
//!     kernel.register("config", Arc::new(ConfigModule::new(json!({ "slots": 64 }))));
//!
//!     let report = kernel.init().await;
//!     assert!(report.is_clean());
//!     assert_eq!(kernel.list(), vec!["config", "db"]);
//!
//!     kernel.handle_resource_stop("ng_core").await;
//!     assert!(!kernel.is_ready());
//! }
//! ```

pub mod boundary;
pub mod error;
pub mod events;
pub mod host;
pub mod kernel;
pub mod logger;
pub mod module;
pub mod net;
pub mod plugins;
pub mod utils;

pub use boundary::{ExportSpec, ResourceProxy, BUILTIN_EXPORTS};
pub use error::{EventError, KernelError, ModuleError};
pub use events::{EventBus, EventBusStats, Hook, Listener, Subscription};
pub use host::{ClientId, Host, LocalHost, LocalHub, NetMessage, BROADCAST};
pub use kernel::{
    BootReport, Kernel, KernelConfig, ModuleFailure, Phase, TeardownReport, WeakKernel,
    DEFAULT_PRIORITY, UNKNOWN_VERSION,
};
pub use logger::{Level, LogEntry, LogSink, Logger, TracingSink, CONSOLE_TARGET};
pub use module::{Capabilities, ConfigModule, Module, PluginHost};
pub use plugins::{PluginManager, PluginStats, PLUGIN_MANAGER};

/// Kernel crate version, reported by the binary at startup.
pub const NG_KERNEL_VERSION: &str = env!("CARGO_PKG_VERSION");
