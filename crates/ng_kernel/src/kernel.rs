//! Module registry: registration, priority-ordered boot, reverse teardown
//! and the name → instance directory.
//!
//! The kernel is an explicit context object. It is constructed once at
//! process start and handed to every module (modules receive it in
//! [`Module::init`]). `Kernel` itself is a cheap clonable handle.
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──register──▶ Registering ──init()──▶ Initializing ──▶ Ready
//!   ▲                                                            │
//!   └──────────────────────── Destroying ◀──────destroy()────────┘
//! ```
//!
//! Boot runs every pending initializer strictly one at a time, in ascending
//! priority with ties kept in registration order. A module of priority `N`
//! can therefore look up every module of priority `< N` from its own `init`.
//! Teardown walks the realized order backwards.

use crate::boundary::ExportFn;
use crate::error::ModuleError;
use crate::events::EventBus;
use crate::host::Host;
use crate::logger::{Level, Logger};
use crate::module::Module;
use crate::net::NetRouter;
use crate::utils::panic_message;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, error, info, warn};

/// Priority used when a module does not specify one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Version reported when the host has no packaging metadata.
pub const UNKNOWN_VERSION: &str = "0.0.0";

/// Kernel lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Registering,
    Initializing,
    Ready,
    Destroying,
}

/// Boot-time settings for a kernel.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    /// Initial logger threshold
    pub log_level: Level,
}

/// A module whose initializer or finalizer failed.
#[derive(Debug, Clone)]
pub struct ModuleFailure {
    pub name: String,
    pub error: ModuleError,
}

/// Per-module outcome of [`Kernel::init`].
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    /// Modules initialized during this boot, in initialization order
    pub loaded: Vec<String>,
    pub failed: Vec<ModuleFailure>,
}

impl BootReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-module outcome of [`Kernel::destroy`].
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Modules removed from the directory, in teardown order
    pub destroyed: Vec<String>,
    pub failed: Vec<ModuleFailure>,
}

struct PendingModule {
    name: String,
    instance: Arc<dyn Module>,
    priority: i32,
}

struct Registry {
    phase: Phase,
    modules: HashMap<String, Arc<dyn Module>>,
    /// Directory insertion order, i.e. the realized initialization order
    order: Vec<String>,
    pending: Vec<PendingModule>,
    /// Names taken out of `pending` whose initializer has not finished yet
    in_flight: HashSet<String>,
    /// Names whose initializer failed during the current boot
    failed: HashSet<String>,
}

impl Registry {
    fn new() -> Self {
        Self {
            phase: Phase::Empty,
            modules: HashMap::new(),
            order: Vec::new(),
            pending: Vec::new(),
            in_flight: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    fn is_taken(&self, name: &str) -> bool {
        self.modules.contains_key(name)
            || self.in_flight.contains(name)
            || self.failed.contains(name)
            || self.pending.iter().any(|p| p.name == name)
    }

    /// Inserts into the directory. Returns false if `name` is already active.
    fn activate(&mut self, name: String, instance: Arc<dyn Module>) -> bool {
        if self.modules.contains_key(&name) {
            return false;
        }
        self.order.push(name.clone());
        self.modules.insert(name, instance);
        true
    }

    /// Moves the whole queue into the running batch.
    fn take_batch(&mut self) -> Vec<PendingModule> {
        let batch = std::mem::take(&mut self.pending);
        self.in_flight
            .extend(batch.iter().map(|entry| entry.name.clone()));
        batch
    }
}

pub(crate) struct KernelInner {
    pub(crate) host: Arc<dyn Host>,
    resource: String,
    version: String,
    events: EventBus,
    log: Logger,
    registry: RwLock<Registry>,
    pub(crate) exports: DashMap<String, ExportFn>,
    pub(crate) net: NetRouter,
}

/// Handle to the module kernel. Clones share all state.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
}

/// Non-owning kernel handle held by hosts and exported entry points.
#[derive(Clone)]
pub struct WeakKernel(Weak<KernelInner>);

impl WeakKernel {
    pub fn upgrade(&self) -> Option<Kernel> {
        self.0.upgrade().map(|inner| Kernel { inner })
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("resource", &self.inner.resource)
            .field("version", &self.inner.version)
            .field("phase", &self.phase())
            .field("modules", &self.list())
            .finish()
    }
}

impl Kernel {
    /// Creates a kernel for the host's current resource.
    ///
    /// The version is read once from the host's `version` metadata.
    pub fn new(host: Arc<dyn Host>, config: KernelConfig) -> Self {
        let logger = Logger::new(host.resource_name(), config.log_level);
        Self::with_logger(host, logger)
    }

    /// Creates a kernel with a preconfigured logger.
    pub fn with_logger(host: Arc<dyn Host>, log: Logger) -> Self {
        let resource = host.resource_name().to_string();
        let version = host
            .metadata("version")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let kernel = Self {
            inner: Arc::new(KernelInner {
                host,
                resource,
                version,
                events: EventBus::new(),
                log,
                registry: RwLock::new(Registry::new()),
                exports: DashMap::new(),
                net: NetRouter::default(),
            }),
        };
        kernel.inner.host.attach(&kernel);
        kernel
    }

    pub fn downgrade(&self) -> WeakKernel {
        WeakKernel(Arc::downgrade(&self.inner))
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers `instance` under `name` with [`DEFAULT_PRIORITY`].
    pub fn register(&self, name: &str, instance: Arc<dyn Module>) -> bool {
        self.register_with_priority(name, instance, DEFAULT_PRIORITY)
    }

    /// Registers a module.
    ///
    /// - The first registration of a name wins; later ones are logged and
    ///   ignored, and `false` is returned.
    /// - Declared net events are reserved on the host before this returns.
    /// - Modules declaring an initializer are queued for [`Kernel::init`];
    ///   passive modules enter the directory immediately.
    ///
    /// A module queued after the kernel is `Ready` stays pending until the
    /// next boot.
    pub fn register_with_priority(
        &self,
        name: &str,
        instance: Arc<dyn Module>,
        priority: i32,
    ) -> bool {
        let capabilities = instance.capabilities();
        let net_events = instance.net_events();

        {
            let mut registry = self.write();
            if registry.phase == Phase::Destroying {
                warn!("[Kernel] \"{}\" registered during teardown, skipping", name);
                return false;
            }
            if registry.is_taken(name) {
                warn!("[Kernel] \"{}\" already registered, skipping", name);
                return false;
            }

            if capabilities.init {
                if registry.phase == Phase::Ready {
                    warn!(
                        "[Kernel] \"{}\" registered after boot; it stays pending until the next init()",
                        name
                    );
                }
                registry.pending.push(PendingModule {
                    name: name.to_string(),
                    instance,
                    priority,
                });
            } else {
                registry.activate(name.to_string(), instance);
                debug!("[Kernel] Passive module \"{}\" stored", name);
            }

            if registry.phase == Phase::Empty {
                registry.phase = Phase::Registering;
            }
        }

        for event in &net_events {
            self.inner.host.register_net_event(event);
        }
        true
    }

    // ========================================================================
    // Boot and teardown
    // ========================================================================

    /// Initializes every pending module in ascending priority order.
    ///
    /// Idempotent: returns an empty report when the kernel is already
    /// initializing or ready. Failures are captured per module and never
    /// abort the boot. Modules registered from inside an initializer are
    /// picked up in a follow-up round.
    pub async fn init(&self) -> BootReport {
        {
            let mut registry = self.write();
            match registry.phase {
                Phase::Initializing | Phase::Ready | Phase::Destroying => {
                    return BootReport::default()
                }
                Phase::Empty | Phase::Registering => registry.phase = Phase::Initializing,
            }
        }

        let mut report = BootReport::default();
        loop {
            let mut batch = self.write().take_batch();
            if batch.is_empty() {
                break;
            }
            // stable: equal priorities keep registration order
            batch.sort_by_key(|entry| entry.priority);

            for entry in batch {
                self.init_one(entry, &mut report).await;
            }
        }

        let count = {
            let mut registry = self.write();
            registry.phase = Phase::Ready;
            registry.modules.len()
        };
        info!("[Kernel] Ready ({} modules)", count);
        self.inner.events.emit("kernel/ready", &[json!(self.list())]);
        report
    }

    async fn init_one(&self, entry: PendingModule, report: &mut BootReport) {
        let PendingModule {
            name,
            instance,
            priority,
        } = entry;

        let outcome = AssertUnwindSafe(instance.init(self)).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(ModuleError::Runtime(panic_message(payload))),
        };

        let mut registry = self.write();
        registry.in_flight.remove(&name);
        let result = result.and_then(|()| {
            if registry.activate(name.clone(), instance) {
                Ok(())
            } else {
                Err(ModuleError::InitializationFailed(
                    "name already active".to_string(),
                ))
            }
        });
        match result {
            Ok(()) => {
                drop(registry);
                info!("[Kernel] Module \"{}\" loaded (priority {})", name, priority);
                self.inner
                    .events
                    .emit("kernel/module_loaded", &[json!(name), json!(priority)]);
                report.loaded.push(name);
            }
            Err(error) => {
                registry.failed.insert(name.clone());
                drop(registry);
                error!("[Kernel] ERROR loading module \"{}\": {}", name, error);
                report.failed.push(ModuleFailure { name, error });
            }
        }
    }

    /// Finalizes every active module in reverse initialization order.
    ///
    /// No-op unless the kernel is `Ready`. A failing finalizer is logged and
    /// does not stop the remaining ones. Afterwards the directory and the
    /// event bus are cleared.
    pub async fn destroy(&self) -> TeardownReport {
        let modules: Vec<(String, Arc<dyn Module>)> = {
            let mut registry = self.write();
            if registry.phase != Phase::Ready {
                return TeardownReport::default();
            }
            registry.phase = Phase::Destroying;
            registry
                .order
                .iter()
                .rev()
                .filter_map(|name| {
                    registry
                        .modules
                        .get(name)
                        .map(|m| (name.clone(), m.clone()))
                })
                .collect()
        };

        let mut report = TeardownReport::default();
        for (name, instance) in modules {
            if instance.capabilities().destroy {
                let outcome = AssertUnwindSafe(instance.destroy()).catch_unwind().await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(payload) => Err(ModuleError::Runtime(panic_message(payload))),
                };
                if let Err(error) = result {
                    error!("[Kernel] ERROR destroying module \"{}\": {}", name, error);
                    report.failed.push(ModuleFailure {
                        name: name.clone(),
                        error,
                    });
                }
            }
            info!("[Kernel] Module \"{}\" destroyed", name);
            report.destroyed.push(name);
        }

        {
            let mut registry = self.write();
            registry.modules.clear();
            registry.order.clear();
            registry.failed.clear();
            registry.phase = if registry.pending.is_empty() {
                Phase::Empty
            } else {
                Phase::Registering
            };
            registry.in_flight.clear();
        }
        self.inner.events.clear();
        report
    }

    /// Handles the host's "stop this process" signal.
    ///
    /// Tears down only when `resource` names this kernel's own resource.
    pub async fn handle_resource_stop(&self, resource: &str) -> Option<TeardownReport> {
        if resource != self.inner.resource {
            return None;
        }
        Some(self.destroy().await)
    }

    // ========================================================================
    // Directory and introspection
    // ========================================================================

    /// Returns the active instance registered under `name`, if any.
    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.read().modules.get(name).cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.read().phase == Phase::Ready
    }

    pub fn phase(&self) -> Phase {
        self.read().phase
    }

    /// Active module names in directory order.
    pub fn list(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Names still waiting for an initializer run.
    pub fn pending(&self) -> Vec<String> {
        self.read().pending.iter().map(|p| p.name.clone()).collect()
    }

    pub fn resource_name(&self) -> &str {
        &self.inner.resource
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn log(&self) -> &Logger {
        &self.inner.log
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.inner.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHub;
    use crate::module::Capabilities;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_init: bool,
    }

    #[async_trait]
    impl Module for Recorder {
        fn capabilities(&self) -> Capabilities {
            Capabilities::LIFECYCLE
        }

        async fn init(&self, _kernel: &Kernel) -> Result<(), ModuleError> {
            self.journal.lock().unwrap().push(format!("init:{}", self.name));
            if self.fail_init {
                return Err(ModuleError::InitializationFailed("boom".to_string()));
            }
            Ok(())
        }

        async fn destroy(&self) -> Result<(), ModuleError> {
            self.journal.lock().unwrap().push(format!("destroy:{}", self.name));
            Ok(())
        }
    }

    struct Passive;
    impl Module for Passive {}

    fn kernel() -> Kernel {
        let hub = LocalHub::new();
        Kernel::new(hub.host("ng_core"), KernelConfig::default())
    }

    fn recorder(name: &'static str, journal: &Journal) -> Arc<dyn Module> {
        Arc::new(Recorder {
            name,
            journal: journal.clone(),
            fail_init: false,
        })
    }

    #[tokio::test]
    async fn test_phases() {
        let kernel = kernel();
        assert_eq!(kernel.phase(), Phase::Empty);

        let journal = Journal::default();
        kernel.register("a", recorder("a", &journal));
        assert_eq!(kernel.phase(), Phase::Registering);

        kernel.init().await;
        assert_eq!(kernel.phase(), Phase::Ready);
        assert!(kernel.is_ready());

        kernel.destroy().await;
        assert_eq!(kernel.phase(), Phase::Empty);
        assert!(!kernel.is_ready());
        assert!(kernel.list().is_empty());
    }

    #[tokio::test]
    async fn test_passive_module_available_before_boot() {
        let kernel = kernel();
        assert!(kernel.register("config", Arc::new(Passive)));
        assert!(kernel.get_module("config").is_some());
        assert!(!kernel.is_ready());
    }

    #[tokio::test]
    async fn test_duplicate_pending_name_rejected() {
        let kernel = kernel();
        let journal = Journal::default();
        assert!(kernel.register("a", recorder("first", &journal)));
        assert!(!kernel.register("a", recorder("second", &journal)));

        kernel.init().await;
        assert_eq!(*journal.lock().unwrap(), vec!["init:first"]);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let kernel = kernel();
        let journal = Journal::default();
        kernel.register("a", recorder("a", &journal));

        let first = kernel.init().await;
        let second = kernel.init().await;
        assert_eq!(first.loaded, vec!["a"]);
        assert!(second.loaded.is_empty());
        assert_eq!(journal.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_noop_unless_ready() {
        let kernel = kernel();
        let journal = Journal::default();
        kernel.register("a", recorder("a", &journal));

        let report = kernel.destroy().await;
        assert!(report.destroyed.is_empty());
        assert_eq!(kernel.pending(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_late_registration_stays_pending() {
        let kernel = kernel();
        let journal = Journal::default();
        kernel.init().await;

        assert!(kernel.register("late", recorder("late", &journal)));
        assert!(kernel.get_module("late").is_none());
        assert_eq!(kernel.pending(), vec!["late"]);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_module_name_stays_taken_for_this_boot() {
        let kernel = kernel();
        let journal = Journal::default();
        kernel.register(
            "bad",
            Arc::new(Recorder {
                name: "bad",
                journal: journal.clone(),
                fail_init: true,
            }),
        );
        let report = kernel.init().await;
        assert_eq!(report.failed.len(), 1);
        assert!(!kernel.register("bad", Arc::new(Passive)));
        assert!(kernel.get_module("bad").is_none());
    }

    #[tokio::test]
    async fn test_panicking_init_is_captured() {
        struct Explodes;

        #[async_trait]
        impl Module for Explodes {
            fn capabilities(&self) -> Capabilities {
                Capabilities::INIT_ONLY
            }

            async fn init(&self, _kernel: &Kernel) -> Result<(), ModuleError> {
                panic!("init exploded");
            }
        }

        let kernel = kernel();
        kernel.register("explodes", Arc::new(Explodes));
        kernel.register("passive", Arc::new(Passive));

        let report = kernel.init().await;
        assert!(matches!(
            &report.failed[0].error,
            ModuleError::Runtime(msg) if msg == "init exploded"
        ));
        assert!(kernel.is_ready());
        assert_eq!(kernel.list(), vec!["passive"]);
    }

    #[tokio::test]
    async fn test_module_registered_during_init_runs_in_follow_up_round() {
        struct Spawner {
            journal: Journal,
        }

        #[async_trait]
        impl Module for Spawner {
            fn capabilities(&self) -> Capabilities {
                Capabilities::INIT_ONLY
            }

            async fn init(&self, kernel: &Kernel) -> Result<(), ModuleError> {
                kernel.register_with_priority("child", recorder("child", &self.journal), 0);
                Ok(())
            }
        }

        let kernel = kernel();
        let journal = Journal::default();
        kernel.register_with_priority(
            "spawner",
            Arc::new(Spawner {
                journal: journal.clone(),
            }),
            5,
        );
        kernel.register_with_priority("sibling", recorder("sibling", &journal), 7);

        let report = kernel.init().await;
        assert_eq!(report.loaded, vec!["spawner", "sibling", "child"]);
    }

    #[tokio::test]
    async fn test_name_of_running_batch_cannot_be_reregistered_from_init() {
        struct Shadower {
            accepted: Arc<Mutex<Option<bool>>>,
        }

        #[async_trait]
        impl Module for Shadower {
            fn capabilities(&self) -> Capabilities {
                Capabilities::INIT_ONLY
            }

            async fn init(&self, kernel: &Kernel) -> Result<(), ModuleError> {
                // "cache" is queued later in the same batch
                let accepted = kernel.register("cache", Arc::new(Passive));
                *self.accepted.lock().unwrap() = Some(accepted);
                Ok(())
            }
        }

        let kernel = kernel();
        let journal = Journal::default();
        let accepted = Arc::new(Mutex::new(None));
        kernel.register_with_priority(
            "db",
            Arc::new(Shadower {
                accepted: accepted.clone(),
            }),
            0,
        );
        kernel.register_with_priority("cache", recorder("cache", &journal), 5);

        let report = kernel.init().await;
        assert!(report.is_clean());
        assert_eq!(*accepted.lock().unwrap(), Some(false));
        assert_eq!(kernel.list(), vec!["db", "cache"]);

        let teardown = kernel.destroy().await;
        assert_eq!(teardown.destroyed, vec!["cache", "db"]);
        assert_eq!(*journal.lock().unwrap(), vec!["init:cache", "destroy:cache"]);
    }

    #[tokio::test]
    async fn test_activate_refuses_active_name() {
        let mut registry = Registry::new();
        assert!(registry.activate("config".to_string(), Arc::new(Passive)));
        assert!(!registry.activate("config".to_string(), Arc::new(Passive)));
        assert_eq!(registry.order, vec!["config"]);
    }

    #[tokio::test]
    async fn test_version_from_host_metadata() {
        let hub = LocalHub::new();
        let mut metadata = Map::new();
        metadata.insert("version".to_string(), "1.4.2".to_string());
        let kernel = Kernel::new(
            hub.host_with_metadata("ng_core", metadata),
            KernelConfig::default(),
        );
        assert_eq!(kernel.version(), "1.4.2");

        let bare = Kernel::new(hub.host("other"), KernelConfig::default());
        assert_eq!(bare.version(), UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_stop_signal_for_other_resource_is_ignored() {
        let kernel = kernel();
        let journal = Journal::default();
        kernel.register("a", recorder("a", &journal));
        kernel.init().await;

        assert!(kernel.handle_resource_stop("someone_else").await.is_none());
        assert!(kernel.is_ready());

        let report = kernel.handle_resource_stop("ng_core").await.unwrap();
        assert_eq!(report.destroyed, vec!["a"]);
        assert!(!kernel.is_ready());
    }

    #[tokio::test]
    async fn test_destroy_clears_event_bus() {
        let kernel = kernel();
        kernel.events().on("player/spawned", |_| Ok(()));
        kernel.init().await;
        kernel.destroy().await;
        assert_eq!(kernel.events().listener_count("player/spawned"), 0);
    }
}
