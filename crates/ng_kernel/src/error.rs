//! Error types for the kernel, its modules and the event bus.

/// Errors raised by a module's own code.
///
/// Modules return these from `init`, `destroy` and `call`. The kernel never
/// lets a lifecycle `ModuleError` escape `init()`/`destroy()`; they are
/// captured in the boot and teardown reports instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModuleError {
    /// Module initialization failed during boot
    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred while executing a module method
    #[error("Module execution error: {0}")]
    ExecutionError(String),
    /// Arguments passed to a method did not match what it expects
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// The module has no method with this name
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    /// Panic or other unexpected runtime condition
    #[error("Module runtime error: {0}")]
    Runtime(String),
}

/// Errors produced by listeners, hooks and net handlers.
///
/// These never reach the emitter: `emit`, `pipe` and net dispatch log them
/// and carry on with the next subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventError {
    /// Handler returned an error
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// Handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Boundary-facing errors returned to callers of the kernel surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    #[error("Module \"{0}\" not loaded")]
    ModuleNotFound(String),
    #[error("Module \"{module}\" has no method \"{method}\"")]
    MethodNotFound { module: String, method: String },
    #[error("Plugin-manager module not loaded")]
    PluginManagerNotLoaded,
    #[error("Plugin \"{0}\" not loaded")]
    PluginNotFound(String),
    #[error("Plugin \"{plugin}\" has no method \"{method}\"")]
    PluginMethodNotFound { plugin: String, method: String },
    /// An exposed entry point whose module is absent and has no fallback
    #[error("{0} module not loaded")]
    NotLoaded(String),
    #[error("Export \"{0}\" not found")]
    ExportNotFound(String),
    #[error("Resource \"{0}\" not found")]
    ResourceNotFound(String),
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl From<EventError> for ModuleError {
    fn from(err: EventError) -> Self {
        ModuleError::ExecutionError(err.to_string())
    }
}
