//! Main application entry point for the ng_core resource process.
//!
//! Loads configuration, installs logging, builds the module kernel, registers
//! the built-in modules, boots, and tears down when this resource is told to
//! stop.

mod cli;
mod config;
mod signals;

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use ng_kernel::{
    ConfigModule, Kernel, KernelConfig, Level, LocalHub, PluginManager, CONSOLE_TARGET,
    NG_KERNEL_VERSION, PLUGIN_MANAGER,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Priority of the plugin manager; plugins often depend on configuration
/// modules, which are passive and therefore already available.
const PLUGIN_MANAGER_PRIORITY: i32 = 50;

// ============================================================================
// Logging Setup
// ============================================================================

/// Maps a kernel level onto the closest `tracing` filter directive.
fn tracing_level(level: Level) -> &'static str {
    match level {
        Level::Trace => "trace",
        Level::Debug => "debug",
        Level::Info | Level::Success => "info",
        Level::Warn => "warn",
        Level::Error | Level::Fatal => "error",
    }
}

/// Builds the subscriber filter. The kernel logger does its own threshold
/// filtering, so its console target is always let through.
fn build_filter(level: Level) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level(level)))
        .add_directive(format!("{}=trace", CONSOLE_TARGET).parse()?);
    Ok(filter)
}

/// Initialize logging system
fn setup_logging(
    config: &LoggingSettings,
    level: Level,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = tracing_subscriber::registry().with(build_filter(level)?);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?;
    }

    info!("Logging initialized with level: {}", level);
    Ok(())
}

// ============================================================================
// Application
// ============================================================================

/// The running resource: configuration plus the kernel built from it.
pub struct Application {
    config: AppConfig,
    kernel: Kernel,
}

impl Application {
    /// Builds the kernel and registers the built-in modules. Does not boot.
    pub fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let level = config.log_level()?;
        let hub = LocalHub::new();
        let host = hub.host_with_metadata(&config.resource.name, config.metadata());
        let kernel = Kernel::new(host, KernelConfig { log_level: level });

        for (name, values) in config.passive_modules()? {
            kernel.register(&name, Arc::new(ConfigModule::new(values)));
        }
        kernel.register_with_priority(
            PLUGIN_MANAGER,
            Arc::new(PluginManager::new()),
            PLUGIN_MANAGER_PRIORITY,
        );

        Ok(Self { config, kernel })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Boots the kernel, then waits for a termination signal and tears down.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let kernel = self.kernel();
        let resource = &self.config.resource.name;
        info!(
            "Starting resource {} v{} (kernel v{})",
            resource,
            kernel.version(),
            NG_KERNEL_VERSION
        );

        let report = kernel.init().await;
        for failure in &report.failed {
            warn!("Module {} unavailable: {}", failure.name, failure.error);
        }
        let ready = kernel.list();
        kernel
            .log()
            .success(&format!("{} modules ready: {}", ready.len(), ready.join(", ")));

        if let Some(teardown) = signals::wait_for_stop(kernel, resource).await? {
            for failure in &teardown.failed {
                warn!("Module {} did not shut down cleanly: {}", failure.name, failure.error);
            }
            info!("{} modules stopped", teardown.destroyed.len());
        }
        Ok(())
    }
}

// ============================================================================
// Entry Point
// ============================================================================

async fn start(args: CliArgs) -> Result<Application, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_cli(&args);

    if let Err(e) = config.validate() {
        return Err(format!("Configuration validation failed: {}", e).into());
    }

    setup_logging(&config.logging, config.log_level()?)?;
    info!("Config: {}", args.config_path.display());

    Application::new(config)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match start(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to start ng_core: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_passive() -> AppConfig {
        let mut config = AppConfig::default();
        config.resource.version = "1.2.3".to_string();
        config.modules.passive.insert(
            "spawn".to_string(),
            toml::Value::Array(vec![toml::Value::Integer(7)]),
        );
        config
    }

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(tracing_level(Level::Success), "info");
        assert_eq!(tracing_level(Level::Fatal), "error");
        assert_eq!(tracing_level(Level::Trace), "trace");
    }

    #[tokio::test]
    async fn test_builtin_modules_registered() {
        let app = Application::new(config_with_passive()).unwrap();
        let kernel = app.kernel();

        // passive configuration is reachable before boot
        assert!(kernel.get_module("spawn").is_some());
        assert_eq!(kernel.pending(), vec![PLUGIN_MANAGER]);
        assert_eq!(kernel.version(), "1.2.3");

        let report = kernel.init().await;
        assert!(report.is_clean());
        assert_eq!(kernel.list(), vec!["spawn", PLUGIN_MANAGER]);
        assert_eq!(
            kernel
                .invoke_export("CallModule", vec![json!("spawn"), json!("all")])
                .await
                .unwrap(),
            json!([7])
        );
        assert_eq!(
            kernel
                .invoke_export("CallModule", vec![json!(PLUGIN_MANAGER), json!("count")])
                .await
                .unwrap(),
            json!(0)
        );
    }

    #[tokio::test]
    async fn test_stop_for_other_resource_keeps_running() {
        let app = Application::new(AppConfig::default()).unwrap();
        app.kernel().init().await;

        assert!(app.kernel().handle_resource_stop("ng_garage").await.is_none());
        assert!(app.kernel().is_ready());
        assert!(app.kernel().handle_resource_stop("ng_core").await.is_some());
        assert!(!app.kernel().is_ready());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(Application::new(config).is_err());
    }
}
