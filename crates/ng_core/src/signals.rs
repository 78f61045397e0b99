//! Maps process termination signals to the kernel's resource-stop trigger.
//!
//! The host tells a kernel to stop by naming a resource. For a standalone
//! process, SIGINT/SIGTERM (Ctrl+C on Windows) means "stop this resource".

use ng_kernel::{Kernel, TeardownReport};
use std::future::Future;
use tokio::signal;
use tracing::info;

/// Waits for a termination signal, then delivers a stop for `resource`.
///
/// Returns the teardown report when the kernel was torn down, `None` when
/// `resource` is not the kernel's own or the kernel was not running.
pub async fn wait_for_stop(
    kernel: &Kernel,
    resource: &str,
) -> Result<Option<TeardownReport>, Box<dyn std::error::Error>> {
    stop_on(termination_signal(), kernel, resource).await
}

/// Delivers a stop for `resource` once `trigger` completes.
pub async fn stop_on<F>(
    trigger: F,
    kernel: &Kernel,
    resource: &str,
) -> Result<Option<TeardownReport>, Box<dyn std::error::Error>>
where
    F: Future<Output = Result<&'static str, std::io::Error>>,
{
    let source = trigger.await?;
    info!("Received {}, stopping {}", source, resource);

    let teardown = kernel.handle_resource_stop(resource).await;
    if teardown.is_none() {
        info!("Resource {} was not running", resource);
    }
    Ok(teardown)
}

/// Resolves with the name of the first termination signal received.
async fn termination_signal() -> Result<&'static str, std::io::Error> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => Ok("SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}
