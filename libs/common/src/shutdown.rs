//! Graceful shutdown utilities
//!
//! The first Ctrl+C (or SIGTERM) asks the service to stop gracefully.
//! Operators who keep pressing Ctrl+C while connections drain get a hard exit
//! once [`FORCE_EXIT_PRESSES`] interrupts have been counted.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Number of interrupts after which the process exits without draining
pub const FORCE_EXIT_PRESSES: u32 = 3;

/// Exit status used for a forced exit (128 + SIGINT)
pub const FORCE_EXIT_CODE: i32 = 130;

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
///
/// # Example
///
/// ```ignore
/// tokio::select! {
///     _ = common::shutdown::wait_for_shutdown() => {
///         info!("Shutdown signal received");
///     }
///     // ... other tasks
/// }
/// ```
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Counts interrupts received after shutdown has begun
#[derive(Debug, Clone, Default)]
pub struct InterruptCounter {
    count: Arc<AtomicU32>,
}

impl InterruptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interrupt, returns the running total
    pub fn record(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// True once the operator has asked often enough to skip draining
    pub fn should_force_exit(&self) -> bool {
        self.count() >= FORCE_EXIT_PRESSES
    }
}

/// Spawn a watcher that exits the process on repeated Ctrl+C.
///
/// The caller records the first interrupt itself (the one that started the
/// graceful shutdown); every further Ctrl+C is counted here.
pub fn spawn_force_exit_watcher(counter: InterruptCounter) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let total = counter.record();
            info!("Caught interrupt ({}/{})", total, FORCE_EXIT_PRESSES);
            if counter.should_force_exit() {
                warn!("Exiting without waiting for connections to drain");
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    })
}
