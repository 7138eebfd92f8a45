//! Process lifecycle: fault containment, shutdown signals and exit codes.
//!
//! A panic anywhere in the process is logged and remembered instead of
//! tearing the server down; request-handler panics are additionally turned
//! into a 500 by the router.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

static FAULTED: AtomicBool = AtomicBool::new(false);

/// Why the serve loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT / SIGTERM (or ctrl-c) from the operator.
    Signal,
    /// The server task ended without being asked to.
    ServerExited,
}

/// Remember that a fault occurred; the process keeps running.
pub fn record_fault() {
    FAULTED.store(true, Ordering::SeqCst);
}

pub fn has_faulted() -> bool {
    FAULTED.load(Ordering::SeqCst)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Route panics through `tracing` and mark the process as faulted.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(%location, "Uncaught panic: {}", panic_message(info.payload()));
        record_fault();
    }));
}

/// Exit status for a stop reason.
///
/// An operator-requested stop is always clean. Any other stop reports
/// failure if a fault was recorded while running.
pub fn exit_code_for(reason: StopReason, faulted: bool) -> u8 {
    match reason {
        StopReason::Signal => 0,
        StopReason::ServerExited if faulted => 1,
        StopReason::ServerExited => 0,
    }
}

/// Resolve on SIGINT or SIGTERM (ctrl-c elsewhere).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to register signal handlers, falling back to ctrl-c: {}", e);
            }
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
