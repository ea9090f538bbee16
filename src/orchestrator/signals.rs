//! Termination signals
//!
//! SIGINT and SIGTERM are turned into [`Control::Abort`](super::Control)
//! requests; the orchestrator loop performs the teardown, not the handler.

use tokio::task::JoinHandle;

use crate::common::Result;

use super::ControlHandle;

/// Forward termination signals to `control` until it goes away
#[cfg(unix)]
pub fn spawn_listener(control: ControlHandle) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = sigterm.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
                received = sigint.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
            };
            tracing::warn!("Received {}, stopping test", name);
            if !control.abort(format!("received {name}")) {
                break;
            }
        }
    }))
}

/// Forward Ctrl+C to `control` until it goes away
#[cfg(not(unix))]
pub fn spawn_listener(control: ControlHandle) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl+C: {}", e);
                break;
            }
            tracing::warn!("Received Ctrl+C, stopping test");
            if !control.abort("received Ctrl+C") {
                break;
            }
        }
    }))
}
