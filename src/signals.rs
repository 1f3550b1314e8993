use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::run_state::RunState;

/// Wait for an operator interrupt (ctrl-c, plus SIGTERM on Unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            warn!("Failed to listen for ctrl-c: {}", e);
                            term.recv().await;
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c, shutdown only via run state: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Stop `run_state` when an operator interrupt arrives.
pub fn spawn_signal_listener(run_state: Arc<RunState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Interrupt received, shutting down Sentinel...");
                run_state.stop();
            }
            _ = run_state.stopped() => {}
        }
    })
}
