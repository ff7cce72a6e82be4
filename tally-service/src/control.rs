// tally-service: Flush timer and signal multiplexing
//
// Sleeps until the next flush deadline while listening for signals. The
// deadline is fixed per cycle, so signal handling does not stretch the
// flush period.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use tally_core::error::CacheResult;

use crate::service::Service;

/// Run until SIGTERM or SIGINT. Timeouts flush; SIGHUP reconfigures;
/// SIGUSR1 forces a rotation when the debug flag allows it; SIGCHLD and the
/// rest are ignored. One final flush runs at shutdown.
pub async fn run_control_loop(service: Arc<Service>) -> CacheResult<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigchld = signal(SignalKind::child())?;

    'running: loop {
        let deadline = Instant::now() + service.backup_interval();

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    flush(&service, false).await;
                    continue 'running;
                }
                _ = sigterm.recv() => {
                    debug!("SIGTERM received");
                    break 'running;
                }
                _ = sigint.recv() => {
                    debug!("SIGINT received");
                    break 'running;
                }
                _ = sighup.recv() => {
                    debug!("SIGHUP received");
                    info!("reconfiguring");
                    if let Err(e) = service.reconfigure() {
                        error!("reconfiguration failed: {}", e);
                    }
                }
                _ = sigusr1.recv() => {
                    debug!("SIGUSR1 received");
                    if service.force_rotation_enabled() {
                        flush(&service, true).await;
                    }
                }
                _ = sigchld.recv() => {
                    debug!("SIGCHLD ignored");
                }
            }
        }
    }

    info!("shutting down");
    flush(&service, false).await;
    Ok(())
}

async fn flush(service: &Arc<Service>, force_rotate: bool) {
    let service = Arc::clone(service);
    let task = tokio::task::spawn_blocking(move || service.flush(force_rotate, false));

    if task.await.is_err() {
        error!("flush task panicked");
    }
}
