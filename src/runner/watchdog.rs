//! Host process liveness watchdog
//!
//! Polls the managed host process and fires a callback once if it exits
//! while the session still considers it running. The default callback
//! terminates the current process so a supervisor can restart it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::logging::operations;

/// Invoked once when the host process is found dead
pub type LostHandler = Arc<dyn Fn() + Send + Sync>;

/// Handle to the watchdog task
pub struct WatchdogHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    join_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WatchdogHandle {
    /// Stop watching; called before an intentional stop
    pub async fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();

        if let Some(handle) = self.join_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => debug!("Watchdog stopped"),
                Ok(Err(e)) => warn!("Watchdog task panicked: {}", e),
                Err(_) => warn!("Watchdog did not stop in time"),
            }
        }
    }
}

/// Terminate the current process with SIGTERM
pub fn terminate_self() {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
            error!("Failed to signal self: {}", e);
            std::process::exit(1);
        }
    }
    #[cfg(not(unix))]
    std::process::exit(1);
}

pub fn spawn_watchdog(
    child: Arc<Mutex<Child>>,
    interval: Duration,
    on_lost: LostHandler,
) -> WatchdogHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());

    let shutdown_clone = Arc::clone(&shutdown);
    let notify_clone = Arc::clone(&notify);

    let join_handle = tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "Watchdog started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = notify_clone.notified() => {}
            }

            if shutdown_clone.load(Ordering::SeqCst) {
                break;
            }

            let status = match child.lock() {
                Ok(mut guard) => guard.try_wait(),
                Err(_) => {
                    warn!("Watchdog lost access to the host process handle");
                    break;
                }
            };

            match status {
                Ok(None) => {}
                Ok(Some(status)) => {
                    error!(operation = operations::WATCHDOG, status = %status, "Host process exited unexpectedly");
                    on_lost();
                    break;
                }
                Err(e) => {
                    error!(operation = operations::WATCHDOG, "Failed to poll host process: {}", e);
                    on_lost();
                    break;
                }
            }
        }
    });

    WatchdogHandle {
        shutdown,
        notify,
        join_handle: Some(join_handle),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::process::Command;

    fn counting_handler() -> (LostHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let handler: LostHandler = Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test]
    async fn test_fires_once_when_process_exits() {
        let child = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        let (handler, count) = counting_handler();

        let handle = spawn_watchdog(
            Arc::new(Mutex::new(child)),
            Duration::from_millis(20),
            handler,
        );
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_before_exit_does_not_fire() {
        let child = Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let (handler, count) = counting_handler();

        let handle = spawn_watchdog(
            Arc::new(Mutex::new(child)),
            Duration::from_millis(20),
            handler,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
