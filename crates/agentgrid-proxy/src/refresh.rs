//! Background refresh of the proxy's identifier cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::slot::SlotScheduler;
use crate::slot_proxy::SlotSchedulerProxy;

/// Refresh `proxy` every `interval` until `shutdown` flips.
pub fn spawn_refresh_loop<S>(
    proxy: Arc<SlotSchedulerProxy<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: SlotScheduler + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "agent proxy refresh started");
        proxy.refresh();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    proxy.refresh();
                }
                _ = shutdown.changed() => {
                    info!("agent proxy refresh shutting down");
                    break;
                }
            }
        }
    })
}
