//! TTL reaper.
//!
//! Periodic sweep over Running ships whose `expires_at` has passed: stop
//! the container (bounded time), mark the row Stopped, drop the session
//! bindings. Failures stay in the Running set and get retried next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;

use super::service::ShipService;

pub fn spawn(service: Arc<ShipService>, settings: Arc<Settings>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = settings.reaper_interval, "reaper started");
        let interval = Duration::from_secs(settings.reaper_interval.max(1));
        loop {
            if let Err(e) = sweep(&service).await {
                error!(error = %e, "reaper sweep failed");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

async fn sweep(service: &ShipService) -> anyhow::Result<()> {
    let expired = service.expired_ships(Utc::now()).await?;
    for ship in expired {
        if let Err(e) = service.reap(&ship).await {
            warn!(ship_id = %ship.id, error = %e, "reap failed, will retry next tick");
        }
    }
    Ok(())
}
