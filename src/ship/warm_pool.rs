//! Warm pool replenisher.
//!
//! A background loop that keeps `warm_pool_min_size` pre-warmed, unbound
//! ships available so sessions skip the cold start. Its view of the pool
//! count is advisory: claims happen atomically in the store, so the loop
//! only has to tolerate being stale, never coordinate.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;

use super::service::ShipService;

pub fn spawn(service: Arc<ShipService>, settings: Arc<Settings>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            min = settings.warm_pool_min_size,
            max = settings.warm_pool_max_size,
            "warm pool replenisher started"
        );
        let interval = Duration::from_secs(settings.warm_pool_replenish_interval.max(1));
        loop {
            if let Err(e) = replenish(&service, &settings).await {
                error!(error = %e, "warm pool replenish tick failed");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

async fn replenish(service: &ShipService, settings: &Settings) -> anyhow::Result<()> {
    let current = service.ships().count_warm_pool().await?;
    let active = service.ships().count_active().await?;

    if current < settings.warm_pool_min_size {
        let needed = settings.warm_pool_min_size - current;
        let budget = (settings.max_ship_num - active).max(0);
        let headroom = (settings.warm_pool_max_size - current).max(0);
        let to_create = needed.min(budget).min(headroom);

        if to_create > 0 {
            info!(current, to_create, "replenishing warm pool");
            for _ in 0..to_create {
                if let Err(e) = service.create_warm_ship().await {
                    // One failure usually means the next would fail too.
                    warn!(error = %e, "warm pool ship creation failed");
                    break;
                }
            }
        }
    } else if current > settings.warm_pool_max_size {
        let excess = current - settings.warm_pool_max_size;
        let victims = service.ships().oldest_warm_pool(excess).await?;
        for victim in victims {
            match service.evict_warm_ship(&victim.id).await {
                Ok(true) => info!(ship_id = %victim.id, "evicted surplus pool ship"),
                // Lost the race to an allocator; that is the point.
                Ok(false) => {}
                Err(e) => warn!(ship_id = %victim.id, error = %e, "pool eviction failed"),
            }
        }
    }

    Ok(())
}
