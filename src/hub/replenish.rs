//! Spore placement and the background task that keeps the arena stocked

use std::sync::Arc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info};

use super::{HubConfig, HubServices};
use crate::game::objects::{SharedGameObjects, Spore};
use crate::game::spawn::spawn_coords;
use crate::metrics::Metrics;
use crate::net::protocol::{Msg, Packet, SYSTEM_SENDER};

/// A randomly sized spore at a free spot in the arena
pub fn new_spore(objects: &SharedGameObjects) -> Spore {
    let radius = Spore::random_radius(&mut rand::thread_rng());
    let position = spawn_coords(radius, objects, None);
    Spore::new(position, radius)
}

/// Add spores until there are `target`. Returns how many were added
pub fn fill(objects: &SharedGameObjects, target: usize) -> usize {
    let mut added = 0;
    while objects.spores.len() < target {
        objects.spores.add(Arc::new(new_spore(objects)));
        added += 1;
    }
    added
}

/// One replenishment pass: create up to `replenish_batch` spores towards the
/// target and announce each one to every client. Returns how many were created
pub async fn replenish_once(services: &HubServices, config: &HubConfig) -> usize {
    let objects = &services.objects;
    let remaining = objects.spores.len();
    let deficit = config.max_spores.saturating_sub(remaining);
    if deficit == 0 {
        return 0;
    }

    let count = deficit.min(config.replenish_batch);
    info!("{} spores remain, replenishing {}", remaining, count);

    for i in 0..count {
        let spore = Arc::new(new_spore(objects));
        let id = objects.spores.add(spore.clone());
        services
            .hub
            .broadcast(Packet::new(SYSTEM_SENDER, Msg::spore(id, &spore)));

        Metrics::incr(&services.metrics.spores_replenished);
        Metrics::set(&services.metrics.spore_count, objects.spores.len());

        if i + 1 < count && !config.replenish_pacing.is_zero() {
            sleep(config.replenish_pacing).await;
        }
    }

    count
}

/// Replenish on a fixed interval, forever
pub async fn run(services: HubServices, config: HubConfig) {
    let mut ticker = interval(config.replenish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    debug!("Spore replenishment every {:?}", config.replenish_interval);

    loop {
        ticker.tick().await;
        replenish_once(&services, &config).await;
    }
}
