//! Session hub
//!
//! The hub is the only writer of client membership. Registrations,
//! unregistrations and broadcasts travel through one queue and are handled by
//! a single loop, so they are applied strictly in the order they were
//! submitted. Fan-out hands each packet to the recipient's inbox and never
//! waits on a client's network I/O.

pub mod client;
pub mod replenish;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::db::Database;
use crate::game::constants::spores;
use crate::game::objects::SharedGameObjects;
use crate::game::registry::Registry;
use crate::metrics::Metrics;
use crate::net::protocol::{Msg, Packet};

/// What the hub needs from a connected client
pub trait HubClient: Send + Sync {
    /// Session ID, zero until initialized
    fn id(&self) -> u64;

    /// Called once by the hub right after registration
    fn initialize(&self, id: u64);

    /// Deliver a message from another client (or the server, sender 0).
    /// Must not block.
    fn process_message(&self, sender_id: u64, msg: Msg);
}

pub type ClientRegistry = Registry<Arc<dyn HubClient>>;

/// Work submitted to the hub loop
pub enum HubEvent {
    Register(Arc<dyn HubClient>),
    /// The ID is read when the event is processed, after any pending
    /// registration of the same client
    Unregister(Arc<dyn HubClient>),
    /// Fan out to every registered client except `sender_id`
    Broadcast(Packet),
}

/// Cheap handle for submitting events to the hub
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    pub fn register(&self, client: Arc<dyn HubClient>) {
        self.submit(HubEvent::Register(client));
    }

    pub fn unregister(&self, client: Arc<dyn HubClient>) {
        self.submit(HubEvent::Unregister(client));
    }

    pub fn broadcast(&self, packet: Packet) {
        self.submit(HubEvent::Broadcast(packet));
    }

    fn submit(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("Hub is gone, dropping event");
        }
    }
}

/// Spore economy settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_spores: usize,
    pub replenish_interval: Duration,
    pub replenish_batch: usize,
    pub replenish_pacing: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_spores: spores::MAX,
            replenish_interval: spores::REPLENISH_INTERVAL,
            replenish_batch: spores::REPLENISH_BATCH,
            replenish_pacing: spores::REPLENISH_PACING,
        }
    }
}

/// Everything a session needs to reach the rest of the server
#[derive(Clone)]
pub struct HubServices {
    pub hub: HubHandle,
    pub clients: Arc<ClientRegistry>,
    pub objects: Arc<SharedGameObjects>,
    pub db: Database,
    pub metrics: Arc<Metrics>,
    /// Spore population the arena is kept at
    pub max_spores: usize,
}

pub struct SessionHub {
    services: HubServices,
    config: HubConfig,
    events: mpsc::UnboundedReceiver<HubEvent>,
}

impl SessionHub {
    pub fn new(db: Database, metrics: Arc<Metrics>, config: HubConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();

        Self {
            services: HubServices {
                hub: HubHandle { events: tx },
                clients: Arc::new(Registry::new()),
                objects: Arc::new(SharedGameObjects::new()),
                db,
                metrics,
                max_spores: config.max_spores,
            },
            config,
            events,
        }
    }

    pub fn services(&self) -> HubServices {
        self.services.clone()
    }

    pub fn handle(&self) -> HubHandle {
        self.services.hub.clone()
    }

    /// Prepare storage and the arena, then process events forever
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Initializing database");
        self.services
            .db
            .run_migrations()
            .await
            .context("Failed to initialize player storage")?;

        info!("Placing {} spores", self.config.max_spores);
        replenish::fill(&self.services.objects, self.config.max_spores);
        Metrics::set(&self.services.metrics.spore_count, self.services.objects.spores.len());

        tokio::spawn(replenish::run(self.services.clone(), self.config.clone()));

        info!("Awaiting client registration");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }

        Ok(())
    }

    fn handle_event(&self, event: HubEvent) {
        let clients = &self.services.clients;

        match event {
            HubEvent::Register(client) => {
                let id = clients.add(client.clone());
                Metrics::set(&self.services.metrics.clients_registered, clients.len());
                debug!(client = id, "Client registered");
                client.initialize(id);
            }
            HubEvent::Unregister(client) => {
                let id = client.id();
                if clients.remove(id).is_some() {
                    debug!(client = id, "Client unregistered");
                }
                Metrics::set(&self.services.metrics.clients_registered, clients.len());
            }
            HubEvent::Broadcast(packet) => {
                Metrics::incr(&self.services.metrics.broadcasts);
                clients.for_each(|id, client| {
                    if id != packet.sender_id {
                        client.process_message(packet.sender_id, packet.msg.clone());
                    }
                });
            }
        }
    }
}

/// Isolated services backed by an in-memory database, plus the receiving end
/// of the hub queue so tests can inspect submitted events
#[cfg(test)]
pub(crate) async fn test_services() -> (HubServices, mpsc::UnboundedReceiver<HubEvent>) {
    test_services_with(HubConfig::default()).await
}

#[cfg(test)]
pub(crate) async fn test_services_with(config: HubConfig) -> (HubServices, mpsc::UnboundedReceiver<HubEvent>) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.run_migrations().await.unwrap();

    let hub = SessionHub::new(db, Arc::new(Metrics::new()), config);
    (hub.services, hub.events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockClient {
        id: Mutex<u64>,
        received: Mutex<Vec<(u64, Msg)>>,
    }

    impl HubClient for MockClient {
        fn id(&self) -> u64 {
            *self.id.lock()
        }

        fn initialize(&self, id: u64) {
            *self.id.lock() = id;
        }

        fn process_message(&self, sender_id: u64, msg: Msg) {
            self.received.lock().push((sender_id, msg));
        }
    }

    async fn test_hub() -> SessionHub {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let config = HubConfig {
            max_spores: 20,
            replenish_interval: Duration::from_secs(3600),
            replenish_pacing: Duration::ZERO,
            ..Default::default()
        };
        SessionHub::new(db, Arc::new(Metrics::new()), config)
    }

    fn register(hub: &SessionHub) -> Arc<MockClient> {
        let client = Arc::new(MockClient::default());
        hub.handle_event(HubEvent::Register(client.clone()));
        client
    }

    #[tokio::test]
    async fn test_register_initializes_with_unique_ids() {
        let hub = test_hub().await;
        let a = register(&hub);
        let b = register(&hub);

        assert_ne!(a.id(), 0);
        assert_ne!(a.id(), b.id());
        assert_eq!(hub.services.clients.len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = test_hub().await;
        let a = register(&hub);
        let b = register(&hub);
        let c = register(&hub);

        hub.handle_event(HubEvent::Broadcast(Packet::new(a.id(), Msg::chat("hi"))));

        assert!(a.received.lock().is_empty());
        for peer in [&b, &c] {
            let received = peer.received.lock();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0, a.id());
        }
    }

    #[tokio::test]
    async fn test_system_broadcast_reaches_everyone() {
        let hub = test_hub().await;
        let a = register(&hub);
        let b = register(&hub);

        hub.handle_event(HubEvent::Broadcast(Packet::new(0, Msg::chat("server"))));

        assert_eq!(a.received.lock().len(), 1);
        assert_eq!(b.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_client_gets_nothing() {
        let hub = test_hub().await;
        let a = register(&hub);
        let b = register(&hub);

        hub.handle_event(HubEvent::Unregister(b.clone()));
        hub.handle_event(HubEvent::Broadcast(Packet::new(a.id(), Msg::chat("hi"))));

        assert!(b.received.lock().is_empty());
        assert_eq!(hub.services.clients.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let hub = test_hub().await;
        register(&hub);
        let stranger = Arc::new(MockClient::default());
        *stranger.id.lock() = 999;
        hub.handle_event(HubEvent::Unregister(stranger));
        assert_eq!(hub.services.clients.len(), 1);
    }

    #[tokio::test]
    async fn test_run_places_spores_and_processes_in_order() {
        let hub = test_hub().await;
        let handle = hub.handle();
        let objects = hub.services.objects.clone();
        tokio::spawn(hub.run());

        let a = Arc::new(MockClient::default());
        let b = Arc::new(MockClient::default());
        handle.register(a.clone());
        handle.register(b.clone());
        // Queued behind both registrations, so both IDs are known by now
        handle.broadcast(Packet::new(1, Msg::chat("first")));
        handle.broadcast(Packet::new(1, Msg::chat("second")));

        for _ in 0..100 {
            if b.received.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(objects.spores.len(), 20);
        assert_eq!(a.id(), 1);
        assert!(a.received.lock().is_empty());

        let received = b.received.lock();
        assert_eq!(received.len(), 2);
        assert!(matches!(&received[0].1, Msg::Chat { msg } if msg == "first"));
        assert!(matches!(&received[1].1, Msg::Chat { msg } if msg == "second"));
    }
}
