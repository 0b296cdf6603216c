//! Client sessions
//!
//! A session is split in two. [`ClientSession`] is the cheap, shareable side
//! held by the hub and the transport: it only enqueues work. [`SessionRunner`]
//! is the actor task that owns the session's [`ClientState`] and applies
//! that work one item at a time, so state handlers never race each other.

use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::{HubClient, HubServices};
use crate::db::Database;
use crate::game::objects::SharedGameObjects;
use crate::metrics::Metrics;
use crate::net::protocol::{Msg, Packet};
use crate::states::ClientState;

/// Work queued for a session's runner
#[derive(Debug)]
pub enum Inbound {
    /// The hub assigned this session its ID
    Initialize(u64),
    /// A message read from this session's own connection
    Socket(Msg),
    /// A message from another client, delivered by the hub or a peer
    Peer { sender_id: u64, msg: Msg },
    Close(String),
}

pub struct ClientSession {
    id: OnceLock<u64>,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl ClientSession {
    /// Create a session whose outbound packets go to `outbound`. The returned
    /// runner must be spawned for the session to do anything.
    pub fn new(services: HubServices, outbound: mpsc::Sender<Packet>) -> (Arc<Self>, SessionRunner) {
        let (tx, rx) = mpsc::unbounded_channel();

        let session = Arc::new(Self {
            id: OnceLock::new(),
            inbox: tx,
        });
        let runner = SessionRunner {
            inbox: rx,
            outbound,
            services,
            context: None,
            state: None,
            pending: Vec::new(),
        };

        (session, runner)
    }

    /// Queue a message read from this client's connection
    pub fn receive(&self, msg: Msg) {
        self.enqueue(Inbound::Socket(msg));
    }

    /// Stop the runner. The active state is exited once
    pub fn close(&self, reason: impl Into<String>) {
        self.enqueue(Inbound::Close(reason.into()));
    }

    fn enqueue(&self, inbound: Inbound) {
        // A closed inbox means the runner already finished
        let _ = self.inbox.send(inbound);
    }
}

impl HubClient for ClientSession {
    fn id(&self) -> u64 {
        self.id.get().copied().unwrap_or(0)
    }

    fn initialize(&self, id: u64) {
        if self.id.set(id).is_err() {
            warn!(client = id, "Session initialized twice, ignoring");
            return;
        }
        self.enqueue(Inbound::Initialize(id));
    }

    fn process_message(&self, sender_id: u64, msg: Msg) {
        self.enqueue(Inbound::Peer { sender_id, msg });
    }
}

/// Owns a session's state and drains its inbox
pub struct SessionRunner {
    inbox: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::Sender<Packet>,
    services: HubServices,
    context: Option<ClientContext>,
    state: Option<ClientState>,
    /// Own messages that arrived before initialization
    pending: Vec<Msg>,
}

impl SessionRunner {
    pub async fn run(mut self) {
        while let Some(inbound) = self.inbox.recv().await {
            match inbound {
                Inbound::Initialize(id) => self.initialize(id).await,
                Inbound::Socket(msg) => match self.context.as_ref().map(ClientContext::id) {
                    Some(id) => self.dispatch(id, msg).await,
                    None => self.pending.push(msg),
                },
                Inbound::Peer { sender_id, msg } => {
                    if self.context.is_some() {
                        self.dispatch(sender_id, msg).await;
                    }
                }
                Inbound::Close(reason) => {
                    info!(client = self.id(), "Closing session: {}", reason);
                    break;
                }
            }
        }

        self.shutdown();
    }

    fn id(&self) -> u64 {
        self.context.as_ref().map(ClientContext::id).unwrap_or(0)
    }

    async fn initialize(&mut self, id: u64) {
        if self.context.is_some() {
            return;
        }

        self.context = Some(ClientContext::new(id, self.outbound.clone(), self.services.clone()));
        info!(client = id, "Client initialized");
        self.set_state(ClientState::connected());

        for msg in std::mem::take(&mut self.pending) {
            self.dispatch(id, msg).await;
        }
    }

    async fn dispatch(&mut self, sender_id: u64, msg: Msg) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let Some(next) = state.handle_message(sender_id, msg).await {
            self.set_state(next);
        }
    }

    /// Exit the current state, then bind and enter `next`
    fn set_state(&mut self, mut next: ClientState) {
        let Some(context) = self.context.clone() else {
            return;
        };

        let previous = match self.state.take() {
            Some(mut old) => {
                old.on_exit();
                old.name()
            }
            None => "None",
        };
        info!(client = context.id(), "Switching from state {} to {}", previous, next.name());

        next.set_client(context);
        next.on_enter();
        self.state = Some(next);
    }

    fn shutdown(&mut self) {
        if let Some(mut state) = self.state.take() {
            debug!(client = self.id(), state = state.name(), "Exiting final state");
            state.on_exit();
        }
    }
}

/// A session's view of the server, handed to its active state
#[derive(Clone)]
pub struct ClientContext {
    id: u64,
    outbound: mpsc::Sender<Packet>,
    services: HubServices,
}

impl ClientContext {
    pub fn new(id: u64, outbound: mpsc::Sender<Packet>, services: HubServices) -> Self {
        Self {
            id,
            outbound,
            services,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn objects(&self) -> &Arc<SharedGameObjects> {
        &self.services.objects
    }

    pub fn db(&self) -> &Database {
        &self.services.db
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.services.metrics
    }

    /// Configured spore population of the arena
    pub fn max_spores(&self) -> usize {
        self.services.max_spores
    }

    /// Send to this client's own connection
    pub fn socket_send(&self, msg: Msg) {
        self.socket_send_as(msg, self.id);
    }

    /// Send to this client's own connection, attributed to `sender_id`.
    /// Never waits: a full outbound queue drops the packet.
    pub fn socket_send_as(&self, msg: Msg, sender_id: u64) {
        match self.outbound.try_send(Packet::new(sender_id, msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                Metrics::incr(&self.services.metrics.messages_dropped);
                warn!(client = self.id, "Outbound queue full, dropping {}", packet.msg.kind());
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = self.id, "Connection closed, dropping outbound packet");
            }
        }
    }

    /// Deliver straight to one peer, bypassing the hub
    pub fn pass_to_peer(&self, msg: Msg, peer_id: u64) {
        match self.services.clients.get(peer_id) {
            Some(peer) => peer.process_message(self.id, msg),
            None => debug!(client = self.id, "Peer {} is gone, dropping {}", peer_id, msg.kind()),
        }
    }

    /// Send to every other registered client
    pub fn broadcast(&self, msg: Msg) {
        self.services.hub.broadcast(Packet::new(self.id, msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{test_services, HubEvent};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_packet(rx: &mut mpsc::Receiver<Packet>) -> Packet {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for packet")
            .expect("outbound closed")
    }

    #[tokio::test]
    async fn test_initialize_sends_id() {
        let (services, _events) = test_services().await;
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (session, runner) = ClientSession::new(services, out_tx);
        tokio::spawn(runner.run());

        session.initialize(7);

        let packet = next_packet(&mut out_rx).await;
        assert_eq!(session.id(), 7);
        assert!(matches!(packet.msg, Msg::Id { id: 7 }));
    }

    #[tokio::test]
    async fn test_messages_before_initialize_are_replayed() {
        let (services, _events) = test_services().await;
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (session, runner) = ClientSession::new(services, out_tx);
        tokio::spawn(runner.run());

        session.receive(Msg::Join { name: String::new() });
        session.initialize(3);

        assert!(matches!(next_packet(&mut out_rx).await.msg, Msg::Id { id: 3 }));
        assert!(matches!(next_packet(&mut out_rx).await.msg, Msg::DenyResponse { .. }));
    }

    #[tokio::test]
    async fn test_close_exits_in_game_state() {
        let (services, _events) = test_services().await;
        let objects = services.objects.clone();
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let (session, runner) = ClientSession::new(services, out_tx);
        let task = tokio::spawn(runner.run());

        session.initialize(1);
        session.receive(Msg::Join { name: "alice".into() });
        assert!(matches!(next_packet(&mut out_rx).await.msg, Msg::Id { .. }));
        assert!(matches!(next_packet(&mut out_rx).await.msg, Msg::OkResponse));
        assert!(matches!(next_packet(&mut out_rx).await.msg, Msg::Player(_)));
        assert!(objects.players.contains(1));

        session.close("test over");
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(!objects.players.contains(1));
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops() {
        let (services, _events) = test_services().await;
        let metrics = services.metrics.clone();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let context = ClientContext::new(1, out_tx, services);

        context.socket_send(Msg::chat("one"));
        context.socket_send(Msg::chat("two"));

        assert!(matches!(out_rx.recv().await.unwrap().msg, Msg::Chat { msg } if msg == "one"));
        assert!(out_rx.try_recv().is_err());
        assert_eq!(metrics.messages_dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_socket_send_as_keeps_sender() {
        let (services, _events) = test_services().await;
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let context = ClientContext::new(1, out_tx, services);

        context.socket_send_as(Msg::chat("relay"), 9);
        assert_eq!(out_rx.recv().await.unwrap().sender_id, 9);
    }

    #[tokio::test]
    async fn test_broadcast_goes_through_hub() {
        let (services, mut events) = test_services().await;
        let (out_tx, _out_rx) = mpsc::channel(4);
        let context = ClientContext::new(5, out_tx, services);

        context.broadcast(Msg::chat("all"));

        match events.try_recv() {
            Ok(HubEvent::Broadcast(packet)) => assert_eq!(packet.sender_id, 5),
            _ => panic!("Expected a broadcast"),
        }
    }

    #[derive(Default)]
    struct RecordingPeer {
        received: parking_lot::Mutex<Vec<(u64, Msg)>>,
    }

    impl HubClient for RecordingPeer {
        fn id(&self) -> u64 {
            2
        }

        fn initialize(&self, _id: u64) {}

        fn process_message(&self, sender_id: u64, msg: Msg) {
            self.received.lock().push((sender_id, msg));
        }
    }

    #[tokio::test]
    async fn test_pass_to_peer() {
        let (services, mut events) = test_services().await;
        let peer = Arc::new(RecordingPeer::default());
        services.clients.add_with_id(peer.clone(), 2);

        let (out_tx, _out_rx) = mpsc::channel(4);
        let context = ClientContext::new(42, out_tx, services);
        context.pass_to_peer(Msg::chat("direct"), 2);
        context.pass_to_peer(Msg::chat("nobody"), 999);

        let received = peer.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, 42);
        // Direct delivery never touches the hub queue
        assert!(events.try_recv().is_err());
    }
}
